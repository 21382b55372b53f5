use std::fmt;

use uuid::Uuid;

/// Identity of a logical request, used as the cancellation key
///
/// A `RequestId` lives in the extensions of an [`http::Request`]. Keep a copy
/// before handing the request to [`crate::Transport::round_trip`] to be able
/// to cancel it from another thread.
///
/// ```
/// use transport::{Body, RequestId};
///
/// let mut request = http::Request::get("http://example.test/").body(Body::Empty)?;
/// let id = RequestId::attach(&mut request);
/// assert_eq!(RequestId::of(&request), Some(id));
/// # Ok::<(), http::Error>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The id attached to `request`, if any
    pub fn of<T>(request: &http::Request<T>) -> Option<Self> {
        request.extensions().get::<RequestId>().copied()
    }

    /// Return the id attached to `request`, attaching a new one if needed
    pub fn attach<T>(request: &mut http::Request<T>) -> Self {
        *request.extensions_mut().get_or_insert_with(RequestId::new)
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
