//! Error types for a single request.

/// Outcome of a [`crate::Request::send`] that did not complete with a load.
///
/// HTTP status codes 4xx and 5xx are not errors; only failures of the
/// network layer end up here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The request was aborted before it completed, or its response was
    /// cleared by an abort arriving just after completion.
    #[error("request aborted")]
    Aborted,

    /// The host reported a timeout.
    #[error("request timed out")]
    Timeout,

    /// Sending failed for a reason other than abortion or timeouts.
    ///
    /// The host does not say why. DNS failure, refused connections and
    /// CORS rejections all look the same.
    #[error("send failed")]
    Failure,
}
