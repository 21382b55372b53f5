//! Blocking bindings for an `XMLHttpRequest`-style request primitive
//!
//! The host primitive is event driven: a request is dispatched and its
//! completion is later signalled through `load`, `error` or `timeout`
//! events. This crate presents it as a blocking call with a single outcome.
//!
//! There are two ways of making requests. The first is [`Request`], which
//! exposes every knob of the underlying object (timeout, response format,
//! credentials, extra listeners) and gives access to response details such
//! as the status code. It is also required for aborting in-flight requests.
//!
//! ```
//! use xhr::{Request, ResponseType};
//! use xhr::testing::{MockBackend, Reply};
//!
//! let backend = MockBackend::replying(Reply::status(404, "Not Found"));
//! let request = Request::new(&backend, "GET", "/endpoint");
//! request.set_response_type(ResponseType::ArrayBuffer);
//! request.send(None)?;
//! // HTTP errors are not send errors
//! assert_eq!(request.status(), 404);
//! # Ok::<(), xhr::Error>(())
//! ```
//!
//! The second is [`send`], a helper that builds a [`Request`] with sane
//! defaults and returns the unprocessed response bytes.
//!
//! The host itself plugs in through the [`Backend`] and [`NativeRequest`]
//! traits. [`testing::MockBackend`] is an in-memory host with its own event
//! loop thread.
mod error;
pub mod native;
mod request;
pub mod testing;

use bytes::Bytes;

pub use error::Error;
pub use native::{
    Backend, Credentials, Event, EventKind, Listener, NativeRequest, Payload, ReadyState,
    ResponseType,
};
pub use request::Request;

/// Construct a [`Request`] and send it, returning the response as raw bytes
///
/// For more control over the request, as well as the option to send text
/// payloads, construct a [`Request`] yourself.
///
/// Only errors of the network layer are treated as errors. To check status
/// codes, use [`Request`] instead.
///
/// ```
/// use xhr::testing::{MockBackend, Reply};
///
/// let backend = MockBackend::replying(Reply::ok("stored"));
/// let data = xhr::send(&backend, "POST", "/endpoint", Some("payload here".into()))?;
/// assert_eq!(&data[..], b"stored");
/// # Ok::<(), xhr::Error>(())
/// ```
pub fn send<B>(backend: &B, method: &str, url: &str, data: Option<Bytes>) -> Result<Bytes, Error>
where
    B: Backend + ?Sized,
{
    let request = Request::new(backend, method, url);
    request.set_response_type(ResponseType::ArrayBuffer);
    request.send(data.map(Payload::Bytes))?;
    request.response().ok_or(Error::Aborted)
}
