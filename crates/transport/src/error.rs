//! Error types for the round-trip transport.

use std::io;

/// Errors returned by [`crate::Transport::round_trip`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request tried to override the `Host` header, which the host
    /// primitive does not allow.
    #[error("cannot set Host header with XHR")]
    HostOverride,

    /// A request header value is not valid UTF-8, which the host primitive
    /// cannot carry. Nothing was sent.
    #[error("header {0} has a value that is not valid UTF-8")]
    NonUtf8Header(http::header::HeaderName),

    /// Reading the request body failed. Nothing was sent.
    #[error("reading request body: {0}")]
    BodyRead(#[source] io::Error),

    /// The exchange itself failed, timed out or was aborted.
    #[error(transparent)]
    Xhr(#[from] xhr::Error),

    /// The response header block could not be parsed.
    #[error("malformed response headers: {0}")]
    MalformedHeaders(String),

    /// The response could not be represented, e.g. a status code outside
    /// the valid range.
    #[error("invalid response: {0}")]
    InvalidResponse(#[source] http::Error),
}

impl Error {
    /// Whether the request was cancelled, either in time or after completion
    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::Xhr(xhr::Error::Aborted))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Xhr(xhr::Error::Timeout))
    }
}
