use std::sync::Arc;

use http::header;
use xhr::{Backend, Payload, ResponseType};

use crate::body::{Body, ResponseBody};
use crate::config::TransportConfig;
use crate::headers::{self, Protocol};
use crate::inflight::InFlight;
use crate::{Error, RequestId};

/// Details of a response that [`http::Response`] has no place for
///
/// Inserted into the extensions of every response returned by
/// [`Transport::round_trip`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMeta {
    /// Status line, e.g. `200 OK`
    pub status: String,
    pub status_text: String,
    /// Protocol token from the `Version` pseudo-header, empty if absent
    pub proto: String,
    /// 0 when the protocol is absent or unparseable
    pub proto_major: u32,
    pub proto_minor: u32,
    pub content_length: u64,
    /// Identity of the request this is a response to
    pub request_id: RequestId,
}

/// HTTP transport making its requests through an `XMLHttpRequest`-style host
///
/// Every [`Transport::round_trip`] creates a fresh [`xhr::Request`], sends it,
/// and blocks until the host reports completion. While a request is in flight
/// it can be cancelled from another thread through [`Transport::cancel`].
///
/// # Examples
///
/// ```
/// use std::io::Read;
/// use transport::{Body, Transport};
/// use xhr::testing::{MockBackend, Reply};
///
/// let transport = Transport::new(MockBackend::replying(Reply::ok("hello")));
///
/// let request = http::Request::get("http://localhost:9911/api_endpoint").body(Body::Empty)?;
/// let mut response = transport.round_trip(request)?;
///
/// let mut body = String::new();
/// response.body_mut().read_to_string(&mut body)?;
/// assert_eq!(body, "hello");
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Transport<B> {
    backend: B,
    config: TransportConfig,
    inflight: InFlight,
}

impl<B> Transport<B>
where
    B: Backend,
{
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, TransportConfig::default())
    }

    pub fn with_config(backend: B, config: TransportConfig) -> Self {
        Self {
            backend,
            config,
            inflight: InFlight::default(),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Perform a single HTTP exchange, blocking until it completes
    ///
    /// HTTP error statuses are successful round trips. The request's
    /// [`RequestId`] is used as the cancellation key; requests without one
    /// get a fresh id and cannot be cancelled from outside.
    ///
    /// # Errors
    ///
    /// - [`Error::HostOverride`] if the request sets `Host`
    /// - [`Error::NonUtf8Header`] if a header value is not UTF-8; header
    ///   values are never rewritten
    /// - [`Error::BodyRead`] if the body could not be read
    /// - [`Error::Xhr`] if the exchange failed, timed out or was cancelled
    /// - [`Error::MalformedHeaders`] if the response header block is invalid
    /// - [`Error::InvalidResponse`] if the status is outside `100..=999`. A
    ///   host reporting status 0 for a completed load ends up here rather
    ///   than in a response with status 0.
    #[tracing::instrument(
        skip_all,
        fields(method = %request.method(), uri = %request.uri()),
        level = "debug"
    )]
    pub fn round_trip(
        &self,
        request: http::Request<Body>,
    ) -> Result<http::Response<ResponseBody>, Error> {
        if request.headers().contains_key(header::HOST) {
            return Err(Error::HostOverride);
        }

        let id = RequestId::of(&request).unwrap_or_default();
        let (parts, body) = request.into_parts();

        // HeaderMap iterates every value of a name, in insertion order
        let forwarded = parts
            .headers
            .iter()
            .map(|(name, value)| {
                std::str::from_utf8(value.as_bytes())
                    .map(|value| (name.as_str(), value))
                    .map_err(|_| Error::NonUtf8Header(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let handle = Arc::new(xhr::Request::new(
            &self.backend,
            parts.method.as_str(),
            &parts.uri.to_string(),
        ));
        handle.set_response_type(ResponseType::ArrayBuffer);
        if let Some(timeout) = self.config.timeout() {
            handle.set_timeout(timeout);
        }
        if self.config.with_credentials {
            handle.set_with_credentials(true);
        }

        for (name, value) in forwarded {
            handle.set_request_header(name, value);
        }

        let data = body.read_all().map_err(Error::BodyRead)?;

        let outcome = {
            let _registration = self.inflight.register(id, Arc::clone(&handle));
            handle.send(data.map(Payload::Bytes))
        };
        outcome?;

        let Some(bytes) = handle.response() else {
            // cancelled after completion, which clears the payload; treat it
            // like a request that was aborted in time
            tracing::debug!(%id, "response payload cleared by late abort");
            return Err(Error::Xhr(xhr::Error::Aborted));
        };

        let headers = headers::parse_header_block(&handle.response_headers())?;
        let protocol = Protocol::from_headers(&headers).unwrap_or_default();

        let status = handle.status();
        let status_text = handle.status_text();
        let meta = ResponseMeta {
            status: format!("{status} {status_text}"),
            status_text,
            proto: protocol.name.clone(),
            proto_major: protocol.major,
            proto_minor: protocol.minor,
            content_length: bytes.len() as u64,
            request_id: id,
        };

        let mut builder = http::Response::builder().status(status);
        if let Some(version) = protocol.version() {
            builder = builder.version(version);
        }
        let mut response = builder
            .extension(meta)
            .body(ResponseBody::new(bytes))
            .map_err(Error::InvalidResponse)?;
        *response.headers_mut() = headers;

        tracing::debug!(%status, "round trip complete");
        Ok(response)
    }

    /// Cancel the in-flight request with the given id
    ///
    /// Does nothing if no such request is in flight, because it already
    /// completed or never started.
    #[tracing::instrument(skip(self), level = "debug")]
    pub fn cancel(&self, id: RequestId) {
        if self.inflight.cancel(id) {
            tracing::debug!("cancelled in-flight request");
        }
    }

    /// Cancel `request` if it is in flight, see [`Transport::cancel`]
    pub fn cancel_request<T>(&self, request: &http::Request<T>) {
        if let Some(id) = RequestId::of(request) {
            self.cancel(id);
        }
    }

    /// Number of requests currently in flight
    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }
}
