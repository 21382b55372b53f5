use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::Sender;
use serde::de::DeserializeOwned;

use crate::Error;
use crate::native::{
    Backend, Credentials, EventKind, Listener, NativeRequest, Payload, ReadyState, ResponseType,
};

type Outcome = Result<(), Error>;

/// A single request made through the host's asynchronous request primitive
///
/// Each instance may only be used for one request. [`Request::send`] blocks
/// the calling thread until the host reports completion, so another thread
/// holding a reference (for example through an `Arc`) can call
/// [`Request::abort`] while the send is outstanding.
///
/// # Examples
///
/// ```
/// use xhr::{Request, ResponseType};
/// use xhr::testing::{MockBackend, Reply};
///
/// let backend = MockBackend::replying(Reply::ok("payload"));
/// let request = Request::new(&backend, "GET", "/endpoint");
/// request.set_response_type(ResponseType::ArrayBuffer);
/// request.set_timeout(std::time::Duration::from_secs(1));
/// request.send(None)?;
///
/// assert_eq!(request.status(), 200);
/// assert_eq!(request.response().as_deref(), Some(&b"payload"[..]));
/// # Ok::<(), xhr::Error>(())
/// ```
pub struct Request {
    native: Box<dyn NativeRequest>,

    // set by the first send, so also serves as the "already sent" flag
    completion: OnceLock<Sender<Outcome>>,

    // an abort can land between the sent flag and dispatch, send checks this
    // on both sides of the native send
    aborted: AtomicBool,
}

impl Request {
    /// Create a request and open it with `method` and `url`
    pub fn new<B>(backend: &B, method: &str, url: &str) -> Self
    where
        B: Backend + ?Sized,
    {
        let request = Self::unopened(backend);
        request.open(method, url);
        request
    }

    /// Create a request that still has to be opened
    pub fn unopened<B>(backend: &B) -> Self
    where
        B: Backend + ?Sized,
    {
        Self {
            native: backend.create(),
            completion: OnceLock::new(),
            aborted: AtomicBool::new(false),
        }
    }

    /// Configure the request for a single future send
    ///
    /// # Panics
    ///
    /// Panics if the request was already sent.
    pub fn open(&self, method: &str, url: &str) {
        self.open_inner(method, url, None);
    }

    /// Like [`Request::open`], passing credentials to the host
    ///
    /// # Panics
    ///
    /// Panics if the request was already sent.
    pub fn open_with_credentials(&self, method: &str, url: &str, credentials: &Credentials) {
        self.open_inner(method, url, Some(credentials));
    }

    fn open_inner(&self, method: &str, url: &str, credentials: Option<&Credentials>) {
        assert!(
            !self.is_sent(),
            "must not use a Request for multiple requests"
        );
        tracing::trace!(%method, %url, "opening request");
        self.native.open(method, url, credentials);
    }

    /// Whether [`Request::send`] was called on this request
    pub fn is_sent(&self) -> bool {
        self.completion.get().is_some()
    }

    /// Set a header of the request. Must be called after open and before send.
    pub fn set_request_header(&self, name: &str, value: &str) {
        self.native.set_request_header(name, value);
    }

    pub fn set_response_type(&self, response_type: ResponseType) {
        self.native.set_response_type(response_type);
    }

    /// Forward a timeout to the host, which is responsible for enforcing it
    pub fn set_timeout(&self, timeout: Duration) {
        self.native.set_timeout(timeout);
    }

    pub fn set_with_credentials(&self, with_credentials: bool) {
        self.native.set_with_credentials(with_credentials);
    }

    /// Override the MIME type returned by the server
    pub fn override_mime_type(&self, mime_type: &str) {
        self.native.override_mime_type(mime_type);
    }

    /// Register an additional listener, e.g. for progress events
    pub fn add_event_listener<F>(&self, kind: EventKind, listener: F)
    where
        F: Fn(&crate::Event) + Send + Sync + 'static,
    {
        self.native.add_event_listener(kind, Box::new(listener));
    }

    /// Register a listener on the upload target, for tracking upload progress
    pub fn add_upload_listener<F>(&self, kind: EventKind, listener: F)
    where
        F: Fn(&crate::Event) + Send + Sync + 'static,
    {
        self.native
            .add_upload_event_listener(kind, Box::new(listener));
    }

    /// Send the request and block until it completes
    ///
    /// Only errors of the network layer are treated as errors. HTTP status
    /// codes 4xx and 5xx complete successfully; check [`Request::status`].
    ///
    /// # Errors
    ///
    /// - [`Error::Failure`] if the host reported an error event
    /// - [`Error::Timeout`] if the host reported a timeout event
    /// - [`Error::Aborted`] if [`Request::abort`] won the race against completion
    ///
    /// # Panics
    ///
    /// Panics if the request was already sent.
    #[tracing::instrument(skip(self, body), level = "debug")]
    pub fn send(&self, body: Option<Payload>) -> Result<(), Error> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        if self.completion.set(tx.clone()).is_err() {
            panic!("must not use a Request for multiple requests");
        }

        // listeners go in before dispatch, a host may complete from inside send
        for (kind, outcome) in [
            (EventKind::Load, Ok(())),
            (EventKind::Error, Err(Error::Failure)),
            (EventKind::Timeout, Err(Error::Timeout)),
        ] {
            self.native
                .add_event_listener(kind, completion_listener(tx.clone(), outcome));
        }
        drop(tx);

        if self.aborted.load(Ordering::SeqCst) {
            tracing::debug!("aborted before dispatch, not sending");
            return Err(Error::Aborted);
        }

        tracing::debug!(
            body_len = body.as_ref().map(Payload::len),
            "dispatching request"
        );
        self.native.send(body);

        // an abort that ran before dispatch was a no-op on the host
        if self.aborted.load(Ordering::SeqCst) {
            tracing::debug!("aborted during dispatch, aborting on the host");
            self.native.abort();
        }

        // `completion` keeps a sender alive, so this only returns with an outcome
        let outcome = rx.recv().unwrap_or(Err(Error::Failure));
        tracing::debug!(?outcome, "request completed");
        outcome
    }

    /// Abort the request
    ///
    /// The corresponding send returns [`Error::Aborted`], unless the request
    /// has already completed. Does nothing if the request was never sent.
    ///
    /// An abort arriving while [`Request::send`] is still registering its
    /// listeners stops the request from being dispatched, or aborts it on
    /// the host right after dispatch.
    pub fn abort(&self) {
        let Some(completion) = self.completion.get() else {
            return;
        };

        tracing::debug!("aborting request");
        self.aborted.store(true, Ordering::SeqCst);
        self.native.abort();
        let _ = completion.try_send(Err(Error::Aborted));
    }

    pub fn ready_state(&self) -> ReadyState {
        self.native.ready_state()
    }

    pub fn status(&self) -> u16 {
        self.native.status()
    }

    pub fn status_text(&self) -> String {
        self.native.status_text()
    }

    /// The raw response payload
    ///
    /// `None` if there is no response, including when an abort arriving
    /// just after completion cleared it.
    pub fn response(&self) -> Option<Bytes> {
        self.native.response()
    }

    /// The response payload decoded as (lossy) UTF-8
    pub fn response_text(&self) -> Option<String> {
        self.response()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Decode the response payload as JSON
    pub fn response_json<T>(&self) -> Result<Option<T>, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        self.response()
            .map(|bytes| serde_json::from_slice(&bytes))
            .transpose()
    }

    /// All response headers
    pub fn response_headers(&self) -> String {
        self.native.all_response_headers()
    }

    /// The value of the specified response header
    pub fn response_header(&self, name: &str) -> Option<String> {
        self.native.response_header(name)
    }
}

fn completion_listener(tx: Sender<Outcome>, outcome: Outcome) -> Listener {
    Box::new(move |_| {
        // first outcome wins, anything later is dropped
        let _ = tx.try_send(outcome);
    })
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("ready_state", &self.ready_state())
            .field("sent", &self.is_sent())
            .finish_non_exhaustive()
    }
}
