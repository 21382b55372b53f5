//! In-memory host implementation for testing

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::native::{
    Backend, Credentials, Event, EventKind, Listener, NativeRequest, Payload, ReadyState,
    ResponseType,
};

/// How often the event loop checks for shutdown while idle
const POLL_INTERVAL: Duration = Duration::from_millis(50);

type SharedListener = Arc<dyn Fn(&Event) + Send + Sync + 'static>;

/// A successful exchange as the host would report it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Loaded {
    pub status: u16,
    pub status_text: String,
    /// Raw header block, `Name: value` lines
    pub headers: String,
    pub body: Bytes,
}

/// Scripted answer to a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Fire `load` with the given response
    Load(Loaded),
    /// Fire `load`, but with the response payload already cleared, as
    /// happens when an abort arrives just after completion
    Cleared(Loaded),
    /// Fire `error`
    Error,
    /// Fire `timeout`
    Timeout,
    /// Never complete; only an abort ends the request
    Pending,
    /// Complete synchronously from within `send`
    Immediate(Box<Reply>),
    /// Complete from the event loop after a delay
    Delayed(Duration, Box<Reply>),
}

impl Reply {
    /// A `200 OK` load with the given body
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Reply::Load(Loaded {
            status: 200,
            status_text: "OK".to_string(),
            headers: String::new(),
            body: body.into(),
        })
    }

    /// A load with the given status and an empty body
    pub fn status(status: u16, status_text: &str) -> Self {
        Reply::Load(Loaded {
            status,
            status_text: status_text.to_string(),
            ..Default::default()
        })
    }

    pub fn with_headers(self, headers: impl Into<String>) -> Self {
        let headers = headers.into();
        self.map_loaded(move |loaded| loaded.headers = headers)
    }

    pub fn with_body(self, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        self.map_loaded(move |loaded| loaded.body = body)
    }

    /// Turn a load into one whose payload was cleared
    pub fn cleared(self) -> Self {
        match self {
            Reply::Load(loaded) => Reply::Cleared(loaded),
            Reply::Immediate(inner) => Reply::Immediate(Box::new(inner.cleared())),
            Reply::Delayed(delay, inner) => Reply::Delayed(delay, Box::new(inner.cleared())),
            other => other,
        }
    }

    pub fn immediately(self) -> Self {
        Reply::Immediate(Box::new(self))
    }

    pub fn after(self, delay: Duration) -> Self {
        Reply::Delayed(delay, Box::new(self))
    }

    fn map_loaded(self, f: impl FnOnce(&mut Loaded)) -> Self {
        match self {
            Reply::Load(mut loaded) => {
                f(&mut loaded);
                Reply::Load(loaded)
            }
            Reply::Cleared(mut loaded) => {
                f(&mut loaded);
                Reply::Cleared(loaded)
            }
            Reply::Immediate(inner) => Reply::Immediate(Box::new(inner.map_loaded(f))),
            Reply::Delayed(delay, inner) => Reply::Delayed(delay, Box::new(inner.map_loaded(f))),
            other => other,
        }
    }

    fn into_terminal(self) -> Reply {
        match self {
            Reply::Immediate(inner) | Reply::Delayed(_, inner) => inner.into_terminal(),
            other => other,
        }
    }
}

/// Everything the host was told about a request by the time it was sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub credentials: Option<Credentials>,
    /// Headers in the order they were set
    pub headers: Vec<(String, String)>,
    pub body: Option<Payload>,
    pub response_type: ResponseType,
    pub timeout: Option<Duration>,
    pub with_credentials: bool,
    pub mime_type_override: Option<String>,
}

impl RecordedRequest {
    /// All values set for `name`, compared case-insensitively
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
            .collect()
    }
}

struct Shared {
    responder: Box<dyn Fn(&RecordedRequest) -> Reply + Send + Sync>,
    recorded: Mutex<Vec<RecordedRequest>>,
    created: AtomicUsize,
    sent_tx: Sender<RecordedRequest>,
    sent_rx: Receiver<RecordedRequest>,
    host: Sender<HostTask>,

    // Option because of drop and take
    exit: Mutex<Option<oneshot::Sender<()>>>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        tracing::debug!("shutting down mock host");
        if let Some(exit) = lock(&self.exit).take() {
            let _ = exit.send(());
        }
    }
}

/// In-memory host for tests
///
/// Requests are answered by a responder closure. Completion events are
/// fired from a background event loop thread, so a blocked
/// [`crate::Request::send`] is woken exactly like it would be by a real
/// host, unless the reply asks for [`Reply::Immediate`] delivery.
///
/// # Examples
///
/// ```
/// use xhr::Request;
/// use xhr::testing::{MockBackend, Reply};
///
/// let backend = MockBackend::new(|request| {
///     if request.url.ends_with("/missing") {
///         Reply::status(404, "Not Found")
///     } else {
///         Reply::ok("found")
///     }
/// });
///
/// let request = Request::new(&backend, "GET", "http://example.test/missing");
/// request.send(None)?;
/// assert_eq!(request.status(), 404);
/// assert_eq!(backend.requests().len(), 1);
/// # Ok::<(), xhr::Error>(())
/// ```
#[derive(Clone)]
pub struct MockBackend {
    shared: Arc<Shared>,
}

impl MockBackend {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&RecordedRequest) -> Reply + Send + Sync + 'static,
    {
        let (host_tx, host_rx) = crossbeam_channel::unbounded();
        let (sent_tx, sent_rx) = crossbeam_channel::unbounded();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        thread::spawn(move || run_event_loop(host_rx, shutdown_rx));

        Self {
            shared: Arc::new(Shared {
                responder: Box::new(responder),
                recorded: Mutex::new(Vec::new()),
                created: AtomicUsize::new(0),
                sent_tx,
                sent_rx,
                host: host_tx,
                exit: Mutex::new(Some(shutdown_tx)),
            }),
        }
    }

    /// Answer every request with the same reply
    pub fn replying(reply: Reply) -> Self {
        Self::new(move |_| reply.clone())
    }

    /// Requests sent so far, in send order
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.shared.recorded).clone()
    }

    /// Number of native requests constructed, sent or not
    pub fn created(&self) -> usize {
        self.shared.created.load(Ordering::SeqCst)
    }

    /// Receives each request as it is sent
    ///
    /// By the time a request shows up here, its listeners are registered and
    /// it can be aborted.
    pub fn sent(&self) -> Receiver<RecordedRequest> {
        self.shared.sent_rx.clone()
    }
}

impl Backend for MockBackend {
    fn create(&self) -> Box<dyn NativeRequest> {
        self.shared.created.fetch_add(1, Ordering::SeqCst);
        Box::new(MockRequest {
            state: Arc::new(Mutex::new(State::default())),
            shared: Arc::clone(&self.shared),
        })
    }
}

fn run_event_loop(tasks: Receiver<HostTask>, shutdown: oneshot::Receiver<()>) {
    loop {
        // check for shutdown
        match shutdown.try_recv() {
            Ok(_) => return,
            Err(oneshot::TryRecvError::Empty) => {}
            Err(e) => {
                tracing::debug!(error = %e, "shutdown sender closed");
                return;
            }
        }

        match tasks.recv_timeout(POLL_INTERVAL) {
            Ok(task) => complete(&task.state, task.reply),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

struct HostTask {
    state: Arc<Mutex<State>>,
    reply: Reply,
}

#[derive(Default)]
struct State {
    ready_state: ReadyState,
    method: String,
    url: String,
    credentials: Option<Credentials>,
    headers: Vec<(String, String)>,
    response_type: ResponseType,
    timeout: Option<Duration>,
    with_credentials: bool,
    mime_type_override: Option<String>,
    listeners: HashMap<EventKind, Vec<SharedListener>>,
    upload_listeners: HashMap<EventKind, Vec<SharedListener>>,
    upload_len: u64,

    sent: bool,
    finished: bool,
    aborted: bool,

    status: u16,
    status_text: String,
    response_headers: String,
    response: Option<Bytes>,
}

impl State {
    fn record(&self, body: Option<Payload>) -> RecordedRequest {
        RecordedRequest {
            method: self.method.clone(),
            url: self.url.clone(),
            credentials: self.credentials.clone(),
            headers: self.headers.clone(),
            body,
            response_type: self.response_type,
            timeout: self.timeout,
            with_credentials: self.with_credentials,
            mime_type_override: self.mime_type_override.clone(),
        }
    }

    fn reset_response(&mut self) {
        self.status = 0;
        self.status_text.clear();
        self.response_headers.clear();
        self.response = None;
    }

    fn load(&mut self, loaded: Loaded, keep_body: bool) {
        self.status = loaded.status;
        self.status_text = loaded.status_text;
        self.response_headers = loaded.headers;
        self.response = keep_body.then_some(loaded.body);
    }

    fn listeners_for(&self, events: &[Event]) -> Vec<(Event, Vec<SharedListener>)> {
        snapshot(&self.listeners, events)
    }

    fn upload_listeners_for(&self, events: &[Event]) -> Vec<(Event, Vec<SharedListener>)> {
        snapshot(&self.upload_listeners, events)
    }
}

/// Native request handed out by [`MockBackend`]
pub struct MockRequest {
    state: Arc<Mutex<State>>,
    shared: Arc<Shared>,
}

impl NativeRequest for MockRequest {
    fn open(&self, method: &str, url: &str, credentials: Option<&Credentials>) {
        let fired = {
            let mut state = lock(&self.state);
            state.method = method.to_string();
            state.url = url.to_string();
            state.credentials = credentials.cloned();
            state.headers.clear();
            state.ready_state = ReadyState::Opened;
            state.listeners_for(&[Event::new(EventKind::ReadyStateChange)])
        };
        fire(fired);
    }

    fn set_request_header(&self, name: &str, value: &str) {
        lock(&self.state)
            .headers
            .push((name.to_string(), value.to_string()));
    }

    fn add_event_listener(&self, kind: EventKind, listener: Listener) {
        lock(&self.state)
            .listeners
            .entry(kind)
            .or_default()
            .push(Arc::from(listener));
    }

    fn add_upload_event_listener(&self, kind: EventKind, listener: Listener) {
        lock(&self.state)
            .upload_listeners
            .entry(kind)
            .or_default()
            .push(Arc::from(listener));
    }

    fn send(&self, body: Option<Payload>) {
        let (recorded, fired) = {
            let mut state = lock(&self.state);
            state.sent = true;
            state.upload_len = body.as_ref().map_or(0, |body| body.len() as u64);
            let recorded = state.record(body);
            let fired = state.listeners_for(&[Event::new(EventKind::LoadStart)]);
            (recorded, fired)
        };

        lock(&self.shared.recorded).push(recorded.clone());
        let reply = (self.shared.responder)(&recorded);
        tracing::trace!(method = %recorded.method, url = %recorded.url, ?reply, "mock host received request");
        let _ = self.shared.sent_tx.send(recorded);
        fire(fired);

        match reply {
            Reply::Pending => {}
            Reply::Immediate(inner) => complete(&self.state, *inner),
            Reply::Delayed(delay, inner) => {
                let task = HostTask {
                    state: Arc::clone(&self.state),
                    reply: *inner,
                };
                let host = self.shared.host.clone();
                thread::spawn(move || {
                    thread::sleep(delay);
                    let _ = host.send(task);
                });
            }
            reply => {
                let _ = self.shared.host.send(HostTask {
                    state: Arc::clone(&self.state),
                    reply,
                });
            }
        }
    }

    fn abort(&self) {
        let fired = {
            let mut state = lock(&self.state);
            if !state.sent || state.aborted {
                return;
            }
            state.aborted = true;

            if state.finished {
                // too late to stop the exchange, but the payload is dropped
                state.reset_response();
                state.ready_state = ReadyState::Unsent;
                return;
            }

            state.reset_response();
            state.ready_state = ReadyState::Unsent;
            state.listeners_for(&[
                Event::new(EventKind::ReadyStateChange),
                Event::new(EventKind::Abort),
                Event::new(EventKind::LoadEnd),
            ])
        };
        fire(fired);
    }

    fn ready_state(&self) -> ReadyState {
        lock(&self.state).ready_state
    }

    fn status(&self) -> u16 {
        lock(&self.state).status
    }

    fn status_text(&self) -> String {
        lock(&self.state).status_text.clone()
    }

    fn response(&self) -> Option<Bytes> {
        lock(&self.state).response.clone()
    }

    fn all_response_headers(&self) -> String {
        lock(&self.state).response_headers.clone()
    }

    fn response_header(&self, name: &str) -> Option<String> {
        let state = lock(&self.state);
        let values: Vec<&str> = state
            .response_headers
            .lines()
            .filter_map(|line| line.split_once(':'))
            .filter(|(key, _)| key.trim().eq_ignore_ascii_case(name))
            .map(|(_, value)| value.trim())
            .collect();
        (!values.is_empty()).then(|| values.join(", "))
    }

    fn set_response_type(&self, response_type: ResponseType) {
        lock(&self.state).response_type = response_type;
    }

    fn set_timeout(&self, timeout: Duration) {
        lock(&self.state).timeout = Some(timeout);
    }

    fn set_with_credentials(&self, with_credentials: bool) {
        lock(&self.state).with_credentials = with_credentials;
    }

    fn override_mime_type(&self, mime_type: &str) {
        lock(&self.state).mime_type_override = Some(mime_type.to_string());
    }
}

/// Deliver a terminal reply, unless the request was aborted or already finished
fn complete(state: &Mutex<State>, reply: Reply) {
    let fired = {
        let mut state = lock(state);
        if state.aborted || state.finished {
            return;
        }

        let terminal = match reply.into_terminal() {
            Reply::Load(loaded) => {
                state.load(loaded, true);
                EventKind::Load
            }
            Reply::Cleared(loaded) => {
                state.load(loaded, false);
                EventKind::Load
            }
            Reply::Error => {
                state.reset_response();
                EventKind::Error
            }
            Reply::Timeout => {
                state.reset_response();
                EventKind::Timeout
            }
            Reply::Pending | Reply::Immediate(_) | Reply::Delayed(..) => return,
        };
        state.finished = true;
        state.ready_state = ReadyState::Done;

        let mut fired = Vec::new();
        if state.upload_len > 0 && terminal == EventKind::Load {
            let len = state.upload_len;
            fired.extend(state.upload_listeners_for(&[
                Event::progress(EventKind::Progress, len, Some(len)),
                Event::new(EventKind::Load),
                Event::new(EventKind::LoadEnd),
            ]));
        }

        let received = state.response.as_ref().map_or(0, |body| body.len() as u64);
        let mut events = vec![Event::new(EventKind::ReadyStateChange)];
        if terminal == EventKind::Load {
            events.push(Event::progress(
                EventKind::Progress,
                received,
                Some(received),
            ));
        }
        events.push(Event::new(terminal));
        events.push(Event::new(EventKind::LoadEnd));
        fired.extend(state.listeners_for(&events));
        fired
    };
    fire(fired);
}

fn snapshot(
    listeners: &HashMap<EventKind, Vec<SharedListener>>,
    events: &[Event],
) -> Vec<(Event, Vec<SharedListener>)> {
    events
        .iter()
        .map(|event| {
            let registered = listeners.get(&event.kind).cloned().unwrap_or_default();
            (*event, registered)
        })
        .collect()
}

// listeners run without the state lock held, they may call back into the request
fn fire(fired: Vec<(Event, Vec<SharedListener>)>) {
    for (event, listeners) in fired {
        for listener in listeners {
            listener(&event);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
