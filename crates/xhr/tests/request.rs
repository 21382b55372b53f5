//! Integration tests for the blocking request handle
//!
//! These drive [`xhr::Request`] against the in-memory mock host, whose
//! events are delivered from a separate event loop thread.

use std::io::IsTerminal;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender};
use eyre::{Result, WrapErr};
use tracing_subscriber::EnvFilter;
use xhr::testing::{MockBackend, Reply, header_block};
use xhr::{
    Backend, Credentials, Error, EventKind, Listener, NativeRequest, Payload, ReadyState, Request,
    ResponseType,
};

const TIMEOUT: Duration = Duration::from_secs(10);

// test suite "constructor"
#[ctor::ctor]
fn init() {
    let in_ci = std::env::var("CI")
        .map(|val| val == "true")
        .unwrap_or(false);

    if std::io::stderr().is_terminal() || in_ci {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .json()
            .try_init();
    }

    // error traces
    let _ = color_eyre::install();
}

/// Run `f` on its own thread and fail instead of hanging if it never returns
fn within_timeout<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = crossbeam_channel::bounded(1);
    thread::spawn(move || {
        let _ = tx.send(f());
    });
    rx.recv_timeout(TIMEOUT)
        .wrap_err("operation did not complete in time")
}

#[test]
fn test_load_makes_response_readable() -> Result<()> {
    let backend = MockBackend::replying(
        Reply::ok("hello").with_headers(header_block(&[("Content-Type", "text/plain")])),
    );

    let request = Request::new(&backend, "GET", "http://example.test/ok");
    request.set_response_type(ResponseType::ArrayBuffer);
    request.send(None)?;

    assert_eq!(request.ready_state(), ReadyState::Done);
    assert_eq!(request.status(), 200);
    assert_eq!(request.status_text(), "OK");
    assert_eq!(request.response().as_deref(), Some(&b"hello"[..]));
    assert_eq!(request.response_text().as_deref(), Some("hello"));
    assert_eq!(
        request.response_header("content-type").as_deref(),
        Some("text/plain")
    );
    assert_eq!(request.response_headers(), "Content-Type: text/plain\r\n");

    let sent = backend.requests();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].method, "GET");
    assert_eq!(sent[0].url, "http://example.test/ok");
    assert_eq!(sent[0].response_type, ResponseType::ArrayBuffer);
    Ok(())
}

#[test]
fn test_http_error_status_is_not_a_send_error() -> Result<()> {
    for (status, text) in [(404, "Not Found"), (500, "Internal Server Error")] {
        let backend = MockBackend::replying(Reply::status(status, text));
        let request = Request::new(&backend, "GET", "/endpoint");
        request.send(None)?;
        assert_eq!(request.status(), status);
        assert_eq!(request.status_text(), text);
    }
    Ok(())
}

#[test]
fn test_error_event_is_failure() {
    let backend = MockBackend::replying(Reply::Error);
    let request = Request::new(&backend, "GET", "/endpoint");
    assert_eq!(request.send(None), Err(Error::Failure));
}

#[test]
fn test_timeout_event_is_timeout() {
    let backend = MockBackend::replying(Reply::Timeout);
    let request = Request::new(&backend, "GET", "/endpoint");
    request.set_timeout(Duration::from_millis(250));
    assert_eq!(request.send(None), Err(Error::Timeout));
    assert_eq!(
        backend.requests()[0].timeout,
        Some(Duration::from_millis(250))
    );
}

#[test]
fn test_synchronous_completion_does_not_hang() -> Result<()> {
    let backend = MockBackend::replying(Reply::ok("fast").immediately());
    let outcome = within_timeout(move || {
        let request = Request::new(&backend, "GET", "/fast");
        request.send(None).map(|()| request.response())
    })?;
    assert_eq!(outcome?.as_deref(), Some(&b"fast"[..]));
    Ok(())
}

#[test]
#[should_panic(expected = "must not use a Request for multiple requests")]
fn test_send_twice_panics() {
    let backend = MockBackend::replying(Reply::ok(""));
    let request = Request::new(&backend, "GET", "/endpoint");
    let _ = request.send(None);
    let _ = request.send(None);
}

#[test]
#[should_panic(expected = "must not use a Request for multiple requests")]
fn test_open_after_send_panics() {
    let backend = MockBackend::replying(Reply::ok(""));
    let request = Request::new(&backend, "GET", "/endpoint");
    let _ = request.send(None);
    request.open("GET", "/other");
}

#[test]
fn test_abort_before_send_is_a_no_op() -> Result<()> {
    let backend = MockBackend::replying(Reply::ok("still works"));
    let outcome = within_timeout(move || {
        let request = Request::new(&backend, "GET", "/endpoint");
        request.abort();
        assert!(!request.is_sent());
        request.send(None).map(|()| request.response())
    })?;
    assert_eq!(outcome?.as_deref(), Some(&b"still works"[..]));
    Ok(())
}

#[test]
fn test_abort_in_flight_request() -> Result<()> {
    let backend = MockBackend::replying(Reply::Pending);
    let sent = backend.sent();
    let request = Arc::new(Request::new(&backend, "GET", "/slow"));

    let outcome = {
        let request = Arc::clone(&request);
        let (tx, rx) = crossbeam_channel::bounded(1);
        thread::spawn({
            let request = Arc::clone(&request);
            move || {
                let _ = tx.send(request.send(None));
            }
        });

        sent.recv_timeout(TIMEOUT)
            .wrap_err("request was never sent")?;
        request.abort();
        rx.recv_timeout(TIMEOUT)
            .wrap_err("send did not return after abort")?
    };

    assert_eq!(outcome, Err(Error::Aborted));
    assert_eq!(request.response(), None);

    // repeated aborts are harmless
    request.abort();
    Ok(())
}

/// Where a [`GatedBackend`] request stops and waits for the test
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GatePoint {
    /// The first listener registration made by `send`
    Listeners,
    /// The native `send`, before it reaches the host
    Dispatch,
}

/// Host wrapper that holds each request at a [`GatePoint`] until released
struct GatedBackend {
    inner: MockBackend,
    point: GatePoint,
    reached: Sender<()>,
    release: Receiver<()>,
}

impl GatedBackend {
    fn new(inner: MockBackend, point: GatePoint) -> (Self, Receiver<()>, Sender<()>) {
        let (reached_tx, reached_rx) = crossbeam_channel::unbounded();
        let (release_tx, release_rx) = crossbeam_channel::unbounded();
        let backend = Self {
            inner,
            point,
            reached: reached_tx,
            release: release_rx,
        };
        (backend, reached_rx, release_tx)
    }
}

impl Backend for GatedBackend {
    fn create(&self) -> Box<dyn NativeRequest> {
        Box::new(GatedRequest {
            inner: self.inner.create(),
            point: self.point,
            passed: AtomicBool::new(false),
            reached: self.reached.clone(),
            release: self.release.clone(),
        })
    }
}

struct GatedRequest {
    inner: Box<dyn NativeRequest>,
    point: GatePoint,
    passed: AtomicBool,
    reached: Sender<()>,
    release: Receiver<()>,
}

impl GatedRequest {
    fn wait_at(&self, point: GatePoint) {
        if self.point != point || self.passed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.reached.send(());
        let _ = self.release.recv_timeout(TIMEOUT);
    }
}

impl NativeRequest for GatedRequest {
    fn open(&self, method: &str, url: &str, credentials: Option<&Credentials>) {
        self.inner.open(method, url, credentials);
    }

    fn set_request_header(&self, name: &str, value: &str) {
        self.inner.set_request_header(name, value);
    }

    fn add_event_listener(&self, kind: EventKind, listener: Listener) {
        self.wait_at(GatePoint::Listeners);
        self.inner.add_event_listener(kind, listener);
    }

    fn add_upload_event_listener(&self, kind: EventKind, listener: Listener) {
        self.inner.add_upload_event_listener(kind, listener);
    }

    fn send(&self, body: Option<Payload>) {
        self.wait_at(GatePoint::Dispatch);
        self.inner.send(body);
    }

    fn abort(&self) {
        self.inner.abort();
    }

    fn ready_state(&self) -> ReadyState {
        self.inner.ready_state()
    }

    fn status(&self) -> u16 {
        self.inner.status()
    }

    fn status_text(&self) -> String {
        self.inner.status_text()
    }

    fn response(&self) -> Option<Bytes> {
        self.inner.response()
    }

    fn all_response_headers(&self) -> String {
        self.inner.all_response_headers()
    }

    fn response_header(&self, name: &str) -> Option<String> {
        self.inner.response_header(name)
    }

    fn set_response_type(&self, response_type: ResponseType) {
        self.inner.set_response_type(response_type);
    }

    fn set_timeout(&self, timeout: Duration) {
        self.inner.set_timeout(timeout);
    }

    fn set_with_credentials(&self, with_credentials: bool) {
        self.inner.set_with_credentials(with_credentials);
    }

    fn override_mime_type(&self, mime_type: &str) {
        self.inner.override_mime_type(mime_type);
    }
}

/// Start `request.send` on its own thread, abort it once the gate is
/// reached, then release the gate and wait for the outcome
fn abort_at_gate(
    request: &Arc<Request>,
    reached: &Receiver<()>,
    release: &Sender<()>,
) -> Result<Result<(), Error>> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    {
        let request = Arc::clone(request);
        thread::spawn(move || {
            let _ = tx.send(request.send(Some("side effect".into())));
        });
    }

    reached
        .recv_timeout(TIMEOUT)
        .wrap_err("send never reached the gate")?;
    request.abort();
    release.send(()).wrap_err("releasing gate")?;

    rx.recv_timeout(TIMEOUT)
        .wrap_err("send did not return after abort")
}

#[test]
fn test_abort_while_registering_listeners_prevents_dispatch() -> Result<()> {
    let backend = MockBackend::replying(Reply::Pending);
    let (host, reached, release) = GatedBackend::new(backend.clone(), GatePoint::Listeners);
    let request = Arc::new(Request::new(&host, "POST", "/endpoint"));

    let outcome = abort_at_gate(&request, &reached, &release)?;

    assert_eq!(outcome, Err(Error::Aborted));
    assert!(
        backend.requests().is_empty(),
        "aborted request reached the host"
    );
    Ok(())
}

#[test]
fn test_abort_just_before_dispatch_aborts_on_host() -> Result<()> {
    let backend = MockBackend::replying(Reply::Pending);
    let (host, reached, release) = GatedBackend::new(backend.clone(), GatePoint::Dispatch);
    let request = Arc::new(Request::new(&host, "POST", "/endpoint"));

    let host_aborts = Arc::new(AtomicUsize::new(0));
    {
        let host_aborts = Arc::clone(&host_aborts);
        request.add_event_listener(EventKind::Abort, move |_| {
            host_aborts.fetch_add(1, Ordering::SeqCst);
        });
    }

    let outcome = abort_at_gate(&request, &reached, &release)?;

    assert_eq!(outcome, Err(Error::Aborted));
    assert_eq!(backend.requests().len(), 1);
    assert_eq!(
        host_aborts.load(Ordering::SeqCst),
        1,
        "dispatched request was never aborted on the host"
    );
    assert_eq!(request.ready_state(), ReadyState::Unsent);
    Ok(())
}

#[test]
fn test_abort_racing_completion_delivers_exactly_one_outcome() -> Result<()> {
    let backend = MockBackend::new(|request| {
        let delay = request.url.len() as u64 % 3;
        Reply::ok("done").after(Duration::from_millis(delay))
    });

    for i in 0..50 {
        let request = Arc::new(Request::new(&backend, "GET", &format!("/race/{i}")));
        let (tx, rx) = crossbeam_channel::bounded(1);
        {
            let request = Arc::clone(&request);
            thread::spawn(move || {
                let _ = tx.send(request.send(None));
            });
        }

        thread::sleep(Duration::from_millis(i % 3));
        request.abort();

        let outcome = rx
            .recv_timeout(TIMEOUT)
            .wrap_err_with(|| format!("iteration {i} hung"))?;
        match outcome {
            Ok(()) | Err(Error::Aborted) => {}
            Err(e) => eyre::bail!("iteration {i}: unexpected error {e}"),
        }
    }
    Ok(())
}

#[test]
fn test_late_abort_clears_payload() -> Result<()> {
    let backend = MockBackend::replying(Reply::ok("gone"));
    let request = Request::new(&backend, "GET", "/endpoint");
    request.send(None)?;
    assert!(request.response().is_some());

    request.abort();
    assert_eq!(request.response(), None);
    Ok(())
}

#[test]
fn test_cleared_load_reports_success_without_payload() -> Result<()> {
    let backend = MockBackend::replying(Reply::ok("never seen").cleared());
    let request = Request::new(&backend, "GET", "/endpoint");
    request.send(None)?;
    assert_eq!(request.status(), 200);
    assert_eq!(request.response(), None);
    Ok(())
}

#[test]
fn test_headers_are_forwarded_in_order() -> Result<()> {
    let backend = MockBackend::replying(Reply::ok(""));
    let request = Request::new(&backend, "POST", "/endpoint");
    request.set_request_header("Accept", "text/plain");
    request.set_request_header("X-Trace", "a");
    request.set_request_header("X-Trace", "b");
    request.send(Some("payload".into()))?;

    let sent = &backend.requests()[0];
    assert_eq!(
        sent.headers,
        vec![
            ("Accept".to_string(), "text/plain".to_string()),
            ("X-Trace".to_string(), "a".to_string()),
            ("X-Trace".to_string(), "b".to_string()),
        ]
    );
    assert_eq!(sent.header_values("x-trace"), vec!["a", "b"]);
    assert_eq!(sent.body.as_ref().map(|b| b.as_bytes()), Some(&b"payload"[..]));
    Ok(())
}

#[test]
fn test_open_with_credentials_and_options() -> Result<()> {
    let backend = MockBackend::replying(Reply::ok(""));
    let request = Request::unopened(&backend);
    request.open_with_credentials("GET", "/private", &Credentials::new("user", "secret"));
    request.set_with_credentials(true);
    request.override_mime_type("text/plain; charset=x-user-defined");
    request.send(None)?;

    let sent = &backend.requests()[0];
    assert_eq!(sent.credentials, Some(Credentials::new("user", "secret")));
    assert!(sent.with_credentials);
    assert_eq!(
        sent.mime_type_override.as_deref(),
        Some("text/plain; charset=x-user-defined")
    );
    Ok(())
}

#[test]
fn test_extra_listeners_observe_progress() -> Result<()> {
    let backend = MockBackend::replying(Reply::ok("12345"));
    let request = Request::new(&backend, "PUT", "/upload");

    let progress = Arc::new(Mutex::new(Vec::new()));
    let upload_loads = Arc::new(AtomicUsize::new(0));
    {
        let progress = Arc::clone(&progress);
        request.add_event_listener(EventKind::Progress, move |event| {
            progress
                .lock()
                .unwrap()
                .push((event.loaded, event.total));
        });
    }
    {
        let upload_loads = Arc::clone(&upload_loads);
        request.add_upload_listener(EventKind::Load, move |_| {
            upload_loads.fetch_add(1, Ordering::SeqCst);
        });
    }

    request.send(Some(vec![0u8; 16].into()))?;

    assert_eq!(*progress.lock().unwrap(), vec![(5, Some(5))]);
    assert_eq!(upload_loads.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn test_response_json() -> Result<()> {
    let backend = MockBackend::replying(Reply::ok(r#"{"id": 7, "name": "seven"}"#));
    let request = Request::new(&backend, "GET", "/item");
    request.set_response_type(ResponseType::Json);
    request.send(None)?;

    let value: Option<serde_json::Value> = request.response_json()?;
    let value = value.expect("response body");
    assert_eq!(value["id"], 7);
    assert_eq!(value["name"], "seven");
    Ok(())
}

#[test]
fn test_send_helper_returns_raw_bytes() -> Result<()> {
    let backend = MockBackend::replying(Reply::ok(vec![0u8, 159, 146, 150]));
    let data = xhr::send(&backend, "POST", "/endpoint", Some("payload".into()))?;
    assert_eq!(&data[..], &[0u8, 159, 146, 150]);

    let sent = &backend.requests()[0];
    assert_eq!(sent.response_type, ResponseType::ArrayBuffer);
    assert_eq!(sent.body.as_ref().map(|b| b.as_bytes()), Some(&b"payload"[..]));
    Ok(())
}

#[test]
fn test_send_helper_maps_cleared_payload_to_aborted() {
    let backend = MockBackend::replying(Reply::ok("x").cleared());
    assert_eq!(
        xhr::send(&backend, "GET", "/endpoint", None),
        Err(Error::Aborted)
    );
}
