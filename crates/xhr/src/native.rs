//! Abstraction over the host's asynchronous request primitive
//!
//! [`crate::Request`] never talks to a browser directly. It drives a
//! [`NativeRequest`], which mirrors the observable contract of an
//! `XMLHttpRequest` object: it is opened, configured, dispatched with
//! `send`, and reports completion through events fired on whatever context
//! the host uses for I/O callbacks.
//!
//! A [`Backend`] plays the role of the `XMLHttpRequest` constructor and
//! hands out a fresh native request per exchange.
//!
//! # Requirements
//!
//! - Every method takes `&self`: `abort` must be callable from another thread
//!   while a `send` is outstanding, so implementations use interior
//!   mutability.
//! - After `send`, exactly one of [`EventKind::Load`], [`EventKind::Error`]
//!   or [`EventKind::Timeout`] is fired, unless the request is aborted first.
//! - Listeners may be invoked on any thread, including synchronously from
//!   within `send`.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;

/// Events a native request can fire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    LoadStart,
    Progress,
    Abort,
    Error,
    Load,
    Timeout,
    LoadEnd,
    ReadyStateChange,
}

impl EventKind {
    /// The DOM event name
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::LoadStart => "loadstart",
            EventKind::Progress => "progress",
            EventKind::Abort => "abort",
            EventKind::Error => "error",
            EventKind::Load => "load",
            EventKind::Timeout => "timeout",
            EventKind::LoadEnd => "loadend",
            EventKind::ReadyStateChange => "readystatechange",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event delivered to a [`Listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    /// Bytes transferred so far, for progress events
    pub loaded: u64,
    /// Total bytes expected, when the host knows it
    pub total: Option<u64>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            loaded: 0,
            total: None,
        }
    }

    pub fn progress(kind: EventKind, loaded: u64, total: Option<u64>) -> Self {
        Self {
            kind,
            loaded,
            total,
        }
    }
}

/// Callback registered for an event
pub type Listener = Box<dyn Fn(&Event) + Send + Sync + 'static>;

/// The possible values of the native request's `readyState`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(u16)]
pub enum ReadyState {
    /// Open has not been called yet
    #[default]
    Unsent = 0,
    /// Send has not been called yet
    Opened = 1,
    HeadersReceived = 2,
    Loading = 3,
    Done = 4,
}

/// How the host should interpret the response payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    #[default]
    Text,
    ArrayBuffer,
    Blob,
    Document,
    Json,
}

impl ResponseType {
    /// The value assigned to the native `responseType` property
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Text => "text",
            ResponseType::ArrayBuffer => "arraybuffer",
            ResponseType::Blob => "blob",
            ResponseType::Document => "document",
            ResponseType::Json => "json",
        }
    }
}

/// Request body handed to the native `send`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Bytes(Bytes),
    Text(String),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Payload::Bytes(bytes) => bytes.len(),
            Payload::Text(text) => text.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Bytes(bytes) => bytes,
            Payload::Text(text) => text.as_bytes(),
        }
    }
}

impl From<Bytes> for Payload {
    fn from(value: Bytes) -> Self {
        Payload::Bytes(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Payload::Bytes(value.into())
    }
}

impl From<&'static [u8]> for Payload {
    fn from(value: &'static [u8]) -> Self {
        Payload::Bytes(Bytes::from_static(value))
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Text(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Text(value.to_owned())
    }
}

/// User credentials passed to `open`
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: Some(password.into()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A single asynchronous request object owned by the host
pub trait NativeRequest: Send + Sync {
    fn open(&self, method: &str, url: &str, credentials: Option<&Credentials>);

    fn set_request_header(&self, name: &str, value: &str);

    fn add_event_listener(&self, kind: EventKind, listener: Listener);

    /// Register a listener on the upload target of the request
    fn add_upload_event_listener(&self, kind: EventKind, listener: Listener);

    /// Dispatch the request. Must return without waiting for completion.
    fn send(&self, body: Option<Payload>);

    /// Best-effort cancellation, racing with natural completion
    fn abort(&self);

    fn ready_state(&self) -> ReadyState;

    fn status(&self) -> u16;

    fn status_text(&self) -> String;

    /// The response payload, or `None` when there is none or it was cleared
    /// by an abort arriving after completion
    fn response(&self) -> Option<Bytes>;

    /// All response headers as a single `Name: value` block
    fn all_response_headers(&self) -> String;

    fn response_header(&self, name: &str) -> Option<String>;

    fn set_response_type(&self, response_type: ResponseType);

    fn set_timeout(&self, timeout: Duration);

    fn set_with_credentials(&self, with_credentials: bool);

    fn override_mime_type(&self, mime_type: &str);
}

/// Constructs native requests
pub trait Backend: Send + Sync {
    fn create(&self) -> Box<dyn NativeRequest>;
}

impl<B> Backend for std::sync::Arc<B>
where
    B: Backend + ?Sized,
{
    fn create(&self) -> Box<dyn NativeRequest> {
        (**self).create()
    }
}

impl<B> Backend for &B
where
    B: Backend + ?Sized,
{
    fn create(&self) -> Box<dyn NativeRequest> {
        (**self).create()
    }
}
