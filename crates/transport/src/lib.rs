//! XHR Transport
//!
//! This crate performs blocking HTTP round trips through an
//! `XMLHttpRequest`-style host primitive, see the [`xhr`] crate.
//! Requests and responses use the [`http`] crate types.
mod body;
mod config;
mod error;
pub mod headers;
mod inflight;
mod request_id;
mod transport;

pub use body::{Body, ResponseBody};
pub use config::TransportConfig;
pub use error::Error;
pub use headers::Protocol;
pub use request_id::RequestId;
pub use transport::{ResponseMeta, Transport};

pub use xhr;
