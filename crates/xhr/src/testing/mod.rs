//! Testing utilities for code built on [`crate::Request`].
//!
//! This module provides an in-memory host, [`MockBackend`], which records
//! every request it is asked to send and answers with scripted [`Reply`]
//! values delivered from its own event loop thread.

mod mock;

pub use mock::{Loaded, MockBackend, MockRequest, RecordedRequest, Reply};

/// Build a raw response header block as returned by `getAllResponseHeaders`.
///
/// # Example
///
/// ```
/// use xhr::testing::header_block;
///
/// let block = header_block(&[("Content-Type", "text/plain"), ("X-Id", "7")]);
/// assert_eq!(block, "Content-Type: text/plain\r\nX-Id: 7\r\n");
/// ```
pub fn header_block(headers: &[(&str, &str)]) -> String {
    headers
        .iter()
        .map(|(name, value)| format!("{name}: {value}\r\n"))
        .collect()
}
