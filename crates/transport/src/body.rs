//! Request and response bodies
//!
//! The host primitive needs the full request payload up front, so a
//! [`Body`] is read to completion before a request is dispatched. Responses
//! arrive fully buffered and are exposed as a [`ResponseBody`] reader.

use std::fmt;
use std::io::{self, BufRead, Cursor, Read};

use bytes::Bytes;

/// Body of an outgoing request
#[derive(Default)]
pub enum Body {
    /// No body. Never read.
    #[default]
    Empty,
    Bytes(Bytes),
    /// Read to completion before the request is sent
    Reader(Box<dyn Read + Send>),
}

impl Body {
    pub fn empty() -> Self {
        Body::Empty
    }

    pub fn from_reader<R>(reader: R) -> Self
    where
        R: Read + Send + 'static,
    {
        Body::Reader(Box::new(reader))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }

    /// Consume the body, yielding its complete contents
    ///
    /// Returns `None` for [`Body::Empty`].
    pub(crate) fn read_all(self) -> io::Result<Option<Bytes>> {
        match self {
            Body::Empty => Ok(None),
            Body::Bytes(bytes) => Ok(Some(bytes)),
            Body::Reader(mut reader) => {
                let mut data = Vec::new();
                reader.read_to_end(&mut data)?;
                Ok(Some(data.into()))
            }
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Body::Empty"),
            Body::Bytes(bytes) => f.debug_tuple("Body::Bytes").field(&bytes.len()).finish(),
            Body::Reader(_) => f.write_str("Body::Reader(..)"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(value: Bytes) -> Self {
        Body::Bytes(value)
    }
}

impl From<Vec<u8>> for Body {
    fn from(value: Vec<u8>) -> Self {
        Body::Bytes(value.into())
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Body::Bytes(value.into())
    }
}

impl From<&'static str> for Body {
    fn from(value: &'static str) -> Self {
        Body::Bytes(Bytes::from_static(value.as_bytes()))
    }
}

impl From<&'static [u8]> for Body {
    fn from(value: &'static [u8]) -> Self {
        Body::Bytes(Bytes::from_static(value))
    }
}

/// Fully buffered body of a response
#[derive(Debug, Clone, Default)]
pub struct ResponseBody {
    inner: Cursor<Bytes>,
}

impl ResponseBody {
    pub fn new(bytes: Bytes) -> Self {
        Self {
            inner: Cursor::new(bytes),
        }
    }

    /// Length of the whole body in bytes, regardless of how much was read
    pub fn content_length(&self) -> u64 {
        self.inner.get_ref().len() as u64
    }

    /// The whole body, regardless of how much was read
    pub fn as_bytes(&self) -> &Bytes {
        self.inner.get_ref()
    }

    pub fn into_bytes(self) -> Bytes {
        self.inner.into_inner()
    }
}

impl Read for ResponseBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl BufRead for ResponseBody {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.inner.consume(amt)
    }
}
