//! Parsing of the raw response header block
//!
//! The host hands back all response headers as one string of `Name: value`
//! lines. Browsers may add a `Version` pseudo-header carrying the protocol
//! of the exchange (`HTTP/1.1`), which is the only source of that
//! information.

use http::header::{HeaderMap, HeaderName, HeaderValue};

use crate::Error;

/// Name of the pseudo-header carrying the protocol version
pub const VERSION_HEADER: &str = "version";

/// Parse a MIME style header block into a [`HeaderMap`]
///
/// Lines may end in `\r\n` or `\n`. Parsing stops at the first empty line.
/// A line starting with whitespace continues the previous header's value.
/// Repeated header names keep every value, in order.
pub fn parse_header_block(block: &str) -> Result<HeaderMap, Error> {
    let mut headers = HeaderMap::new();
    let mut current: Option<(&str, String)> = None;

    for line in block.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            break;
        }

        if line.starts_with([' ', '\t']) {
            match current.as_mut() {
                Some((_, value)) => {
                    value.push(' ');
                    value.push_str(line.trim());
                    continue;
                }
                None => {
                    return Err(Error::MalformedHeaders(format!(
                        "continuation line before any header: {line:?}"
                    )));
                }
            }
        }

        if let Some((name, value)) = current.take() {
            append(&mut headers, name, &value)?;
        }

        let Some((name, value)) = line.split_once(':') else {
            return Err(Error::MalformedHeaders(format!(
                "missing colon in header line: {line:?}"
            )));
        };
        current = Some((name, value.trim().to_string()));
    }

    if let Some((name, value)) = current {
        append(&mut headers, name, &value)?;
    }

    Ok(headers)
}

fn append(headers: &mut HeaderMap, name: &str, value: &str) -> Result<(), Error> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| Error::MalformedHeaders(format!("invalid header name: {name:?}")))?;
    let header_value = HeaderValue::from_str(value).map_err(|_| {
        Error::MalformedHeaders(format!("invalid value for header {name:?}: {value:?}"))
    })?;
    headers.append(header_name, header_value);
    Ok(())
}

/// Parse an HTTP version token such as `HTTP/1.1` into major and minor numbers
pub fn parse_http_version(token: &str) -> Option<(u32, u32)> {
    match token {
        "HTTP/1.1" => return Some((1, 1)),
        "HTTP/1.0" => return Some((1, 0)),
        _ => {}
    }

    let (major, minor) = token.strip_prefix("HTTP/")?.split_once('.')?;
    Some((parse_version_number(major)?, parse_version_number(minor)?))
}

fn parse_version_number(digits: &str) -> Option<u32> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let number: u32 = digits.parse().ok()?;
    (number <= 1_000_000).then_some(number)
}

/// Protocol recovered from the `Version` pseudo-header
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Protocol {
    /// The raw token, e.g. `HTTP/1.1`
    pub name: String,
    /// 0 when the token could not be parsed
    pub major: u32,
    pub minor: u32,
}

impl Protocol {
    /// Read the protocol from the first `Version` header, if any
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let name = headers.get(VERSION_HEADER)?.to_str().ok()?;
        let (major, minor) = parse_http_version(name).unwrap_or_default();
        Some(Self {
            name: name.to_string(),
            major,
            minor,
        })
    }

    /// The matching [`http::Version`], if it is one `http` knows about
    pub fn version(&self) -> Option<http::Version> {
        match (self.major, self.minor) {
            (0, 9) => Some(http::Version::HTTP_09),
            (1, 0) => Some(http::Version::HTTP_10),
            (1, 1) => Some(http::Version::HTTP_11),
            (2, 0) => Some(http::Version::HTTP_2),
            (3, 0) => Some(http::Version::HTTP_3),
            _ => None,
        }
    }
}
