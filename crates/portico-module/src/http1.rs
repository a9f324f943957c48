//! `Http1HeaderParser`: default `HeaderParser`.
//!
//! Parses the request line and header fields up to the first blank line.
//! Only `Content-Length` framing is understood; chunked transfer coding is
//! not supported.

use portico_core::error::HeaderError;
use portico_core::protocol::{HeaderParser, ParsedHeader};

const DIVIDER: &[u8] = b"\r\n\r\n";

#[derive(Debug, Clone)]
pub struct Http1HeaderParser {
    max_headers: usize,
}

impl Default for Http1HeaderParser {
    fn default() -> Self {
        Self { max_headers: 100 }
    }
}

impl Http1HeaderParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_headers(mut self, n: usize) -> Self {
        self.max_headers = n;
        self
    }
}

impl HeaderParser for Http1HeaderParser {
    fn parse(&self, buf: &[u8]) -> Result<ParsedHeader, HeaderError> {
        let end = buf
            .windows(DIVIDER.len())
            .position(|w| w == DIVIDER)
            .ok_or(HeaderError::Incomplete)?;
        let head = std::str::from_utf8(&buf[..end])
            .map_err(|_| HeaderError::Malformed("header block is not valid UTF-8"))?;

        let mut lines = head.split("\r\n");
        let request_line = lines
            .next()
            .filter(|l| !l.is_empty())
            .ok_or(HeaderError::Malformed("empty request line"))?;

        let mut parts = request_line.split_ascii_whitespace();
        let (Some(method), Some(target), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(HeaderError::Malformed("request line needs method, target and version"));
        };
        if !version.starts_with("HTTP/") {
            return Err(HeaderError::Malformed("unsupported protocol version"));
        }

        let mut parsed = ParsedHeader {
            method: method.to_string(),
            target: target.to_string(),
            version: version.to_string(),
            headers: Vec::new(),
            content_length: None,
        };

        for line in lines {
            if parsed.headers.len() == self.max_headers {
                return Err(HeaderError::Malformed("too many header fields"));
            }
            let (name, value) = line
                .split_once(':')
                .ok_or(HeaderError::Malformed("header field without colon"))?;
            if name.is_empty() || name.ends_with(char::is_whitespace) {
                return Err(HeaderError::Malformed("invalid header field name"));
            }
            let value = value.trim();

            if name.eq_ignore_ascii_case("content-length") {
                let len: usize = value
                    .parse()
                    .map_err(|_| HeaderError::InvalidContentLength(value.to_string()))?;
                match parsed.content_length {
                    Some(prev) if prev != len => {
                        return Err(HeaderError::InvalidContentLength(value.to_string()))
                    }
                    _ => parsed.content_length = Some(len),
                }
            }
            parsed.headers.push((name.to_string(), value.to_string()));
        }

        Ok(parsed)
    }
}
