//! Protocol-facing contracts: header parsing and response generation.
//!
//! The engine frames requests (header divider plus `Content-Length`) but
//! does not understand them. It asks a [`HeaderParser`] for the declared
//! body length and hands the completed request to a [`ProtocolHandler`].

use crate::capability::CapabilityLookup;
use crate::error::HeaderError;
use crate::request::Request;
use crate::transport::Transport;

/// The parts of a header block the engine and handlers care about.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedHeader {
    pub method: String,
    pub target: String,
    pub version: String,
    /// Header fields in arrival order, names as sent.
    pub headers: Vec<(String, String)>,
    /// Declared body length; `None` when absent.
    pub content_length: Option<usize>,
}

impl ParsedHeader {
    /// First value of `name`, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// "Parse header, report content-length."
///
/// **Contract:** `parse()` receives every byte accumulated so far, which
/// always includes a complete header block, and may include body bytes.
pub trait HeaderParser: Send + Sync {
    fn parse(&self, buf: &[u8]) -> Result<ParsedHeader, HeaderError>;
}

/// What the driver does with a handler's response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteType {
    /// The handler already wrote to the transport; only release the response.
    FreeOnly,
    /// Write every byte to the transport, then release.
    WriteAndFree,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub write_type: WriteType,
    pub bytes: Vec<u8>,
}

impl Response {
    /// Response the driver writes on the handler's behalf.
    pub fn write(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            write_type: WriteType::WriteAndFree,
            bytes: bytes.into(),
        }
    }

    /// Response the handler has already delivered itself.
    pub fn written() -> Self {
        Self {
            write_type: WriteType::FreeOnly,
            bytes: Vec::new(),
        }
    }
}

/// Everything a handler may touch while serving one request.
pub struct RequestContext<'a> {
    /// The completed request.
    pub request: &'a Request,
    /// The connection, for handlers that write their own response.
    pub transport: &'a mut dyn Transport,
    /// Named capabilities (authentication modules and the like).
    pub capabilities: &'a dyn CapabilityLookup,
    /// Shutdown has begun; long-running handlers should wrap up.
    pub shutting_down: bool,
}

impl<'a> RequestContext<'a> {
    pub fn new(
        request: &'a Request,
        transport: &'a mut dyn Transport,
        capabilities: &'a dyn CapabilityLookup,
        shutting_down: bool,
    ) -> Self {
        Self {
            request,
            transport,
            capabilities,
            shutting_down,
        }
    }
}

/// Turns a complete request into an optional response.
///
/// Returning `None` closes the connection without writing anything.
pub trait ProtocolHandler: Send + Sync {
    fn handle(&self, cx: &mut RequestContext<'_>) -> Option<Response>;
}

impl<F> ProtocolHandler for F
where
    F: Fn(&mut RequestContext<'_>) -> Option<Response> + Send + Sync,
{
    fn handle(&self, cx: &mut RequestContext<'_>) -> Option<Response> {
        self(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let parsed = ParsedHeader {
            headers: vec![
                ("Host".into(), "example.org".into()),
                ("content-type".into(), "text/plain".into()),
            ],
            ..Default::default()
        };
        assert_eq!(parsed.header("host"), Some("example.org"));
        assert_eq!(parsed.header("Content-Type"), Some("text/plain"));
        assert_eq!(parsed.header("accept"), None);
    }

    #[test]
    fn test_response_constructors() {
        let r = Response::write("hi");
        assert_eq!(r.write_type, WriteType::WriteAndFree);
        assert_eq!(r.bytes, b"hi");
        assert_eq!(Response::written().write_type, WriteType::FreeOnly);
    }
}
