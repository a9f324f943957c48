//! In-flight request buffer.

use std::time::SystemTime;

use crate::protocol::ParsedHeader;

/// The bytes of one request as they accumulate, plus the framing facts
/// learned from its header.
///
/// `content_length()` only reports a value once the header has been
/// parsed; until then the request is never complete.
#[derive(Debug, Clone)]
pub struct Request {
    got_header: bool,
    header: Option<ParsedHeader>,
    header_len: usize,
    content_length: usize,
    timestamp: SystemTime,
    bytes: Vec<u8>,
}

impl Default for Request {
    fn default() -> Self {
        Self::new()
    }
}

impl Request {
    /// Create an empty request stamped with the current time.
    pub fn new() -> Self {
        Self {
            got_header: false,
            header: None,
            header_len: 0,
            content_length: 0,
            timestamp: SystemTime::now(),
            bytes: Vec::new(),
        }
    }

    /// Record the parsed header and where it ends in the byte stream.
    pub fn record_header(&mut self, header: ParsedHeader, header_len: usize) {
        self.content_length = header.content_length.unwrap_or(0);
        self.header_len = header_len;
        self.header = Some(header);
        self.got_header = true;
    }

    /// Replace the accumulated bytes.
    pub fn set_bytes(&mut self, bytes: Vec<u8>) {
        self.bytes = bytes;
    }

    pub fn got_header(&self) -> bool {
        self.got_header
    }

    /// Parsed header, once known.
    pub fn header(&self) -> Option<&ParsedHeader> {
        self.header.as_ref()
    }

    /// Declared body length; `None` until the header has been parsed.
    pub fn content_length(&self) -> Option<usize> {
        self.got_header.then_some(self.content_length)
    }

    /// Length of the header block including the divider.
    pub fn header_len(&self) -> usize {
        self.header_len
    }

    /// When the first bytes of this request arrived.
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Every byte of the framed message.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn header_bytes(&self) -> &[u8] {
        &self.bytes[..self.header_len.min(self.bytes.len())]
    }

    /// Body bytes received so far (never past the declared length).
    pub fn body(&self) -> &[u8] {
        let start = self.header_len.min(self.bytes.len());
        let end = self
            .header_len
            .saturating_add(self.content_length)
            .min(self.bytes.len());
        &self.bytes[start..end]
    }

    pub fn received(&self) -> usize {
        self.bytes.len()
    }

    /// Header parsed and `header_len + content_length` bytes present.
    pub fn is_complete(&self) -> bool {
        self.got_header && self.bytes.len() >= self.header_len.saturating_add(self.content_length)
    }
}
