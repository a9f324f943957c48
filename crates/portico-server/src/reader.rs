//! Request reader: two-pass incremental framing of one request.
//!
//! Pass 0 reads until the header divider `\r\n\r\n` shows up, then asks the
//! [`HeaderParser`] for the declared body length. Pass 1 keeps reading until
//! the body is present, counting body bytes that arrived with the header
//! (the preroll) only once.
//!
//! Reads block. The first chunk uses the configured buffer size; after that
//! the chunk buffer is grown once to [`LARGE_READ_SIZE`].

use std::io::{self, Read};
use std::sync::Arc;

use portico_core::error::{HeaderError, Pass, ReadError};
use portico_core::protocol::HeaderParser;
use portico_core::request::Request;
use tracing::{debug, trace};

/// End-of-header marker.
pub const DIVIDER: &[u8; 4] = b"\r\n\r\n";

/// Working chunk size after the one-time upsize.
pub const LARGE_READ_SIZE: usize = 1 << 20;

/// Header bytes accepted before the divider must have been seen.
pub const MAX_HEADER_LEN: usize = 4 << 20;

/// Body length that is only traced, never acted on.
pub const RESERVED_BODY_LENGTH: usize = 124;

/// Offset of the first divider in `buf`.
pub fn find_divider(buf: &[u8]) -> Option<usize> {
    buf.windows(DIVIDER.len()).position(|w| w == DIVIDER)
}

/// Streaming divider search.
///
/// Keeps the last three bytes seen so a divider split across any number of
/// reads is still found. Offsets are relative to the first byte fed.
#[derive(Debug, Default, Clone)]
pub struct DividerScanner {
    carry: [u8; 3],
    carry_len: usize,
    fed: usize,
    found: Option<usize>,
}

impl DividerScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset of the divider, once seen.
    pub fn found(&self) -> Option<usize> {
        self.found
    }

    /// Feed the next chunk; returns the divider offset once seen.
    pub fn feed(&mut self, chunk: &[u8]) -> Option<usize> {
        if self.found.is_some() {
            self.fed += chunk.len();
            return self.found;
        }

        // divider starting in the carried tail
        for start in 0..self.carry_len {
            let head = &self.carry[start..self.carry_len];
            let need = DIVIDER.len() - head.len();
            if chunk.len() >= need && DIVIDER.starts_with(head) && DIVIDER[head.len()..] == chunk[..need] {
                self.found = Some(self.fed - head.len());
                break;
            }
        }
        if self.found.is_none() {
            if let Some(pos) = find_divider(chunk) {
                self.found = Some(self.fed + pos);
            }
        }

        let total = self.carry_len + chunk.len();
        let keep = total.min(self.carry.len());
        let mut next = [0u8; 3];
        for (k, slot) in next.iter_mut().enumerate().take(keep) {
            let idx = total - keep + k;
            *slot = if idx < self.carry_len {
                self.carry[idx]
            } else {
                chunk[idx - self.carry_len]
            };
        }
        self.carry = next;
        self.carry_len = keep;
        self.fed += chunk.len();
        self.found
    }
}

/// Drives one connection's reads until a complete request is framed.
pub struct RequestReader {
    parser: Arc<dyn HeaderParser>,
    chunk_size: usize,
    large_chunk_size: usize,
    max_header_len: usize,
}

impl RequestReader {
    /// `chunk_size` is the first read's buffer size.
    pub fn new(parser: Arc<dyn HeaderParser>, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            parser,
            chunk_size,
            large_chunk_size: LARGE_READ_SIZE.max(chunk_size),
            max_header_len: MAX_HEADER_LEN,
        }
    }

    /// Override the upsized chunk length.
    pub fn large_chunk_size(mut self, size: usize) -> Self {
        self.large_chunk_size = size.max(self.chunk_size);
        self
    }

    /// Give up on a peer that sends this many bytes without a divider.
    pub fn max_header_len(mut self, limit: usize) -> Self {
        self.max_header_len = limit.max(DIVIDER.len());
        self
    }

    /// Read one request from `io` into `slot`.
    ///
    /// `slot` is filled on the first successful read. On `Ok(())` it holds a
    /// complete request of exactly `header_len + content_length` bytes; on
    /// error the caller drops the connection and whatever `slot` holds.
    pub fn read_request<R>(&self, io: &mut R, slot: &mut Option<Request>) -> Result<(), ReadError>
    where
        R: Read + ?Sized,
    {
        let mut chunk = vec![0u8; self.chunk_size];
        let mut upsized = false;
        let mut acc: Vec<u8> = Vec::with_capacity(self.chunk_size);
        let mut scanner = DividerScanner::new();

        // Pass 0: header
        loop {
            self.upsize(&mut chunk, &mut upsized, acc.len())?;
            let n = read_some(io, &mut chunk, Pass::Header, acc.len())?;
            slot.get_or_insert_with(Request::new);
            acc.extend_from_slice(&chunk[..n]);
            if scanner.feed(&chunk[..n]).is_some() {
                break;
            }
            if acc.len() >= self.max_header_len {
                return Err(ReadError::HeaderTooLarge {
                    limit: self.max_header_len,
                });
            }
        }

        let parsed = self.parser.parse(&acc)?;
        let content_length = parsed.content_length.unwrap_or(0);
        let header_len = match (find_divider(&acc), content_length) {
            (Some(at), _) => at + DIVIDER.len(),
            (None, 0) => acc.len(),
            (None, content_length) => return Err(ReadError::DividerMissing { content_length }),
        };
        if content_length == RESERVED_BODY_LENGTH {
            trace!(content_length, "[reader] reserved body length");
        }

        let preroll = acc.len() - header_len;
        let stop_reading = preroll >= content_length;
        let Some(message_len) = header_len.checked_add(content_length) else {
            return Err(ReadError::HeaderParse(HeaderError::InvalidContentLength(
                content_length.to_string(),
            )));
        };

        // Pass 1: body
        if content_length > 0 && !stop_reading {
            acc.try_reserve(message_len - acc.len())
                .map_err(|_| ReadError::Allocation(message_len))?;
            let mut count = preroll;
            loop {
                self.upsize(&mut chunk, &mut upsized, acc.len())?;
                let want = (content_length - count).min(chunk.len());
                let n = read_some(io, &mut chunk[..want], Pass::Body, acc.len())?;
                acc.extend_from_slice(&chunk[..n]);
                count += n;
                if count >= content_length {
                    trace!(preroll, body_read = count - preroll, "[reader] body complete");
                    break;
                }
            }
        }

        if acc.len() > message_len {
            debug!(
                extra = acc.len() - message_len,
                "[reader] dropping bytes past the framed message"
            );
            acc.truncate(message_len);
        }

        let request = slot.get_or_insert_with(Request::new);
        request.record_header(parsed, header_len);
        request.set_bytes(acc);
        Ok(())
    }

    /// Grow the chunk buffer once, after the first data arrived.
    fn upsize(&self, chunk: &mut Vec<u8>, upsized: &mut bool, received: usize) -> Result<(), ReadError> {
        if *upsized || received == 0 || chunk.len() >= self.large_chunk_size {
            return Ok(());
        }
        let extra = self.large_chunk_size - chunk.len();
        chunk
            .try_reserve_exact(extra)
            .map_err(|_| ReadError::Allocation(self.large_chunk_size))?;
        chunk.resize(self.large_chunk_size, 0);
        *upsized = true;
        Ok(())
    }
}

/// One read; 0 bytes means the peer is gone. `Interrupted` is retried.
fn read_some<R>(io: &mut R, buf: &mut [u8], pass: Pass, received: usize) -> Result<usize, ReadError>
where
    R: Read + ?Sized,
{
    loop {
        match io.read(buf) {
            Ok(0) => return Err(ReadError::ConnectionClosed { pass, received }),
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => return Err(ReadError::Io { pass, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portico_module::Http1HeaderParser;
    use std::collections::VecDeque;

    /// Hands out the scripted chunks one read at a time, then EOF.
    struct Chunked {
        chunks: VecDeque<Vec<u8>>,
        reads: usize,
    }

    impl Chunked {
        fn new<I, C>(chunks: I) -> Self
        where
            I: IntoIterator<Item = C>,
            C: AsRef<[u8]>,
        {
            Self {
                chunks: chunks.into_iter().map(|c| c.as_ref().to_vec()).collect(),
                reads: 0,
            }
        }
    }

    impl Read for Chunked {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.reads += 1;
            let Some(mut front) = self.chunks.pop_front() else {
                return Ok(0);
            };
            if front.is_empty() {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "signal"));
            }
            let n = front.len().min(buf.len());
            buf[..n].copy_from_slice(&front[..n]);
            if n < front.len() {
                self.chunks.push_front(front.split_off(n));
            }
            Ok(n)
        }
    }

    fn reader(chunk: usize) -> RequestReader {
        RequestReader::new(Arc::new(Http1HeaderParser::new()), chunk)
    }

    fn read_all<I, C>(chunk: usize, chunks: I) -> (Result<(), ReadError>, Option<Request>)
    where
        I: IntoIterator<Item = C>,
        C: AsRef<[u8]>,
    {
        let mut io = Chunked::new(chunks);
        let mut slot = None;
        let res = reader(chunk)
            .large_chunk_size(4096)
            .read_request(&mut io, &mut slot);
        (res, slot)
    }

    #[test]
    fn test_scanner_single_chunk() {
        let mut s = DividerScanner::new();
        assert_eq!(s.feed(b"GET / HTTP/1.1"), None);
        assert_eq!(s.feed(b"\r\nHost: x\r\n\r\nbody"), Some(23));
        assert_eq!(s.feed(b"more"), Some(23));
    }

    #[test]
    fn test_scanner_byte_at_a_time() {
        let msg = b"ab\r\n\r\ncd";
        let mut s = DividerScanner::new();
        let mut hit = None;
        for b in msg {
            hit = s.feed(std::slice::from_ref(b)).or(hit);
        }
        assert_eq!(hit, Some(2));
        assert_eq!(s.found(), find_divider(msg));
    }

    #[test]
    fn test_scanner_every_split() {
        let msg = b"POST /x HTTP/1.1\r\nA: b\r\n\r\nxyz";
        let expected = find_divider(msg);
        for split in 0..=msg.len() {
            let mut s = DividerScanner::new();
            s.feed(&msg[..split]);
            s.feed(&msg[split..]);
            assert_eq!(s.found(), expected, "split at {split}");
        }
    }

    #[test]
    fn test_scanner_ignores_lone_crlf_pairs() {
        let mut s = DividerScanner::new();
        assert_eq!(s.feed(b"a\r\n"), None);
        assert_eq!(s.feed(b"b\r\n"), None);
        assert_eq!(s.feed(b"\r"), None);
        assert_eq!(s.feed(b"x\n"), None);
    }

    #[test]
    fn test_header_only_request() {
        let raw = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n";
        let (res, slot) = read_all(2048, [raw]);
        res.unwrap();
        let req = slot.unwrap();
        assert!(req.is_complete());
        assert_eq!(req.bytes(), raw);
        assert_eq!(req.content_length(), Some(0));
        assert_eq!(req.header_len(), raw.len());
    }

    #[test]
    fn test_body_in_second_write() {
        let head = b"POST /up HTTP/1.1\r\nContent-Length: 10\r\n\r\n";
        let mut io = Chunked::new([&head[..], b"0123456789"]);
        let mut slot = None;
        reader(2048).read_request(&mut io, &mut slot).unwrap();
        let req = slot.unwrap();
        assert_eq!(req.body(), b"0123456789");
        assert_eq!(req.content_length(), Some(10));
        assert_eq!(req.received(), head.len() + 10);
        assert_eq!(io.reads, 2);
    }

    #[test]
    fn test_preroll_completes_without_body_pass() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 4\r\n\r\nping";
        let mut io = Chunked::new([raw]);
        let mut slot = None;
        reader(2048).read_request(&mut io, &mut slot).unwrap();
        assert_eq!(slot.unwrap().body(), b"ping");
        assert_eq!(io.reads, 1);
    }

    #[test]
    fn test_partial_preroll() {
        let (res, slot) = read_all(
            2048,
            [&b"POST / HTTP/1.1\r\nContent-Length: 6\r\n\r\nab"[..], b"cd", b"ef"],
        );
        res.unwrap();
        assert_eq!(slot.unwrap().body(), b"abcdef");
    }

    #[test]
    fn test_complete_for_every_chunking() {
        let msg = b"POST /p HTTP/1.1\r\nContent-Length: 7\r\nX: y\r\n\r\nbodybod";
        for first in 1..msg.len() {
            for second in first..msg.len() {
                let chunks = [&msg[..first], &msg[first..second], &msg[second..]];
                let (res, slot) = read_all(3, chunks.iter().filter(|c| !c.is_empty()));
                res.unwrap_or_else(|e| panic!("split {first}/{second}: {e}"));
                let req = slot.unwrap();
                assert_eq!(req.bytes(), &msg[..], "split {first}/{second}");
                assert_eq!(req.body(), b"bodybod");
            }
        }
    }

    #[test]
    fn test_pipelined_bytes_dropped() {
        let (res, slot) = read_all(
            2048,
            [&b"POST / HTTP/1.1\r\nContent-Length: 2\r\n\r\nokGET / HTTP/1.1\r\n\r\n"[..]],
        );
        res.unwrap();
        let req = slot.unwrap();
        assert!(req.bytes().ends_with(b"\r\n\r\nok"));
        assert_eq!(req.body(), b"ok");
    }

    #[test]
    fn test_closed_before_divider() {
        let (res, slot) = read_all(2048, [&b"GET / HTTP/1.1\r\nHost"[..]]);
        assert!(matches!(
            res,
            Err(ReadError::ConnectionClosed { pass: Pass::Header, received: 20 })
        ));
        // request was created on first data and is released by the caller
        assert!(slot.is_some_and(|r| !r.is_complete()));
    }

    #[test]
    fn test_closed_before_first_byte() {
        let (res, slot) = read_all::<[&[u8]; 0], &[u8]>(2048, []);
        assert!(matches!(res, Err(ReadError::ConnectionClosed { received: 0, .. })));
        assert!(slot.is_none());
    }

    #[test]
    fn test_closed_mid_body() {
        let (res, _) = read_all(
            2048,
            [&b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\n"[..], b"0123"],
        );
        assert!(matches!(res, Err(ReadError::ConnectionClosed { pass: Pass::Body, .. })));
    }

    #[test]
    fn test_parse_failure_abandons() {
        let (res, _) = read_all(2048, [&b"POST / HTTP/1.1\r\nContent-Length: x\r\n\r\n"[..]]);
        assert!(matches!(
            res,
            Err(ReadError::HeaderParse(HeaderError::InvalidContentLength(_)))
        ));
    }

    #[test]
    fn test_interrupted_read_retried() {
        let (res, slot) = read_all(2048, [&b""[..], b"GET / HTTP/1.1\r\n\r\n"]);
        res.unwrap();
        assert!(slot.unwrap().is_complete());
    }

    #[test]
    fn test_reserved_length_is_ordinary() {
        let body = vec![b'z'; RESERVED_BODY_LENGTH];
        let head = format!("POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n", RESERVED_BODY_LENGTH);
        let (res, slot) = read_all(2048, [head.as_bytes(), &body[..]]);
        res.unwrap();
        assert_eq!(slot.unwrap().body(), &body[..]);
    }

    #[test]
    fn test_upsize_after_first_read() {
        let body = vec![b'b'; 5000];
        let head = b"POST / HTTP/1.1\r\nContent-Length: 5000\r\n\r\n";
        let mut io = Chunked::new([&head[..], &body[..]]);
        let mut slot = None;
        let reader = reader(16).large_chunk_size(8192);
        reader.read_request(&mut io, &mut slot).unwrap();
        // 16-byte first read, then 8 KiB reads
        assert!(io.reads <= 6, "reads = {}", io.reads);
        assert_eq!(slot.unwrap().body().len(), 5000);
    }

    #[test]
    fn test_oversized_content_length_abandons() {
        let head = format!("POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n", usize::MAX);
        let (res, _) = read_all(2048, [head.as_bytes()]);
        assert!(matches!(
            res,
            Err(ReadError::HeaderParse(HeaderError::InvalidContentLength(_)))
        ));

        // fits in usize but not in memory
        let head = format!("POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n", usize::MAX / 2);
        let (res, _) = read_all(2048, [head.as_bytes(), &b"abc"[..]]);
        assert!(matches!(res, Err(ReadError::Allocation(_))));
    }

    #[test]
    fn test_header_without_divider_is_bounded() {
        let line = vec![b'a'; 1000];
        let mut io = Chunked::new(std::iter::repeat(line).take(100));
        let mut slot = None;
        let res = reader(2048)
            .large_chunk_size(4096)
            .max_header_len(8192)
            .read_request(&mut io, &mut slot);
        assert!(matches!(res, Err(ReadError::HeaderTooLarge { limit: 8192 })));
        assert!(io.reads < 20, "reads = {}", io.reads);
    }
}
