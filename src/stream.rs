//! Framed connection reader/writer.
//!
//! Control lines and raw file bytes share one byte stream. The reader keeps
//! an explicit mode: `Line` until a payload of known size is announced, then
//! `Raw` for exactly that many bytes, then back to `Line`. Bytes already
//! buffered past a line terminator stay in the buffer for the next read.

use crate::error::{Error, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Default upper bound for a single control line
pub const DEFAULT_MAX_LINE: usize = 1024;

/// What the reader expects next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// A `\r\n` terminated control line
    Line,
    /// Raw payload bytes still owed by the peer
    Raw { remaining: u64 },
}

/// A connection with line/raw framing on the read side.
pub struct FramedStream<S> {
    inner: BufReader<S>,
    mode: ReadMode,
    max_line: usize,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    #[cfg(test)]
    pub fn new(stream: S) -> Self {
        Self::with_max_line(stream, DEFAULT_MAX_LINE)
    }

    pub fn with_max_line(stream: S, max_line: usize) -> Self {
        Self {
            inner: BufReader::new(stream),
            mode: ReadMode::Line,
            max_line,
        }
    }

    #[cfg(test)]
    pub fn mode(&self) -> ReadMode {
        self.mode
    }

    /// Read one control line, without its terminator.
    ///
    /// Returns `Ok(None)` when the peer closed cleanly between lines.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        if let ReadMode::Raw { remaining } = self.mode {
            return Err(Error::Protocol(format!(
                "line read with {} payload bytes outstanding",
                remaining
            )));
        }

        let mut buf = Vec::with_capacity(64);
        // +2 leaves room for the terminator of a maximal line
        let limit = self.max_line as u64 + 2;
        let n = (&mut self.inner)
            .take(limit)
            .read_until(b'\n', &mut buf)
            .await
            .map_err(Error::from_socket)?;

        if n == 0 {
            return Ok(None);
        }

        if buf.last() != Some(&b'\n') {
            if n as u64 >= limit {
                return Err(Error::MalformedRequest(format!(
                    "line exceeds {} bytes",
                    self.max_line
                )));
            }
            // EOF in the middle of a line
            return Err(Error::ConnectionReset);
        }

        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }

        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }

    /// Like `read_line`, but a clean close is an error.
    pub async fn expect_line(&mut self) -> Result<String> {
        self.read_line().await?.ok_or(Error::ConnectionReset)
    }

    /// Drop the rest of an overlong line, up to and including its `\n`.
    ///
    /// Returns the number of bytes skipped.
    pub async fn discard_line(&mut self) -> Result<u64> {
        let mut skipped = 0u64;
        loop {
            let available = self.inner.fill_buf().await.map_err(Error::from_socket)?;
            if available.is_empty() {
                return Err(Error::ConnectionReset);
            }
            let (consumed, done) = match available.iter().position(|&b| b == b'\n') {
                Some(end) => (end + 1, true),
                None => (available.len(), false),
            };
            self.inner.consume(consumed);
            skipped += consumed as u64;
            if done {
                return Ok(skipped);
            }
        }
    }

    /// Consume the space that separates a request frame's header line from
    /// its body, if the next byte is one.
    ///
    /// Waits for at least one byte, so call it only when payload bytes are due.
    pub async fn skip_separator(&mut self) -> Result<()> {
        let next = self
            .inner
            .fill_buf()
            .await
            .map_err(Error::from_socket)?
            .first()
            .copied();
        match next {
            None => Err(Error::ConnectionReset),
            Some(b' ') => {
                self.inner.consume(1);
                Ok(())
            }
            Some(_) => Ok(()),
        }
    }

    /// Switch to raw mode for the next `len` bytes.
    pub fn expect_raw(&mut self, len: u64) {
        debug_assert_eq!(self.mode, ReadMode::Line, "payload announced mid-payload");
        self.mode = if len == 0 {
            ReadMode::Line
        } else {
            ReadMode::Raw { remaining: len }
        };
    }

    /// Read up to `buf.len()` payload bytes, never past the announced length.
    ///
    /// Returns 0 once the payload is complete; the reader is then back in
    /// line mode.
    pub async fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize> {
        let remaining = match self.mode {
            ReadMode::Line => return Ok(0),
            ReadMode::Raw { remaining } => remaining,
        };

        let want = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        if want == 0 {
            return Ok(0);
        }

        let n = self
            .inner
            .read(&mut buf[..want])
            .await
            .map_err(Error::from_socket)?;
        if n == 0 {
            return Err(Error::ConnectionReset);
        }

        let left = remaining - n as u64;
        self.mode = if left == 0 {
            ReadMode::Line
        } else {
            ReadMode::Raw { remaining: left }
        };
        Ok(n)
    }

    /// Write a control line, appending the terminator if missing.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        let stream = self.inner.get_mut();
        stream
            .write_all(line.as_bytes())
            .await
            .map_err(Error::from_socket)?;
        if !line.ends_with("\r\n") {
            stream.write_all(b"\r\n").await.map_err(Error::from_socket)?;
        }
        stream.flush().await.map_err(Error::from_socket)
    }

    /// Write bytes verbatim (pre-framed lines or payload chunks).
    pub async fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner
            .get_mut()
            .write_all(bytes)
            .await
            .map_err(Error::from_socket)
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.inner.get_mut().flush().await.map_err(Error::from_socket)
    }

    /// Shut down the write half.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner
            .get_mut()
            .shutdown()
            .await
            .map_err(Error::from_socket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_read_lines() {
        let mock = Builder::new()
            .read(b"GET a.txt HTTP/1.1\r\n\r\nCLOSE")
            .read(b"  HTTP/1.1\r\n")
            .build();
        let mut conn = FramedStream::new(mock);

        assert_eq!(conn.read_line().await.unwrap().unwrap(), "GET a.txt HTTP/1.1");
        assert_eq!(conn.read_line().await.unwrap().unwrap(), "");
        assert_eq!(conn.read_line().await.unwrap().unwrap(), "CLOSE  HTTP/1.1");
        assert!(conn.read_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_line_then_raw_then_line() {
        // Line, payload and next line arrive in a single segment
        let mock = Builder::new()
            .read(b"Content-Length: 5\r\nhelloHTTP/1.1 200 OK\r\n")
            .build();
        let mut conn = FramedStream::new(mock);

        let header = conn.expect_line().await.unwrap();
        assert_eq!(header, "Content-Length: 5");
        conn.expect_raw(5);

        let mut buf = [0u8; 1024];
        let n = conn.read_raw(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(conn.mode(), ReadMode::Line);
        assert_eq!(conn.read_raw(&mut buf).await.unwrap(), 0);

        assert_eq!(conn.expect_line().await.unwrap(), "HTTP/1.1 200 OK");
    }

    #[tokio::test]
    async fn test_raw_stops_at_announced_length() {
        let mock = Builder::new().read(b"abcdefgh").build();
        let mut conn = FramedStream::new(mock);
        conn.expect_raw(4);

        let mut buf = [0u8; 2];
        let mut got = Vec::new();
        loop {
            let n = conn.read_raw(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            got.extend_from_slice(&buf[..n]);
        }
        assert_eq!(got, b"abcd");
        assert_eq!(conn.mode(), ReadMode::Line);
    }

    #[tokio::test]
    async fn test_raw_eof_is_reset() {
        let mock = Builder::new().read(b"abc").build();
        let mut conn = FramedStream::new(mock);
        conn.expect_raw(10);

        let mut buf = [0u8; 16];
        assert_eq!(conn.read_raw(&mut buf).await.unwrap(), 3);
        assert!(matches!(conn.read_raw(&mut buf).await, Err(Error::ConnectionReset)));
    }

    #[tokio::test]
    async fn test_line_read_during_payload_rejected() {
        let mock = Builder::new().build();
        let mut conn = FramedStream::new(mock);
        conn.expect_raw(3);
        assert!(matches!(conn.read_line().await, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_line_too_long() {
        let mock = Builder::new().read(b"GET aaaaaaaaaaaaaaaa HTTP/1.1\r\n").build();
        let mut conn = FramedStream::with_max_line(mock, 8);
        assert!(matches!(conn.read_line().await, Err(Error::MalformedRequest(_))));
    }

    #[tokio::test]
    async fn test_discard_rest_of_overlong_line() {
        let mock = Builder::new()
            .read(b"GET aaaaaaaaaaaa")
            .read(b"aaaaaaaa HTTP/1.1\r\n \r\nCLOSE  HTTP/1.1\r\n")
            .build();
        let mut conn = FramedStream::with_max_line(mock, 8);
        assert!(matches!(conn.read_line().await, Err(Error::MalformedRequest(_))));

        // 10 bytes went to the capped read, the rest of the line goes here
        assert_eq!(conn.discard_line().await.unwrap(), 25);
        assert_eq!(conn.read_line().await.unwrap().unwrap(), " ");
        assert_eq!(conn.read_line().await.unwrap().unwrap(), "CLOSE  HTTP/1.1");
    }

    #[tokio::test]
    async fn test_discard_line_until_eof_is_reset() {
        let mock = Builder::new().read(b"no terminator").build();
        let mut conn = FramedStream::new(mock);
        assert!(matches!(conn.discard_line().await, Err(Error::ConnectionReset)));
    }

    #[tokio::test]
    async fn test_skip_separator_only_consumes_space() {
        let mock = Builder::new().read(b" data").build();
        let mut conn = FramedStream::new(mock);
        conn.skip_separator().await.unwrap();
        // Not a separator; left for the payload
        conn.skip_separator().await.unwrap();

        conn.expect_raw(4);
        let mut buf = [0u8; 8];
        let n = conn.read_raw(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"data");
    }

    #[tokio::test]
    async fn test_truncated_line_is_reset() {
        let mock = Builder::new().read(b"GET a.t").build();
        let mut conn = FramedStream::new(mock);
        assert!(matches!(conn.read_line().await, Err(Error::ConnectionReset)));
    }

    #[tokio::test]
    async fn test_write_line_appends_terminator() {
        let mock = Builder::new()
            .write(b"Connected to Server..")
            .write(b"\r\n")
            .write(b"HTTP/1.1 200 OK\r\n")
            .build();
        let mut conn = FramedStream::new(mock);
        conn.write_line("Connected to Server..").await.unwrap();
        conn.write_line("HTTP/1.1 200 OK\r\n").await.unwrap();
    }
}
