//! Framed I/O for IMAP protocol.
//!
//! IMAP uses CRLF-terminated lines with embedded `{n}` literals. Reads go
//! into a persistent buffer, so a `read_response` future can be dropped
//! (for example when an IDLE wait loses a `select!` race) without losing
//! or tearing a response.

#![allow(clippy::missing_errors_doc)]

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Error, Result};

/// Default buffer size for reading.
const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Maximum line length to prevent memory exhaustion.
const MAX_LINE_LENGTH: usize = 1024 * 1024; // 1 MB

/// Maximum literal size to prevent memory exhaustion.
const MAX_LITERAL_SIZE: usize = 100 * 1024 * 1024; // 100 MB

/// Framed connection for IMAP protocol.
pub struct FramedStream<S> {
    stream: S,
    read_buf: BytesMut,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new framed stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(DEFAULT_BUFFER_SIZE),
        }
    }

    /// Reads one complete response, literals included.
    ///
    /// Cancel-safe: partial data stays buffered for the next call.
    pub async fn read_response(&mut self) -> Result<Vec<u8>> {
        loop {
            if let Some(len) = find_complete(&self.read_buf)? {
                return Ok(self.read_buf.split_to(len).to_vec());
            }
            if self.read_buf.capacity() - self.read_buf.len() < DEFAULT_BUFFER_SIZE / 2 {
                self.read_buf.reserve(DEFAULT_BUFFER_SIZE);
            }
            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(Error::ConnectionLost(
                    "connection closed by server".to_string(),
                ));
            }
        }
    }

    /// Writes bytes and flushes.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Returns true if response bytes are buffered but not yet consumed.
    #[must_use]
    pub fn has_buffered(&self) -> bool {
        !self.read_buf.is_empty()
    }

    /// Consumes the framed stream and returns the inner stream.
    ///
    /// Fails if the server sent data past the last response; after
    /// STARTTLS such bytes would be plaintext injected ahead of the
    /// handshake.
    pub fn into_inner(self) -> Result<S> {
        if self.read_buf.is_empty() {
            Ok(self.stream)
        } else {
            Err(Error::Protocol(
                "unexpected data buffered before TLS negotiation".to_string(),
            ))
        }
    }
}

/// Returns the length of the first complete response in `buf`, or `None`
/// if more data is needed.
fn find_complete(buf: &[u8]) -> Result<Option<usize>> {
    let mut pos = 0;
    loop {
        let Some(crlf) = find_crlf(&buf[pos..]) else {
            if buf.len() - pos > MAX_LINE_LENGTH {
                return Err(Error::Protocol("line too long".to_string()));
            }
            return Ok(None);
        };
        if crlf > MAX_LINE_LENGTH {
            return Err(Error::Protocol("line too long".to_string()));
        }

        let line_end = pos + crlf + 2;
        match parse_literal_length(&buf[pos..pos + crlf]) {
            Some(len) => {
                if len > MAX_LITERAL_SIZE {
                    return Err(Error::Protocol(format!(
                        "literal too large: {len} bytes (max {MAX_LITERAL_SIZE})"
                    )));
                }
                let next = line_end + len;
                if buf.len() < next {
                    return Ok(None);
                }
                pos = next;
            }
            None => return Ok(Some(line_end)),
        }
    }
}

/// Finds the position of CRLF in a buffer.
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Parses a literal length from the end of a line (CRLF stripped).
///
/// Matches `{123}` and `{123+}`.
fn parse_literal_length(line: &[u8]) -> Option<usize> {
    let inner = line.strip_suffix(b"}")?;
    let inner = inner.strip_suffix(b"+").unwrap_or(inner);
    let open = inner.iter().rposition(|&b| b == b'{')?;
    let digits = &inner[open + 1..];
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    mod framing_tests {
        use super::*;

        #[test]
        fn literal_length() {
            assert_eq!(parse_literal_length(b"BODY {123}"), Some(123));
            assert_eq!(parse_literal_length(b"BODY {123+}"), Some(123));
            assert_eq!(parse_literal_length(b"BINARY[] ~{7}"), Some(7));
            assert_eq!(parse_literal_length(b"{0}"), Some(0));
            assert_eq!(parse_literal_length(b"no literal"), None);
            assert_eq!(parse_literal_length(b"wrong {abc}"), None);
            assert_eq!(parse_literal_length(b"empty {}"), None);
        }

        #[test]
        fn complete_detection() {
            assert_eq!(find_complete(b"* OK\r\n").unwrap(), Some(6));
            assert_eq!(find_complete(b"* OK").unwrap(), None);
            assert_eq!(find_complete(b"* 1 FETCH (BODY {3}\r\nab").unwrap(), None);
            assert_eq!(find_complete(b"* 1 FETCH (BODY {3}\r\nabc)\r\nA1").unwrap(), Some(27));
        }

        #[test]
        fn oversized_literal_rejected_before_reading() {
            let header = format!("* 1 FETCH (BODY {{{}}}\r\n", MAX_LITERAL_SIZE + 1);
            let err = find_complete(header.as_bytes()).unwrap_err();
            assert!(err.to_string().contains("literal too large"));
        }
    }

    mod stream_tests {
        use super::*;

        #[tokio::test]
        async fn simple_line() {
            let mock = Builder::new().read(b"* OK ready\r\n").build();
            let mut framed = FramedStream::new(mock);
            assert_eq!(framed.read_response().await.unwrap(), b"* OK ready\r\n");
        }

        #[tokio::test]
        async fn literal_across_reads() {
            let mock = Builder::new()
                .read(b"* 1 FETCH (BODY {5}\r\nhel")
                .read(b"lo)\r\n* 2 EXISTS\r\n")
                .build();
            let mut framed = FramedStream::new(mock);

            assert_eq!(
                framed.read_response().await.unwrap(),
                b"* 1 FETCH (BODY {5}\r\nhello)\r\n"
            );
            assert!(framed.has_buffered());
            assert_eq!(framed.read_response().await.unwrap(), b"* 2 EXISTS\r\n");
        }

        #[tokio::test]
        async fn eof_is_connection_lost() {
            let mock = Builder::new().read(b"* OK partial").build();
            let mut framed = FramedStream::new(mock);
            let err = framed.read_response().await.unwrap_err();
            assert!(err.is_connection_lost());
        }

        #[tokio::test]
        async fn line_length_limit() {
            let long_line = "A".repeat(MAX_LINE_LENGTH + 100);
            let mock = Builder::new().read(long_line.as_bytes()).build();
            let mut framed = FramedStream::new(mock);
            let err = framed.read_response().await.unwrap_err();
            assert!(err.to_string().contains("line too long"));
        }

        #[tokio::test]
        async fn write_command() {
            let mock = Builder::new().write(b"A001 NOOP\r\n").build();
            let mut framed = FramedStream::new(mock);
            framed.write_all(b"A001 NOOP\r\n").await.unwrap();
        }

        #[tokio::test]
        async fn dropped_read_keeps_partial_data() {
            let (client, mut server) = tokio::io::duplex(64);
            let mut framed = FramedStream::new(client);

            server.write_all(b"* 3 EXI").await.unwrap();
            let timed_out = tokio::time::timeout(
                std::time::Duration::from_millis(20),
                framed.read_response(),
            )
            .await;
            assert!(timed_out.is_err());

            server.write_all(b"STS\r\n").await.unwrap();
            assert_eq!(framed.read_response().await.unwrap(), b"* 3 EXISTS\r\n");
        }
    }
}
