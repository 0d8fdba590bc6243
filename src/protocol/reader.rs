//! Buffered inbound reader for a single connection.
//!
//! Wraps the read half of a socket and yields the two framing primitives
//! the protocol is built from: exact-length fields and NUL-terminated
//! fields. Bytes are pulled from the socket in chunks and buffered; each
//! underlying read is bounded by the idle timeout, so a silent connection
//! surfaces as [`ReadError::TimedOut`] no matter which primitive the
//! session is blocked in.
//!
//! The reader is owned by exactly one session task (single consumer).

use std::time::Duration;

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Initial capacity of the inbound buffer.
const READ_BUF_CAPACITY: usize = 4 * 1024;

/// Why a read primitive failed.
///
/// All variants are session-terminal; the session maps them to a
/// disconnect reason.
#[derive(Debug, Error)]
pub enum ReadError {
    /// The peer closed the connection (EOF).
    #[error("connection closed")]
    Disconnected,
    /// No bytes arrived within the idle timeout.
    #[error("idle timeout expired")]
    TimedOut,
    /// The underlying socket read failed.
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Buffered frame reader over the read half of a connection.
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
    idle_timeout: Duration,
}

impl<R> std::fmt::Debug for FrameReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameReader")
            .field("buffered", &self.buf.len())
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Create a reader with the given idle timeout.
    pub fn new(inner: R, idle_timeout: Duration) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_BUF_CAPACITY),
            idle_timeout,
        }
    }

    /// Pull at least one more byte from the socket into the buffer.
    async fn fill(&mut self) -> Result<(), ReadError> {
        let n = tokio::time::timeout(self.idle_timeout, self.inner.read_buf(&mut self.buf))
            .await
            .map_err(|_| ReadError::TimedOut)??;
        if n == 0 {
            return Err(ReadError::Disconnected);
        }
        Ok(())
    }

    /// Read a single byte.
    pub async fn read_u8(&mut self) -> Result<u8, ReadError> {
        while self.buf.is_empty() {
            self.fill().await?;
        }
        Ok(self.buf.get_u8())
    }

    /// Read exactly `n` bytes.
    pub async fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, ReadError> {
        while self.buf.len() < n {
            self.fill().await?;
        }
        Ok(self.buf.split_to(n).to_vec())
    }

    /// Read bytes up to (not including) the next `0x00`; the NUL itself is
    /// consumed.
    ///
    /// Semantic length limits are the caller's job.
    pub async fn read_until_nul(&mut self) -> Result<Vec<u8>, ReadError> {
        let mut scanned = 0;
        loop {
            if let Some(pos) = self.buf[scanned..].iter().position(|&b| b == 0) {
                let bytes = self.buf.split_to(scanned + pos).to_vec();
                self.buf.advance(1);
                return Ok(bytes);
            }
            scanned = self.buf.len();
            self.fill().await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    const TEST_TIMEOUT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn test_read_exact_across_partial_writes() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(rx, TEST_TIMEOUT);

        let writer = tokio::spawn(async move {
            tx.write_all(b"ab").await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            tx.write_all(b"cd").await.unwrap();
        });

        let bytes = reader.read_exact(4).await.unwrap();
        assert_eq!(bytes, b"abcd");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_read_until_nul_consumes_terminator() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(rx, TEST_TIMEOUT);

        tx.write_all(b"alice\0bob\0").await.unwrap();

        assert_eq!(reader.read_until_nul().await.unwrap(), b"alice");
        assert_eq!(reader.read_until_nul().await.unwrap(), b"bob");
    }

    #[tokio::test]
    async fn test_read_until_nul_empty_field() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(rx, TEST_TIMEOUT);

        tx.write_all(b"\0x").await.unwrap();

        assert_eq!(reader.read_until_nul().await.unwrap(), b"");
        assert_eq!(reader.read_u8().await.unwrap(), b'x');
    }

    #[tokio::test]
    async fn test_eof_is_disconnected() {
        let (tx, rx) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(rx, TEST_TIMEOUT);
        drop(tx);

        assert!(matches!(
            reader.read_u8().await,
            Err(ReadError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_eof_mid_field_is_disconnected() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(rx, TEST_TIMEOUT);

        tx.write_all(b"no-terminator").await.unwrap();
        drop(tx);

        assert!(matches!(
            reader.read_until_nul().await,
            Err(ReadError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_silent_connection_times_out() {
        let (_tx, rx) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(rx, Duration::from_millis(50));

        assert!(matches!(reader.read_u8().await, Err(ReadError::TimedOut)));
    }

    #[tokio::test]
    async fn test_buffered_bytes_served_without_socket_reads() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(rx, TEST_TIMEOUT);

        tx.write_all(&[35, 34, 5, 5]).await.unwrap();

        assert_eq!(reader.read_u8().await.unwrap(), 35);
        assert_eq!(reader.read_u8().await.unwrap(), 34);
        assert_eq!(reader.read_exact(2).await.unwrap(), [5, 5]);
    }
}
