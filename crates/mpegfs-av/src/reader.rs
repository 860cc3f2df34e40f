//! Timeout-bounded accumulating reads.
//!
//! A pipe fed by a transcoder may stall (slow network, slow encode) or die.
//! [`read_bounded`] never blocks past its budget: it gathers what the stream
//! yields until the requested length is reached, the stream ends, or the
//! deadline passes, and returns whatever it collected.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;

/// Why a bounded read stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// The requested length was collected.
    Complete,
    /// The producer closed the stream (or failed after yielding data).
    EndOfStream,
    /// The time budget ran out; the data is whatever arrived before that.
    TimedOut,
}

/// Result of [`read_bounded`].
#[derive(Debug, Clone)]
pub struct BoundedRead {
    /// Between zero and the requested number of bytes.
    pub data: Vec<u8>,
    pub status: ReadStatus,
}

/// Read up to `length` bytes from `reader`, spending at most `timeout`.
///
/// Each underlying read waits for readiness only as long as the remaining
/// budget allows, so a stalled producer costs exactly `timeout`. A short
/// result is a normal outcome, not an error.
///
/// # Errors
///
/// An I/O error is returned only when it happens before any byte was
/// collected; after that the partial data is returned with
/// [`ReadStatus::EndOfStream`].
pub async fn read_bounded<R>(reader: &mut R, length: usize, timeout: Duration) -> io::Result<BoundedRead>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let deadline = Instant::now() + timeout;
    let mut data = vec![0u8; length];
    let mut filled = 0;

    let status = loop {
        if filled == length {
            break ReadStatus::Complete;
        }

        match tokio::time::timeout_at(deadline, reader.read(&mut data[filled..])).await {
            Err(_elapsed) => break ReadStatus::TimedOut,
            Ok(Ok(0)) => break ReadStatus::EndOfStream,
            Ok(Ok(n)) => filled += n,
            Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
            Ok(Err(e)) if filled > 0 => {
                tracing::debug!("Stream failed after {filled} bytes: {e}");
                break ReadStatus::EndOfStream;
            }
            Ok(Err(e)) => return Err(e),
        }
    };

    data.truncate(filled);
    Ok(BoundedRead { data, status })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncWriteExt, ReadBuf};

    #[tokio::test]
    async fn complete_when_enough_data() {
        let (mut tx, mut rx) = tokio::io::duplex(64);
        tx.write_all(b"0123456789").await.unwrap();

        let out = read_bounded(&mut rx, 4, Duration::from_secs(5)).await.unwrap();
        assert_eq!(out.data, b"0123");
        assert_eq!(out.status, ReadStatus::Complete);
    }

    #[tokio::test]
    async fn end_of_stream_returns_remaining() {
        let (mut tx, mut rx) = tokio::io::duplex(64);
        tx.write_all(b"tail").await.unwrap();
        drop(tx);

        let out = read_bounded(&mut rx, 100, Duration::from_secs(5)).await.unwrap();
        assert_eq!(out.data, b"tail");
        assert_eq!(out.status, ReadStatus::EndOfStream);

        let again = read_bounded(&mut rx, 100, Duration::from_secs(5)).await.unwrap();
        assert!(again.data.is_empty());
        assert_eq!(again.status, ReadStatus::EndOfStream);
    }

    #[tokio::test]
    async fn stalled_producer_times_out_with_partial_data() {
        let (mut tx, mut rx) = tokio::io::duplex(64);
        tx.write_all(b"abc").await.unwrap();

        let started = std::time::Instant::now();
        let out = read_bounded(&mut rx, 10, Duration::from_millis(150)).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(out.data, b"abc");
        assert_eq!(out.status, ReadStatus::TimedOut);
        assert!(elapsed >= Duration::from_millis(150));
        assert!(elapsed < Duration::from_secs(2), "read blocked for {elapsed:?}");
        drop(tx);
    }

    #[tokio::test]
    async fn silent_producer_yields_empty_read() {
        let (_tx, mut rx) = tokio::io::duplex(64);
        let out = read_bounded(&mut rx, 4096, Duration::from_millis(50)).await.unwrap();
        assert!(out.data.is_empty());
        assert_eq!(out.status, ReadStatus::TimedOut);
    }

    #[tokio::test]
    async fn accumulates_across_trickled_writes() {
        let (mut tx, mut rx) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            for chunk in [&b"ab"[..], b"cd", b"ef"] {
                tx.write_all(chunk).await.unwrap();
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            tx
        });

        let out = read_bounded(&mut rx, 6, Duration::from_secs(5)).await.unwrap();
        assert_eq!(out.data, b"abcdef");
        assert_eq!(out.status, ReadStatus::Complete);
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn successive_reads_concatenate_without_gaps() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let (mut tx, mut rx) = tokio::io::duplex(1024);
        let expected = payload.clone();
        let writer = tokio::spawn(async move {
            tx.write_all(&payload).await.unwrap();
        });

        let mut collected = Vec::new();
        loop {
            let out = read_bounded(&mut rx, 777, Duration::from_secs(5)).await.unwrap();
            assert!(out.data.len() <= 777);
            collected.extend_from_slice(&out.data);
            if out.status == ReadStatus::EndOfStream {
                break;
            }
        }
        writer.await.unwrap();
        assert_eq!(collected, expected);
    }

    #[tokio::test]
    async fn zero_length_is_immediately_complete() {
        let (_tx, mut rx) = tokio::io::duplex(8);
        let out = read_bounded(&mut rx, 0, Duration::from_secs(5)).await.unwrap();
        assert!(out.data.is_empty());
        assert_eq!(out.status, ReadStatus::Complete);
    }

    /// Yields a few bytes, then fails.
    struct Flaky {
        sent: bool,
    }

    impl AsyncRead for Flaky {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.sent {
                return Poll::Ready(Err(io::Error::from(io::ErrorKind::BrokenPipe)));
            }
            self.sent = true;
            buf.put_slice(b"xy");
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn error_after_data_returns_partial() {
        let mut flaky = Flaky { sent: false };
        let out = read_bounded(&mut flaky, 10, Duration::from_secs(1)).await.unwrap();
        assert_eq!(out.data, b"xy");
        assert_eq!(out.status, ReadStatus::EndOfStream);

        let err = read_bounded(&mut flaky, 10, Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
