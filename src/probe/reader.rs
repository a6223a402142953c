//! Stall-tracking byte source wrapper.
//!
//! Wraps any `AsyncRead` and measures every logical read attempt: an attempt
//! spans from the first poll to the poll that resolves, so time spent
//! `Pending` on a slow transport counts toward the attempt's elapsed
//! duration. The wrapper never synthesises errors; short reads, EOF and I/O
//! failures pass through unchanged.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, ReadBuf};

/// Counters accumulated by a [`StallReader`]. Observed by the sampler only
/// after the sampling loop has finished with the reader, so plain fields are
/// enough; there is no concurrent access to race with.
#[derive(Debug, Clone, Default)]
pub struct ReadStats {
    pub bytes_read: u64,
    /// Start instant of the first read attempt that returned data; used for
    /// TTFB relative to the externally held request-start timestamp.
    pub first_read_at: Option<Instant>,
    pub stall_count: u64,
    pub max_stall: Duration,
    pub total_stall: Duration,
}

pub struct StallReader<R> {
    inner: R,
    threshold: Duration,
    /// Start of the in-flight read attempt, carried across Pending polls.
    attempt_start: Option<Instant>,
    stats: ReadStats,
}

impl<R> StallReader<R> {
    pub fn new(inner: R, threshold: Duration) -> Self {
        Self {
            inner,
            threshold,
            attempt_start: None,
            stats: ReadStats::default(),
        }
    }

    pub fn stats(&self) -> &ReadStats {
        &self.stats
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for StallReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let start = *this.attempt_start.get_or_insert_with(Instant::now);
        let filled_before = buf.filled().len();

        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(result) => {
                let elapsed = start.elapsed();
                this.attempt_start = None;

                let n = buf.filled().len() - filled_before;
                if n > 0 {
                    if this.stats.first_read_at.is_none() {
                        this.stats.first_read_at = Some(start);
                    }
                    this.stats.bytes_read += n as u64;
                }

                // The full elapsed time counts, including reads that returned
                // nothing: head-of-line blocking shows up either way.
                if elapsed > this.threshold {
                    this.stats.stall_count += 1;
                    if elapsed > this.stats.max_stall {
                        this.stats.max_stall = elapsed;
                    }
                    this.stats.total_stall += elapsed;
                }

                Poll::Ready(result)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn counts_bytes_and_stamps_first_read_once() {
        let data = vec![0x5a; 4096];
        let mut reader = StallReader::new(&data[..], Duration::from_millis(200));

        let mut buf = [0u8; 1024];
        let before = Instant::now();
        let n = reader.read(&mut buf).await.unwrap();
        assert!(n > 0);

        let first = reader.stats().first_read_at.expect("first read stamped");
        assert!(first >= before);

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();

        let stats = reader.stats();
        assert_eq!(stats.bytes_read, 4096);
        assert_eq!(stats.first_read_at, Some(first));
    }

    #[tokio::test]
    async fn fast_reads_record_no_stalls() {
        let data = vec![1u8; 64 * 1024];
        let mut reader = StallReader::new(&data[..], Duration::from_millis(200));

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();

        let stats = reader.stats();
        assert_eq!(stats.stall_count, 0);
        assert_eq!(stats.max_stall, Duration::ZERO);
        assert_eq!(stats.total_stall, Duration::ZERO);
    }

    #[tokio::test]
    async fn slow_reads_count_as_stalls() {
        let (mut tx, rx) = tokio::io::duplex(1024);
        let mut reader = StallReader::new(rx, Duration::from_millis(20));

        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            tx.write_all(b"fast chunk").await.unwrap();
            tokio::time::sleep(Duration::from_millis(60)).await;
            tx.write_all(b"slow chunk").await.unwrap();
            // tx dropped here => EOF
        });

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        writer.await.unwrap();

        let stats = reader.stats();
        assert_eq!(stats.bytes_read, 20);
        assert!(stats.stall_count >= 1, "the delayed chunk must register");
        assert!(stats.max_stall >= Duration::from_millis(50));
        assert!(stats.total_stall >= stats.max_stall);
    }

    #[tokio::test]
    async fn eof_passes_through_without_counters() {
        let mut reader = StallReader::new(&[][..], Duration::from_millis(200));
        let mut buf = [0u8; 16];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
        assert_eq!(reader.stats().bytes_read, 0);
        assert!(reader.stats().first_read_at.is_none());
    }
}
