//! The one active transcoding stream of a mount.
//!
//! [`StreamSlot`] holds at most one [`Pipeline`] at a time. Opening a new
//! stream tears the previous one down before the new pipeline is spawned, and
//! handles of superseded streams turn into harmless no-ops.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mpegfs_av::{read_bounded, BoundedRead, Pipeline, ReadStatus, Source, ToolRegistry};
use mpegfs_core::config::TranscodeConfig;
use mpegfs_core::{Error, Result};
use parking_lot::Mutex;
use tokio::process::ChildStdout;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// An open pipeline and the handle that refers to it.
struct ActiveStream {
    handle: u64,
    output: Arc<tokio::sync::Mutex<ChildStdout>>,
    cancel: CancellationToken,
    // Dropped last: terminates the processes.
    pipeline: Pipeline,
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        self.cancel.cancel();
        tracing::info!("Closing stream {}", self.handle);
    }
}

/// Owner of the mount's single active stream.
pub struct StreamSlot {
    active: Mutex<Option<ActiveStream>>,
    next_handle: AtomicU64,
}

impl Default for StreamSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSlot {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(None),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Replace the active stream with a fresh pipeline for `source`.
    ///
    /// The previous stream is terminated before the new one is spawned, even
    /// when spawning fails.
    pub fn open(
        &self,
        source: &Source,
        tools: &ToolRegistry,
        transcode: &TranscodeConfig,
        extractor_format: &str,
    ) -> Result<u64> {
        let previous = self.active.lock().take();
        drop(previous);

        let mut pipeline = Pipeline::spawn(source, tools, transcode, extractor_format)?;
        let output = pipeline
            .take_output()
            .ok_or_else(|| Error::tool("pipeline", "output already taken"))?;

        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let stream = ActiveStream {
            handle,
            output: Arc::new(tokio::sync::Mutex::new(output)),
            cancel: CancellationToken::new(),
            pipeline,
        };

        // A concurrent open may have slipped in; it loses.
        let raced = self.active.lock().replace(stream);
        drop(raced);

        tracing::info!("Opened stream {handle} for {source}");
        Ok(handle)
    }

    /// Read up to `length` bytes from the stream identified by `handle`.
    ///
    /// Returns empty data if `handle` is not the active stream, or if the
    /// stream is released or superseded while the read is in flight. The
    /// timeout covers waiting behind a concurrent read on the same stream.
    pub async fn read(&self, handle: u64, length: usize, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let (output, cancel) = {
            let active = self.active.lock();
            match active.as_ref() {
                Some(stream) if stream.handle == handle => {
                    (Arc::clone(&stream.output), stream.cancel.clone())
                }
                _ => {
                    tracing::debug!("Read on inactive stream {handle}");
                    return Ok(Vec::new());
                }
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("Read on stream {handle} cancelled");
                Ok(Vec::new())
            }
            read = async {
                let Ok(mut out) = tokio::time::timeout_at(deadline, output.lock()).await else {
                    tracing::debug!("Stream {handle} busy until the read deadline");
                    return Ok(BoundedRead {
                        data: Vec::new(),
                        status: ReadStatus::TimedOut,
                    });
                };
                let remaining = deadline.saturating_duration_since(Instant::now());
                read_bounded(&mut *out, length, remaining).await
            } => {
                let read = read?;
                match read.status {
                    ReadStatus::Complete => {}
                    status => tracing::debug!(
                        "Stream {handle} returned {} of {length} bytes ({status:?})",
                        read.data.len()
                    ),
                }
                Ok(read.data)
            }
        }
    }

    /// Terminate the stream if `handle` is still the active one.
    ///
    /// Returns whether anything was released.
    pub fn release(&self, handle: u64) -> bool {
        let released = {
            let mut active = self.active.lock();
            match active.as_ref() {
                Some(stream) if stream.handle == handle => active.take(),
                _ => None,
            }
        };
        if released.is_none() {
            tracing::debug!("Release of inactive stream {handle} ignored");
        }
        released.is_some()
    }

    /// Handle of the active stream, if any.
    pub fn active_handle(&self) -> Option<u64> {
        self.active.lock().as_ref().map(|s| s.handle)
    }

    /// Process ids owned by the active stream.
    pub fn active_pids(&self) -> Vec<u32> {
        self.active
            .lock()
            .as_ref()
            .map(|s| s.pipeline.pids())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpegfs_av::{FFMPEG, YTDLP};
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    /// Emits the input path, then blocks.
    const TAGGING_TRANSCODER: &str = "#!/bin/sh\n\
        while [ $# -gt 0 ]; do\n\
          if [ \"$1\" = \"-i\" ]; then src=\"$2\"; fi\n\
          shift\n\
        done\n\
        printf '%s|' \"$src\"\n\
        exec sleep 30\n";

    fn tools(dir: &Path) -> ToolRegistry {
        let path = dir.join("ffmpeg");
        std::fs::write(&path, TAGGING_TRANSCODER).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        ToolRegistry::default()
            .with_tool(FFMPEG, &path)
            .with_tool(YTDLP, "/nonexistent/yt-dlp")
    }

    fn media(dir: &Path, name: &str) -> Source {
        let path: PathBuf = dir.join(name);
        std::fs::write(&path, b"x").unwrap();
        Source::File(path)
    }

    #[tokio::test]
    async fn new_open_supersedes_previous() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tools(dir.path());
        let slot = StreamSlot::new();
        let cfg = TranscodeConfig::default();

        let first = slot.open(&media(dir.path(), "a.mkv"), &tools, &cfg, "w").unwrap();
        let second = slot.open(&media(dir.path(), "b.mkv"), &tools, &cfg, "w").unwrap();
        assert_ne!(first, second);
        assert_eq!(slot.active_handle(), Some(second));

        let stale = slot.read(first, 64, Duration::from_millis(200)).await.unwrap();
        assert!(stale.is_empty());

        let fresh = slot.read(second, 64, Duration::from_secs(2)).await.unwrap();
        let text = String::from_utf8(fresh).unwrap();
        assert!(text.ends_with("b.mkv|"), "unexpected output {text:?}");
    }

    #[tokio::test]
    async fn stale_release_keeps_active_stream() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tools(dir.path());
        let slot = StreamSlot::new();
        let cfg = TranscodeConfig::default();

        let first = slot.open(&media(dir.path(), "a.mkv"), &tools, &cfg, "w").unwrap();
        let second = slot.open(&media(dir.path(), "b.mkv"), &tools, &cfg, "w").unwrap();

        assert!(!slot.release(first));
        assert_eq!(slot.active_handle(), Some(second));
        assert!(slot.release(second));
        assert_eq!(slot.active_handle(), None);
        assert!(!slot.release(second));
    }

    #[tokio::test]
    async fn failed_open_still_closes_previous() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tools(dir.path());
        let slot = StreamSlot::new();
        let cfg = TranscodeConfig::default();

        slot.open(&media(dir.path(), "a.mkv"), &tools, &cfg, "w").unwrap();
        let err = slot
            .open(&Source::File(dir.path().join("missing.mkv")), &tools, &cfg, "w")
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert_eq!(slot.active_handle(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn release_cancels_in_flight_read() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tools(dir.path());
        let slot = Arc::new(StreamSlot::new());
        let cfg = TranscodeConfig::default();

        let handle = slot.open(&media(dir.path(), "a.mkv"), &tools, &cfg, "w").unwrap();
        // Drain the tag so the next read stalls.
        slot.read(handle, 1, Duration::from_secs(2)).await.unwrap();

        let reader = {
            let slot = Arc::clone(&slot);
            tokio::spawn(async move {
                let started = std::time::Instant::now();
                let data = slot.read(handle, 4096, Duration::from_secs(20)).await.unwrap();
                (data, started.elapsed())
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(slot.release(handle));

        let (_data, elapsed) = reader.await.unwrap();
        assert!(elapsed < Duration::from_secs(5), "read blocked for {elapsed:?}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_reads_share_one_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let tools = tools(dir.path());
        let slot = Arc::new(StreamSlot::new());
        let cfg = TranscodeConfig::default();

        let handle = slot.open(&media(dir.path(), "a.mkv"), &tools, &cfg, "w").unwrap();
        slot.read(handle, 1, Duration::from_secs(2)).await.unwrap();

        let readers: Vec<_> = (0..2)
            .map(|_| {
                let slot = Arc::clone(&slot);
                tokio::spawn(async move {
                    let started = std::time::Instant::now();
                    let data = slot.read(handle, 16, Duration::from_secs(1)).await.unwrap();
                    (data, started.elapsed())
                })
            })
            .collect();

        for reader in readers {
            let (_data, elapsed) = reader.await.unwrap();
            assert!(elapsed < Duration::from_millis(1800), "read blocked for {elapsed:?}");
        }
    }
}
