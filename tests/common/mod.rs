//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which owns a temporary directory holding a media
//! tree and stand-in `ffmpeg` / `yt-dlp` scripts, so pipelines run without
//! real media tools. [`FakeSearch`] answers searches from memory.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use mpegfs_av::{SearchProvider, SearchResult, ToolRegistry, FFMPEG, YTDLP};
use mpegfs_core::config::Config;
use mpegfs_core::{Error, Result};

/// Records its arguments and pid next to itself, then copies its `-i` input
/// (a file, or stdin for `pipe:0`) to stdout.
const FAKE_FFMPEG: &str = r#"#!/bin/sh
here="$(dirname "$0")"
echo "$@" >> "$here/ffmpeg.args"
echo $$ >> "$here/ffmpeg.pids"
while [ $# -gt 0 ]; do
  if [ "$1" = "-i" ]; then src="$2"; fi
  shift
done
if [ "$src" = "pipe:0" ]; then exec cat; else exec cat "$src"; fi
"#;

/// Records its arguments and emits `media:<url>` for the URL (last argument).
const FAKE_YTDLP: &str = r#"#!/bin/sh
here="$(dirname "$0")"
echo "$@" >> "$here/yt-dlp.args"
for a; do url="$a"; done
printf 'media:%s' "$url"
"#;

/// Temporary media directory plus fake tools.
pub struct TestHarness {
    pub dir: tempfile::TempDir,
    pub media: PathBuf,
    pub bin: PathBuf,
    pub tools: ToolRegistry,
    pub config: Config,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_ffmpeg(FAKE_FFMPEG)
    }

    /// Harness whose `ffmpeg` runs `script` instead of the copying stand-in.
    pub fn with_ffmpeg(script: &str) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let media = dir.path().join("media");
        let bin = dir.path().join("bin");
        std::fs::create_dir_all(&media).unwrap();
        std::fs::create_dir_all(&bin).unwrap();

        let ffmpeg = write_script(&bin, "ffmpeg", script);
        let ytdlp = write_script(&bin, "yt-dlp", FAKE_YTDLP);
        let tools = ToolRegistry::default()
            .with_tool(FFMPEG, ffmpeg)
            .with_tool(YTDLP, ytdlp);

        Self {
            dir,
            media,
            bin,
            tools,
            config: Config::default(),
        }
    }

    /// Create `name` under the media directory with `contents`.
    pub fn media_file(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.media.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, contents).unwrap();
        path
    }

    /// Argument lines recorded by the fake `tool` so far.
    pub fn invocations(&self, tool: &str) -> Vec<String> {
        std::fs::read_to_string(self.bin.join(format!("{tool}.args")))
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Whether a process is still running (zombies count as gone).
pub fn process_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => !stat
            .rsplit(')')
            .next()
            .map(|rest| rest.trim_start().starts_with('Z'))
            .unwrap_or(false),
        Err(_) => false,
    }
}

/// Wait up to ~5s for all `pids` to exit.
pub async fn wait_for_exit(pids: &[u32]) -> bool {
    for _ in 0..100 {
        if pids.iter().all(|&pid| !process_alive(pid)) {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    false
}

/// In-memory [`SearchProvider`] returning `limit` results per query and
/// recording every query it was asked.
#[derive(Default)]
pub struct FakeSearch {
    pub queries: Mutex<Vec<String>>,
    pub fail: bool,
}

impl FakeSearch {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl SearchProvider for FakeSearch {
    async fn search(&self, phrase: &str, limit: usize) -> Result<Vec<SearchResult>> {
        self.queries.lock().push(phrase.to_string());
        if self.fail {
            return Err(Error::tool(YTDLP, "search unavailable"));
        }
        Ok((0..limit)
            .map(|i| SearchResult {
                title: format!("{phrase} #{i}"),
                url: format!("https://www.youtube.com/watch?v={}-{i}", phrase.replace(' ', "_")),
                id: format!("{i}"),
            })
            .collect())
    }
}
