//! Chained transcoding processes behind one forward-only stream.
//!
//! A [`Pipeline`] owns either a single transcoder reading a local file, or an
//! extractor whose stdout is wired straight into the transcoder's stdin. The
//! transcoder's stdout is the only output. Dropping a pipeline terminates
//! every process it owns.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use mpegfs_core::config::TranscodeConfig;
use mpegfs_core::{Error, Result};
use tokio::process::{Child, ChildStdout};

use crate::command::ToolCommand;
use crate::tools::{ToolRegistry, FFMPEG, YTDLP};
use crate::transcode::{self, STDIN_INPUT};

/// Where the media comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// A file on the local filesystem.
    File(PathBuf),
    /// A page URL the extractor knows how to fetch.
    Url(String),
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::File(path) => write!(f, "{}", path.display()),
            Source::Url(url) => f.write_str(url),
        }
    }
}

/// One or two running processes producing a transcoded byte stream.
#[derive(Debug)]
pub struct Pipeline {
    transcoder: Child,
    extractor: Option<Child>,
    output: Option<ChildStdout>,
    terminated: bool,
}

impl Pipeline {
    /// Spawn the processes for `source`.
    ///
    /// Must be called from within a tokio runtime. `extractor_format` is the
    /// quality selector passed to the extractor and is ignored for files.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the file does not exist or the URL is not an
    ///   http(s) URL.
    /// - [`Error::Tool`] if a required tool is missing or fails to spawn.
    pub fn spawn(
        source: &Source,
        tools: &ToolRegistry,
        settings: &TranscodeConfig,
        extractor_format: &str,
    ) -> Result<Self> {
        let mut pipeline = match source {
            Source::File(path) => {
                if !path.exists() {
                    return Err(Error::not_found("source", path.display()));
                }
                let ffmpeg = tools.require(FFMPEG)?;
                let cmd = transcode::transcoder(ffmpeg, path.as_os_str(), settings);
                let transcoder = spawn_child(&cmd, Stdio::null())?;
                Self {
                    transcoder,
                    extractor: None,
                    output: None,
                    terminated: false,
                }
            }
            Source::Url(url) => {
                if !(url.starts_with("https://") || url.starts_with("http://")) {
                    return Err(Error::not_found("source", url));
                }
                let ytdlp = tools.require(YTDLP)?;
                let ffmpeg = tools.require(FFMPEG)?;

                let mut extractor = spawn_child(
                    &transcode::extractor(ytdlp, url, extractor_format),
                    Stdio::null(),
                )?;
                let media = match extractor
                    .stdout
                    .take()
                    .map(|out| -> std::io::Result<Stdio> { out.try_into() })
                {
                    Some(Ok(stdio)) => stdio,
                    Some(Err(e)) => {
                        signal(&extractor);
                        return Err(Error::Io { source: e });
                    }
                    None => {
                        signal(&extractor);
                        return Err(Error::tool(YTDLP, "stdout was not captured"));
                    }
                };

                // `spawn_child` drops its Command before returning, which closes
                // our copy of the pipe: only the two children hold it, so a dead
                // transcoder shows up as a write error in the extractor.
                let cmd = transcode::transcoder(ffmpeg, STDIN_INPUT, settings);
                let transcoder = match spawn_child(&cmd, media) {
                    Ok(child) => child,
                    Err(e) => {
                        signal(&extractor);
                        return Err(e);
                    }
                };
                Self {
                    transcoder,
                    extractor: Some(extractor),
                    output: None,
                    terminated: false,
                }
            }
        };

        pipeline.output = pipeline.transcoder.stdout.take();
        if pipeline.output.is_none() {
            return Err(Error::tool(FFMPEG, "stdout was not captured"));
        }

        tracing::info!(
            "Spawned pipeline for {source} (pids {:?})",
            pipeline.pids()
        );
        Ok(pipeline)
    }

    /// Take the transcoder's stdout. Returns `None` after the first call.
    pub fn take_output(&mut self) -> Option<ChildStdout> {
        self.output.take()
    }

    /// Process ids of the live children, transcoder first.
    pub fn pids(&self) -> Vec<u32> {
        std::iter::once(&self.transcoder)
            .chain(self.extractor.as_ref())
            .filter_map(Child::id)
            .collect()
    }

    /// Signal every owned process to stop. Does not wait for exit; the
    /// runtime reaps the children once they are dropped. Idempotent.
    pub fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;

        if let Some(extractor) = &self.extractor {
            signal(extractor);
        }
        signal(&self.transcoder);
        tracing::debug!("Terminated pipeline");
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Spawn `cmd` with the given stdin, stdout piped and stderr discarded.
///
/// The [`tokio::process::Command`] (and with it any pipe end handed in as
/// `stdin`) is dropped before this returns.
fn spawn_child(cmd: &ToolCommand, stdin: Stdio) -> Result<Child> {
    let mut command = cmd.command();
    command
        .stdin(stdin)
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    command
        .spawn()
        .map_err(|e| Error::tool(cmd.program_name(), format!("failed to spawn: {e}")))
}

#[cfg(unix)]
fn signal(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        tracing::debug!("SIGTERM to {pid} failed: {e}");
    }
}

#[cfg(not(unix))]
fn signal(child: &Child) {
    let _ = child;
}
