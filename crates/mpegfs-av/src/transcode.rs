//! Transcoder and extractor invocations.
//!
//! The transcoder always writes a streamable container to stdout; its input
//! is either a local file or [`STDIN_INPUT`] when it is fed by the extractor.

use std::ffi::OsString;

use mpegfs_core::config::TranscodeConfig;

use crate::command::ToolCommand;
use crate::tools::ToolConfig;

/// ffmpeg input specifier for "read from stdin".
pub const STDIN_INPUT: &str = "pipe:0";

/// ffmpeg output specifier for "write to stdout".
pub const STDOUT_OUTPUT: &str = "pipe:1";

/// Build the ffmpeg invocation transcoding `input` to the configured format.
///
/// The height is derived from the width with `-2`, which keeps the aspect
/// ratio while rounding to the even dimension MPEG-1 requires.
pub fn transcoder(tool: &ToolConfig, input: impl Into<OsString>, cfg: &TranscodeConfig) -> ToolCommand {
    let mut cmd = ToolCommand::new(tool.path.clone());
    cmd.args(["-hide_banner", "-loglevel", "error", "-i"])
        .arg(input)
        .args(["-f", cfg.format.as_str()])
        .arg("-vf")
        .arg(format!("scale={}:-2", cfg.width))
        .args(["-c:v", cfg.video_codec.as_str()])
        .args(["-b:v", cfg.video_bitrate.as_str()])
        .args(["-c:a", cfg.audio_codec.as_str()])
        .args(["-b:a", cfg.audio_bitrate.as_str()])
        .arg("-ar")
        .arg(cfg.sample_rate.to_string())
        .arg("-ac")
        .arg(cfg.channels.to_string())
        .arg("-r")
        .arg(cfg.frame_rate.to_string())
        .args(["-preset", cfg.preset.as_str()])
        .arg(STDOUT_OUTPUT);
    cmd
}

/// Build the yt-dlp invocation streaming `url` at quality `format` to stdout.
///
/// The URL is always the last argument.
pub fn extractor(tool: &ToolConfig, url: &str, format: &str) -> ToolCommand {
    let mut cmd = ToolCommand::new(tool.path.clone());
    cmd.args(["-f", format, "--no-playlist", "--quiet", "-o", "-"])
        .arg(url);
    cmd
}
