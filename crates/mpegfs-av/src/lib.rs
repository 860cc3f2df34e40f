//! # mpegfs-av
//!
//! External process plumbing for the mpegfs filesystem.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache paths to ffmpeg
//!   and yt-dlp.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout
//!   support for running external processes to completion.
//! - **Transcoder arguments** ([`transcode`]) -- the ffmpeg and yt-dlp
//!   invocations that produce the low-bandwidth stream.
//! - **Pipelines** ([`Pipeline`]) -- one or two chained child processes
//!   exposing a single forward-only output stream.
//! - **Bounded reads** ([`read_bounded`]) -- timeout-bounded accumulation
//!   over any `AsyncRead`.
//! - **Search** ([`SearchProvider`], [`YtDlpSearch`]) -- phrase to result
//!   records.

pub mod command;
pub mod pipeline;
pub mod reader;
pub mod search;
pub mod tools;
pub mod transcode;

// ---- Re-exports for convenience ----

pub use command::{ToolCommand, ToolOutput};
pub use pipeline::{Pipeline, Source};
pub use reader::{read_bounded, BoundedRead, ReadStatus};
pub use search::{SearchProvider, SearchResult, YtDlpSearch};
pub use tools::{ToolConfig, ToolInfo, ToolRegistry, FFMPEG, YTDLP};
