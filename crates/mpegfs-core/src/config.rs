//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from TOML and carries all
//! sub-configs for mounting, transcoding, both tree modes and tool paths.
//! Every section defaults sensibly so a completely empty file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::Error;

/// Locations searched when no config path is given on the command line.
const DEFAULT_PATHS: &[&str] = &[
    "./mpegfs.toml",
    "~/.config/mpegfs/config.toml",
    "/etc/mpegfs/config.toml",
];

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mount: MountConfig,
    pub transcode: TranscodeConfig,
    pub passthrough: PassthroughConfig,
    pub remote: RemoteConfig,
    pub tools: ToolsConfig,
}

impl Config {
    /// Deserialize a `Config` from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::from_io(e, path.display()))?;
        Self::from_toml(&contents)
    }

    /// Load from an explicit path, or from the first default location that
    /// exists, or fall back to defaults.
    ///
    /// An explicit path that cannot be read or parsed is an error; the
    /// default locations are only tried.
    pub fn load_or_default(custom_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = custom_path {
            return Self::load(path);
        }

        for path_str in DEFAULT_PATHS {
            let expanded = shellexpand::tilde(path_str);
            let path = Path::new(expanded.as_ref());
            if path.exists() {
                tracing::debug!("Loading config from {}", path.display());
                return Self::load(path);
            }
        }

        tracing::debug!("No config file found; using defaults");
        Ok(Self::default())
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.remote.search_results == 0 {
            warnings.push("remote.search_results is 0; search directories will be empty".into());
        }

        if self.passthrough.extensions.is_empty() {
            warnings.push("passthrough.extensions is empty; only directories will be listed".into());
        }

        if self.passthrough.read_timeout_ms == 0 || self.remote.read_timeout_ms == 0 {
            warnings.push("a read timeout of 0 makes every read return empty".into());
        }

        if self.transcode.width == 0 {
            warnings.push("transcode.width is 0; ffmpeg will reject the scale filter".into());
        }

        for (name, path) in [
            ("ffmpeg_path", &self.tools.ffmpeg_path),
            ("ytdlp_path", &self.tools.ytdlp_path),
        ] {
            if let Some(p) = path {
                if !p.exists() {
                    warnings.push(format!(
                        "tools.{name} {} does not exist; falling back to PATH",
                        p.display()
                    ));
                }
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// FUSE mount settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    /// Filesystem name shown in `mount` output.
    pub fsname: String,
    /// Let users other than the mounting user see the tree.
    pub allow_other: bool,
    /// Unmount automatically when the process exits.
    pub auto_unmount: bool,
    /// How long the kernel may cache attributes and entries.
    pub attr_ttl_secs: u64,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            fsname: "mpegfs".into(),
            allow_other: true,
            auto_unmount: true,
            attr_ttl_secs: 1,
        }
    }
}

impl MountConfig {
    pub fn attr_ttl(&self) -> Duration {
        Duration::from_secs(self.attr_ttl_secs)
    }
}

/// Output format of the transcoder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    /// Container written to stdout (must be streamable).
    pub format: String,
    /// Output width in pixels; height follows the aspect ratio.
    pub width: u32,
    pub video_codec: String,
    pub video_bitrate: String,
    pub frame_rate: u32,
    pub preset: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub sample_rate: u32,
    pub channels: u8,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            format: "mpeg".into(),
            width: 352,
            video_codec: "mpeg1video".into(),
            video_bitrate: "512k".into(),
            frame_rate: 24,
            preset: "ultrafast".into(),
            audio_codec: "mp2".into(),
            audio_bitrate: "64k".into(),
            sample_rate: 16000,
            channels: 1,
        }
    }
}

/// Settings for mirroring a real directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PassthroughConfig {
    /// File extensions (without the dot) listed as videos.
    pub extensions: Vec<String>,
    /// Wall-clock budget for a single read.
    pub read_timeout_ms: u64,
}

impl Default for PassthroughConfig {
    fn default() -> Self {
        Self {
            extensions: [
                "mp4", "avi", "mkv", "mpg", "mpeg", "mov", "wmv", "flv", "webm",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            read_timeout_ms: 1000,
        }
    }
}

impl PassthroughConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Settings for the search-driven tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Results fetched per search directory.
    pub search_results: usize,
    /// yt-dlp search prefix, e.g. `ytsearch` for `ytsearch10:<phrase>`.
    pub search_prefix: String,
    /// Maximum time a search may take.
    pub search_timeout_secs: u64,
    /// yt-dlp format selector used when streaming (`w` = worst).
    pub format: String,
    /// Wall-clock budget for a single read.
    pub read_timeout_ms: u64,
    /// Materialize unknown directories on lookup instead of failing.
    pub create_on_navigation: bool,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            search_results: 10,
            search_prefix: "ytsearch".into(),
            search_timeout_secs: 60,
            format: "w".into(),
            read_timeout_ms: 15000,
            create_on_navigation: false,
        }
    }
}

impl RemoteConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }
}

/// Optional overrides for external tool locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ytdlp_path: Option<PathBuf>,
}
