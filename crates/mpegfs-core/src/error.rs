//! Unified error type for mpegfs.
//!
//! Every crate funnels its failures into [`Error`], which carries enough
//! context for the FUSE adapter to derive a POSIX errno via [`Error::errno`].

use std::fmt;
use std::io;
use std::time::Duration;

/// Unified error type covering all failure modes in mpegfs.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A path, tree segment or media source does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "path", "video", "source").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// `mkdir` collided with an existing entry.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// An access check failed.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// An I/O operation failed (process spawn, pipe, physical filesystem).
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: io::Error,
    },

    /// An external tool (ffmpeg, yt-dlp) is missing or returned an error.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// A bounded operation exhausted its time budget.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The operation is not implemented for the active mount mode.
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Configuration or input failed validation.
    #[error("Validation error: {0}")]
    Validation(String),
}

impl Error {
    /// Map this error to the errno reported back to the kernel.
    pub fn errno(&self) -> i32 {
        match self {
            Error::NotFound { .. } => libc::ENOENT,
            Error::AlreadyExists(_) => libc::EEXIST,
            Error::PermissionDenied(_) => libc::EACCES,
            Error::Io { source } => source.raw_os_error().unwrap_or(libc::EIO),
            Error::Tool { .. } => libc::EIO,
            Error::Timeout(_) => libc::ETIMEDOUT,
            Error::NotSupported(_) => libc::ENOSYS,
            Error::Validation(_) => libc::EINVAL,
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::NotSupported`].
    pub fn not_supported(operation: impl Into<String>) -> Self {
        Error::NotSupported(operation.into())
    }

    /// Classify an I/O error raised while touching `path`.
    ///
    /// Missing entries, permission failures and collisions become their
    /// dedicated variants; everything else stays an [`Error::Io`] so the
    /// original errno survives to the kernel.
    pub fn from_io(err: io::Error, path: impl fmt::Display) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Error::not_found("path", path),
            io::ErrorKind::PermissionDenied => Error::PermissionDenied(path.to_string()),
            io::ErrorKind::AlreadyExists => Error::AlreadyExists(path.to_string()),
            _ => Error::Io { source: err },
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = Error::not_found("path", "/movies/clip.mkv");
        assert_eq!(err.to_string(), "path not found: /movies/clip.mkv");
        assert_eq!(err.errno(), libc::ENOENT);
    }

    #[test]
    fn already_exists_display() {
        let err = Error::AlreadyExists("/cats".into());
        assert_eq!(err.to_string(), "Already exists: /cats");
        assert_eq!(err.errno(), libc::EEXIST);
    }

    #[test]
    fn permission_denied_maps_to_eacces() {
        let err = Error::PermissionDenied("/secret".into());
        assert_eq!(err.errno(), libc::EACCES);
    }

    #[test]
    fn io_keeps_raw_errno() {
        let err = Error::from(io::Error::from_raw_os_error(libc::EPIPE));
        assert_eq!(err.errno(), libc::EPIPE);
    }

    #[test]
    fn io_without_errno_maps_to_eio() {
        let err = Error::from(io::Error::new(io::ErrorKind::Other, "broken"));
        assert!(matches!(err, Error::Io { .. }));
        assert_eq!(err.errno(), libc::EIO);
    }

    #[test]
    fn tool_display() {
        let err = Error::tool("ffmpeg", "failed to spawn");
        assert_eq!(err.to_string(), "Tool error [ffmpeg]: failed to spawn");
        assert_eq!(err.errno(), libc::EIO);
    }

    #[test]
    fn timeout_and_not_supported() {
        assert_eq!(
            Error::Timeout(Duration::from_secs(1)).errno(),
            libc::ETIMEDOUT
        );
        let err = Error::not_supported("statfs");
        assert_eq!(err.to_string(), "Not supported: statfs");
        assert_eq!(err.errno(), libc::ENOSYS);
    }

    #[test]
    fn from_io_classifies_kinds() {
        let missing = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert!(matches!(
            Error::from_io(missing, "/a"),
            Error::NotFound { .. }
        ));

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(
            Error::from_io(denied, "/a"),
            Error::PermissionDenied(_)
        ));

        let other = io::Error::from_raw_os_error(libc::EXDEV);
        let err = Error::from_io(other, "/a");
        assert_eq!(err.errno(), libc::EXDEV);
    }
}
