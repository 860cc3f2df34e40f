//! Filesystem handlers.
//!
//! Both tree modes implement [`Operations`], a path-based contract close to
//! what the kernel asks for. The mode is picked once at mount time; the
//! FUSE adapter only ever sees a `dyn Operations`.

pub mod attr;
pub mod passthrough;
pub mod remote;
pub mod stream;
pub mod tree;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use mpegfs_core::Result;

pub use attr::{Attr, DirEntry, FileKind, StatFs, Timestamp};
pub use passthrough::{PassthroughFs, PathResolver};
pub use remote::RemoteFs;
pub use stream::StreamSlot;
pub use tree::{sanitize_title, VirtualTree};

/// Operations a mounted tree answers. Paths are absolute within the mount.
#[async_trait]
pub trait Operations: Send + Sync {
    /// Check `mask` (an `access(2)` mode) against `path`.
    async fn access(&self, path: &Path, mask: i32) -> Result<()>;

    async fn getattr(&self, path: &Path) -> Result<Attr>;

    /// Full listing of a directory, `.` and `..` first.
    async fn readdir(&self, path: &Path) -> Result<Vec<DirEntry>>;

    async fn readlink(&self, path: &Path) -> Result<PathBuf>;

    async fn statfs(&self, path: &Path) -> Result<StatFs>;

    async fn utimens(&self, path: &Path, atime: Timestamp, mtime: Timestamp) -> Result<()>;

    async fn mkdir(&self, path: &Path, mode: u32) -> Result<()>;

    /// Start streaming `path`, superseding any open stream. Returns the
    /// handle later passed to `read` and `release`.
    async fn open(&self, path: &Path, flags: i32) -> Result<u64>;

    /// Next bytes of the stream behind `fh`. `offset` is ignored: streams
    /// are strictly sequential.
    async fn read(&self, path: &Path, size: usize, offset: i64, fh: u64) -> Result<Vec<u8>>;

    async fn release(&self, path: &Path, fh: u64) -> Result<()>;
}
