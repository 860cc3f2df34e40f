//! Mirror of a real directory showing only videos, transcoded on read.

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use async_trait::async_trait;
use mpegfs_av::{Source, ToolRegistry};
use mpegfs_core::config::{Config, TranscodeConfig};
use mpegfs_core::{Error, Result};
use nix::sys::stat::{utimensat, UtimensatFlags};
use nix::sys::time::TimeSpec;
use nix::unistd::AccessFlags;

use super::attr::{Attr, DirEntry, FileKind, StatFs, Timestamp};
use super::stream::StreamSlot;
use super::Operations;

/// Maps virtual paths onto the mirrored directory.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Strip the leading separator and join onto the root.
    pub fn resolve(&self, virtual_path: &Path) -> PathBuf {
        let relative = virtual_path.strip_prefix("/").unwrap_or(virtual_path);
        self.root.join(relative)
    }

    /// Rewrite an absolute symlink target relative to the root.
    ///
    /// Relative targets are returned unchanged.
    pub fn link_target(&self, target: PathBuf) -> PathBuf {
        if target.is_absolute() {
            relative_path(&target, &self.root)
        } else {
            target
        }
    }
}

/// `target` expressed relative to `base`; both must be absolute.
fn relative_path(target: &Path, base: &Path) -> PathBuf {
    let target: Vec<Component<'_>> = target.components().collect();
    let base: Vec<Component<'_>> = base.components().collect();
    let common = target
        .iter()
        .zip(&base)
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in common..base.len() {
        out.push("..");
    }
    for component in &target[common..] {
        out.push(component.as_os_str());
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Filesystem operations over a physical directory.
pub struct PassthroughFs {
    resolver: PathResolver,
    extensions: Vec<String>,
    read_timeout: Duration,
    tools: ToolRegistry,
    transcode: TranscodeConfig,
    streams: StreamSlot,
}

impl PassthroughFs {
    /// Mirror `root`, which must be an existing directory.
    ///
    /// The root is made absolute but symlinks in it are kept, so absolute
    /// link targets are rewritten against the path the user gave.
    pub fn new(root: &Path, config: &Config, tools: ToolRegistry) -> Result<Self> {
        let root = std::path::absolute(root).map_err(|e| Error::from_io(e, root.display()))?;
        let meta = std::fs::metadata(&root).map_err(|e| Error::from_io(e, root.display()))?;
        if !meta.is_dir() {
            return Err(Error::Validation(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        Ok(Self {
            resolver: PathResolver::new(root),
            extensions: config
                .passthrough
                .extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            read_timeout: config.passthrough.read_timeout(),
            tools,
            transcode: config.transcode.clone(),
            streams: StreamSlot::new(),
        })
    }

    pub fn streams(&self) -> &StreamSlot {
        &self.streams
    }

    /// Whether `name` carries one of the configured video extensions.
    pub fn is_video(&self, name: &OsStr) -> bool {
        Path::new(name)
            .extension()
            .and_then(OsStr::to_str)
            .map(|ext| {
                self.extensions
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }

    fn physical(&self, path: &Path) -> PathBuf {
        self.resolver.resolve(path)
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> Error + '_ {
    move |e| Error::from_io(e, path.display())
}

fn nix_err(path: &Path) -> impl FnOnce(nix::Error) -> Error + '_ {
    move |errno| Error::from_io(errno.into(), path.display())
}

fn timespec(ts: Timestamp) -> TimeSpec {
    match ts {
        Timestamp::Omit => TimeSpec::UTIME_OMIT,
        Timestamp::Now => TimeSpec::UTIME_NOW,
        Timestamp::At(time) => {
            TimeSpec::from_duration(time.duration_since(UNIX_EPOCH).unwrap_or_default())
        }
    }
}

#[async_trait]
impl Operations for PassthroughFs {
    async fn access(&self, path: &Path, mask: i32) -> Result<()> {
        let physical = self.physical(path);
        nix::unistd::access(&physical, AccessFlags::from_bits_truncate(mask))
            .map_err(nix_err(path))
    }

    async fn getattr(&self, path: &Path) -> Result<Attr> {
        let physical = self.physical(path);
        let meta = tokio::fs::symlink_metadata(&physical)
            .await
            .map_err(io_err(path))?;
        Ok(Attr::from_metadata(&meta))
    }

    async fn readdir(&self, path: &Path) -> Result<Vec<DirEntry>> {
        let physical = self.physical(path);
        let mut dir = tokio::fs::read_dir(&physical).await.map_err(io_err(path))?;

        let mut entries = DirEntry::dots().to_vec();
        while let Some(entry) = dir.next_entry().await.map_err(io_err(path))? {
            let name = entry.file_name();
            // Follows symlinks, so a link to a directory is listed.
            let is_dir = tokio::fs::metadata(entry.path())
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false);
            if !is_dir && !self.is_video(&name) {
                continue;
            }
            let kind = match entry.file_type().await {
                Ok(ft) => FileKind::from(ft),
                Err(_) if is_dir => FileKind::Directory,
                Err(_) => FileKind::RegularFile,
            };
            entries.push(DirEntry::new(name, kind));
        }

        tracing::debug!("Listed {} ({} entries)", path.display(), entries.len());
        Ok(entries)
    }

    async fn readlink(&self, path: &Path) -> Result<PathBuf> {
        let physical = self.physical(path);
        let target = tokio::fs::read_link(&physical)
            .await
            .map_err(io_err(path))?;
        Ok(self.resolver.link_target(target))
    }

    async fn statfs(&self, path: &Path) -> Result<StatFs> {
        let physical = self.physical(path);
        let st = nix::sys::statvfs::statvfs(&physical).map_err(nix_err(path))?;
        Ok(StatFs {
            bsize: st.block_size() as u64,
            frsize: st.fragment_size() as u64,
            blocks: st.blocks() as u64,
            bfree: st.blocks_free() as u64,
            bavail: st.blocks_available() as u64,
            files: st.files() as u64,
            ffree: st.files_free() as u64,
            favail: st.files_available() as u64,
            flag: st.flags().bits() as u64,
            namemax: st.name_max() as u64,
        })
    }

    async fn utimens(&self, path: &Path, atime: Timestamp, mtime: Timestamp) -> Result<()> {
        let physical = self.physical(path);
        utimensat(
            None,
            &physical,
            &timespec(atime),
            &timespec(mtime),
            UtimensatFlags::FollowSymlink,
        )
        .map_err(nix_err(path))
    }

    async fn mkdir(&self, path: &Path, _mode: u32) -> Result<()> {
        Err(Error::not_supported(format!(
            "mkdir {} in a mirrored directory",
            path.display()
        )))
    }

    async fn open(&self, path: &Path, _flags: i32) -> Result<u64> {
        let physical = self.physical(path);
        let meta = tokio::fs::metadata(&physical)
            .await
            .map_err(io_err(path))?;
        if meta.is_dir() {
            return Err(Error::PermissionDenied(path.display().to_string()));
        }

        self.streams
            .open(&Source::File(physical), &self.tools, &self.transcode, "")
    }

    async fn read(&self, _path: &Path, size: usize, _offset: i64, fh: u64) -> Result<Vec<u8>> {
        self.streams.read(fh, size, self.read_timeout).await
    }

    async fn release(&self, _path: &Path, fh: u64) -> Result<()> {
        self.streams.release(fh);
        Ok(())
    }
}
