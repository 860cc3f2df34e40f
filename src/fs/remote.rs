//! Search-driven tree: directories are queries, files are search results
//! fetched and transcoded when opened.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mpegfs_av::{SearchProvider, Source, ToolRegistry};
use mpegfs_core::config::{Config, TranscodeConfig};
use mpegfs_core::{Error, Result};
use tokio::sync::Mutex;

use super::attr::{Attr, DirEntry, FileKind, StatFs, Timestamp};
use super::stream::StreamSlot;
use super::tree::{is_search_term, segments, Lookup, Node, VirtualTree};
use super::Operations;

/// Size reported for every video; the real length is unknown until streamed.
pub const VIDEO_SIZE: u64 = 1 << 30;

const VIDEO_PERM: u16 = 0o555;
const DIR_PERM: u16 = 0o777;

/// Filesystem operations over a [`VirtualTree`].
pub struct RemoteFs {
    tree: Mutex<VirtualTree>,
    search: Arc<dyn SearchProvider>,
    search_results: usize,
    create_on_navigation: bool,
    read_timeout: Duration,
    format: String,
    tools: ToolRegistry,
    transcode: TranscodeConfig,
    streams: StreamSlot,
    uid: u32,
    gid: u32,
}

impl RemoteFs {
    pub fn new(config: &Config, tools: ToolRegistry, search: Arc<dyn SearchProvider>) -> Self {
        Self {
            tree: Mutex::new(VirtualTree::new()),
            search,
            search_results: config.remote.search_results,
            create_on_navigation: config.remote.create_on_navigation,
            read_timeout: config.remote.read_timeout(),
            format: config.remote.format.clone(),
            tools,
            transcode: config.transcode.clone(),
            streams: StreamSlot::new(),
            uid: nix::unistd::getuid().as_raw(),
            gid: nix::unistd::getgid().as_raw(),
        }
    }

    pub fn streams(&self) -> &StreamSlot {
        &self.streams
    }

    /// Run the search for a new child `name` of `parent` and attach it.
    ///
    /// Nothing is attached if the search fails.
    async fn materialize(&self, tree: &mut VirtualTree, parent: &[String], name: &str) -> Result<()> {
        let dir = tree
            .dir(parent)
            .ok_or_else(|| Error::not_found("directory", parent.join("/")))?;
        if dir.contains(name) {
            return Err(Error::AlreadyExists(name.to_string()));
        }

        let query = dir.child_query(name);
        let results = match self.search.search(&query, self.search_results).await {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!("Search for {query:?} failed: {e}");
                return Err(e);
            }
        };
        tracing::info!("Materialized {query:?} with {} videos", results.len());

        tree.dir_mut(parent)
            .ok_or_else(|| Error::not_found("directory", parent.join("/")))?
            .insert_child(name, Node::new(query, results))?;
        Ok(())
    }

    /// Lock the tree, first materializing any missing segments of `path` when
    /// navigation creates directories.
    async fn navigate(&self, path: &Path) -> Result<(tokio::sync::MutexGuard<'_, VirtualTree>, Vec<String>)> {
        let segments = segments(path)?;
        let mut tree = self.tree.lock().await;

        if self.create_on_navigation {
            for depth in 0..segments.len() {
                let (parent, name) = (&segments[..depth], segments[depth].as_str());
                let Some(dir) = tree.dir(parent) else {
                    break;
                };
                if dir.contains(name) || !is_search_term(name) {
                    continue;
                }
                self.materialize(&mut tree, parent, name).await?;
            }
        }

        Ok((tree, segments))
    }

    fn dir_attr(&self, node: &Node) -> Attr {
        Attr::synthetic(
            FileKind::Directory,
            DIR_PERM,
            node.entry_count() as u32,
            0,
            self.uid,
            self.gid,
        )
    }

    fn video_attr(&self) -> Attr {
        Attr::synthetic(FileKind::RegularFile, VIDEO_PERM, 1, VIDEO_SIZE, self.uid, self.gid)
    }
}

fn not_found(path: &Path) -> Error {
    Error::not_found("path", path.display())
}

#[async_trait]
impl Operations for RemoteFs {
    async fn access(&self, path: &Path, _mask: i32) -> Result<()> {
        let (tree, segments) = self.navigate(path).await?;
        tree.lookup(&segments).map(|_| ()).ok_or_else(|| not_found(path))
    }

    async fn getattr(&self, path: &Path) -> Result<Attr> {
        let (tree, segments) = self.navigate(path).await?;
        match tree.lookup(&segments) {
            Some(Lookup::Directory(node)) => Ok(self.dir_attr(node)),
            Some(Lookup::Video(_)) => Ok(self.video_attr()),
            None => Err(not_found(path)),
        }
    }

    async fn readdir(&self, path: &Path) -> Result<Vec<DirEntry>> {
        let (tree, segments) = self.navigate(path).await?;
        match tree.lookup(&segments) {
            Some(Lookup::Directory(node)) => Ok(node.listing()),
            Some(Lookup::Video(_)) => Err(std::io::Error::from_raw_os_error(libc::ENOTDIR).into()),
            None => Err(not_found(path)),
        }
    }

    async fn readlink(&self, path: &Path) -> Result<PathBuf> {
        Err(Error::not_supported(format!("readlink {}", path.display())))
    }

    async fn statfs(&self, _path: &Path) -> Result<StatFs> {
        Err(Error::not_supported("statfs on a search tree"))
    }

    async fn utimens(&self, _path: &Path, _atime: Timestamp, _mtime: Timestamp) -> Result<()> {
        Ok(())
    }

    async fn mkdir(&self, path: &Path, _mode: u32) -> Result<()> {
        let segments = segments(path)?;
        let Some((name, parent)) = segments.split_last() else {
            return Err(Error::AlreadyExists("/".into()));
        };

        let mut tree = self.tree.lock().await;
        if tree.dir(parent).is_none() {
            return Err(not_found(path));
        }
        self.materialize(&mut tree, parent, name).await
    }

    async fn open(&self, path: &Path, _flags: i32) -> Result<u64> {
        let segments = segments(path)?;
        let url = {
            let tree = self.tree.lock().await;
            match tree.lookup(&segments) {
                Some(Lookup::Video(video)) => {
                    tracing::info!("Opening {:?}", video.title);
                    video.url.clone()
                }
                Some(Lookup::Directory(_)) => {
                    return Err(Error::PermissionDenied(path.display().to_string()))
                }
                None => return Err(not_found(path)),
            }
        };

        self.streams
            .open(&Source::Url(url), &self.tools, &self.transcode, &self.format)
    }

    async fn read(&self, _path: &Path, size: usize, _offset: i64, fh: u64) -> Result<Vec<u8>> {
        self.streams.read(fh, size, self.read_timeout).await
    }

    async fn release(&self, _path: &Path, fh: u64) -> Result<()> {
        self.streams.release(fh);
        Ok(())
    }
}
