//! In-memory directory graph of search results.
//!
//! Every directory is a search: its query is the parent's query plus its own
//! name, and its videos are the results of running that query. Child
//! directories and videos live in separate maps and are merged only when
//! listed.

use std::collections::BTreeMap;
use std::path::{Component, Path};

use mpegfs_av::SearchResult;
use mpegfs_core::{Error, Result};

use super::attr::{DirEntry, FileKind};

/// A search result exposed as a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Video {
    pub title: String,
    /// The title after [`sanitize_title`]; the file name.
    pub name: String,
    pub url: String,
}

impl From<SearchResult> for Video {
    fn from(result: SearchResult) -> Self {
        Self {
            name: sanitize_title(&result.title),
            title: result.title,
            url: result.url,
        }
    }
}

/// A materialized search directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    query: String,
    children: BTreeMap<String, Node>,
    videos: BTreeMap<String, Video>,
}

impl Node {
    /// A directory for `query` holding `results`.
    ///
    /// Results whose sanitized names collide overwrite earlier ones; results
    /// that would produce `.`, `..` or an empty name are dropped.
    pub fn new(query: impl Into<String>, results: Vec<SearchResult>) -> Self {
        let mut videos = BTreeMap::new();
        for video in results.into_iter().map(Video::from) {
            if matches!(video.name.as_str(), "" | "." | "..") {
                tracing::debug!("Skipping unnameable result {:?}", video.title);
                continue;
            }
            videos.insert(video.name.clone(), video);
        }
        Self {
            query: query.into(),
            children: BTreeMap::new(),
            videos,
        }
    }

    #[cfg(test)]
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn videos(&self) -> &BTreeMap<String, Video> {
        &self.videos
    }

    /// Whether `name` is taken by a child directory or a video.
    pub fn contains(&self, name: &str) -> bool {
        self.children.contains_key(name) || self.videos.contains_key(name)
    }

    /// Query a child called `name` would search for.
    pub fn child_query(&self, name: &str) -> String {
        if self.query.is_empty() {
            name.to_string()
        } else {
            format!("{} {}", self.query, name)
        }
    }

    /// Attach `child` under `name`.
    pub fn insert_child(&mut self, name: &str, child: Node) -> Result<&Node> {
        if self.contains(name) {
            return Err(Error::AlreadyExists(name.to_string()));
        }
        Ok(self.children.entry(name.to_string()).or_insert(child))
    }

    /// Number of listing entries, `.` and `..` included.
    pub fn entry_count(&self) -> usize {
        self.children.len() + self.videos.len() + 2
    }

    /// `.`, `..`, child directories, then videos.
    pub fn listing(&self) -> Vec<DirEntry> {
        let mut entries = Vec::with_capacity(self.entry_count());
        entries.extend(DirEntry::dots());
        entries.extend(
            self.children
                .keys()
                .map(|name| DirEntry::new(name, FileKind::Directory)),
        );
        entries.extend(
            self.videos
                .keys()
                .map(|name| DirEntry::new(name, FileKind::RegularFile)),
        );
        entries
    }
}

/// What a path resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup<'a> {
    Directory(&'a Node),
    Video(&'a Video),
}

/// The whole search tree; the root has an empty query and no videos.
#[derive(Debug, Default)]
pub struct VirtualTree {
    root: Node,
}

impl VirtualTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// The directory at `segments`, if every segment is an existing child.
    pub fn dir(&self, segments: &[String]) -> Option<&Node> {
        segments
            .iter()
            .try_fold(&self.root, |node, name| node.children.get(name))
    }

    pub fn dir_mut(&mut self, segments: &[String]) -> Option<&mut Node> {
        segments
            .iter()
            .try_fold(&mut self.root, |node, name| node.children.get_mut(name))
    }

    /// Resolve `segments` to a directory or a video.
    pub fn lookup(&self, segments: &[String]) -> Option<Lookup<'_>> {
        let Some((name, parent)) = segments.split_last() else {
            return Some(Lookup::Directory(&self.root));
        };
        let parent = self.dir(parent)?;
        if let Some(child) = parent.children.get(name) {
            return Some(Lookup::Directory(child));
        }
        parent.videos.get(name).map(Lookup::Video)
    }
}

/// Replace every character outside printable ASCII (and `/`) with `-`.
///
/// One character in, one character out: `"Café 日本"` becomes `"Caf- --"`.
pub fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .map(|c| match c {
            '/' => '-',
            ' '..='~' => c,
            _ => '-',
        })
        .collect()
}

/// Split an absolute virtual path into its names.
///
/// Names must be UTF-8; anything else cannot exist in the tree.
pub fn segments(path: &Path) -> Result<Vec<String>> {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(name) => Some(
                name.to_str()
                    .map(str::to_string)
                    .ok_or_else(|| Error::not_found("path", path.display())),
            ),
            _ => None,
        })
        .collect()
}

/// Whether `name` may be created implicitly by navigating into it.
///
/// File managers look up names like `.hidden`, `autorun.inf` or
/// `Thumbs.db`; those must not trigger searches.
pub fn is_search_term(name: &str) -> bool {
    !name.is_empty() && !name.contains(['.', '(', ')'])
}
