//! Search collaborator: phrase in, video records out.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use mpegfs_core::config::RemoteConfig;
use mpegfs_core::{Error, Result};

use crate::command::ToolCommand;
use crate::tools::{ToolRegistry, YTDLP};

/// One search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Human-readable title as reported by the service.
    pub title: String,
    /// Page URL handed to the extractor when the video is opened.
    pub url: String,
    /// Service-specific identifier.
    pub id: String,
}

/// Something that turns a search phrase into at most `limit` results.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, phrase: &str, limit: usize) -> Result<Vec<SearchResult>>;
}

/// [`SearchProvider`] backed by `yt-dlp --dump-json --flat-playlist`.
#[derive(Debug, Clone)]
pub struct YtDlpSearch {
    program: PathBuf,
    prefix: String,
    timeout: Duration,
}

impl YtDlpSearch {
    /// Build a search provider using the registry's yt-dlp.
    pub fn new(tools: &ToolRegistry, remote: &RemoteConfig) -> Result<Self> {
        let tool = tools.require(YTDLP)?;
        Ok(Self {
            program: tool.path.clone(),
            prefix: remote.search_prefix.clone(),
            timeout: remote.search_timeout(),
        })
    }

    /// The pseudo-URL yt-dlp expands into a result list, e.g. `ytsearch10:cats`.
    pub fn query(&self, phrase: &str, limit: usize) -> String {
        format!("{}{}:{}", self.prefix, limit, phrase)
    }
}

#[async_trait]
impl SearchProvider for YtDlpSearch {
    async fn search(&self, phrase: &str, limit: usize) -> Result<Vec<SearchResult>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let query = self.query(phrase, limit);
        tracing::debug!("Searching {query:?}");

        let output = ToolCommand::new(self.program.clone())
            .args(["--dump-json", "--flat-playlist", "--no-warnings"])
            .arg(&query)
            .timeout(self.timeout)
            .execute()
            .await?;

        let mut results = parse_search_output(&output.stdout)?;
        results.truncate(limit);
        tracing::info!("Search {phrase:?} returned {} results", results.len());
        Ok(results)
    }
}

/// The subset of a yt-dlp info dict we care about.
#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    webpage_url: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

/// Parse yt-dlp's one-JSON-object-per-line output.
///
/// Entries without a title or any usable URL are skipped.
pub fn parse_search_output(stdout: &str) -> Result<Vec<SearchResult>> {
    let mut results = Vec::new();

    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let entry: RawEntry = serde_json::from_str(line)
            .map_err(|e| Error::tool(YTDLP, format!("unparseable search output: {e}")))?;

        let id = entry.id.unwrap_or_default();
        let url = entry
            .webpage_url
            .or(entry.url)
            .or_else(|| (!id.is_empty()).then(|| format!("https://www.youtube.com/watch?v={id}")));

        match (entry.title, url) {
            (Some(title), Some(url)) => results.push(SearchResult { title, url, id }),
            _ => tracing::debug!("Skipping search entry {id:?} without title or URL"),
        }
    }

    Ok(results)
}
