//! Storage of the research trail attached to a chat message.

use crate::error::PersistenceError;
use crate::search::{SearchResult, SourceCount};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceUrl {
    pub title: String,
    pub url: String,
    pub snippet: String,
    /// Domain of `url`.
    pub source: String,
}

impl From<&SearchResult> for SourceUrl {
    fn from(result: &SearchResult) -> Self {
        Self {
            title: result.title.clone(),
            url: result.url.clone(),
            snippet: result.snippet.clone(),
            source: result.source_domain.clone(),
        }
    }
}

/// Written once per session, at completion or cancellation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedResearchData {
    pub thoughts: Vec<String>,
    pub sources: Vec<SourceCount>,
    #[serde(rename = "sourceUrls")]
    pub source_urls: Vec<SourceUrl>,
    pub query_decomposition: Vec<String>,
    pub search_duration_ms: u64,
    pub scrape_duration_ms: u64,
    pub analysis_duration_ms: u64,
}

#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    async fn save(&self, message_id: &str, data: &PersistedResearchData) -> Result<(), PersistenceError>;

    async fn load(&self, message_id: &str) -> Result<Option<PersistedResearchData>, PersistenceError>;
}

/// In-memory store, for tests and the default server setup.
#[derive(Default)]
pub struct MemoryResearchStore {
    map: std::sync::Mutex<HashMap<String, PersistedResearchData>>,
}

impl MemoryResearchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PersistenceAdapter for MemoryResearchStore {
    async fn save(&self, message_id: &str, data: &PersistedResearchData) -> Result<(), PersistenceError> {
        let mut map = self
            .map
            .lock()
            .map_err(|e| PersistenceError::Unavailable(e.to_string()))?;
        map.insert(message_id.to_string(), data.clone());
        Ok(())
    }

    async fn load(&self, message_id: &str) -> Result<Option<PersistedResearchData>, PersistenceError> {
        let map = self
            .map
            .lock()
            .map_err(|e| PersistenceError::Unavailable(e.to_string()))?;
        Ok(map.get(message_id).cloned())
    }
}

/// One pretty-printed JSON file per message under a directory.
pub struct FileResearchStore {
    dir: PathBuf,
}

impl FileResearchStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, message_id: &str) -> Result<PathBuf, PersistenceError> {
        let valid = !message_id.is_empty()
            && message_id.len() <= 128
            && message_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(PersistenceError::InvalidMessageId(message_id.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", message_id)))
    }
}

#[async_trait]
impl PersistenceAdapter for FileResearchStore {
    async fn save(&self, message_id: &str, data: &PersistedResearchData) -> Result<(), PersistenceError> {
        let path = self.path_for(message_id)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_vec_pretty(data)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(target: "delve.persistence", path = %path.display(), bytes = json.len(), "research trail saved");
        Ok(())
    }

    async fn load(&self, message_id: &str) -> Result<Option<PersistedResearchData>, PersistenceError> {
        let path = self.path_for(message_id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}
