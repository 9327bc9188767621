//! 结果存储模块：保存一次生成的全部响应，供之后浏览或重试。
//!
//! # Storage Module
//!
//! The dispatcher never persists anything itself. Callers that want a history wrap a
//! finished batch in a [`GenerationResult`] and hand it to a [`ResultStore`].
//!
//! | Backend | Description |
//! |---------|-------------|
//! | [`InMemoryResultStore`] | Process-local map, for tests and short-lived tools |
//! | [`JsonFileResultStore`] | One pretty-printed JSON file per result under a directory |

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::types::Response;
use crate::{Error, ErrorContext, Result, CANCELLED, CLOSED};

/// One run of a template over its expanded requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub id: String,
    /// Unix epoch milliseconds.
    pub timestamp: u64,
    pub template_id: String,
    pub template_name: String,
    #[serde(default)]
    pub placeholders: BTreeMap<String, String>,
    #[serde(default)]
    pub responses: HashMap<String, Response>,
    /// False when any request was swept by cancellation or shutdown.
    pub is_complete: bool,
}

impl GenerationResult {
    pub fn from_batch(
        template_id: impl Into<String>,
        template_name: impl Into<String>,
        placeholders: BTreeMap<String, String>,
        responses: HashMap<String, Response>,
    ) -> Self {
        let is_complete = !responses
            .values()
            .any(|r| matches!(r.error.as_deref(), Some(CANCELLED) | Some(CLOSED)));
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: now_ms(),
            template_id: template_id.into(),
            template_name: template_name.into(),
            placeholders,
            responses,
            is_complete,
        }
    }

    pub fn failed_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .responses
            .values()
            .filter(|r| r.is_error())
            .map(|r| r.request_id.as_str())
            .collect();
        ids.sort_unstable();
        ids
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn save_result(&self, result: &GenerationResult) -> Result<()>;
    async fn get_result(&self, id: &str) -> Result<Option<GenerationResult>>;
    /// Returns whether something was deleted.
    async fn delete_result(&self, id: &str) -> Result<bool>;
    /// Newest first.
    async fn get_all_results(&self) -> Result<Vec<GenerationResult>>;
    fn name(&self) -> &'static str;
}

fn newest_first(results: &mut [GenerationResult]) {
    results.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryResultStore {
    results: Arc<RwLock<HashMap<String, GenerationResult>>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn save_result(&self, result: &GenerationResult) -> Result<()> {
        self.results
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(result.id.clone(), result.clone());
        Ok(())
    }

    async fn get_result(&self, id: &str) -> Result<Option<GenerationResult>> {
        Ok(self
            .results
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned())
    }

    async fn delete_result(&self, id: &str) -> Result<bool> {
        Ok(self
            .results
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .is_some())
    }

    async fn get_all_results(&self) -> Result<Vec<GenerationResult>> {
        let mut all: Vec<GenerationResult> = self
            .results
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        newest_first(&mut all);
        Ok(all)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Stores each result as `<dir>/<id>.json`.
#[derive(Debug, Clone)]
pub struct JsonFileResultStore {
    dir: PathBuf,
}

impl JsonFileResultStore {
    /// Creates `dir` if it does not exist.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        let safe = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !safe {
            return Err(Error::validation_with_context(
                format!("result id '{}' is not a valid file name", id),
                ErrorContext::new()
                    .with_field_path("result.id")
                    .with_source("json_file_store"),
            ));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }
}

#[async_trait]
impl ResultStore for JsonFileResultStore {
    async fn save_result(&self, result: &GenerationResult) -> Result<()> {
        let path = self.path_for(&result.id)?;
        let body = serde_json::to_vec_pretty(result)?;
        // Readers never observe a half-written file.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(id = %result.id, path = %path.display(), "generation result saved");
        Ok(())
    }

    async fn get_result(&self, id: &str) -> Result<Option<GenerationResult>> {
        let path = self.path_for(id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_result(&self, id: &str) -> Result<bool> {
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_all_results(&self) -> Result<Vec<GenerationResult>> {
        let mut all = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<GenerationResult>(&bytes) {
                Ok(result) => all.push(result),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable result"),
            }
        }
        newest_first(&mut all);
        Ok(all)
    }

    fn name(&self) -> &'static str {
        "json_file"
    }
}
