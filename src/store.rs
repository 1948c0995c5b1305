//! Durable state document — the queue's backing storage.
//!
//! Everything the pipeline persists lives in one JSON document under
//! well-known keys, so a full page-context teardown (or process restart)
//! loses nothing: the queue is reloaded on the next init.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;

use crate::action::Action;
use crate::{Error, Result};

/// The persisted document. Unknown sibling keys written by other
/// components are not preserved; known non-queue keys are.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateDocument {
    #[serde(default, rename = "actionQueue")]
    pub action_queue: Vec<Action>,

    #[serde(default, rename = "frameVisible")]
    pub frame_visible: bool,

    /// Diagnostic blob recorded by the planner collaborator; opaque here.
    #[serde(default, rename = "lastAiSession", skip_serializing_if = "Option::is_none")]
    pub last_ai_session: Option<serde_json::Value>,
}

/// Persistence seam for the state document.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the current document, or a default one if none exists yet.
    async fn load(&self) -> Result<StateDocument>;

    /// Replace the persisted document.
    async fn persist(&self, doc: &StateDocument) -> Result<()>;
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryStore {
    doc: tokio::sync::RwLock<StateDocument>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with a pre-built document.
    pub fn with_document(doc: StateDocument) -> Self {
        Self {
            doc: tokio::sync::RwLock::new(doc),
        }
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self) -> Result<StateDocument> {
        Ok(self.doc.read().await.clone())
    }

    async fn persist(&self, doc: &StateDocument) -> Result<()> {
        *self.doc.write().await = doc.clone();
        Ok(())
    }
}

/// File-backed store: one JSON document at a fixed path.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl StateStore for FileStore {
    async fn load(&self) -> Result<StateDocument> {
        if !self.path.exists() {
            return Ok(StateDocument::default());
        }

        let content = fs::read_to_string(&self.path).await.map_err(|e| {
            Error::Storage(format!("failed to read {}: {}", self.path.display(), e))
        })?;

        let doc: StateDocument = serde_json::from_str(&content).map_err(|e| {
            Error::Storage(format!("failed to parse {}: {}", self.path.display(), e))
        })?;

        debug!(
            "loaded state document ({} queued) from {}",
            doc.action_queue.len(),
            self.path.display()
        );
        Ok(doc)
    }

    async fn persist(&self, doc: &StateDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::Storage(format!("failed to create {}: {}", parent.display(), e))
                })?;
            }
        }

        let content = serde_json::to_string_pretty(doc)
            .map_err(|e| Error::Storage(format!("failed to serialize state: {}", e)))?;

        fs::write(&self.path, content).await.map_err(|e| {
            Error::Storage(format!("failed to write {}: {}", self.path.display(), e))
        })?;

        Ok(())
    }
}
