//! Snapshot persistence for queue state and configuration
//!
//! Two logical documents are stored: the queue state (three tiers with their
//! indexes) and the user configuration (colors, limits, keywords, special-user
//! allow-list). Both round-trip losslessly through JSON.

use crate::config::QueueConfig;
use crate::error::{QueueError, Result};
use crate::state::QueueState;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;

/// Storage interface for queue snapshots
#[async_trait]
pub trait Storage: Send + Sync {
    /// Persist the queue state document
    async fn save_state(&self, state: &QueueState) -> Result<()>;

    /// Load the queue state document, if one was saved
    async fn load_state(&self) -> Result<Option<QueueState>>;

    /// Persist the configuration document
    async fn save_config(&self, config: &QueueConfig) -> Result<()>;

    /// Load the configuration document, if one was saved
    async fn load_config(&self) -> Result<Option<QueueConfig>>;

    /// Remove both documents
    async fn clear_all(&self) -> Result<()>;
}

/// Local filesystem storage: `line.json` and `lineConfig.json` in one directory
pub struct LocalStorage {
    storage_dir: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage with the specified directory
    ///
    /// The directory will be created if it doesn't exist.
    pub async fn new(storage_dir: impl Into<PathBuf>) -> Result<Self> {
        let storage_dir = storage_dir.into();
        fs::create_dir_all(&storage_dir).await.map_err(|e| {
            QueueError::Storage(format!("Failed to create storage directory: {}", e))
        })?;
        Ok(Self { storage_dir })
    }

    pub fn state_path(&self) -> PathBuf {
        self.storage_dir.join("line.json")
    }

    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("lineConfig.json")
    }

    /// Write to a sibling temp file and rename over the target
    async fn write_document<T: Serialize + Sync>(&self, path: &Path, value: &T) -> Result<()> {
        let json = serde_json::to_vec_pretty(value)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .await
            .map_err(|e| QueueError::Storage(format!("Failed to write {}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, path).await.map_err(|e| {
            QueueError::Storage(format!("Failed to replace {}: {}", path.display(), e))
        })?;
        Ok(())
    }

    async fn read_document<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        match fs::read(path).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(QueueError::Storage(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn save_state(&self, state: &QueueState) -> Result<()> {
        self.write_document(&self.state_path(), state).await
    }

    async fn load_state(&self) -> Result<Option<QueueState>> {
        self.read_document(&self.state_path()).await
    }

    async fn save_config(&self, config: &QueueConfig) -> Result<()> {
        self.write_document(&self.config_path(), config).await
    }

    async fn load_config(&self) -> Result<Option<QueueConfig>> {
        self.read_document(&self.config_path()).await
    }

    async fn clear_all(&self) -> Result<()> {
        let _ = fs::remove_file(self.state_path()).await;
        let _ = fs::remove_file(self.config_path()).await;
        Ok(())
    }
}

/// In-memory storage holding serialized documents
#[derive(Default)]
pub struct MemoryStorage {
    state: RwLock<Option<String>>,
    config: RwLock<Option<String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw state document, as last saved
    pub async fn state_json(&self) -> Option<String> {
        self.state.read().await.clone()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save_state(&self, state: &QueueState) -> Result<()> {
        *self.state.write().await = Some(serde_json::to_string(state)?);
        Ok(())
    }

    async fn load_state(&self) -> Result<Option<QueueState>> {
        match self.state.read().await.as_deref() {
            Some(json) => Ok(Some(serde_json::from_str(json)?)),
            None => Ok(None),
        }
    }

    async fn save_config(&self, config: &QueueConfig) -> Result<()> {
        *self.config.write().await = Some(serde_json::to_string(config)?);
        Ok(())
    }

    async fn load_config(&self) -> Result<Option<QueueConfig>> {
        match self.config.read().await.as_deref() {
            Some(json) => Ok(Some(serde_json::from_str(json)?)),
            None => Ok(None),
        }
    }

    async fn clear_all(&self) -> Result<()> {
        *self.state.write().await = None;
        *self.config.write().await = None;
        Ok(())
    }
}
