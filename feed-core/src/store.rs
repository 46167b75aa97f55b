use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::post::Post;

/// Browser extension local storage ceiling.
pub const DEFAULT_QUOTA_BYTES: u64 = 10 * 1024 * 1024;

/// Persisted layout: `{ "posts": [...], "lastUpdated": "..." | null }`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeedState {
    #[serde(default)]
    pub posts: Vec<Post>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

/// Emitted after every successful save.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreChange {
    pub total_posts: usize,
    pub last_updated: Option<DateTime<Utc>>,
}

impl StoreChange {
    fn of(state: &FeedState) -> Self {
        Self {
            total_posts: state.posts.len(),
            last_updated: state.last_updated,
        }
    }
}

/// Key-value persistence with byte accounting and change notification.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self) -> Result<FeedState, StoreError>;
    async fn save(&self, state: &FeedState) -> Result<(), StoreError>;
    async fn bytes_in_use(&self) -> Result<u64, StoreError>;
    fn quota_bytes(&self) -> u64;
    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}

#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<RwLock<FeedState>>,
    quota_bytes: u64,
    changes: broadcast::Sender<StoreChange>,
}

impl MemoryStore {
    pub fn new(quota_bytes: u64) -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(RwLock::new(FeedState::default())),
            quota_bytes,
            changes,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_QUOTA_BYTES)
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self) -> Result<FeedState, StoreError> {
        Ok(self.inner.read().await.clone())
    }

    async fn save(&self, state: &FeedState) -> Result<(), StoreError> {
        *self.inner.write().await = state.clone();
        let _ = self.changes.send(StoreChange::of(state));
        Ok(())
    }

    async fn bytes_in_use(&self) -> Result<u64, StoreError> {
        let inner = self.inner.read().await;
        Ok(serde_json::to_vec(&*inner)?.len() as u64)
    }

    fn quota_bytes(&self) -> u64 {
        self.quota_bytes
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

/// Single JSON file, written atomically through a `.json.tmp` sibling.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
    quota_bytes: u64,
    changes: broadcast::Sender<StoreChange>,
}

impl JsonFileStore {
    pub fn new(path: impl AsRef<Path>, quota_bytes: u64) -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            path: path.as_ref().to_path_buf(),
            quota_bytes,
            changes,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }
}

/// Reads JSON, falling back to the temp file when the main file is corrupt
/// and to the default when neither is usable.
async fn read_json_with_tmp_fallback<T: DeserializeOwned + Default>(
    path: &Path,
    tmp: &Path,
) -> Result<T, StoreError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no stored feed state yet");
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_slice::<T>(&bytes) {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!(error = %e, path = %path.display(), "failed to parse JSON, trying tmp fallback");
            match tokio::fs::read(tmp).await {
                Ok(tmp_bytes) => Ok(serde_json::from_slice::<T>(&tmp_bytes).unwrap_or_default()),
                Err(_) => Ok(T::default()),
            }
        }
    }
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn load(&self) -> Result<FeedState, StoreError> {
        read_json_with_tmp_fallback(&self.path, &self.tmp_path()).await
    }

    async fn save(&self, state: &FeedState) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(state)?;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        let _ = self.changes.send(StoreChange::of(state));
        Ok(())
    }

    async fn bytes_in_use(&self) -> Result<u64, StoreError> {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn quota_bytes(&self) -> u64 {
        self.quota_bytes
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}
