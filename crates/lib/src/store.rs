//! Persistence collaborator for long-lived user data.
//!
//! Only explicit `store_value` / `retrieve_value` / `clear_values` calls reach a store; pending
//! responses and conversation scopes are never persisted.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store data is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Key-value storage per (channel, user). Calls may be slow and may fail.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// All values stored for the user; empty when none.
    async fn retrieve(&self, channel_id: &str, user_id: &str) -> Result<Map<String, Value>, StoreError>;
    async fn store(
        &self,
        channel_id: &str,
        user_id: &str,
        key: &str,
        value: Value,
    ) -> Result<(), StoreError>;
    async fn clear(&self, channel_id: &str, user_id: &str) -> Result<(), StoreError>;
}

type Records = HashMap<String, HashMap<String, Map<String, Value>>>;

/// In-memory store; useful in tests and as a reference implementation.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<Records>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn retrieve(&self, channel_id: &str, user_id: &str) -> Result<Map<String, Value>, StoreError> {
        Ok(lookup(&*self.records.read().await, channel_id, user_id))
    }

    async fn store(
        &self,
        channel_id: &str,
        user_id: &str,
        key: &str,
        value: Value,
    ) -> Result<(), StoreError> {
        insert(&mut *self.records.write().await, channel_id, user_id, key, value);
        Ok(())
    }

    async fn clear(&self, channel_id: &str, user_id: &str) -> Result<(), StoreError> {
        remove(&mut *self.records.write().await, channel_id, user_id);
        Ok(())
    }
}

/// Whole-map JSON file store: loaded once, rewritten after every change.
pub struct JsonFileStore {
    path: PathBuf,
    records: RwLock<Records>,
}

impl JsonFileStore {
    /// Load from `path`. A missing file starts empty; an unreadable or corrupt one is an error.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let records = match tokio::fs::read_to_string(&path).await {
            Ok(s) => serde_json::from_str(&s)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("user file not found, starting empty: {}", path.display());
                Records::new()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn save(&self, records: &Records) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(records)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for JsonFileStore {
    async fn retrieve(&self, channel_id: &str, user_id: &str) -> Result<Map<String, Value>, StoreError> {
        Ok(lookup(&*self.records.read().await, channel_id, user_id))
    }

    async fn store(
        &self,
        channel_id: &str,
        user_id: &str,
        key: &str,
        value: Value,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let mut next = records.clone();
        insert(&mut next, channel_id, user_id, key, value);
        self.save(&next).await?;
        *records = next;
        Ok(())
    }

    async fn clear(&self, channel_id: &str, user_id: &str) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let mut next = records.clone();
        remove(&mut next, channel_id, user_id);
        self.save(&next).await?;
        *records = next;
        Ok(())
    }
}

fn lookup(records: &Records, channel_id: &str, user_id: &str) -> Map<String, Value> {
    records
        .get(channel_id)
        .and_then(|users| users.get(user_id))
        .cloned()
        .unwrap_or_default()
}

fn insert(records: &mut Records, channel_id: &str, user_id: &str, key: &str, value: Value) {
    records
        .entry(channel_id.to_string())
        .or_default()
        .entry(user_id.to_string())
        .or_default()
        .insert(key.to_string(), value);
}

fn remove(records: &mut Records, channel_id: &str, user_id: &str) {
    if let Some(users) = records.get_mut(channel_id) {
        users.remove(user_id);
        if users.is_empty() {
            records.remove(channel_id);
        }
    }
}
