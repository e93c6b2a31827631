//! Conversation checkpoints
//!
//! Before a consolidated window is removed from the index, its raw records
//! are kept as an immutable checkpoint so the window can be restored later.
//! Only the newest few checkpoints per conversation are retained.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::error::Result;
use crate::memory::types::{ConversationKey, MemoryRecord};
use crate::storage;

/// File name of the checkpoint store inside the data directory
pub const CHECKPOINTS_FILE: &str = "checkpoints.json";

/// Snapshot of a conversation window taken before it was consolidated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationCheckpoint {
    pub id: Uuid,
    pub key: ConversationKey,
    pub created_at: DateTime<Utc>,
    /// Why the checkpoint was taken
    pub reason: String,
    /// Hash of the window the checkpoint covers
    pub content_hash: String,
    /// The raw records, oldest first
    pub records: Vec<MemoryRecord>,
}

impl ConversationCheckpoint {
    pub fn new(
        key: ConversationKey,
        reason: impl Into<String>,
        content_hash: String,
        records: Vec<MemoryRecord>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            created_at,
            reason: reason.into(),
            content_hash,
            records,
        }
    }
}

type CheckpointMap = BTreeMap<ConversationKey, Vec<ConversationCheckpoint>>;

/// Bounded, durable store of checkpoints per conversation
pub struct CheckpointStore {
    checkpoints: Mutex<CheckpointMap>,
    path: Option<PathBuf>,
    max_per_key: usize,
}

impl CheckpointStore {
    pub fn open(storage: &StorageConfig, max_per_key: usize) -> Self {
        let path = storage.file(CHECKPOINTS_FILE);
        let checkpoints: CheckpointMap = match &path {
            Some(path) => storage::read_json_or_default(path, "checkpoints"),
            None => CheckpointMap::new(),
        };

        Self {
            checkpoints: Mutex::new(checkpoints),
            path,
            max_per_key: max_per_key.max(1),
        }
    }

    /// Store a checkpoint, evicting the oldest ones beyond the bound.
    ///
    /// The store is written durably before this returns.
    pub async fn save(&self, checkpoint: ConversationCheckpoint) -> Result<Uuid> {
        let mut checkpoints = self.checkpoints.lock().await;
        let mut next = checkpoints.clone();

        let id = checkpoint.id;
        let key = checkpoint.key.clone();
        let list = next.entry(key.clone()).or_default();
        list.push(checkpoint);
        let excess = list.len().saturating_sub(self.max_per_key);
        if excess > 0 {
            list.drain(..excess);
            debug!("Evicted {} old checkpoints for '{}'", excess, key);
        }

        if let Some(path) = &self.path {
            storage::write_json(path.clone(), &next).await?;
        }
        *checkpoints = next;
        debug!("Saved checkpoint {} for '{}'", id, key);
        Ok(id)
    }

    /// Checkpoints for `key`, oldest first
    pub async fn list(&self, key: &ConversationKey) -> Vec<ConversationCheckpoint> {
        self.checkpoints
            .lock()
            .await
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn latest(&self, key: &ConversationKey) -> Option<ConversationCheckpoint> {
        self.checkpoints
            .lock()
            .await
            .get(key)
            .and_then(|list| list.last().cloned())
    }

    pub async fn get(&self, key: &ConversationKey, id: Uuid) -> Option<ConversationCheckpoint> {
        self.checkpoints
            .lock()
            .await
            .get(key)
            .and_then(|list| list.iter().find(|c| c.id == id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::Scope;

    fn checkpoint(key: &ConversationKey, hash: &str) -> ConversationCheckpoint {
        ConversationCheckpoint::new(key.clone(), "test", hash.to_string(), Vec::new(), Utc::now())
    }

    #[tokio::test]
    async fn test_bounded_per_key_oldest_evicted() {
        let store = CheckpointStore::open(&StorageConfig::in_memory(), 2);
        let key = Scope::channel("g", "c").conversation_key();

        store.save(checkpoint(&key, "h1")).await.unwrap();
        store.save(checkpoint(&key, "h2")).await.unwrap();
        store.save(checkpoint(&key, "h3")).await.unwrap();

        let hashes: Vec<String> = store
            .list(&key)
            .await
            .into_iter()
            .map(|c| c.content_hash)
            .collect();
        assert_eq!(hashes, vec!["h2", "h3"]);
        assert_eq!(store.latest(&key).await.unwrap().content_hash, "h3");
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let store = CheckpointStore::open(&StorageConfig::in_memory(), 1);
        let a = Scope::channel("g", "a").conversation_key();
        let b = Scope::channel("g", "b").conversation_key();

        let id = store.save(checkpoint(&a, "ha")).await.unwrap();
        store.save(checkpoint(&b, "hb")).await.unwrap();

        assert!(store.get(&a, id).await.is_some());
        assert!(store.get(&b, id).await.is_none());
    }

    #[tokio::test]
    async fn test_persisted_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageConfig::at(dir.path());
        let key = Scope::user("u1").conversation_key();

        let store = CheckpointStore::open(&storage, 5);
        let id = store.save(checkpoint(&key, "h1")).await.unwrap();
        drop(store);

        let reopened = CheckpointStore::open(&storage, 5);
        assert_eq!(reopened.get(&key, id).await.unwrap().content_hash, "h1");
    }
}
