use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::{ChangeKind, KvStore, StoreChange, StoreResult};

const CHANGE_BUFFER: usize = 256;

/// Process-local store; contents vanish with the process.
pub struct InMemoryKvStore {
    entries: DashMap<String, String>,
    changes: broadcast::Sender<StoreChange>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            entries: DashMap::new(),
            changes,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn announce(&self, key: &str, kind: ChangeKind) {
        let _ = self.changes.send(StoreChange {
            key: key.to_string(),
            kind,
        });
    }
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: String) -> StoreResult<()> {
        self.entries.insert(key.to_string(), value);
        self.announce(key, ChangeKind::Set);
        Ok(())
    }

    async fn remove(&self, key: &str) -> StoreResult<bool> {
        let existed = self.entries.remove(key).is_some();
        if existed {
            self.announce(key, ChangeKind::Removed);
        }
        Ok(existed)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}
