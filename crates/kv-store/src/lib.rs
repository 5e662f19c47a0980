//! Persistence collaborator for pipeline artifacts.
//!
//! The store is a flat async string-to-string map. Correctness under
//! concurrent writers comes from key namespacing (see [`keys`]), not locking:
//! every writer owns the keys for its own `(correlation key, entity type)`.
//! Mutations are announced on a broadcast channel so listeners observe each
//! change at least once.

pub mod file;
pub mod keys;
pub mod memory;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

pub use file::FileKvStore;
pub use memory::InMemoryKvStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("stored value for '{key}' is not valid JSON: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode value for '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ChangeKind {
    Set,
    Removed,
}

/// Notification emitted after every successful mutation.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct StoreChange {
    pub key: String,
    pub kind: ChangeKind,
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;
    async fn set(&self, key: &str, value: String) -> StoreResult<()>;
    /// Removes `key`, returning whether it existed.
    async fn remove(&self, key: &str) -> StoreResult<bool>;
    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;
    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}

/// Reads and decodes a JSON value stored under `key`.
pub async fn load_json<T>(store: &dyn KvStore, key: &str) -> StoreResult<Option<T>>
where
    T: DeserializeOwned,
{
    match store.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StoreError::Decode {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

/// Encodes `value` as JSON and stores it under `key`.
pub async fn save_json<T>(store: &dyn KvStore, key: &str, value: &T) -> StoreResult<()>
where
    T: Serialize + ?Sized + Sync,
{
    let raw = serde_json::to_string(value).map_err(|source| StoreError::Encode {
        key: key.to_string(),
        source,
    })?;
    store.set(key, raw).await
}

/// Removes every key starting with `prefix`, returning how many were removed.
pub async fn remove_prefix(store: &dyn KvStore, prefix: &str) -> StoreResult<usize> {
    let mut removed = 0;
    for key in store.keys_with_prefix(prefix).await? {
        if store.remove(&key).await? {
            removed += 1;
        }
    }
    Ok(removed)
}
