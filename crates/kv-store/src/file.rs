use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::to_writer_pretty;
use tokio::sync::broadcast;
use tracing::debug;

use crate::{ChangeKind, KvStore, StoreChange, StoreError, StoreResult};

const CHANGE_BUFFER: usize = 256;

/// Store persisted as a single pretty-printed JSON object on disk.
///
/// The whole map is rewritten on every mutation through a sibling temp file
/// and a rename, so a crash never leaves a half-written snapshot behind.
pub struct FileKvStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
    changes: broadcast::Sender<StoreChange>,
}

impl FileKvStore {
    /// Opens the snapshot at `path`, starting empty if it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw).map_err(|source| StoreError::Decode {
                    key: path.display().to_string(),
                    source,
                })?
            }
        } else {
            BTreeMap::new()
        };
        debug!(target: "kv_store", path = %path.display(), entries = entries.len(), "opened file store");
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Ok(Self {
            path,
            entries: Mutex::new(entries),
            changes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            to_writer_pretty(&mut writer, entries)
                .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)
    }

    fn announce(&self, key: &str, kind: ChangeKind) {
        let _ = self.changes.send(StoreChange {
            key: key.to_string(),
            kind,
        });
    }
}

#[async_trait]
impl KvStore for FileKvStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> StoreResult<()> {
        {
            let mut guard = self.entries.lock();
            let previous = guard.insert(key.to_string(), value);
            if let Err(err) = self.persist(&guard) {
                // Memory never runs ahead of the snapshot on disk.
                match previous {
                    Some(previous) => guard.insert(key.to_string(), previous),
                    None => guard.remove(key),
                };
                return Err(err.into());
            }
        }
        self.announce(key, ChangeKind::Set);
        Ok(())
    }

    async fn remove(&self, key: &str) -> StoreResult<bool> {
        {
            let mut guard = self.entries.lock();
            let Some(previous) = guard.remove(key) else {
                return Ok(false);
            };
            if let Err(err) = self.persist(&guard) {
                guard.insert(key.to_string(), previous);
                return Err(err.into());
            }
        }
        self.announce(key, ChangeKind::Removed);
        Ok(true)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .entries
            .lock()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}
