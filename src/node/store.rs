//! Per-node storage: key → versioned `Entry`
//!
//! In-memory by default; Sled behind the `sled-backend` feature. A store has
//! no network behaviour, merging happens in the synchronizer before `put`.

use crate::common::Result;
use crate::node::{Entry, VersionVector};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

/// Trait for node storage backends
pub trait NodeStore: Send + Sync {
    /// Install `entry` under `key`, replacing any previous entry wholesale.
    ///
    /// The stored version never goes backwards: an incoming entry with a lower
    /// version than the current one is stored with the current version.
    fn put(&self, key: &str, entry: Entry) -> Result<()>;

    fn get(&self, key: &str) -> Result<Option<Entry>>;

    /// Physically remove a key (rebalancing, tombstone GC). Returns whether it existed.
    fn delete(&self, key: &str) -> Result<bool>;

    /// Point-in-time copy of every entry, ordered by key
    fn snapshot(&self) -> Result<Vec<Entry>>;

    /// Atomically replace the whole contents
    fn replace_all(&self, entries: Vec<Entry>) -> Result<()>;

    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Versions currently held, per key
    fn version_vector(&self) -> Result<VersionVector> {
        Ok(self
            .snapshot()?
            .into_iter()
            .map(|e| (e.key, e.version))
            .collect())
    }
}

fn clamp_version(mut entry: Entry, current: Option<&Entry>) -> Entry {
    if let Some(current) = current {
        if current.version > entry.version {
            entry.version = current.version;
        }
    }
    entry
}

/// In-memory store (default)
#[derive(Default)]
pub struct MemStore {
    map: RwLock<BTreeMap<String, Entry>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NodeStore for MemStore {
    fn put(&self, key: &str, entry: Entry) -> Result<()> {
        let mut map = self.map.write().unwrap_or_else(PoisonError::into_inner);
        let entry = clamp_version(entry, map.get(key));
        map.insert(key.to_string(), entry);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Entry>> {
        let map = self.map.read().unwrap_or_else(PoisonError::into_inner);
        Ok(map.get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let mut map = self.map.write().unwrap_or_else(PoisonError::into_inner);
        Ok(map.remove(key).is_some())
    }

    fn snapshot(&self) -> Result<Vec<Entry>> {
        let map = self.map.read().unwrap_or_else(PoisonError::into_inner);
        Ok(map.values().cloned().collect())
    }

    fn replace_all(&self, entries: Vec<Entry>) -> Result<()> {
        let staged: BTreeMap<String, Entry> =
            entries.into_iter().map(|e| (e.key.clone(), e)).collect();
        let mut map = self.map.write().unwrap_or_else(PoisonError::into_inner);
        *map = staged;
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        let map = self.map.read().unwrap_or_else(PoisonError::into_inner);
        Ok(map.len())
    }
}

/// Sled store
#[cfg(feature = "sled-backend")]
pub struct SledStore {
    db: sled::Db,
}

#[cfg(feature = "sled-backend")]
impl SledStore {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    fn decode(bytes: &[u8]) -> Result<Entry> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(feature = "sled-backend")]
impl NodeStore for SledStore {
    fn put(&self, key: &str, entry: Entry) -> Result<()> {
        let mut encode_err = None;
        self.db.fetch_and_update(key, |current| {
            let current = current.and_then(|bytes| Self::decode(bytes).ok());
            let entry = clamp_version(entry.clone(), current.as_ref());
            match bincode::serialize(&entry) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    encode_err = Some(e);
                    current.and_then(|c| bincode::serialize(&c).ok())
                }
            }
        })?;
        match encode_err {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn get(&self, key: &str) -> Result<Option<Entry>> {
        match self.db.get(key)? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.db.remove(key)?.is_some())
    }

    fn snapshot(&self) -> Result<Vec<Entry>> {
        self.db
            .iter()
            .values()
            .map(|item| Self::decode(&item?))
            .collect()
    }

    fn replace_all(&self, entries: Vec<Entry>) -> Result<()> {
        let mut batch = sled::Batch::default();
        for key in self.db.iter().keys() {
            batch.remove(key?);
        }
        for entry in &entries {
            batch.insert(entry.key.as_bytes(), bincode::serialize(entry)?);
        }
        self.db.apply_batch(batch)?;
        self.db.flush()?;
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.db.len())
    }
}
