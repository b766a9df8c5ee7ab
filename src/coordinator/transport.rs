//! Replica transport
//!
//! The coordinator and synchronizer only ever touch a node's store through
//! this trait. `LocalTransport` serves stores hosted in this process; the
//! HTTP implementation lives in `client.rs`.

use crate::common::{Error, Result};
use crate::node::{Entry, MemStore, NodeStore, VersionVector};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Install an entry on `node` (key taken from the entry)
    async fn put_entry(&self, node: &str, entry: Entry) -> Result<()>;

    async fn get_entry(&self, node: &str, key: &str) -> Result<Option<Entry>>;

    /// Physically remove a key from `node`
    async fn delete_entry(&self, node: &str, key: &str) -> Result<bool>;

    /// Full copy of the node's entries
    async fn entries(&self, node: &str) -> Result<Vec<Entry>>;

    /// Atomically replace the node's contents
    async fn replace_entries(&self, node: &str, entries: Vec<Entry>) -> Result<()>;

    async fn version_vector(&self, node: &str) -> Result<VersionVector>;

    /// Make `node` addressable (creating its store when hosted locally)
    fn attach(&self, node: &str) -> Result<()>;

    /// Stop addressing `node`; its local store, if any, is dropped
    fn detach(&self, node: &str) -> Result<()>;

    fn is_attached(&self, node: &str) -> bool;
}

type StoreFactory = Box<dyn Fn(&str) -> Result<Arc<dyn NodeStore>> + Send + Sync>;

/// In-process transport over a registry of node stores.
///
/// Supports failure injection: a node marked unreachable fails every call
/// with `NodeUnreachable`, and a per-node delay simulates a slow link.
pub struct LocalTransport {
    stores: RwLock<BTreeMap<String, Arc<dyn NodeStore>>>,
    unreachable: RwLock<HashSet<String>>,
    delays: RwLock<HashMap<String, Duration>>,
    factory: StoreFactory,
}

impl LocalTransport {
    /// Transport whose attached nodes get a fresh `MemStore`
    pub fn new() -> Self {
        Self::with_factory(|_| Ok(Arc::new(MemStore::new()) as Arc<dyn NodeStore>))
    }

    pub fn with_factory<F>(factory: F) -> Self
    where
        F: Fn(&str) -> Result<Arc<dyn NodeStore>> + Send + Sync + 'static,
    {
        Self {
            stores: RwLock::new(BTreeMap::new()),
            unreachable: RwLock::new(HashSet::new()),
            delays: RwLock::new(HashMap::new()),
            factory: Box::new(factory),
        }
    }

    /// Register an existing store under `node`
    pub fn insert_store(&self, node: &str, store: Arc<dyn NodeStore>) {
        self.stores
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node.to_string(), store);
    }

    pub fn set_reachable(&self, node: &str, reachable: bool) {
        let mut unreachable = self
            .unreachable
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if reachable {
            unreachable.remove(node);
        } else {
            unreachable.insert(node.to_string());
        }
    }

    pub fn set_delay(&self, node: &str, delay: Option<Duration>) {
        let mut delays = self.delays.write().unwrap_or_else(PoisonError::into_inner);
        match delay {
            Some(d) => delays.insert(node.to_string(), d),
            None => delays.remove(node),
        };
    }

    pub fn hosts(&self, node: &str) -> bool {
        self.stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(node)
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Direct handle on a hosted store, bypassing reachability
    pub fn store(&self, node: &str) -> Option<Arc<dyn NodeStore>> {
        self.stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(node)
            .cloned()
    }

    async fn reach(&self, node: &str) -> Result<Arc<dyn NodeStore>> {
        let delay = self
            .delays
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(node)
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self
            .unreachable
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(node)
        {
            return Err(Error::NodeUnreachable(node.to_string()));
        }
        self.store(node)
            .ok_or_else(|| Error::UnknownNode(node.to_string()))
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn put_entry(&self, node: &str, entry: Entry) -> Result<()> {
        let store = self.reach(node).await?;
        let key = entry.key.clone();
        store.put(&key, entry)
    }

    async fn get_entry(&self, node: &str, key: &str) -> Result<Option<Entry>> {
        self.reach(node).await?.get(key)
    }

    async fn delete_entry(&self, node: &str, key: &str) -> Result<bool> {
        self.reach(node).await?.delete(key)
    }

    async fn entries(&self, node: &str) -> Result<Vec<Entry>> {
        self.reach(node).await?.snapshot()
    }

    async fn replace_entries(&self, node: &str, entries: Vec<Entry>) -> Result<()> {
        self.reach(node).await?.replace_all(entries)
    }

    async fn version_vector(&self, node: &str) -> Result<VersionVector> {
        self.reach(node).await?.version_vector()
    }

    fn attach(&self, node: &str) -> Result<()> {
        if self.hosts(node) {
            return Ok(());
        }
        let store = (self.factory)(node)?;
        self.insert_store(node, store);
        Ok(())
    }

    fn detach(&self, node: &str) -> Result<()> {
        self.stores
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(node);
        self.unreachable
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(node);
        Ok(())
    }

    fn is_attached(&self, node: &str) -> bool {
        self.hosts(node)
    }
}
