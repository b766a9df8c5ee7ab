//! Replication coordinator
//!
//! Executes a single put/get/delete across the replica set chosen by the hash
//! ring. Writes are leaderless: every replica gets the entry in parallel and
//! the request completes once enough acknowledgements arrive.
//!
//! Request lifecycle: `Dispatched → AwaitingAcks → Satisfied | Failed`.
//!
//! Replica writes run as detached tasks. A request that fails or whose caller
//! goes away stops waiting, but replicas that already stored the entry keep
//! it (at-least-once); the synchronizer repairs the divergence later.

use crate::common::{validate_key, Clock, Error, HashRing, Result};
use crate::coordinator::oplog::{OpType, OperationLog, OperationRecord};
use crate::coordinator::transport::Transport;
use crate::node::{Entry, META_CLIENT, META_ORIGIN};
use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;

/// Consistency level requested by the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Consistency {
    /// Majority of the replica set must acknowledge / answer
    #[default]
    Strong,
    /// One acknowledgement / first answer is enough
    Eventual,
}

impl std::fmt::Display for Consistency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Consistency::Strong => write!(f, "strong"),
            Consistency::Eventual => write!(f, "eventual"),
        }
    }
}

impl std::str::FromStr for Consistency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "strong" | "quorum" => Ok(Consistency::Strong),
            "eventual" | "one" => Ok(Consistency::Eventual),
            other => Err(Error::InvalidConfig(format!(
                "unknown consistency level: {}",
                other
            ))),
        }
    }
}

/// Per-request state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Dispatched,
    AwaitingAcks,
    Satisfied,
    Failed,
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestState::Dispatched => write!(f, "dispatched"),
            RequestState::AwaitingAcks => write!(f, "awaiting_acks"),
            RequestState::Satisfied => write!(f, "satisfied"),
            RequestState::Failed => write!(f, "failed"),
        }
    }
}

/// Strict majority of a replica set of size `replicas`
pub fn quorum(replicas: usize) -> usize {
    replicas / 2 + 1
}

pub struct ReplicationCoordinator {
    node_id: String,
    ring: Arc<RwLock<HashRing>>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    oplog: Arc<OperationLog>,
    replication_factor: usize,
    timeout: Duration,
}

impl ReplicationCoordinator {
    pub fn new(
        node_id: String,
        ring: Arc<RwLock<HashRing>>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        oplog: Arc<OperationLog>,
        replication_factor: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            node_id,
            ring,
            transport,
            clock,
            oplog,
            replication_factor,
            timeout,
        }
    }

    pub fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Ordered replica set for `key` (primary first)
    pub fn replica_set(&self, key: &str) -> Result<Vec<String>> {
        let replicas = {
            let ring = self.ring.read().unwrap_or_else(PoisonError::into_inner);
            ring.get_replicas(key, self.replication_factor)?
        };
        if replicas.is_empty() {
            return Err(Error::NoReplicasAvailable(key.to_string()));
        }
        Ok(replicas)
    }

    // -----------------------------------------------------------------------
    // PUT / DELETE
    // -----------------------------------------------------------------------

    /// Write `value` under `key`. Returns the entry that was dispatched.
    pub async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        consistency: Consistency,
        client_id: &str,
    ) -> Result<Entry> {
        let mut record = OperationRecord::new(OpType::Write, key, client_id, consistency);
        let result = self
            .replicate(key, Some(value), consistency, client_id, &mut record)
            .await;
        self.finish(record, &result);
        result
    }

    /// Delete `key` by writing a versioned tombstone.
    pub async fn delete(&self, key: &str, consistency: Consistency, client_id: &str) -> Result<Entry> {
        let mut record = OperationRecord::new(OpType::Delete, key, client_id, consistency);
        let result = self
            .replicate(key, None, consistency, client_id, &mut record)
            .await;
        self.finish(record, &result);
        result
    }

    async fn replicate(
        &self,
        key: &str,
        value: Option<Vec<u8>>,
        consistency: Consistency,
        client_id: &str,
        record: &mut OperationRecord,
    ) -> Result<Entry> {
        validate_key(key)?;
        let replicas = self.replica_set(key)?;
        let needed = match consistency {
            Consistency::Strong => quorum(replicas.len()),
            Consistency::Eventual => 1,
        };

        // One deadline covers the version read and the acknowledgements.
        let deadline = Instant::now() + self.timeout;

        // Next version is computed from what the replicas report right now.
        // Two concurrent writers may pick the same number.
        let version = self.latest_version(key, &replicas, needed, deadline).await + 1;
        let timestamp = self.clock.now();
        let entry = match value {
            Some(value) => Entry::new(key, value, timestamp, version),
            None => Entry::tombstone(key, timestamp, version),
        }
        .with_metadata(META_ORIGIN, self.node_id.clone())
        .with_metadata(META_CLIENT, client_id);
        record.version = Some(version);

        let mut state = RequestState::Dispatched;
        let mut acks = FuturesUnordered::new();
        for node in &replicas {
            let transport = self.transport.clone();
            let node = node.clone();
            let entry = entry.clone();
            acks.push(tokio::spawn(async move {
                let result = transport.put_entry(&node, entry).await;
                (node, result)
            }));
        }
        tracing::debug!(key, version, replicas = replicas.len(), needed, %state, "write dispatched");

        state = RequestState::AwaitingAcks;
        tracing::trace!(key, %state);
        let mut got = 0usize;
        while got < needed {
            match tokio::time::timeout_at(deadline, acks.next()).await {
                Ok(Some(Ok((_, Ok(()))))) => got += 1,
                Ok(Some(Ok((node, Err(e))))) => {
                    tracing::warn!("Replica {} rejected write of {}: {}", node, key, e);
                }
                Ok(Some(Err(e))) => tracing::warn!("Replica write task failed: {}", e),
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!("Write of {} timed out after {:?}", key, self.timeout);
                    break;
                }
            }
        }
        record.acks = got;

        state = if got >= needed {
            RequestState::Satisfied
        } else {
            RequestState::Failed
        };
        tracing::debug!(key, version, acks = got, %state, "write finished");

        match state {
            RequestState::Satisfied => Ok(entry),
            _ => Err(Error::QuorumNotReached { needed, got }),
        }
    }

    /// Highest version held for `key` among the first `needed` replicas to
    /// answer (0 if none). Stops early at `deadline`.
    async fn latest_version(
        &self,
        key: &str,
        replicas: &[String],
        needed: usize,
        deadline: Instant,
    ) -> u64 {
        let mut reads: FuturesUnordered<_> = replicas
            .iter()
            .map(|node| self.transport.get_entry(node, key))
            .collect();

        let mut max_version = 0;
        let mut answered = 0usize;
        while answered < needed {
            match tokio::time::timeout_at(deadline, reads.next()).await {
                Ok(Some(Ok(entry))) => {
                    answered += 1;
                    if let Some(entry) = entry {
                        max_version = max_version.max(entry.version);
                    }
                }
                Ok(Some(Err(_))) => {}
                Ok(None) | Err(_) => break,
            }
        }
        max_version
    }

    // -----------------------------------------------------------------------
    // GET
    // -----------------------------------------------------------------------

    /// Read `key`. Tombstones read as `KeyNotFound`.
    pub async fn get(&self, key: &str, consistency: Consistency, client_id: &str) -> Result<Entry> {
        let mut record = OperationRecord::new(OpType::Read, key, client_id, consistency);
        let result = match consistency {
            Consistency::Strong => self.get_strong(key, &mut record).await,
            Consistency::Eventual => self.get_eventual(key, &mut record).await,
        };
        if let Ok(entry) = &result {
            record.version = Some(entry.version);
        }
        self.finish(record, &result);
        result
    }

    async fn get_strong(&self, key: &str, record: &mut OperationRecord) -> Result<Entry> {
        validate_key(key)?;
        let replicas = self.replica_set(key)?;
        let needed = quorum(replicas.len());
        let deadline = Instant::now() + self.timeout;

        let mut reads = FuturesUnordered::new();
        for node in &replicas {
            let transport = self.transport.clone();
            let node = node.clone();
            let key = key.to_string();
            reads.push(tokio::spawn(async move {
                let result = transport.get_entry(&node, &key).await;
                (node, result)
            }));
        }

        let mut responses: Vec<(String, Option<Entry>)> = Vec::with_capacity(replicas.len());
        while responses.len() < needed {
            match tokio::time::timeout_at(deadline, reads.next()).await {
                Ok(Some(Ok((node, Ok(entry))))) => responses.push((node, entry)),
                Ok(Some(Ok((node, Err(e))))) => {
                    tracing::warn!("Replica {} failed read of {}: {}", node, key, e);
                }
                Ok(Some(Err(e))) => tracing::warn!("Replica read task failed: {}", e),
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!("Read of {} timed out after {:?}", key, self.timeout);
                    break;
                }
            }
        }
        record.acks = responses.len();

        if responses.len() < needed {
            return Err(Error::QuorumNotReached {
                needed,
                got: responses.len(),
            });
        }

        match newest(responses) {
            Some(entry) if !entry.is_tombstone() => Ok(entry),
            _ => Err(Error::KeyNotFound(key.to_string())),
        }
    }

    async fn get_eventual(&self, key: &str, record: &mut OperationRecord) -> Result<Entry> {
        validate_key(key)?;
        let replicas = self.replica_set(key)?;
        let deadline = Instant::now() + self.timeout;

        let mut reads = FuturesUnordered::new();
        for node in &replicas {
            let transport = self.transport.clone();
            let node = node.clone();
            let key = key.to_string();
            reads.push(tokio::spawn(async move {
                let result = transport.get_entry(&node, &key).await;
                (node, result)
            }));
        }

        // First replica to answer with an entry wins; slow replicas are not waited on
        let mut answered = 0usize;
        loop {
            match tokio::time::timeout_at(deadline, reads.next()).await {
                Ok(Some(Ok((_, Ok(Some(entry)))))) => {
                    record.acks = answered + 1;
                    if entry.is_tombstone() {
                        return Err(Error::KeyNotFound(key.to_string()));
                    }
                    return Ok(entry);
                }
                Ok(Some(Ok((_, Ok(None))))) => answered += 1,
                Ok(Some(Ok((node, Err(e))))) => {
                    tracing::warn!("Replica {} failed read of {}: {}", node, key, e);
                }
                Ok(Some(Err(e))) => tracing::warn!("Replica read task failed: {}", e),
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!("Read of {} timed out after {:?}", key, self.timeout);
                    break;
                }
            }
        }
        record.acks = answered;

        if answered == 0 {
            return Err(Error::QuorumNotReached { needed: 1, got: 0 });
        }
        Err(Error::KeyNotFound(key.to_string()))
    }

    fn finish<T>(&self, mut record: OperationRecord, result: &Result<T>) {
        if let Err(e) = result {
            record.outcome = e.kind().to_string();
        }
        self.oplog.append(record);
    }
}

/// Pick the winning response of a strong read: highest timestamp, then
/// highest version, then smallest node id.
fn newest(responses: Vec<(String, Option<Entry>)>) -> Option<Entry> {
    responses
        .into_iter()
        .filter_map(|(node, entry)| entry.map(|e| (node, e)))
        .max_by(|(node_a, a), (node_b, b)| a.lww_cmp(b).then_with(|| node_b.cmp(node_a)))
        .map(|(_, entry)| entry)
}
