//! Replica synchronizer
//!
//! Background anti-entropy between replicas: detect keys whose versions
//! diverge, resolve them last-writer-wins and push the winner to the lagging
//! replica.
//!
//! Last-writer-wins is lossy: when two writes conflict, the one with the older
//! timestamp is silently discarded. Versions are scalar per key rather than
//! per-writer vector clocks, so concurrent writes that share a version number
//! cannot be told apart from sequential ones.

use crate::common::{Clock, HashRing, Result};
use crate::coordinator::transport::Transport;
use crate::node::{Entry, VersionVector};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Outcome of one `sync_data(source, target)` pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Keys missing at the target, copied verbatim
    pub copied: usize,
    /// Diverging keys resolved and written to the target
    pub resolved: usize,
}

/// Outcome of a full sweep over every replica pair
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub pairs_synced: usize,
    pub pairs_failed: usize,
    pub copied: usize,
    pub resolved: usize,
    pub tombstones_collected: usize,
}

impl SweepReport {
    pub fn changes(&self) -> usize {
        self.copied + self.resolved + self.tombstones_collected
    }
}

/// Merge two versions of the same key.
///
/// The winner is the entry with the newer timestamp, then the higher version;
/// a full tie falls back to comparing values so every replica picks the same
/// side. The result carries the higher of both versions so no replica's
/// version goes backwards.
pub fn resolve_entries(a: &Entry, b: &Entry) -> Entry {
    let winner = match a.lww_cmp(b) {
        Ordering::Greater => a,
        Ordering::Less => b,
        Ordering::Equal if a.value >= b.value => a,
        Ordering::Equal => b,
    };
    let mut resolved = winner.clone();
    resolved.version = a.version.max(b.version);
    resolved
}

pub struct Synchronizer {
    transport: Arc<dyn Transport>,
    ring: Arc<RwLock<HashRing>>,
    clock: Arc<dyn Clock>,
    replication_factor: usize,
    tombstone_grace: f64,
    observed: RwLock<HashMap<String, VersionVector>>,
}

impl Synchronizer {
    pub fn new(
        transport: Arc<dyn Transport>,
        ring: Arc<RwLock<HashRing>>,
        clock: Arc<dyn Clock>,
        replication_factor: usize,
        tombstone_grace: Duration,
    ) -> Self {
        Self {
            transport,
            ring,
            clock,
            replication_factor,
            tombstone_grace: tombstone_grace.as_secs_f64(),
            observed: RwLock::new(HashMap::new()),
        }
    }

    /// Highest version observed per key on `node`. Never decreases between
    /// calls, even if the node's store is later wiped or restored.
    pub async fn get_version_vector(&self, node: &str) -> Result<VersionVector> {
        let current = self.transport.version_vector(node).await?;
        let mut observed = self.observed.write().unwrap_or_else(PoisonError::into_inner);
        let vv = observed.entry(node.to_string()).or_default();
        vv.merge(&current);
        Ok(vv.clone())
    }

    /// Keys both nodes hold with different versions. Flags possible divergence
    /// only; it says nothing about causality.
    pub async fn detect_conflicts(&self, node_a: &str, node_b: &str) -> Result<Vec<String>> {
        let a = self.transport.version_vector(node_a).await?;
        let b = self.transport.version_vector(node_b).await?;
        self.observe_all(node_a, &a);
        self.observe_all(node_b, &b);

        Ok(a.iter()
            .filter(|(key, va)| {
                let vb = b.get(key);
                *va != 0 && vb != 0 && *va != vb
            })
            .map(|(key, _)| key.to_string())
            .collect())
    }

    /// Winning entry for `key` across the two nodes, or `None` if neither holds it.
    pub async fn resolve_conflict(
        &self,
        key: &str,
        node_a: &str,
        node_b: &str,
    ) -> Result<Option<Entry>> {
        let a = self.transport.get_entry(node_a, key).await?;
        let b = self.transport.get_entry(node_b, key).await?;
        Ok(match (a, b) {
            (Some(a), Some(b)) => Some(resolve_entries(&a, &b)),
            (Some(e), None) | (None, Some(e)) => Some(e),
            (None, None) => None,
        })
    }

    /// Push `source`'s entries into `target` for every key `target` replicates.
    ///
    /// Missing keys are copied; keys whose versions (or same-version contents)
    /// differ are resolved and the winner is written to `target`.
    pub async fn sync_data(&self, source: &str, target: &str) -> Result<SyncReport> {
        let source_entries = self.transport.entries(source).await?;
        let target_entries: HashMap<String, Entry> = self
            .transport
            .entries(target)
            .await?
            .into_iter()
            .map(|e| (e.key.clone(), e))
            .collect();
        let target_vv: VersionVector = target_entries
            .values()
            .map(|e| (e.key.clone(), e.version))
            .collect();

        let mut report = SyncReport::default();
        for entry in self.owned_by(target, source_entries) {
            let key = entry.key.clone();
            let update = match target_entries.get(&key) {
                None => {
                    report.copied += 1;
                    Some(entry)
                }
                Some(current)
                    if target_vv.get(&key) != entry.version || !current.same_write(&entry) =>
                {
                    let resolved = resolve_entries(&entry, current);
                    if resolved.same_write(current) {
                        None
                    } else {
                        report.resolved += 1;
                        Some(resolved)
                    }
                }
                Some(_) => None,
            };

            if let Some(update) = update {
                let version = update.version;
                self.transport.put_entry(target, update).await?;
                self.observe(target, &key, version);
            }
        }

        if report.copied + report.resolved > 0 {
            tracing::debug!(
                "Synced {} -> {}: {} copied, {} resolved",
                source,
                target,
                report.copied,
                report.resolved
            );
        }
        Ok(report)
    }

    /// One anti-entropy pass over every ordered pair of ring members, followed
    /// by tombstone collection. Pair failures are logged and left for the next
    /// sweep.
    pub async fn run_sweep(&self) -> Result<SweepReport> {
        let nodes = self.ring_nodes();
        let mut report = SweepReport::default();

        for source in &nodes {
            for target in &nodes {
                if source == target {
                    continue;
                }
                match self.sync_data(source, target).await {
                    Ok(r) => {
                        report.pairs_synced += 1;
                        report.copied += r.copied;
                        report.resolved += r.resolved;
                    }
                    Err(e) => {
                        report.pairs_failed += 1;
                        tracing::warn!("Sync {} -> {} failed: {}", source, target, e);
                    }
                }
            }
        }

        if report.pairs_failed == 0 {
            match self.collect_tombstones(&nodes).await {
                Ok(n) => report.tombstones_collected = n,
                Err(e) => tracing::warn!("Tombstone collection failed: {}", e),
            }
        }

        if report.changes() > 0 {
            tracing::info!(
                "Sync sweep: {} copied, {} resolved, {} tombstones collected",
                report.copied,
                report.resolved,
                report.tombstones_collected
            );
        }
        Ok(report)
    }

    /// Drop tombstones that every replica of the key holds at the same version
    /// and that are older than the grace period.
    async fn collect_tombstones(&self, nodes: &[String]) -> Result<usize> {
        let mut snapshots: HashMap<&str, HashMap<String, Entry>> = HashMap::new();
        for node in nodes {
            let entries = self.transport.entries(node).await?;
            snapshots.insert(
                node.as_str(),
                entries.into_iter().map(|e| (e.key.clone(), e)).collect(),
            );
        }

        let cutoff = self.clock.now() - self.tombstone_grace;
        let mut tombstones: BTreeMap<&str, u64> = BTreeMap::new();
        for entries in snapshots.values() {
            for entry in entries.values() {
                if entry.is_tombstone() && entry.timestamp <= cutoff {
                    tombstones.entry(entry.key.as_str()).or_insert(entry.version);
                }
            }
        }

        let mut collected = 0;
        for (key, version) in tombstones {
            let replicas = {
                let ring = self.ring.read().unwrap_or_else(PoisonError::into_inner);
                ring.get_replicas(key, self.replication_factor)?
            };
            let all_replicas_hold = replicas.iter().all(|node| {
                snapshots
                    .get(node.as_str())
                    .and_then(|entries| entries.get(key))
                    .is_some_and(|e| e.is_tombstone() && e.version == version)
            });
            let holders: Vec<(&str, &Entry)> = snapshots
                .iter()
                .filter_map(|(node, entries)| entries.get(key).map(|e| (*node, e)))
                .collect();
            if !all_replicas_hold || holders.iter().any(|(_, e)| !e.is_tombstone()) {
                continue;
            }

            for (node, _) in holders {
                self.transport.delete_entry(node, key).await?;
            }
            collected += 1;
        }
        Ok(collected)
    }

    /// Start periodic sweeps on the tokio runtime
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_sweep().await {
                    tracing::warn!("Sync sweep failed: {}", e);
                }
            }
        })
    }

    /// Forget everything observed about `node` (after it leaves the cluster)
    pub fn forget(&self, node: &str) {
        self.observed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(node);
    }

    /// Forget all observed versions (after a restore rewinds the stores)
    pub fn reset(&self) {
        self.observed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn observe(&self, node: &str, key: &str, version: u64) {
        let mut observed = self.observed.write().unwrap_or_else(PoisonError::into_inner);
        observed.entry(node.to_string()).or_default().observe(key, version);
    }

    fn observe_all(&self, node: &str, vv: &VersionVector) {
        let mut observed = self.observed.write().unwrap_or_else(PoisonError::into_inner);
        observed.entry(node.to_string()).or_default().merge(vv);
    }

    fn ring_nodes(&self) -> Vec<String> {
        let ring = self.ring.read().unwrap_or_else(PoisonError::into_inner);
        ring.nodes().map(String::from).collect()
    }

    fn owned_by(&self, target: &str, entries: Vec<Entry>) -> Vec<Entry> {
        let ring = self.ring.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .into_iter()
            .filter(|e| {
                ring.get_replicas(&e.key, self.replication_factor)
                    .map(|replicas| replicas.iter().any(|n| n == target))
                    .unwrap_or(false)
            })
            .collect()
    }
}
