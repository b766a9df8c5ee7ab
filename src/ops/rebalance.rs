//! Data movement on membership change
//!
//! Rebalancing runs in two passes around the ring swap: `copy_to_owners`
//! against the new ring before it is installed, then `drop_non_owners` once
//! it is live. Copies are resolved last-writer-wins, so a node never loses a
//! newer entry to a stale one. A node only drops a key after every new owner
//! holds it.

use crate::common::{HashRing, Result};
use crate::coordinator::transport::Transport;
use crate::node::Entry;
use crate::ops::sync::resolve_entries;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RebalanceReport {
    /// Distinct keys seen across the source nodes
    pub keys: usize,
    /// Entries written to a new owner
    pub copied: usize,
    /// Entries removed from nodes that no longer own them
    pub dropped: usize,
    /// Copies that could not be delivered
    pub failed: usize,
}

/// Copy every key held by `sources` to its replica set under `ring`.
///
/// Unreachable sources are skipped; their keys are left to the synchronizer.
pub async fn copy_to_owners(
    transport: &dyn Transport,
    ring: &HashRing,
    replication_factor: usize,
    sources: &[String],
) -> Result<RebalanceReport> {
    let mut holdings: HashMap<&str, HashMap<String, Entry>> = HashMap::new();
    for node in sources {
        match transport.entries(node).await {
            Ok(entries) => {
                holdings.insert(
                    node.as_str(),
                    entries.into_iter().map(|e| (e.key.clone(), e)).collect(),
                );
            }
            Err(e) => tracing::warn!("Rebalance: skipping source {}: {}", node, e),
        }
    }

    let mut best: BTreeMap<&str, Entry> = BTreeMap::new();
    for entries in holdings.values() {
        for (key, entry) in entries {
            let merged = match best.get(key.as_str()) {
                Some(current) => resolve_entries(current, entry),
                None => entry.clone(),
            };
            best.insert(key.as_str(), merged);
        }
    }

    let mut report = RebalanceReport {
        keys: best.len(),
        ..Default::default()
    };
    if ring.is_empty() {
        return Ok(report);
    }

    for (key, entry) in &best {
        for owner in ring.get_replicas(key, replication_factor)? {
            let current = holdings.get(owner.as_str()).and_then(|h| h.get(*key));
            if current.is_some_and(|c| c.same_write(entry)) {
                continue;
            }
            match transport.put_entry(&owner, entry.clone()).await {
                Ok(()) => report.copied += 1,
                Err(e) => {
                    tracing::warn!("Rebalance: copy of {} to {} failed: {}", key, owner, e);
                    report.failed += 1;
                }
            }
        }
    }
    Ok(report)
}

/// Remove keys from `nodes` that are no longer in their replica set under `ring`.
///
/// Writes can race the ring swap, so each entry is first handed to any owner
/// that lacks it; the entry is only dropped once every owner holds it.
pub async fn drop_non_owners(
    transport: &dyn Transport,
    ring: &HashRing,
    replication_factor: usize,
    nodes: &[String],
) -> Result<usize> {
    let mut dropped = 0;
    for node in nodes {
        let entries = match transport.entries(node).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Rebalance: cannot scan {}: {}", node, e);
                continue;
            }
        };
        for entry in entries {
            let owners = if ring.is_empty() {
                Vec::new()
            } else {
                ring.get_replicas(&entry.key, replication_factor)?
            };
            if owners.iter().any(|o| o == node) {
                continue;
            }
            if !hand_off(transport, &owners, &entry).await {
                continue;
            }
            if transport.delete_entry(node, &entry.key).await? {
                dropped += 1;
            }
        }
    }
    Ok(dropped)
}

/// Make sure every owner holds `entry` or something newer
async fn hand_off(transport: &dyn Transport, owners: &[String], entry: &Entry) -> bool {
    for owner in owners {
        let current = match transport.get_entry(owner, &entry.key).await {
            Ok(current) => current,
            Err(e) => {
                tracing::warn!("Rebalance: cannot check {} on {}: {}", entry.key, owner, e);
                return false;
            }
        };
        let update = match current {
            Some(current) if current.same_write(entry) => continue,
            Some(current) => {
                let resolved = resolve_entries(entry, &current);
                if resolved.same_write(&current) {
                    continue;
                }
                resolved
            }
            None => entry.clone(),
        };
        if let Err(e) = transport.put_entry(owner, update).await {
            tracing::warn!("Rebalance: hand-off of {} to {} failed: {}", entry.key, owner, e);
            return false;
        }
    }
    true
}
