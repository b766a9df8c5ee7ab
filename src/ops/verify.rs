//! Verify cluster integrity
//!
//! Read-only scan comparing every node's contents with the placement the
//! ring prescribes.

use crate::common::{HashRing, Result};
use crate::coordinator::transport::Transport;
use crate::node::Entry;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub total_keys: usize,
    /// Present on every replica with one agreed write
    pub healthy: usize,
    /// Missing from at least one replica
    pub under_replicated: usize,
    /// Replicas hold different writes
    pub divergent: usize,
    /// Held by a node outside the replica set
    pub misplaced: usize,
    pub unreachable_nodes: Vec<String>,
}

impl VerifyReport {
    pub fn is_healthy(&self) -> bool {
        self.healthy == self.total_keys && self.unreachable_nodes.is_empty()
    }
}

pub async fn verify_cluster(
    transport: &dyn Transport,
    ring: &HashRing,
    replication_factor: usize,
) -> Result<VerifyReport> {
    tracing::info!("Starting cluster verification");

    let mut report = VerifyReport::default();
    let mut holdings: BTreeMap<String, BTreeMap<String, Entry>> = BTreeMap::new();
    for node in ring.nodes() {
        match transport.entries(node).await {
            Ok(entries) => {
                holdings.insert(
                    node.to_string(),
                    entries.into_iter().map(|e| (e.key.clone(), e)).collect(),
                );
            }
            Err(e) => {
                tracing::warn!("Verify: {} unreachable: {}", node, e);
                report.unreachable_nodes.push(node.to_string());
            }
        }
    }

    let keys: BTreeSet<&str> = holdings
        .values()
        .flat_map(|entries| entries.keys().map(String::as_str))
        .collect();
    report.total_keys = keys.len();

    for key in keys {
        let owners = ring.get_replicas(key, replication_factor)?;
        let copies: Vec<Option<&Entry>> = owners
            .iter()
            .filter_map(|owner| holdings.get(owner))
            .map(|entries| entries.get(key))
            .collect();

        let missing = copies.iter().any(Option::is_none);
        let present: Vec<&Entry> = copies.into_iter().flatten().collect();
        let diverges = present.windows(2).any(|w| !w[0].same_write(w[1]));
        let misplaced = holdings
            .iter()
            .any(|(node, entries)| entries.contains_key(key) && !owners.contains(node));

        if missing {
            report.under_replicated += 1;
        }
        if diverges {
            report.divergent += 1;
        }
        if misplaced {
            report.misplaced += 1;
        }
        if !missing && !diverges && !misplaced {
            report.healthy += 1;
        }
    }

    tracing::info!(
        "Verification done: {}/{} keys healthy",
        report.healthy,
        report.total_keys
    );
    Ok(report)
}
