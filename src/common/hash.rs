//! Hashing utilities for ringkv
//!
//! - BLAKE3 truncated to 128 bits as the ring hash (stable across restarts)
//! - `HashRing`: consistent hashing with virtual nodes for replica placement

use std::collections::{BTreeMap, BTreeSet};

/// Default ring positions per physical node
pub const DEFAULT_VIRTUAL_NODES: usize = 150;

/// Hash a string onto the ring (first 16 bytes of BLAKE3, big-endian)
pub fn ring_hash(data: &str) -> u128 {
    let hash = blake3::hash(data.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash.as_bytes()[..16]);
    u128::from_be_bytes(bytes)
}

/// Consistent hash ring
///
/// Each node owns `virtual_nodes` positions keyed by `ring_hash("{node}-{i}")`.
/// A key is owned by the first position clockwise from `ring_hash(key)`.
#[derive(Debug, Clone)]
pub struct HashRing {
    virtual_nodes: usize,
    ring: BTreeMap<u128, String>,
    nodes: BTreeSet<String>,
}

impl HashRing {
    pub fn new(virtual_nodes: usize) -> Self {
        Self {
            virtual_nodes: virtual_nodes.max(1),
            ring: BTreeMap::new(),
            nodes: BTreeSet::new(),
        }
    }

    /// Add a node. Returns false if it was already present.
    pub fn add_node(&mut self, node_id: &str) -> bool {
        if !self.nodes.insert(node_id.to_string()) {
            return false;
        }
        for i in 0..self.virtual_nodes {
            let position = ring_hash(&format!("{}-{}", node_id, i));
            self.ring.insert(position, node_id.to_string());
        }
        true
    }

    /// Remove a node and all of its positions. Returns false if unknown.
    pub fn remove_node(&mut self, node_id: &str) -> bool {
        if !self.nodes.remove(node_id) {
            return false;
        }
        self.ring.retain(|_, owner| owner != node_id);
        // A colliding position may have been overwritten by this node; give
        // the survivors their positions back.
        for node in &self.nodes {
            for i in 0..self.virtual_nodes {
                let position = ring_hash(&format!("{}-{}", node, i));
                self.ring.entry(position).or_insert_with(|| node.clone());
            }
        }
        true
    }

    /// Owner of the first position at or after `hash(key)`, wrapping around.
    pub fn get_node(&self, key: &str) -> crate::Result<&str> {
        let h = ring_hash(key);
        self.ring
            .range(h..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, node)| node.as_str())
            .ok_or(crate::Error::EmptyRing)
    }

    /// Walk clockwise from `hash(key)` collecting up to `n` distinct nodes.
    /// The first element is the primary.
    pub fn get_replicas(&self, key: &str, n: usize) -> crate::Result<Vec<String>> {
        if self.ring.is_empty() {
            return Err(crate::Error::EmptyRing);
        }
        let h = ring_hash(key);
        let wanted = n.min(self.nodes.len());
        let mut replicas: Vec<String> = Vec::with_capacity(wanted);
        for (_, node) in self.ring.range(h..).chain(self.ring.range(..h)) {
            if replicas.len() >= wanted {
                break;
            }
            if !replicas.iter().any(|r| r == node) {
                replicas.push(node.clone());
            }
        }
        Ok(replicas)
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.nodes.contains(node_id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|s| s.as_str())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn virtual_nodes(&self) -> usize {
        self.virtual_nodes
    }

    /// Number of ring positions (may be below nodes * virtual_nodes on collision)
    pub fn position_count(&self) -> usize {
        self.ring.len()
    }
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new(DEFAULT_VIRTUAL_NODES)
    }
}
