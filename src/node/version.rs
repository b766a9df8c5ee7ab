//! Version vectors: highest version observed per key

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Element-wise maximum of versions observed, keyed by data owner (the key).
///
/// Versions are scalar per key, not per writer, so two causally independent
/// writes that land on the same version number are indistinguishable here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionVector {
    versions: BTreeMap<String, u64>,
}

impl VersionVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a version; never lowers an existing element.
    pub fn observe(&mut self, key: &str, version: u64) {
        let slot = self.versions.entry(key.to_string()).or_insert(0);
        if version > *slot {
            *slot = version;
        }
    }

    /// Version for key (0 when never observed)
    pub fn get(&self, key: &str) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    /// Element-wise maximum
    pub fn merge(&mut self, other: &VersionVector) {
        for (key, version) in &other.versions {
            self.observe(key, *version);
        }
    }

    /// True if every element of `other` is <= the matching element here
    pub fn dominates(&self, other: &VersionVector) -> bool {
        other.versions.iter().all(|(k, v)| self.get(k) >= *v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.versions.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.versions.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

impl FromIterator<(String, u64)> for VersionVector {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        let mut vv = VersionVector::new();
        for (key, version) in iter {
            vv.observe(&key, version);
        }
        vv
    }
}
