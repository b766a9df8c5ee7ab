//! Versioned entries stored on every replica

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Metadata key recording the node that coordinated a write
pub const META_ORIGIN: &str = "origin";
/// Metadata key recording the client that issued a write
pub const META_CLIENT: &str = "client_id";

/// A versioned value. `value == None` marks a tombstone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub key: String,
    pub value: Option<Vec<u8>>,
    /// Seconds since the Unix epoch, assigned by the coordinating node
    pub timestamp: f64,
    pub version: u64,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Entry {
    pub fn new(key: impl Into<String>, value: Vec<u8>, timestamp: f64, version: u64) -> Self {
        Self {
            key: key.into(),
            value: Some(value),
            timestamp,
            version,
            metadata: BTreeMap::new(),
        }
    }

    pub fn tombstone(key: impl Into<String>, timestamp: f64, version: u64) -> Self {
        Self {
            key: key.into(),
            value: None,
            timestamp,
            version,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    /// Last-writer-wins order: timestamp, then version.
    pub fn lww_cmp(&self, other: &Entry) -> Ordering {
        self.timestamp
            .total_cmp(&other.timestamp)
            .then(self.version.cmp(&other.version))
    }

    /// Same value, version and timestamp (metadata ignored)
    pub fn same_write(&self, other: &Entry) -> bool {
        self.version == other.version
            && self.timestamp.to_bits() == other.timestamp.to_bits()
            && self.value == other.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tombstone() {
        let e = Entry::tombstone("k", 1.0, 3);
        assert!(e.is_tombstone());
        assert_eq!(e.value(), None);
        assert!(!Entry::new("k", b"v".to_vec(), 1.0, 1).is_tombstone());
    }

    #[test]
    fn test_lww_cmp() {
        let older = Entry::new("k", b"a".to_vec(), 1.0, 9);
        let newer = Entry::new("k", b"b".to_vec(), 2.0, 1);
        assert_eq!(newer.lww_cmp(&older), Ordering::Greater);

        let low = Entry::new("k", b"a".to_vec(), 5.0, 1);
        let high = Entry::new("k", b"b".to_vec(), 5.0, 2);
        assert_eq!(low.lww_cmp(&high), Ordering::Less);
    }

    #[test]
    fn test_bincode_preserves_fields() {
        let entry = Entry::new("key", vec![0, 1, 255], 1_700_000_000.123_456, 42)
            .with_metadata(META_ORIGIN, "node-1");
        let bytes = bincode::serialize(&entry).unwrap();
        let decoded: Entry = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(decoded.timestamp.to_bits(), entry.timestamp.to_bits());
    }
}
