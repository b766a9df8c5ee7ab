//! Operation log
//!
//! Append-only record of applied reads, writes and deletes, kept for auditing
//! and conflict diagnosis. Bounded in memory; optionally mirrored to a
//! JSON-lines file. Reads and writes never depend on it.

use crate::coordinator::replication::Consistency;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpType {
    Read,
    Write,
    Delete,
}

/// One applied operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub operation_id: Uuid,
    pub op_type: OpType,
    pub key: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub client_id: String,
    pub consistency: Consistency,
    /// Version written or read, when known
    pub version: Option<u64>,
    /// Replicas that acknowledged or answered
    pub acks: usize,
    /// `"ok"` or the error kind
    pub outcome: String,
}

impl OperationRecord {
    pub fn new(op_type: OpType, key: &str, client_id: &str, consistency: Consistency) -> Self {
        Self {
            operation_id: Uuid::new_v4(),
            op_type,
            key: key.to_string(),
            timestamp: Utc::now(),
            client_id: client_id.to_string(),
            consistency,
            version: None,
            acks: 0,
            outcome: "ok".to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome == "ok"
    }
}

pub struct OperationLog {
    records: Mutex<VecDeque<OperationRecord>>,
    capacity: usize,
    file: Option<Mutex<File>>,
}

impl OperationLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            file: None,
        }
    }

    /// Also append every record to `path` as one JSON object per line
    pub fn with_file(capacity: usize, path: impl AsRef<Path>) -> crate::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Some(Mutex::new(file)),
            ..Self::new(capacity)
        })
    }

    pub fn append(&self, record: OperationRecord) {
        if let Some(file) = &self.file {
            match serde_json::to_string(&record) {
                Ok(line) => {
                    let mut f = file.lock().unwrap_or_else(PoisonError::into_inner);
                    if let Err(e) = writeln!(f, "{}", line) {
                        tracing::warn!("Failed to write operation log: {}", e);
                    }
                }
                Err(e) => tracing::warn!("Failed to encode operation record: {}", e),
            }
        }

        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Most recent `n` records, newest last
    pub fn recent(&self, n: usize) -> Vec<OperationRecord> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = records.len().saturating_sub(n);
        records.iter().skip(skip).cloned().collect()
    }

    pub fn for_key(&self, key: &str) -> Vec<OperationRecord> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.iter().filter(|r| r.key == key).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};

    #[test]
    fn test_capacity_drops_oldest() {
        let log = OperationLog::new(2);
        for key in ["a", "b", "c"] {
            log.append(OperationRecord::new(
                OpType::Write,
                key,
                "client",
                Consistency::Strong,
            ));
        }
        let keys: Vec<_> = log.recent(10).into_iter().map(|r| r.key).collect();
        assert_eq!(keys, vec!["b", "c"]);
        assert_eq!(log.recent(1)[0].key, "c");
    }

    #[test]
    fn test_for_key() {
        let log = OperationLog::new(10);
        log.append(OperationRecord::new(OpType::Write, "a", "c1", Consistency::Strong));
        log.append(OperationRecord::new(OpType::Read, "b", "c1", Consistency::Eventual));
        log.append(OperationRecord::new(OpType::Delete, "a", "c2", Consistency::Strong));
        let ops: Vec<_> = log.for_key("a").into_iter().map(|r| r.op_type).collect();
        assert_eq!(ops, vec![OpType::Write, OpType::Delete]);
    }

    #[test]
    fn test_file_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ops.log");
        let log = OperationLog::with_file(10, &path).unwrap();
        let mut record = OperationRecord::new(OpType::Write, "k", "c", Consistency::Eventual);
        record.version = Some(3);
        log.append(record);

        let file = File::open(&path).unwrap();
        let lines: Vec<String> = BufReader::new(file).lines().map(|l| l.unwrap()).collect();
        assert_eq!(lines.len(), 1);
        let parsed: OperationRecord = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(parsed.version, Some(3));
        assert_eq!(parsed.consistency, Consistency::Eventual);
    }
}
