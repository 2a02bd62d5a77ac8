//! Durable storage contract
//!
//! The store is the single source of truth. It exposes exactly three
//! operations: point reads, atomic write batches, and ordered range
//! scans over lexicographic keys. Everything else — caches, metadata,
//! tail reads — layers on top. A failed batch aborts the in-flight
//! request only; nothing is ever acknowledged before the batch commits.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use thiserror::Error;

/// Storage-level failures.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("write failed: {0}")]
    Write(String),

    #[error("read failed: {0}")]
    Read(String),
}

/// One element of an atomic write batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: String, value: String },
    Delete { key: String },
}

impl BatchOp {
    pub fn put(key: impl Into<String>, value: impl Into<String>) -> BatchOp {
        BatchOp::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<String>) -> BatchOp {
        BatchOp::Delete { key: key.into() }
    }
}

/// The abstract durable store: get / batch / ordered scan.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Point read. `Ok(None)` when the key is absent.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Apply a write batch atomically: either every op lands or none.
    async fn batch(&self, ops: Vec<BatchOp>) -> Result<(), StoreError>;

    /// All pairs with `gte <= key < lt`, in lexicographic key order.
    async fn scan(&self, gte: &str, lt: &str) -> Result<Vec<(String, String)>, StoreError>;
}

/// In-memory store over a sorted map; the default for tests and embedded
/// replicas.
#[derive(Debug, Default)]
pub struct MemStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemStore {
    pub fn new() -> MemStore {
        MemStore::default()
    }

    /// Number of stored pairs.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Snapshot of every pair, for inspection in tests.
    pub fn dump(&self) -> Vec<(String, String)> {
        self.entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn batch(&self, ops: Vec<BatchOp>) -> Result<(), StoreError> {
        let mut entries = self.entries.write();
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    entries.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn scan(&self, gte: &str, lt: &str) -> Result<Vec<(String, String)>, StoreError> {
        let entries = self.entries.read();
        Ok(entries
            .range(gte.to_string()..lt.to_string())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
