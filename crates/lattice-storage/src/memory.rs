//! In-memory storage backend for testing and development.
//!
//! Transactions snapshot the committed map at `begin` and buffer writes
//! locally. Commit takes the write lock, validates first-committer-wins over
//! the transaction's write set using per-key commit versions, and applies
//! the buffer atomically. Snapshotting clones the committed map, which is
//! fine at test and development scale.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{KeyValue, StorageBackend, StorageError, StorageResult, StorageTransaction};

#[derive(Default)]
struct Committed {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
    /// Commit version at which each key was last written or deleted.
    /// Entries for deleted keys are retained: a transaction whose snapshot
    /// predates the deletion must still conflict when it writes that key.
    /// The map therefore grows with the set of keys ever touched, which is
    /// acceptable at the test and development scale this backend targets.
    key_versions: HashMap<Vec<u8>, u64>,
    /// Monotonic commit counter.
    version: u64,
}

/// In-memory transactional key-value store.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<RwLock<Committed>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed keys; useful in tests.
    pub async fn len(&self) -> usize {
        self.inner.read().await.data.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.data.is_empty()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    type Transaction = MemoryTransaction;

    async fn begin(&self) -> StorageResult<MemoryTransaction> {
        let committed = self.inner.read().await;
        Ok(MemoryTransaction {
            inner: Arc::clone(&self.inner),
            snapshot: committed.data.clone(),
            base_version: committed.version,
            writes: BTreeMap::new(),
        })
    }

    async fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.inner.read().await.data.get(key).cloned())
    }

    async fn get_range(&self, range: Range<Vec<u8>>) -> StorageResult<Vec<KeyValue>> {
        let committed = self.inner.read().await;
        Ok(committed
            .data
            .range(range)
            .map(|(k, v)| KeyValue { key: k.clone(), value: v.clone() })
            .collect())
    }
}

/// A snapshot transaction over [`MemoryBackend`].
pub struct MemoryTransaction {
    inner: Arc<RwLock<Committed>>,
    snapshot: BTreeMap<Vec<u8>, Vec<u8>>,
    base_version: u64,
    /// Buffered mutations; `None` marks a deletion.
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

#[async_trait]
impl StorageTransaction for MemoryTransaction {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        if let Some(buffered) = self.writes.get(key) {
            return Ok(buffered.clone());
        }
        Ok(self.snapshot.get(key).cloned())
    }

    async fn get_range(&self, range: Range<Vec<u8>>) -> StorageResult<Vec<KeyValue>> {
        // Overlay buffered writes on the snapshot within the range.
        let mut merged: BTreeMap<&[u8], Option<&[u8]>> = self
            .snapshot
            .range(range.clone())
            .map(|(k, v)| (k.as_slice(), Some(v.as_slice())))
            .collect();
        for (k, v) in self.writes.range(range) {
            merged.insert(k.as_slice(), v.as_deref());
        }
        Ok(merged
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| KeyValue { key: k.to_vec(), value: v.to_vec() }))
            .collect())
    }

    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.writes.insert(key, Some(value));
    }

    fn delete(&mut self, key: Vec<u8>) {
        self.writes.insert(key, None);
    }

    async fn commit(self) -> StorageResult<()> {
        if self.writes.is_empty() {
            return Ok(());
        }

        let mut committed = self.inner.write().await;

        for key in self.writes.keys() {
            if let Some(&version) = committed.key_versions.get(key) {
                if version > self.base_version {
                    debug!(key = ?String::from_utf8_lossy(key), "commit lost write race");
                    return Err(StorageError::Conflict);
                }
            }
        }

        committed.version += 1;
        let commit_version = committed.version;
        let written = self.writes.len();
        for (key, value) in self.writes {
            committed.key_versions.insert(key.clone(), commit_version);
            match value {
                Some(value) => {
                    committed.data.insert(key, value);
                }
                None => {
                    committed.data.remove(&key);
                }
            }
        }

        debug!(keys = written, version = commit_version, "committed transaction");
        Ok(())
    }

    fn abort(self) {
        // Buffered writes are dropped with the transaction.
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn kv(s: &str) -> Vec<u8> {
        s.as_bytes().to_vec()
    }

    #[tokio::test]
    async fn test_commit_makes_writes_visible() {
        let backend = MemoryBackend::new();

        let mut txn = backend.begin().await.unwrap();
        txn.set(kv("a"), kv("1"));
        txn.commit().await.unwrap();

        assert_eq!(backend.get(b"a").await.unwrap(), Some(kv("1")));
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let backend = MemoryBackend::new();

        let mut txn = backend.begin().await.unwrap();
        txn.set(kv("a"), kv("1"));

        assert_eq!(backend.get(b"a").await.unwrap(), None);
        txn.abort();
        assert_eq!(backend.get(b"a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_transaction_reads_own_writes() {
        let backend = MemoryBackend::new();

        let mut txn = backend.begin().await.unwrap();
        txn.set(kv("a"), kv("1"));
        assert_eq!(txn.get(b"a").await.unwrap(), Some(kv("1")));

        txn.delete(kv("a"));
        assert_eq!(txn.get(b"a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_snapshot_isolation() {
        let backend = MemoryBackend::new();

        let mut setup = backend.begin().await.unwrap();
        setup.set(kv("a"), kv("old"));
        setup.commit().await.unwrap();

        let reader = backend.begin().await.unwrap();

        let mut writer = backend.begin().await.unwrap();
        writer.set(kv("a"), kv("new"));
        writer.commit().await.unwrap();

        // The earlier snapshot still sees the old value.
        assert_eq!(reader.get(b"a").await.unwrap(), Some(kv("old")));
        assert_eq!(backend.get(b"a").await.unwrap(), Some(kv("new")));
    }

    #[tokio::test]
    async fn test_write_write_conflict() {
        let backend = MemoryBackend::new();

        let mut first = backend.begin().await.unwrap();
        let mut second = backend.begin().await.unwrap();

        first.set(kv("a"), kv("first"));
        second.set(kv("a"), kv("second"));

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict));

        assert_eq!(backend.get(b"a").await.unwrap(), Some(kv("first")));
    }

    #[tokio::test]
    async fn test_deleted_key_still_conflicts() {
        let backend = MemoryBackend::new();

        let mut setup = backend.begin().await.unwrap();
        setup.set(kv("a"), kv("1"));
        setup.commit().await.unwrap();

        let mut deleter = backend.begin().await.unwrap();
        let mut writer = backend.begin().await.unwrap();

        deleter.delete(kv("a"));
        writer.set(kv("a"), kv("2"));

        deleter.commit().await.unwrap();
        // The delete must count as a write for conflict purposes.
        let err = writer.commit().await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict));
        assert_eq!(backend.get(b"a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_disjoint_writes_do_not_conflict() {
        let backend = MemoryBackend::new();

        let mut first = backend.begin().await.unwrap();
        let mut second = backend.begin().await.unwrap();

        first.set(kv("a"), kv("1"));
        second.set(kv("b"), kv("2"));

        first.commit().await.unwrap();
        second.commit().await.unwrap();

        assert_eq!(backend.get(b"a").await.unwrap(), Some(kv("1")));
        assert_eq!(backend.get(b"b").await.unwrap(), Some(kv("2")));
    }

    #[tokio::test]
    async fn test_range_scan_merges_buffered_writes() {
        let backend = MemoryBackend::new();

        let mut setup = backend.begin().await.unwrap();
        setup.set(kv("k:a"), kv("1"));
        setup.set(kv("k:b"), kv("2"));
        setup.set(kv("k:c"), kv("3"));
        setup.commit().await.unwrap();

        let mut txn = backend.begin().await.unwrap();
        txn.set(kv("k:b"), kv("updated"));
        txn.delete(kv("k:c"));
        txn.set(kv("k:d"), kv("4"));

        let scanned = txn.get_range(kv("k:")..kv("k~")).await.unwrap();
        let keys: Vec<_> =
            scanned.iter().map(|kv| String::from_utf8_lossy(&kv.key).to_string()).collect();
        assert_eq!(keys, vec!["k:a", "k:b", "k:d"]);
        assert_eq!(scanned[1].value, kv("updated"));
    }

    #[tokio::test]
    async fn test_empty_commit_succeeds() {
        let backend = MemoryBackend::new();
        let txn = backend.begin().await.unwrap();
        txn.commit().await.unwrap();
    }
}
