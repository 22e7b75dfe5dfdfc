//! # Lattice Storage - Transactional Key-Value Abstraction
//!
//! Provides the storage backend contract the datastore engine is built on.
//!
//! The engine does not implement its own locking: it relies on the backend's
//! transaction isolation plus distinguishable conflict reporting to detect
//! write-write collisions. A backend must therefore guarantee:
//!
//! - `begin` returns a transaction reading from a consistent snapshot of
//!   committed state, overlaid with the transaction's own buffered writes
//! - `commit` applies all buffered writes atomically, or none of them
//! - a commit that lost a race on any written key fails with
//!   [`StorageError::Conflict`], never with silent lost updates
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │              lattice-datastore                   │
//! │   (rows, lifetimes, revisions, validation)       │
//! ├──────────────────────────────────────────────────┤
//! │              StorageBackend trait                │
//! │   (get, get_range, begin → StorageTransaction)   │
//! ├──────────────────────────────────────────────────┤
//! │   MemoryBackend        │  (other backends)       │
//! └──────────────────────────────────────────────────┘
//! ```

#![deny(unsafe_code)]

use std::ops::Range;

use async_trait::async_trait;

pub mod memory;

pub use memory::{MemoryBackend, MemoryTransaction};

/// Errors reported by a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A concurrent transaction committed a write to one of this
    /// transaction's keys first. The operation should be retried from the
    /// top after re-reading state.
    #[error("transaction conflict: concurrent modification detected")]
    Conflict,

    /// Encoding or decoding of a stored value failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Opaque backend failure.
    #[error("internal storage error: {0}")]
    Internal(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// A key-value pair returned by range scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// The abstract storage backend interface.
///
/// Non-transactional reads observe the latest committed state; writes must
/// go through a [`StorageTransaction`].
#[async_trait]
pub trait StorageBackend: Send + Sync {
    type Transaction: StorageTransaction;

    /// Begin a transaction reading from a snapshot of committed state.
    async fn begin(&self) -> StorageResult<Self::Transaction>;

    /// Read a single key from committed state.
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Scan a key range from committed state, in ascending key order.
    async fn get_range(&self, range: Range<Vec<u8>>) -> StorageResult<Vec<KeyValue>>;
}

/// A single atomic unit of storage work.
///
/// Reads see the snapshot taken at `begin` plus this transaction's own
/// buffered writes. Nothing is visible to other readers until `commit`
/// returns successfully; dropping or aborting discards everything.
#[async_trait]
pub trait StorageTransaction: Send {
    /// Read a key through this transaction's view.
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Scan a key range through this transaction's view, ascending.
    async fn get_range(&self, range: Range<Vec<u8>>) -> StorageResult<Vec<KeyValue>>;

    /// Buffer a write of `key` to `value`.
    fn set(&mut self, key: Vec<u8>, value: Vec<u8>);

    /// Buffer a deletion of `key`.
    fn delete(&mut self, key: Vec<u8>);

    /// Atomically apply every buffered write, or fail with
    /// [`StorageError::Conflict`] if a concurrent transaction got there
    /// first on any written key.
    async fn commit(self) -> StorageResult<()>;

    /// Discard all buffered writes.
    fn abort(self);
}
