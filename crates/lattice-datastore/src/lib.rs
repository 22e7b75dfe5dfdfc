//! # Lattice Datastore - Revisioned Tuple Storage Engine
//!
//! Stores relationship tuples, namespace definitions, and caveat
//! definitions with full revision history. Writes never update rows in
//! place: every version carries a half-open lifetime `[created, deleted)`,
//! deletion tombstones the live version, and reads at any past revision
//! reconstruct the exact snapshot that was visible then.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                        Datastore                           │
//! │   sync/fuzzed revisions · reader() · read_write_txn()      │
//! ├──────────────────────────┬─────────────────────────────────┤
//! │      Reader              │     ReadWriteTransaction        │
//! │  point-in-time queries   │  CREATE/TOUCH/DELETE, schema,   │
//! │  at a fixed revision     │  preconditions, atomic commit   │
//! ├──────────────────────────┴─────────────────────────────────┤
//! │       TxnIdAllocator · MigrationPhase · key layout         │
//! ├────────────────────────────────────────────────────────────┤
//! │            StorageBackend (lattice-storage)                │
//! └────────────────────────────────────────────────────────────┘
//! ```

#![deny(unsafe_code)]

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use lattice_storage::StorageBackend;
use lattice_types::{RelationTuple, RelationTupleUpdate, Revision};

pub mod error;
mod keys;
pub mod migration;
pub mod reader;
pub mod readwrite;
pub mod revision;
mod rows;
mod view;

pub use error::{DatastoreError, DatastoreResult};
pub use migration::MigrationPhase;
pub use reader::{Reader, TupleQuery};
pub use readwrite::ReadWriteTransaction;
pub use revision::TxnIdAllocator;

const DEFAULT_FUZZ_WINDOW_MS: u64 = 5_000;

fn default_fuzz_window_ms() -> u64 {
    DEFAULT_FUZZ_WINDOW_MS
}

/// Datastore configuration.
#[derive(Debug, Clone, Serialize, Deserialize, bon::Builder)]
pub struct DatastoreConfig {
    /// Which lifetime columns this node writes and reads.
    #[serde(default)]
    #[builder(default)]
    pub migration_phase: MigrationPhase,

    /// How far behind the head a fuzzed revision may lag, in milliseconds.
    #[serde(default = "default_fuzz_window_ms")]
    #[builder(default = DEFAULT_FUZZ_WINDOW_MS)]
    pub revision_fuzz_window_ms: u64,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl DatastoreConfig {
    pub fn fuzz_window(&self) -> Duration {
        Duration::from_millis(self.revision_fuzz_window_ms)
    }
}

/// The datastore over a storage backend.
///
/// All handles over the same backend must share one allocator; clone the
/// datastore rather than calling [`Datastore::open`] twice.
#[derive(Clone)]
pub struct Datastore<S: StorageBackend> {
    backend: S,
    allocator: TxnIdAllocator,
    config: DatastoreConfig,
}

impl<S: StorageBackend> Datastore<S>
where
    S::Transaction: Sync,
{
    /// Open the datastore, recovering the transaction-id head from the
    /// highest revision recorded in persisted rows.
    pub async fn open(backend: S, config: DatastoreConfig) -> DatastoreResult<Self> {
        let head = recover_head(&backend).await?;
        info!(
            head = head.0,
            phase = ?config.migration_phase,
            "datastore opened"
        );
        Ok(Self { backend, allocator: TxnIdAllocator::starting_at(head), config })
    }

    /// The revision of the most recent fully resolved commit.
    pub fn sync_revision(&self) -> Revision {
        self.allocator.sync_revision()
    }

    /// A possibly slightly stale revision chosen to maximize agreement
    /// between concurrent readers. Converges to [`Self::sync_revision`]
    /// once the configured window has passed without writes.
    pub fn fuzzed_revision(&self) -> Revision {
        self.allocator.fuzzed_revision(self.config.fuzz_window())
    }

    /// A read-only view of committed state at `revision`.
    pub fn reader(&self, revision: Revision) -> Reader<'_, S> {
        Reader::new(&self.backend, revision, self.config.migration_phase)
    }

    /// Begin an atomic read-write transaction.
    pub async fn read_write_transaction(&self) -> DatastoreResult<ReadWriteTransaction<S>> {
        let txn = self.backend.begin().await?;
        Ok(ReadWriteTransaction::new(
            txn,
            self.allocator.clone(),
            self.config.migration_phase,
        ))
    }

    /// Verify `preconditions` and apply `updates` in one transaction.
    /// Returns the commit revision.
    pub async fn write_tuples(
        &self,
        preconditions: &[RelationTuple],
        updates: Vec<RelationTupleUpdate>,
    ) -> DatastoreResult<Revision> {
        let mut txn = self.read_write_transaction().await?;
        txn.verify_preconditions(preconditions).await?;
        txn.write_relationships(updates).await?;
        txn.commit().await
    }
}

/// The highest transaction id recorded anywhere in persisted rows.
async fn recover_head<S: StorageBackend>(backend: &S) -> DatastoreResult<Revision> {
    let mut head = Revision::zero();
    for range in [keys::tuple::all_range(), keys::namespace::all_range()] {
        for entry in backend.get_range(range).await? {
            let row = rows::VersionedRow::<serde_json::Value>::decode(&entry.value)?;
            for lifetime in [row.legacy, row.snapshot].into_iter().flatten() {
                head = head.max(lifetime.created);
                if lifetime.deleted != Revision::LIVE {
                    head = head.max(lifetime.deleted);
                }
            }
        }
    }
    for entry in backend.get_range(keys::caveat::all_range()).await? {
        let row = rows::CaveatRow::decode(&entry.value)?;
        head = head.max(row.written_at);
    }
    Ok(head)
}
