//! Stored row shapes and lifetime visibility.
//!
//! Tuple and namespace rows are never updated in place: each version carries
//! a half-open lifetime `[created, deleted)` and deletion tombstones the
//! live version by closing its lifetime. Rows hold two parallel lifetime
//! pairs for the column migration; [`MigrationPhase`] picks which pair is
//! written and which is authoritative on read.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use lattice_types::{CaveatDefinition, Revision};

use crate::error::{DatastoreError, DatastoreResult};
use crate::migration::MigrationPhase;

/// The half-open revision interval during which a row version is visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Lifetime {
    pub created: Revision,
    /// [`Revision::LIVE`] until the version is tombstoned.
    pub deleted: Revision,
}

impl Lifetime {
    pub fn live_at(created: Revision) -> Self {
        Self { created, deleted: Revision::LIVE }
    }

    pub fn is_live(&self) -> bool {
        self.deleted == Revision::LIVE
    }

    /// Whether the version is visible at `revision`.
    pub fn contains(&self, revision: Revision) -> bool {
        self.created <= revision && revision < self.deleted
    }
}

/// A revisioned row: a payload plus the two migration-era lifetime pairs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct VersionedRow<T> {
    pub payload: T,
    /// Legacy counter-based lifetime columns.
    pub legacy: Option<Lifetime>,
    /// Snapshot-ordered lifetime columns being migrated to.
    pub snapshot: Option<Lifetime>,
}

impl<T> VersionedRow<T> {
    /// A new live version written under `phase` at `created`.
    pub fn live_at(payload: T, phase: MigrationPhase, created: Revision) -> Self {
        let lifetime = Lifetime::live_at(created);
        Self {
            payload,
            legacy: Some(lifetime),
            snapshot: phase.writes_snapshot().then_some(lifetime),
        }
    }

    /// The lifetime pair that is authoritative under `phase`.
    ///
    /// Under snapshot-authoritative reads, rows written before backfill have
    /// no snapshot pair yet and fall back to the legacy pair; the inverse
    /// fallback keeps legacy readers working on rows a newer node wrote.
    pub fn lifetime(&self, phase: MigrationPhase) -> Option<Lifetime> {
        if phase.reads_snapshot() {
            self.snapshot.or(self.legacy)
        } else {
            self.legacy.or(self.snapshot)
        }
    }

    /// Whether this version is visible at `revision` under `phase`.
    pub fn visible_at(&self, revision: Revision, phase: MigrationPhase) -> bool {
        self.lifetime(phase).is_some_and(|l| l.contains(revision))
    }

    /// Whether this version is currently live under `phase`.
    pub fn is_live(&self, phase: MigrationPhase) -> bool {
        self.lifetime(phase).is_some_and(|l| l.is_live())
    }

    /// Close this version's lifetime at `deleted`.
    ///
    /// Dual-write phases tombstone both pairs so that nodes in either
    /// adjacent phase observe the deletion.
    pub fn tombstone(&mut self, phase: MigrationPhase, deleted: Revision) {
        if let Some(legacy) = self.legacy.as_mut() {
            legacy.deleted = deleted;
        }
        if phase.writes_snapshot() {
            if let Some(snapshot) = self.snapshot.as_mut() {
                snapshot.deleted = deleted;
            }
        }
    }
}

impl<T: Serialize> VersionedRow<T> {
    pub fn encode(&self) -> DatastoreResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(DatastoreError::serialization)
    }
}

impl<T: DeserializeOwned> VersionedRow<T> {
    pub fn decode(bytes: &[u8]) -> DatastoreResult<Self> {
        serde_json::from_slice(bytes).map_err(DatastoreError::serialization)
    }
}

/// Value of a live-marker key: the revision at which the currently live
/// version of the identity was created, if any.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub(crate) struct LiveMarker {
    pub live: Option<Revision>,
}

impl LiveMarker {
    pub fn at(created: Revision) -> Self {
        Self { live: Some(created) }
    }

    pub fn cleared() -> Self {
        Self { live: None }
    }

    pub fn encode(&self) -> DatastoreResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(DatastoreError::serialization)
    }

    pub fn decode(bytes: &[u8]) -> DatastoreResult<Self> {
        serde_json::from_slice(bytes).map_err(DatastoreError::serialization)
    }
}

/// Stored caveat definition. Caveats follow replace semantics and carry no
/// lifetime columns; `written_at` records the replacing transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CaveatRow {
    pub definition: CaveatDefinition,
    pub written_at: Revision,
}

impl CaveatRow {
    pub fn encode(&self) -> DatastoreResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(DatastoreError::serialization)
    }

    pub fn decode(bytes: &[u8]) -> DatastoreResult<Self> {
        serde_json::from_slice(bytes).map_err(DatastoreError::serialization)
    }
}
