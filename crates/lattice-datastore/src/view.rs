//! Read-path plumbing shared by snapshot readers and write transactions.
//!
//! The same row scans back both the public [`crate::Reader`] (reading
//! committed state at a fixed revision) and precondition/validation reads
//! inside a [`crate::ReadWriteTransaction`] (reading the transaction's own
//! view, prior writes included). [`ReadView`] abstracts over the two.

use std::ops::Range;

use async_trait::async_trait;

use lattice_storage::{KeyValue, StorageBackend, StorageResult, StorageTransaction};
use lattice_types::{NamespaceDefinition, RelationTuple, Revision, TupleFilter};

use crate::error::DatastoreResult;
use crate::keys;
use crate::migration::MigrationPhase;
use crate::rows::{LiveMarker, VersionedRow};

/// Something rows can be read through.
#[async_trait]
pub(crate) trait ReadView: Sync {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;
    async fn get_range(&self, range: Range<Vec<u8>>) -> StorageResult<Vec<KeyValue>>;
}

/// Committed state of a backend.
pub(crate) struct BackendView<'a, S>(pub &'a S);

#[async_trait]
impl<S: StorageBackend> ReadView for BackendView<'_, S> {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.0.get(key).await
    }

    async fn get_range(&self, range: Range<Vec<u8>>) -> StorageResult<Vec<KeyValue>> {
        self.0.get_range(range).await
    }
}

/// The view of an open transaction: its snapshot plus its buffered writes.
pub(crate) struct TxnView<'a, T>(pub &'a T);

#[async_trait]
impl<T: StorageTransaction + Sync> ReadView for TxnView<'_, T> {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.0.get(key).await
    }

    async fn get_range(&self, range: Range<Vec<u8>>) -> StorageResult<Vec<KeyValue>> {
        self.0.get_range(range).await
    }
}

/// Which row versions a scan should admit.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Visibility {
    /// Versions visible at a fixed revision.
    AtRevision(Revision),
    /// Versions that are currently live.
    Live,
}

impl Visibility {
    pub fn admits<T>(self, row: &VersionedRow<T>, phase: MigrationPhase) -> bool {
        match self {
            Self::AtRevision(revision) => row.visible_at(revision, phase),
            Self::Live => row.is_live(phase),
        }
    }
}

/// Scan tuple rows under the filter's resource namespace, keeping versions
/// the visibility admits and the filter matches. Keys come back in key
/// order, which is identity order.
pub(crate) async fn scan_tuple_rows<V: ReadView>(
    view: &V,
    filter: &TupleFilter,
    visibility: Visibility,
    phase: MigrationPhase,
) -> DatastoreResult<Vec<(Vec<u8>, VersionedRow<RelationTuple>)>> {
    let entries = view.get_range(keys::tuple::namespace_range(&filter.resource_namespace)).await?;
    collect_tuple_rows(entries, filter, visibility, phase)
}

/// Scan every tuple row in the store. Used by namespace delete-cascade,
/// which must also find tuples by subject namespace.
pub(crate) async fn scan_all_tuple_rows<V: ReadView>(
    view: &V,
    visibility: Visibility,
    phase: MigrationPhase,
) -> DatastoreResult<Vec<(Vec<u8>, VersionedRow<RelationTuple>)>> {
    let entries = view.get_range(keys::tuple::all_range()).await?;
    let mut rows = Vec::new();
    for entry in entries {
        let row = VersionedRow::<RelationTuple>::decode(&entry.value)?;
        if visibility.admits(&row, phase) {
            rows.push((entry.key, row));
        }
    }
    Ok(rows)
}

fn collect_tuple_rows(
    entries: Vec<KeyValue>,
    filter: &TupleFilter,
    visibility: Visibility,
    phase: MigrationPhase,
) -> DatastoreResult<Vec<(Vec<u8>, VersionedRow<RelationTuple>)>> {
    let mut rows = Vec::new();
    for entry in entries {
        let row = VersionedRow::<RelationTuple>::decode(&entry.value)?;
        if visibility.admits(&row, phase) && filter.matches(&row.payload) {
            rows.push((entry.key, row));
        }
    }
    Ok(rows)
}

/// Load the version of a namespace definition the visibility admits, if any.
/// At most one version of a name is admitted at any revision.
pub(crate) async fn load_namespace_row<V: ReadView>(
    view: &V,
    name: &str,
    visibility: Visibility,
    phase: MigrationPhase,
) -> DatastoreResult<Option<(Vec<u8>, VersionedRow<NamespaceDefinition>)>> {
    let entries = view.get_range(keys::namespace::name_range(name)).await?;
    for entry in entries {
        let row = VersionedRow::<NamespaceDefinition>::decode(&entry.value)?;
        if visibility.admits(&row, phase) {
            return Ok(Some((entry.key, row)));
        }
    }
    Ok(None)
}

/// All namespace definition versions the visibility admits, in name order.
pub(crate) async fn scan_namespace_rows<V: ReadView>(
    view: &V,
    visibility: Visibility,
    phase: MigrationPhase,
) -> DatastoreResult<Vec<(Vec<u8>, VersionedRow<NamespaceDefinition>)>> {
    let entries = view.get_range(keys::namespace::all_range()).await?;
    let mut rows = Vec::new();
    for entry in entries {
        let row = VersionedRow::<NamespaceDefinition>::decode(&entry.value)?;
        if visibility.admits(&row, phase) {
            rows.push((entry.key, row));
        }
    }
    Ok(rows)
}

/// Read a live marker; a missing key means nothing is live.
pub(crate) async fn live_marker<V: ReadView>(view: &V, key: &[u8]) -> DatastoreResult<LiveMarker> {
    match view.get(key).await? {
        Some(bytes) => LiveMarker::decode(&bytes),
        None => Ok(LiveMarker::cleared()),
    }
}
