//! Atomic read-write transactions.
//!
//! A transaction buffers all mutations in its storage transaction and reads
//! through its own view, so validation and preconditions observe the
//! pre-transaction snapshot plus this transaction's earlier writes. Nothing
//! is visible to others until `commit` succeeds.
//!
//! Every liveness change also writes the identity's live marker, so two
//! concurrent transactions mutating the same identity collide at commit;
//! the loser surfaces [`DatastoreError::PreconditionFailed`] and can retry.

use std::collections::{HashMap, HashSet};

use lattice_storage::{StorageBackend, StorageError, StorageTransaction};
use lattice_types::{
    CaveatDefinition, NamespaceDefinition, RelationTuple, RelationTupleUpdate, Revision,
    TupleFilter, TupleOperation, ELLIPSIS,
};
use tracing::debug;

use crate::error::{DatastoreError, DatastoreResult};
use crate::keys;
use crate::migration::MigrationPhase;
use crate::revision::TxnIdAllocator;
use crate::rows::{CaveatRow, LiveMarker, VersionedRow};
use crate::view::{
    live_marker, load_namespace_row, scan_all_tuple_rows, scan_tuple_rows, TxnView, Visibility,
};

/// Owns a transaction id from allocation until it resolves. Dropping the
/// guard without committing resolves the id as aborted, which unblocks head
/// advancement for later transactions.
struct TxnIdGuard {
    allocator: TxnIdAllocator,
    id: Revision,
    resolved: bool,
}

impl TxnIdGuard {
    fn new(allocator: TxnIdAllocator) -> Self {
        let id = allocator.allocate();
        Self { allocator, id, resolved: false }
    }

    fn id(&self) -> Revision {
        self.id
    }

    fn committed(mut self) {
        self.resolved = true;
        self.allocator.resolve_committed(self.id);
    }
}

impl Drop for TxnIdGuard {
    fn drop(&mut self) {
        if !self.resolved {
            self.allocator.resolve_aborted(self.id);
        }
    }
}

/// An open read-write transaction against the datastore.
///
/// The transaction id is allocated lazily on the first mutation; opening
/// and dropping a transaction that never writes consumes no revision.
pub struct ReadWriteTransaction<S: StorageBackend> {
    txn: S::Transaction,
    guard: Option<TxnIdGuard>,
    allocator: TxnIdAllocator,
    phase: MigrationPhase,
}

impl<S: StorageBackend> ReadWriteTransaction<S>
where
    S::Transaction: Sync,
{
    pub(crate) fn new(
        txn: S::Transaction,
        allocator: TxnIdAllocator,
        phase: MigrationPhase,
    ) -> Self {
        Self { txn, guard: None, allocator, phase }
    }

    fn txn_id(&mut self) -> Revision {
        let allocator = self.allocator.clone();
        self.guard.get_or_insert_with(|| TxnIdGuard::new(allocator)).id()
    }

    /// Tuples matching `filter` that are live in this transaction's view.
    pub async fn query_live(&self, filter: &TupleFilter) -> DatastoreResult<Vec<RelationTuple>> {
        let rows =
            scan_tuple_rows(&TxnView(&self.txn), filter, Visibility::Live, self.phase).await?;
        Ok(rows.into_iter().map(|(_, row)| row.payload).collect())
    }

    /// Require each tuple to be live in this transaction's view.
    ///
    /// Preconditions see the transaction's own earlier writes: a tuple
    /// touched earlier in the same transaction satisfies its precondition.
    pub async fn verify_preconditions(
        &self,
        preconditions: &[RelationTuple],
    ) -> DatastoreResult<()> {
        for tuple in preconditions {
            let marker = live_marker(&TxnView(&self.txn), &keys::tuple::live(tuple)).await?;
            if marker.live.is_none() {
                return Err(DatastoreError::PreconditionFailed(format!(
                    "required tuple is not live: {tuple}"
                )));
            }
        }
        Ok(())
    }

    /// Apply a batch of CREATE / TOUCH / DELETE updates, in order.
    ///
    /// Every referenced namespace and relation must have a live definition,
    /// for deletes as much as for writes. CREATE fails with
    /// [`DatastoreError::AlreadyExists`] if the identity is live in this
    /// transaction's view; TOUCH upserts; DELETE of a non-live identity is
    /// a no-op.
    pub async fn write_relationships(
        &mut self,
        updates: Vec<RelationTupleUpdate>,
    ) -> DatastoreResult<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut definitions = HashMap::new();
        for update in &updates {
            self.validate_tuple(&update.tuple, &mut definitions).await?;
        }

        let id = self.txn_id();
        let mut created = 0usize;
        let mut touched = 0usize;
        let mut deleted = 0usize;
        for update in updates {
            match update.operation {
                TupleOperation::Create => {
                    let marker =
                        live_marker(&TxnView(&self.txn), &keys::tuple::live(&update.tuple)).await?;
                    if marker.live.is_some() {
                        return Err(DatastoreError::AlreadyExists(update.tuple.to_string()));
                    }
                    self.insert_tuple(update.tuple, id)?;
                    created += 1;
                }
                TupleOperation::Touch => {
                    self.tombstone_tuple(&update.tuple, id).await?;
                    self.insert_tuple(update.tuple, id)?;
                    touched += 1;
                }
                TupleOperation::Delete => {
                    self.tombstone_tuple(&update.tuple, id).await?;
                    deleted += 1;
                }
            }
        }
        debug!(txn = id.0, created, touched, deleted, "applied relationship updates");
        Ok(())
    }

    /// Tombstone every live tuple matching `filter`; returns how many.
    pub async fn delete_relationships(&mut self, filter: &TupleFilter) -> DatastoreResult<usize> {
        let rows =
            scan_tuple_rows(&TxnView(&self.txn), filter, Visibility::Live, self.phase).await?;
        if rows.is_empty() {
            return Ok(0);
        }
        let id = self.txn_id();
        let count = rows.len();
        for (key, mut row) in rows {
            let marker_key = keys::tuple::live(&row.payload);
            row.tombstone(self.phase, id);
            self.txn.set(key, row.encode()?);
            self.txn.set(marker_key, LiveMarker::cleared().encode()?);
        }
        debug!(txn = id.0, count, "deleted relationships by filter");
        Ok(count)
    }

    /// Write namespace definitions, replacing any live prior versions.
    pub async fn write_namespaces(
        &mut self,
        definitions: Vec<NamespaceDefinition>,
    ) -> DatastoreResult<()> {
        if definitions.is_empty() {
            return Ok(());
        }
        let id = self.txn_id();
        for definition in definitions {
            self.tombstone_namespace(&definition.name, id).await?;
            let name = definition.name.clone();
            let row = VersionedRow::live_at(definition, self.phase, id);
            self.txn.set(keys::namespace::row(&name, id), row.encode()?);
            self.txn.set(keys::namespace::live(&name), LiveMarker::at(id).encode()?);
        }
        Ok(())
    }

    /// Delete namespaces and cascade to every live tuple that references
    /// them on either side. Fails with
    /// [`DatastoreError::NamespaceNotFound`] if any name has no live
    /// definition; nothing is tombstoned in that case.
    pub async fn delete_namespaces(&mut self, names: &[&str]) -> DatastoreResult<usize> {
        for name in names {
            let marker = live_marker(&TxnView(&self.txn), &keys::namespace::live(name)).await?;
            if marker.live.is_none() {
                return Err(DatastoreError::NamespaceNotFound(name.to_string()));
            }
        }

        let id = self.txn_id();
        for name in names {
            self.tombstone_namespace(name, id).await?;
        }

        let doomed: HashSet<&str> = names.iter().copied().collect();
        let rows = scan_all_tuple_rows(&TxnView(&self.txn), Visibility::Live, self.phase).await?;
        let mut cascaded = 0usize;
        for (key, mut row) in rows {
            let referenced = doomed.contains(row.payload.resource.namespace.as_str())
                || doomed.contains(row.payload.subject.namespace.as_str());
            if !referenced {
                continue;
            }
            let marker_key = keys::tuple::live(&row.payload);
            row.tombstone(self.phase, id);
            self.txn.set(key, row.encode()?);
            self.txn.set(marker_key, LiveMarker::cleared().encode()?);
            cascaded += 1;
        }
        debug!(txn = id.0, namespaces = names.len(), cascaded, "deleted namespaces");
        Ok(cascaded)
    }

    /// Replace the entire stored caveat set with `definitions`.
    pub async fn write_caveats(
        &mut self,
        definitions: Vec<CaveatDefinition>,
    ) -> DatastoreResult<()> {
        let id = self.txn_id();
        let existing = self.txn.get_range(keys::caveat::all_range()).await?;
        for entry in existing {
            self.txn.delete(entry.key);
        }
        for definition in definitions {
            let key = keys::caveat::row(&definition.name);
            let row = CaveatRow { definition, written_at: id };
            self.txn.set(key, row.encode()?);
        }
        Ok(())
    }

    /// Commit every buffered mutation atomically.
    ///
    /// Returns the revision at which the writes became visible; a
    /// transaction that never wrote returns the current head without
    /// consuming a revision. A storage-level write conflict surfaces as
    /// [`DatastoreError::PreconditionFailed`].
    pub async fn commit(self) -> DatastoreResult<Revision> {
        let Self { txn, guard, allocator, .. } = self;
        match txn.commit().await {
            Ok(()) => match guard {
                Some(guard) => {
                    let id = guard.id();
                    guard.committed();
                    debug!(revision = id.0, "transaction committed");
                    Ok(id)
                }
                None => Ok(allocator.sync_revision()),
            },
            Err(StorageError::Conflict) => {
                drop(guard);
                Err(DatastoreError::PreconditionFailed(
                    "concurrent transaction committed overlapping writes first".to_string(),
                ))
            }
            Err(err) => {
                drop(guard);
                Err(err.into())
            }
        }
    }

    /// Discard every buffered mutation. The allocated id, if any, resolves
    /// as aborted; dropping the transaction has the same effect.
    pub fn abort(self) {
        let Self { txn, guard, .. } = self;
        txn.abort();
        drop(guard);
    }

    async fn validate_tuple(
        &self,
        tuple: &RelationTuple,
        definitions: &mut HashMap<String, NamespaceDefinition>,
    ) -> DatastoreResult<()> {
        let resource_def =
            self.namespace_definition(&tuple.resource.namespace, definitions).await?;
        if tuple.resource.relation == ELLIPSIS
            || !resource_def.has_relation(&tuple.resource.relation)
        {
            return Err(DatastoreError::RelationNotFound {
                namespace: tuple.resource.namespace.clone(),
                relation: tuple.resource.relation.clone(),
            });
        }

        let subject_def = self.namespace_definition(&tuple.subject.namespace, definitions).await?;
        if !subject_def.has_relation(&tuple.subject.relation) {
            return Err(DatastoreError::RelationNotFound {
                namespace: tuple.subject.namespace.clone(),
                relation: tuple.subject.relation.clone(),
            });
        }
        Ok(())
    }

    async fn namespace_definition<'d>(
        &self,
        name: &str,
        definitions: &'d mut HashMap<String, NamespaceDefinition>,
    ) -> DatastoreResult<&'d NamespaceDefinition> {
        if !definitions.contains_key(name) {
            let found =
                load_namespace_row(&TxnView(&self.txn), name, Visibility::Live, self.phase).await?;
            let row =
                found.ok_or_else(|| DatastoreError::NamespaceNotFound(name.to_string()))?.1;
            definitions.insert(name.to_string(), row.payload);
        }
        // Just inserted if absent.
        Ok(&definitions[name])
    }

    /// Tombstone the live version of a tuple identity, if one exists.
    async fn tombstone_tuple(
        &mut self,
        tuple: &RelationTuple,
        deleted_at: Revision,
    ) -> DatastoreResult<bool> {
        let marker_key = keys::tuple::live(tuple);
        let marker = live_marker(&TxnView(&self.txn), &marker_key).await?;
        let Some(created) = marker.live else {
            return Ok(false);
        };

        let row_key = keys::tuple::row(tuple, created);
        let bytes = self.txn.get(&row_key).await?.ok_or_else(|| {
            StorageError::Internal(format!("live marker without row: {tuple} at {created}"))
        })?;
        let mut row = VersionedRow::<RelationTuple>::decode(&bytes)?;
        row.tombstone(self.phase, deleted_at);
        self.txn.set(row_key, row.encode()?);
        self.txn.set(marker_key, LiveMarker::cleared().encode()?);
        Ok(true)
    }

    fn insert_tuple(&mut self, tuple: RelationTuple, created: Revision) -> DatastoreResult<()> {
        let row_key = keys::tuple::row(&tuple, created);
        let marker_key = keys::tuple::live(&tuple);
        let row = VersionedRow::live_at(tuple, self.phase, created);
        self.txn.set(row_key, row.encode()?);
        self.txn.set(marker_key, LiveMarker::at(created).encode()?);
        Ok(())
    }

    async fn tombstone_namespace(&mut self, name: &str, deleted_at: Revision) -> DatastoreResult<bool> {
        let marker_key = keys::namespace::live(name);
        let marker = live_marker(&TxnView(&self.txn), &marker_key).await?;
        let Some(created) = marker.live else {
            return Ok(false);
        };

        let row_key = keys::namespace::row(name, created);
        let bytes = self.txn.get(&row_key).await?.ok_or_else(|| {
            StorageError::Internal(format!("live marker without row: namespace {name}"))
        })?;
        let mut row = VersionedRow::<NamespaceDefinition>::decode(&bytes)?;
        row.tombstone(self.phase, deleted_at);
        self.txn.set(row_key, row.encode()?);
        self.txn.set(marker_key, LiveMarker::cleared().encode()?);
        Ok(true)
    }
}
