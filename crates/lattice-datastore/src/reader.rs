//! Point-in-time reads over committed state.

use lattice_storage::StorageBackend;
use lattice_types::{CaveatDefinition, NamespaceDefinition, RelationTuple, Revision, TupleFilter};
use tracing::debug;

use crate::error::{DatastoreError, DatastoreResult};
use crate::keys;
use crate::migration::MigrationPhase;
use crate::rows::CaveatRow;
use crate::view::{scan_tuple_rows, BackendView, Visibility};

/// A read-only view of the datastore at a fixed revision.
///
/// Readers are cheap to construct and never block writers. Two readers at
/// the same revision observe identical tuple and namespace snapshots.
/// Caveats are the exception: they follow replace semantics without
/// versioning, so caveat reads always return the current committed set.
pub struct Reader<'a, S: StorageBackend> {
    backend: &'a S,
    revision: Revision,
    phase: MigrationPhase,
}

impl<'a, S: StorageBackend> Reader<'a, S> {
    pub(crate) fn new(backend: &'a S, revision: Revision, phase: MigrationPhase) -> Self {
        Self { backend, revision, phase }
    }

    /// The revision this reader observes.
    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Start a tuple query under a resource namespace.
    pub fn query_tuples(&self, resource_namespace: impl Into<String>) -> TupleQuery<'_, 'a, S> {
        TupleQuery {
            reader: self,
            filter: TupleFilter::builder().resource_namespace(resource_namespace.into()).build(),
        }
    }

    /// Run an already-built filter at this reader's revision.
    pub async fn query_filter(&self, filter: &TupleFilter) -> DatastoreResult<Vec<RelationTuple>> {
        let view = BackendView(self.backend);
        let rows =
            scan_tuple_rows(&view, filter, Visibility::AtRevision(self.revision), self.phase)
                .await?;
        debug!(
            namespace = %filter.resource_namespace,
            revision = self.revision.0,
            results = rows.len(),
            "tuple query"
        );
        Ok(rows.into_iter().map(|(_, row)| row.payload).collect())
    }

    /// Load the namespace definition visible at this revision, along with
    /// the revision at which it was last written.
    pub async fn load_namespace(
        &self,
        name: &str,
    ) -> DatastoreResult<(NamespaceDefinition, Revision)> {
        let view = BackendView(self.backend);
        let found = crate::view::load_namespace_row(
            &view,
            name,
            Visibility::AtRevision(self.revision),
            self.phase,
        )
        .await?;
        match found {
            Some((_, row)) => {
                let written_at = row
                    .lifetime(self.phase)
                    .map(|l| l.created)
                    .unwrap_or(self.revision);
                Ok((row.payload, written_at))
            }
            None => Err(DatastoreError::NamespaceNotFound(name.to_string())),
        }
    }

    /// All namespace definitions visible at this revision, in name order.
    pub async fn list_namespaces(&self) -> DatastoreResult<Vec<NamespaceDefinition>> {
        let view = BackendView(self.backend);
        let rows = crate::view::scan_namespace_rows(
            &view,
            Visibility::AtRevision(self.revision),
            self.phase,
        )
        .await?;
        Ok(rows.into_iter().map(|(_, row)| row.payload).collect())
    }

    /// Load a caveat definition from the current committed set.
    pub async fn load_caveat(&self, name: &str) -> DatastoreResult<CaveatDefinition> {
        match self.backend.get(&keys::caveat::row(name)).await? {
            Some(bytes) => Ok(CaveatRow::decode(&bytes)?.definition),
            None => Err(DatastoreError::NotFound(format!("caveat {name}"))),
        }
    }

    /// All caveat definitions in the current committed set, in name order.
    pub async fn list_caveats(&self) -> DatastoreResult<Vec<CaveatDefinition>> {
        let entries = self.backend.get_range(keys::caveat::all_range()).await?;
        entries
            .iter()
            .map(|entry| Ok(CaveatRow::decode(&entry.value)?.definition))
            .collect()
    }
}

/// Builder-style tuple query; unset dimensions match everything.
///
/// Results come back sorted by tuple identity, so equal queries at equal
/// revisions return identical sequences.
pub struct TupleQuery<'r, 'a, S: StorageBackend> {
    reader: &'r Reader<'a, S>,
    filter: TupleFilter,
}

impl<S: StorageBackend> TupleQuery<'_, '_, S> {
    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.filter.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_relation(mut self, relation: impl Into<String>) -> Self {
        self.filter.relation = Some(relation.into());
        self
    }

    pub fn with_subject_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.filter.subject_namespace = Some(namespace.into());
        self
    }

    pub fn with_subject_id(mut self, subject_id: impl Into<String>) -> Self {
        self.filter.subject_id = Some(subject_id.into());
        self
    }

    pub fn with_subject_relation(mut self, relation: impl Into<String>) -> Self {
        self.filter.subject_relation = Some(relation.into());
        self
    }

    pub async fn execute(self) -> DatastoreResult<Vec<RelationTuple>> {
        self.reader.query_filter(&self.filter).await
    }
}
