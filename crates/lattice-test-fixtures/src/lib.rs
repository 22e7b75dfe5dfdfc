//! Shared fixtures for LatticeDB tests.
//!
//! Provides the standard document/folder/user schema used across test
//! suites, a seeded in-memory datastore, and tuple assertion helpers.
//! Helpers panic on malformed fixture input; this crate is test support
//! only.

#![deny(unsafe_code)]
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use lattice_datastore::{Datastore, DatastoreConfig, DatastoreResult, MigrationPhase};
use lattice_storage::MemoryBackend;
use lattice_types::{
    CaveatDefinition, NamespaceDefinition, RelationTuple, RelationTupleUpdate, Revision,
};

pub mod proptest_config;
pub mod strategies;

/// Install a tracing subscriber honoring `RUST_LOG`. Safe to call from
/// every test; repeated installation is ignored.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// The standard test schema: documents, folders, users.
pub fn standard_namespaces() -> Vec<NamespaceDefinition> {
    vec![
        NamespaceDefinition::new("document", ["owner", "editor", "viewer", "parent"]),
        NamespaceDefinition::new("folder", ["owner", "viewer"]),
        NamespaceDefinition::new("user", Vec::<String>::new()),
    ]
}

/// A caveat set used by caveat-aware tests.
pub fn standard_caveats() -> Vec<CaveatDefinition> {
    vec![
        CaveatDefinition::new("ip_allowlist", "request.ip in allowed_ips"),
        CaveatDefinition::new("business_hours", "request.hour >= 9 && request.hour < 17"),
    ]
}

/// Parse a fixture tuple, panicking on malformed input.
pub fn tuple(text: &str) -> RelationTuple {
    RelationTuple::parse(text).expect("fixture tuple must parse")
}

/// Parse several fixture tuples at once.
pub fn tuples(texts: &[&str]) -> Vec<RelationTuple> {
    texts.iter().map(|t| tuple(t)).collect()
}

/// An empty in-memory datastore in the default migration phase.
pub async fn empty_datastore() -> Datastore<MemoryBackend> {
    datastore_in_phase(MigrationPhase::default()).await
}

/// An empty in-memory datastore pinned to a migration phase.
pub async fn datastore_in_phase(phase: MigrationPhase) -> Datastore<MemoryBackend> {
    init_test_logging();
    let config = DatastoreConfig::builder().migration_phase(phase).build();
    Datastore::open(MemoryBackend::new(), config)
        .await
        .expect("opening an empty memory datastore cannot fail")
}

/// A datastore with the standard schema written, ready for tuple writes.
pub async fn seeded_datastore() -> Datastore<MemoryBackend> {
    let datastore = empty_datastore().await;
    write_standard_schema(&datastore).await.expect("seeding schema");
    datastore
}

/// Write the standard schema and caveats through one transaction; returns
/// the commit revision.
pub async fn write_standard_schema(
    datastore: &Datastore<MemoryBackend>,
) -> DatastoreResult<Revision> {
    let mut txn = datastore.read_write_transaction().await?;
    txn.write_namespaces(standard_namespaces()).await?;
    txn.write_caveats(standard_caveats()).await?;
    txn.commit().await
}

/// Touch a batch of fixture tuples; returns the commit revision.
pub async fn touch_tuples(
    datastore: &Datastore<MemoryBackend>,
    texts: &[&str],
) -> DatastoreResult<Revision> {
    let updates = tuples(texts).into_iter().map(RelationTupleUpdate::touch).collect();
    datastore.write_tuples(&[], updates).await
}

/// Asserts that a set of query results matches the expected tuple strings,
/// ignoring order.
pub struct TupleChecker {
    expected: Vec<String>,
}

impl TupleChecker {
    pub fn expecting(texts: &[&str]) -> Self {
        let mut expected: Vec<String> =
            texts.iter().map(|t| tuple(t).to_string()).collect();
        expected.sort();
        Self { expected }
    }

    pub fn assert_matches(&self, actual: &[RelationTuple]) {
        let mut got: Vec<String> = actual.iter().map(|t| t.to_string()).collect();
        got.sort();
        assert_eq!(got, self.expected, "tuple sets differ");
    }
}
