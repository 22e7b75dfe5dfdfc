//! # Lattice Types
//!
//! Shared type definitions for the LatticeDB tuple storage engine.
//!
//! This crate provides the domain types used across the LatticeDB crates,
//! ensuring a single source of truth and preventing circular dependencies.

#![deny(unsafe_code)]

use serde::{Deserialize, Serialize};

pub mod schema;
pub mod tuple;

pub use schema::{CaveatDefinition, NamespaceDefinition};
pub use tuple::{
    CaveatReference, ObjectAndRelation, ParseTupleError, RelationTuple, RelationTupleUpdate,
    TupleFilter, TupleOperation, ELLIPSIS,
};

// ============================================================================
// Revision
// ============================================================================

/// A revision token for consistent point-in-time reads.
///
/// A revision is identical in representation to a transaction id: every
/// committed write transaction's id becomes the revision at which its effects
/// are visible. Revisions are totally ordered; equal revisions denote an
/// identical visible snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Revision(pub u64);

impl Revision {
    /// Sentinel for the `deleted_at` lifetime column of a row that has not
    /// been tombstoned. Sorts after every allocatable transaction id, so the
    /// liveness interval check `created <= rev < deleted` needs no special
    /// casing for live rows.
    pub const LIVE: Revision = Revision(u64::MAX);

    pub fn zero() -> Self {
        Self(0)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
