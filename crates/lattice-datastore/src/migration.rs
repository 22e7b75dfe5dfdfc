//! Migration phases for the lifetime-column scheme change.
//!
//! Rows carry two parallel lifetime pairs: the legacy counter-based pair and
//! the snapshot-ordered pair being migrated to. Each running node is
//! configured with a phase that decides which pairs are written and which
//! pair is authoritative for visibility. Rolling the fleet forward one phase
//! at a time keeps mixed-version nodes agreeing on what is visible.

use serde::{Deserialize, Serialize};

/// Which lifetime columns a node writes and reads.
///
/// Phases are rolled out in declaration order; each step is safe to run
/// mixed with the previous one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MigrationPhase {
    /// Write only the legacy pair; read the legacy pair.
    #[default]
    LegacyOnly,

    /// Write both pairs; the legacy pair stays authoritative for reads.
    DualWriteReadLegacy,

    /// Write both pairs; the snapshot pair is authoritative for reads,
    /// falling back to the legacy pair for rows written before backfill.
    DualWriteReadNew,
}

impl MigrationPhase {
    /// Whether writes populate the snapshot-ordered pair.
    pub fn writes_snapshot(self) -> bool {
        !matches!(self, Self::LegacyOnly)
    }

    /// Whether reads treat the snapshot-ordered pair as authoritative.
    pub fn reads_snapshot(self) -> bool {
        matches!(self, Self::DualWriteReadNew)
    }
}
