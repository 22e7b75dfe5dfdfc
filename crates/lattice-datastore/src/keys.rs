//! Key layout for datastore rows.
//!
//! All keys are UTF-8 strings under the `lattice:` prefix. Name and id
//! segments are escaped so that `:` separates segments and `~` (0x7E)
//! terminates ranges unambiguously: every escaped byte sorts below `~`, and
//! no escaped segment contains a raw `:`. Range scans then rely on
//! `prefix:` .. `prefix:~` covering exactly the keys under a prefix without
//! leaking into sibling prefixes, and two distinct identities can never
//! join to the same key path.
//!
//! ```text
//! lattice:tuple:{rns}:{rid}:{rrel}:{sns}:{sid}:{srel}:{created:020}  → TupleRow
//! lattice:tuplelive:{rns}:{rid}:{rrel}:{sns}:{sid}:{srel}            → LiveMarker
//! lattice:ns:{name}:{created:020}                                    → NamespaceRow
//! lattice:nslive:{name}                                              → LiveMarker
//! lattice:caveat:{name}                                              → CaveatRow
//! ```
//!
//! The live-marker keys index the single live version of an identity. Every
//! writer that changes an identity's liveness writes its marker, so
//! concurrent writers of the same identity collide at commit.

use std::fmt::Write;
use std::ops::Range;

use lattice_types::{RelationTuple, Revision};

/// Escape one name/id segment for use in a key path.
///
/// Bytes outside a conservative safe set are percent-encoded. The safe set
/// excludes `:` (the segment separator), `~` (the range terminator), `%`
/// (the escape itself), and everything that sorts at or above `~`, so
/// escaping is injective and escaped segments always stay inside their
/// prefix range.
fn escaped(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for &byte in segment.as_bytes() {
        match byte {
            b'a'..=b'z'
            | b'A'..=b'Z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'/'
            | b'|'
            | b'='
            | b'+'
            | b'@' => out.push(byte as char),
            _ => {
                // Infallible for String.
                let _ = write!(out, "%{byte:02X}");
            }
        }
    }
    out
}

/// The identity of a tuple as a key path segment.
fn identity_path(tuple: &RelationTuple) -> String {
    format!(
        "{}:{}:{}:{}:{}:{}",
        escaped(&tuple.resource.namespace),
        escaped(&tuple.resource.object_id),
        escaped(&tuple.resource.relation),
        escaped(&tuple.subject.namespace),
        escaped(&tuple.subject.object_id),
        escaped(&tuple.subject.relation)
    )
}

fn prefix_range(prefix: String) -> Range<Vec<u8>> {
    let start = prefix.clone().into_bytes();
    let end = format!("{prefix}~").into_bytes();
    start..end
}

pub(crate) mod tuple {
    use super::*;

    /// Row key for one version of a tuple.
    pub fn row(t: &RelationTuple, created: Revision) -> Vec<u8> {
        format!("lattice:tuple:{}:{:020}", identity_path(t), created.0).into_bytes()
    }

    /// Live-marker key for a tuple identity.
    pub fn live(t: &RelationTuple) -> Vec<u8> {
        format!("lattice:tuplelive:{}", identity_path(t)).into_bytes()
    }

    /// Range covering all versions of tuples under a resource namespace.
    pub fn namespace_range(namespace: &str) -> Range<Vec<u8>> {
        prefix_range(format!("lattice:tuple:{}:", escaped(namespace)))
    }

    /// Range covering every tuple row in the store.
    pub fn all_range() -> Range<Vec<u8>> {
        prefix_range("lattice:tuple:".to_string())
    }
}

pub(crate) mod namespace {
    use super::*;

    /// Row key for one version of a namespace definition.
    pub fn row(name: &str, created: Revision) -> Vec<u8> {
        format!("lattice:ns:{}:{:020}", escaped(name), created.0).into_bytes()
    }

    /// Live-marker key for a namespace.
    pub fn live(name: &str) -> Vec<u8> {
        format!("lattice:nslive:{}", escaped(name)).into_bytes()
    }

    /// Range covering all versions of one namespace definition.
    pub fn name_range(name: &str) -> Range<Vec<u8>> {
        prefix_range(format!("lattice:ns:{}:", escaped(name)))
    }

    /// Range covering every namespace row in the store.
    pub fn all_range() -> Range<Vec<u8>> {
        prefix_range("lattice:ns:".to_string())
    }
}

pub(crate) mod caveat {
    use super::*;

    /// Row key for a caveat definition.
    pub fn row(name: &str) -> Vec<u8> {
        format!("lattice:caveat:{}", escaped(name)).into_bytes()
    }

    /// Range covering every caveat row in the store.
    pub fn all_range() -> Range<Vec<u8>> {
        prefix_range("lattice:caveat:".to_string())
    }
}
