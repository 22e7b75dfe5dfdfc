//! Namespace and caveat definition types.
//!
//! A namespace definition declares an object type and the relations that may
//! be written under it; the store persists the whole serialized definition
//! and validates tuple writes against the relations it names. Caveat
//! definitions are name-keyed predicate sources, opaque to the store.

use serde::{Deserialize, Serialize};

use crate::tuple::ELLIPSIS;

/// The definition of a namespace (an object type and its relations).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceDefinition {
    pub name: String,
    pub relations: Vec<String>,
}

impl NamespaceDefinition {
    pub fn new(
        name: impl Into<String>,
        relations: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            relations: relations.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether the given relation may be referenced under this namespace.
    ///
    /// The ellipsis pseudo-relation is always valid: it marks a direct
    /// subject reference rather than a relation on the subject.
    pub fn has_relation(&self, relation: &str) -> bool {
        relation == ELLIPSIS || self.relations.iter().any(|r| r == relation)
    }
}

/// A named caveat predicate definition.
///
/// The expression source is compiled and evaluated elsewhere; the store only
/// persists it and hands it back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaveatDefinition {
    pub name: String,
    pub expression: String,
}

impl CaveatDefinition {
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self { name: name.into(), expression: expression.into() }
    }
}
