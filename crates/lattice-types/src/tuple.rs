//! Relationship tuple types.
//!
//! A relationship tuple is a single subject-relation-object fact, written
//! `resource_ns:resource_id#relation@subject_ns:subject_id#subject_relation`.
//! The six namespace/object/relation fields form the tuple's identity; the
//! optional caveat is payload, not identity.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The subject relation used when a subject is referenced directly rather
/// than through one of its relations (e.g. `user:alice#...`).
pub const ELLIPSIS: &str = "...";

/// One endpoint of a relationship tuple: an object plus a relation on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectAndRelation {
    pub namespace: String,
    pub object_id: String,
    pub relation: String,
}

impl ObjectAndRelation {
    pub fn new(
        namespace: impl Into<String>,
        object_id: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            object_id: object_id.into(),
            relation: relation.into(),
        }
    }
}

/// A reference from a tuple to a caveat definition, with the context values
/// the caveat should be evaluated against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaveatReference {
    pub caveat_name: String,
    /// Arbitrary JSON context; treated as an opaque payload by the store.
    #[serde(default)]
    pub context: serde_json::Value,
}

/// Borrowed identity of a tuple: the six fields that uniquely identify a
/// live relationship. At most one live row per identity may exist.
pub type TupleIdentity<'a> = (&'a str, &'a str, &'a str, &'a str, &'a str, &'a str);

/// A single relationship fact between a subject and a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationTuple {
    pub resource: ObjectAndRelation,
    pub subject: ObjectAndRelation,
    /// Optional caveat payload. Not part of the tuple's identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caveat: Option<CaveatReference>,
}

impl RelationTuple {
    /// The identity six-tuple, used for uniqueness and deterministic ordering.
    pub fn identity(&self) -> TupleIdentity<'_> {
        (
            &self.resource.namespace,
            &self.resource.object_id,
            &self.resource.relation,
            &self.subject.namespace,
            &self.subject.object_id,
            &self.subject.relation,
        )
    }

    /// Whether two tuples refer to the same relationship, ignoring caveats.
    pub fn same_identity(&self, other: &RelationTuple) -> bool {
        self.identity() == other.identity()
    }

    /// Parse a tuple from its canonical string form, e.g.
    /// `doc:readme#viewer@user:alice` or `doc:readme#viewer@group:eng#member`.
    /// A missing subject relation defaults to [`ELLIPSIS`].
    pub fn parse(input: &str) -> Result<Self, ParseTupleError> {
        let (resource_part, subject_part) = input
            .split_once('@')
            .ok_or_else(|| ParseTupleError::new(input, "missing `@` separator"))?;

        let resource = parse_endpoint(resource_part)
            .ok_or_else(|| ParseTupleError::new(input, "malformed resource"))?;
        if resource.relation == ELLIPSIS {
            return Err(ParseTupleError::new(input, "resource relation may not be `...`"));
        }

        let subject = parse_endpoint(subject_part)
            .ok_or_else(|| ParseTupleError::new(input, "malformed subject"))?;

        Ok(Self { resource, subject, caveat: None })
    }

    /// Attach a caveat reference to this tuple.
    pub fn with_caveat(mut self, caveat_name: impl Into<String>, context: serde_json::Value) -> Self {
        self.caveat = Some(CaveatReference { caveat_name: caveat_name.into(), context });
        self
    }
}

fn parse_endpoint(input: &str) -> Option<ObjectAndRelation> {
    let (object_part, relation) = match input.split_once('#') {
        Some((object_part, relation)) => (object_part, relation),
        None => (input, ELLIPSIS),
    };
    let (namespace, object_id) = object_part.split_once(':')?;
    if namespace.is_empty() || object_id.is_empty() || relation.is_empty() {
        return None;
    }
    Some(ObjectAndRelation::new(namespace, object_id, relation))
}

impl std::fmt::Display for RelationTuple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}#{}@{}:{}",
            self.resource.namespace,
            self.resource.object_id,
            self.resource.relation,
            self.subject.namespace,
            self.subject.object_id,
        )?;
        if self.subject.relation != ELLIPSIS {
            write!(f, "#{}", self.subject.relation)?;
        }
        Ok(())
    }
}

/// Error returned when a tuple string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid tuple `{input}`: {reason}")]
pub struct ParseTupleError {
    pub input: String,
    pub reason: String,
}

impl ParseTupleError {
    fn new(input: &str, reason: &str) -> Self {
        Self { input: input.to_string(), reason: reason.to_string() }
    }
}

// ============================================================================
// Updates
// ============================================================================

/// The kind of mutation applied to a relationship tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TupleOperation {
    /// Insert a new tuple; fails if a live tuple with the same identity exists.
    Create,
    /// Upsert: tombstone any live tuple with the same identity, then insert.
    Touch,
    /// Tombstone the live tuple with this identity; a no-op if none is live.
    Delete,
}

/// A single operation in a relationship write batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationTupleUpdate {
    pub operation: TupleOperation,
    pub tuple: RelationTuple,
}

impl RelationTupleUpdate {
    pub fn create(tuple: RelationTuple) -> Self {
        Self { operation: TupleOperation::Create, tuple }
    }

    pub fn touch(tuple: RelationTuple) -> Self {
        Self { operation: TupleOperation::Touch, tuple }
    }

    pub fn delete(tuple: RelationTuple) -> Self {
        Self { operation: TupleOperation::Delete, tuple }
    }
}

// ============================================================================
// Filters
// ============================================================================

/// A conjunctive filter over relationship tuples.
///
/// The resource namespace is always required; every other field is optional,
/// and `None` matches all values of that dimension. The same semantics are
/// shared by queries and bulk deletion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[builder(on(String, into))]
pub struct TupleFilter {
    pub resource_namespace: String,
    pub resource_id: Option<String>,
    pub relation: Option<String>,
    pub subject_namespace: Option<String>,
    pub subject_id: Option<String>,
    pub subject_relation: Option<String>,
}

impl TupleFilter {
    /// Whether the given tuple matches every set dimension of this filter.
    pub fn matches(&self, tuple: &RelationTuple) -> bool {
        if tuple.resource.namespace != self.resource_namespace {
            return false;
        }
        let checks = [
            (&self.resource_id, &tuple.resource.object_id),
            (&self.relation, &tuple.resource.relation),
            (&self.subject_namespace, &tuple.subject.namespace),
            (&self.subject_id, &tuple.subject.object_id),
            (&self.subject_relation, &tuple.subject.relation),
        ];
        checks.iter().all(|(filter, actual)| match filter {
            Some(expected) => expected == *actual,
            None => true,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_tuple() {
        let tpl = RelationTuple::parse("doc:readme#viewer@group:eng#member").unwrap();
        assert_eq!(tpl.resource.namespace, "doc");
        assert_eq!(tpl.resource.object_id, "readme");
        assert_eq!(tpl.resource.relation, "viewer");
        assert_eq!(tpl.subject.namespace, "group");
        assert_eq!(tpl.subject.object_id, "eng");
        assert_eq!(tpl.subject.relation, "member");
    }

    #[test]
    fn test_parse_defaults_subject_relation_to_ellipsis() {
        let tpl = RelationTuple::parse("doc:readme#viewer@user:alice").unwrap();
        assert_eq!(tpl.subject.relation, ELLIPSIS);

        let explicit = RelationTuple::parse("doc:readme#viewer@user:alice#...").unwrap();
        assert!(tpl.same_identity(&explicit));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(RelationTuple::parse("doc:readme#viewer").is_err());
        assert!(RelationTuple::parse("doc#viewer@user:alice").is_err());
        assert!(RelationTuple::parse("doc:readme@user:alice").is_err());
        assert!(RelationTuple::parse(":x#viewer@user:alice").is_err());
    }

    #[test]
    fn test_display_roundtrip() {
        for input in ["doc:readme#viewer@user:alice", "doc:readme#viewer@group:eng#member"] {
            let tpl = RelationTuple::parse(input).unwrap();
            assert_eq!(tpl.to_string(), input);
            assert_eq!(RelationTuple::parse(&tpl.to_string()).unwrap(), tpl);
        }
    }

    #[test]
    fn test_identity_ignores_caveat() {
        let plain = RelationTuple::parse("doc:readme#viewer@user:alice").unwrap();
        let caveated = plain
            .clone()
            .with_caveat("only_weekdays", serde_json::json!({"timezone": "UTC"}));
        assert_ne!(plain, caveated);
        assert!(plain.same_identity(&caveated));
    }

    #[test]
    fn test_filter_matches_conjunctively() {
        let tpl = RelationTuple::parse("doc:readme#viewer@user:alice").unwrap();

        let all = TupleFilter::builder().resource_namespace("doc").build();
        assert!(all.matches(&tpl));

        let narrowed = TupleFilter::builder()
            .resource_namespace("doc")
            .resource_id("readme")
            .relation("viewer")
            .subject_namespace("user")
            .build();
        assert!(narrowed.matches(&tpl));

        let wrong_relation = TupleFilter::builder()
            .resource_namespace("doc")
            .relation("editor")
            .build();
        assert!(!wrong_relation.matches(&tpl));

        let wrong_namespace = TupleFilter::builder().resource_namespace("folder").build();
        assert!(!wrong_namespace.matches(&tpl));
    }
}
