//! Proptest strategies over the standard test schema.

use proptest::prelude::*;

use lattice_types::{ObjectAndRelation, RelationTuple, ELLIPSIS};

/// Lowercase identifiers as used for object ids.
pub fn object_id() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,11}"
}

/// A relation declared on the `document` namespace.
pub fn document_relation() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("owner".to_string()),
        Just("editor".to_string()),
        Just("viewer".to_string()),
    ]
}

/// A tuple valid under the standard schema: a document relation granted to
/// a user subject.
pub fn document_tuple() -> impl Strategy<Value = RelationTuple> {
    (object_id(), document_relation(), object_id()).prop_map(|(doc, relation, user)| {
        RelationTuple {
            resource: ObjectAndRelation::new("document", doc, relation),
            subject: ObjectAndRelation::new("user", user, ELLIPSIS),
            caveat: None,
        }
    })
}

/// A non-empty batch of tuples valid under the standard schema.
pub fn document_tuples(max: usize) -> impl Strategy<Value = Vec<RelationTuple>> {
    proptest::collection::vec(document_tuple(), 1..=max)
}
