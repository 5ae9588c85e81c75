//! Dangling answer references.

use super::{BuildOutcome, DocumentRef};
use document_store::{Document, FieldPath};
use serde_json::Value;
use std::collections::HashSet;
use tracing::warn;

/// Delete every `field.<key>` entry of an actor whose key is not in `canonical`.
///
/// Actors without the field, or without stale keys, produce nothing.
pub fn build_reference_cleanup(
    collection: &str,
    field: &str,
    canonical: &HashSet<String>,
    actors: &[Document],
) -> BuildOutcome {
    let mut outcome = BuildOutcome::default();
    let base = FieldPath::field(field);

    for actor in actors {
        let answers = match actor.get(field) {
            None | Some(Value::Null) => continue,
            Some(Value::Object(answers)) => answers,
            Some(_) => {
                warn!(user_id = %actor.id, field, "Skipping user with non-map answer field");
                outcome.malformed += 1;
                continue;
            }
        };

        for key in answers.keys().filter(|key| !canonical.contains(*key)) {
            outcome
                .change_set
                .delete_field(DocumentRef::new(collection, actor.id.clone()), base.child(key.clone()));
        }
    }
    outcome
}
