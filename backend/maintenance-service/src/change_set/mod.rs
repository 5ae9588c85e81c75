//! Change Set Builder
//!
//! Pure functions turning scanned documents into an ordered list of
//! mutation intents. Nothing in here performs I/O: the jobs feed snapshots
//! in and hand the resulting [`ChangeSet`] to the committer.
//!
//! # Invariants
//! - At most one update intent and one delete intent per document
//! - Field changes aimed at the same document are merged into one intent,
//!   in first-seen document order
//! - Applying a change set and rebuilding from the post-state yields an
//!   empty change set

use document_store::{FieldPath, FieldUpdate, WriteOp};
use std::collections::HashMap;
use std::fmt;

pub mod aggregation;
pub mod references;
pub mod retention;

pub use aggregation::{
    build_counter_updates, build_difficulty_updates, difficulty_for, DifficultyPolicy,
    EntityStats, StatsAccumulator,
};
pub use references::build_reference_cleanup;
pub use retention::{build_activity_pruning, cutoff_date};

/// Address of a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentRef {
    pub collection: String,
    pub id: String,
}

impl DocumentRef {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationKind {
    /// Field-level changes; `FieldUpdate::Delete` entries are the field deletions
    UpdateFields(Vec<(FieldPath, FieldUpdate)>),
    DeleteDocument,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub target: DocumentRef,
    pub kind: MutationKind,
}

impl Mutation {
    /// Label used in logs: `update-fields`, `delete-fields` or `delete-document`.
    pub fn label(&self) -> &'static str {
        match &self.kind {
            MutationKind::UpdateFields(changes)
                if changes.iter().all(|(_, u)| matches!(u, FieldUpdate::Delete)) =>
            {
                "delete-fields"
            }
            MutationKind::UpdateFields(_) => "update-fields",
            MutationKind::DeleteDocument => "delete-document",
        }
    }
}

impl From<Mutation> for WriteOp {
    fn from(mutation: Mutation) -> Self {
        let DocumentRef { collection, id } = mutation.target;
        match mutation.kind {
            MutationKind::UpdateFields(updates) => WriteOp::Update {
                collection,
                id,
                updates,
            },
            MutationKind::DeleteDocument => WriteOp::Delete { collection, id },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Slot {
    Update,
    Delete,
}

/// Ordered, de-duplicated list of mutation intents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    mutations: Vec<Mutation>,
    index: HashMap<(DocumentRef, Slot), usize>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_field(&mut self, target: DocumentRef, path: FieldPath, value: serde_json::Value) {
        self.push_field(target, path, FieldUpdate::Set(value));
    }

    pub fn increment_field(&mut self, target: DocumentRef, path: FieldPath, delta: i64) {
        self.push_field(target, path, FieldUpdate::Increment(delta));
    }

    pub fn delete_field(&mut self, target: DocumentRef, path: FieldPath) {
        self.push_field(target, path, FieldUpdate::Delete);
    }

    /// Add a field change, merging into the document's existing update intent.
    /// A second change to the same path replaces the first.
    pub fn push_field(&mut self, target: DocumentRef, path: FieldPath, update: FieldUpdate) {
        let key = (target, Slot::Update);
        if let Some(&position) = self.index.get(&key) {
            if let MutationKind::UpdateFields(changes) = &mut self.mutations[position].kind {
                match changes.iter_mut().find(|(p, _)| *p == path) {
                    Some(existing) => existing.1 = update,
                    None => changes.push((path, update)),
                }
            }
            return;
        }

        self.index.insert(key.clone(), self.mutations.len());
        self.mutations.push(Mutation {
            target: key.0,
            kind: MutationKind::UpdateFields(vec![(path, update)]),
        });
    }

    pub fn delete_document(&mut self, target: DocumentRef) {
        let key = (target, Slot::Delete);
        if self.index.contains_key(&key) {
            return;
        }
        self.index.insert(key.clone(), self.mutations.len());
        self.mutations.push(Mutation {
            target: key.0,
            kind: MutationKind::DeleteDocument,
        });
    }

    /// Number of mutation intents (one write operation each).
    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// Number of individual field changes across all update intents.
    pub fn field_change_count(&self) -> usize {
        self.mutations
            .iter()
            .map(|m| match &m.kind {
                MutationKind::UpdateFields(changes) => changes.len(),
                MutationKind::DeleteDocument => 0,
            })
            .sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mutation> {
        self.mutations.iter()
    }

    pub fn into_mutations(self) -> Vec<Mutation> {
        self.mutations
    }
}

/// Builder output: the change set plus counts of what was left out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildOutcome {
    pub change_set: ChangeSet,
    /// Records that failed shape validation and were skipped
    pub malformed: usize,
    /// Contributions dropped because the referenced document does not exist
    pub skipped_references: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(id: &str) -> DocumentRef {
        DocumentRef::new("Users", id)
    }

    #[test]
    fn test_field_deletes_merge_into_one_intent() {
        let mut cs = ChangeSet::new();
        cs.delete_field(user("u1"), FieldPath::parse("answeredQuestions.X").unwrap());
        cs.delete_field(user("u2"), FieldPath::parse("answeredQuestions.Y").unwrap());
        cs.delete_field(user("u1"), FieldPath::parse("answeredQuestions.Z").unwrap());

        assert_eq!(cs.len(), 2);
        assert_eq!(cs.field_change_count(), 3);

        let mutations = cs.into_mutations();
        assert_eq!(mutations[0].target, user("u1"));
        assert_eq!(mutations[0].label(), "delete-fields");
        match &mutations[0].kind {
            MutationKind::UpdateFields(changes) => assert_eq!(changes.len(), 2),
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_same_path_last_change_wins() {
        let mut cs = ChangeSet::new();
        let target = DocumentRef::new("Questions", "q1");
        cs.set_field(target.clone(), FieldPath::field("difficulty"), json!(3));
        cs.set_field(target, FieldPath::field("difficulty"), json!(4));

        let mutations = cs.into_mutations();
        assert_eq!(
            mutations[0].kind,
            MutationKind::UpdateFields(vec![(
                FieldPath::field("difficulty"),
                FieldUpdate::Set(json!(4))
            )])
        );
    }

    #[test]
    fn test_document_delete_is_deduplicated() {
        let mut cs = ChangeSet::new();
        cs.delete_document(DocumentRef::new("AnswerLogs", "l1"));
        cs.delete_document(DocumentRef::new("AnswerLogs", "l1"));
        assert_eq!(cs.len(), 1);
        assert_eq!(cs.iter().next().unwrap().label(), "delete-document");
    }

    #[test]
    fn test_into_write_op() {
        let mut cs = ChangeSet::new();
        cs.increment_field(
            DocumentRef::new("Questions", "q1"),
            FieldPath::field("timesAnswered"),
            3,
        );
        let op: WriteOp = cs.into_mutations().remove(0).into();
        assert_eq!(op.collection(), "Questions");
        assert_eq!(op.id(), "q1");
        assert!(matches!(op, WriteOp::Update { ref updates, .. } if updates.len() == 1));
    }
}
