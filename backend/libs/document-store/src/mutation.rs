//! Field-level writes and the bounded write batch.

use crate::document::{FieldPath, Fields};
use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Default per-commit operation limit of the production store.
pub const DEFAULT_MAX_BATCH_OPS: usize = 500;

/// Change applied to a single field path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldUpdate {
    /// Overwrite the field, creating intermediate maps as needed
    Set(Value),
    /// Add to a numeric field; missing or non-numeric fields start from zero
    Increment(i64),
    /// Remove the field; siblings are untouched and missing paths are ignored
    Delete,
}

/// One operation inside a write batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Update {
        collection: String,
        id: String,
        updates: Vec<(FieldPath, FieldUpdate)>,
    },
    Delete {
        collection: String,
        id: String,
    },
}

impl WriteOp {
    pub fn collection(&self) -> &str {
        match self {
            WriteOp::Update { collection, .. } | WriteOp::Delete { collection, .. } => collection,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            WriteOp::Update { id, .. } | WriteOp::Delete { id, .. } => id,
        }
    }
}

/// Accumulates operations that are committed together as one atomic unit.
///
/// The batch refuses to grow past its limit, so a commit never exceeds what
/// the store accepts in a single request.
#[derive(Debug, Clone)]
pub struct WriteBatch {
    limit: usize,
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            ops: Vec::new(),
        }
    }

    pub fn update(
        &mut self,
        collection: impl Into<String>,
        id: impl Into<String>,
        updates: Vec<(FieldPath, FieldUpdate)>,
    ) -> StoreResult<()> {
        self.push(WriteOp::Update {
            collection: collection.into(),
            id: id.into(),
            updates,
        })
    }

    pub fn delete(&mut self, collection: impl Into<String>, id: impl Into<String>) -> StoreResult<()> {
        self.push(WriteOp::Delete {
            collection: collection.into(),
            id: id.into(),
        })
    }

    pub fn push(&mut self, op: WriteOp) -> StoreResult<()> {
        if self.ops.len() >= self.limit {
            return Err(StoreError::BatchLimitExceeded { limit: self.limit });
        }
        self.ops.push(op);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Apply field updates to a document's field map in order.
///
/// Shared by every adapter so nested-path semantics are identical across backends.
pub fn apply_updates(
    collection: &str,
    id: &str,
    fields: &mut Fields,
    updates: &[(FieldPath, FieldUpdate)],
) -> StoreResult<()> {
    for (path, update) in updates {
        apply_update(fields, path, update).map_err(|path| StoreError::TypeMismatch {
            collection: collection.to_string(),
            id: id.to_string(),
            path,
        })?;
    }
    Ok(())
}

/// Returns the dotted prefix that blocked the write on conflict.
fn apply_update(fields: &mut Fields, path: &FieldPath, update: &FieldUpdate) -> Result<(), String> {
    let Some((leaf, parents)) = path.segments().split_last() else {
        return Ok(());
    };

    let mut current: &mut Fields = fields;
    for (depth, segment) in parents.iter().enumerate() {
        if matches!(update, FieldUpdate::Delete) {
            match current.get_mut(segment).and_then(Value::as_object_mut) {
                Some(next) => current = next,
                None => return Ok(()),
            }
        } else {
            let entry = current
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            match entry {
                Value::Object(next) => current = next,
                _ => return Err(parents[..=depth].join(".")),
            }
        }
    }

    match update {
        FieldUpdate::Set(value) => {
            current.insert(leaf.clone(), value.clone());
        }
        FieldUpdate::Delete => {
            current.remove(leaf);
        }
        FieldUpdate::Increment(delta) => {
            let next = increment(current.get(leaf), *delta);
            current.insert(leaf.clone(), next);
        }
    }
    Ok(())
}

fn increment(existing: Option<&Value>, delta: i64) -> Value {
    match existing {
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                Value::from(i.saturating_add(delta))
            } else {
                n.as_f64()
                    .and_then(|f| Number::from_f64(f + delta as f64))
                    .map(Value::Number)
                    .unwrap_or_else(|| Value::from(delta))
            }
        }
        _ => Value::from(delta),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_delete_nested_path_keeps_siblings() {
        let mut doc = fields(json!({
            "answeredQuestions": {"A": true, "X": false},
            "dailyActivityByTheme": {"Histoire": {"2024-01-01": 3}}
        }));
        let path = FieldPath::parse("answeredQuestions.X").unwrap();
        apply_updates("Users", "u1", &mut doc, &[(path, FieldUpdate::Delete)]).unwrap();

        assert_eq!(
            Value::Object(doc),
            json!({
                "answeredQuestions": {"A": true},
                "dailyActivityByTheme": {"Histoire": {"2024-01-01": 3}}
            })
        );
    }

    #[test]
    fn test_delete_missing_path_is_noop() {
        let mut doc = fields(json!({"a": 1}));
        let path = FieldPath::parse("b.c.d").unwrap();
        apply_updates("c", "d", &mut doc, &[(path, FieldUpdate::Delete)]).unwrap();
        assert_eq!(Value::Object(doc), json!({"a": 1}));
    }

    #[test]
    fn test_increment_missing_and_existing() {
        let mut doc = fields(json!({"timesAnswered": 10}));
        apply_updates(
            "Questions",
            "q1",
            &mut doc,
            &[
                (FieldPath::field("timesAnswered"), FieldUpdate::Increment(5)),
                (FieldPath::field("timesCorrect"), FieldUpdate::Increment(2)),
            ],
        )
        .unwrap();
        assert_eq!(doc["timesAnswered"], json!(15));
        assert_eq!(doc["timesCorrect"], json!(2));
    }

    #[test]
    fn test_set_creates_intermediate_maps() {
        let mut doc = Map::new();
        let path = FieldPath::parse("a.b.c").unwrap();
        apply_updates("c", "d", &mut doc, &[(path, FieldUpdate::Set(json!(7)))]).unwrap();
        assert_eq!(Value::Object(doc), json!({"a": {"b": {"c": 7}}}));
    }

    #[test]
    fn test_set_through_scalar_is_type_mismatch() {
        let mut doc = fields(json!({"a": 1}));
        let path = FieldPath::parse("a.b").unwrap();
        let err = apply_updates("c", "d", &mut doc, &[(path, FieldUpdate::Set(json!(1)))])
            .unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { ref path, .. } if path == "a"));
    }

    #[test]
    fn test_batch_refuses_ops_beyond_limit() {
        let mut batch = WriteBatch::with_limit(2);
        batch.delete("AnswerLogs", "l1").unwrap();
        batch.delete("AnswerLogs", "l2").unwrap();
        let err = batch.delete("AnswerLogs", "l3").unwrap_err();
        assert!(matches!(err, StoreError::BatchLimitExceeded { limit: 2 }));
        assert_eq!(batch.len(), 2);
    }
}
