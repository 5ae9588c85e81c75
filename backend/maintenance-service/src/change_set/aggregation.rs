//! Answer statistics and difficulty recomputation.
//!
//! Logs are folded into a [`StatsAccumulator`] owned by the caller, turned
//! into counter increments for questions that still exist, and difficulty is
//! recomputed from the lifetime counters once enough answers were seen.

use super::{BuildOutcome, DocumentRef};
use document_store::{Document, DocumentLookup, FieldPath};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

pub const FIELD_QUESTION_ID: &str = "questionId";
pub const FIELD_WAS_CORRECT: &str = "wasCorrect";
pub const FIELD_TIMES_ANSWERED: &str = "timesAnswered";
pub const FIELD_TIMES_CORRECT: &str = "timesCorrect";
pub const FIELD_DIFFICULTY: &str = "difficulty";

/// Answers accumulated for one question during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityStats {
    pub answered: u64,
    pub correct: u64,
}

/// Per-question tallies built from a log snapshot.
#[derive(Debug, Clone, Default)]
pub struct StatsAccumulator {
    stats: BTreeMap<String, EntityStats>,
    consumed: Vec<String>,
    malformed: usize,
}

impl StatsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_logs(logs: &[Document]) -> Self {
        let mut acc = Self::new();
        for log in logs {
            acc.record(log);
        }
        acc
    }

    /// Fold one log entry in. Every entry is marked consumed, valid or not.
    pub fn record(&mut self, log: &Document) {
        self.consumed.push(log.id.clone());

        let question_id = match log.get(FIELD_QUESTION_ID) {
            Some(Value::String(id)) if !id.is_empty() => id,
            _ => {
                warn!(log_id = %log.id, "Ignoring answer log with invalid questionId");
                self.malformed += 1;
                return;
            }
        };

        let entry = self.stats.entry(question_id.clone()).or_default();
        entry.answered += 1;
        if log.get(FIELD_WAS_CORRECT) == Some(&Value::Bool(true)) {
            entry.correct += 1;
        }
    }

    pub fn get(&self, question_id: &str) -> Option<EntityStats> {
        self.stats.get(question_id).copied()
    }

    /// Question keys mentioned by valid logs, sorted.
    pub fn question_ids(&self) -> Vec<String> {
        self.stats.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &EntityStats)> {
        self.stats.iter()
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    pub fn malformed(&self) -> usize {
        self.malformed
    }

    /// Ids of every log entry folded in, in scan order.
    pub fn consumed_log_ids(&self) -> &[String] {
        &self.consumed
    }
}

/// Counter increments for questions that exist in `canonical`.
///
/// Contributions for missing questions are dropped so no phantom counters
/// are created.
pub fn build_counter_updates(
    collection: &str,
    stats: &StatsAccumulator,
    canonical: &[DocumentLookup],
) -> BuildOutcome {
    let existing: HashSet<&str> = canonical
        .iter()
        .filter(|lookup| lookup.exists)
        .map(|lookup| lookup.id.as_str())
        .collect();

    let mut outcome = BuildOutcome::default();
    for (question_id, entity) in stats.iter() {
        if !existing.contains(question_id.as_str()) {
            debug!(question_id = %question_id, "Dropping stats for unknown question");
            outcome.skipped_references += 1;
            continue;
        }

        let target = DocumentRef::new(collection, question_id.clone());
        outcome.change_set.increment_field(
            target.clone(),
            FieldPath::field(FIELD_TIMES_ANSWERED),
            saturating_delta(entity.answered),
        );
        outcome.change_set.increment_field(
            target,
            FieldPath::field(FIELD_TIMES_CORRECT),
            saturating_delta(entity.correct),
        );
    }
    outcome
}

fn saturating_delta(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DifficultyPolicy {
    /// Recompute only when `timesAnswered` is strictly greater than this
    pub threshold: u64,
    /// Difficulty assumed when none is stored
    pub default_difficulty: i64,
}

impl Default for DifficultyPolicy {
    fn default() -> Self {
        Self {
            threshold: 100,
            default_difficulty: 5,
        }
    }
}

/// 10-bucket step function over the success ratio.
///
/// ratio >= 0.9 maps to 1, each lower tenth adds one, ratio < 0.1 maps to 10.
/// Integer arithmetic keeps the bucket edges exact.
pub fn difficulty_for(answered: u64, correct: u64) -> i64 {
    if answered == 0 {
        return 10;
    }
    let correct = correct.min(answered);
    let decile = (u128::from(correct) * 10 / u128::from(answered)).min(9);
    10 - decile as i64
}

/// Difficulty updates for every question whose recomputed value differs.
pub fn build_difficulty_updates(
    collection: &str,
    questions: &[Document],
    policy: &DifficultyPolicy,
) -> BuildOutcome {
    let mut outcome = BuildOutcome::default();

    for question in questions {
        let parsed = (
            read_counter(question, FIELD_TIMES_ANSWERED),
            read_counter(question, FIELD_TIMES_CORRECT),
            read_difficulty(question, policy.default_difficulty),
        );
        let (Some(answered), Some(correct), Some(current)) = parsed else {
            warn!(question_id = %question.id, "Skipping question with malformed counters");
            outcome.malformed += 1;
            continue;
        };

        if answered <= policy.threshold {
            continue;
        }

        let recomputed = difficulty_for(answered, correct);
        if recomputed != current {
            outcome.change_set.set_field(
                DocumentRef::new(collection, question.id.clone()),
                FieldPath::field(FIELD_DIFFICULTY),
                Value::from(recomputed),
            );
        }
    }
    outcome
}

/// Missing counters read as zero; anything but a non-negative whole number is malformed.
fn read_counter(doc: &Document, field: &str) -> Option<u64> {
    match doc.get(field) {
        None | Some(Value::Null) => Some(0),
        Some(value) => whole_number(value).and_then(|n| u64::try_from(n).ok()),
    }
}

fn read_difficulty(doc: &Document, default: i64) -> Option<i64> {
    match doc.get(FIELD_DIFFICULTY) {
        None | Some(Value::Null) => Some(default),
        Some(value) => whole_number(value),
    }
}

fn whole_number(value: &Value) -> Option<i64> {
    let Value::Number(number) = value else {
        return None;
    };
    if let Some(n) = number.as_i64() {
        return Some(n);
    }
    let f = number.as_f64()?;
    (f.fract() == 0.0 && f.abs() < i64::MAX as f64).then_some(f as i64)
}
