//! In-process document store.
//!
//! Used by tests and local dry runs. Batches are applied to a staged copy of
//! the touched collections and swapped in only when every operation
//! succeeded, so a failing batch leaves no trace.

use crate::document::{Document, DocumentLookup, Fields, Filter};
use crate::error::{StoreError, StoreResult};
use crate::mutation::{apply_updates, WriteBatch, WriteOp, DEFAULT_MAX_BATCH_OPS};
use crate::DocumentStore;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::debug;

type Collection = BTreeMap<String, Fields>;

#[derive(Default)]
struct State {
    collections: HashMap<String, Collection>,
    commit_attempts: usize,
    failing_attempts: HashSet<usize>,
    committed_sizes: Vec<usize>,
}

pub struct MemoryDocumentStore {
    state: RwLock<State>,
    max_batch_ops: usize,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::with_max_batch_ops(DEFAULT_MAX_BATCH_OPS)
    }

    pub fn with_max_batch_ops(max_batch_ops: usize) -> Self {
        Self {
            state: RwLock::new(State::default()),
            max_batch_ops,
        }
    }

    /// Insert or replace a document. Non-object values are stored as an empty map.
    pub async fn insert(&self, collection: &str, id: &str, value: Value) {
        let fields = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let mut state = self.state.write().await;
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), fields);
    }

    pub async fn get(&self, collection: &str, id: &str) -> Option<Value> {
        let state = self.state.read().await;
        state
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|fields| Value::Object(fields.clone()))
    }

    pub async fn count(&self, collection: &str) -> usize {
        let state = self.state.read().await;
        state.collections.get(collection).map_or(0, BTreeMap::len)
    }

    /// Make the `attempt`-th commit call (1-based, counted from store creation) fail.
    pub async fn fail_commit(&self, attempt: usize) {
        self.state.write().await.failing_attempts.insert(attempt);
    }

    /// Operation counts of successful commits, in commit order.
    pub async fn committed_batch_sizes(&self) -> Vec<usize> {
        self.state.read().await.committed_sizes.clone()
    }

    pub async fn commit_attempts(&self) -> usize {
        self.state.read().await.commit_attempts
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn scan(&self, collection: &str, filters: &[Filter]) -> StoreResult<Vec<Document>> {
        let state = self.state.read().await;
        let documents = state
            .collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, fields)| Document::new(id.clone(), fields.clone()))
                    .filter(|doc| filters.iter().all(|f| f.matches(doc)))
                    .collect()
            })
            .unwrap_or_default();
        Ok(documents)
    }

    async fn get_many(&self, collection: &str, ids: &[String]) -> StoreResult<Vec<DocumentLookup>> {
        let state = self.state.read().await;
        let docs = state.collections.get(collection);
        Ok(ids
            .iter()
            .map(|id| match docs.and_then(|d| d.get(id)) {
                Some(fields) => DocumentLookup::found(Document::new(id.clone(), fields.clone())),
                None => DocumentLookup::missing(id.clone()),
            })
            .collect())
    }

    fn max_batch_ops(&self) -> usize {
        self.max_batch_ops
    }

    async fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.commit_attempts += 1;
        let attempt = state.commit_attempts;

        if state.failing_attempts.remove(&attempt) {
            return Err(StoreError::Injected(format!("commit #{attempt} rejected")));
        }
        if batch.len() > self.max_batch_ops {
            return Err(StoreError::BatchLimitExceeded {
                limit: self.max_batch_ops,
            });
        }

        let size = batch.len();
        let mut staged: HashMap<String, Collection> = HashMap::new();
        for op in batch.into_ops() {
            let docs = staged
                .entry(op.collection().to_string())
                .or_insert_with(|| {
                    state
                        .collections
                        .get(op.collection())
                        .cloned()
                        .unwrap_or_default()
                });
            match op {
                WriteOp::Update {
                    collection,
                    id,
                    updates,
                } => {
                    let fields = docs.get_mut(&id).ok_or_else(|| StoreError::DocumentNotFound {
                        collection: collection.clone(),
                        id: id.clone(),
                    })?;
                    apply_updates(&collection, &id, fields, &updates)?;
                }
                WriteOp::Delete { id, .. } => {
                    docs.remove(&id);
                }
            }
        }

        for (name, docs) in staged {
            state.collections.insert(name, docs);
        }
        state.committed_sizes.push(size);
        debug!(attempt, operations = size, "Memory batch committed");

        Ok(())
    }
}
