//! # Document Store Adapter
//!
//! Key-addressed, schemaless persistence organised into named collections of
//! field maps. The maintenance jobs only talk to the [`DocumentStore`] trait:
//!
//! 1. `scan` returns a snapshot of a collection, optionally filtered
//! 2. `get_many` resolves a list of keys, reporting which ones exist
//! 3. `new_batch` + `commit` apply up to `max_batch_ops` writes atomically
//!
//! Field deletion is expressed with [`FieldUpdate::Delete`] at a nested
//! [`FieldPath`]; adapters apply it without disturbing sibling keys.
//!
//! ## Adapters
//!
//! - [`MemoryDocumentStore`]: in-process store for tests and dry runs, with
//!   commit fault injection
//! - [`PgDocumentStore`]: PostgreSQL JSONB table, one transaction per batch
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use document_store::{DocumentStore, FieldPath, FieldUpdate, MemoryDocumentStore};
//! use serde_json::json;
//!
//! # async fn demo() -> document_store::StoreResult<()> {
//! let store = MemoryDocumentStore::new();
//! store.insert("Users", "u1", json!({"answeredQuestions": {"A": true, "X": true}})).await;
//!
//! let mut batch = store.new_batch();
//! batch.update(
//!     "Users",
//!     "u1",
//!     vec![(FieldPath::parse("answeredQuestions.X")?, FieldUpdate::Delete)],
//! )?;
//! store.commit(batch).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;

mod document;
mod error;
pub mod memory;
mod mutation;
pub mod postgres;

pub use document::{Document, DocumentLookup, FieldPath, Fields, Filter};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryDocumentStore;
pub use mutation::{apply_updates, FieldUpdate, WriteBatch, WriteOp, DEFAULT_MAX_BATCH_OPS};
pub use postgres::{PgDocumentStore, PgStoreConfig};

/// Storage trait consumed by the maintenance jobs.
///
/// Implementations must make `commit` all-or-nothing for the operations of a
/// single batch. Nothing is promised across batches.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Snapshot every document of `collection` matching all `filters`.
    ///
    /// Documents are returned ordered by key.
    ///
    /// # Errors
    ///
    /// Returns error if the backing store cannot be read.
    async fn scan(&self, collection: &str, filters: &[Filter]) -> StoreResult<Vec<Document>>;

    /// Look up `ids` in `collection`, one result per requested key in request order.
    ///
    /// # Errors
    ///
    /// Returns error if the backing store cannot be read.
    async fn get_many(&self, collection: &str, ids: &[String]) -> StoreResult<Vec<DocumentLookup>>;

    /// Maximum number of operations accepted by a single commit.
    fn max_batch_ops(&self) -> usize;

    /// Start an empty batch bounded by [`DocumentStore::max_batch_ops`].
    fn new_batch(&self) -> WriteBatch {
        WriteBatch::with_limit(self.max_batch_ops())
    }

    /// Apply every operation of `batch` atomically.
    ///
    /// # Errors
    ///
    /// Returns error if any operation fails; in that case none is applied.
    async fn commit(&self, batch: WriteBatch) -> StoreResult<()>;
}
