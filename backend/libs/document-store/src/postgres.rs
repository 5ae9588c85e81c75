//! PostgreSQL-backed document store.
//!
//! Documents live in a single JSONB table keyed by `(collection, id)`. A
//! write batch runs inside one transaction: updated rows are locked with
//! `SELECT ... FOR UPDATE`, edited with [`apply_updates`] and written back,
//! so nested-path semantics match the in-memory adapter exactly.

use crate::document::{Document, DocumentLookup, Filter};
use crate::error::{StoreError, StoreResult};
use crate::mutation::{apply_updates, WriteBatch, WriteOp, DEFAULT_MAX_BATCH_OPS};
use crate::DocumentStore;
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder, Row};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

const CREATE_DOCUMENTS_TABLE: &str = include_str!("../migrations/001_create_documents_table.sql");

/// Connection settings for [`PgDocumentStore`]
#[derive(Clone)]
pub struct PgStoreConfig {
    /// Service name, used in connection logs
    pub service_name: String,
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Maximum number of connections
    pub max_connections: u32,
    /// Minimum number of connections
    pub min_connections: u32,
    /// Connection acquisition timeout (get connection from pool)
    pub acquire_timeout_secs: u64,
    /// Per-commit operation limit
    pub max_batch_ops: usize,
}

impl fmt::Debug for PgStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgStoreConfig")
            .field("service_name", &self.service_name)
            .field("database_url", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("acquire_timeout_secs", &self.acquire_timeout_secs)
            .field("max_batch_ops", &self.max_batch_ops)
            .finish()
    }
}

impl Default for PgStoreConfig {
    fn default() -> Self {
        Self {
            service_name: String::from("unknown"),
            database_url: String::new(),
            max_connections: 5,
            min_connections: 1,
            acquire_timeout_secs: 10,
            max_batch_ops: DEFAULT_MAX_BATCH_OPS,
        }
    }
}

impl PgStoreConfig {
    /// Create a new config from environment variables
    pub fn from_env(service_name: &str) -> StoreResult<Self> {
        let database_url = std::env::var("DATABASE_URL").map_err(|_| {
            StoreError::Other(anyhow::anyhow!("DATABASE_URL environment variable not set"))
        })?;
        let defaults = Self::default();

        Ok(Self {
            service_name: service_name.to_string(),
            database_url,
            max_connections: parse_env_with_default("DB_MAX_CONNECTIONS", defaults.max_connections),
            min_connections: parse_env_with_default("DB_MIN_CONNECTIONS", defaults.min_connections),
            acquire_timeout_secs: parse_env_with_default(
                "DB_ACQUIRE_TIMEOUT_SECS",
                defaults.acquire_timeout_secs,
            ),
            max_batch_ops: parse_env_with_default("DB_MAX_BATCH_OPS", defaults.max_batch_ops),
        })
    }
}

fn parse_env_with_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub struct PgDocumentStore {
    pool: PgPool,
    max_batch_ops: usize,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool, max_batch_ops: usize) -> Self {
        Self {
            pool,
            max_batch_ops,
        }
    }

    /// Open a pool using `config` and make sure the documents table exists.
    pub async fn connect(config: &PgStoreConfig) -> StoreResult<Self> {
        info!(
            service = %config.service_name,
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connecting document store to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.database_url)
            .await?;

        let store = Self::new(pool, config.max_batch_ops);
        store.ensure_schema().await?;
        Ok(store)
    }

    pub async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::query(CREATE_DOCUMENTS_TABLE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Insert or replace a whole document.
    pub async fn upsert(&self, collection: &str, id: &str, value: Value) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (collection, id, data)
            VALUES ($1, $2, $3)
            ON CONFLICT (collection, id) DO UPDATE SET data = EXCLUDED.data
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn into_fields(value: Value) -> crate::document::Fields {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn scan(&self, collection: &str, filters: &[Filter]) -> StoreResult<Vec<Document>> {
        let mut query =
            QueryBuilder::<Postgres>::new("SELECT id, data FROM documents WHERE collection = ");
        query.push_bind(collection);
        for filter in filters {
            match filter {
                Filter::Equals(path, value) => {
                    query.push(" AND data #> ");
                    query.push_bind(path.segments().to_vec());
                    query.push(" = ");
                    query.push_bind(value.clone());
                }
            }
        }
        query.push(" ORDER BY id");

        let rows = query.build().fetch_all(&self.pool).await?;
        let documents = rows
            .into_iter()
            .map(|row| {
                let id: String = row.try_get("id")?;
                let data: Value = row.try_get("data")?;
                Ok(Document::new(id, into_fields(data)))
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        debug!(collection, count = documents.len(), "Scanned collection");
        Ok(documents)
    }

    async fn get_many(&self, collection: &str, ids: &[String]) -> StoreResult<Vec<DocumentLookup>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT id, data
            FROM documents
            WHERE collection = $1 AND id = ANY($2)
            "#,
        )
        .bind(collection)
        .bind(ids.to_vec())
        .fetch_all(&self.pool)
        .await?;

        let mut found = HashMap::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            let data: Value = row.try_get("data")?;
            found.insert(id, into_fields(data));
        }

        Ok(ids
            .iter()
            .map(|id| match found.remove(id) {
                Some(fields) => DocumentLookup::found(Document::new(id.clone(), fields)),
                None => DocumentLookup::missing(id.clone()),
            })
            .collect())
    }

    fn max_batch_ops(&self) -> usize {
        self.max_batch_ops
    }

    async fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        if batch.len() > self.max_batch_ops {
            return Err(StoreError::BatchLimitExceeded {
                limit: self.max_batch_ops,
            });
        }

        // Dropping the transaction on an early return rolls it back.
        let mut tx = self.pool.begin().await?;
        let size = batch.len();

        for op in batch.ops() {
            match op {
                WriteOp::Update {
                    collection,
                    id,
                    updates,
                } => {
                    let row: Option<(Value,)> = sqlx::query_as(
                        r#"
                        SELECT data
                        FROM documents
                        WHERE collection = $1 AND id = $2
                        FOR UPDATE
                        "#,
                    )
                    .bind(collection)
                    .bind(id)
                    .fetch_optional(&mut *tx)
                    .await?;

                    let Some((data,)) = row else {
                        return Err(StoreError::DocumentNotFound {
                            collection: collection.clone(),
                            id: id.clone(),
                        });
                    };

                    let mut fields = into_fields(data);
                    apply_updates(collection, id, &mut fields, updates)?;

                    sqlx::query("UPDATE documents SET data = $3 WHERE collection = $1 AND id = $2")
                        .bind(collection)
                        .bind(id)
                        .bind(Value::Object(fields))
                        .execute(&mut *tx)
                        .await?;
                }
                WriteOp::Delete { collection, id } => {
                    sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
                        .bind(collection)
                        .bind(id)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }

        tx.commit().await?;
        debug!(operations = size, "PostgreSQL batch committed");
        Ok(())
    }
}
