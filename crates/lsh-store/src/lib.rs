//! Storage backends for lsh
//!
//! A single capability set over typed collections (jobs, executions,
//! sessions, configuration, aliases, functions, history) with two
//! interchangeable implementations:
//!
//! - [`JsonFileStore`]: one JSON document per user, atomic whole-file
//!   replacement, advisory lock against a second writer.
//! - [`SurrealStore`]: remote relational store with snake_case fields,
//!   ISO-8601 timestamps, and soft deletes.
//!
//! Both preserve insertion timestamps and agree on ordering semantics:
//! `read_all` is insertion-time ascending, `list_recent` is recency
//! descending. Missing rows are `Ok(None)`, never an error.

mod error;
mod json;
mod surreal;

pub use error::{StorageError, StorageResult};
pub use json::{FlushMode, JsonFileStore};
pub use surreal::SurrealStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The typed collections a backend must hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Jobs,
    Executions,
    Sessions,
    Configuration,
    Aliases,
    Functions,
    History,
}

impl Collection {
    pub const ALL: [Collection; 7] = [
        Collection::Jobs,
        Collection::Executions,
        Collection::Sessions,
        Collection::Configuration,
        Collection::Aliases,
        Collection::Functions,
        Collection::History,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Jobs => "jobs",
            Collection::Executions => "executions",
            Collection::Sessions => "sessions",
            Collection::Configuration => "configuration",
            Collection::Aliases => "aliases",
            Collection::Functions => "functions",
            Collection::History => "history",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stored row: an id, its JSON value, and bookkeeping timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: String,
    pub value: serde_json::Value,
    pub inserted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Durable key/collection store.
///
/// Guarantees:
/// - `upsert` preserves the original insertion timestamp on update.
/// - `read` of a missing row is `Ok(None)`, distinguishing absence from
///   [`StorageError`].
/// - Callers never retry inside the backend; every operation reports
///   success or failure exactly once.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Insert or replace a row.
    async fn upsert(
        &self,
        collection: Collection,
        id: &str,
        value: serde_json::Value,
    ) -> StorageResult<()>;

    /// Read one row; `Ok(None)` when absent.
    async fn read(&self, collection: Collection, id: &str) -> StorageResult<Option<Row>>;

    /// Delete a row; returns whether it existed.
    async fn delete(&self, collection: Collection, id: &str) -> StorageResult<bool>;

    /// All rows, insertion time ascending.
    async fn read_all(&self, collection: Collection) -> StorageResult<Vec<Row>>;

    /// The `limit` most recent rows, recency descending.
    async fn list_recent(&self, collection: Collection, limit: usize) -> StorageResult<Vec<Row>>;

    /// Persist any pending state.
    async fn flush(&self) -> StorageResult<()>;
}
