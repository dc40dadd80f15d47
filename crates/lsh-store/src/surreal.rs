//! SurrealDB storage backend.
//!
//! Remote relational flavour of [`StorageBackend`]: one table per
//! collection with snake_case fields, timestamps serialized as ISO-8601
//! strings, and soft deletes via `deleted_at`.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::engine::local::{Db, Mem};
use surrealdb::engine::remote::ws::{Client, Ws};
use surrealdb::{Connection, Surreal};
use tracing::{debug, info, instrument};

use crate::error::{StorageError, StorageResult};
use crate::{Collection, Row, StorageBackend};

/// Wire representation of one row.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRow {
    entry_id: String,
    value: serde_json::Value,
    inserted_at: String,
    updated_at: String,
    deleted_at: Option<String>,
}

impl StoredRow {
    fn into_row(self) -> Row {
        Row {
            id: self.entry_id,
            inserted_at: parse_iso(&self.inserted_at),
            updated_at: parse_iso(&self.updated_at),
            value: self.value,
        }
    }
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_iso(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// SurrealDB-backed store, generic over the connection engine.
pub struct SurrealStore<C: Connection> {
    db: Surreal<C>,
}

impl SurrealStore<Db> {
    /// Connect to an in-memory engine (tests, single-process use).
    #[instrument(skip_all)]
    pub async fn connect_memory() -> StorageResult<Self> {
        info!("connecting to SurrealDB (in-memory)");
        let db = Surreal::new::<Mem>(())
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Self::finish_connect(db).await
    }
}

impl SurrealStore<Client> {
    /// Connect to a remote SurrealDB server over WebSocket.
    #[instrument(skip(address))]
    pub async fn connect(address: &str) -> StorageResult<Self> {
        info!("connecting to SurrealDB at {address}");
        let db = Surreal::new::<Ws>(address)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Self::finish_connect(db).await
    }
}

impl<C: Connection> SurrealStore<C> {
    async fn finish_connect(db: Surreal<C>) -> StorageResult<Self> {
        db.use_ns("lsh")
            .use_db("main")
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let store = SurrealStore { db };
        store.init_schema().await?;
        Ok(store)
    }

    /// Define one table per collection.
    async fn init_schema(&self) -> StorageResult<()> {
        debug!("initializing lsh storage schema");
        let mut schema = String::new();
        for collection in Collection::ALL {
            let table = collection.as_str();
            schema.push_str(&format!(
                r#"
                DEFINE TABLE {table} SCHEMAFULL;
                DEFINE FIELD entry_id ON {table} TYPE string;
                DEFINE FIELD value ON {table} FLEXIBLE TYPE any;
                DEFINE FIELD inserted_at ON {table} TYPE string;
                DEFINE FIELD updated_at ON {table} TYPE string;
                DEFINE FIELD deleted_at ON {table} TYPE option<string>;
                DEFINE INDEX idx_{table}_entry ON {table} FIELDS entry_id UNIQUE;
                "#
            ));
        }
        self.db
            .query(schema)
            .await
            .map_err(|e| StorageError::SchemaSetup(e.to_string()))?;
        Ok(())
    }

    async fn read_live(&self, collection: Collection, id: &str) -> StorageResult<Option<StoredRow>> {
        let mut result = self
            .db
            .query("SELECT * FROM type::table($table) WHERE entry_id = $id AND deleted_at IS NONE")
            .bind(("table", collection.as_str()))
            .bind(("id", id.to_string()))
            .await?;
        let rows: Vec<StoredRow> = result.take(0)?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl<C: Connection> StorageBackend for SurrealStore<C> {
    async fn upsert(
        &self,
        collection: Collection,
        id: &str,
        value: serde_json::Value,
    ) -> StorageResult<()> {
        let now = now_iso();
        if self.read_live(collection, id).await?.is_some() {
            self.db
                .query(
                    "UPDATE type::table($table) SET value = $value, updated_at = $now \
                     WHERE entry_id = $id AND deleted_at IS NONE",
                )
                .bind(("table", collection.as_str()))
                .bind(("id", id.to_string()))
                .bind(("value", value))
                .bind(("now", now))
                .await?;
            return Ok(());
        }

        let row = StoredRow {
            entry_id: id.to_string(),
            value,
            inserted_at: now.clone(),
            updated_at: now,
            deleted_at: None,
        };
        let _created: Option<StoredRow> = self.db.create(collection.as_str()).content(row).await?;
        Ok(())
    }

    async fn read(&self, collection: Collection, id: &str) -> StorageResult<Option<Row>> {
        Ok(self
            .read_live(collection, id)
            .await?
            .map(StoredRow::into_row))
    }

    async fn delete(&self, collection: Collection, id: &str) -> StorageResult<bool> {
        let mut result = self
            .db
            .query(
                "UPDATE type::table($table) SET deleted_at = $now \
                 WHERE entry_id = $id AND deleted_at IS NONE RETURN BEFORE",
            )
            .bind(("table", collection.as_str()))
            .bind(("id", id.to_string()))
            .bind(("now", now_iso()))
            .await?;
        let rows: Vec<StoredRow> = result.take(0)?;
        Ok(!rows.is_empty())
    }

    async fn read_all(&self, collection: Collection) -> StorageResult<Vec<Row>> {
        let mut result = self
            .db
            .query(
                "SELECT * FROM type::table($table) WHERE deleted_at IS NONE \
                 ORDER BY inserted_at ASC",
            )
            .bind(("table", collection.as_str()))
            .await?;
        let rows: Vec<StoredRow> = result.take(0)?;
        Ok(rows.into_iter().map(StoredRow::into_row).collect())
    }

    async fn list_recent(&self, collection: Collection, limit: usize) -> StorageResult<Vec<Row>> {
        let mut result = self
            .db
            .query(
                "SELECT * FROM type::table($table) WHERE deleted_at IS NONE \
                 ORDER BY inserted_at DESC LIMIT $limit",
            )
            .bind(("table", collection.as_str()))
            .bind(("limit", limit as i64))
            .await?;
        let rows: Vec<StoredRow> = result.take(0)?;
        Ok(rows.into_iter().map(StoredRow::into_row).collect())
    }

    async fn flush(&self) -> StorageResult<()> {
        // The server owns durability; nothing is buffered client-side.
        Ok(())
    }
}
