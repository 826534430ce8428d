use serde_json::{Map, Value};
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::error::{AppError, AppResult};

use super::{
    query::{Filter, Query},
    store::{DocumentStore, Precondition, Snapshot, Write},
};

/// Creates a PostgreSQL connection pool
///
/// Establishes a pool of database connections for efficient reuse.
/// The pool automatically manages connection lifecycle and limits.
pub async fn create_pool(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    Ok(pool)
}

const SCHEMA: [&str; 2] = [
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        collection TEXT NOT NULL,
        id TEXT NOT NULL,
        version BIGINT NOT NULL,
        data JSONB NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (collection, id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS documents_data_idx ON documents USING GIN (data jsonb_path_ops)",
];

/// Document store persisted as JSONB rows in a single `documents` table
///
/// Equality filters are pushed down as a `data @> $2` containment test (served
/// by the GIN index); range filters, ordering and paging run in-process with
/// the same matcher the in-memory store uses.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the documents table and index if they are missing
    pub async fn migrate(&self) -> AppResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn row_to_snapshot((id, version, data): (String, i64, Value)) -> Snapshot {
        Snapshot {
            id,
            version: version as u64,
            data,
        }
    }
}

/// Builds the JSON object used for `@>` from non-null equality filters
fn containment_filter(query: &Query) -> Value {
    let mut root = Value::Object(Map::new());
    for filter in &query.filters {
        if let Filter::Eq(field, value) = filter {
            if value.is_null() {
                continue;
            }
            let mut cursor = &mut root;
            let segments: Vec<&str> = field.split('.').collect();
            for (i, segment) in segments.iter().enumerate() {
                let Value::Object(map) = cursor else { break };
                if i + 1 == segments.len() {
                    map.insert(segment.to_string(), value.clone());
                    break;
                }
                cursor = map
                    .entry(segment.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
            }
        }
    }
    root
}

#[async_trait::async_trait]
impl DocumentStore for PostgresStore {
    async fn get(&self, collection: &str, id: &str) -> AppResult<Option<Snapshot>> {
        let row: Option<(String, i64, Value)> = sqlx::query_as(
            "SELECT id, version, data FROM documents WHERE collection = $1 AND id = $2",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Self::row_to_snapshot))
    }

    async fn query(&self, collection: &str, query: &Query) -> AppResult<Vec<Snapshot>> {
        let rows: Vec<(String, i64, Value)> = sqlx::query_as(
            "SELECT id, version, data FROM documents \
             WHERE collection = $1 AND data @> $2 ORDER BY id",
        )
        .bind(collection)
        .bind(containment_filter(query))
        .fetch_all(&self.pool)
        .await?;

        let candidates = rows.into_iter().map(Self::row_to_snapshot).collect();
        Ok(query.apply(candidates))
    }

    async fn commit(&self, writes: Vec<Write>) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        for write in writes {
            let current: Option<i64> = sqlx::query_scalar(
                "SELECT version FROM documents WHERE collection = $1 AND id = $2 FOR UPDATE",
            )
            .bind(write.collection())
            .bind(write.id())
            .fetch_optional(&mut *tx)
            .await?;
            let current = current.map(|v| v as u64);

            if !write.precondition().holds(current) {
                // Dropping the transaction rolls it back
                return Err(AppError::WriteConflict(write.conflict_message(current)));
            }

            match write {
                Write::Set {
                    collection,
                    id,
                    data,
                    precondition: Precondition::NotExists,
                } => {
                    // A concurrent insert may have won between the check and here
                    let inserted = sqlx::query(
                        "INSERT INTO documents (collection, id, version, data) \
                         VALUES ($1, $2, 1, $3) ON CONFLICT DO NOTHING",
                    )
                    .bind(&collection)
                    .bind(&id)
                    .bind(data)
                    .execute(&mut *tx)
                    .await?;
                    if inserted.rows_affected() != 1 {
                        return Err(AppError::WriteConflict(format!(
                            "{}/{} already exists",
                            collection, id
                        )));
                    }
                }
                Write::Set {
                    collection, id, data, ..
                } => {
                    sqlx::query(
                        "INSERT INTO documents (collection, id, version, data) \
                         VALUES ($1, $2, 1, $3) \
                         ON CONFLICT (collection, id) DO UPDATE \
                         SET version = documents.version + 1, data = EXCLUDED.data, updated_at = now()",
                    )
                    .bind(collection)
                    .bind(id)
                    .bind(data)
                    .execute(&mut *tx)
                    .await?;
                }
                Write::Delete { collection, id, .. } => {
                    sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
                        .bind(collection)
                        .bind(id)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}
