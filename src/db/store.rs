use serde_json::Value;
use std::sync::Arc;

use crate::{
    config::{Config, DatabaseMode},
    error::AppResult,
};

use super::{memory::MemoryStore, postgres::PostgresStore, query::Query};

/// A stored document together with its write version
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub id: String,
    pub version: u64,
    pub data: Value,
}

/// Condition a write requires of the document's current state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// Unconditional
    Any,
    /// The document must not exist yet
    NotExists,
    /// The document must still be at this version
    Version(u64),
}

impl Precondition {
    pub fn holds(&self, current_version: Option<u64>) -> bool {
        match self {
            Precondition::Any => true,
            Precondition::NotExists => current_version.is_none(),
            Precondition::Version(expected) => current_version == Some(*expected),
        }
    }
}

/// One mutation inside an atomic commit
#[derive(Debug, Clone)]
pub enum Write {
    Set {
        collection: String,
        id: String,
        data: Value,
        precondition: Precondition,
    },
    Delete {
        collection: String,
        id: String,
        precondition: Precondition,
    },
}

impl Write {
    pub fn collection(&self) -> &str {
        match self {
            Write::Set { collection, .. } | Write::Delete { collection, .. } => collection,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Write::Set { id, .. } | Write::Delete { id, .. } => id,
        }
    }

    pub fn precondition(&self) -> Precondition {
        match self {
            Write::Set { precondition, .. } | Write::Delete { precondition, .. } => *precondition,
        }
    }

    pub(crate) fn conflict_message(&self, current_version: Option<u64>) -> String {
        format!(
            "{}/{} expected {:?}, found {:?}",
            self.collection(),
            self.id(),
            self.precondition(),
            current_version
        )
    }
}

/// Collection/document storage with versioned, all-or-nothing commits
///
/// Backends must apply a commit atomically: if any precondition fails the
/// commit returns `AppError::WriteConflict` and no write is visible.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> AppResult<Option<Snapshot>>;

    async fn query(&self, collection: &str, query: &Query) -> AppResult<Vec<Snapshot>>;

    async fn commit(&self, writes: Vec<Write>) -> AppResult<()>;

    /// Cheap connectivity check for health endpoints
    async fn ping(&self) -> AppResult<()>;

    /// Backend name for logging and health output
    fn backend(&self) -> &'static str;
}

/// Opens the store selected by `DATABASE_MODE`
pub async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn DocumentStore>> {
    match config.database_mode {
        DatabaseMode::Memory => {
            tracing::info!("Using in-memory document store");
            Ok(Arc::new(MemoryStore::new()))
        }
        DatabaseMode::Postgres => {
            let pool =
                super::postgres::create_pool(&config.database_url, config.database_max_connections)
                    .await?;
            let store = PostgresStore::new(pool);
            store.migrate().await?;
            tracing::info!("Using PostgreSQL document store");
            Ok(Arc::new(store))
        }
    }
}
