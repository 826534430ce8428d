//! Typed access to the document store.

use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::error::{AppError, AppResult};

use super::{
    memory::MemoryStore,
    query::Query,
    store::{DocumentStore, Precondition, Snapshot, Write},
};

/// Attempts made by [`with_retry`] before giving up on a contended write
pub const MAX_TRANSACTION_ATTEMPTS: usize = 5;

/// A type stored as one document in a named collection
pub trait Document: Serialize + DeserializeOwned + Send + Sync {
    const COLLECTION: &'static str;
    /// Human-readable name used in "not found" messages
    const NAME: &'static str;

    fn id(&self) -> &str;
}

/// A document read together with the version it was read at
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub doc: T,
    pub version: u64,
}

impl<T> Deref for Versioned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.doc
    }
}

impl<T> DerefMut for Versioned<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.doc
    }
}

impl<T> Versioned<T> {
    pub fn into_inner(self) -> T {
        self.doc
    }
}

fn decode<T: Document>(snapshot: Snapshot) -> AppResult<Versioned<T>> {
    let doc = serde_json::from_value(snapshot.data).map_err(|e| {
        AppError::Internal(format!(
            "Corrupt {} document {}: {}",
            T::COLLECTION,
            snapshot.id,
            e
        ))
    })?;
    Ok(Versioned {
        doc,
        version: snapshot.version,
    })
}

/// Handle to the configured document store
#[derive(Clone)]
pub struct Db {
    store: Arc<dyn DocumentStore>,
}

impl Db {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Fresh in-memory database
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    pub async fn ping(&self) -> AppResult<()> {
        self.store.ping().await
    }

    pub async fn get<T: Document>(&self, id: &str) -> AppResult<Option<T>> {
        Ok(self.get_versioned(id).await?.map(Versioned::into_inner))
    }

    pub async fn get_versioned<T: Document>(&self, id: &str) -> AppResult<Option<Versioned<T>>> {
        match self.store.get(T::COLLECTION, id).await? {
            Some(snapshot) => Ok(Some(decode(snapshot)?)),
            None => Ok(None),
        }
    }

    /// Like [`Db::get_versioned`] but a missing document is `NotFound`
    pub async fn require<T: Document>(&self, id: &str) -> AppResult<Versioned<T>> {
        self.get_versioned(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} not found", T::NAME)))
    }

    pub async fn find<T: Document>(&self, query: &Query) -> AppResult<Vec<T>> {
        Ok(self
            .find_versioned(query)
            .await?
            .into_iter()
            .map(Versioned::into_inner)
            .collect())
    }

    pub async fn find_versioned<T: Document>(&self, query: &Query) -> AppResult<Vec<Versioned<T>>> {
        self.store
            .query(T::COLLECTION, query)
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }

    pub async fn find_one<T: Document>(&self, query: Query) -> AppResult<Option<T>> {
        Ok(self.find(&query.limit(1)).await?.into_iter().next())
    }

    pub async fn count<T: Document>(&self, query: &Query) -> AppResult<usize> {
        Ok(self.store.query(T::COLLECTION, query).await?.len())
    }

    /// Creates a document, failing with `WriteConflict` if the id is taken
    pub async fn insert<T: Document>(&self, doc: &T) -> AppResult<()> {
        let mut batch = self.batch();
        batch.insert(doc)?;
        batch.commit().await
    }

    /// Unconditional create-or-replace
    pub async fn save<T: Document>(&self, doc: &T) -> AppResult<()> {
        let mut batch = self.batch();
        batch.save(doc)?;
        batch.commit().await
    }

    /// Replaces a document only if nobody wrote it since it was read
    pub async fn update<T: Document>(&self, doc: &Versioned<T>) -> AppResult<()> {
        let mut batch = self.batch();
        batch.update(doc)?;
        batch.commit().await
    }

    pub async fn delete<T: Document>(&self, id: &str) -> AppResult<()> {
        let mut batch = self.batch();
        batch.delete::<T>(id);
        batch.commit().await
    }

    pub fn batch(&self) -> Batch {
        Batch {
            store: Arc::clone(&self.store),
            writes: Vec::new(),
        }
    }
}

/// Writes collected for one atomic commit
pub struct Batch {
    store: Arc<dyn DocumentStore>,
    writes: Vec<Write>,
}

impl Batch {
    fn set<T: Document>(&mut self, doc: &T, precondition: Precondition) -> AppResult<()> {
        self.writes.push(Write::Set {
            collection: T::COLLECTION.to_string(),
            id: doc.id().to_string(),
            data: serde_json::to_value(doc)?,
            precondition,
        });
        Ok(())
    }

    pub fn insert<T: Document>(&mut self, doc: &T) -> AppResult<()> {
        self.set(doc, Precondition::NotExists)
    }

    pub fn save<T: Document>(&mut self, doc: &T) -> AppResult<()> {
        self.set(doc, Precondition::Any)
    }

    pub fn update<T: Document>(&mut self, doc: &Versioned<T>) -> AppResult<()> {
        self.set(&doc.doc, Precondition::Version(doc.version))
    }

    pub fn delete<T: Document>(&mut self, id: &str) {
        self.writes.push(Write::Delete {
            collection: T::COLLECTION.to_string(),
            id: id.to_string(),
            precondition: Precondition::Any,
        });
    }

    pub fn delete_versioned<T: Document>(&mut self, doc: &Versioned<T>) {
        self.writes.push(Write::Delete {
            collection: T::COLLECTION.to_string(),
            id: doc.id().to_string(),
            precondition: Precondition::Version(doc.version),
        });
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub async fn commit(self) -> AppResult<()> {
        if self.writes.is_empty() {
            return Ok(());
        }
        self.store.commit(self.writes).await
    }
}

/// Runs an optimistic read-modify-commit transaction, re-running it when the
/// commit loses a race (`WriteConflict`), up to [`MAX_TRANSACTION_ATTEMPTS`].
pub async fn with_retry<T, F, Fut>(operation: &'static str, mut transaction: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt = 1;
    loop {
        match transaction().await {
            Err(AppError::WriteConflict(detail)) if attempt < MAX_TRANSACTION_ATTEMPTS => {
                tracing::debug!(operation, attempt, detail = %detail, "Write conflict, retrying");
                attempt += 1;
                tokio::task::yield_now().await;
            }
            Err(AppError::WriteConflict(detail)) => {
                tracing::warn!(operation, attempts = attempt, "Giving up after repeated write conflicts");
                return Err(AppError::WriteConflict(detail));
            }
            other => return other,
        }
    }
}
