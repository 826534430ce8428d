use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use crate::error::{AppError, AppResult};

use super::{
    query::Query,
    store::{DocumentStore, Snapshot, Write},
};

#[derive(Debug, Clone)]
struct StoredDocument {
    version: u64,
    data: Value,
}

type Collections = HashMap<String, BTreeMap<String, StoredDocument>>;

/// Process-local document store
///
/// A single lock guards every collection, which makes commits trivially
/// atomic. Used for development and the test suite.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(collections: &Collections, collection: &str, id: &str) -> Option<u64> {
        collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|doc| doc.version)
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> AppResult<Option<Snapshot>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|doc| Snapshot {
                id: id.to_string(),
                version: doc.version,
                data: doc.data.clone(),
            }))
    }

    async fn query(&self, collection: &str, query: &Query) -> AppResult<Vec<Snapshot>> {
        let collections = self.collections.read().await;
        let candidates = match collections.get(collection) {
            Some(docs) => docs
                .iter()
                .filter(|(_, doc)| query.matches(&doc.data))
                .map(|(id, doc)| Snapshot {
                    id: id.clone(),
                    version: doc.version,
                    data: doc.data.clone(),
                })
                .collect(),
            None => Vec::new(),
        };
        Ok(query.apply(candidates))
    }

    async fn commit(&self, writes: Vec<Write>) -> AppResult<()> {
        let mut collections = self.collections.write().await;

        // Validate every precondition against a staged view first so that a
        // batch touching the same document twice sees its own earlier writes.
        let mut staged: HashMap<(String, String), Option<u64>> = HashMap::new();
        for write in &writes {
            let key = (write.collection().to_string(), write.id().to_string());
            let current = match staged.get(&key) {
                Some(version) => *version,
                None => Self::current_version(&collections, &key.0, &key.1),
            };

            if !write.precondition().holds(current) {
                return Err(AppError::WriteConflict(write.conflict_message(current)));
            }

            let next = match write {
                Write::Set { .. } => Some(current.unwrap_or(0) + 1),
                Write::Delete { .. } => None,
            };
            staged.insert(key, next);
        }

        for write in writes {
            match write {
                Write::Set {
                    collection, id, data, ..
                } => {
                    let docs = collections.entry(collection).or_default();
                    let version = docs.get(&id).map(|d| d.version).unwrap_or(0) + 1;
                    docs.insert(id, StoredDocument { version, data });
                }
                Write::Delete { collection, id, .. } => {
                    if let Some(docs) = collections.get_mut(&collection) {
                        docs.remove(&id);
                    }
                }
            }
        }

        Ok(())
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::Precondition;
    use serde_json::json;

    fn set(collection: &str, id: &str, data: Value, precondition: Precondition) -> Write {
        Write::Set {
            collection: collection.to_string(),
            id: id.to_string(),
            data,
            precondition,
        }
    }

    #[tokio::test]
    async fn test_versions_increment_per_write() {
        let store = MemoryStore::new();
        store
            .commit(vec![set("users", "u1", json!({"n": 1}), Precondition::NotExists)])
            .await
            .unwrap();
        store
            .commit(vec![set("users", "u1", json!({"n": 2}), Precondition::Version(1))])
            .await
            .unwrap();

        let snap = store.get("users", "u1").await.unwrap().unwrap();
        assert_eq!(snap.version, 2);
        assert_eq!(snap.data, json!({"n": 2}));
    }

    #[tokio::test]
    async fn test_failed_precondition_applies_nothing() {
        let store = MemoryStore::new();
        store
            .commit(vec![set("wallets", "a", json!({"balance": 10}), Precondition::Any)])
            .await
            .unwrap();

        let result = store
            .commit(vec![
                set("wallets", "b", json!({"balance": 5}), Precondition::NotExists),
                set("wallets", "a", json!({"balance": 0}), Precondition::Version(7)),
            ])
            .await;

        assert!(matches!(result, Err(AppError::WriteConflict(_))));
        assert!(store.get("wallets", "b").await.unwrap().is_none());
        let a = store.get("wallets", "a").await.unwrap().unwrap();
        assert_eq!(a.data, json!({"balance": 10}));
    }

    #[tokio::test]
    async fn test_batch_sees_its_own_writes() {
        let store = MemoryStore::new();
        store
            .commit(vec![
                set("c", "x", json!({"v": 1}), Precondition::NotExists),
                set("c", "x", json!({"v": 2}), Precondition::Version(1)),
            ])
            .await
            .unwrap();
        let snap = store.get("c", "x").await.unwrap().unwrap();
        assert_eq!(snap.version, 2);
    }

    #[tokio::test]
    async fn test_query_filters_within_collection() {
        let store = MemoryStore::new();
        store
            .commit(vec![
                set("content", "1", json!({"status": "active"}), Precondition::Any),
                set("content", "2", json!({"status": "removed"}), Precondition::Any),
                set("other", "3", json!({"status": "active"}), Precondition::Any),
            ])
            .await
            .unwrap();

        let found = store
            .query("content", &Query::new().eq("status", "active"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "1");
    }

    #[tokio::test]
    async fn test_delete_removes_document() {
        let store = MemoryStore::new();
        store
            .commit(vec![set("c", "x", json!({}), Precondition::Any)])
            .await
            .unwrap();
        store
            .commit(vec![Write::Delete {
                collection: "c".to_string(),
                id: "x".to_string(),
                precondition: Precondition::Version(1),
            }])
            .await
            .unwrap();
        assert!(store.get("c", "x").await.unwrap().is_none());
    }
}
