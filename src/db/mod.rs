pub mod document;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod redis;
pub mod store;

pub use document::{with_retry, Batch, Db, Document, Versioned};
pub use postgres::create_pool;
pub use query::{Direction, Filter, Query};
pub use redis::{Cache, CacheKey, CacheWriterHandle};
pub use store::{open_store, DocumentStore};
