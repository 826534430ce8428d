use redis::AsyncCommands;
use redis::Client;
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::AppError;
use crate::error::AppResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// First page of a user's ranked feed ("anonymous" for logged-out viewers)
    Feed(String),
    /// Hashtag/embedding preferences derived from a user's viewing history
    UserPrefs(String),
    /// Trending content for a window, in hours
    Trending(u32),
    Recommendations(String),
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::Feed(user_id) => write!(f, "feed:{}", user_id),
            CacheKey::UserPrefs(user_id) => write!(f, "prefs:{}", user_id),
            CacheKey::Trending(hours) => write!(f, "trending:{}h", hours),
            CacheKey::Recommendations(user_id) => write!(f, "recs:{}", user_id),
        }
    }
}

/// Parses `REDIS_URL`; no connection is made until the first command
pub fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    Ok(Client::open(redis_url)?)
}

/// Raw string storage behind [`Cache`]
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    /// Queues a write; must not block the caller
    fn set(&self, key: String, value: String, ttl: u64);

    async fn delete(&self, keys: Vec<String>) -> AppResult<()>;
}

/// Queued `SETEX`
struct CacheWriteMessage {
    key: String,
    value: String,
    ttl: u64,
}

/// Redis backend with a background writer task
pub struct RedisBackend {
    redis_client: Client,
    write_tx: mpsc::UnboundedSender<CacheWriteMessage>,
}

/// Returned by [`Cache::connect`]; call `shutdown` before exit to flush queued writes
pub struct CacheWriterHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl CacheWriterHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        tracing::info!("Cache writer shutdown signal sent");
    }
}

impl RedisBackend {
    /// Creates the backend and spawns its write task
    pub fn spawn(redis_client: Client) -> (Self, CacheWriterHandle) {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let client = redis_client.clone();
        tokio::spawn(async move {
            Self::cache_writer_task(client, write_rx, shutdown_rx).await;
        });

        let backend = Self {
            redis_client,
            write_tx,
        };

        (backend, CacheWriterHandle { shutdown_tx })
    }

    /// Drains the write queue; on shutdown flushes what is already queued, then exits
    async fn cache_writer_task(
        client: Client,
        mut write_rx: mpsc::UnboundedReceiver<CacheWriteMessage>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!("Cache writer task started");

        loop {
            tokio::select! {
                Some(msg) = write_rx.recv() => {
                    if let Err(e) = Self::write_to_redis(&client, msg).await {
                        tracing::error!(error = %e, "Failed to write to Redis cache");
                    }
                }
                _ = shutdown_rx.recv() => {
                    write_rx.close();
                    let mut flushed = 0;
                    while let Some(msg) = write_rx.recv().await {
                        if let Err(e) = Self::write_to_redis(&client, msg).await {
                            tracing::error!(error = %e, "Failed to flush cache write during shutdown");
                        } else {
                            flushed += 1;
                        }
                    }

                    tracing::info!(flushed, "Cache writer task stopped");
                    break;
                }
            }
        }
    }

    async fn write_to_redis(client: &Client, msg: CacheWriteMessage) -> AppResult<()> {
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: () = conn.set_ex(msg.key, msg.value, msg.ttl).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let cached: Option<String> = conn.get(key).await?;
        Ok(cached)
    }

    fn set(&self, key: String, value: String, ttl: u64) {
        if let Err(e) = self.write_tx.send(CacheWriteMessage { key, value, ttl }) {
            tracing::error!(error = %e, "Failed to send cache write message");
        }
    }

    async fn delete(&self, keys: Vec<String>) -> AppResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let _: () = conn.del(keys).await?;
        Ok(())
    }
}

/// JSON cache keyed by [`CacheKey`]
///
/// A cache without a backend (no `REDIS_URL`) misses every read and drops
/// every write, so callers never branch on whether caching is enabled.
#[derive(Clone, Default)]
pub struct Cache {
    backend: Option<Arc<dyn CacheBackend>>,
}

impl Cache {
    pub fn disabled() -> Self {
        Self { backend: None }
    }

    pub fn with_backend(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    /// Connects to Redis when a URL is configured
    pub fn connect(redis_url: Option<&str>) -> anyhow::Result<(Self, Option<CacheWriterHandle>)> {
        match redis_url.map(str::trim).filter(|u| !u.is_empty()) {
            Some(url) => {
                let client = create_redis_client(url)?;
                let (backend, handle) = RedisBackend::spawn(client);
                tracing::info!("Redis cache enabled");
                Ok((Self::with_backend(Arc::new(backend)), Some(handle)))
            }
            None => {
                tracing::info!("REDIS_URL not set, caching disabled");
                Ok((Self::disabled(), None))
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Backend failures are logged and reported as a miss; a cache outage
    /// must not take the API down with it.
    pub async fn get_from_cache<T: serde::de::DeserializeOwned>(
        &self,
        key: &CacheKey,
    ) -> AppResult<Option<T>> {
        let Some(backend) = &self.backend else {
            return Ok(None);
        };

        let cached = match backend.get(&key.to_string()).await {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "Cache read failed, treating as miss");
                return Ok(None);
            }
        };

        match cached {
            Some(json) => {
                let data = serde_json::from_str(&json).map_err(|e| {
                    AppError::Internal(format!("Cache deserialization error: {}", e))
                })?;
                Ok(Some(data))
            }
            None => Ok(None),
        }
    }

    /// Queues a write with `ttl` seconds to live
    pub fn set_in_background<T: serde::Serialize>(&self, key: &CacheKey, value: &T, ttl: u64) {
        let Some(backend) = &self.backend else {
            return;
        };

        match serde_json::to_string(value) {
            Ok(json) => backend.set(key.to_string(), json, ttl),
            Err(e) => tracing::error!(error = %e, "Cache serialization error"),
        }
    }

    /// Drops keys; failures are logged, stale entries expire via their TTL
    pub async fn invalidate(&self, keys: &[CacheKey]) {
        let Some(backend) = &self.backend else {
            return;
        };

        let keys: Vec<String> = keys.iter().map(ToString::to_string).collect();
        if let Err(e) = backend.delete(keys).await {
            tracing::warn!(error = %e, "Cache invalidation failed");
        }
    }
}
