use std::sync::Arc;
use std::time::Instant;

use crate::{
    config::Config,
    db::{Cache, Db},
    services::auth::TokenKeys,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub cache: Cache,
    pub config: Arc<Config>,
    pub tokens: Arc<TokenKeys>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(db: Db, cache: Cache, config: Config) -> Self {
        Self {
            db,
            cache,
            tokens: Arc::new(TokenKeys::from_config(&config)),
            config: Arc::new(config),
            started_at: Instant::now(),
        }
    }

    /// Fresh in-memory state with caching disabled
    pub fn for_tests() -> Self {
        Self::new(Db::memory(), Cache::disabled(), Config::for_tests())
    }

    pub fn password_rounds(&self) -> u32 {
        self.config.password_hash_rounds
    }
}
