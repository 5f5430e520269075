pub mod auth;
pub mod cache;
pub mod chat;
pub mod error;
pub mod presence;
pub mod responder;

use std::sync::Arc;
use std::time::Duration;

use tether_db::DbPool;
use tokio::sync::Notify;

pub use error::ChatError;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub jwt_secret: String,
    /// Identity-namespace prefix marking synthetic (simulated) accounts.
    pub synthetic_prefix: String,
    /// Recent-message cache sizing.
    pub cache_max_conversations: u64,
    pub cache_ttl_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            synthetic_prefix: "sim_".to_string(),
            cache_max_conversations: 10_000,
            cache_ttl_secs: cache::RECENT_CACHE_TTL_SECS,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: AppConfig,
    pub presence: Arc<presence::PresenceRegistry>,
    pub recent_cache: cache::RecentMessageCache,
    /// Process-wide shutdown signal; pending auto-responder tasks watch it.
    pub shutdown: Arc<Notify>,
}

impl AppState {
    pub fn new(db: DbPool, config: AppConfig) -> Self {
        let recent_cache = cache::RecentMessageCache::new(
            config.cache_max_conversations,
            Duration::from_secs(config.cache_ttl_secs),
            cache::RECENT_CACHE_MESSAGES_PER_CONVERSATION,
        );
        Self {
            db,
            config,
            presence: Arc::new(presence::PresenceRegistry::new()),
            recent_cache,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Synthetic accounts live in a reserved identity namespace.
    pub fn is_synthetic(&self, identity: &str) -> bool {
        identity.starts_with(&self.config.synthetic_prefix)
    }
}
