//! # quote-engine: Services for the Quotation Engine
//!
//! Composes quote-core business rules and quote-db storage into the
//! operations a transport layer exposes: create, update, transition,
//! list and delete quotes; price lines; administer rate cards.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Quotation Engine Layers                            │
//! │                                                                         │
//! │   transport (HTTP, RPC, ...)     ──  outside this workspace             │
//! │        │  CallerContext + inputs                                        │
//! │        ▼                                                                │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 quote-engine (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   Engine ──► QuoteService ──► PricingResolver ──► Cache         │   │
//! │  │          │                 ├─► QuoteNumberGenerator             │   │
//! │  │          │                 ├─► LockingService                   │   │
//! │  │          │                 ├─► IdempotencyService               │   │
//! │  │          │                 └─► AuditSink                        │   │
//! │  │          └─► RateCardService ──► cache invalidation             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │        │                                                                │
//! │        ▼                                                                │
//! │   quote-db (SQLite)        quote-core (pure rules)                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! use quote_engine::{CallerContext, Engine, EngineConfig};
//!
//! let engine = Engine::connect(EngineConfig::load()?).await?;
//! let caller = CallerContext::new("acme", "user-1");
//! let quote = engine.quotes.create_quote(&caller, input, Some("req-123")).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod audit;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod services;

// =============================================================================
// Re-exports
// =============================================================================

pub use audit::{AuditSink, StoreAuditSink};
pub use cache::{Cache, CacheError, MemoryCache, NoopCache, RedisCache};
pub use config::{ConfigError, EngineConfig};
pub use context::CallerContext;
pub use error::{EngineError, EngineResult, ErrorBody, ErrorCode};
pub use services::{
    IdempotencyService, LockingService, PricingResolver, QuoteNumberGenerator, QuoteService,
    RateCardService,
};

use std::sync::Arc;

use quote_db::{Database, DbConfig};
use tracing::{info, warn};

/// Every service wired to one database, cache and audit sink.
#[derive(Clone)]
pub struct Engine {
    pub db: Database,
    pub quotes: QuoteService,
    pub rate_cards: RateCardService,
    pub config: Arc<EngineConfig>,
}

impl Engine {
    /// Opens the database and cache named by `config`.
    ///
    /// Redis is optional: without `redis_url`, or when it cannot be reached,
    /// an in-process cache is used instead.
    pub async fn connect(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;

        let db = Database::new(DbConfig::new(&config.database_path)).await?;
        info!(path = %config.database_path, "Connected to database");

        let cache: Arc<dyn Cache> = match config.redis_url.as_deref() {
            Some(url) => match RedisCache::connect(url).await {
                Ok(redis) => {
                    info!("Connected to Redis");
                    Arc::new(redis)
                }
                Err(e) => {
                    warn!(error = %e, "Failed to connect to Redis, using in-process cache");
                    Arc::new(MemoryCache::with_max_entries(config.memory_cache_max_entries))
                }
            },
            None => Arc::new(MemoryCache::with_max_entries(config.memory_cache_max_entries)),
        };

        let audit: Arc<dyn AuditSink> = Arc::new(StoreAuditSink::new(db.clone()));
        Ok(Self::from_parts(db, cache, audit, config))
    }

    /// Wires services from already constructed parts.
    pub fn from_parts(
        db: Database,
        cache: Arc<dyn Cache>,
        audit: Arc<dyn AuditSink>,
        config: EngineConfig,
    ) -> Self {
        let quotes = QuoteService::new(db.clone(), cache.clone(), audit.clone(), &config);
        let rate_cards = RateCardService::new(db.clone(), cache, audit, config.default_unit.clone());

        Engine {
            db,
            quotes,
            rate_cards,
            config: Arc::new(config),
        }
    }
}
