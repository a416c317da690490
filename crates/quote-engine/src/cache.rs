//! # Rate-Card Cache
//!
//! TTL key-value cache in front of rate-card reads.
//!
//! ## Keys
//! ```text
//! ratecard:{org}:active:{yyyy-mm-dd}          active card for a date      60 s
//! ratecard:{org}:card:{card}:items            item list of a card        300 s
//! ratecard:{org}:card:{card}:code:{code}      code lookup on a card      300 s
//!
//! Any rate-card write deletes every key under  ratecard:{org}:
//! ```
//!
//! `{org}` is percent-encoded (`%` and `:`), so no organization's prefix is
//! a prefix of another's keys.
//!
//! ## Failure Policy
//! The cache never fails a request. [`get_json`] and [`set_json`] log and
//! swallow errors so callers fall through to the store.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Cache backend failure. Only logged.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),
}

/// Minimal TTL cache.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Deletes every key starting with `prefix`; returns how many went.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError>;
}

// =============================================================================
// Keys
// =============================================================================

pub fn org_prefix(organization_id: &str) -> String {
    format!("ratecard:{}:", escape_segment(organization_id))
}

/// Percent-encodes the key separator and the escape character itself.
fn escape_segment(segment: &str) -> String {
    let mut escaped = String::with_capacity(segment.len());
    for c in segment.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            ':' => escaped.push_str("%3A"),
            c => escaped.push(c),
        }
    }
    escaped
}

pub fn active_card_key(organization_id: &str, date: NaiveDate) -> String {
    format!("{}active:{}", org_prefix(organization_id), date)
}

pub fn card_items_key(organization_id: &str, rate_card_id: &str) -> String {
    format!("{}card:{}:items", org_prefix(organization_id), rate_card_id)
}

pub fn item_code_key(organization_id: &str, rate_card_id: &str, item_code: &str) -> String {
    format!(
        "{}card:{}:code:{}",
        org_prefix(organization_id),
        rate_card_id,
        item_code.trim().to_lowercase()
    )
}

// =============================================================================
// Best-effort JSON helpers
// =============================================================================

/// Cached value for `key`, or `None` on miss, backend error or a value
/// that no longer deserializes.
pub async fn get_json<T: DeserializeOwned>(cache: &dyn Cache, key: &str) -> Option<T> {
    match cache.get(key).await {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(value) => {
                debug!(key, "Cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(key, error = %e, "Discarding undecodable cache entry");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            warn!(key, error = %e, "Cache read failed, using store");
            None
        }
    }
}

pub async fn set_json<T: Serialize>(cache: &dyn Cache, key: &str, value: &T, ttl: Duration) {
    let raw = match serde_json::to_string(value) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(key, error = %e, "Cache value not serializable");
            return;
        }
    };
    if let Err(e) = cache.set(key, &raw, ttl).await {
        warn!(key, error = %e, "Cache write failed");
    }
}

/// Drops every cached rate-card entry of the organization.
pub async fn invalidate_organization(cache: &dyn Cache, organization_id: &str) {
    let prefix = org_prefix(organization_id);
    match cache.delete_prefix(&prefix).await {
        Ok(removed) => debug!(organization_id, removed, "Rate-card cache invalidated"),
        Err(e) => warn!(organization_id, error = %e, "Rate-card cache invalidation failed"),
    }
}

// =============================================================================
// In-process cache
// =============================================================================

/// Default entry bound of [`MemoryCache::new`].
pub const DEFAULT_MEMORY_CACHE_ENTRIES: usize = 10_000;

/// Process-local cache for single-node deployments and tests.
///
/// Holds at most `max_entries` keys. Inserting a new key into a full cache
/// first purges expired entries, then evicts the entry closest to expiry.
#[derive(Debug)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, (String, Instant)>>,
    max_entries: usize,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::with_max_entries(DEFAULT_MEMORY_CACHE_ENTRIES)
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_entries(max_entries: usize) -> Self {
        MemoryCache {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Makes room for one new key in a full map.
fn make_room(entries: &mut HashMap<String, (String, Instant)>, max_entries: usize, now: Instant) {
    if entries.len() < max_entries {
        return;
    }

    let before = entries.len();
    entries.retain(|_, (_, expires_at)| *expires_at > now);
    let purged = before - entries.len();

    while entries.len() >= max_entries {
        let soonest = entries
            .iter()
            .min_by_key(|(_, (_, expires_at))| *expires_at)
            .map(|(key, _)| key.clone());
        match soonest {
            Some(key) => {
                entries.remove(&key);
            }
            None => break,
        }
    }

    debug!(purged, evicted = before - purged - entries.len(), "Memory cache full");
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some((value, expires_at)) if *expires_at > now => return Ok(Some(value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // Expired: evict lazily.
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|(_, expires_at)| *expires_at <= now) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        if !entries.contains_key(key) {
            make_room(&mut entries, self.max_entries, now);
        }
        entries.insert(key.to_string(), (value.to_string(), now + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok((before - entries.len()) as u64)
    }
}

// =============================================================================
// Redis cache
// =============================================================================

/// Redis-backed cache shared by every engine instance.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    /// Opens a managed (auto-reconnecting) connection.
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(RedisCache { conn })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let seconds = ttl.as_secs().max(1);
        let _: () = conn.set_ex(key, value, seconds).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", escape_glob(prefix));
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let deleted: u64 = conn.del(&keys).await?;
                removed += deleted;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(removed)
    }
}

/// Escapes Redis glob metacharacters so `prefix` matches literally.
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

// =============================================================================
// No cache
// =============================================================================

/// Always misses.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

#[async_trait]
impl Cache for NoopCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), CacheError> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Ok(())
    }

    async fn delete_prefix(&self, _prefix: &str) -> Result<u64, CacheError> {
        Ok(0)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod failing {
    use super::*;

    /// Backend that errors on every call.
    #[derive(Debug, Default)]
    pub struct FailingCache;

    #[async_trait]
    impl Cache for FailingCache {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }

        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }

        async fn delete(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }

        async fn delete_prefix(&self, _prefix: &str) -> Result<u64, CacheError> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }
    }
}
