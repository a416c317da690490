//! # Idempotency
//!
//! Deduplicates repeated mutating requests that carry the same key.
//!
//! ```text
//! check(key, caller, method, route, body)
//!   │
//!   ├─ live record for (key, org, user, route) ──► duplicate: replay stored
//!   │                                              status + body, no effects
//!   └─ none / expired ──► run operation ──► store_in(uow, ctx, status, body)
//!                                             │
//!                              written ◄──────┴──────► live record won
//!                              commit                  roll back, replay
//!                                                      stored_body(ctx)
//! ```
//!
//! The record is written in the mutation's own transaction, so two
//! concurrent requests with one key commit at most one effect.
//!
//! Request bodies are fingerprinted as SHA-256 over canonical JSON (object
//! keys sorted, no whitespace). A live record with a different fingerprint
//! is still a duplicate; the mismatch is logged.

use std::time::Duration;

use chrono::Utc;
use quote_core::IdempotencyRecord;
use quote_db::{Database, DbError, Repositories};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::context::CallerContext;
use crate::error::{EngineError, EngineResult};

/// Identity of one keyed request, carried from `check` to `store`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyContext {
    pub idempotency_key: String,
    pub organization_id: String,
    pub user_id: String,
    pub method: String,
    pub route: String,
    pub request_hash: String,
}

/// Outcome of a lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyCheck {
    /// A record exists for the key, live or expired.
    pub exists: bool,
    /// A live record exists; replay it.
    pub is_duplicate: bool,
    pub response_status: Option<u16>,
    pub response_body: Option<String>,
}

impl IdempotencyCheck {
    fn fresh(exists: bool) -> Self {
        IdempotencyCheck {
            exists,
            is_duplicate: false,
            response_status: None,
            response_body: None,
        }
    }
}

/// Idempotency records over the store.
#[derive(Debug, Clone)]
pub struct IdempotencyService {
    db: Database,
    ttl: Duration,
}

impl IdempotencyService {
    pub fn new(db: Database, ttl: Duration) -> Self {
        IdempotencyService { db, ttl }
    }

    pub async fn check(
        &self,
        idempotency_key: &str,
        caller: &CallerContext,
        method: &str,
        route: &str,
        body: &Value,
    ) -> EngineResult<(IdempotencyContext, IdempotencyCheck)> {
        let ctx = IdempotencyContext {
            idempotency_key: idempotency_key.to_string(),
            organization_id: caller.organization_id.clone(),
            user_id: caller.user_id.clone(),
            method: method.to_string(),
            route: route.to_string(),
            request_hash: request_hash(body),
        };

        let record = {
            let mut session = self.db.session().await?;
            session
                .idempotency()
                .find(idempotency_key, &ctx.organization_id, &ctx.user_id, route)
                .await?
        };

        let check = match record {
            None => IdempotencyCheck::fresh(false),
            Some(record) if record.is_expired(Utc::now()) => {
                debug!(key = %idempotency_key, route, "Idempotency record expired");
                IdempotencyCheck::fresh(true)
            }
            Some(record) => {
                if record.request_hash != ctx.request_hash {
                    warn!(
                        key = %idempotency_key,
                        route,
                        "Idempotency key reused with a different request body"
                    );
                }
                info!(key = %idempotency_key, route, "Replaying idempotent response");
                IdempotencyCheck {
                    exists: true,
                    is_duplicate: true,
                    response_status: Some(record.response_status),
                    response_body: Some(record.response_body),
                }
            }
        };

        Ok((ctx, check))
    }

    /// Builds the record that stores `body` under `ctx`, expiring after the ttl.
    fn record(&self, ctx: &IdempotencyContext, status: u16, body: &str) -> EngineResult<IdempotencyRecord> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl)
            .map_err(|e| EngineError::internal(format!("idempotency ttl out of range: {}", e)))?;
        Ok(IdempotencyRecord {
            idempotency_key: ctx.idempotency_key.clone(),
            organization_id: ctx.organization_id.clone(),
            user_id: ctx.user_id.clone(),
            route: ctx.route.clone(),
            method: ctx.method.clone(),
            request_hash: ctx.request_hash.clone(),
            response_status: status,
            response_body: body.to_string(),
            created_at: now,
            expires_at: now + ttl,
        })
    }

    /// Writes the record through `repos`, usually the mutation's open
    /// `UnitOfWork`. Returns `false` when a live record already held the key;
    /// the caller must then roll back and replay [`Self::stored_body`].
    pub async fn store_in<R: Repositories>(
        &self,
        repos: &mut R,
        ctx: &IdempotencyContext,
        status: u16,
        body: &str,
    ) -> EngineResult<bool> {
        let record = self.record(ctx, status, body)?;
        let written = repos.idempotency().store(&record).await?;
        if !written {
            info!(key = %ctx.idempotency_key, route = %ctx.route, "Idempotency key taken by a concurrent request");
        }
        Ok(written)
    }

    /// Records the response for `ctx` outside any transaction. Returns
    /// `false` when a live record already held the key.
    pub async fn store(&self, ctx: &IdempotencyContext, status: u16, body: &str) -> EngineResult<bool> {
        let mut session = self.db.session().await?;
        self.store_in(&mut session, ctx, status, body).await
    }

    /// Body of the live record holding `ctx`'s key.
    pub async fn stored_body(&self, ctx: &IdempotencyContext) -> EngineResult<String> {
        let record = {
            let mut session = self.db.session().await?;
            session
                .idempotency()
                .find(&ctx.idempotency_key, &ctx.organization_id, &ctx.user_id, &ctx.route)
                .await?
        };

        match record {
            Some(record) if !record.is_expired(Utc::now()) => Ok(record.response_body),
            _ => Err(DbError::conflict("idempotency_record", ctx.idempotency_key.clone()).into()),
        }
    }

    /// Deletes expired records; returns how many.
    pub async fn purge_expired(&self) -> EngineResult<u64> {
        let mut session = self.db.session().await?;
        let removed = session.idempotency().purge_expired(Utc::now()).await?;
        info!(removed, "Purged expired idempotency records");
        Ok(removed)
    }
}

// =============================================================================
// Fingerprint
// =============================================================================

/// SHA-256 hex digest of the canonical form of `body`.
pub fn request_hash(body: &Value) -> String {
    let digest = Sha256::digest(canonical_json(body).as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Compact JSON with object keys in sorted order at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(v) = map.get(key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::database;
    use serde_json::json;

    #[test]
    fn test_canonical_json_ignores_key_order() {
        let a = json!({ "b": 1, "a": { "y": [1, 2], "x": "s" } });
        let b = json!({ "a": { "x": "s", "y": [1, 2] }, "b": 1 });
        assert_eq!(canonical_json(&a), r#"{"a":{"x":"s","y":[1,2]},"b":1}"#);
        assert_eq!(request_hash(&a), request_hash(&b));
        assert_eq!(request_hash(&a).len(), 64);
        assert_ne!(request_hash(&a), request_hash(&json!({ "b": 2 })));
    }

    #[tokio::test]
    async fn test_check_store_replay() {
        let service = IdempotencyService::new(database().await, Duration::from_secs(3600));
        let caller = CallerContext::new("acme", "user-1");
        let body = json!({ "title": "Fit-out" });

        let (ctx, check) = service.check("key-1", &caller, "POST", "/quotes", &body).await.unwrap();
        assert!(!check.exists);
        assert!(!check.is_duplicate);

        assert!(service.store(&ctx, 201, r#"{"id":"q-1"}"#).await.unwrap());

        let (_, check) = service
            .check("key-1", &caller, "POST", "/quotes", &json!({ "title": "Other" }))
            .await
            .unwrap();
        assert!(check.is_duplicate);
        assert_eq!(check.response_status, Some(201));
        assert_eq!(check.response_body.as_deref(), Some(r#"{"id":"q-1"}"#));

        // Scoped by user and route.
        let other_user = CallerContext::new("acme", "user-2");
        let (_, check) = service.check("key-1", &other_user, "POST", "/quotes", &body).await.unwrap();
        assert!(!check.exists);
        let (_, check) = service.check("key-1", &caller, "PATCH", "/quotes/q-1", &body).await.unwrap();
        assert!(!check.exists);

        // A live record is never overwritten.
        assert!(!service.store(&ctx, 200, "{}").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_record_is_replaced_and_purged() {
        let service = IdempotencyService::new(database().await, Duration::ZERO);
        let caller = CallerContext::new("acme", "user-1");
        let body = json!({});

        let (ctx, _) = service.check("key-1", &caller, "POST", "/quotes", &body).await.unwrap();
        assert!(service.store(&ctx, 201, "first").await.unwrap());

        let (_, check) = service.check("key-1", &caller, "POST", "/quotes", &body).await.unwrap();
        assert!(check.exists);
        assert!(!check.is_duplicate);

        assert!(service.store(&ctx, 201, "second").await.unwrap());
        assert_eq!(service.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_store_in_rolled_back_transaction_leaves_no_record() {
        let db = database().await;
        let service = IdempotencyService::new(db.clone(), Duration::from_secs(3600));
        let caller = CallerContext::new("acme", "user-1");
        let (ctx, _) = service.check("key-1", &caller, "POST", "/quotes", &json!({})).await.unwrap();

        let mut uow = db.begin().await.unwrap();
        assert!(service.store_in(&mut uow, &ctx, 201, "lost").await.unwrap());
        uow.rollback().await.unwrap();

        let err = service.stored_body(&ctx).await.unwrap_err();
        assert!(err.is_retryable());

        let mut uow = db.begin().await.unwrap();
        assert!(service.store_in(&mut uow, &ctx, 201, "kept").await.unwrap());
        uow.commit().await.unwrap();

        let mut uow = db.begin().await.unwrap();
        assert!(!service.store_in(&mut uow, &ctx, 201, "late").await.unwrap());
        uow.rollback().await.unwrap();
        assert_eq!(service.stored_body(&ctx).await.unwrap(), "kept");
    }
}
