//! Audit event emission.
//!
//! Events are emitted after the owning transaction commits. A failed append
//! is logged and dropped; it never turns a committed mutation into an error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quote_core::AuditEvent;
use quote_db::{Database, Repositories};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::error::EngineResult;

/// Append-only audit destination.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, event: AuditEvent) -> EngineResult<()>;
}

/// Writes events into the `audit_log` table.
#[derive(Debug, Clone)]
pub struct StoreAuditSink {
    db: Database,
}

impl StoreAuditSink {
    pub fn new(db: Database) -> Self {
        StoreAuditSink { db }
    }
}

#[async_trait]
impl AuditSink for StoreAuditSink {
    async fn append(&self, event: AuditEvent) -> EngineResult<()> {
        let mut session = self.db.session().await?;
        session.audit().append(&event).await?;
        Ok(())
    }
}

/// Builder for one audit event.
pub struct AuditEntry<'a> {
    pub action: &'a str,
    pub entity_type: &'a str,
    pub entity_id: &'a str,
    pub organization_id: &'a str,
    pub user_id: &'a str,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
    pub metadata: Option<Value>,
}

impl AuditEntry<'_> {
    pub fn into_event(self, now: DateTime<Utc>) -> AuditEvent {
        AuditEvent {
            id: Uuid::new_v4().to_string(),
            action: self.action.to_string(),
            entity_type: self.entity_type.to_string(),
            entity_id: self.entity_id.to_string(),
            organization_id: self.organization_id.to_string(),
            user_id: self.user_id.to_string(),
            old_values: self.old_values,
            new_values: self.new_values,
            metadata: self.metadata,
            created_at: now,
        }
    }
}

/// JSON form of a value for old/new columns; `None` if it cannot serialize.
pub fn to_audit_value<T: Serialize>(value: &T) -> Option<Value> {
    serde_json::to_value(value).ok()
}

/// Appends `entry`, logging instead of failing.
pub async fn emit(sink: &dyn AuditSink, entry: AuditEntry<'_>, now: DateTime<Utc>) {
    let event = entry.into_event(now);
    let action = event.action.clone();
    let entity_id = event.entity_id.clone();
    if let Err(e) = sink.append(event).await {
        warn!(action = %action, entity_id = %entity_id, error = %e, "Audit append failed");
    }
}
