//! # Audit Log Repository
//!
//! Append-only outbox of audit events. Rows are never updated or deleted.

use quote_core::AuditEvent;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::debug;

use super::optional_json_column;
use crate::error::DbResult;

/// Repository for the `audit_log` table.
pub struct AuditLogRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> AuditLogRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        AuditLogRepository { conn }
    }

    pub async fn append(&mut self, event: &AuditEvent) -> DbResult<()> {
        debug!(action = %event.action, entity_id = %event.entity_id, "Appending audit event");

        let old_values = event.old_values.as_ref().map(serde_json::to_string).transpose()?;
        let new_values = event.new_values.as_ref().map(serde_json::to_string).transpose()?;
        let metadata = event.metadata.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO audit_log (
                id, organization_id, user_id, action, entity_type, entity_id,
                old_values, new_values, metadata, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&event.id)
        .bind(&event.organization_id)
        .bind(&event.user_id)
        .bind(&event.action)
        .bind(&event.entity_type)
        .bind(&event.entity_id)
        .bind(old_values)
        .bind(new_values)
        .bind(metadata)
        .bind(event.created_at)
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }

    /// Events for one entity, oldest first.
    pub async fn list_for_entity(
        &mut self,
        organization_id: &str,
        entity_type: &str,
        entity_id: &str,
    ) -> DbResult<Vec<AuditEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, organization_id, user_id, action, entity_type, entity_id,
                   old_values, new_values, metadata, created_at
            FROM audit_log
            WHERE organization_id = ?1 AND entity_type = ?2 AND entity_id = ?3
            ORDER BY created_at, rowid
            "#,
        )
        .bind(organization_id)
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(&mut *self.conn)
        .await?;

        rows.iter().map(event_from_row).collect()
    }
}

fn event_from_row(row: &SqliteRow) -> DbResult<AuditEvent> {
    Ok(AuditEvent {
        id: row.try_get("id")?,
        action: row.try_get("action")?,
        entity_type: row.try_get("entity_type")?,
        entity_id: row.try_get("entity_id")?,
        organization_id: row.try_get("organization_id")?,
        user_id: row.try_get("user_id")?,
        old_values: optional_json_column(row, "old_values")?,
        new_values: optional_json_column(row, "new_values")?,
        metadata: optional_json_column(row, "metadata")?,
        created_at: row.try_get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{database, now};
    use crate::repository::Repositories;
    use serde_json::json;

    #[tokio::test]
    async fn test_append_and_list() {
        let db = database().await;
        let mut session = db.session().await.unwrap();

        let created = AuditEvent {
            id: "a-1".to_string(),
            action: "quote.created".to_string(),
            entity_type: "quote".to_string(),
            entity_id: "q-1".to_string(),
            organization_id: "acme".to_string(),
            user_id: "user-1".to_string(),
            old_values: None,
            new_values: Some(json!({"status": "draft"})),
            metadata: None,
            created_at: now(),
        };
        let changed = AuditEvent {
            id: "a-2".to_string(),
            action: "quote.status_changed".to_string(),
            old_values: Some(json!({"status": "draft"})),
            new_values: Some(json!({"status": "pending"})),
            metadata: Some(json!({"notes": "ready for review"})),
            ..created.clone()
        };

        session.audit().append(&created).await.unwrap();
        session.audit().append(&changed).await.unwrap();

        let events = session.audit().list_for_entity("acme", "quote", "q-1").await.unwrap();
        assert_eq!(events, vec![created, changed]);
        assert!(session
            .audit()
            .list_for_entity("globex", "quote", "q-1")
            .await
            .unwrap()
            .is_empty());
    }
}
