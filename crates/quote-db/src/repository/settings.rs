//! # Settings Repository
//!
//! Per-organization settings. An organization without a row uses defaults.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::DbResult;

/// Repository for `organization_settings`.
pub struct SettingsRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> SettingsRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        SettingsRepository { conn }
    }

    /// Stored quote-number prefix, if the organization has one.
    pub async fn quote_number_prefix(&mut self, organization_id: &str) -> DbResult<Option<String>> {
        let prefix: Option<String> = sqlx::query_scalar(
            "SELECT quote_number_prefix FROM organization_settings WHERE organization_id = ?1",
        )
        .bind(organization_id)
        .fetch_optional(&mut *self.conn)
        .await?;

        Ok(prefix)
    }

    pub async fn set_quote_number_prefix(
        &mut self,
        organization_id: &str,
        prefix: &str,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        debug!(organization_id = %organization_id, prefix = %prefix, "Setting quote number prefix");

        sqlx::query(
            r#"
            INSERT INTO organization_settings (organization_id, quote_number_prefix, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?3)
            ON CONFLICT (organization_id) DO UPDATE SET
                quote_number_prefix = excluded.quote_number_prefix,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(organization_id)
        .bind(prefix)
        .bind(now)
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::repository::test_support::{database, now};
    use crate::repository::Repositories;

    #[tokio::test]
    async fn test_prefix_upsert() {
        let db = database().await;
        let mut session = db.session().await.unwrap();

        assert_eq!(session.settings().quote_number_prefix("acme").await.unwrap(), None);

        session.settings().set_quote_number_prefix("acme", "EST", now()).await.unwrap();
        session.settings().set_quote_number_prefix("acme", "QT", now()).await.unwrap();

        assert_eq!(
            session.settings().quote_number_prefix("acme").await.unwrap().as_deref(),
            Some("QT")
        );
    }
}
