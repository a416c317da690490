//! # Version Repository
//!
//! Immutable quote snapshots. Rows are only ever inserted.

use quote_core::QuoteVersion;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::debug;

use super::json_column;
use crate::error::DbResult;

/// Repository for quote versions.
pub struct VersionRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> VersionRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        VersionRepository { conn }
    }

    /// `max(version_number) + 1` for the quote, or 1 when it has none.
    pub async fn next_version_number(&mut self, quote_id: &str) -> DbResult<i64> {
        let max: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version_number) FROM quote_versions WHERE quote_id = ?1")
                .bind(quote_id)
                .fetch_one(&mut *self.conn)
                .await?;

        Ok(max.unwrap_or(0) + 1)
    }

    pub async fn insert(&mut self, version: &QuoteVersion) -> DbResult<()> {
        debug!(
            quote_id = %version.quote_id,
            version_number = version.version_number,
            "Inserting quote version"
        );

        let snapshot = serde_json::to_string(&version.snapshot)?;

        sqlx::query(
            r#"
            INSERT INTO quote_versions (
                id, quote_id, organization_id, version_number,
                snapshot, reason, created_by, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&version.id)
        .bind(&version.quote_id)
        .bind(&version.organization_id)
        .bind(version.version_number)
        .bind(snapshot)
        .bind(&version.reason)
        .bind(&version.created_by)
        .bind(version.created_at)
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }

    /// All versions of a quote, newest first.
    pub async fn list_for_quote(
        &mut self,
        organization_id: &str,
        quote_id: &str,
    ) -> DbResult<Vec<QuoteVersion>> {
        let rows = sqlx::query(
            r#"
            SELECT id, quote_id, organization_id, version_number,
                   snapshot, reason, created_by, created_at
            FROM quote_versions
            WHERE organization_id = ?1 AND quote_id = ?2
            ORDER BY version_number DESC
            "#,
        )
        .bind(organization_id)
        .bind(quote_id)
        .fetch_all(&mut *self.conn)
        .await?;

        rows.iter().map(version_from_row).collect()
    }

    pub async fn find(
        &mut self,
        organization_id: &str,
        quote_id: &str,
        version_number: i64,
    ) -> DbResult<Option<QuoteVersion>> {
        let row = sqlx::query(
            r#"
            SELECT id, quote_id, organization_id, version_number,
                   snapshot, reason, created_by, created_at
            FROM quote_versions
            WHERE organization_id = ?1 AND quote_id = ?2 AND version_number = ?3
            "#,
        )
        .bind(organization_id)
        .bind(quote_id)
        .bind(version_number)
        .fetch_optional(&mut *self.conn)
        .await?;

        row.as_ref().map(version_from_row).transpose()
    }
}

fn version_from_row(row: &SqliteRow) -> DbResult<QuoteVersion> {
    Ok(QuoteVersion {
        id: row.try_get("id")?,
        quote_id: row.try_get("quote_id")?,
        organization_id: row.try_get("organization_id")?,
        version_number: row.try_get("version_number")?,
        snapshot: json_column(row, "snapshot")?,
        reason: row.try_get("reason")?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
    })
}
