//! # Idempotency Repository
//!
//! Stored responses of keyed mutating requests.
//!
//! ```text
//! store(record)
//!   ├── no row for (key, org, user, route)     → INSERT         → true
//!   ├── row exists but expired                 → overwrite      → true
//!   └── row exists and still live              → left untouched → false
//! ```

use chrono::{DateTime, Utc};
use quote_core::IdempotencyRecord;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::debug;

use crate::error::{DbError, DbResult};

/// Repository for idempotency records.
pub struct IdempotencyRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> IdempotencyRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        IdempotencyRepository { conn }
    }

    /// Finds the record for a key, expired or not.
    pub async fn find(
        &mut self,
        idempotency_key: &str,
        organization_id: &str,
        user_id: &str,
        route: &str,
    ) -> DbResult<Option<IdempotencyRecord>> {
        let row = sqlx::query(
            r#"
            SELECT idempotency_key, organization_id, user_id, route, method,
                   request_hash, response_status, response_body, created_at, expires_at
            FROM idempotency_records
            WHERE idempotency_key = ?1 AND organization_id = ?2 AND user_id = ?3 AND route = ?4
            "#,
        )
        .bind(idempotency_key)
        .bind(organization_id)
        .bind(user_id)
        .bind(route)
        .fetch_optional(&mut *self.conn)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    /// Stores a record unless a live one already holds the key.
    ///
    /// ## Returns
    /// `true` when this record was written.
    pub async fn store(&mut self, record: &IdempotencyRecord) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO idempotency_records (
                idempotency_key, organization_id, user_id, route, method,
                request_hash, response_status, response_body, created_at, expires_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT (idempotency_key, organization_id, user_id, route) DO UPDATE SET
                method = excluded.method,
                request_hash = excluded.request_hash,
                response_status = excluded.response_status,
                response_body = excluded.response_body,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at
            WHERE idempotency_records.expires_at <= excluded.created_at
            "#,
        )
        .bind(&record.idempotency_key)
        .bind(&record.organization_id)
        .bind(&record.user_id)
        .bind(&record.route)
        .bind(&record.method)
        .bind(&record.request_hash)
        .bind(i64::from(record.response_status))
        .bind(&record.response_body)
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&mut *self.conn)
        .await?;

        let written = result.rows_affected() > 0;
        debug!(
            key = %record.idempotency_key,
            route = %record.route,
            written = written,
            "Stored idempotency record"
        );
        Ok(written)
    }

    /// Deletes every record expired at `now`. Returns the number removed.
    pub async fn purge_expired(&mut self, now: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM idempotency_records WHERE expires_at <= ?1")
            .bind(now)
            .execute(&mut *self.conn)
            .await?;

        Ok(result.rows_affected())
    }
}

fn record_from_row(row: &SqliteRow) -> DbResult<IdempotencyRecord> {
    let status: i64 = row.try_get("response_status")?;

    Ok(IdempotencyRecord {
        idempotency_key: row.try_get("idempotency_key")?,
        organization_id: row.try_get("organization_id")?,
        user_id: row.try_get("user_id")?,
        route: row.try_get("route")?,
        method: row.try_get("method")?,
        request_hash: row.try_get("request_hash")?,
        response_status: u16::try_from(status).map_err(|e| DbError::decode("response_status", e))?,
        response_body: row.try_get("response_body")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}
