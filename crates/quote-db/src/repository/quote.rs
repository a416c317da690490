//! # Quote Repository
//!
//! Database operations for quote headers.
//!
//! ## Guarded Writes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Compare-and-Set on Status                            │
//! │                                                                         │
//! │  read quote (status = pending)                                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  UPDATE quotes SET ... WHERE id = ? AND status = 'pending'             │
//! │       │                                                                 │
//! │       ├── 1 row  ──► Ok                                                 │
//! │       └── 0 rows ──► DbError::Conflict (someone moved it first)         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Line items are not loaded here; see [`super::LineItemRepository`].

use chrono::{DateTime, Utc};
use quote_core::{Quote, QuoteFilters, QuoteStatus, QuoteType};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};
use tracing::debug;

use super::{
    currency_column, decimal_column, discount_columns, discount_parts, escape_like, json_column,
    money_column,
};
use crate::error::{DbError, DbResult};
use quote_core::Pagination;

const QUOTE_COLUMNS: &str = r#"
    id, organization_id, quote_number, customer_id, project_id,
    title, description, status, quote_type, valid_from, valid_until,
    currency, exchange_rate, subtotal, discount_amount, tax_amount, total_amount,
    discount_type, discount_value, notes,
    approved_by, approved_at, sent_at, accepted_at,
    metadata, created_by, created_at, updated_at, deleted_at
"#;

/// Repository for quote headers.
pub struct QuoteRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> QuoteRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        QuoteRepository { conn }
    }

    /// Inserts a new quote header.
    ///
    /// A second live quote with the same number in the organization fails
    /// with [`DbError::UniqueViolation`].
    pub async fn insert(&mut self, quote: &Quote) -> DbResult<()> {
        debug!(quote_id = %quote.id, quote_number = %quote.quote_number, "Inserting quote");

        let (discount_type, discount_value) = discount_parts(quote.discount.as_ref());
        let metadata = serde_json::to_string(&quote.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO quotes (
                id, organization_id, quote_number, customer_id, project_id,
                title, description, status, quote_type, valid_from, valid_until,
                currency, exchange_rate, subtotal, discount_amount, tax_amount, total_amount,
                discount_type, discount_value, notes,
                approved_by, approved_at, sent_at, accepted_at,
                metadata, created_by, created_at, updated_at, deleted_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5,
                ?6, ?7, ?8, ?9, ?10, ?11,
                ?12, ?13, ?14, ?15, ?16, ?17,
                ?18, ?19, ?20,
                ?21, ?22, ?23, ?24,
                ?25, ?26, ?27, ?28, ?29
            )
            "#,
        )
        .bind(&quote.id)
        .bind(&quote.organization_id)
        .bind(&quote.quote_number)
        .bind(&quote.customer_id)
        .bind(&quote.project_id)
        .bind(&quote.title)
        .bind(&quote.description)
        .bind(quote.status)
        .bind(quote.quote_type)
        .bind(quote.valid_from)
        .bind(quote.valid_until)
        .bind(quote.currency.as_str())
        .bind(quote.exchange_rate.to_string())
        .bind(quote.subtotal.to_string())
        .bind(quote.discount_amount.to_string())
        .bind(quote.tax_amount.to_string())
        .bind(quote.total_amount.to_string())
        .bind(discount_type)
        .bind(discount_value)
        .bind(&quote.notes)
        .bind(&quote.approved_by)
        .bind(quote.approved_at)
        .bind(quote.sent_at)
        .bind(quote.accepted_at)
        .bind(metadata)
        .bind(&quote.created_by)
        .bind(quote.created_at)
        .bind(quote.updated_at)
        .bind(quote.deleted_at)
        .execute(&mut *self.conn)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } => DbError::UniqueViolation {
                field,
                value: quote.quote_number.clone(),
            },
            other => other,
        })?;

        Ok(())
    }

    /// Gets a live (not soft-deleted) quote header by ID within an organization.
    pub async fn find_by_id(&mut self, organization_id: &str, id: &str) -> DbResult<Option<Quote>> {
        let sql = format!(
            "SELECT {} FROM quotes WHERE id = ?1 AND organization_id = ?2 AND deleted_at IS NULL",
            QUOTE_COLUMNS
        );

        let row = sqlx::query(&sql)
            .bind(id)
            .bind(organization_id)
            .fetch_optional(&mut *self.conn)
            .await?;

        row.as_ref().map(quote_from_row).transpose()
    }

    /// Writes every mutable header field, guarded by the status the caller read.
    ///
    /// ## Returns
    /// `DbError::Conflict` when the quote is gone or its status moved.
    pub async fn update(&mut self, quote: &Quote, expected_status: QuoteStatus) -> DbResult<()> {
        debug!(
            quote_id = %quote.id,
            expected = %expected_status,
            status = %quote.status,
            "Updating quote"
        );

        let (discount_type, discount_value) = discount_parts(quote.discount.as_ref());
        let metadata = serde_json::to_string(&quote.metadata)?;

        let result = sqlx::query(
            r#"
            UPDATE quotes SET
                customer_id = ?1,
                project_id = ?2,
                title = ?3,
                description = ?4,
                status = ?5,
                quote_type = ?6,
                valid_from = ?7,
                valid_until = ?8,
                currency = ?9,
                exchange_rate = ?10,
                subtotal = ?11,
                discount_amount = ?12,
                tax_amount = ?13,
                total_amount = ?14,
                discount_type = ?15,
                discount_value = ?16,
                notes = ?17,
                approved_by = ?18,
                approved_at = ?19,
                sent_at = ?20,
                accepted_at = ?21,
                metadata = ?22,
                updated_at = ?23
            WHERE id = ?24
              AND organization_id = ?25
              AND status = ?26
              AND deleted_at IS NULL
            "#,
        )
        .bind(&quote.customer_id)
        .bind(&quote.project_id)
        .bind(&quote.title)
        .bind(&quote.description)
        .bind(quote.status)
        .bind(quote.quote_type)
        .bind(quote.valid_from)
        .bind(quote.valid_until)
        .bind(quote.currency.as_str())
        .bind(quote.exchange_rate.to_string())
        .bind(quote.subtotal.to_string())
        .bind(quote.discount_amount.to_string())
        .bind(quote.tax_amount.to_string())
        .bind(quote.total_amount.to_string())
        .bind(discount_type)
        .bind(discount_value)
        .bind(&quote.notes)
        .bind(&quote.approved_by)
        .bind(quote.approved_at)
        .bind(quote.sent_at)
        .bind(quote.accepted_at)
        .bind(metadata)
        .bind(quote.updated_at)
        .bind(&quote.id)
        .bind(&quote.organization_id)
        .bind(expected_status)
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::conflict("quote", &quote.id));
        }

        Ok(())
    }

    /// Soft-deletes a quote, guarded by the status the caller read.
    pub async fn soft_delete(
        &mut self,
        organization_id: &str,
        id: &str,
        expected_status: QuoteStatus,
        now: DateTime<Utc>,
    ) -> DbResult<()> {
        debug!(quote_id = %id, "Soft-deleting quote");

        let result = sqlx::query(
            r#"
            UPDATE quotes SET deleted_at = ?1, updated_at = ?1
            WHERE id = ?2 AND organization_id = ?3 AND status = ?4 AND deleted_at IS NULL
            "#,
        )
        .bind(now)
        .bind(id)
        .bind(organization_id)
        .bind(expected_status)
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::conflict("quote", id));
        }

        Ok(())
    }

    /// Quote numbers of live quotes matching a `LIKE` pattern (e.g. `Q-2025-%`).
    pub async fn list_numbers(
        &mut self,
        organization_id: &str,
        like_pattern: &str,
    ) -> DbResult<Vec<String>> {
        let numbers: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT quote_number FROM quotes
            WHERE organization_id = ?1
              AND quote_number LIKE ?2 ESCAPE '\'
              AND deleted_at IS NULL
            "#,
        )
        .bind(organization_id)
        .bind(like_pattern)
        .fetch_all(&mut *self.conn)
        .await?;

        Ok(numbers)
    }

    /// Lists live quote headers, newest first, with the total match count.
    pub async fn list(
        &mut self,
        organization_id: &str,
        filters: &QuoteFilters,
        pagination: Pagination,
    ) -> DbResult<(Vec<Quote>, u64)> {
        let pagination = pagination.normalized();

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM quotes");
        push_filters(&mut count, organization_id, filters);
        let total: i64 = count
            .build_query_scalar::<i64>()
            .fetch_one(&mut *self.conn)
            .await?;

        let mut select = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM quotes", QUOTE_COLUMNS));
        push_filters(&mut select, organization_id, filters);
        select.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        select.push_bind(i64::from(pagination.limit));
        select.push(" OFFSET ");
        select.push_bind(i64::try_from(pagination.offset()).unwrap_or(i64::MAX));

        let rows = select.build().fetch_all(&mut *self.conn).await?;
        let quotes = rows.iter().map(quote_from_row).collect::<DbResult<Vec<_>>>()?;

        debug!(
            organization_id = %organization_id,
            returned = quotes.len(),
            total = total,
            "Listed quotes"
        );

        Ok((quotes, u64::try_from(total).unwrap_or(0)))
    }
}

fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, organization_id: &str, filters: &QuoteFilters) {
    builder.push(" WHERE deleted_at IS NULL AND organization_id = ");
    builder.push_bind(organization_id.to_string());

    if let Some(status) = filters.status {
        builder.push(" AND status = ");
        builder.push_bind(status);
    }
    if let Some(customer_id) = &filters.customer_id {
        builder.push(" AND customer_id = ");
        builder.push_bind(customer_id.clone());
    }
    if let Some(project_id) = &filters.project_id {
        builder.push(" AND project_id = ");
        builder.push_bind(project_id.clone());
    }
    if let Some(search) = filters.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", escape_like(search));
        builder.push(" AND (quote_number LIKE ");
        builder.push_bind(pattern.clone());
        builder.push(" ESCAPE '\\' OR title LIKE ");
        builder.push_bind(pattern);
        builder.push(" ESCAPE '\\')");
    }
    if let Some(from) = filters.created_from {
        builder.push(" AND created_at >= ");
        builder.push_bind(from);
    }
    if let Some(to) = filters.created_to {
        builder.push(" AND created_at <= ");
        builder.push_bind(to);
    }
}

fn quote_from_row(row: &SqliteRow) -> DbResult<Quote> {
    Ok(Quote {
        id: row.try_get("id")?,
        organization_id: row.try_get("organization_id")?,
        quote_number: row.try_get("quote_number")?,
        customer_id: row.try_get("customer_id")?,
        project_id: row.try_get("project_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        status: row.try_get::<QuoteStatus, _>("status")?,
        quote_type: row.try_get::<QuoteType, _>("quote_type")?,
        valid_from: row.try_get("valid_from")?,
        valid_until: row.try_get("valid_until")?,
        currency: currency_column(row, "currency")?,
        exchange_rate: decimal_column(row, "exchange_rate")?,
        subtotal: money_column(row, "subtotal")?,
        discount_amount: money_column(row, "discount_amount")?,
        tax_amount: money_column(row, "tax_amount")?,
        total_amount: money_column(row, "total_amount")?,
        discount: discount_columns(row)?,
        notes: row.try_get("notes")?,
        approved_by: row.try_get("approved_by")?,
        approved_at: row.try_get("approved_at")?,
        sent_at: row.try_get("sent_at")?,
        accepted_at: row.try_get("accepted_at")?,
        metadata: json_column(row, "metadata")?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
        line_items: Vec::new(),
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{database, now, quote};
    use crate::repository::Repositories;
    use quote_core::Discount;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_insert_and_find() {
        let db = database().await;
        let mut uow = db.begin().await.unwrap();

        let mut q = quote("q-1", "acme", "Q-2025-0001");
        q.discount = Some(Discount::percentage(dec!(10)));
        q.metadata.insert("source", "web").unwrap();
        uow.quotes().insert(&q).await.unwrap();
        uow.commit().await.unwrap();

        let mut session = db.session().await.unwrap();
        let found = session.quotes().find_by_id("acme", "q-1").await.unwrap().unwrap();
        assert_eq!(found, q);

        // Other organizations cannot see it
        assert!(session.quotes().find_by_id("globex", "q-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_number_is_unique_violation() {
        let db = database().await;
        let mut uow = db.begin().await.unwrap();

        uow.quotes().insert(&quote("q-1", "acme", "Q-2025-0001")).await.unwrap();
        let err = uow
            .quotes()
            .insert(&quote("q-2", "acme", "Q-2025-0001"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
        assert!(err.is_retryable());

        // Same number in another organization is fine
        uow.quotes().insert(&quote("q-3", "globex", "Q-2025-0001")).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_guarded_by_status() {
        let db = database().await;
        let mut uow = db.begin().await.unwrap();

        let mut q = quote("q-1", "acme", "Q-2025-0001");
        uow.quotes().insert(&q).await.unwrap();

        q.status = QuoteStatus::Pending;
        uow.quotes().update(&q, QuoteStatus::Draft).await.unwrap();

        // Stale expectation: the row is already pending
        q.status = QuoteStatus::Cancelled;
        let err = uow.quotes().update(&q, QuoteStatus::Draft).await.unwrap_err();
        assert!(matches!(err, DbError::Conflict { .. }));

        let found = uow.quotes().find_by_id("acme", "q-1").await.unwrap().unwrap();
        assert_eq!(found.status, QuoteStatus::Pending);
    }

    #[tokio::test]
    async fn test_soft_delete_hides_quote_and_frees_number() {
        let db = database().await;
        let mut uow = db.begin().await.unwrap();

        uow.quotes().insert(&quote("q-1", "acme", "Q-2025-0001")).await.unwrap();
        uow.quotes()
            .soft_delete("acme", "q-1", QuoteStatus::Draft, now())
            .await
            .unwrap();

        assert!(uow.quotes().find_by_id("acme", "q-1").await.unwrap().is_none());
        assert!(uow.quotes().list_numbers("acme", "Q-2025-%").await.unwrap().is_empty());

        // Deleted twice → conflict
        let err = uow
            .quotes()
            .soft_delete("acme", "q-1", QuoteStatus::Draft, now())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Conflict { .. }));

        uow.quotes().insert(&quote("q-2", "acme", "Q-2025-0001")).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_with_filters_and_pagination() {
        let db = database().await;
        let mut uow = db.begin().await.unwrap();

        for i in 1..=5 {
            let mut q = quote(&format!("q-{}", i), "acme", &format!("Q-2025-{:04}", i));
            q.created_at = now() + chrono::Duration::minutes(i64::from(i));
            if i == 3 {
                q.title = "Warehouse 50% refit".to_string();
                q.status = QuoteStatus::Pending;
            }
            uow.quotes().insert(&q).await.unwrap();
        }
        uow.quotes().insert(&quote("other", "globex", "Q-2025-0001")).await.unwrap();

        let (page, total) = uow
            .quotes()
            .list("acme", &QuoteFilters::default(), Pagination::new(1, 2))
            .await
            .unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, "q-5");
        assert_eq!(page[1].id, "q-4");

        let (page, total) = uow
            .quotes()
            .list("acme", &QuoteFilters::default(), Pagination::new(3, 2))
            .await
            .unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "q-1");

        let filters = QuoteFilters {
            search: Some("50%".to_string()),
            ..Default::default()
        };
        let (page, total) = uow.quotes().list("acme", &filters, Pagination::default()).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(page[0].id, "q-3");

        let filters = QuoteFilters {
            search: Some("q-2025-0002".to_string()),
            ..Default::default()
        };
        let (page, _) = uow.quotes().list("acme", &filters, Pagination::default()).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "q-2");

        let filters = QuoteFilters {
            status: Some(QuoteStatus::Draft),
            created_from: Some(now() + chrono::Duration::minutes(2)),
            created_to: Some(now() + chrono::Duration::minutes(4)),
            ..Default::default()
        };
        let (page, total) = uow.quotes().list("acme", &filters, Pagination::default()).await.unwrap();
        assert_eq!(total, 2);
        let ids: Vec<_> = page.iter().map(|q| q.id.as_str()).collect();
        assert_eq!(ids, vec!["q-4", "q-2"]);
    }
}
