//! # Rate Card Repository
//!
//! Database operations for rate cards and their items.
//!
//! ## Lookups Used by Pricing
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  list_active_cards(org)          all active cards; date filter and      │
//! │                                  default/newest choice happen in core   │
//! │  list_items(card)                every item of one card                 │
//! │  find_item_by_code(card, code)   case-insensitive SKU lookup            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use quote_core::{RateCard, RateCardItem, TaxClass};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::debug;

use super::{currency_column, money_column};
use crate::error::{DbError, DbResult};

const CARD_COLUMNS: &str = r#"
    id, organization_id, name, currency, effective_from, effective_until,
    is_default, is_active, created_at, updated_at
"#;

const ITEM_COLUMNS: &str = r#"
    id, rate_card_id, organization_id, service_category_id, role_id, item_code, name,
    base_rate, currency, tax_class, unit, effective_from, effective_until,
    is_active, created_at, updated_at
"#;

/// Repository for rate cards and rate-card items.
pub struct RateCardRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> RateCardRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        RateCardRepository { conn }
    }

    // =========================================================================
    // Cards
    // =========================================================================

    pub async fn insert_card(&mut self, card: &RateCard) -> DbResult<()> {
        debug!(rate_card_id = %card.id, organization_id = %card.organization_id, "Inserting rate card");

        sqlx::query(
            r#"
            INSERT INTO rate_cards (
                id, organization_id, name, currency, effective_from, effective_until,
                is_default, is_active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&card.id)
        .bind(&card.organization_id)
        .bind(&card.name)
        .bind(card.currency.as_str())
        .bind(card.effective_from)
        .bind(card.effective_until)
        .bind(card.is_default)
        .bind(card.is_active)
        .bind(card.created_at)
        .bind(card.updated_at)
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }

    pub async fn update_card(&mut self, card: &RateCard) -> DbResult<()> {
        debug!(rate_card_id = %card.id, "Updating rate card");

        let result = sqlx::query(
            r#"
            UPDATE rate_cards SET
                name = ?1, currency = ?2, effective_from = ?3, effective_until = ?4,
                is_default = ?5, is_active = ?6, updated_at = ?7
            WHERE id = ?8 AND organization_id = ?9
            "#,
        )
        .bind(&card.name)
        .bind(card.currency.as_str())
        .bind(card.effective_from)
        .bind(card.effective_until)
        .bind(card.is_default)
        .bind(card.is_active)
        .bind(card.updated_at)
        .bind(&card.id)
        .bind(&card.organization_id)
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("rate card", &card.id));
        }
        Ok(())
    }

    pub async fn find_card(&mut self, organization_id: &str, id: &str) -> DbResult<Option<RateCard>> {
        let sql = format!(
            "SELECT {} FROM rate_cards WHERE id = ?1 AND organization_id = ?2",
            CARD_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(organization_id)
            .fetch_optional(&mut *self.conn)
            .await?;

        row.as_ref().map(card_from_row).transpose()
    }

    /// Every active card of the organization, newest `effective_from` first.
    pub async fn list_active_cards(&mut self, organization_id: &str) -> DbResult<Vec<RateCard>> {
        let sql = format!(
            r#"
            SELECT {} FROM rate_cards
            WHERE organization_id = ?1 AND is_active = 1
            ORDER BY effective_from DESC, created_at DESC
            "#,
            CARD_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(organization_id)
            .fetch_all(&mut *self.conn)
            .await?;

        rows.iter().map(card_from_row).collect()
    }

    /// Clears `is_default` on the organization's other default cards that
    /// start on `effective_from`.
    ///
    /// Defaults with other start dates stay: pricing picks the latest one
    /// covering the date, so a future default can be scheduled while the
    /// current one keeps pricing.
    pub async fn clear_default(
        &mut self,
        organization_id: &str,
        except_id: &str,
        effective_from: NaiveDate,
        now: DateTime<Utc>,
    ) -> DbResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE rate_cards SET is_default = 0, updated_at = ?1
            WHERE organization_id = ?2 AND id != ?3 AND is_default = 1
              AND effective_from = ?4
            "#,
        )
        .bind(now)
        .bind(organization_id)
        .bind(except_id)
        .bind(effective_from)
        .execute(&mut *self.conn)
        .await?;

        Ok(result.rows_affected())
    }

    // =========================================================================
    // Items
    // =========================================================================

    pub async fn insert_item(&mut self, item: &RateCardItem) -> DbResult<()> {
        debug!(rate_card_item_id = %item.id, rate_card_id = %item.rate_card_id, "Inserting rate card item");

        sqlx::query(
            r#"
            INSERT INTO rate_card_items (
                id, rate_card_id, organization_id, service_category_id, role_id, item_code, name,
                base_rate, currency, tax_class, unit, effective_from, effective_until,
                is_active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
        )
        .bind(&item.id)
        .bind(&item.rate_card_id)
        .bind(&item.organization_id)
        .bind(&item.service_category_id)
        .bind(&item.role_id)
        .bind(&item.item_code)
        .bind(&item.name)
        .bind(item.base_rate.to_string())
        .bind(item.currency.as_str())
        .bind(item.tax_class)
        .bind(&item.unit)
        .bind(item.effective_from)
        .bind(item.effective_until)
        .bind(item.is_active)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }

    pub async fn update_item(&mut self, item: &RateCardItem) -> DbResult<()> {
        debug!(rate_card_item_id = %item.id, "Updating rate card item");

        let result = sqlx::query(
            r#"
            UPDATE rate_card_items SET
                service_category_id = ?1, role_id = ?2, item_code = ?3, name = ?4,
                base_rate = ?5, currency = ?6, tax_class = ?7, unit = ?8,
                effective_from = ?9, effective_until = ?10, is_active = ?11, updated_at = ?12
            WHERE id = ?13 AND organization_id = ?14
            "#,
        )
        .bind(&item.service_category_id)
        .bind(&item.role_id)
        .bind(&item.item_code)
        .bind(&item.name)
        .bind(item.base_rate.to_string())
        .bind(item.currency.as_str())
        .bind(item.tax_class)
        .bind(&item.unit)
        .bind(item.effective_from)
        .bind(item.effective_until)
        .bind(item.is_active)
        .bind(item.updated_at)
        .bind(&item.id)
        .bind(&item.organization_id)
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("rate card item", &item.id));
        }
        Ok(())
    }

    pub async fn find_item(
        &mut self,
        organization_id: &str,
        id: &str,
    ) -> DbResult<Option<RateCardItem>> {
        let sql = format!(
            "SELECT {} FROM rate_card_items WHERE id = ?1 AND organization_id = ?2",
            ITEM_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(organization_id)
            .fetch_optional(&mut *self.conn)
            .await?;

        row.as_ref().map(item_from_row).transpose()
    }

    /// Every item of a card, active or not; pricing filters by date itself.
    pub async fn list_items(&mut self, rate_card_id: &str) -> DbResult<Vec<RateCardItem>> {
        let sql = format!(
            "SELECT {} FROM rate_card_items WHERE rate_card_id = ?1 ORDER BY created_at, id",
            ITEM_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(rate_card_id)
            .fetch_all(&mut *self.conn)
            .await?;

        rows.iter().map(item_from_row).collect()
    }

    /// Items of a card whose code matches, ignoring ASCII case.
    pub async fn find_items_by_code(
        &mut self,
        rate_card_id: &str,
        item_code: &str,
    ) -> DbResult<Vec<RateCardItem>> {
        let sql = format!(
            r#"
            SELECT {} FROM rate_card_items
            WHERE rate_card_id = ?1 AND item_code = ?2 COLLATE NOCASE
            ORDER BY created_at, id
            "#,
            ITEM_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(rate_card_id)
            .bind(item_code.trim())
            .fetch_all(&mut *self.conn)
            .await?;

        rows.iter().map(item_from_row).collect()
    }
}

fn card_from_row(row: &SqliteRow) -> DbResult<RateCard> {
    Ok(RateCard {
        id: row.try_get("id")?,
        organization_id: row.try_get("organization_id")?,
        name: row.try_get("name")?,
        currency: currency_column(row, "currency")?,
        effective_from: row.try_get("effective_from")?,
        effective_until: row.try_get("effective_until")?,
        is_default: row.try_get("is_default")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn item_from_row(row: &SqliteRow) -> DbResult<RateCardItem> {
    Ok(RateCardItem {
        id: row.try_get("id")?,
        rate_card_id: row.try_get("rate_card_id")?,
        organization_id: row.try_get("organization_id")?,
        service_category_id: row.try_get("service_category_id")?,
        role_id: row.try_get("role_id")?,
        item_code: row.try_get("item_code")?,
        name: row.try_get("name")?,
        base_rate: money_column(row, "base_rate")?,
        currency: currency_column(row, "currency")?,
        tax_class: row.try_get::<TaxClass, _>("tax_class")?,
        unit: row.try_get("unit")?,
        effective_from: row.try_get("effective_from")?,
        effective_until: row.try_get("effective_until")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================


#[cfg(test)]
mod tests {
    use super::test_data::{card, item};
    use super::*;
    use crate::repository::test_support::{database, now};
    use crate::repository::Repositories;

    #[tokio::test]
    async fn test_cards_roundtrip_and_active_listing() {
        let db = database().await;
        let mut uow = db.begin().await.unwrap();

        let old = card("c-old", "acme", (2024, 1, 1), true);
        let new = card("c-new", "acme", (2025, 1, 1), false);
        let mut inactive = card("c-off", "acme", (2025, 6, 1), true);
        inactive.is_active = false;
        for c in [&old, &new, &inactive] {
            uow.rate_cards().insert_card(c).await.unwrap();
        }
        uow.rate_cards().insert_card(&card("c-x", "globex", (2025, 1, 1), true)).await.unwrap();

        let active = uow.rate_cards().list_active_cards("acme").await.unwrap();
        let ids: Vec<_> = active.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c-new", "c-old"]);
        assert_eq!(active[1], old);

        let found = uow.rate_cards().find_card("acme", "c-off").await.unwrap().unwrap();
        assert!(!found.is_active);
        assert!(uow.rate_cards().find_card("globex", "c-off").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_default_only_touches_same_start_date() {
        let db = database().await;
        let mut uow = db.begin().await.unwrap();

        uow.rate_cards().insert_card(&card("old", "acme", (2024, 1, 1), true)).await.unwrap();
        uow.rate_cards().insert_card(&card("a", "acme", (2025, 1, 1), true)).await.unwrap();
        uow.rate_cards().insert_card(&card("b", "acme", (2025, 1, 1), true)).await.unwrap();
        uow.rate_cards().insert_card(&card("g", "globex", (2025, 1, 1), true)).await.unwrap();

        let from = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let cleared = uow.rate_cards().clear_default("acme", "b", from, now()).await.unwrap();
        assert_eq!(cleared, 1);

        assert!(!uow.rate_cards().find_card("acme", "a").await.unwrap().unwrap().is_default);
        assert!(uow.rate_cards().find_card("acme", "b").await.unwrap().unwrap().is_default);
        assert!(uow.rate_cards().find_card("acme", "old").await.unwrap().unwrap().is_default);
        assert!(uow.rate_cards().find_card("globex", "g").await.unwrap().unwrap().is_default);
    }

    #[tokio::test]
    async fn test_items_by_code_ignore_case() {
        let db = database().await;
        let mut uow = db.begin().await.unwrap();

        let c = card("c-1", "acme", (2025, 1, 1), true);
        uow.rate_cards().insert_card(&c).await.unwrap();
        let install = item("i-1", &c, "install", Some("INST-01"), 12000);
        uow.rate_cards().insert_item(&install).await.unwrap();
        uow.rate_cards().insert_item(&item("i-2", &c, "design", None, 15000)).await.unwrap();

        let hits = uow.rate_cards().find_items_by_code("c-1", " inst-01 ").await.unwrap();
        assert_eq!(hits, vec![install.clone()]);
        assert!(uow.rate_cards().find_items_by_code("c-1", "NOPE").await.unwrap().is_empty());

        assert_eq!(uow.rate_cards().list_items("c-1").await.unwrap().len(), 2);

        let mut changed = install.clone();
        changed.is_active = false;
        uow.rate_cards().update_item(&changed).await.unwrap();
        let found = uow.rate_cards().find_item("acme", "i-1").await.unwrap().unwrap();
        assert!(!found.is_active);

        let mut missing = install;
        missing.id = "ghost".to_string();
        assert!(matches!(
            uow.rate_cards().update_item(&missing).await,
            Err(DbError::NotFound { .. })
        ));
    }
}
