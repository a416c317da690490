//! # Line Item Repository
//!
//! Line items are always written as a full set: an edit that touches lines
//! deletes the old set and inserts the new one inside the same transaction.

use quote_core::{LineItemType, PricingSource, QuoteLineItem, TaxRate};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::debug;

use super::{
    currency_column, decimal_column, discount_columns, discount_parts, json_column, money_column,
    optional_money_column,
};
use crate::error::{DbError, DbResult};

/// Repository for quote line items.
pub struct LineItemRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> LineItemRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        LineItemRepository { conn }
    }

    /// Inserts the given lines in order.
    pub async fn insert_many(&mut self, items: &[QuoteLineItem]) -> DbResult<()> {
        for item in items {
            self.insert(item).await?;
        }
        Ok(())
    }

    async fn insert(&mut self, item: &QuoteLineItem) -> DbResult<()> {
        debug!(quote_id = %item.quote_id, line_number = item.line_number, "Inserting line item");

        let (discount_type, discount_value) = discount_parts(item.discount.as_ref());
        let metadata = serde_json::to_string(&item.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO quote_line_items (
                id, quote_id, line_number, line_type, description,
                quantity, unit_price, currency, unit_cost, unit,
                tax_inclusive, tax_rate, discount_type, discount_value,
                pricing_source, service_category_id, rate_card_id, rate_card_item_id, item_code,
                subtotal, discount_amount, tax_amount, total_amount,
                metadata, created_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5,
                ?6, ?7, ?8, ?9, ?10,
                ?11, ?12, ?13, ?14,
                ?15, ?16, ?17, ?18, ?19,
                ?20, ?21, ?22, ?23,
                ?24, ?25
            )
            "#,
        )
        .bind(&item.id)
        .bind(&item.quote_id)
        .bind(i64::from(item.line_number))
        .bind(item.line_type)
        .bind(&item.description)
        .bind(item.quantity.to_string())
        .bind(item.unit_price.to_string())
        .bind(item.currency.as_str())
        .bind(item.unit_cost.map(|c| c.to_string()))
        .bind(&item.unit)
        .bind(item.tax_inclusive)
        .bind(item.tax_rate.to_string())
        .bind(discount_type)
        .bind(discount_value)
        .bind(item.pricing_source)
        .bind(&item.service_category_id)
        .bind(&item.rate_card_id)
        .bind(&item.rate_card_item_id)
        .bind(&item.item_code)
        .bind(item.subtotal.to_string())
        .bind(item.discount_amount.to_string())
        .bind(item.tax_amount.to_string())
        .bind(item.total_amount.to_string())
        .bind(metadata)
        .bind(item.created_at)
        .execute(&mut *self.conn)
        .await?;

        Ok(())
    }

    /// Lines of a quote ordered by line number.
    pub async fn list_for_quote(&mut self, quote_id: &str) -> DbResult<Vec<QuoteLineItem>> {
        let rows = sqlx::query(
            r#"
            SELECT
                id, quote_id, line_number, line_type, description,
                quantity, unit_price, currency, unit_cost, unit,
                tax_inclusive, tax_rate, discount_type, discount_value,
                pricing_source, service_category_id, rate_card_id, rate_card_item_id, item_code,
                subtotal, discount_amount, tax_amount, total_amount,
                metadata, created_at
            FROM quote_line_items
            WHERE quote_id = ?1
            ORDER BY line_number
            "#,
        )
        .bind(quote_id)
        .fetch_all(&mut *self.conn)
        .await?;

        rows.iter().map(line_item_from_row).collect()
    }

    /// Removes every line of a quote. Returns the number removed.
    pub async fn delete_for_quote(&mut self, quote_id: &str) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM quote_line_items WHERE quote_id = ?1")
            .bind(quote_id)
            .execute(&mut *self.conn)
            .await?;

        debug!(quote_id = %quote_id, removed = result.rows_affected(), "Deleted line items");
        Ok(result.rows_affected())
    }
}

fn line_item_from_row(row: &SqliteRow) -> DbResult<QuoteLineItem> {
    let line_number: i64 = row.try_get("line_number")?;
    let tax_rate = TaxRate::from_fraction(decimal_column(row, "tax_rate")?)
        .map_err(|e| DbError::decode("tax_rate", e))?;

    Ok(QuoteLineItem {
        id: row.try_get("id")?,
        quote_id: row.try_get("quote_id")?,
        line_number: u32::try_from(line_number).map_err(|e| DbError::decode("line_number", e))?,
        line_type: row.try_get::<LineItemType, _>("line_type")?,
        description: row.try_get("description")?,
        quantity: decimal_column(row, "quantity")?,
        unit_price: money_column(row, "unit_price")?,
        currency: currency_column(row, "currency")?,
        unit_cost: optional_money_column(row, "unit_cost")?,
        unit: row.try_get("unit")?,
        tax_inclusive: row.try_get("tax_inclusive")?,
        tax_rate,
        discount: discount_columns(row)?,
        pricing_source: row.try_get::<PricingSource, _>("pricing_source")?,
        service_category_id: row.try_get("service_category_id")?,
        rate_card_id: row.try_get("rate_card_id")?,
        rate_card_item_id: row.try_get("rate_card_item_id")?,
        item_code: row.try_get("item_code")?,
        subtotal: money_column(row, "subtotal")?,
        discount_amount: money_column(row, "discount_amount")?,
        tax_amount: money_column(row, "tax_amount")?,
        total_amount: money_column(row, "total_amount")?,
        metadata: json_column(row, "metadata")?,
        created_at: row.try_get("created_at")?,
    })
}
