//! # Repository Module
//!
//! Database repository implementations for the quotation engine.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern Explained                         │
//! │                                                                         │
//! │  Engine service                                                        │
//! │       │                                                                 │
//! │       │  uow.quotes().find_by_id(org, id)                              │
//! │       ▼                                                                 │
//! │  QuoteRepository<'c>  ── borrows the UnitOfWork's connection           │
//! │  ├── insert / update / soft_delete                                     │
//! │  ├── find_by_id / list                                                 │
//! │  └── list_numbers                                                      │
//! │       │                                                                 │
//! │       │  SQL Query (runtime, bound parameters)                         │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! │                                                                         │
//! │  A repository never opens its own connection, so everything done       │
//! │  through one UnitOfWork commits or rolls back together.                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`QuoteRepository`] - Quote headers, listing, number scan
//! - [`LineItemRepository`] - Quote line items
//! - [`VersionRepository`] - Quote version snapshots
//! - [`RateCardRepository`] - Rate cards and their items
//! - [`IdempotencyRepository`] - Idempotent response records
//! - [`AuditLogRepository`] - Audit outbox
//! - [`SettingsRepository`] - Per-organization settings

pub mod audit;
pub mod idempotency;
pub mod line_item;
pub mod quote;
pub mod rate_card;
pub mod settings;
pub mod version;

use quote_core::{Currency, Discount, DiscountType, Money};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::str::FromStr;

use crate::error::{DbError, DbResult};

pub use audit::AuditLogRepository;
pub use idempotency::IdempotencyRepository;
pub use line_item::LineItemRepository;
pub use quote::QuoteRepository;
pub use rate_card::RateCardRepository;
pub use settings::SettingsRepository;
pub use version::VersionRepository;

// =============================================================================
// Repository Access
// =============================================================================

/// Anything that owns a connection can hand out repositories bound to it.
pub trait Repositories {
    fn connection(&mut self) -> &mut SqliteConnection;

    fn quotes(&mut self) -> QuoteRepository<'_> {
        QuoteRepository::new(self.connection())
    }

    fn line_items(&mut self) -> LineItemRepository<'_> {
        LineItemRepository::new(self.connection())
    }

    fn versions(&mut self) -> VersionRepository<'_> {
        VersionRepository::new(self.connection())
    }

    fn rate_cards(&mut self) -> RateCardRepository<'_> {
        RateCardRepository::new(self.connection())
    }

    fn idempotency(&mut self) -> IdempotencyRepository<'_> {
        IdempotencyRepository::new(self.connection())
    }

    fn audit(&mut self) -> AuditLogRepository<'_> {
        AuditLogRepository::new(self.connection())
    }

    fn settings(&mut self) -> SettingsRepository<'_> {
        SettingsRepository::new(self.connection())
    }
}

// =============================================================================
// Column Decoding
// =============================================================================
// Decimals are stored as TEXT so no precision is lost in SQLite's REAL.

pub(crate) fn decimal_column(row: &SqliteRow, column: &str) -> DbResult<Decimal> {
    let text: String = row.try_get(column)?;
    Decimal::from_str(&text).map_err(|e| DbError::decode(column, e))
}

pub(crate) fn optional_decimal_column(row: &SqliteRow, column: &str) -> DbResult<Option<Decimal>> {
    let text: Option<String> = row.try_get(column)?;
    text.map(|t| Decimal::from_str(&t).map_err(|e| DbError::decode(column, e)))
        .transpose()
}

pub(crate) fn money_column(row: &SqliteRow, column: &str) -> DbResult<Money> {
    decimal_column(row, column).map(Money::new)
}

pub(crate) fn optional_money_column(row: &SqliteRow, column: &str) -> DbResult<Option<Money>> {
    Ok(optional_decimal_column(row, column)?.map(Money::new))
}

pub(crate) fn currency_column(row: &SqliteRow, column: &str) -> DbResult<Currency> {
    let text: String = row.try_get(column)?;
    Currency::new(&text).map_err(|e| DbError::decode(column, e))
}

pub(crate) fn json_column<T: DeserializeOwned>(row: &SqliteRow, column: &str) -> DbResult<T> {
    let text: String = row.try_get(column)?;
    serde_json::from_str(&text).map_err(|e| DbError::decode(column, e))
}

pub(crate) fn optional_json_column<T: DeserializeOwned>(
    row: &SqliteRow,
    column: &str,
) -> DbResult<Option<T>> {
    let text: Option<String> = row.try_get(column)?;
    text.map(|t| serde_json::from_str(&t).map_err(|e| DbError::decode(column, e)))
        .transpose()
}

/// Reads a discount stored as `discount_type` + `discount_value` columns.
pub(crate) fn discount_columns(row: &SqliteRow) -> DbResult<Option<Discount>> {
    let discount_type: Option<DiscountType> = row.try_get("discount_type")?;
    let value = optional_decimal_column(row, "discount_value")?;
    Ok(match (discount_type, value) {
        (Some(discount_type), Some(value)) => Some(Discount {
            discount_type,
            value,
        }),
        _ => None,
    })
}

pub(crate) fn discount_parts(discount: Option<&Discount>) -> (Option<DiscountType>, Option<String>) {
    match discount {
        Some(d) => (Some(d.discount_type), Some(d.value.to_string())),
        None => (None, None),
    }
}

/// Escapes `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern.
pub(crate) fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

// =============================================================================
// Test Support
// =============================================================================

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, TimeZone, Utc};
    use quote_core::{
        Currency, Metadata, Money, PricingSource, Quote, QuoteLineItem, QuoteStatus, QuoteType,
        LineItemType, TaxRate,
    };
    use rust_decimal::Decimal;

    use crate::{Database, DbConfig};

    pub async fn database() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    pub fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0).unwrap()
    }

    pub fn quote(id: &str, org: &str, number: &str) -> Quote {
        let usd = Currency::new("USD").unwrap();
        let zero = Money::zero().round(&usd);
        Quote {
            id: id.to_string(),
            organization_id: org.to_string(),
            quote_number: number.to_string(),
            customer_id: "customer-1".to_string(),
            project_id: None,
            title: format!("Quote {}", number),
            description: None,
            status: QuoteStatus::Draft,
            quote_type: QuoteType::Standard,
            valid_from: None,
            valid_until: None,
            currency: usd,
            exchange_rate: Decimal::ONE,
            subtotal: zero,
            discount_amount: zero,
            tax_amount: zero,
            total_amount: zero,
            discount: None,
            notes: None,
            approved_by: None,
            approved_at: None,
            sent_at: None,
            accepted_at: None,
            metadata: Metadata::new(),
            created_by: "user-1".to_string(),
            created_at: now(),
            updated_at: now(),
            deleted_at: None,
            line_items: Vec::new(),
        }
    }

    pub fn line(quote_id: &str, line_number: u32) -> QuoteLineItem {
        let usd = Currency::new("USD").unwrap();
        QuoteLineItem {
            id: format!("{}-line-{}", quote_id, line_number),
            quote_id: quote_id.to_string(),
            line_number,
            line_type: LineItemType::Labor,
            description: "Installation".to_string(),
            quantity: Decimal::new(75, 1),
            unit_price: Money::new(Decimal::new(12000, 2)),
            currency: usd,
            unit_cost: None,
            unit: "hour".to_string(),
            tax_inclusive: false,
            tax_rate: TaxRate::from_bps(1500),
            discount: None,
            pricing_source: PricingSource::RateCard,
            service_category_id: Some("install".to_string()),
            rate_card_id: Some("card-1".to_string()),
            rate_card_item_id: Some("item-1".to_string()),
            item_code: None,
            subtotal: Money::new(Decimal::new(90000, 2)),
            discount_amount: Money::new(Decimal::new(0, 2)),
            tax_amount: Money::new(Decimal::new(13500, 2)),
            total_amount: Money::new(Decimal::new(103500, 2)),
            metadata: Metadata::new(),
            created_at: now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }
}
