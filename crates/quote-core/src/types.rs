//! # Domain Types
//!
//! Core domain types used throughout the quotation engine.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐ 1..n ┌─────────────────┐   ┌─────────────────┐    │
//! │  │     Quote       │─────►│  QuoteLineItem  │   │  QuoteVersion   │    │
//! │  │  ─────────────  │      │  ─────────────  │   │  ─────────────  │    │
//! │  │  id (UUID)      │      │  line_number    │   │  version_number │    │
//! │  │  quote_number   │      │  quantity       │   │  snapshot       │    │
//! │  │  status         │      │  unit_price     │   │  (Quote + lines)│    │
//! │  │  totals         │      │  amounts        │   └─────────────────┘    │
//! │  └─────────────────┘      └────────┬────────┘                          │
//! │                                    │ priced from                        │
//! │  ┌─────────────────┐ 1..n ┌────────▼────────┐                          │
//! │  │    RateCard     │─────►│  RateCardItem   │                          │
//! │  │  effective from │      │  base_rate      │                          │
//! │  │  is_default     │      │  tax_class      │                          │
//! │  └─────────────────┘      └─────────────────┘                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Quotes have a UUID `id` for relations and a human-readable
//! `quote_number` (`Q-2025-0001`) unique per organization.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::error::ValidationError;
use crate::metadata::Metadata;
use crate::money::{Currency, Money};
use crate::status::QuoteStatus;

// =============================================================================
// Tax Rate
// =============================================================================

/// Tax rate as a fraction (`0.15` = 15%).
///
/// Basis-point constructors are kept for readable tests and seed data:
/// `TaxRate::from_bps(1500)` is 15%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaxRate(Decimal);

impl TaxRate {
    /// Creates a tax rate from a fraction between 0 and 1 inclusive.
    pub fn from_fraction(fraction: Decimal) -> Result<Self, ValidationError> {
        if fraction < Decimal::ZERO || fraction > Decimal::ONE {
            return Err(ValidationError::OutOfRange {
                field: "tax_rate".to_string(),
                min: "0".to_string(),
                max: "1".to_string(),
            });
        }
        Ok(TaxRate(fraction))
    }

    /// Creates a tax rate from basis points (825 = 8.25%).
    pub fn from_bps(bps: u32) -> Self {
        TaxRate(Decimal::new(i64::from(bps), 4))
    }

    #[inline]
    pub fn fraction(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub const fn zero() -> Self {
        TaxRate(Decimal::ZERO)
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl Default for TaxRate {
    fn default() -> Self {
        TaxRate::zero()
    }
}

impl fmt::Display for TaxRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Enumerations
// =============================================================================

/// Commercial type of a quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum QuoteType {
    Standard,
    Project,
    Maintenance,
    ChangeOrder,
}

impl Default for QuoteType {
    fn default() -> Self {
        QuoteType::Standard
    }
}

/// Kind of work or goods a line item represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum LineItemType {
    Service,
    Labor,
    Material,
    Expense,
    Fee,
}

impl Default for LineItemType {
    fn default() -> Self {
        LineItemType::Service
    }
}

/// How a discount value is interpreted.
///
/// ```text
/// Percentage  value 10    → 10% of the running base
/// FixedAmount value 25.00 → 25.00 off the line / quote
/// PerUnit     value 2.00  → 2.00 × quantity off the line
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    Percentage,
    FixedAmount,
    PerUnit,
}

/// Tax class of a rate-card item; mapped to a rate by the pricing defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TaxClass {
    Standard,
    Reduced,
    Zero,
    Exempt,
}

impl Default for TaxClass {
    fn default() -> Self {
        TaxClass::Standard
    }
}

/// Where a line's unit price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PricingSource {
    /// Caller-supplied price, honoured because they hold override permission.
    Explicit,
    /// Base rate of a rate-card item.
    RateCard,
}

// =============================================================================
// Discount
// =============================================================================

/// A discount attached to a line or to the whole quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Discount {
    pub discount_type: DiscountType,
    #[ts(as = "String")]
    pub value: Decimal,
}

impl Discount {
    pub fn percentage(value: Decimal) -> Self {
        Discount {
            discount_type: DiscountType::Percentage,
            value,
        }
    }

    pub fn fixed_amount(value: Decimal) -> Self {
        Discount {
            discount_type: DiscountType::FixedAmount,
            value,
        }
    }

    pub fn per_unit(value: Decimal) -> Self {
        Discount {
            discount_type: DiscountType::PerUnit,
            value,
        }
    }
}

// =============================================================================
// Quote
// =============================================================================

/// An organization-scoped quotation document.
///
/// ## Invariant
/// `total_amount == subtotal - discount_amount + tax_amount`, every component
/// rounded to the currency. Only [`crate::calculator::recalculate`] writes
/// the four amounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Quote {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Tenant this quote belongs to.
    pub organization_id: String,

    /// Human-readable number, `{PREFIX}-{YEAR}-{SEQUENCE}`.
    pub quote_number: String,

    pub customer_id: String,
    pub project_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub status: QuoteStatus,
    pub quote_type: QuoteType,

    #[ts(as = "Option<String>")]
    pub valid_from: Option<NaiveDate>,
    #[ts(as = "Option<String>")]
    pub valid_until: Option<NaiveDate>,

    #[ts(as = "String")]
    pub currency: Currency,
    /// Informational rate to the organization's base currency; never applied.
    #[ts(as = "String")]
    pub exchange_rate: Decimal,

    #[ts(as = "String")]
    pub subtotal: Money,
    #[ts(as = "String")]
    pub discount_amount: Money,
    #[ts(as = "String")]
    pub tax_amount: Money,
    #[ts(as = "String")]
    pub total_amount: Money,

    /// Quote-level discount, applied after line discounts.
    pub discount: Option<Discount>,

    pub notes: Option<String>,

    pub approved_by: Option<String>,
    #[ts(as = "Option<String>")]
    pub approved_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub sent_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub accepted_at: Option<DateTime<Utc>>,

    #[ts(as = "std::collections::BTreeMap<String, String>")]
    pub metadata: Metadata,

    pub created_by: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub deleted_at: Option<DateTime<Utc>>,

    /// Ordered by `line_number`. Empty in list results.
    #[serde(default)]
    pub line_items: Vec<QuoteLineItem>,
}

// =============================================================================
// Quote Line Item
// =============================================================================

/// A priced line on a quote.
///
/// Rate-card references are copied onto the line (snapshot pattern) so the
/// quote keeps its prices even if the rate card changes later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct QuoteLineItem {
    pub id: String,
    pub quote_id: String,

    /// 1-based position, unique within the quote.
    pub line_number: u32,

    pub line_type: LineItemType,
    pub description: String,

    #[ts(as = "String")]
    pub quantity: Decimal,
    #[ts(as = "String")]
    pub unit_price: Money,
    #[ts(as = "String")]
    pub currency: Currency,
    #[ts(as = "Option<String>")]
    pub unit_cost: Option<Money>,
    pub unit: String,

    /// Price already includes tax; no tax is added on top.
    pub tax_inclusive: bool,
    #[ts(as = "String")]
    pub tax_rate: TaxRate,
    pub discount: Option<Discount>,

    pub pricing_source: PricingSource,
    pub service_category_id: Option<String>,
    pub rate_card_id: Option<String>,
    pub rate_card_item_id: Option<String>,
    pub item_code: Option<String>,

    /// quantity × unit_price.
    #[ts(as = "String")]
    pub subtotal: Money,
    #[ts(as = "String")]
    pub discount_amount: Money,
    #[ts(as = "String")]
    pub tax_amount: Money,
    /// subtotal − discount + tax.
    #[ts(as = "String")]
    pub total_amount: Money,

    #[ts(as = "std::collections::BTreeMap<String, String>")]
    pub metadata: Metadata,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Rate Cards
// =============================================================================

/// A dated pricing catalog for one organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RateCard {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    #[ts(as = "String")]
    pub currency: Currency,
    #[ts(as = "String")]
    pub effective_from: NaiveDate,
    #[ts(as = "Option<String>")]
    pub effective_until: Option<NaiveDate>,
    pub is_default: bool,
    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl RateCard {
    /// `effective_from <= date <= effective_until` (open-ended when unset).
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.effective_from <= date && self.effective_until.map_or(true, |until| date <= until)
    }
}

/// One priceable entry of a rate card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RateCardItem {
    pub id: String,
    pub rate_card_id: String,
    pub organization_id: String,
    pub service_category_id: String,
    pub role_id: Option<String>,
    /// SKU used for exact lookups.
    pub item_code: Option<String>,
    /// Display name, used for description matching.
    pub name: Option<String>,
    #[ts(as = "String")]
    pub base_rate: Money,
    #[ts(as = "String")]
    pub currency: Currency,
    pub tax_class: TaxClass,
    pub unit: String,
    #[ts(as = "Option<String>")]
    pub effective_from: Option<NaiveDate>,
    #[ts(as = "Option<String>")]
    pub effective_until: Option<NaiveDate>,
    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl RateCardItem {
    /// Active and inside its own effective window on `date`.
    pub fn is_effective_on(&self, date: NaiveDate) -> bool {
        self.is_active
            && self.effective_from.map_or(true, |from| from <= date)
            && self.effective_until.map_or(true, |until| date <= until)
    }
}

// =============================================================================
// Versions
// =============================================================================

/// Immutable snapshot taken before a locked quote is edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct QuoteVersion {
    pub id: String,
    pub quote_id: String,
    pub organization_id: String,
    /// Starts at 1, +1 per snapshot of the same quote.
    pub version_number: i64,
    /// The quote and its lines as they were before the edit.
    pub snapshot: Quote,
    pub reason: Option<String>,
    pub created_by: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Idempotency
// =============================================================================

/// Stored outcome of a keyed mutating request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub idempotency_key: String,
    pub organization_id: String,
    pub user_id: String,
    pub route: String,
    pub method: String,
    /// SHA-256 hex of the canonical request body.
    pub request_hash: String,
    pub response_status: u16,
    /// Response body exactly as first returned.
    pub response_body: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

// =============================================================================
// Audit
// =============================================================================

/// One append-only audit entry; one is emitted per quote operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    /// e.g. `quote.created`, `quote.status_changed`.
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub organization_id: String,
    pub user_id: String,
    pub old_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Listing
// =============================================================================

/// Optional filters for quote listings. All set filters must match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuoteFilters {
    pub status: Option<QuoteStatus>,
    pub customer_id: Option<String>,
    pub project_id: Option<String>,
    /// Case-insensitive substring of quote number or title.
    pub search: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
}

/// Page request. Out-of-range values are clamped by [`Pagination::normalized`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Pagination {
    pub const DEFAULT_LIMIT: u32 = 20;
    pub const MAX_LIMIT: u32 = 100;

    pub fn new(page: u32, limit: u32) -> Self {
        Pagination { page, limit }.normalized()
    }

    /// Page ≥ 1, limit in 1..=100.
    pub fn normalized(self) -> Self {
        Pagination {
            page: self.page.max(1),
            limit: if self.limit == 0 {
                Self::DEFAULT_LIMIT
            } else {
                self.limit.min(Self::MAX_LIMIT)
            },
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Pagination {
            page: 1,
            limit: Self::DEFAULT_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u64,
}

impl PageInfo {
    pub fn new(pagination: Pagination, total: u64) -> Self {
        let limit = u64::from(pagination.limit.max(1));
        PageInfo {
            page: pagination.page,
            limit: pagination.limit,
            total,
            total_pages: total.div_ceil(limit),
        }
    }
}

/// A page of results plus pagination info.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: PageInfo,
}

// =============================================================================
// Test Fixtures
// =============================================================================

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;

    pub fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 0).unwrap()
    }

    pub fn usd() -> Currency {
        Currency::new("USD").unwrap()
    }

    pub fn quote() -> Quote {
        Quote {
            id: "quote-1".to_string(),
            organization_id: "acme".to_string(),
            quote_number: "Q-2025-0001".to_string(),
            customer_id: "customer-1".to_string(),
            project_id: None,
            title: "Office fit-out".to_string(),
            description: None,
            status: QuoteStatus::Draft,
            quote_type: QuoteType::Standard,
            valid_from: None,
            valid_until: None,
            currency: usd(),
            exchange_rate: Decimal::ONE,
            subtotal: Money::zero(),
            discount_amount: Money::zero(),
            tax_amount: Money::zero(),
            total_amount: Money::zero(),
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

    pub fn line(line_number: u32, quantity: Decimal, unit_price: Decimal, bps: u32) -> QuoteLineItem {
        QuoteLineItem {
            id: format!("line-{}", line_number),
            quote_id: "quote-1".to_string(),
            line_number,
            line_type: LineItemType::Service,
            description: "Consulting".to_string(),
            quantity,
            unit_price: Money::new(unit_price),
            currency: usd(),
            unit_cost: None,
            unit: "hour".to_string(),
            tax_inclusive: false,
            tax_rate: TaxRate::from_bps(bps),
            discount: None,
            pricing_source: PricingSource::RateCard,
            service_category_id: Some("consulting".to_string()),
            rate_card_id: Some("card-1".to_string()),
            rate_card_item_id: None,
            item_code: None,
            subtotal: Money::zero(),
            discount_amount: Money::zero(),
            tax_amount: Money::zero(),
            total_amount: Money::zero(),
            metadata: Metadata::new(),
            created_at: now(),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    #[test]
    fn test_tax_rate_from_bps() {
        let rate = TaxRate::from_bps(825);
        assert_eq!(rate.fraction(), dec!(0.0825));
    }

    #[test]
    fn test_tax_rate_from_fraction_bounds() {
        assert!(TaxRate::from_fraction(dec!(0.15)).is_ok());
        assert!(TaxRate::from_fraction(dec!(1)).is_ok());
        assert!(TaxRate::from_fraction(dec!(1.01)).is_err());
        assert!(TaxRate::from_fraction(dec!(-0.01)).is_err());
    }

    #[test]
    fn test_rate_card_covers() {
        let card = RateCard {
            id: "card-1".to_string(),
            organization_id: "acme".to_string(),
            name: "2025".to_string(),
            currency: fixtures::usd(),
            effective_from: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            effective_until: Some(NaiveDate::from_ymd_opt(2025, 12, 31).unwrap()),
            is_default: true,
            is_active: true,
            created_at: fixtures::now(),
            updated_at: fixtures::now(),
        };
        assert!(card.covers(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()));
        assert!(card.covers(NaiveDate::from_ymd_opt(2025, 12, 31).unwrap()));
        assert!(!card.covers(NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()));
        assert!(!card.covers(NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()));
    }

    #[test]
    fn test_idempotency_record_expiry() {
        let record = IdempotencyRecord {
            idempotency_key: "key".to_string(),
            organization_id: "acme".to_string(),
            user_id: "user-1".to_string(),
            route: "POST /quotes".to_string(),
            method: "POST".to_string(),
            request_hash: "abc".to_string(),
            response_status: 201,
            response_body: "{}".to_string(),
            created_at: fixtures::now(),
            expires_at: fixtures::now() + Duration::hours(24),
        };
        assert!(!record.is_expired(fixtures::now()));
        assert!(record.is_expired(fixtures::now() + Duration::hours(24)));
    }

    #[test]
    fn test_pagination_normalized() {
        assert_eq!(Pagination::new(0, 0), Pagination { page: 1, limit: 20 });
        assert_eq!(Pagination::new(3, 500).limit, 100);
        assert_eq!(Pagination::new(3, 10).offset(), 20);
    }

    #[test]
    fn test_page_info_total_pages() {
        assert_eq!(PageInfo::new(Pagination::new(1, 20), 0).total_pages, 0);
        assert_eq!(PageInfo::new(Pagination::new(1, 20), 41).total_pages, 3);
    }

    #[test]
    fn test_quote_serde_round_trip_keeps_amount_scale() {
        let mut quote = fixtures::quote();
        quote.subtotal = Money::new(dec!(1000.00));
        let json = serde_json::to_string(&quote).unwrap();
        let back: Quote = serde_json::from_str(&json).unwrap();
        assert_eq!(serde_json::to_string(&back).unwrap(), json);
    }
}
