//! # Mutation Inputs
//!
//! Request payloads for quote and rate-card mutations, with their
//! validation and conversion into domain types.
//!
//! ```text
//! CreateQuoteInput ──validate()──► into_quote() ──► Quote (no lines, zero totals)
//!        │
//!        └── line_items[i] ──to_pricing_request()──► PricingRequest
//!                         ──into_line_item(resolved)─► QuoteLineItem
//! ```
//!
//! Every `validate()` collects all problems; line errors are reported as
//! `line_items[<index>].<field>`.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{ValidationError, ValidationErrors};
use crate::metadata::Metadata;
use crate::money::{Currency, Money};
use crate::pricing::{PricingRequest, ResolvedPrice};
use crate::status::QuoteStatus;
use crate::types::{
    Discount, LineItemType, Quote, QuoteLineItem, QuoteType, RateCard, RateCardItem, TaxClass,
    TaxRate,
};
use crate::validation::{
    validate_amount, validate_date_range, validate_discount, validate_exchange_rate, validate_id,
    validate_item_code, validate_optional_text, validate_quantity, validate_required_text,
    validate_tax_rate, MAX_TEXT_LEN, MAX_TITLE_LEN, MAX_UNIT_LEN,
};
use crate::MAX_LINE_ITEMS;

fn default_true() -> bool {
    true
}

fn check_optional_id(errors: &mut ValidationErrors, field: &str, id: Option<&str>) {
    if let Some(id) = id {
        errors.check(validate_id(field, id));
    }
}

// =============================================================================
// Line Items
// =============================================================================

/// One requested line. Prices are resolved by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItemInput {
    #[serde(default)]
    pub line_type: LineItemType,
    pub description: String,
    pub quantity: Decimal,
    /// Honoured only with override permission.
    pub unit_price: Option<Decimal>,
    pub unit_cost: Option<Decimal>,
    pub unit: Option<String>,
    pub tax_rate: Option<Decimal>,
    #[serde(default)]
    pub tax_inclusive: bool,
    pub discount: Option<Discount>,
    pub service_category_id: Option<String>,
    pub role_id: Option<String>,
    pub item_code: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl LineItemInput {
    pub fn validate(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::new();

        errors.check(validate_required_text("description", &self.description, MAX_TEXT_LEN));
        errors.check(validate_quantity(self.quantity));
        if let Some(price) = self.unit_price {
            errors.check(validate_amount("unit_price", price));
        }
        if let Some(cost) = self.unit_cost {
            errors.check(validate_amount("unit_cost", cost));
        }
        if let Some(unit) = &self.unit {
            errors.check(validate_required_text("unit", unit, MAX_UNIT_LEN));
        }
        if let Some(rate) = self.tax_rate {
            errors.check(validate_tax_rate(rate));
        }
        if let Some(discount) = &self.discount {
            errors.check(validate_discount("discount", discount, true));
        }
        check_optional_id(&mut errors, "service_category_id", self.service_category_id.as_deref());
        check_optional_id(&mut errors, "role_id", self.role_id.as_deref());
        if let Some(code) = &self.item_code {
            errors.check(validate_item_code(code));
        }

        errors
    }

    pub fn to_pricing_request(&self, line_number: u32) -> PricingRequest {
        PricingRequest {
            line_number,
            description: self.description.trim().to_string(),
            quantity: self.quantity,
            unit_price: self.unit_price.map(Money::new),
            tax_rate: self.tax_rate.and_then(|r| TaxRate::from_fraction(r).ok()),
            unit: self.unit.as_ref().map(|u| u.trim().to_string()),
            item_code: self.item_code.as_ref().map(|c| c.trim().to_string()),
            service_category_id: self.service_category_id.clone(),
            role_id: self.role_id.clone(),
        }
    }

    /// Builds the stored line from this input and its resolved price.
    /// Amounts are left at zero for the calculator.
    pub fn into_line_item(
        self,
        id: String,
        quote_id: &str,
        line_number: u32,
        resolved: ResolvedPrice,
        currency: &Currency,
        now: DateTime<Utc>,
    ) -> QuoteLineItem {
        let zero = Money::zero().round(currency);
        QuoteLineItem {
            id,
            quote_id: quote_id.to_string(),
            line_number,
            line_type: self.line_type,
            description: self.description.trim().to_string(),
            quantity: self.quantity,
            unit_price: resolved.unit_price.round(currency),
            currency: currency.clone(),
            unit_cost: self.unit_cost.map(|c| Money::new(c).round(currency)),
            unit: resolved.unit,
            tax_inclusive: self.tax_inclusive,
            tax_rate: resolved.tax_rate,
            discount: self.discount,
            pricing_source: resolved.source,
            service_category_id: resolved.service_category_id.or(self.service_category_id),
            rate_card_id: resolved.rate_card_id,
            rate_card_item_id: resolved.rate_card_item_id,
            item_code: resolved.item_code.or(self.item_code),
            subtotal: zero,
            discount_amount: zero,
            tax_amount: zero,
            total_amount: zero,
            metadata: self.metadata,
            created_at: now,
        }
    }
}

fn validate_lines(errors: &mut ValidationErrors, lines: &[LineItemInput]) {
    if lines.len() > MAX_LINE_ITEMS {
        errors.push(ValidationError::OutOfRange {
            field: "line_items".to_string(),
            min: "0".to_string(),
            max: MAX_LINE_ITEMS.to_string(),
        });
    }
    for (index, line) in lines.iter().enumerate() {
        let prefix = format!("line_items[{}]", index);
        for err in line.validate().errors() {
            errors.push(err.clone().nested(&prefix));
        }
    }
}

// =============================================================================
// Create Quote
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateQuoteInput {
    pub customer_id: String,
    pub project_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub quote_type: QuoteType,
    pub valid_from: Option<NaiveDate>,
    pub valid_until: Option<NaiveDate>,
    pub currency: Currency,
    pub exchange_rate: Option<Decimal>,
    pub discount: Option<Discount>,
    pub notes: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub line_items: Vec<LineItemInput>,
}

impl CreateQuoteInput {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        errors.check(validate_id("customer_id", &self.customer_id));
        check_optional_id(&mut errors, "project_id", self.project_id.as_deref());
        errors.check(validate_required_text("title", &self.title, MAX_TITLE_LEN));
        errors.check(validate_optional_text("description", self.description.as_deref(), MAX_TEXT_LEN));
        errors.check(validate_optional_text("notes", self.notes.as_deref(), MAX_TEXT_LEN));
        errors.check(validate_date_range(
            "valid_from",
            self.valid_from,
            "valid_until",
            self.valid_until,
        ));
        if let Some(rate) = self.exchange_rate {
            errors.check(validate_exchange_rate(rate));
        }
        if let Some(discount) = &self.discount {
            errors.check(validate_discount("discount", discount, false));
        }
        validate_lines(&mut errors, &self.line_items);

        errors.into_result()
    }

    /// New draft quote with zero totals and no lines.
    pub fn into_quote(
        self,
        id: String,
        organization_id: &str,
        quote_number: String,
        created_by: &str,
        now: DateTime<Utc>,
    ) -> Quote {
        let zero = Money::zero().round(&self.currency);
        Quote {
            id,
            organization_id: organization_id.to_string(),
            quote_number,
            customer_id: self.customer_id,
            project_id: self.project_id,
            title: self.title.trim().to_string(),
            description: self.description,
            status: QuoteStatus::Draft,
            quote_type: self.quote_type,
            valid_from: self.valid_from,
            valid_until: self.valid_until,
            currency: self.currency,
            exchange_rate: self.exchange_rate.unwrap_or(Decimal::ONE),
            subtotal: zero,
            discount_amount: zero,
            tax_amount: zero,
            total_amount: zero,
            discount: self.discount,
            notes: self.notes,
            approved_by: None,
            approved_at: None,
            sent_at: None,
            accepted_at: None,
            metadata: self.metadata,
            created_by: created_by.to_string(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
            line_items: Vec::new(),
        }
    }
}

// =============================================================================
// Update Quote
// =============================================================================

/// Partial update. `None` leaves a field unchanged; `line_items: Some(..)`
/// replaces every line. Currency is fixed at creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateQuoteInput {
    pub customer_id: Option<String>,
    pub project_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub quote_type: Option<QuoteType>,
    pub valid_from: Option<NaiveDate>,
    pub valid_until: Option<NaiveDate>,
    pub exchange_rate: Option<Decimal>,
    pub discount: Option<Discount>,
    /// Removes the quote-level discount; wins over `discount`.
    #[serde(default)]
    pub clear_discount: bool,
    pub notes: Option<String>,
    pub metadata: Option<Metadata>,
    pub line_items: Option<Vec<LineItemInput>>,
    /// Stored on the version snapshot when the edit is a locked one.
    pub version_reason: Option<String>,
}

impl UpdateQuoteInput {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        check_optional_id(&mut errors, "customer_id", self.customer_id.as_deref());
        check_optional_id(&mut errors, "project_id", self.project_id.as_deref());
        if let Some(title) = &self.title {
            errors.check(validate_required_text("title", title, MAX_TITLE_LEN));
        }
        errors.check(validate_optional_text("description", self.description.as_deref(), MAX_TEXT_LEN));
        errors.check(validate_optional_text("notes", self.notes.as_deref(), MAX_TEXT_LEN));
        errors.check(validate_optional_text(
            "version_reason",
            self.version_reason.as_deref(),
            MAX_TEXT_LEN,
        ));
        errors.check(validate_date_range(
            "valid_from",
            self.valid_from,
            "valid_until",
            self.valid_until,
        ));
        if let Some(rate) = self.exchange_rate {
            errors.check(validate_exchange_rate(rate));
        }
        if let Some(discount) = &self.discount {
            errors.check(validate_discount("discount", discount, false));
        }
        if let Some(lines) = &self.line_items {
            validate_lines(&mut errors, lines);
        }

        errors.into_result()
    }

    /// Applies header fields to `quote` and re-checks the merged validity
    /// window. Lines are handled by the engine.
    pub fn apply_to(&self, quote: &mut Quote) -> Result<(), ValidationErrors> {
        if let Some(customer_id) = &self.customer_id {
            quote.customer_id = customer_id.clone();
        }
        if let Some(project_id) = &self.project_id {
            quote.project_id = Some(project_id.clone());
        }
        if let Some(title) = &self.title {
            quote.title = title.trim().to_string();
        }
        if let Some(description) = &self.description {
            quote.description = Some(description.clone());
        }
        if let Some(quote_type) = self.quote_type {
            quote.quote_type = quote_type;
        }
        if let Some(valid_from) = self.valid_from {
            quote.valid_from = Some(valid_from);
        }
        if let Some(valid_until) = self.valid_until {
            quote.valid_until = Some(valid_until);
        }
        if let Some(rate) = self.exchange_rate {
            quote.exchange_rate = rate;
        }
        if self.clear_discount {
            quote.discount = None;
        } else if let Some(discount) = self.discount {
            quote.discount = Some(discount);
        }
        if let Some(notes) = &self.notes {
            quote.notes = Some(notes.clone());
        }
        if let Some(metadata) = &self.metadata {
            quote.metadata = metadata.clone();
        }

        validate_date_range("valid_from", quote.valid_from, "valid_until", quote.valid_until)
            .map_err(ValidationErrors::from)
    }
}

// =============================================================================
// Status Transition
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub status: QuoteStatus,
    pub notes: Option<String>,
}

impl TransitionRequest {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        validate_optional_text("notes", self.notes.as_deref(), MAX_TEXT_LEN)
            .map_err(ValidationErrors::from)
    }
}

// =============================================================================
// Rate Cards
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRateCardInput {
    pub name: String,
    pub currency: Currency,
    pub effective_from: NaiveDate,
    pub effective_until: Option<NaiveDate>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl CreateRateCardInput {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.check(validate_required_text("name", &self.name, MAX_TITLE_LEN));
        errors.check(validate_date_range(
            "effective_from",
            Some(self.effective_from),
            "effective_until",
            self.effective_until,
        ));
        errors.into_result()
    }

    pub fn into_rate_card(self, id: String, organization_id: &str, now: DateTime<Utc>) -> RateCard {
        RateCard {
            id,
            organization_id: organization_id.to_string(),
            name: self.name.trim().to_string(),
            currency: self.currency,
            effective_from: self.effective_from,
            effective_until: self.effective_until,
            is_default: self.is_default,
            is_active: self.is_active,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateRateCardInput {
    pub name: Option<String>,
    pub effective_from: Option<NaiveDate>,
    pub effective_until: Option<NaiveDate>,
    pub is_default: Option<bool>,
    pub is_active: Option<bool>,
}

impl UpdateRateCardInput {
    pub fn apply_to(&self, card: &mut RateCard, now: DateTime<Utc>) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Some(name) = &self.name {
            errors.check(validate_required_text("name", name, MAX_TITLE_LEN));
            card.name = name.trim().to_string();
        }
        if let Some(from) = self.effective_from {
            card.effective_from = from;
        }
        if let Some(until) = self.effective_until {
            card.effective_until = Some(until);
        }
        if let Some(is_default) = self.is_default {
            card.is_default = is_default;
        }
        if let Some(is_active) = self.is_active {
            card.is_active = is_active;
        }
        errors.check(validate_date_range(
            "effective_from",
            Some(card.effective_from),
            "effective_until",
            card.effective_until,
        ));
        card.updated_at = now;
        errors.into_result()
    }
}

/// New rate-card item. Its currency is the card's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateCardItemInput {
    pub service_category_id: String,
    pub role_id: Option<String>,
    pub item_code: Option<String>,
    pub name: Option<String>,
    pub base_rate: Decimal,
    #[serde(default)]
    pub tax_class: TaxClass,
    pub unit: Option<String>,
    pub effective_from: Option<NaiveDate>,
    pub effective_until: Option<NaiveDate>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl RateCardItemInput {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.check(validate_id("service_category_id", &self.service_category_id));
        check_optional_id(&mut errors, "role_id", self.role_id.as_deref());
        if let Some(code) = &self.item_code {
            errors.check(validate_item_code(code));
        }
        errors.check(validate_optional_text("name", self.name.as_deref(), MAX_TITLE_LEN));
        errors.check(validate_amount("base_rate", self.base_rate));
        if let Some(unit) = &self.unit {
            errors.check(validate_required_text("unit", unit, MAX_UNIT_LEN));
        }
        errors.check(validate_date_range(
            "effective_from",
            self.effective_from,
            "effective_until",
            self.effective_until,
        ));
        errors.into_result()
    }

    pub fn into_item(
        self,
        id: String,
        card: &RateCard,
        default_unit: &str,
        now: DateTime<Utc>,
    ) -> RateCardItem {
        RateCardItem {
            id,
            rate_card_id: card.id.clone(),
            organization_id: card.organization_id.clone(),
            service_category_id: self.service_category_id,
            role_id: self.role_id,
            item_code: self.item_code.map(|c| c.trim().to_string()),
            name: self.name.map(|n| n.trim().to_string()),
            base_rate: Money::new(self.base_rate).round(&card.currency),
            currency: card.currency.clone(),
            tax_class: self.tax_class,
            unit: self
                .unit
                .map(|u| u.trim().to_string())
                .unwrap_or_else(|| default_unit.to_string()),
            effective_from: self.effective_from,
            effective_until: self.effective_until,
            is_active: self.is_active,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateRateCardItemInput {
    pub service_category_id: Option<String>,
    pub role_id: Option<String>,
    pub item_code: Option<String>,
    pub name: Option<String>,
    pub base_rate: Option<Decimal>,
    pub tax_class: Option<TaxClass>,
    pub unit: Option<String>,
    pub effective_from: Option<NaiveDate>,
    pub effective_until: Option<NaiveDate>,
    pub is_active: Option<bool>,
}

impl UpdateRateCardItemInput {
    pub fn apply_to(
        &self,
        item: &mut RateCardItem,
        now: DateTime<Utc>,
    ) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Some(category) = &self.service_category_id {
            errors.check(validate_id("service_category_id", category));
            item.service_category_id = category.clone();
        }
        if let Some(role) = &self.role_id {
            errors.check(validate_id("role_id", role));
            item.role_id = Some(role.clone());
        }
        if let Some(code) = &self.item_code {
            errors.check(validate_item_code(code));
            item.item_code = Some(code.trim().to_string());
        }
        if let Some(name) = &self.name {
            errors.check(validate_required_text("name", name, MAX_TITLE_LEN));
            item.name = Some(name.trim().to_string());
        }
        if let Some(rate) = self.base_rate {
            errors.check(validate_amount("base_rate", rate));
            item.base_rate = Money::new(rate).round(&item.currency);
        }
        if let Some(class) = self.tax_class {
            item.tax_class = class;
        }
        if let Some(unit) = &self.unit {
            errors.check(validate_required_text("unit", unit, MAX_UNIT_LEN));
            item.unit = unit.trim().to_string();
        }
        if let Some(from) = self.effective_from {
            item.effective_from = Some(from);
        }
        if let Some(until) = self.effective_until {
            item.effective_until = Some(until);
        }
        if let Some(is_active) = self.is_active {
            item.is_active = is_active;
        }
        errors.check(validate_date_range(
            "effective_from",
            item.effective_from,
            "effective_until",
            item.effective_until,
        ));
        item.updated_at = now;
        errors.into_result()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
