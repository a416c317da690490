//! # Validation Module
//!
//! Field validators for quote and rate-card inputs.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Deserialization                                              │
//! │  ├── Type checks (Decimal, dates, enums)                               │
//! │  └── Currency / Metadata guards (try_from)                             │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Input validate() (crate::input)                              │
//! │  └── THIS MODULE: business rule validation, all errors collected       │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── NOT NULL / CHECK constraints                                      │
//! │  └── UNIQUE (organization_id, quote_number)                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use quote_core::validation::{validate_item_code, validate_quantity};
//! use rust_decimal::Decimal;
//!
//! validate_item_code("CAB-6").unwrap();
//! validate_quantity(Decimal::new(75, 1)).unwrap();
//! ```

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::error::ValidationError;
use crate::types::{Discount, DiscountType};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_TEXT_LEN: usize = 5000;
pub const MAX_ID_LEN: usize = 64;
pub const MAX_UNIT_LEN: usize = 20;

/// Largest quantity a single line may carry.
pub const MAX_QUANTITY: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

/// Largest price, cost, rate or discount value accepted (10^12).
///
/// With [`MAX_QUANTITY`] and [`crate::MAX_LINE_ITEMS`] this keeps every
/// quote total far inside `Decimal`'s range.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(3_567_587_328, 232, 0, false, 0);

// =============================================================================
// String Validators
// =============================================================================

/// Non-empty after trimming and at most `max` characters.
pub fn validate_required_text(field: &str, value: &str, max: usize) -> ValidationResult<()> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.chars().count() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }

    Ok(())
}

/// At most `max` characters when present.
pub fn validate_optional_text(field: &str, value: Option<&str>, max: usize) -> ValidationResult<()> {
    match value {
        Some(value) if value.chars().count() > max => Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        }),
        _ => Ok(()),
    }
}

/// Validates a reference id (customer, project, category, role, ...).
///
/// ## Rules
/// - Must not be empty
/// - At most 64 characters
/// - No whitespace
pub fn validate_id(field: &str, id: &str) -> ValidationResult<()> {
    validate_required_text(field, id, MAX_ID_LEN)?;

    if id.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "must not contain whitespace".to_string(),
        });
    }

    Ok(())
}

/// Validates a rate-card item code (SKU).
///
/// ## Rules
/// - Must not be empty
/// - Must be between 1 and 50 characters
/// - Only alphanumeric characters, hyphens, underscores
///
/// ## Example
/// ```rust
/// use quote_core::validation::validate_item_code;
///
/// assert!(validate_item_code("CAB-6").is_ok());
/// assert!(validate_item_code("").is_err());
/// assert!(validate_item_code("has space").is_err());
/// ```
pub fn validate_item_code(code: &str) -> ValidationResult<()> {
    let code = code.trim();

    if code.is_empty() {
        return Err(ValidationError::Required {
            field: "item_code".to_string(),
        });
    }

    if code.len() > 50 {
        return Err(ValidationError::TooLong {
            field: "item_code".to_string(),
            max: 50,
        });
    }

    if !code
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "item_code".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(())
}

/// Validates a search query. Returns the trimmed query.
pub fn validate_search_query(query: &str) -> ValidationResult<String> {
    let query = query.trim();

    if query.len() > 100 {
        return Err(ValidationError::TooLong {
            field: "search".to_string(),
            max: 100,
        });
    }

    Ok(query.to_string())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a line quantity.
///
/// ## Rules
/// - Must be positive (> 0); fractions are fine (7.5 hours)
/// - Must not exceed [`MAX_QUANTITY`]
pub fn validate_quantity(quantity: Decimal) -> ValidationResult<()> {
    if quantity <= Decimal::ZERO {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if quantity > MAX_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: "0".to_string(),
            max: MAX_QUANTITY.to_string(),
        });
    }

    Ok(())
}

/// Validates a price or cost. Zero is allowed (free items).
///
/// ## Rules
/// - Must not be negative
/// - Must not exceed [`MAX_AMOUNT`]
pub fn validate_amount(field: &str, amount: Decimal) -> ValidationResult<()> {
    if amount < Decimal::ZERO {
        return Err(ValidationError::MustNotBeNegative {
            field: field.to_string(),
        });
    }

    if amount > MAX_AMOUNT {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: "0".to_string(),
            max: MAX_AMOUNT.to_string(),
        });
    }

    Ok(())
}

/// Validates a tax rate fraction: 0 to 1 inclusive.
pub fn validate_tax_rate(rate: Decimal) -> ValidationResult<()> {
    if rate < Decimal::ZERO || rate > Decimal::ONE {
        return Err(ValidationError::OutOfRange {
            field: "tax_rate".to_string(),
            min: "0".to_string(),
            max: "1".to_string(),
        });
    }

    Ok(())
}

/// Validates an exchange rate: strictly positive.
pub fn validate_exchange_rate(rate: Decimal) -> ValidationResult<()> {
    if rate <= Decimal::ZERO {
        return Err(ValidationError::MustBePositive {
            field: "exchange_rate".to_string(),
        });
    }

    Ok(())
}

/// Validates a discount.
///
/// ## Rules
/// - Value must not be negative
/// - Percentages are at most 100, other values at most [`MAX_AMOUNT`]
/// - Per-unit discounts only where a quantity exists (`allow_per_unit`)
pub fn validate_discount(
    field: &str,
    discount: &Discount,
    allow_per_unit: bool,
) -> ValidationResult<()> {
    if discount.value < Decimal::ZERO {
        return Err(ValidationError::MustNotBeNegative {
            field: format!("{}.value", field),
        });
    }

    match discount.discount_type {
        DiscountType::Percentage if discount.value > Decimal::ONE_HUNDRED => {
            Err(ValidationError::OutOfRange {
                field: format!("{}.value", field),
                min: "0".to_string(),
                max: "100".to_string(),
            })
        }
        DiscountType::FixedAmount | DiscountType::PerUnit if discount.value > MAX_AMOUNT => {
            Err(ValidationError::OutOfRange {
                field: format!("{}.value", field),
                min: "0".to_string(),
                max: MAX_AMOUNT.to_string(),
            })
        }
        DiscountType::PerUnit if !allow_per_unit => Err(ValidationError::NotAllowed {
            field: format!("{}.discount_type", field),
            allowed: vec!["percentage".to_string(), "fixed_amount".to_string()],
        }),
        _ => Ok(()),
    }
}

// =============================================================================
// Date Validators
// =============================================================================

/// `until` must not be before `from` when both are set.
pub fn validate_date_range(
    from_field: &str,
    from: Option<NaiveDate>,
    until_field: &str,
    until: Option<NaiveDate>,
) -> ValidationResult<()> {
    match (from, until) {
        (Some(from), Some(until)) if until < from => Err(ValidationError::InvalidDateRange {
            field: until_field.to_string(),
            other: from_field.to_string(),
        }),
        _ => Ok(()),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
