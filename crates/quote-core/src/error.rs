//! # Error Types
//!
//! Domain-specific error types for quote-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  quote-core errors (this file)                                         │
//! │  ├── CoreError         - Business-rule violations                      │
//! │  ├── ValidationErrors  - Every field problem found in one input        │
//! │  └── ValidationError   - One field problem                             │
//! │                                                                         │
//! │  quote-db errors (separate crate)                                      │
//! │  └── DbError           - Database operation failures                   │
//! │                                                                         │
//! │  quote-engine errors                                                   │
//! │  └── EngineError       - What callers see, with a machine-readable code│
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → EngineError             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::pricing::PricingLineError;
use crate::status::QuoteStatus;

// =============================================================================
// Core Error
// =============================================================================

/// Business-rule errors.
///
/// Each variant maps to a distinct machine-readable code in the engine
/// layer. None of them is retried automatically.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Quote does not exist in the caller's organization (or is deleted).
    #[error("Quote not found: {0}")]
    QuoteNotFound(String),

    /// The status table does not allow `from -> to`.
    ///
    /// ## When This Occurs
    /// ```text
    /// draft ──► accepted     ✗  (must go through pending/approved/sent)
    /// approved ──► pending   ✗  (no way back)
    /// accepted ──► *         ✗  (terminal)
    /// ```
    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition { from: QuoteStatus, to: QuoteStatus },

    /// Quote is beyond draft/pending and the caller cannot force-edit it.
    #[error("Quote {quote_id} is locked: {reason}")]
    QuoteLocked { quote_id: String, reason: String },

    /// Only draft and pending quotes can be deleted.
    #[error("Quote {quote_id} cannot be deleted in status {status}")]
    QuoteNotDeletable { quote_id: String, status: QuoteStatus },

    /// Requested version snapshot does not exist.
    #[error("Version {version_number} of quote {quote_id} not found")]
    VersionNotFound { quote_id: String, version_number: i64 },

    /// Rate card does not exist in the caller's organization.
    #[error("Rate card not found: {0}")]
    RateCardNotFound(String),

    /// Rate-card item does not exist in the caller's organization.
    #[error("Rate card item not found: {0}")]
    RateCardItemNotFound(String),

    /// One or more lines could not be priced.
    #[error("Pricing failed for {} line(s)", .0.len())]
    Pricing(Vec<PricingLineError>),

    /// Input validation failed.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationErrors),
}

impl From<ValidationError> for CoreError {
    fn from(err: ValidationError) -> Self {
        CoreError::Validation(ValidationErrors::from(err))
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// One variant per kind of problem, always naming the offending field so the
/// transport layer can render a field/reason list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Value must be strictly positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange {
        field: String,
        min: String,
        max: String,
    },

    /// Invalid format (e.g., invalid currency code, malformed quote number).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },

    /// A date range ends before it starts.
    #[error("{field} must not be before {other}")]
    InvalidDateRange { field: String, other: String },

    /// Metadata key names a business-significant attribute.
    #[error("{field} cannot carry business value '{key}'")]
    ReservedMetadataKey { field: String, key: String },

    /// An amount computed from valid inputs does not fit a decimal.
    #[error("{field} is too large to calculate")]
    Overflow { field: String },
}

impl ValidationError {
    /// Name of the field the error refers to.
    pub fn field(&self) -> &str {
        match self {
            ValidationError::Required { field }
            | ValidationError::TooLong { field, .. }
            | ValidationError::MustBePositive { field }
            | ValidationError::MustNotBeNegative { field }
            | ValidationError::OutOfRange { field, .. }
            | ValidationError::InvalidFormat { field, .. }
            | ValidationError::NotAllowed { field, .. }
            | ValidationError::InvalidDateRange { field, .. }
            | ValidationError::ReservedMetadataKey { field, .. }
            | ValidationError::Overflow { field } => field,
        }
    }

    /// Returns a copy of this error with the field name prefixed,
    /// e.g. `quantity` → `line_items[2].quantity`.
    pub fn nested(mut self, prefix: &str) -> Self {
        let field = match &mut self {
            ValidationError::Required { field }
            | ValidationError::TooLong { field, .. }
            | ValidationError::MustBePositive { field }
            | ValidationError::MustNotBeNegative { field }
            | ValidationError::OutOfRange { field, .. }
            | ValidationError::InvalidFormat { field, .. }
            | ValidationError::NotAllowed { field, .. }
            | ValidationError::InvalidDateRange { field, .. }
            | ValidationError::ReservedMetadataKey { field, .. }
            | ValidationError::Overflow { field } => field,
        };
        *field = format!("{}.{}", prefix, field);
        self
    }
}

/// One field/reason pair, the shape validation failures are reported in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub reason: String,
}

/// Every validation failure found in one input.
///
/// Validators collect into this instead of stopping at the first problem, so
/// the caller can fix an input in a single round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: Vec<ValidationError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        ValidationErrors { errors: Vec::new() }
    }

    pub fn push(&mut self, err: ValidationError) {
        self.errors.push(err);
    }

    /// Records the error of a single-field check, if any.
    pub fn check(&mut self, result: Result<(), ValidationError>) {
        if let Err(err) = result {
            self.errors.push(err);
        }
    }

    pub fn extend(&mut self, other: ValidationErrors) {
        self.errors.extend(other.errors);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    /// Field/reason pairs for the transport layer.
    pub fn field_errors(&self) -> Vec<FieldError> {
        self.errors
            .iter()
            .map(|e| FieldError {
                field: e.field().to_string(),
                reason: e.to_string(),
            })
            .collect()
    }

    /// `Ok(())` when nothing was collected.
    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        f.write_str(&joined)
    }
}

impl std::error::Error for ValidationErrors {}

impl From<ValidationError> for ValidationErrors {
    fn from(err: ValidationError) -> Self {
        ValidationErrors { errors: vec![err] }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InvalidStatusTransition {
            from: QuoteStatus::Draft,
            to: QuoteStatus::Accepted,
        };
        assert_eq!(
            err.to_string(),
            "Invalid status transition from draft to accepted"
        );
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::Required {
            field: "title".to_string(),
        };
        assert_eq!(err.to_string(), "title is required");
        assert_eq!(err.field(), "title");
    }

    #[test]
    fn test_nested_field_names() {
        let err = ValidationError::MustBePositive {
            field: "quantity".to_string(),
        }
        .nested("line_items[2]");
        assert_eq!(err.field(), "line_items[2].quantity");
    }

    #[test]
    fn test_validation_errors_collect() {
        let mut errors = ValidationErrors::new();
        errors.check(Ok(()));
        errors.check(Err(ValidationError::Required {
            field: "title".to_string(),
        }));
        errors.push(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });

        assert_eq!(errors.len(), 2);
        let pairs = errors.field_errors();
        assert_eq!(pairs[0].field, "title");
        assert_eq!(pairs[1].reason, "quantity must be positive");
        assert!(errors.into_result().is_err());
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "customer_id".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
