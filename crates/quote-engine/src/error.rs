//! # Engine Error Type
//!
//! Unified error type for engine operations.
//!
//! ## Error Handling Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Flow in the Quotation Engine                   │
//! │                                                                         │
//! │  ValidationErrors ──► CoreError::Validation ─┐                          │
//! │  CoreError (business rule) ──────────────────┤                          │
//! │  DbError (store) ────────────────────────────┼──► EngineError           │
//! │  serde_json::Error ──────────────────────────┘        │                 │
//! │                                                       ▼                 │
//! │                                    code()  ──► ErrorCode (stable)       │
//! │                                    body()  ──► ErrorBody (serialisable) │
//! │                                    is_retryable()                       │
//! │                                                                         │
//! │  Cache failures never get here: they are logged and skipped.           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use quote_core::error::FieldError;
use quote_core::pricing::PricingLineError;
use quote_core::CoreError;
use quote_db::DbError;
use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;

/// Engine operation errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Validation or business-rule failure.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Store failure.
    #[error(transparent)]
    Database(#[from] DbError),

    /// Stored JSON (idempotent response, cache value) could not be read or written.
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<quote_core::ValidationErrors> for EngineError {
    fn from(err: quote_core::ValidationErrors) -> Self {
        EngineError::Core(CoreError::Validation(err))
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Error codes for engine responses.
///
/// ## Usage in a Transport
/// ```text
/// QUOTE_NOT_FOUND            → 404
/// VALIDATION_ERROR           → 400
/// INVALID_STATUS_TRANSITION  → 409
/// QUOTE_LOCKED               → 423
/// PRICING_FAILED             → 422
/// CONFLICT                   → 409, safe to retry
/// DATABASE_ERROR             → 500
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    QuoteNotFound,
    InvalidStatusTransition,
    QuoteLocked,
    QuoteNotDeletable,
    VersionNotFound,
    RateCardNotFound,
    RateCardItemNotFound,
    PricingFailed,
    ValidationError,
    /// A concurrent writer won; running the operation again may succeed.
    Conflict,
    NotFound,
    DatabaseError,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::QuoteNotFound => "QUOTE_NOT_FOUND",
            ErrorCode::InvalidStatusTransition => "INVALID_STATUS_TRANSITION",
            ErrorCode::QuoteLocked => "QUOTE_LOCKED",
            ErrorCode::QuoteNotDeletable => "QUOTE_NOT_DELETABLE",
            ErrorCode::VersionNotFound => "VERSION_NOT_FOUND",
            ErrorCode::RateCardNotFound => "RATE_CARD_NOT_FOUND",
            ErrorCode::RateCardItemNotFound => "RATE_CARD_ITEM_NOT_FOUND",
            ErrorCode::PricingFailed => "PRICING_FAILED",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a transport renders when an operation fails.
///
/// ```json
/// {
///   "code": "PRICING_FAILED",
///   "message": "Pricing failed for 1 line(s)",
///   "retryable": false,
///   "pricing_errors": [
///     { "line_number": 2, "description": "Rigging", "reason": "No rate card item matched (tried description)" }
///   ]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub field_errors: Vec<FieldError>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pricing_errors: Vec<PricingLineError>,
}

impl EngineError {
    pub fn internal(message: impl Into<String>) -> Self {
        EngineError::Internal(message.into())
    }

    /// Machine-readable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::Core(err) => match err {
                CoreError::QuoteNotFound(_) => ErrorCode::QuoteNotFound,
                CoreError::InvalidStatusTransition { .. } => ErrorCode::InvalidStatusTransition,
                CoreError::QuoteLocked { .. } => ErrorCode::QuoteLocked,
                CoreError::QuoteNotDeletable { .. } => ErrorCode::QuoteNotDeletable,
                CoreError::VersionNotFound { .. } => ErrorCode::VersionNotFound,
                CoreError::RateCardNotFound(_) => ErrorCode::RateCardNotFound,
                CoreError::RateCardItemNotFound(_) => ErrorCode::RateCardItemNotFound,
                CoreError::Pricing(_) => ErrorCode::PricingFailed,
                CoreError::Validation(_) => ErrorCode::ValidationError,
            },
            EngineError::Database(err) => match err {
                DbError::UniqueViolation { .. } | DbError::Busy(_) | DbError::Conflict { .. } => {
                    ErrorCode::Conflict
                }
                DbError::NotFound { .. } => ErrorCode::NotFound,
                _ => ErrorCode::DatabaseError,
            },
            EngineError::Serialization(_) | EngineError::Config(_) | EngineError::Internal(_) => {
                ErrorCode::Internal
            }
        }
    }

    /// Business errors are final; only lost store races may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Database(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Serialisable view of this error.
    ///
    /// Store failure details are logged, not returned.
    pub fn body(&self) -> ErrorBody {
        let message = match self {
            EngineError::Database(err) if self.code() == ErrorCode::DatabaseError => {
                tracing::error!(error = %err, "Database operation failed");
                "Database operation failed".to_string()
            }
            other => other.to_string(),
        };

        let field_errors = match self {
            EngineError::Core(CoreError::Validation(errors)) => errors.field_errors(),
            _ => Vec::new(),
        };
        let pricing_errors = match self {
            EngineError::Core(CoreError::Pricing(errors)) => errors.clone(),
            _ => Vec::new(),
        };

        ErrorBody {
            code: self.code(),
            message,
            retryable: self.is_retryable(),
            field_errors,
            pricing_errors,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use quote_core::{QuoteStatus, ValidationError};

    #[test]
    fn test_codes_serialize_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::InvalidStatusTransition).unwrap();
        assert_eq!(json, "\"INVALID_STATUS_TRANSITION\"");
        assert_eq!(ErrorCode::QuoteLocked.to_string(), "QUOTE_LOCKED");
    }

    #[test]
    fn test_business_errors_map_to_codes() {
        let err: EngineError = CoreError::QuoteNotFound("q-1".to_string()).into();
        assert_eq!(err.code(), ErrorCode::QuoteNotFound);
        assert!(!err.is_retryable());

        let err: EngineError = CoreError::InvalidStatusTransition {
            from: QuoteStatus::Draft,
            to: QuoteStatus::Accepted,
        }
        .into();
        assert_eq!(err.code(), ErrorCode::InvalidStatusTransition);
    }

    #[test]
    fn test_store_races_are_retryable() {
        let err: EngineError = DbError::conflict("quote", "q-1").into();
        assert_eq!(err.code(), ErrorCode::Conflict);
        assert!(err.is_retryable());

        let err: EngineError = DbError::QueryFailed("disk I/O error".to_string()).into();
        assert_eq!(err.code(), ErrorCode::DatabaseError);
        assert!(!err.is_retryable());
        assert_eq!(err.body().message, "Database operation failed");
    }

    #[test]
    fn test_body_carries_field_and_pricing_errors() {
        let err: EngineError = quote_core::ValidationErrors::from(ValidationError::Required {
            field: "title".to_string(),
        })
        .into();
        let body = err.body();
        assert_eq!(body.code, ErrorCode::ValidationError);
        assert_eq!(body.field_errors.len(), 1);
        assert_eq!(body.field_errors[0].field, "title");

        let err: EngineError = CoreError::Pricing(vec![PricingLineError {
            line_number: 2,
            description: "Rigging".to_string(),
            reason: "No rate card item matched".to_string(),
        }])
        .into();
        let body = err.body();
        assert_eq!(body.code, ErrorCode::PricingFailed);
        assert_eq!(body.pricing_errors[0].line_number, 2);

        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("field_errors").is_none());
    }
}
