//! # quote-core: Pure Business Logic for the Quotation Engine
//!
//! This crate holds every rule of the quote pricing & lifecycle engine that
//! can be expressed without I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Quotation Engine Architecture                       │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              Transport (outside this workspace)                 │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                     quote-engine                                │   │
//! │  │   QuoteService, PricingResolver, Idempotency, Locking           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ quote-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   money   │  │calculator │  │  status   │  │  pricing  │  │   │
//! │  │   │  Money    │  │ LineAmts  │  │ QuoteStat │  │ matching  │  │   │
//! │  │   │ Currency  │  │ Totals    │  │ table     │  │ rules     │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO CACHE • PURE FUNCTIONS             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    quote-db (Database Layer)                    │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`money`] - Decimal money, currencies and currency rounding
//! - [`types`] - Domain types (Quote, QuoteLineItem, RateCard, ...)
//! - [`status`] - Quote status state machine
//! - [`quote_number`] - `{PREFIX}-{YEAR}-{SEQUENCE}` formatting and parsing
//! - [`calculator`] - Line and quote totals
//! - [`pricing`] - Rate-card selection and item matching rules
//! - [`locking`] - Edit-lock policy and permissions
//! - [`metadata`] - Metadata guard (no business values in metadata)
//! - [`input`] - Mutation inputs and their validation
//! - [`validation`] - Field validators
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use quote_core::calculator::calculate_line;
//! use quote_core::money::{Currency, Money};
//! use quote_core::types::TaxRate;
//! use rust_decimal::Decimal;
//!
//! let usd = Currency::new("USD").unwrap();
//! let line = calculate_line(
//!     Decimal::from(10),
//!     Money::new(Decimal::from(100)),
//!     TaxRate::from_bps(1500),
//!     false,
//!     &[],
//!     &usd,
//! )
//! .unwrap();
//!
//! assert_eq!(line.subtotal.to_string(), "1000.00");
//! assert_eq!(line.tax.to_string(), "150.00");
//! assert_eq!(line.total.to_string(), "1150.00");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod calculator;
pub mod error;
pub mod input;
pub mod locking;
pub mod metadata;
pub mod money;
pub mod pricing;
pub mod quote_number;
pub mod status;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError, ValidationErrors};
pub use locking::{LockStatus, Permission, PermissionSet};
pub use metadata::Metadata;
pub use money::{Currency, Money};
pub use quote_number::QuoteNumber;
pub use status::QuoteStatus;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum line items on a single quote.
pub const MAX_LINE_ITEMS: usize = 500;

/// Unit of measure used when neither the caller nor the rate card gives one.
pub const DEFAULT_UNIT: &str = "unit";
