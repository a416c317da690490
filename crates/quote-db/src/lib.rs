//! # quote-db: Database Layer for the Quotation Engine
//!
//! This crate provides database access for quotes, rate cards, versions,
//! idempotency records and the audit outbox. It uses SQLite through sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Quotation Engine Data Flow                         │
//! │                                                                         │
//! │  QuoteService::create_quote                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     quote-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  UnitOfWork   │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │───►│  / Session    │    │  (embedded)  │  │   │
//! │  │   │               │    │      │        │    │              │  │   │
//! │  │   │ SqlitePool    │    │      ▼        │    │ 001_initial  │  │   │
//! │  │   │               │    │ Repositories  │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`unit_of_work`] - Transactions and plain sessions
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations (quote, rate card, ...)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use quote_db::{Database, DbConfig, Repositories};
//!
//! let db = Database::new(DbConfig::new("path/to/quotes.db")).await?;
//!
//! let mut uow = db.begin().await?;
//! uow.quotes().insert(&quote).await?;
//! uow.line_items().insert_many(&quote.line_items).await?;
//! uow.commit().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod unit_of_work;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use unit_of_work::{Session, UnitOfWork};

// Repository re-exports for convenience
pub use repository::{
    AuditLogRepository, IdempotencyRepository, LineItemRepository, QuoteRepository,
    RateCardRepository, Repositories, SettingsRepository, VersionRepository,
};
