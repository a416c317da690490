//! # Quote Status State Machine
//!
//! ## Transition Table
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   draft ──► pending ──► approved ──► sent ──► accepted                  │
//! │     │          │                       │                                │
//! │     │          ├──────► rejected ◄─────┘                                │
//! │     │          │                                                        │
//! │     └──────────┴──────► cancelled                                       │
//! │                                                                         │
//! │   accepted / rejected / cancelled are terminal                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::types::Quote;

/// Lifecycle status of a quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    Draft,
    Pending,
    Approved,
    Sent,
    Accepted,
    Rejected,
    Cancelled,
}

impl QuoteStatus {
    pub const ALL: [QuoteStatus; 7] = [
        QuoteStatus::Draft,
        QuoteStatus::Pending,
        QuoteStatus::Approved,
        QuoteStatus::Sent,
        QuoteStatus::Accepted,
        QuoteStatus::Rejected,
        QuoteStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteStatus::Draft => "draft",
            QuoteStatus::Pending => "pending",
            QuoteStatus::Approved => "approved",
            QuoteStatus::Sent => "sent",
            QuoteStatus::Accepted => "accepted",
            QuoteStatus::Rejected => "rejected",
            QuoteStatus::Cancelled => "cancelled",
        }
    }

    /// Statuses reachable in one step from `self`.
    pub fn allowed_transitions(&self) -> &'static [QuoteStatus] {
        match self {
            QuoteStatus::Draft => &[QuoteStatus::Pending, QuoteStatus::Cancelled],
            QuoteStatus::Pending => &[
                QuoteStatus::Approved,
                QuoteStatus::Rejected,
                QuoteStatus::Cancelled,
            ],
            QuoteStatus::Approved => &[QuoteStatus::Sent],
            QuoteStatus::Sent => &[QuoteStatus::Accepted, QuoteStatus::Rejected],
            QuoteStatus::Accepted | QuoteStatus::Rejected | QuoteStatus::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: QuoteStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// Draft and pending quotes can be edited without a lock.
    pub fn is_editable(&self) -> bool {
        matches!(self, QuoteStatus::Draft | QuoteStatus::Pending)
    }

    /// Only draft and pending quotes can be soft-deleted.
    pub fn is_deletable(&self) -> bool {
        self.is_editable()
    }
}

impl Default for QuoteStatus {
    fn default() -> Self {
        QuoteStatus::Draft
    }
}

impl fmt::Display for QuoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuoteStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QuoteStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ValidationError::NotAllowed {
                field: "status".to_string(),
                allowed: QuoteStatus::ALL
                    .iter()
                    .map(|s| s.as_str().to_string())
                    .collect(),
            })
    }
}

/// `true` iff the transition table allows `from -> to`.
pub fn is_valid_status_transition(from: QuoteStatus, to: QuoteStatus) -> bool {
    from.can_transition_to(to)
}

/// Errors with [`CoreError::InvalidStatusTransition`] when the table
/// disallows `from -> to`.
pub fn validate_transition(from: QuoteStatus, to: QuoteStatus) -> CoreResult<()> {
    if is_valid_status_transition(from, to) {
        Ok(())
    } else {
        Err(CoreError::InvalidStatusTransition { from, to })
    }
}

/// Moves `quote` to `to`, stamping the milestone fields.
///
/// ```text
/// approved ──► approved_by = actor, approved_at = now
/// sent     ──► sent_at = now
/// accepted ──► accepted_at = now
/// ```
///
/// Returns the previous status.
pub fn apply_transition(
    quote: &mut Quote,
    to: QuoteStatus,
    actor_id: &str,
    now: DateTime<Utc>,
) -> CoreResult<QuoteStatus> {
    let from = quote.status;
    validate_transition(from, to)?;

    match to {
        QuoteStatus::Approved => {
            quote.approved_by = Some(actor_id.to_string());
            quote.approved_at = Some(now);
        }
        QuoteStatus::Sent => quote.sent_at = Some(now),
        QuoteStatus::Accepted => quote.accepted_at = Some(now),
        _ => {}
    }

    quote.status = to;
    quote.updated_at = now;
    Ok(from)
}

// =============================================================================
// Unit Tests
// =============================================================================
