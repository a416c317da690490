//! # Edit Locking
//!
//! Decides whether a quote may be edited, given its status and the caller's
//! permissions.
//!
//! ```text
//! ┌──────────────────┬───────────────┬──────────────────────────────────────┐
//! │ status           │ force-edit?   │ outcome                              │
//! ├──────────────────┼───────────────┼──────────────────────────────────────┤
//! │ draft / pending  │ any           │ unlocked, edit in place              │
//! │ anything else    │ no            │ locked → QUOTE_LOCKED                │
//! │ anything else    │ yes           │ locked, snapshot version, then edit  │
//! └──────────────────┴───────────────┴──────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::status::QuoteStatus;

// =============================================================================
// Permissions
// =============================================================================

/// Permission flags the engine consumes. Evaluating them is the caller's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Use a caller-supplied unit price instead of the rate card.
    OverridePrice,
    /// Edit a quote past draft/pending, creating a version first.
    ForceEdit,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::OverridePrice => "override_price",
            Permission::ForceEdit => "force_edit",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "override_price" => Ok(Permission::OverridePrice),
            "force_edit" => Ok(Permission::ForceEdit),
            _ => Err(ValidationError::NotAllowed {
                field: "permission".to_string(),
                allowed: vec!["override_price".to_string(), "force_edit".to_string()],
            }),
        }
    }
}

/// The permissions held by one caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<Permission>);

impl PermissionSet {
    pub fn new() -> Self {
        PermissionSet(BTreeSet::new())
    }

    pub fn with(mut self, permission: Permission) -> Self {
        self.0.insert(permission);
        self
    }

    pub fn insert(&mut self, permission: Permission) {
        self.0.insert(permission);
    }

    pub fn contains(&self, permission: Permission) -> bool {
        self.0.contains(&permission)
    }

    pub fn can_override_price(&self) -> bool {
        self.contains(Permission::OverridePrice)
    }

    pub fn can_force_edit(&self) -> bool {
        self.contains(Permission::ForceEdit)
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        PermissionSet(iter.into_iter().collect())
    }
}

// =============================================================================
// Lock Status
// =============================================================================

/// Result of a lock check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStatus {
    pub is_locked: bool,
    pub can_force_edit: bool,
    pub requires_versioning: bool,
    pub reason: Option<String>,
}

/// Lock outcome for a quote in `status` edited by a caller with
/// `permissions`.
pub fn evaluate_lock(status: QuoteStatus, permissions: &PermissionSet) -> LockStatus {
    if status.is_editable() {
        return LockStatus {
            is_locked: false,
            can_force_edit: permissions.can_force_edit(),
            requires_versioning: false,
            reason: None,
        };
    }

    if permissions.can_force_edit() {
        LockStatus {
            is_locked: true,
            can_force_edit: true,
            requires_versioning: true,
            reason: Some(format!(
                "Quote is {}; editing it creates a new version",
                status
            )),
        }
    } else {
        LockStatus {
            is_locked: true,
            can_force_edit: false,
            requires_versioning: false,
            reason: Some(format!(
                "Quote is {} and cannot be edited without force-edit permission",
                status
            )),
        }
    }
}

/// Errors with [`CoreError::QuoteLocked`] when `lock` forbids the edit.
pub fn ensure_editable(quote_id: &str, lock: &LockStatus) -> CoreResult<()> {
    if lock.is_locked && !lock.can_force_edit {
        return Err(CoreError::QuoteLocked {
            quote_id: quote_id.to_string(),
            reason: lock
                .reason
                .clone()
                .unwrap_or_else(|| "quote is locked".to_string()),
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
