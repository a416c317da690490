//! Caller identity handed to every engine operation.

use quote_core::{Permission, PermissionSet};
use serde::{Deserialize, Serialize};

/// Who is calling, for which organization, with which permissions.
///
/// Authentication and permission evaluation happen before the engine; it
/// only reads the resulting flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerContext {
    pub organization_id: String,
    pub user_id: String,
    #[serde(default)]
    pub permissions: PermissionSet,
}

impl CallerContext {
    pub fn new(organization_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        CallerContext {
            organization_id: organization_id.into(),
            user_id: user_id.into(),
            permissions: PermissionSet::new(),
        }
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.insert(permission);
        self
    }

    pub fn can_override_price(&self) -> bool {
        self.permissions.can_override_price()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permissions_builder() {
        let caller = CallerContext::new("acme", "user-1");
        assert!(!caller.can_override_price());

        let caller = caller.with_permission(Permission::OverridePrice);
        assert!(caller.can_override_price());
        assert!(!caller.permissions.can_force_edit());
    }
}
