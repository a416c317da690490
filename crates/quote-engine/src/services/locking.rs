//! # Locking & Versioning
//!
//! Decides whether a quote may be edited and snapshots it when a locked
//! quote is force-edited.
//!
//! ```text
//! draft / pending ─────────────────────────────► unlocked, edit in place
//! approved / sent / accepted / rejected / cancelled
//!     ├── no force_edit ──► QUOTE_LOCKED, nothing written
//!     └── force_edit    ──► version N+1 = snapshot(before) ─► edit
//! ```

use chrono::{DateTime, Utc};
use quote_core::locking::{ensure_editable, evaluate_lock};
use quote_core::{CoreError, LockStatus, Quote, QuoteVersion};
use quote_db::{Database, Repositories};
use tracing::info;
use uuid::Uuid;

use crate::context::CallerContext;
use crate::error::EngineResult;

/// Lock checks and version reads/writes.
#[derive(Debug, Clone)]
pub struct LockingService {
    db: Database,
}

impl LockingService {
    pub fn new(db: Database) -> Self {
        LockingService { db }
    }

    /// Lock state of a live quote for this caller.
    pub async fn check_lock(&self, caller: &CallerContext, quote_id: &str) -> EngineResult<LockStatus> {
        let mut session = self.db.session().await?;
        let quote = session
            .quotes()
            .find_by_id(&caller.organization_id, quote_id)
            .await?
            .ok_or_else(|| CoreError::QuoteNotFound(quote_id.to_string()))?;

        Ok(evaluate_lock(quote.status, &caller.permissions))
    }

    /// Lock state of an already loaded quote; errors when the edit is refused.
    pub fn authorize_edit(&self, caller: &CallerContext, quote: &Quote) -> EngineResult<LockStatus> {
        let lock = evaluate_lock(quote.status, &caller.permissions);
        ensure_editable(&quote.id, &lock)?;
        Ok(lock)
    }

    /// Stores `snapshot` as the quote's next version.
    ///
    /// Runs on the caller's unit of work so the snapshot commits or rolls
    /// back with the edit it precedes.
    pub async fn create_version<R: Repositories>(
        &self,
        repos: &mut R,
        snapshot: &Quote,
        reason: Option<String>,
        created_by: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<QuoteVersion> {
        let version_number = repos.versions().next_version_number(&snapshot.id).await?;
        let version = QuoteVersion {
            id: Uuid::new_v4().to_string(),
            quote_id: snapshot.id.clone(),
            organization_id: snapshot.organization_id.clone(),
            version_number,
            snapshot: snapshot.clone(),
            reason,
            created_by: created_by.to_string(),
            created_at: now,
        };
        repos.versions().insert(&version).await?;

        info!(
            quote_id = %version.quote_id,
            version_number,
            "Quote version created"
        );
        Ok(version)
    }

    /// Versions of a live quote, newest first.
    pub async fn get_quote_versions(
        &self,
        caller: &CallerContext,
        quote_id: &str,
    ) -> EngineResult<Vec<QuoteVersion>> {
        let mut session = self.db.session().await?;
        if session
            .quotes()
            .find_by_id(&caller.organization_id, quote_id)
            .await?
            .is_none()
        {
            return Err(CoreError::QuoteNotFound(quote_id.to_string()).into());
        }

        Ok(session
            .versions()
            .list_for_quote(&caller.organization_id, quote_id)
            .await?)
    }

    pub async fn get_quote_version(
        &self,
        caller: &CallerContext,
        quote_id: &str,
        version_number: i64,
    ) -> EngineResult<QuoteVersion> {
        let mut session = self.db.session().await?;
        session
            .versions()
            .find(&caller.organization_id, quote_id, version_number)
            .await?
            .ok_or_else(|| {
                CoreError::VersionNotFound {
                    quote_id: quote_id.to_string(),
                    version_number,
                }
                .into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::services::test_support::{database, stored_quote};
    use quote_core::{Permission, QuoteStatus};

    #[tokio::test]
    async fn test_check_lock_by_status_and_permission() {
        let db = database().await;
        let service = LockingService::new(db.clone());

        let mut approved = stored_quote("q-1", "acme", "Q-2025-0001");
        approved.status = QuoteStatus::Approved;
        {
            let mut uow = db.begin().await.unwrap();
            uow.quotes().insert(&approved).await.unwrap();
            uow.quotes()
                .insert(&stored_quote("q-2", "acme", "Q-2025-0002"))
                .await
                .unwrap();
            uow.commit().await.unwrap();
        }

        let plain = CallerContext::new("acme", "user-1");
        let lock = service.check_lock(&plain, "q-1").await.unwrap();
        assert!(lock.is_locked);
        assert!(!lock.can_force_edit);
        assert!(lock.reason.unwrap().contains("approved"));

        let forcer = plain.clone().with_permission(Permission::ForceEdit);
        let lock = service.check_lock(&forcer, "q-1").await.unwrap();
        assert!(lock.is_locked && lock.can_force_edit && lock.requires_versioning);

        let lock = service.check_lock(&plain, "q-2").await.unwrap();
        assert!(!lock.is_locked);

        let err = service.check_lock(&plain, "missing").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::QuoteNotFound);

        let err = service.authorize_edit(&plain, &approved).unwrap_err();
        assert_eq!(err.code(), ErrorCode::QuoteLocked);
    }

    #[tokio::test]
    async fn test_versions_number_sequentially() {
        let db = database().await;
        let service = LockingService::new(db.clone());
        let caller = CallerContext::new("acme", "user-1");
        let quote = stored_quote("q-1", "acme", "Q-2025-0001");

        let mut uow = db.begin().await.unwrap();
        uow.quotes().insert(&quote).await.unwrap();
        let first = service
            .create_version(&mut uow, &quote, None, "user-1", Utc::now())
            .await
            .unwrap();
        let second = service
            .create_version(&mut uow, &quote, Some("price change".to_string()), "user-1", Utc::now())
            .await
            .unwrap();
        uow.commit().await.unwrap();

        assert_eq!(first.version_number, 1);
        assert_eq!(second.version_number, 2);

        let versions = service.get_quote_versions(&caller, "q-1").await.unwrap();
        assert_eq!(
            versions.iter().map(|v| v.version_number).collect::<Vec<_>>(),
            vec![2, 1]
        );

        let fetched = service.get_quote_version(&caller, "q-1", 2).await.unwrap();
        assert_eq!(fetched.reason.as_deref(), Some("price change"));
        assert_eq!(fetched.snapshot.quote_number, "Q-2025-0001");

        let err = service.get_quote_version(&caller, "q-1", 9).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::VersionNotFound);
    }
}
