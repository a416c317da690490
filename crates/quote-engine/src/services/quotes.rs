//! # Quote Orchestrator
//!
//! Composes pricing, calculation, numbering, locking and idempotency into
//! the quote operations a transport calls.
//!
//! ## Mutation Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  validate ──► idempotency check ──► duplicate? ──► replay stored body   │
//! │                       │                                                 │
//! │                       ▼                                                 │
//! │  load + lock check (update) ──► price lines ──► recalculate totals      │
//! │                       │                                                 │
//! │                       ▼                                                 │
//! │  ┌──────────────────── one transaction ─────────────────────┐           │
//! │  │ number (create) │ version (locked edit) │ write │ record │──► commit  │
//! │  └──────────────────────────────────────────────────────────┘     │     │
//! │             key already live? roll back, replay its body ◄───────┤     │
//! │                                                                   ▼     │
//! │                                                          audit event    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reads and pricing happen before `begin()` and no session is held across
//! it, so the engine also runs on a single-connection pool.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use quote_core::calculator::recalculate;
use quote_core::input::{CreateQuoteInput, LineItemInput, TransitionRequest, UpdateQuoteInput};
use quote_core::pricing::{PricingRequest, PricingResult};
use quote_core::status::apply_transition;
use quote_core::{
    CoreError, Currency, LockStatus, Page, PageInfo, Pagination, Quote, QuoteFilters,
    QuoteLineItem, QuoteVersion,
};
use quote_db::{Database, Repositories, UnitOfWork};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{self, to_audit_value, AuditEntry, AuditSink};
use crate::cache::Cache;
use crate::config::EngineConfig;
use crate::context::CallerContext;
use crate::error::EngineResult;
use crate::services::idempotency::{IdempotencyContext, IdempotencyService};
use crate::services::locking::LockingService;
use crate::services::numbering::QuoteNumberGenerator;
use crate::services::pricing::PricingResolver;

const ENTITY_QUOTE: &str = "quote";

const STATUS_CREATED: u16 = 201;
const STATUS_OK: u16 = 200;

/// Result of the idempotency gate.
enum Gate {
    /// A live record exists; this is its stored body.
    Replay(String),
    /// Run the operation; store under the context if there is one.
    Proceed(Option<IdempotencyContext>),
}

/// How a mutation's transaction ended.
enum Committed {
    Applied,
    /// A concurrent request with the same key committed first.
    Replay(String),
}

/// Quote operations for one deployment.
#[derive(Clone)]
pub struct QuoteService {
    db: Database,
    audit: Arc<dyn AuditSink>,
    pricing: PricingResolver,
    numbers: QuoteNumberGenerator,
    locking: LockingService,
    idempotency: IdempotencyService,
    max_create_attempts: u32,
}

impl QuoteService {
    pub fn new(
        db: Database,
        cache: Arc<dyn Cache>,
        audit: Arc<dyn AuditSink>,
        config: &EngineConfig,
    ) -> Self {
        QuoteService {
            pricing: PricingResolver::new(db.clone(), cache, config),
            numbers: QuoteNumberGenerator::new(config.quote_number_prefix.clone()),
            locking: LockingService::new(db.clone()),
            idempotency: IdempotencyService::new(db.clone(), config.idempotency_ttl()),
            max_create_attempts: config.quote_number_max_attempts.max(1),
            audit,
            db,
        }
    }

    pub fn idempotency(&self) -> &IdempotencyService {
        &self.idempotency
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Creates a priced draft quote with a fresh number.
    pub async fn create_quote(
        &self,
        caller: &CallerContext,
        mut input: CreateQuoteInput,
        idempotency_key: Option<&str>,
    ) -> EngineResult<Quote> {
        input.validate()?;

        let idempotency = match self
            .gate(idempotency_key, caller, "POST", "/quotes", &input)
            .await?
        {
            Gate::Replay(body) => return replay(&body),
            Gate::Proceed(ctx) => ctx,
        };

        let now = Utc::now();
        let line_inputs = std::mem::take(&mut input.line_items);
        let currency = input.currency.clone();
        let quote_id = Uuid::new_v4().to_string();

        let line_items = self
            .price_lines(caller, &quote_id, &currency, line_inputs, now)
            .await?;

        let mut quote = input.into_quote(
            quote_id,
            &caller.organization_id,
            String::new(),
            &caller.user_id,
            now,
        );
        quote.line_items = line_items;
        recalculate(&mut quote).map_err(CoreError::from)?;

        let organization_id = caller.organization_id.as_str();
        let (draft, ctx) = (&quote, idempotency.as_ref());
        let quote = match retry_on_conflict(organization_id, self.max_create_attempts, move || {
            self.insert_numbered(organization_id, draft, now.year(), ctx)
        })
        .await?
        {
            (quote, Committed::Applied) => quote,
            (_, Committed::Replay(body)) => return replay(&body),
        };

        info!(
            quote_id = %quote.id,
            quote_number = %quote.quote_number,
            lines = quote.line_items.len(),
            total = %quote.total_amount,
            "Quote created"
        );

        self.emit(
            caller,
            "quote.created",
            &quote.id,
            None,
            to_audit_value(&quote),
            None,
            now,
        )
        .await;

        Ok(quote)
    }

    /// One create attempt: number, insert and commit `draft` as a copy.
    async fn insert_numbered(
        &self,
        organization_id: &str,
        draft: &Quote,
        year: i32,
        idempotency: Option<&IdempotencyContext>,
    ) -> EngineResult<(Quote, Committed)> {
        let mut quote = draft.clone();
        let mut uow = self.db.begin().await?;
        let number = self.numbers.generate(&mut uow, organization_id, year).await?;
        quote.quote_number = number.to_string();
        uow.quotes().insert(&quote).await?;
        uow.line_items().insert_many(&quote.line_items).await?;
        let committed = self.commit(uow, idempotency, STATUS_CREATED, &quote).await?;
        Ok((quote, committed))
    }

    // =========================================================================
    // Update
    // =========================================================================

    /// Applies a partial update. Locked quotes need force-edit and get a
    /// version snapshot of their pre-edit state in the same transaction.
    pub async fn update_quote(
        &self,
        caller: &CallerContext,
        quote_id: &str,
        mut input: UpdateQuoteInput,
        idempotency_key: Option<&str>,
    ) -> EngineResult<Quote> {
        input.validate()?;

        let route = format!("/quotes/{}", quote_id);
        let idempotency = match self.gate(idempotency_key, caller, "PATCH", &route, &input).await? {
            Gate::Replay(body) => return replay(&body),
            Gate::Proceed(ctx) => ctx,
        };

        let mut quote = self.load_quote(&caller.organization_id, quote_id).await?;
        let lock = self.locking.authorize_edit(caller, &quote)?;
        let before = quote.clone();
        let now = Utc::now();

        let replaced_lines = match input.line_items.take() {
            Some(lines) => {
                let currency = quote.currency.clone();
                Some(self.price_lines(caller, &quote.id, &currency, lines, now).await?)
            }
            None => None,
        };

        input.apply_to(&mut quote)?;
        if let Some(lines) = &replaced_lines {
            quote.line_items = lines.clone();
        }
        quote.updated_at = now;
        recalculate(&mut quote).map_err(CoreError::from)?;

        let mut uow = self.db.begin().await?;
        let version = if lock.requires_versioning {
            Some(
                self.locking
                    .create_version(&mut uow, &before, input.version_reason.clone(), &caller.user_id, now)
                    .await?,
            )
        } else {
            None
        };
        uow.quotes().update(&quote, before.status).await?;
        if let Some(lines) = &replaced_lines {
            uow.line_items().delete_for_quote(&quote.id).await?;
            uow.line_items().insert_many(lines).await?;
        }
        if let Committed::Replay(body) = self.commit(uow, idempotency.as_ref(), STATUS_OK, &quote).await? {
            return replay(&body);
        }

        info!(
            quote_id = %quote.id,
            versioned = version.is_some(),
            lines_replaced = replaced_lines.is_some(),
            "Quote updated"
        );

        let metadata = version
            .as_ref()
            .map(|v| json!({ "version_number": v.version_number, "reason": v.reason }));
        self.emit(
            caller,
            "quote.updated",
            &quote.id,
            to_audit_value(&before),
            to_audit_value(&quote),
            metadata,
            now,
        )
        .await;

        Ok(quote)
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Moves a quote along the status table and stamps milestones.
    pub async fn transition_status(
        &self,
        caller: &CallerContext,
        quote_id: &str,
        request: TransitionRequest,
        idempotency_key: Option<&str>,
    ) -> EngineResult<Quote> {
        request.validate()?;

        let route = format!("/quotes/{}/status", quote_id);
        let idempotency = match self.gate(idempotency_key, caller, "POST", &route, &request).await? {
            Gate::Replay(body) => return replay(&body),
            Gate::Proceed(ctx) => ctx,
        };

        let mut quote = self.load_quote(&caller.organization_id, quote_id).await?;
        let now = Utc::now();
        let from = apply_transition(&mut quote, request.status, &caller.user_id, now)?;

        let mut uow = self.db.begin().await?;
        uow.quotes().update(&quote, from).await?;
        if let Committed::Replay(body) = self.commit(uow, idempotency.as_ref(), STATUS_OK, &quote).await? {
            return replay(&body);
        }

        info!(
            quote_id = %quote.id,
            from = %from,
            to = %quote.status,
            "Quote status changed"
        );

        self.emit(
            caller,
            "quote.status_changed",
            &quote.id,
            Some(json!({ "status": from })),
            Some(json!({ "status": quote.status })),
            request.notes.as_ref().map(|notes| json!({ "notes": notes })),
            now,
        )
        .await;

        Ok(quote)
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Soft-deletes a draft or pending quote.
    pub async fn delete_quote(
        &self,
        caller: &CallerContext,
        quote_id: &str,
        idempotency_key: Option<&str>,
    ) -> EngineResult<()> {
        let route = format!("/quotes/{}", quote_id);
        let idempotency = match self
            .gate(idempotency_key, caller, "DELETE", &route, &json!({ "id": quote_id }))
            .await?
        {
            Gate::Replay(_) => return Ok(()),
            Gate::Proceed(ctx) => ctx,
        };

        let mut quote = self.load_quote(&caller.organization_id, quote_id).await?;
        if !quote.status.is_deletable() {
            return Err(CoreError::QuoteNotDeletable {
                quote_id: quote.id,
                status: quote.status,
            }
            .into());
        }

        let now = Utc::now();
        quote.deleted_at = Some(now);
        quote.updated_at = now;
        let mut uow = self.db.begin().await?;
        uow.quotes()
            .soft_delete(&caller.organization_id, &quote.id, quote.status, now)
            .await?;
        if let Committed::Replay(_) = self.commit(uow, idempotency.as_ref(), STATUS_OK, &quote).await? {
            return Ok(());
        }

        info!(quote_id = %quote.id, "Quote deleted");

        self.emit(
            caller,
            "quote.deleted",
            &quote.id,
            Some(json!({ "status": quote.status })),
            None,
            None,
            now,
        )
        .await;

        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// A live quote with its lines, or `None` when the id is unknown,
    /// deleted or owned by another organization.
    pub async fn get_quote_by_id(&self, caller: &CallerContext, quote_id: &str) -> EngineResult<Option<Quote>> {
        self.find_quote(&caller.organization_id, quote_id).await
    }

    /// Live quote headers, newest first. Lines are not loaded.
    pub async fn list_quotes(
        &self,
        caller: &CallerContext,
        pagination: Pagination,
        filters: &QuoteFilters,
    ) -> EngineResult<Page<Quote>> {
        let pagination = pagination.normalized();
        let mut session = self.db.session().await?;
        let (items, total) = session
            .quotes()
            .list(&caller.organization_id, filters, pagination)
            .await?;

        Ok(Page {
            items,
            pagination: PageInfo::new(pagination, total),
        })
    }

    pub async fn get_quote_versions(
        &self,
        caller: &CallerContext,
        quote_id: &str,
    ) -> EngineResult<Vec<QuoteVersion>> {
        self.locking.get_quote_versions(caller, quote_id).await
    }

    pub async fn get_quote_version(
        &self,
        caller: &CallerContext,
        quote_id: &str,
        version_number: i64,
    ) -> EngineResult<QuoteVersion> {
        self.locking.get_quote_version(caller, quote_id, version_number).await
    }

    pub async fn check_lock(&self, caller: &CallerContext, quote_id: &str) -> EngineResult<LockStatus> {
        self.locking.check_lock(caller, quote_id).await
    }

    /// Prices lines without persisting anything. Defaults to today (UTC).
    pub async fn resolve_pricing(
        &self,
        caller: &CallerContext,
        requests: &[PricingRequest],
        effective_date: Option<NaiveDate>,
    ) -> EngineResult<PricingResult> {
        let date = effective_date.unwrap_or_else(|| Utc::now().date_naive());
        self.pricing
            .resolve(
                &caller.organization_id,
                requests,
                caller.can_override_price(),
                date,
                None,
            )
            .await
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn find_quote(&self, organization_id: &str, quote_id: &str) -> EngineResult<Option<Quote>> {
        let mut session = self.db.session().await?;
        let Some(mut quote) = session.quotes().find_by_id(organization_id, quote_id).await? else {
            return Ok(None);
        };
        quote.line_items = session.line_items().list_for_quote(&quote.id).await?;
        Ok(Some(quote))
    }

    /// Like [`Self::find_quote`], but a missing quote is `QUOTE_NOT_FOUND`.
    async fn load_quote(&self, organization_id: &str, quote_id: &str) -> EngineResult<Quote> {
        self.find_quote(organization_id, quote_id)
            .await?
            .ok_or_else(|| CoreError::QuoteNotFound(quote_id.to_string()).into())
    }

    /// Prices `inputs` on today's card and builds lines numbered from 1.
    /// Fails with every line error when any line cannot be priced.
    async fn price_lines(
        &self,
        caller: &CallerContext,
        quote_id: &str,
        currency: &Currency,
        inputs: Vec<LineItemInput>,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<QuoteLineItem>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let requests: Vec<PricingRequest> = inputs
            .iter()
            .enumerate()
            .map(|(index, line)| line.to_pricing_request(line_number(index)))
            .collect();

        let priced = self
            .pricing
            .resolve(
                &caller.organization_id,
                &requests,
                caller.can_override_price(),
                now.date_naive(),
                Some(currency),
            )
            .await?;

        if !priced.success {
            warn!(
                organization_id = %caller.organization_id,
                failed = priced.errors.len(),
                "Quote lines could not be priced"
            );
            return Err(CoreError::Pricing(priced.errors).into());
        }

        Ok(inputs
            .into_iter()
            .zip(priced.results)
            .enumerate()
            .map(|(index, (input, price))| {
                input.into_line_item(
                    Uuid::new_v4().to_string(),
                    quote_id,
                    line_number(index),
                    price,
                    currency,
                    now,
                )
            })
            .collect())
    }

    async fn gate<T: Serialize>(
        &self,
        idempotency_key: Option<&str>,
        caller: &CallerContext,
        method: &str,
        route: &str,
        body: &T,
    ) -> EngineResult<Gate> {
        let Some(key) = idempotency_key.map(str::trim).filter(|k| !k.is_empty()) else {
            return Ok(Gate::Proceed(None));
        };

        let body = serde_json::to_value(body)?;
        let (ctx, check) = self.idempotency.check(key, caller, method, route, &body).await?;

        match (check.is_duplicate, check.response_body) {
            (true, Some(stored)) => Ok(Gate::Replay(stored)),
            _ => Ok(Gate::Proceed(Some(ctx))),
        }
    }

    /// Writes the idempotency record for a keyed request into `uow`, then
    /// commits. When a live record already holds the key the transaction is
    /// rolled back and the winner's body returned instead.
    async fn commit<T: Serialize>(
        &self,
        mut uow: UnitOfWork,
        ctx: Option<&IdempotencyContext>,
        status: u16,
        response: &T,
    ) -> EngineResult<Committed> {
        if let Some(ctx) = ctx {
            let body = serde_json::to_string(response)?;
            if !self.idempotency.store_in(&mut uow, ctx, status, &body).await? {
                uow.rollback().await?;
                return Ok(Committed::Replay(self.idempotency.stored_body(ctx).await?));
            }
        }
        uow.commit().await?;
        Ok(Committed::Applied)
    }

    #[allow(clippy::too_many_arguments)]
    async fn emit(
        &self,
        caller: &CallerContext,
        action: &str,
        quote_id: &str,
        old_values: Option<serde_json::Value>,
        new_values: Option<serde_json::Value>,
        metadata: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) {
        audit::emit(
            self.audit.as_ref(),
            AuditEntry {
                action,
                entity_type: ENTITY_QUOTE,
                entity_id: quote_id,
                organization_id: &caller.organization_id,
                user_id: &caller.user_id,
                old_values,
                new_values,
                metadata,
            },
            now,
        )
        .await;
    }
}

/// Runs `attempt` until it succeeds, fails with a final error, or
/// `max_attempts` tries have lost a race. Each try starts its own transaction.
async fn retry_on_conflict<T, F, Fut>(organization_id: &str, max_attempts: u32, mut attempt: F) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    let mut tries = 0;
    loop {
        tries += 1;
        match attempt().await {
            Err(e) if e.is_retryable() && tries < max_attempts => {
                warn!(
                    organization_id,
                    attempt = tries,
                    error = %e,
                    "Quote insert lost a race, retrying"
                );
            }
            result => return result,
        }
    }
}

fn line_number(index: usize) -> u32 {
    u32::try_from(index + 1).unwrap_or(u32::MAX)
}

fn replay<T: DeserializeOwned>(body: &str) -> EngineResult<T> {
    Ok(serde_json::from_str(body)?)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::StoreAuditSink;
    use crate::cache::failing::FailingCache;
    use crate::cache::MemoryCache;
    use crate::error::{EngineError, ErrorCode};
    use crate::services::test_support::{card, create_input, database, item, line_input, seed};
    use quote_core::quote_number::parse_quote_number;
    use quote_core::{Discount, Money, Permission, PricingSource, QuoteStatus};
    use quote_db::DbError;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn service_with(cache: Arc<dyn Cache>) -> (QuoteService, Database) {
        let db = database().await;
        let main = card("card-1", "acme", NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(), true);
        let mut consulting = item("item-1", &main, "consulting", Some("CONS-STD"), dec!(150.00));
        consulting.name = Some("Consulting".to_string());
        let mut install = item("item-2", &main, "installation", Some("INST-STD"), dec!(95.00));
        install.name = Some("Installation".to_string());
        seed(&db, &main, &[consulting, install]).await;

        let service = QuoteService::new(
            db.clone(),
            cache,
            Arc::new(StoreAuditSink::new(db.clone())),
            &EngineConfig::default(),
        );
        (service, db)
    }

    async fn service() -> (QuoteService, Database) {
        service_with(Arc::new(MemoryCache::new())).await
    }

    fn seller() -> CallerContext {
        CallerContext::new("acme", "user-1")
    }

    fn manager() -> CallerContext {
        seller()
            .with_permission(Permission::OverridePrice)
            .with_permission(Permission::ForceEdit)
    }

    async fn count_quotes(db: &Database) -> u64 {
        let mut session = db.session().await.unwrap();
        let (_, total) = session
            .quotes()
            .list("acme", &QuoteFilters::default(), Pagination::default())
            .await
            .unwrap();
        total
    }

    async fn advance(service: &QuoteService, caller: &CallerContext, id: &str, to: &[QuoteStatus]) -> Quote {
        let mut quote = None;
        for status in to {
            let request = TransitionRequest {
                status: *status,
                notes: None,
            };
            quote = Some(service.transition_status(caller, id, request, None).await.unwrap());
        }
        quote.unwrap()
    }

    #[tokio::test]
    async fn test_create_explicit_line_totals() {
        let (service, _) = service().await;
        let mut line = line_input("Site survey");
        line.quantity = dec!(10);
        line.unit_price = Some(dec!(100.00));
        line.tax_rate = Some(dec!(0.15));

        let quote = service
            .create_quote(&manager(), create_input(vec![line]), None)
            .await
            .unwrap();

        let line = &quote.line_items[0];
        assert_eq!(line.pricing_source, PricingSource::Explicit);
        assert_eq!(line.subtotal, Money::new(dec!(1000.00)));
        assert_eq!(line.tax_amount, Money::new(dec!(150.00)));
        assert_eq!(line.total_amount, Money::new(dec!(1150.00)));
        assert_eq!(quote.subtotal, Money::new(dec!(1000.00)));
        assert_eq!(quote.total_amount, Money::new(dec!(1150.00)));
        assert_eq!(quote.status, QuoteStatus::Draft);

        let stored = service.get_quote_by_id(&manager(), &quote.id).await.unwrap().unwrap();
        assert_eq!(stored.total_amount, quote.total_amount);
        assert_eq!(stored.line_items.len(), 1);
        assert_eq!(
            stored.total_amount,
            stored.subtotal - stored.discount_amount + stored.tax_amount
        );
        assert_eq!(
            stored.subtotal,
            stored.line_items.iter().map(|l| l.subtotal).sum::<Money>()
        );
    }

    #[tokio::test]
    async fn test_explicit_price_ignored_without_permission() {
        let (service, _) = service().await;
        let mut line = line_input("Consulting");
        line.quantity = dec!(2);
        line.unit_price = Some(dec!(1.00));

        let quote = service
            .create_quote(&seller(), create_input(vec![line]), None)
            .await
            .unwrap();

        assert_eq!(quote.line_items[0].unit_price, Money::new(dec!(150.00)));
        assert_eq!(quote.line_items[0].pricing_source, PricingSource::RateCard);
        assert_eq!(quote.line_items[0].rate_card_item_id.as_deref(), Some("item-1"));
        assert_eq!(quote.subtotal, Money::new(dec!(300.00)));
    }

    #[tokio::test]
    async fn test_numbers_increment_per_org() {
        let (service, _) = service().await;
        let year = Utc::now().year();

        let first = service
            .create_quote(&seller(), create_input(vec![]), None)
            .await
            .unwrap();
        let second = service
            .create_quote(&seller(), create_input(vec![]), None)
            .await
            .unwrap();

        assert_eq!(first.quote_number, format!("Q-{}-0001", year));
        assert_eq!(second.quote_number, format!("Q-{}-0002", year));

        let parsed = parse_quote_number(&second.quote_number).unwrap();
        assert_eq!(parsed.prefix, "Q");
        assert_eq!(parsed.year, year);
        assert!(parsed.sequence > parse_quote_number(&first.quote_number).unwrap().sequence);
    }

    #[tokio::test]
    async fn test_idempotent_create_persists_once() {
        let (service, db) = service().await;
        let input = create_input(vec![line_input("Consulting")]);

        let first = service
            .create_quote(&seller(), input.clone(), Some("create-1"))
            .await
            .unwrap();
        let second = service
            .create_quote(&seller(), input, Some("create-1"))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(count_quotes(&db).await, 1);

        let third = service
            .create_quote(&seller(), create_input(vec![]), Some("create-2"))
            .await
            .unwrap();
        assert_ne!(third.id, first.id);
        assert_eq!(count_quotes(&db).await, 2);
    }

    #[tokio::test]
    async fn test_concurrent_same_key_creates_persist_once() {
        let (service, db) = service().await;
        let input = create_input(vec![line_input("Consulting")]);

        let (caller_a, caller_b) = (seller(), seller());
        let (first, second) = tokio::join!(
            service.create_quote(&caller_a, input.clone(), Some("create-1")),
            service.create_quote(&caller_b, input.clone(), Some("create-1")),
        );
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_eq!(first, second);
        assert_eq!(count_quotes(&db).await, 1);

        let mut session = db.session().await.unwrap();
        let events = session
            .audit()
            .list_for_entity("acme", "quote", &first.id)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_get_unknown_or_foreign_quote_is_none() {
        let (service, _) = service().await;
        let quote = service
            .create_quote(&seller(), create_input(vec![]), None)
            .await
            .unwrap();

        assert!(service.get_quote_by_id(&seller(), "missing").await.unwrap().is_none());
        let other = CallerContext::new("globex", "user-9");
        assert!(service.get_quote_by_id(&other, &quote.id).await.unwrap().is_none());
    }

    fn lost_race() -> EngineError {
        DbError::duplicate("quotes.organization_id, quotes.quote_number", "Q-2025-0001").into()
    }

    #[tokio::test]
    async fn test_retry_on_conflict_succeeds_on_a_later_attempt() {
        let tries = AtomicU32::new(0);
        let tries = &tries;

        let result = retry_on_conflict("acme", 3, move || async move {
            let n = tries.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(lost_race())
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(tries.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_on_conflict_gives_up_after_max_attempts() {
        let tries = AtomicU32::new(0);
        let tries = &tries;

        let err = retry_on_conflict("acme", 2, move || async move {
            tries.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(lost_race())
        })
        .await
        .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(err.code(), ErrorCode::Conflict);
        assert_eq!(tries.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_on_conflict_stops_on_final_error() {
        let tries = AtomicU32::new(0);
        let tries = &tries;

        let err = retry_on_conflict("acme", 5, move || async move {
            tries.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(CoreError::QuoteNotFound("q-1".to_string()).into())
        })
        .await
        .unwrap_err();

        assert_eq!(err.code(), ErrorCode::QuoteNotFound);
        assert_eq!(tries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_colliding_number_exhausts_attempts_without_effects() {
        let (service, db) = service().await;
        {
            let mut session = db.session().await.unwrap();
            sqlx::query(
                r#"
                CREATE TRIGGER number_taken BEFORE INSERT ON quotes
                BEGIN
                    SELECT RAISE(ABORT, 'UNIQUE constraint failed: quotes.organization_id, quotes.quote_number');
                END
                "#,
            )
            .execute(session.connection())
            .await
            .unwrap();
        }

        let err = service
            .create_quote(&seller(), create_input(vec![line_input("Consulting")]), Some("create-1"))
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::Conflict);
        assert!(err.is_retryable());
        assert!(err.body().retryable);
        assert_eq!(count_quotes(&db).await, 0);

        let (_, check) = service
            .idempotency()
            .check("create-1", &seller(), "POST", "/quotes", &json!({}))
            .await
            .unwrap();
        assert!(!check.exists);
    }

    #[tokio::test]
    async fn test_unpriceable_lines_fail_without_side_effects() {
        let (service, db) = service().await;
        let lines = vec![line_input("Consulting"), line_input("Crane rental")];

        let err = service
            .create_quote(&seller(), create_input(lines), Some("create-1"))
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::PricingFailed);
        let body = err.body();
        assert_eq!(body.pricing_errors.len(), 1);
        assert_eq!(body.pricing_errors[0].line_number, 2);
        assert_eq!(count_quotes(&db).await, 0);
    }

    #[tokio::test]
    async fn test_invalid_input_is_rejected() {
        let (service, _) = service().await;
        let mut input = create_input(vec![]);
        input.title = "   ".to_string();

        let err = service.create_quote(&seller(), input, None).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
        assert!(!err.body().field_errors.is_empty());
    }

    #[tokio::test]
    async fn test_status_chain_sets_milestones() {
        let (service, _) = service().await;
        let quote = service
            .create_quote(&seller(), create_input(vec![]), None)
            .await
            .unwrap();

        let err = service
            .transition_status(
                &seller(),
                &quote.id,
                TransitionRequest {
                    status: QuoteStatus::Accepted,
                    notes: None,
                },
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidStatusTransition);

        let accepted = advance(
            &service,
            &seller(),
            &quote.id,
            &[
                QuoteStatus::Pending,
                QuoteStatus::Approved,
                QuoteStatus::Sent,
                QuoteStatus::Accepted,
            ],
        )
        .await;

        assert_eq!(accepted.status, QuoteStatus::Accepted);
        assert_eq!(accepted.approved_by.as_deref(), Some("user-1"));
        let approved_at = accepted.approved_at.unwrap();
        let sent_at = accepted.sent_at.unwrap();
        let accepted_at = accepted.accepted_at.unwrap();
        assert!(approved_at <= sent_at && sent_at <= accepted_at);

        let stored = service.get_quote_by_id(&seller(), &quote.id).await.unwrap().unwrap();
        assert_eq!(stored.status, QuoteStatus::Accepted);
        assert!(stored.accepted_at.is_some());
    }

    #[tokio::test]
    async fn test_transition_audit_carries_notes() {
        let (service, db) = service().await;
        let quote = service
            .create_quote(&seller(), create_input(vec![]), None)
            .await
            .unwrap();

        service
            .transition_status(
                &seller(),
                &quote.id,
                TransitionRequest {
                    status: QuoteStatus::Pending,
                    notes: Some("ready for review".to_string()),
                },
                None,
            )
            .await
            .unwrap();

        let mut session = db.session().await.unwrap();
        let events = session
            .audit()
            .list_for_entity("acme", "quote", &quote.id)
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, "quote.created");
        assert_eq!(events[1].action, "quote.status_changed");
        assert_eq!(events[1].old_values, Some(json!({ "status": "draft" })));
        assert_eq!(events[1].new_values, Some(json!({ "status": "pending" })));
        assert_eq!(events[1].metadata, Some(json!({ "notes": "ready for review" })));
    }

    #[tokio::test]
    async fn test_locked_update_requires_force_edit_and_versions() {
        let (service, _) = service().await;
        let quote = service
            .create_quote(&seller(), create_input(vec![line_input("Consulting")]), None)
            .await
            .unwrap();
        advance(&service, &seller(), &quote.id, &[QuoteStatus::Pending, QuoteStatus::Approved]).await;

        let update = UpdateQuoteInput {
            title: Some("Revised scope".to_string()),
            discount: Some(Discount::percentage(dec!(10))),
            version_reason: Some("customer asked for discount".to_string()),
            ..Default::default()
        };

        let err = service
            .update_quote(&seller(), &quote.id, update.clone(), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::QuoteLocked);
        assert!(service.get_quote_versions(&seller(), &quote.id).await.unwrap().is_empty());

        let updated = service
            .update_quote(&manager(), &quote.id, update, None)
            .await
            .unwrap();
        assert_eq!(updated.title, "Revised scope");
        assert_eq!(updated.discount_amount, Money::new(dec!(15.00)));
        assert_eq!(
            updated.total_amount,
            updated.subtotal - updated.discount_amount + updated.tax_amount
        );

        let versions = service.get_quote_versions(&manager(), &quote.id).await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].version_number, 1);
        assert_eq!(versions[0].snapshot.title, quote.title);
        assert_eq!(versions[0].snapshot.status, QuoteStatus::Approved);
        assert_eq!(versions[0].snapshot.line_items.len(), 1);

        service
            .update_quote(
                &manager(),
                &quote.id,
                UpdateQuoteInput {
                    notes: Some("second pass".to_string()),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();
        let version = service.get_quote_version(&manager(), &quote.id, 2).await.unwrap();
        assert_eq!(version.snapshot.title, "Revised scope");
    }

    #[tokio::test]
    async fn test_draft_update_replaces_lines_without_version() {
        let (service, _) = service().await;
        let quote = service
            .create_quote(&seller(), create_input(vec![line_input("Consulting")]), None)
            .await
            .unwrap();

        let mut install = line_input("Installation");
        install.quantity = dec!(4);
        let updated = service
            .update_quote(
                &seller(),
                &quote.id,
                UpdateQuoteInput {
                    line_items: Some(vec![line_input("Consulting"), install]),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();

        assert_eq!(updated.line_items.len(), 2);
        assert_eq!(updated.line_items[1].line_number, 2);
        assert_eq!(updated.subtotal, Money::new(dec!(530.00)));

        let stored = service.get_quote_by_id(&seller(), &quote.id).await.unwrap().unwrap();
        assert_eq!(stored.line_items.len(), 2);
        assert_eq!(stored.subtotal, updated.subtotal);
        assert!(service.get_quote_versions(&seller(), &quote.id).await.unwrap().is_empty());

        let lock = service.check_lock(&seller(), &quote.id).await.unwrap();
        assert!(!lock.is_locked);
    }

    #[tokio::test]
    async fn test_delete_only_draft_or_pending() {
        let (service, db) = service().await;
        let draft = service
            .create_quote(&seller(), create_input(vec![]), None)
            .await
            .unwrap();
        let approved = service
            .create_quote(&seller(), create_input(vec![]), None)
            .await
            .unwrap();
        advance(&service, &seller(), &approved.id, &[QuoteStatus::Pending, QuoteStatus::Approved]).await;

        service.delete_quote(&seller(), &draft.id, Some("del-1")).await.unwrap();
        service.delete_quote(&seller(), &draft.id, Some("del-1")).await.unwrap();

        assert!(service.get_quote_by_id(&seller(), &draft.id).await.unwrap().is_none());
        let err = service
            .transition_status(
                &seller(),
                &draft.id,
                TransitionRequest {
                    status: QuoteStatus::Pending,
                    notes: None,
                },
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::QuoteNotFound);

        let err = service.delete_quote(&seller(), &approved.id, None).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::QuoteNotDeletable);
        assert_eq!(count_quotes(&db).await, 1);
    }

    #[tokio::test]
    async fn test_list_filters_and_paginates() {
        let (service, _) = service().await;
        for title in ["Office fit-out", "Warehouse lighting", "Office cabling"] {
            let mut input = create_input(vec![]);
            input.title = title.to_string();
            service.create_quote(&seller(), input, None).await.unwrap();
        }

        let page = service
            .list_quotes(&seller(), Pagination::new(1, 2), &QuoteFilters::default())
            .await
            .unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.pagination.total, 3);
        assert_eq!(page.pagination.total_pages, 2);

        let filters = QuoteFilters {
            search: Some("office".to_string()),
            ..Default::default()
        };
        let page = service
            .list_quotes(&seller(), Pagination::default(), &filters)
            .await
            .unwrap();
        assert_eq!(page.pagination.total, 2);

        let other = CallerContext::new("globex", "user-9");
        let page = service
            .list_quotes(&other, Pagination::default(), &QuoteFilters::default())
            .await
            .unwrap();
        assert!(page.items.is_empty());
    }

    #[tokio::test]
    async fn test_cache_outage_does_not_fail_requests() {
        let (service, _) = service_with(Arc::new(FailingCache)).await;
        let quote = service
            .create_quote(&seller(), create_input(vec![line_input("Installation")]), None)
            .await
            .unwrap();
        assert_eq!(quote.line_items[0].unit_price, Money::new(dec!(95.00)));
    }

    #[tokio::test]
    async fn test_resolve_pricing_preview() {
        let (service, _) = service().await;
        let mut by_code = PricingRequest {
            line_number: 1,
            description: "Any".to_string(),
            quantity: dec!(1),
            unit_price: None,
            tax_rate: None,
            unit: None,
            item_code: Some("INST-STD".to_string()),
            service_category_id: None,
            role_id: None,
        };
        let result = service
            .resolve_pricing(&seller(), &[by_code.clone()], None)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.results[0].unit_price, Money::new(dec!(95.00)));

        by_code.item_code = Some("NOPE".to_string());
        let result = service
            .resolve_pricing(&seller(), &[by_code], None)
            .await
            .unwrap();
        assert!(!result.success);
    }
}
