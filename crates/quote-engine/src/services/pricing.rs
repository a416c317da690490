//! # Pricing Resolver
//!
//! Resolves unit price, tax rate and unit for a batch of lines against the
//! organization's active rate card.
//!
//! ## Lookup Path
//! ```text
//! resolve(org, lines, has_override, date)
//!   │
//!   ├─► active card      cache ratecard:{org}:active:{date}   ──miss──► store
//!   │     none ──► one "no active rate card" error per line
//!   │
//!   ├─► card items       cache ratecard:{org}:card:{id}:items ──miss──► store
//!   │
//!   └─► per line
//!         code lookup    cache ratecard:{org}:card:{id}:code:{code}
//!         quote_core::pricing::resolve_line  (explicit → code → category → description)
//!         failure ──► PricingLineError, batch continues
//! ```
//!
//! A store session is held only for the duration of one cache miss.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use quote_core::pricing::{
    resolve_line, select_active_rate_card, LineCandidates, PricingContext, PricingDefaults,
    PricingFailure, PricingLineError, PricingRequest, PricingResult,
};
use quote_core::{Currency, RateCard, RateCardItem};
use quote_db::{Database, Repositories};
use tracing::{debug, warn};

use crate::cache::{self, Cache};
use crate::config::EngineConfig;
use crate::error::EngineResult;

/// Rate-card backed price resolution.
#[derive(Clone)]
pub struct PricingResolver {
    db: Database,
    cache: Arc<dyn Cache>,
    defaults: PricingDefaults,
    active_card_ttl: Duration,
    items_ttl: Duration,
}

impl PricingResolver {
    pub fn new(db: Database, cache: Arc<dyn Cache>, config: &EngineConfig) -> Self {
        PricingResolver {
            db,
            cache,
            defaults: config.pricing_defaults(),
            active_card_ttl: config.active_rate_card_ttl(),
            items_ttl: config.rate_card_items_ttl(),
        }
    }

    pub fn defaults(&self) -> &PricingDefaults {
        &self.defaults
    }

    /// Prices every request; failures are collected per line.
    ///
    /// `currency` is the quote currency items must be priced in. Without
    /// one, the active card's currency is used.
    pub async fn resolve(
        &self,
        organization_id: &str,
        requests: &[PricingRequest],
        has_override_permission: bool,
        effective_date: NaiveDate,
        currency: Option<&Currency>,
    ) -> EngineResult<PricingResult> {
        let Some(card) = self.active_rate_card(organization_id, effective_date).await? else {
            warn!(
                organization_id,
                date = %effective_date,
                lines = requests.len(),
                "No active rate card"
            );
            let failure = PricingFailure::NoActiveRateCard {
                date: effective_date,
            };
            let errors = requests
                .iter()
                .map(|request| PricingLineError::new(request, &failure))
                .collect();
            return Ok(PricingResult::new(Vec::new(), errors));
        };

        let items = self.card_items(organization_id, &card.id).await?;
        let currency = currency.unwrap_or(&card.currency);
        let ctx = PricingContext {
            has_override_permission,
            effective_date,
            currency,
            defaults: &self.defaults,
        };

        let mut results = Vec::with_capacity(requests.len());
        let mut errors = Vec::new();

        for request in requests {
            let coded = match request.item_code.as_deref() {
                Some(code) if !code.trim().is_empty() => {
                    self.items_by_code(organization_id, &card.id, code).await?
                }
                _ => Vec::new(),
            };
            let candidates = LineCandidates {
                card: &card,
                items: &items,
                by_code: coded.iter().find(|item| item.is_effective_on(effective_date)),
            };

            match resolve_line(request, candidates, ctx) {
                Ok(price) => results.push(price),
                Err(failure) => {
                    debug!(
                        line_number = request.line_number,
                        reason = %failure,
                        "Line not priced"
                    );
                    errors.push(PricingLineError::new(request, &failure));
                }
            }
        }

        debug!(
            organization_id,
            rate_card_id = %card.id,
            priced = results.len(),
            failed = errors.len(),
            "Pricing resolved"
        );

        Ok(PricingResult::new(results, errors))
    }

    /// The organization's active card on `date`, cached per date.
    pub async fn active_rate_card(
        &self,
        organization_id: &str,
        date: NaiveDate,
    ) -> EngineResult<Option<RateCard>> {
        let key = cache::active_card_key(organization_id, date);
        if let Some(card) = cache::get_json::<Option<RateCard>>(self.cache.as_ref(), &key).await {
            return Ok(card);
        }

        let cards = {
            let mut session = self.db.session().await?;
            session.rate_cards().list_active_cards(organization_id).await?
        };
        let card = select_active_rate_card(&cards, date).cloned();

        cache::set_json(self.cache.as_ref(), &key, &card, self.active_card_ttl).await;
        Ok(card)
    }

    async fn card_items(
        &self,
        organization_id: &str,
        rate_card_id: &str,
    ) -> EngineResult<Vec<RateCardItem>> {
        let key = cache::card_items_key(organization_id, rate_card_id);
        if let Some(items) = cache::get_json::<Vec<RateCardItem>>(self.cache.as_ref(), &key).await {
            return Ok(items);
        }

        let items = {
            let mut session = self.db.session().await?;
            session.rate_cards().list_items(rate_card_id).await?
        };

        cache::set_json(self.cache.as_ref(), &key, &items, self.items_ttl).await;
        Ok(items)
    }

    async fn items_by_code(
        &self,
        organization_id: &str,
        rate_card_id: &str,
        item_code: &str,
    ) -> EngineResult<Vec<RateCardItem>> {
        let key = cache::item_code_key(organization_id, rate_card_id, item_code);
        if let Some(items) = cache::get_json::<Vec<RateCardItem>>(self.cache.as_ref(), &key).await {
            return Ok(items);
        }

        let items = {
            let mut session = self.db.session().await?;
            session
                .rate_cards()
                .find_items_by_code(rate_card_id, item_code)
                .await?
        };

        cache::set_json(self.cache.as_ref(), &key, &items, self.items_ttl).await;
        Ok(items)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
