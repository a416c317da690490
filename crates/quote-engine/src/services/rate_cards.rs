//! Rate-card administration.
//!
//! Every write invalidates the organization's whole rate-card cache prefix
//! after commit. An organization may hold several default cards; pricing
//! uses the one with the latest `effective_from` covering the date. Making a
//! card the default only clears the flag on other defaults that start on the
//! same day, in the same transaction.

use std::sync::Arc;

use chrono::Utc;
use quote_core::input::{
    CreateRateCardInput, RateCardItemInput, UpdateRateCardInput, UpdateRateCardItemInput,
};
use quote_core::{CoreError, RateCard, RateCardItem};
use quote_db::{Database, Repositories};
use tracing::info;
use uuid::Uuid;

use crate::audit::{self, to_audit_value, AuditEntry, AuditSink};
use crate::cache::{self, Cache};
use crate::context::CallerContext;
use crate::error::EngineResult;

#[derive(Clone)]
pub struct RateCardService {
    db: Database,
    cache: Arc<dyn Cache>,
    audit: Arc<dyn AuditSink>,
    default_unit: String,
}

impl RateCardService {
    pub fn new(
        db: Database,
        cache: Arc<dyn Cache>,
        audit: Arc<dyn AuditSink>,
        default_unit: impl Into<String>,
    ) -> Self {
        RateCardService {
            db,
            cache,
            audit,
            default_unit: default_unit.into(),
        }
    }

    pub async fn create_rate_card(
        &self,
        caller: &CallerContext,
        input: CreateRateCardInput,
    ) -> EngineResult<RateCard> {
        input.validate()?;
        let now = Utc::now();
        let card = input.into_rate_card(Uuid::new_v4().to_string(), &caller.organization_id, now);

        let mut uow = self.db.begin().await?;
        uow.rate_cards().insert_card(&card).await?;
        if card.is_default {
            uow.rate_cards()
                .clear_default(&caller.organization_id, &card.id, card.effective_from, now)
                .await?;
        }
        uow.commit().await?;

        info!(rate_card_id = %card.id, organization_id = %card.organization_id, "Rate card created");
        self.after_write(caller, "rate_card.created", "rate_card", &card.id, None, to_audit_value(&card))
            .await;
        Ok(card)
    }

    pub async fn update_rate_card(
        &self,
        caller: &CallerContext,
        rate_card_id: &str,
        input: UpdateRateCardInput,
    ) -> EngineResult<RateCard> {
        let now = Utc::now();
        let mut uow = self.db.begin().await?;
        let mut card = uow
            .rate_cards()
            .find_card(&caller.organization_id, rate_card_id)
            .await?
            .ok_or_else(|| CoreError::RateCardNotFound(rate_card_id.to_string()))?;
        let before = to_audit_value(&card);

        input.apply_to(&mut card, now)?;
        uow.rate_cards().update_card(&card).await?;
        if card.is_default {
            uow.rate_cards()
                .clear_default(&caller.organization_id, &card.id, card.effective_from, now)
                .await?;
        }
        uow.commit().await?;

        info!(rate_card_id = %card.id, "Rate card updated");
        self.after_write(caller, "rate_card.updated", "rate_card", &card.id, before, to_audit_value(&card))
            .await;
        Ok(card)
    }

    pub async fn create_item(
        &self,
        caller: &CallerContext,
        rate_card_id: &str,
        input: RateCardItemInput,
    ) -> EngineResult<RateCardItem> {
        input.validate()?;
        let now = Utc::now();

        let mut uow = self.db.begin().await?;
        let card = uow
            .rate_cards()
            .find_card(&caller.organization_id, rate_card_id)
            .await?
            .ok_or_else(|| CoreError::RateCardNotFound(rate_card_id.to_string()))?;
        let item = input.into_item(Uuid::new_v4().to_string(), &card, &self.default_unit, now);
        uow.rate_cards().insert_item(&item).await?;
        uow.commit().await?;

        info!(rate_card_id = %card.id, item_id = %item.id, "Rate card item created");
        self.after_write(caller, "rate_card_item.created", "rate_card_item", &item.id, None, to_audit_value(&item))
            .await;
        Ok(item)
    }

    pub async fn update_item(
        &self,
        caller: &CallerContext,
        item_id: &str,
        input: UpdateRateCardItemInput,
    ) -> EngineResult<RateCardItem> {
        let now = Utc::now();
        let mut uow = self.db.begin().await?;
        let mut item = uow
            .rate_cards()
            .find_item(&caller.organization_id, item_id)
            .await?
            .ok_or_else(|| CoreError::RateCardItemNotFound(item_id.to_string()))?;
        let before = to_audit_value(&item);

        input.apply_to(&mut item, now)?;
        uow.rate_cards().update_item(&item).await?;
        uow.commit().await?;

        info!(item_id = %item.id, "Rate card item updated");
        self.after_write(
            caller,
            "rate_card_item.updated",
            "rate_card_item",
            &item.id,
            before,
            to_audit_value(&item),
        )
        .await;
        Ok(item)
    }

    /// Items of one of the caller's cards.
    pub async fn list_items(
        &self,
        caller: &CallerContext,
        rate_card_id: &str,
    ) -> EngineResult<Vec<RateCardItem>> {
        let mut session = self.db.session().await?;
        session
            .rate_cards()
            .find_card(&caller.organization_id, rate_card_id)
            .await?
            .ok_or_else(|| CoreError::RateCardNotFound(rate_card_id.to_string()))?;
        Ok(session.rate_cards().list_items(rate_card_id).await?)
    }

    async fn after_write(
        &self,
        caller: &CallerContext,
        action: &str,
        entity_type: &str,
        entity_id: &str,
        old_values: Option<serde_json::Value>,
        new_values: Option<serde_json::Value>,
    ) {
        cache::invalidate_organization(self.cache.as_ref(), &caller.organization_id).await;
        audit::emit(
            self.audit.as_ref(),
            AuditEntry {
                action,
                entity_type,
                entity_id,
                organization_id: &caller.organization_id,
                user_id: &caller.user_id,
                old_values,
                new_values,
                metadata: None,
            },
            Utc::now(),
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::StoreAuditSink;
    use crate::cache::MemoryCache;
    use crate::error::ErrorCode;
    use crate::config::EngineConfig;
    use crate::services::pricing::PricingResolver;
    use crate::services::test_support::{database, request};
    use chrono::NaiveDate;
    use quote_core::{Currency, Money, TaxClass};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn card_input(name: &str, is_default: bool) -> CreateRateCardInput {
        card_input_from(name, is_default, 2025)
    }

    fn card_input_from(name: &str, is_default: bool, year: i32) -> CreateRateCardInput {
        CreateRateCardInput {
            name: name.to_string(),
            currency: Currency::new("USD").unwrap(),
            effective_from: NaiveDate::from_ymd_opt(year, 1, 1).unwrap(),
            effective_until: None,
            is_default,
            is_active: true,
        }
    }

    fn item_input(code: &str) -> RateCardItemInput {
        RateCardItemInput {
            service_category_id: "consulting".to_string(),
            role_id: None,
            item_code: Some(code.to_string()),
            name: Some("Consulting".to_string()),
            base_rate: dec!(150),
            tax_class: TaxClass::Standard,
            unit: None,
            effective_from: None,
            effective_until: None,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn test_default_flag_is_unique_and_cache_busted() {
        let db = database().await;
        let cache = Arc::new(MemoryCache::new());
        let service = RateCardService::new(
            db.clone(),
            cache.clone(),
            Arc::new(StoreAuditSink::new(db.clone())),
            "unit",
        );
        let caller = CallerContext::new("acme", "admin");

        let first = service.create_rate_card(&caller, card_input("2025", true)).await.unwrap();

        cache
            .set("ratecard:acme:active:2025-03-01", "null", Duration::from_secs(60))
            .await
            .unwrap();
        cache
            .set("ratecard:globex:active:2025-03-01", "null", Duration::from_secs(60))
            .await
            .unwrap();

        let second = service.create_rate_card(&caller, card_input("2025 v2", true)).await.unwrap();

        assert!(cache.get("ratecard:acme:active:2025-03-01").await.unwrap().is_none());
        assert!(cache.get("ratecard:globex:active:2025-03-01").await.unwrap().is_some());

        let mut session = db.session().await.unwrap();
        let first = session.rate_cards().find_card("acme", &first.id).await.unwrap().unwrap();
        let second = session.rate_cards().find_card("acme", &second.id).await.unwrap().unwrap();
        assert!(!first.is_default);
        assert!(second.is_default);

        let events = session
            .audit()
            .list_for_entity("acme", "rate_card", &second.id)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, "rate_card.created");
    }

    #[tokio::test]
    async fn test_future_default_keeps_current_card_pricing() {
        let db = database().await;
        let cache = Arc::new(MemoryCache::new());
        let service = RateCardService::new(
            db.clone(),
            cache.clone(),
            Arc::new(StoreAuditSink::new(db.clone())),
            "unit",
        );
        let resolver = PricingResolver::new(db.clone(), cache, &EngineConfig::default());
        let caller = CallerContext::new("acme", "admin");
        let mid_2026 = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();

        let current = service.create_rate_card(&caller, card_input("2025", true)).await.unwrap();
        service.create_item(&caller, &current.id, item_input("CONS-STD")).await.unwrap();

        let before = resolver
            .resolve("acme", &[request(1, "Consulting")], false, mid_2026, None)
            .await
            .unwrap();
        assert!(before.success);

        let scheduled = service
            .create_rate_card(&caller, card_input_from("2030", true, 2030))
            .await
            .unwrap();

        let after = resolver
            .resolve("acme", &[request(1, "Consulting")], false, mid_2026, None)
            .await
            .unwrap();
        assert!(after.success);
        assert_eq!(after.results[0].rate_card_id.as_deref(), Some(current.id.as_str()));

        let mut session = db.session().await.unwrap();
        let current = session.rate_cards().find_card("acme", &current.id).await.unwrap().unwrap();
        let scheduled = session.rate_cards().find_card("acme", &scheduled.id).await.unwrap().unwrap();
        assert!(current.is_default);
        assert!(scheduled.is_default);
    }

    #[tokio::test]
    async fn test_item_create_update_and_missing_card() {
        let db = database().await;
        let service = RateCardService::new(
            db.clone(),
            Arc::new(MemoryCache::new()),
            Arc::new(StoreAuditSink::new(db.clone())),
            "unit",
        );
        let caller = CallerContext::new("acme", "admin");
        let card = service.create_rate_card(&caller, card_input("2025", true)).await.unwrap();

        let item = service.create_item(&caller, &card.id, item_input("CONS-STD")).await.unwrap();
        assert_eq!(item.unit, "unit");
        assert_eq!(item.currency, card.currency);

        let updated = service
            .update_item(
                &caller,
                &item.id,
                UpdateRateCardItemInput {
                    base_rate: Some(dec!(175.50)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.base_rate, Money::new(dec!(175.50)));

        let items = service.list_items(&caller, &card.id).await.unwrap();
        assert_eq!(items.len(), 1);

        let err = service
            .create_item(&caller, "missing", item_input("X"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::RateCardNotFound);

        let other_org = CallerContext::new("globex", "admin");
        let err = service.list_items(&other_org, &card.id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::RateCardNotFound);
    }
}
