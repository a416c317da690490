//! Engine services.
//!
//! - [`pricing`] - Rate-card price resolution with caching
//! - [`numbering`] - Quote number generation
//! - [`locking`] - Edit locks and version snapshots
//! - [`idempotency`] - Request deduplication
//! - [`rate_cards`] - Rate-card administration
//! - [`quotes`] - The quote orchestrator

pub mod idempotency;
pub mod locking;
pub mod numbering;
pub mod pricing;
pub mod quotes;
pub mod rate_cards;

pub use idempotency::{IdempotencyCheck, IdempotencyContext, IdempotencyService};
pub use locking::LockingService;
pub use numbering::QuoteNumberGenerator;
pub use pricing::PricingResolver;
pub use quotes::QuoteService;
pub use rate_cards::RateCardService;

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{NaiveDate, Utc};
    use quote_core::input::{CreateQuoteInput, LineItemInput};
    use quote_core::pricing::PricingRequest;
    use quote_core::{
        Currency, LineItemType, Metadata, Money, Quote, QuoteStatus, QuoteType, RateCard,
        RateCardItem, TaxClass,
    };
    use quote_db::{Database, DbConfig, Repositories};
    use rust_decimal::Decimal;

    pub async fn database() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    fn usd() -> Currency {
        Currency::new("USD").unwrap()
    }

    pub fn card(id: &str, org: &str, from: NaiveDate, is_default: bool) -> RateCard {
        RateCard {
            id: id.to_string(),
            organization_id: org.to_string(),
            name: format!("Card {}", id),
            currency: usd(),
            effective_from: from,
            effective_until: None,
            is_default,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    /// Unnamed item; set `name` to make it reachable by description.
    pub fn item(
        id: &str,
        card: &RateCard,
        category: &str,
        code: Option<&str>,
        rate: Decimal,
    ) -> RateCardItem {
        RateCardItem {
            id: id.to_string(),
            rate_card_id: card.id.clone(),
            organization_id: card.organization_id.clone(),
            service_category_id: category.to_string(),
            role_id: None,
            item_code: code.map(str::to_string),
            name: None,
            base_rate: Money::new(rate),
            currency: card.currency.clone(),
            tax_class: TaxClass::Standard,
            unit: "hour".to_string(),
            effective_from: None,
            effective_until: None,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    pub async fn seed(db: &Database, card: &RateCard, items: &[RateCardItem]) {
        let mut uow = db.begin().await.unwrap();
        uow.rate_cards().insert_card(card).await.unwrap();
        for item in items {
            uow.rate_cards().insert_item(item).await.unwrap();
        }
        uow.commit().await.unwrap();
    }

    pub fn request(line_number: u32, description: &str) -> PricingRequest {
        PricingRequest {
            line_number,
            description: description.to_string(),
            quantity: Decimal::ONE,
            unit_price: None,
            tax_rate: None,
            unit: None,
            item_code: None,
            service_category_id: None,
            role_id: None,
        }
    }

    pub fn stored_quote(id: &str, org: &str, number: &str) -> Quote {
        let zero = Money::zero().round(&usd());
        Quote {
            id: id.to_string(),
            organization_id: org.to_string(),
            quote_number: number.to_string(),
            customer_id: "customer-1".to_string(),
            project_id: None,
            title: format!("Quote {}", number),
            description: None,
            status: QuoteStatus::Draft,
            quote_type: QuoteType::Standard,
            valid_from: None,
            valid_until: None,
            currency: usd(),
            exchange_rate: Decimal::ONE,
            subtotal: zero,
            discount_amount: zero,
            tax_amount: zero,
            total_amount: zero,
            discount: None,
            notes: None,
            approved_by: None,
            approved_at: None,
            sent_at: None,
            accepted_at: None,
            metadata: Metadata::new(),
            created_by: "user-1".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
            line_items: Vec::new(),
        }
    }

    /// One unit, priced by the rate card.
    pub fn line_input(description: &str) -> LineItemInput {
        LineItemInput {
            line_type: LineItemType::Service,
            description: description.to_string(),
            quantity: Decimal::ONE,
            unit_price: None,
            unit_cost: None,
            unit: None,
            tax_rate: None,
            tax_inclusive: false,
            discount: None,
            service_category_id: None,
            role_id: None,
            item_code: None,
            metadata: Metadata::new(),
        }
    }

    pub fn create_input(line_items: Vec<LineItemInput>) -> CreateQuoteInput {
        CreateQuoteInput {
            customer_id: "customer-1".to_string(),
            project_id: None,
            title: "Office fit-out".to_string(),
            description: None,
            quote_type: QuoteType::Standard,
            valid_from: None,
            valid_until: None,
            currency: usd(),
            exchange_rate: None,
            discount: None,
            notes: None,
            metadata: Metadata::new(),
            line_items,
        }
    }
}
