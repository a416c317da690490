//! # Seed Data Generator
//!
//! Creates a default rate card with sample items for development.
//!
//! ## Usage
//! ```bash
//! # Seed organization "demo" into ./quotes_dev.db
//! cargo run -p quote-db --bin seed
//!
//! # Choose organization and database path
//! cargo run -p quote-db --bin seed -- --org acme --db ./data/quotes.db
//! ```
//!
//! ## Generated Items
//! One item per (category, role) pair below, each with a SKU
//! `{CATEGORY}-{ROLE}` and an hourly or fixed unit.

use anyhow::{bail, Context, Result};
use chrono::{Datelike, NaiveDate, Utc};
use quote_core::{Currency, Money, RateCard, RateCardItem, TaxClass};
use quote_db::{Database, DbConfig, Repositories};
use rust_decimal::Decimal;
use std::env;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// (category id, display name, unit, tax class)
const CATEGORIES: &[(&str, &str, &str, TaxClass)] = &[
    ("consulting", "Consulting", "hour", TaxClass::Standard),
    ("installation", "Installation", "hour", TaxClass::Standard),
    ("design", "Design", "hour", TaxClass::Standard),
    ("training", "Training", "session", TaxClass::Reduced),
    ("travel", "Travel", "trip", TaxClass::Exempt),
];

/// (role id, SKU suffix, rate multiplier in percent)
const ROLES: &[(Option<&str>, &str, i64)] = &[
    (None, "STD", 100),
    (Some("senior"), "SNR", 150),
    (Some("junior"), "JNR", 70),
];

/// Base rates in cents, indexed like `CATEGORIES`.
const BASE_RATES: &[i64] = &[15000, 9500, 12000, 45000, 20000];

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();

    let mut organization_id = String::from("demo");
    let mut db_path = String::from("./quotes_dev.db");
    let mut currency = String::from("USD");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--org" | "-o" => {
                if i + 1 < args.len() {
                    organization_id = args[i + 1].clone();
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--currency" | "-c" => {
                if i + 1 < args.len() {
                    currency = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Quotation Engine Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -o, --org <ID>        Organization id (default: demo)");
                println!("  -d, --db <PATH>       Database file path (default: ./quotes_dev.db)");
                println!("  -c, --currency <CODE> Rate card currency (default: USD)");
                println!("  -h, --help            Show this help message");
                return Ok(());
            }
            other => bail!("unknown argument: {}", other),
        }
        i += 1;
    }

    let currency = Currency::new(&currency).context("invalid --currency")?;

    info!(db = %db_path, organization_id = %organization_id, "Seeding rate card");

    let db = Database::new(DbConfig::new(&db_path))
        .await
        .context("opening database")?;

    {
        let mut session = db.session().await?;
        let existing = session.rate_cards().list_active_cards(&organization_id).await?;
        if !existing.is_empty() {
            warn!(
                cards = existing.len(),
                "Organization already has active rate cards, skipping seed"
            );
            return Ok(());
        }
    }

    let now = Utc::now();
    let effective_from = NaiveDate::from_ymd_opt(now.year(), 1, 1).context("building start date")?;

    let card = RateCard {
        id: Uuid::new_v4().to_string(),
        organization_id: organization_id.clone(),
        name: format!("Standard rates {}", now.year()),
        currency: currency.clone(),
        effective_from,
        effective_until: None,
        is_default: true,
        is_active: true,
        created_at: now,
        updated_at: now,
    };

    let mut uow = db.begin().await?;
    uow.rate_cards().insert_card(&card).await?;

    let mut generated = 0;
    for (index, (category_id, name, unit, tax_class)) in CATEGORIES.iter().enumerate() {
        for (role_id, suffix, multiplier) in ROLES {
            let base = BASE_RATES[index % BASE_RATES.len()];
            let item = RateCardItem {
                id: Uuid::new_v4().to_string(),
                rate_card_id: card.id.clone(),
                organization_id: organization_id.clone(),
                service_category_id: category_id.to_string(),
                role_id: role_id.map(str::to_string),
                item_code: Some(format!("{}-{}", category_id.to_uppercase(), suffix)),
                name: Some(match role_id {
                    Some(role) => format!("{} {}", name, role),
                    None => name.to_string(),
                }),
                base_rate: Money::new(Decimal::new(base * multiplier / 100, 2)),
                currency: currency.clone(),
                tax_class: *tax_class,
                unit: unit.to_string(),
                effective_from: None,
                effective_until: None,
                is_active: true,
                created_at: now,
                updated_at: now,
            };
            uow.rate_cards().insert_item(&item).await?;
            generated += 1;
        }
    }
    uow.commit().await?;

    info!(
        rate_card_id = %card.id,
        items = generated,
        "Seed complete"
    );

    Ok(())
}
