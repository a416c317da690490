//! # Pricing Rules
//!
//! Pure part of price resolution: which rate card is active, which item a
//! line matches, and what price/tax/unit that yields. Loading cards and
//! items (and caching them) happens in the engine.
//!
//! ## Priority Chain (per line)
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. explicit unit_price AND override permission ──► use verbatim       │
//! │  2. item_code         ──► item with that code ──miss──► description    │
//! │  3. service category  ──► item in category    ──miss──► description    │
//! │     (role-specific item preferred when a role is given)                │
//! │  4. description only  ──► normalised name match                        │
//! │                                                                         │
//! │  nothing matched ──► PricingLineError (batch continues)                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::money::{Currency, Money};
use crate::types::{PricingSource, RateCard, RateCardItem, TaxClass, TaxRate};
use crate::DEFAULT_UNIT;

// =============================================================================
// Requests and Results
// =============================================================================

/// What a line supplies for price resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingRequest {
    pub line_number: u32,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Option<Money>,
    pub tax_rate: Option<TaxRate>,
    pub unit: Option<String>,
    pub item_code: Option<String>,
    pub service_category_id: Option<String>,
    pub role_id: Option<String>,
}

/// Which rule of the chain produced a price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
    Explicit,
    ItemCode,
    ServiceCategory,
    Description,
}

/// A successfully resolved line price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPrice {
    pub line_number: u32,
    pub unit_price: Money,
    pub tax_rate: TaxRate,
    pub unit: String,
    pub source: PricingSource,
    pub rule: MatchRule,
    pub rate_card_id: Option<String>,
    pub rate_card_item_id: Option<String>,
    pub service_category_id: Option<String>,
    pub item_code: Option<String>,
}

/// Why a line could not be priced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PricingFailure {
    NoActiveRateCard { date: NaiveDate },
    NoMatch { tried: Vec<MatchRule> },
    CurrencyMismatch { item: Currency, quote: Currency },
}

impl fmt::Display for PricingFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PricingFailure::NoActiveRateCard { date } => {
                write!(f, "No active rate card for {}", date)
            }
            PricingFailure::NoMatch { tried } => {
                let tried = tried
                    .iter()
                    .map(|r| match r {
                        MatchRule::Explicit => "explicit price",
                        MatchRule::ItemCode => "item code",
                        MatchRule::ServiceCategory => "service category",
                        MatchRule::Description => "description",
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "No rate card item matched (tried {})", tried)
            }
            PricingFailure::CurrencyMismatch { item, quote } => {
                write!(f, "Rate card item is priced in {} but quote is in {}", item, quote)
            }
        }
    }
}

/// Per-line resolution error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingLineError {
    pub line_number: u32,
    pub description: String,
    pub reason: String,
}

impl PricingLineError {
    pub fn new(request: &PricingRequest, failure: &PricingFailure) -> Self {
        PricingLineError {
            line_number: request.line_number,
            description: request.description.clone(),
            reason: failure.to_string(),
        }
    }
}

/// Outcome of resolving a batch of lines. `success` iff `errors` is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingResult {
    pub success: bool,
    pub results: Vec<ResolvedPrice>,
    pub errors: Vec<PricingLineError>,
}

impl PricingResult {
    pub fn new(results: Vec<ResolvedPrice>, errors: Vec<PricingLineError>) -> Self {
        PricingResult {
            success: errors.is_empty(),
            results,
            errors,
        }
    }
}

// =============================================================================
// Defaults
// =============================================================================

/// Rates per tax class plus the fallback unit of measure.
#[derive(Debug, Clone, PartialEq)]
pub struct PricingDefaults {
    pub standard_rate: TaxRate,
    pub reduced_rate: TaxRate,
    pub default_unit: String,
}

impl PricingDefaults {
    pub fn rate_for(&self, class: TaxClass) -> TaxRate {
        match class {
            TaxClass::Standard => self.standard_rate,
            TaxClass::Reduced => self.reduced_rate,
            TaxClass::Zero | TaxClass::Exempt => TaxRate::zero(),
        }
    }
}

impl Default for PricingDefaults {
    fn default() -> Self {
        PricingDefaults {
            standard_rate: TaxRate::from_bps(1500),
            reduced_rate: TaxRate::from_bps(500),
            default_unit: DEFAULT_UNIT.to_string(),
        }
    }
}

// =============================================================================
// Rate Card Selection
// =============================================================================

/// The default active card covering `date`, latest `effective_from` first.
pub fn select_active_rate_card(cards: &[RateCard], date: NaiveDate) -> Option<&RateCard> {
    cards
        .iter()
        .filter(|card| card.is_active && card.is_default && card.covers(date))
        .max_by(|a, b| {
            a.effective_from
                .cmp(&b.effective_from)
                .then(a.created_at.cmp(&b.created_at))
        })
}

// =============================================================================
// Item Matching
// =============================================================================

/// Lower-cases and collapses every run of non-alphanumerics to one space.
pub fn normalize_text(text: &str) -> String {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Effective item whose code equals `code` (case-insensitive).
pub fn match_by_code<'a>(
    items: &'a [RateCardItem],
    code: &str,
    date: NaiveDate,
) -> Option<&'a RateCardItem> {
    let code = code.trim();
    items.iter().find(|item| {
        item.is_effective_on(date)
            && item
                .item_code
                .as_deref()
                .is_some_and(|c| c.eq_ignore_ascii_case(code))
    })
}

/// Item in `category`; with a role, an item for that role beats a generic
/// one, otherwise a generic item beats role-specific ones.
pub fn match_by_category<'a>(
    items: &'a [RateCardItem],
    category: &str,
    role: Option<&str>,
    date: NaiveDate,
) -> Option<&'a RateCardItem> {
    let in_category = || {
        items
            .iter()
            .filter(move |item| item.is_effective_on(date) && item.service_category_id == category)
    };

    if let Some(role) = role {
        if let Some(item) = in_category().find(|item| item.role_id.as_deref() == Some(role)) {
            return Some(item);
        }
    }

    in_category()
        .find(|item| item.role_id.is_none())
        .or_else(|| if role.is_none() { in_category().next() } else { None })
}

/// Matches a line description against item names.
///
/// ```text
/// "Senior consultant - hours"   normalised: "senior consultant hours"
///
/// 1. exact normalised name           "senior consultant hours"  ✓
/// 2. name contained in description   "senior consultant"        ✓ longest wins
///    (or description in name)        "consultant"               (shorter)
/// 3. two longest candidates tie ──► no match (ambiguous)
/// ```
pub fn match_by_description<'a>(
    items: &'a [RateCardItem],
    description: &str,
    date: NaiveDate,
) -> Option<&'a RateCardItem> {
    let target = normalize_text(description);
    if target.is_empty() {
        return None;
    }

    let named: Vec<(&RateCardItem, String)> = items
        .iter()
        .filter(|item| item.is_effective_on(date))
        .filter_map(|item| {
            let name = normalize_text(item.name.as_deref()?);
            (!name.is_empty()).then_some((item, name))
        })
        .collect();

    if let Some((item, _)) = named.iter().find(|(_, name)| *name == target) {
        return Some(*item);
    }

    let contains_word_run = |haystack: &str, needle: &str| {
        format!(" {} ", haystack).contains(&format!(" {} ", needle))
    };

    let mut candidates: Vec<&(&RateCardItem, String)> = named
        .iter()
        .filter(|(_, name)| contains_word_run(&target, name) || contains_word_run(name, &target))
        .collect();
    candidates.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

    match candidates.as_slice() {
        [] => None,
        [only] => Some(only.0),
        [first, second, ..] if first.1.len() > second.1.len() => Some(first.0),
        _ => None,
    }
}

// =============================================================================
// Price Construction
// =============================================================================

/// Price taken verbatim from the request; tax rate and unit defaulted.
///
/// `None` when the request carries no unit price.
pub fn explicit_price(
    request: &PricingRequest,
    rate_card_id: Option<&str>,
    defaults: &PricingDefaults,
) -> Option<ResolvedPrice> {
    let unit_price = request.unit_price?;
    Some(ResolvedPrice {
        line_number: request.line_number,
        unit_price,
        tax_rate: request.tax_rate.unwrap_or(defaults.standard_rate),
        unit: request
            .unit
            .clone()
            .unwrap_or_else(|| defaults.default_unit.clone()),
        source: PricingSource::Explicit,
        rule: MatchRule::Explicit,
        rate_card_id: rate_card_id.map(str::to_string),
        rate_card_item_id: None,
        service_category_id: request.service_category_id.clone(),
        item_code: request.item_code.clone(),
    })
}

/// Price from a matched item. A caller-supplied tax rate beats the item's
/// tax class; a caller-supplied unit beats the item's unit.
pub fn price_from_item(
    request: &PricingRequest,
    item: &RateCardItem,
    rule: MatchRule,
    quote_currency: &Currency,
    defaults: &PricingDefaults,
) -> Result<ResolvedPrice, PricingFailure> {
    if &item.currency != quote_currency {
        return Err(PricingFailure::CurrencyMismatch {
            item: item.currency.clone(),
            quote: quote_currency.clone(),
        });
    }

    Ok(ResolvedPrice {
        line_number: request.line_number,
        unit_price: item.base_rate,
        tax_rate: request
            .tax_rate
            .unwrap_or_else(|| defaults.rate_for(item.tax_class)),
        unit: request.unit.clone().unwrap_or_else(|| item.unit.clone()),
        source: PricingSource::RateCard,
        rule,
        rate_card_id: Some(item.rate_card_id.clone()),
        rate_card_item_id: Some(item.id.clone()),
        service_category_id: Some(item.service_category_id.clone()),
        item_code: item.item_code.clone(),
    })
}

// =============================================================================
// Chain
// =============================================================================

/// Everything a line can be matched against on the active card.
#[derive(Debug, Clone, Copy)]
pub struct LineCandidates<'a> {
    pub card: &'a RateCard,
    /// Items of `card`.
    pub items: &'a [RateCardItem],
    /// Result of the (separately cached) code lookup for this line.
    pub by_code: Option<&'a RateCardItem>,
}

/// Resolution settings shared by every line of a batch.
#[derive(Debug, Clone, Copy)]
pub struct PricingContext<'a> {
    pub has_override_permission: bool,
    pub effective_date: NaiveDate,
    pub currency: &'a Currency,
    pub defaults: &'a PricingDefaults,
}

/// Runs the priority chain for one line against the active card.
pub fn resolve_line(
    request: &PricingRequest,
    candidates: LineCandidates<'_>,
    ctx: PricingContext<'_>,
) -> Result<ResolvedPrice, PricingFailure> {
    if ctx.has_override_permission {
        if let Some(price) = explicit_price(request, Some(&candidates.card.id), ctx.defaults) {
            return Ok(price);
        }
    }

    let date = ctx.effective_date;
    let mut tried = Vec::new();

    let matched = if let Some(code) = request.item_code.as_deref() {
        tried.push(MatchRule::ItemCode);
        candidates
            .by_code
            .filter(|item| item.is_effective_on(date))
            .or_else(|| match_by_code(candidates.items, code, date))
            .map(|item| (item, MatchRule::ItemCode))
    } else if let Some(category) = request.service_category_id.as_deref() {
        tried.push(MatchRule::ServiceCategory);
        match_by_category(candidates.items, category, request.role_id.as_deref(), date)
            .map(|item| (item, MatchRule::ServiceCategory))
    } else {
        None
    };

    let matched = matched.or_else(|| {
        tried.push(MatchRule::Description);
        match_by_description(candidates.items, &request.description, date)
            .map(|item| (item, MatchRule::Description))
    });

    match matched {
        Some((item, rule)) => price_from_item(request, item, rule, ctx.currency, ctx.defaults),
        None => Err(PricingFailure::NoMatch { tried }),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
