//! # Line and Quote Calculator
//!
//! Turns quantities, prices, discounts and tax rates into the monetary
//! amounts stored on lines and quotes.
//!
//! ## Calculation Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  PER LINE                                                               │
//! │                                                                         │
//! │   quantity × unit_price ──► subtotal (rounded)                         │
//! │                                │                                        │
//! │          percentage discounts ─┤  applied first, on the running base   │
//! │      fixed / per-unit discounts┤  then, in the order given             │
//! │                                ▼  (never below zero)                    │
//! │                          discounted base                                │
//! │                                │                                        │
//! │      tax-inclusive or 0 rate? ─┼── yes ──► tax = 0                     │
//! │                                └── no  ──► tax = base × rate (rounded) │
//! │                                                                         │
//! │   total = discounted base + tax                                        │
//! │                                                                         │
//! │  PER QUOTE                                                              │
//! │                                                                         │
//! │   subtotal = Σ line.subtotal                                           │
//! │   discount = Σ line.discount + quote discount on Σ line net            │
//! │   tax      = Σ line.tax                                                │
//! │   total    = subtotal − discount + tax                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every component is rounded to the currency before it is summed, so the
//! stored components always add up exactly.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::money::{Currency, Money};
use crate::types::{Discount, DiscountType, Quote, TaxRate};

/// Result of a calculation step; `Err` only when an amount overflows.
pub type CalcResult<T> = Result<T, ValidationError>;

fn overflow(field: &str) -> ValidationError {
    ValidationError::Overflow {
        field: field.to_string(),
    }
}

// =============================================================================
// Line Amounts
// =============================================================================

/// Computed amounts for one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAmounts {
    /// quantity × unit_price.
    pub subtotal: Money,
    /// Sum of all line discounts, at most `subtotal`.
    pub discount: Money,
    /// subtotal − discount; what tax is charged on.
    pub net: Money,
    pub tax: Money,
    /// net + tax.
    pub total: Money,
}

/// Calculates the amounts of one line.
///
/// Tax is not added when `tax_inclusive` is set or the rate is zero.
pub fn calculate_line(
    quantity: Decimal,
    unit_price: Money,
    tax_rate: TaxRate,
    tax_inclusive: bool,
    discounts: &[Discount],
    currency: &Currency,
) -> CalcResult<LineAmounts> {
    let subtotal = unit_price
        .checked_mul(quantity)
        .ok_or_else(|| overflow("subtotal"))?
        .round(currency);
    let discount = apply_discounts(subtotal, quantity, discounts, currency)?;
    let net = subtotal - discount;

    let tax = if tax_inclusive || tax_rate.is_zero() {
        Money::zero().round(currency)
    } else {
        net.checked_tax(tax_rate, currency)
            .ok_or_else(|| overflow("tax_amount"))?
    };

    Ok(LineAmounts {
        subtotal,
        discount,
        net,
        tax,
        total: net.checked_add(tax).ok_or_else(|| overflow("total_amount"))?,
    })
}

/// Total discount on `base` for the given discounts.
///
/// Percentages are applied first (each on the base left by the previous
/// one), then fixed and per-unit discounts in their given order. Each step is
/// rounded and clamped so the running base never goes below zero.
///
/// ## Example
/// ```rust
/// use quote_core::calculator::apply_discounts;
/// use quote_core::money::{Currency, Money};
/// use quote_core::types::Discount;
/// use rust_decimal::Decimal;
///
/// let usd = Currency::new("USD").unwrap();
/// let base = Money::new(Decimal::from(200));
/// let discounts = [
///     Discount::fixed_amount(Decimal::from(20)),
///     Discount::percentage(Decimal::from(10)),
/// ];
/// // 10% of 200 = 20, then 20 off the remaining 180
/// let off = apply_discounts(base, Decimal::from(4), &discounts, &usd).unwrap();
/// assert_eq!(off.to_string(), "40.00");
/// ```
pub fn apply_discounts(
    base: Money,
    quantity: Decimal,
    discounts: &[Discount],
    currency: &Currency,
) -> CalcResult<Money> {
    let ordered = discounts
        .iter()
        .filter(|d| d.discount_type == DiscountType::Percentage)
        .chain(
            discounts
                .iter()
                .filter(|d| d.discount_type != DiscountType::Percentage),
        );

    let mut remaining = base.non_negative();
    let mut total = Money::zero().round(currency);

    for discount in ordered {
        let value = discount.value.max(Decimal::ZERO);
        let amount = match discount.discount_type {
            DiscountType::Percentage => remaining.checked_percentage(value, currency),
            DiscountType::FixedAmount => Some(Money::new(value).round(currency)),
            DiscountType::PerUnit => Money::new(value)
                .checked_mul(quantity)
                .map(|m| m.round(currency)),
        }
        .ok_or_else(|| overflow("discount_amount"))?
        .min(remaining);

        // amount <= remaining <= base, so neither step can overflow
        remaining -= amount;
        total += amount;
    }

    Ok(total)
}

/// Quote-level discount on the summed line net amounts.
///
/// A per-unit discount has no quantity at quote level and contributes
/// nothing; input validation rejects it before it gets here.
pub fn quote_discount(
    net: Money,
    discount: Option<&Discount>,
    currency: &Currency,
) -> CalcResult<Money> {
    let Some(discount) = discount else {
        return Ok(Money::zero().round(currency));
    };
    let value = discount.value.max(Decimal::ZERO);
    let base = net.non_negative();

    Ok(match discount.discount_type {
        DiscountType::Percentage => base
            .checked_percentage(value, currency)
            .ok_or_else(|| overflow("discount_amount"))?
            .min(base),
        DiscountType::FixedAmount => Money::new(value).round(currency).min(base),
        DiscountType::PerUnit => Money::zero().round(currency),
    })
}

// =============================================================================
// Quote Totals
// =============================================================================

/// Aggregated amounts of a quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteTotals {
    pub subtotal: Money,
    pub discount: Money,
    pub tax: Money,
    pub total: Money,
}

fn checked_sum<'a>(
    lines: &'a [LineAmounts],
    field: &str,
    pick: impl Fn(&'a LineAmounts) -> Money,
) -> CalcResult<Money> {
    lines
        .iter()
        .try_fold(Money::zero(), |acc, line| acc.checked_add(pick(line)))
        .ok_or_else(|| overflow(field))
}

/// Sums line amounts and applies the quote-level discount.
pub fn calculate_quote_totals(
    lines: &[LineAmounts],
    discount: Option<&Discount>,
    currency: &Currency,
) -> CalcResult<QuoteTotals> {
    let subtotal = checked_sum(lines, "subtotal", |l| l.subtotal)?.round(currency);
    let line_discount = checked_sum(lines, "discount_amount", |l| l.discount)?.round(currency);
    let net = checked_sum(lines, "subtotal", |l| l.net)?;
    let tax = checked_sum(lines, "tax_amount", |l| l.tax)?.round(currency);

    let discount = line_discount
        .checked_add(quote_discount(net, discount, currency)?)
        .ok_or_else(|| overflow("discount_amount"))?
        .round(currency);
    let total = subtotal
        .checked_sub(discount)
        .and_then(|m| m.checked_add(tax))
        .ok_or_else(|| overflow("total_amount"))?;

    Ok(QuoteTotals {
        subtotal,
        discount,
        tax,
        total,
    })
}

/// Recomputes every line's amounts and the quote totals in place.
///
/// This is the only writer of the amount fields, which keeps
/// `total == subtotal − discount + tax` for anything persisted. On overflow
/// nothing is written and the error names the offending line.
pub fn recalculate(quote: &mut Quote) -> CalcResult<QuoteTotals> {
    let currency = quote.currency.clone();

    let amounts = quote
        .line_items
        .iter()
        .enumerate()
        .map(|(index, line)| {
            calculate_line(
                line.quantity,
                line.unit_price,
                line.tax_rate,
                line.tax_inclusive,
                line.discount.as_slice(),
                &currency,
            )
            .map_err(|e| e.nested(&format!("line_items[{}]", index)))
        })
        .collect::<CalcResult<Vec<_>>>()?;

    let totals = calculate_quote_totals(&amounts, quote.discount.as_ref(), &currency)?;

    for (line, computed) in quote.line_items.iter_mut().zip(&amounts) {
        line.subtotal = computed.subtotal;
        line.discount_amount = computed.discount;
        line.tax_amount = computed.tax;
        line.total_amount = computed.total;
    }
    quote.subtotal = totals.subtotal;
    quote.discount_amount = totals.discount;
    quote.tax_amount = totals.tax;
    quote.total_amount = totals.total;
    Ok(totals)
}

// =============================================================================
// Unit Tests
// =============================================================================
