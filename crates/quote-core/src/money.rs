//! # Money Module
//!
//! Provides the `Money` and `Currency` types for quote amounts.
//!
//! ## Why Decimal Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  In floating point:                                                     │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌ WRONG!                           │
//! │                                                                         │
//! │  Quotes also need fractional quantities (7.5 hours × 120.00/h)          │
//! │  and currencies with 0, 2 or 3 minor digits, so integer cents are       │
//! │  not enough either.                                                     │
//! │                                                                         │
//! │  OUR SOLUTION: rust_decimal + explicit rounding                         │
//! │    Every aggregation step rounds to the currency's minor units         │
//! │    (half away from zero), so stored components always add up.          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use quote_core::money::{Currency, Money};
//! use rust_decimal::Decimal;
//! use std::str::FromStr;
//!
//! let usd = Currency::new("USD").unwrap();
//! let price = Money::new(Decimal::from_str("10.995").unwrap());
//! assert_eq!(price.round(&usd).to_string(), "11.00");
//!
//! let jpy = Currency::new("JPY").unwrap();
//! assert_eq!(price.round(&jpy).to_string(), "11");
//! ```

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::str::FromStr;

use crate::error::ValidationError;
use crate::types::TaxRate;

// =============================================================================
// Currency
// =============================================================================

/// ISO 4217 currency code (three upper-case ASCII letters).
///
/// The engine never converts between currencies; the code only decides how
/// many minor digits amounts are rounded to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    /// Parses and normalises a currency code (`"usd"` → `USD`).
    pub fn new(code: &str) -> Result<Self, ValidationError> {
        let code = code.trim().to_ascii_uppercase();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(ValidationError::InvalidFormat {
                field: "currency".to_string(),
                reason: "must be a three-letter ISO 4217 code".to_string(),
            });
        }
        Ok(Currency(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of minor-unit digits used for rounding.
    ///
    /// ```text
    /// 0 digits: JPY, KRW, VND, CLP, ISK, ...
    /// 3 digits: BHD, KWD, OMR, JOD, TND, LYD, IQD
    /// 2 digits: everything else
    /// ```
    pub fn decimal_places(&self) -> u32 {
        match self.0.as_str() {
            "BIF" | "CLP" | "DJF" | "GNF" | "ISK" | "JPY" | "KMF" | "KRW" | "PYG" | "RWF"
            | "UGX" | "VND" | "VUV" | "XAF" | "XOF" | "XPF" => 0,
            "BHD" | "IQD" | "JOD" | "KWD" | "LYD" | "OMR" | "TND" => 3,
            _ => 2,
        }
    }
}

impl TryFrom<String> for Currency {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Currency::new(&value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

impl FromStr for Currency {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Currency::new(s)
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Money Type
// =============================================================================

/// A monetary amount in major units (e.g. `1150.00`).
///
/// ## Design Decisions
/// - **Decimal, not cents**: quantities and rates are fractional
/// - **No currency inside**: a quote has one currency; amounts on it share it
/// - **Rounding is explicit**: arithmetic never rounds, [`Money::round`] does
///
/// ## Where Money is Used
/// ```text
/// RateCardItem.base_rate ──► QuoteLineItem.unit_price ──► line subtotal
///                                                          │
///                         discount ◄───────────────────────┤
///                         tax      ◄───────────────────────┘
///                              │
///                              ▼
///                  Quote.subtotal / discount / tax / total
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    #[inline]
    pub const fn new(amount: Decimal) -> Self {
        Money(amount)
    }

    #[inline]
    pub const fn zero() -> Self {
        Money(Decimal::ZERO)
    }

    #[inline]
    pub const fn amount(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    #[inline]
    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    /// Rounds to the currency's minor units, half away from zero, and pins
    /// the scale so `1000` renders as `1000.00` for a two-digit currency.
    ///
    /// ## Example
    /// ```rust
    /// use quote_core::money::{Currency, Money};
    /// use rust_decimal::Decimal;
    /// use std::str::FromStr;
    ///
    /// let usd = Currency::new("USD").unwrap();
    /// let tax = Money::new(Decimal::from_str("0.825").unwrap());
    /// assert_eq!(tax.round(&usd).to_string(), "0.83");
    /// ```
    pub fn round(&self, currency: &Currency) -> Money {
        let dp = currency.decimal_places();
        let mut rounded = self
            .0
            .round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero);
        rounded.rescale(dp);
        Money(rounded)
    }

    /// Multiplies by a (possibly fractional) quantity. Not rounded.
    ///
    /// Panics on overflow; the calculator uses [`Money::checked_mul`].
    #[inline]
    pub fn multiply_quantity(&self, quantity: Decimal) -> Money {
        Money(self.0 * quantity)
    }

    /// `self × factor`, or `None` if the product does not fit.
    #[inline]
    pub fn checked_mul(&self, factor: Decimal) -> Option<Money> {
        self.0.checked_mul(factor).map(Money)
    }

    #[inline]
    pub fn checked_add(&self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    #[inline]
    pub fn checked_sub(&self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    /// Tax on this amount at `rate`, rounded to the currency.
    ///
    /// ## Example
    /// ```rust
    /// use quote_core::money::{Currency, Money};
    /// use quote_core::types::TaxRate;
    /// use rust_decimal::Decimal;
    ///
    /// let usd = Currency::new("USD").unwrap();
    /// let base = Money::new(Decimal::from(1000));
    /// let tax = base.calculate_tax(TaxRate::from_bps(1500), &usd);
    /// assert_eq!(tax.to_string(), "150.00");
    /// ```
    pub fn calculate_tax(&self, rate: TaxRate, currency: &Currency) -> Money {
        Money(self.0 * rate.fraction()).round(currency)
    }

    /// [`Money::calculate_tax`] that reports overflow as `None`.
    pub fn checked_tax(&self, rate: TaxRate, currency: &Currency) -> Option<Money> {
        self.checked_mul(rate.fraction()).map(|tax| tax.round(currency))
    }

    /// `percent` of this amount (`10` means 10%), rounded to the currency.
    pub fn percentage(&self, percent: Decimal, currency: &Currency) -> Money {
        Money(self.0 * percent / Decimal::ONE_HUNDRED).round(currency)
    }

    /// [`Money::percentage`] that reports overflow as `None`.
    pub fn checked_percentage(&self, percent: Decimal, currency: &Currency) -> Option<Money> {
        self.0
            .checked_mul(percent)
            .and_then(|v| v.checked_div(Decimal::ONE_HUNDRED))
            .map(|v| Money(v).round(currency))
    }

    /// The smaller of the two amounts.
    #[inline]
    pub fn min(self, other: Money) -> Money {
        if self <= other {
            self
        } else {
            other
        }
    }

    /// Clamps negative amounts to zero.
    #[inline]
    pub fn non_negative(self) -> Money {
        if self.is_negative() {
            Money::zero()
        } else {
            self
        }
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Plain decimal rendering; currency symbols are a front-end concern.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl From<Decimal> for Money {
    fn from(amount: Decimal) -> Self {
        Money(amount)
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
