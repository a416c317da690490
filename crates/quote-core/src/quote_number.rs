//! # Quote Numbers
//!
//! Human-readable quote identifiers, unique per organization.
//!
//! ## Format
//! ```text
//! Q-2025-0001
//! │  │    │
//! │  │    └── sequence, zero-padded to 4 digits (10000 widens naturally)
//! │  └─────── calendar year the quote was created in
//! └────────── organization prefix (default "Q")
//! ```
//!
//! Generation itself (scan + insert inside one transaction) lives in the
//! engine; this module only formats, parses and picks the next sequence.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Prefix used when an organization has not configured one.
pub const DEFAULT_QUOTE_PREFIX: &str = "Q";

/// Minimum digits in a formatted sequence.
pub const SEQUENCE_WIDTH: usize = 4;

const MAX_PREFIX_LEN: usize = 10;

/// Parsed `{PREFIX}-{YEAR}-{SEQUENCE}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuoteNumber {
    pub prefix: String,
    pub year: i32,
    pub sequence: u32,
}

impl QuoteNumber {
    pub fn new(prefix: impl Into<String>, year: i32, sequence: u32) -> Self {
        QuoteNumber {
            prefix: prefix.into(),
            year,
            sequence,
        }
    }
}

impl fmt::Display for QuoteNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{:0width$}",
            self.prefix,
            self.year,
            self.sequence,
            width = SEQUENCE_WIDTH
        )
    }
}

impl FromStr for QuoteNumber {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_quote_number(s)
    }
}

fn invalid(reason: &str) -> ValidationError {
    ValidationError::InvalidFormat {
        field: "quote_number".to_string(),
        reason: reason.to_string(),
    }
}

/// Validates an organization prefix.
///
/// ## Rules
/// - 1 to 10 characters
/// - ASCII letters, digits and inner hyphens
pub fn validate_prefix(prefix: &str) -> Result<(), ValidationError> {
    if prefix.is_empty() {
        return Err(ValidationError::Required {
            field: "quote_number_prefix".to_string(),
        });
    }
    if prefix.len() > MAX_PREFIX_LEN {
        return Err(ValidationError::TooLong {
            field: "quote_number_prefix".to_string(),
            max: MAX_PREFIX_LEN,
        });
    }
    if !prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        || prefix.starts_with('-')
        || prefix.ends_with('-')
    {
        return Err(ValidationError::InvalidFormat {
            field: "quote_number_prefix".to_string(),
            reason: "must contain only letters, digits and inner hyphens".to_string(),
        });
    }
    Ok(())
}

/// Parses a quote number strictly (4-digit year, at least 4 sequence
/// digits, sequence ≥ 1).
///
/// ## Example
/// ```rust
/// use quote_core::quote_number::parse_quote_number;
///
/// let number = parse_quote_number("ACME-Q-2025-0042").unwrap();
/// assert_eq!(number.prefix, "ACME-Q");
/// assert_eq!(number.year, 2025);
/// assert_eq!(number.sequence, 42);
/// ```
pub fn parse_quote_number(value: &str) -> Result<QuoteNumber, ValidationError> {
    let mut parts = value.trim().rsplitn(3, '-');
    let (Some(sequence), Some(year), Some(prefix)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid("expected PREFIX-YEAR-SEQUENCE"));
    };

    validate_prefix(prefix).map_err(|_| invalid("invalid prefix"))?;

    if year.len() != 4 || !year.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid("year must be four digits"));
    }
    if sequence.len() < SEQUENCE_WIDTH || !sequence.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid("sequence must be at least four digits"));
    }

    let year = year.parse::<i32>().map_err(|_| invalid("year out of range"))?;
    let sequence = sequence
        .parse::<u32>()
        .map_err(|_| invalid("sequence out of range"))?;
    if sequence == 0 {
        return Err(invalid("sequence must start at 1"));
    }

    Ok(QuoteNumber::new(prefix, year, sequence))
}

/// `true` iff [`parse_quote_number`] accepts `value`.
pub fn validate_quote_number(value: &str) -> bool {
    parse_quote_number(value).is_ok()
}

/// Sequence of `number` if it is `{prefix}-{year}-(\d+)`; `None` otherwise.
///
/// Lenient on sequence width so hand-entered numbers still count.
pub fn sequence_for(number: &str, prefix: &str, year: i32) -> Option<u32> {
    let rest = number.strip_prefix(prefix)?.strip_prefix('-')?;
    let digits = rest.strip_prefix(&year.to_string())?.strip_prefix('-')?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Next number after the highest existing sequence for `prefix`/`year`.
/// Numbers of other prefixes, years or malformed ones are ignored.
///
/// ## Example
/// ```rust
/// use quote_core::quote_number::next_quote_number;
///
/// let next = next_quote_number("Q", 2025, ["Q-2025-0001", "Q-2024-0007", "junk"]);
/// assert_eq!(next.to_string(), "Q-2025-0002");
/// ```
pub fn next_quote_number<'a>(
    prefix: &str,
    year: i32,
    existing: impl IntoIterator<Item = &'a str>,
) -> QuoteNumber {
    let max = existing
        .into_iter()
        .filter_map(|number| sequence_for(number, prefix, year))
        .max()
        .unwrap_or(0);
    QuoteNumber::new(prefix, year, max.saturating_add(1))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_and_second_number() {
        let first = next_quote_number("Q", 2025, Vec::<&str>::new());
        assert_eq!(first.to_string(), "Q-2025-0001");

        let existing = [first.to_string()];
        let second = next_quote_number("Q", 2025, existing.iter().map(String::as_str));
        assert_eq!(second.to_string(), "Q-2025-0002");
    }

    #[test]
    fn test_parse_recovers_generated_parts() {
        let generated = next_quote_number("INV", 2025, ["INV-2025-0009"]);
        let parsed = parse_quote_number(&generated.to_string()).unwrap();
        assert_eq!(parsed, QuoteNumber::new("INV", 2025, 10));
    }

    #[test]
    fn test_sequence_widens_past_9999() {
        let next = next_quote_number("Q", 2025, ["Q-2025-9999"]);
        assert_eq!(next.to_string(), "Q-2025-10000");
        assert!(validate_quote_number("Q-2025-10000"));
    }

    #[test]
    fn test_scan_ignores_malformed_and_foreign_numbers() {
        let existing = [
            "Q-2025-0003",
            "Q-2025-abc",
            "Q-2025-",
            "QX-2025-0050",
            "Q-2024-0099",
            "totally wrong",
            "Q-2025-12",
        ];
        let next = next_quote_number("Q", 2025, existing);
        assert_eq!(next.sequence, 13);
    }

    #[test]
    fn test_strict_parse_rejects() {
        assert!(!validate_quote_number("Q-2025-001"));
        assert!(!validate_quote_number("Q-25-0001"));
        assert!(!validate_quote_number("Q-2025-0000"));
        assert!(!validate_quote_number("2025-0001"));
        assert!(!validate_quote_number("q_x-2025-0001"));
        assert!(validate_quote_number("q-2025-0001"));
    }

    #[test]
    fn test_validate_prefix() {
        assert!(validate_prefix("Q").is_ok());
        assert!(validate_prefix("ACME-Q").is_ok());
        assert!(validate_prefix("").is_err());
        assert!(validate_prefix("-Q").is_err());
        assert!(validate_prefix("Q W").is_err());
        assert!(validate_prefix(&"Q".repeat(11)).is_err());
    }
}
