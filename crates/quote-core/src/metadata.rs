//! # Metadata Guard
//!
//! Free-form key/value strings attached to quotes and lines.
//!
//! Business values (prices, quantities, tax, status, dates) must live in
//! typed columns where the calculator and state machine can see them. A
//! [`Metadata`] value can only be built through validation, so a key like
//! `unitPrice` or `valid_until` is rejected when the input is deserialized.
//!
//! ```text
//! {"source": "crm", "crm_ref": "OPP-991"}    ✓
//! {"unit_price": "10.00"}                   ✗ reserved key
//! {"Tax-Rate": "0.2"}                       ✗ normalised to "taxrate"
//! {"delivery_date": "2025-02-01"}           ✗ dates are business values
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ValidationError, ValidationErrors};

const MAX_ENTRIES: usize = 50;
const MAX_KEY_LEN: usize = 64;
const MAX_VALUE_LEN: usize = 1000;

/// Normalised keys that may never appear in metadata.
const RESERVED_KEYS: &[&str] = &[
    "price",
    "unitprice",
    "amount",
    "cost",
    "unitcost",
    "rate",
    "baserate",
    "quantity",
    "qty",
    "tax",
    "taxrate",
    "taxamount",
    "taxinclusive",
    "discount",
    "discountamount",
    "discountvalue",
    "subtotal",
    "total",
    "totalamount",
    "currency",
    "exchangerate",
    "status",
    "date",
    "validfrom",
    "validuntil",
    "expiry",
];

/// Suffixes that mark a key as carrying a business value.
const RESERVED_SUFFIXES: &[&str] = &["price", "amount", "date", "total", "qty"];

fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// `true` when `key` names a business-significant attribute.
pub fn is_reserved_key(key: &str) -> bool {
    let normalized = normalize_key(key);
    RESERVED_KEYS.contains(&normalized.as_str())
        || RESERVED_SUFFIXES.iter().any(|s| normalized.ends_with(s))
        || key.to_ascii_lowercase().ends_with("_at")
}

/// Validated metadata map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, String>",
    into = "BTreeMap<String, String>"
)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    pub fn new() -> Self {
        Metadata(BTreeMap::new())
    }

    /// Adds one entry after checking it.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), ValidationError> {
        let key = key.into();
        let value = value.into();
        check_entry(&key, &value)?;
        if !self.0.contains_key(&key) && self.0.len() >= MAX_ENTRIES {
            return Err(ValidationError::OutOfRange {
                field: "metadata".to_string(),
                min: "0".to_string(),
                max: format!("{} entries", MAX_ENTRIES),
            });
        }
        self.0.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn check_entry(key: &str, value: &str) -> Result<(), ValidationError> {
    if key.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "metadata key".to_string(),
        });
    }
    if key.len() > MAX_KEY_LEN {
        return Err(ValidationError::TooLong {
            field: format!("metadata.{}", key),
            max: MAX_KEY_LEN,
        });
    }
    if value.len() > MAX_VALUE_LEN {
        return Err(ValidationError::TooLong {
            field: format!("metadata.{}", key),
            max: MAX_VALUE_LEN,
        });
    }
    if is_reserved_key(key) {
        return Err(ValidationError::ReservedMetadataKey {
            field: "metadata".to_string(),
            key: key.to_string(),
        });
    }
    Ok(())
}

impl TryFrom<BTreeMap<String, String>> for Metadata {
    type Error = ValidationErrors;

    fn try_from(map: BTreeMap<String, String>) -> Result<Self, Self::Error> {
        let mut errors = ValidationErrors::new();
        if map.len() > MAX_ENTRIES {
            errors.push(ValidationError::OutOfRange {
                field: "metadata".to_string(),
                min: "0".to_string(),
                max: format!("{} entries", MAX_ENTRIES),
            });
        }
        for (key, value) in &map {
            errors.check(check_entry(key, value));
        }
        errors.into_result()?;
        Ok(Metadata(map))
    }
}

impl From<Metadata> for BTreeMap<String, String> {
    fn from(metadata: Metadata) -> Self {
        metadata.0
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
