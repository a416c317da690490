//! Engine configuration module.
//!
//! Configuration is loaded from environment variables with fallback to defaults.

use quote_core::pricing::PricingDefaults;
use quote_core::quote_number::{validate_prefix, DEFAULT_QUOTE_PREFIX};
use quote_core::{TaxRate, DEFAULT_UNIT};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::DEFAULT_MEMORY_CACHE_ENTRIES;

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// SQLite database file
    pub database_path: String,

    /// Redis connection string (optional; in-process cache when unset)
    pub redis_url: Option<String>,

    /// Entry bound of the in-process cache
    pub memory_cache_max_entries: usize,

    /// Quote-number prefix for organizations without their own
    pub quote_number_prefix: String,

    /// TTL of the cached active rate card per organization and date
    pub active_rate_card_ttl_secs: u64,

    /// TTL of cached rate-card item lists and code lookups
    pub rate_card_items_ttl_secs: u64,

    /// Lifetime of idempotency records
    pub idempotency_ttl_secs: u64,

    /// Create attempts when the quote number collides or the store is busy
    pub quote_number_max_attempts: u32,

    /// Rate for the `standard` tax class
    pub tax_rate_standard: Decimal,

    /// Rate for the `reduced` tax class
    pub tax_rate_reduced: Decimal,

    /// Unit of measure when neither line nor rate card gives one
    pub default_unit: String,
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let config = EngineConfig {
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "./quotes.db".to_string()),

            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.trim().is_empty()),

            memory_cache_max_entries: parse_var("MEMORY_CACHE_MAX_ENTRIES", "10000")?,

            quote_number_prefix: env::var("QUOTE_NUMBER_PREFIX")
                .unwrap_or_else(|_| DEFAULT_QUOTE_PREFIX.to_string()),

            active_rate_card_ttl_secs: parse_var("ACTIVE_RATE_CARD_TTL_SECS", "60")?,

            rate_card_items_ttl_secs: parse_var("RATE_CARD_ITEMS_TTL_SECS", "300")?,

            idempotency_ttl_secs: parse_var("IDEMPOTENCY_TTL_SECS", "86400")?, // 24 hours

            quote_number_max_attempts: parse_var("QUOTE_NUMBER_MAX_ATTEMPTS", "3")?,

            tax_rate_standard: parse_var("TAX_RATE_STANDARD", "0.15")?,

            tax_rate_reduced: parse_var("TAX_RATE_REDUCED", "0.05")?,

            default_unit: env::var("DEFAULT_UNIT").unwrap_or_else(|_| DEFAULT_UNIT.to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Checks values that parse but make no sense.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_prefix(&self.quote_number_prefix)
            .map_err(|_| ConfigError::InvalidValue("QUOTE_NUMBER_PREFIX".to_string()))?;

        if self.memory_cache_max_entries == 0 {
            return Err(ConfigError::InvalidValue("MEMORY_CACHE_MAX_ENTRIES".to_string()));
        }
        if self.quote_number_max_attempts == 0 {
            return Err(ConfigError::InvalidValue("QUOTE_NUMBER_MAX_ATTEMPTS".to_string()));
        }
        if TaxRate::from_fraction(self.tax_rate_standard).is_err() {
            return Err(ConfigError::InvalidValue("TAX_RATE_STANDARD".to_string()));
        }
        if TaxRate::from_fraction(self.tax_rate_reduced).is_err() {
            return Err(ConfigError::InvalidValue("TAX_RATE_REDUCED".to_string()));
        }
        if self.default_unit.trim().is_empty() {
            return Err(ConfigError::InvalidValue("DEFAULT_UNIT".to_string()));
        }
        Ok(())
    }

    pub fn active_rate_card_ttl(&self) -> Duration {
        Duration::from_secs(self.active_rate_card_ttl_secs)
    }

    pub fn rate_card_items_ttl(&self) -> Duration {
        Duration::from_secs(self.rate_card_items_ttl_secs)
    }

    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency_ttl_secs)
    }

    /// Tax-class rates and fallback unit for the pricing resolver.
    pub fn pricing_defaults(&self) -> PricingDefaults {
        PricingDefaults {
            standard_rate: TaxRate::from_fraction(self.tax_rate_standard)
                .unwrap_or_else(|_| PricingDefaults::default().standard_rate),
            reduced_rate: TaxRate::from_fraction(self.tax_rate_reduced)
                .unwrap_or_else(|_| PricingDefaults::default().reduced_rate),
            default_unit: self.default_unit.clone(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            database_path: "./quotes.db".to_string(),
            redis_url: None,
            memory_cache_max_entries: DEFAULT_MEMORY_CACHE_ENTRIES,
            quote_number_prefix: DEFAULT_QUOTE_PREFIX.to_string(),
            active_rate_card_ttl_secs: 60,
            rate_card_items_ttl_secs: 300,
            idempotency_ttl_secs: 86_400,
            quote_number_max_attempts: 3,
            tax_rate_standard: Decimal::new(15, 2),
            tax_rate_reduced: Decimal::new(5, 2),
            default_unit: DEFAULT_UNIT.to_string(),
        }
    }
}

fn parse_var<T: FromStr>(name: &str, default: &str) -> Result<T, ConfigError> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name.to_string()))
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.active_rate_card_ttl(), Duration::from_secs(60));
        assert_eq!(config.rate_card_items_ttl(), Duration::from_secs(300));
        assert_eq!(config.idempotency_ttl(), Duration::from_secs(86_400));

        let defaults = config.pricing_defaults();
        assert_eq!(defaults.standard_rate, TaxRate::from_bps(1500));
        assert_eq!(defaults.reduced_rate, TaxRate::from_bps(500));
        assert_eq!(defaults.default_unit, "unit");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = EngineConfig {
            quote_number_prefix: "bad prefix".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(v)) if v == "QUOTE_NUMBER_PREFIX"));

        let config = EngineConfig {
            tax_rate_standard: Decimal::new(15, 0),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            quote_number_max_attempts: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            memory_cache_max_entries: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(v)) if v == "MEMORY_CACHE_MAX_ENTRIES"));
    }

    #[test]
    fn test_parse_var_default() {
        let ttl: u64 = parse_var("QUOTE_ENGINE_TEST_UNSET_VARIABLE", "42").unwrap();
        assert_eq!(ttl, 42);
        let bad: Result<u64, _> = parse_var("QUOTE_ENGINE_TEST_UNSET_VARIABLE", "x");
        assert!(bad.is_err());
    }
}
