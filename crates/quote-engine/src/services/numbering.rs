//! Quote number generation.
//!
//! Runs inside the creating transaction: scan the organization's numbers for
//! the year, take the highest sequence, add one. The partial unique index on
//! `(organization_id, quote_number)` turns a lost race into a retryable
//! `DbError::UniqueViolation`; the orchestrator retries the whole create.

use quote_core::quote_number::{next_quote_number, validate_prefix};
use quote_core::QuoteNumber;
use quote_db::Repositories;
use tracing::{debug, warn};

use crate::error::EngineResult;

/// Generates `{PREFIX}-{YEAR}-{SEQUENCE}` numbers.
#[derive(Debug, Clone)]
pub struct QuoteNumberGenerator {
    default_prefix: String,
}

impl QuoteNumberGenerator {
    pub fn new(default_prefix: impl Into<String>) -> Self {
        QuoteNumberGenerator {
            default_prefix: default_prefix.into(),
        }
    }

    /// Organization prefix from settings, or the configured default.
    ///
    /// A stored prefix that is no longer valid is ignored.
    pub async fn prefix_for<R: Repositories>(
        &self,
        repos: &mut R,
        organization_id: &str,
    ) -> EngineResult<String> {
        match repos.settings().quote_number_prefix(organization_id).await? {
            Some(prefix) if validate_prefix(&prefix).is_ok() => Ok(prefix),
            Some(prefix) => {
                warn!(organization_id, prefix = %prefix, "Ignoring invalid quote-number prefix");
                Ok(self.default_prefix.clone())
            }
            None => Ok(self.default_prefix.clone()),
        }
    }

    /// Next number for the organization in `year`.
    pub async fn generate<R: Repositories>(
        &self,
        repos: &mut R,
        organization_id: &str,
        year: i32,
    ) -> EngineResult<QuoteNumber> {
        let prefix = self.prefix_for(repos, organization_id).await?;
        let pattern = format!("{}-{}-%", prefix, year);
        let existing = repos.quotes().list_numbers(organization_id, &pattern).await?;

        let number = next_quote_number(&prefix, year, existing.iter().map(String::as_str));
        debug!(
            organization_id,
            quote_number = %number,
            scanned = existing.len(),
            "Generated quote number"
        );
        Ok(number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{database, stored_quote};
    use chrono::Utc;
    use quote_core::quote_number::parse_quote_number;

    #[tokio::test]
    async fn test_first_numbers_for_org() {
        let db = database().await;
        let generator = QuoteNumberGenerator::new("Q");

        let mut uow = db.begin().await.unwrap();
        let first = generator.generate(&mut uow, "acme", 2025).await.unwrap();
        assert_eq!(first.to_string(), "Q-2025-0001");

        uow.quotes()
            .insert(&stored_quote("q-1", "acme", &first.to_string()))
            .await
            .unwrap();
        let second = generator.generate(&mut uow, "acme", 2025).await.unwrap();
        assert_eq!(second.to_string(), "Q-2025-0002");

        let other_org = generator.generate(&mut uow, "globex", 2025).await.unwrap();
        assert_eq!(other_org.to_string(), "Q-2025-0001");
        uow.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_prefix_from_settings_and_parse_roundtrip() {
        let db = database().await;
        let generator = QuoteNumberGenerator::new("Q");
        let year = 2025;

        let mut uow = db.begin().await.unwrap();
        uow.settings()
            .set_quote_number_prefix("acme", "EST", Utc::now())
            .await
            .unwrap();
        uow.quotes()
            .insert(&stored_quote("q-1", "acme", "EST-2025-0041"))
            .await
            .unwrap();
        uow.quotes()
            .insert(&stored_quote("q-2", "acme", "Q-2025-0900"))
            .await
            .unwrap();

        let number = generator.generate(&mut uow, "acme", year).await.unwrap();
        let parsed = parse_quote_number(&number.to_string()).unwrap();
        assert_eq!(parsed.prefix, "EST");
        assert_eq!(parsed.year, year);
        assert_eq!(parsed.sequence, 42);
    }
}
