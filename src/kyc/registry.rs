//! EU ETS registry account verification.
//!
//! Mock implementation: national registries expose no public APIs, so an
//! account passes when its number is plausible (alphanumeric, 8-20 chars).

use chrono::Utc;

use super::models::{EtsAccountStatus, EtsVerification};

pub struct EtsRegistryVerifier;

impl EtsRegistryVerifier {
    pub fn verify(account_number: &str, country: &str) -> EtsVerification {
        let country_code = normalize_country(country);

        if account_number.is_empty() || country_code.is_none() {
            return EtsVerification {
                verified: false,
                account_number: account_number.to_string(),
                country: country_code,
                status: EtsAccountStatus::Unknown,
                verified_at: Utc::now(),
                verification_method: "mock",
                error: Some("Account number and country are required".to_string()),
            };
        }

        let plausible = account_number.len() >= 8
            && account_number.len() <= 20
            && account_number.chars().all(|c| c.is_ascii_alphanumeric());

        if plausible {
            EtsVerification {
                verified: true,
                account_number: account_number.to_string(),
                country: country_code,
                status: EtsAccountStatus::Active,
                verified_at: Utc::now(),
                verification_method: "mock",
                error: None,
            }
        } else {
            EtsVerification {
                verified: false,
                account_number: account_number.to_string(),
                country: country_code,
                status: EtsAccountStatus::Unknown,
                verified_at: Utc::now(),
                verification_method: "mock",
                error: Some("Invalid account number format".to_string()),
            }
        }
    }
}

fn normalize_country(country: &str) -> Option<String> {
    let trimmed = country.trim();
    if trimmed.len() < 2 {
        return None;
    }
    Some(trimmed[..2].to_uppercase())
}
