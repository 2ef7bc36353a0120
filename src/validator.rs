//! Local freshness validation
//!
//! Checks field presence and staleness only. The attestation signature is not
//! verified cryptographically.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::types::PriceAttestation;

/// Default maximum attestation age
pub const DEFAULT_MAX_AGE_MINUTES: i64 = 60;

/// Staleness validator with a configurable age limit
#[derive(Debug, Clone, Copy)]
pub struct Validator {
    max_age: Duration,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_AGE_MINUTES)
    }
}

impl Validator {
    pub fn new(max_age_minutes: i64) -> Self {
        Self {
            max_age: Duration::minutes(max_age_minutes.max(0)),
        }
    }

    /// Validate against the current wall clock
    pub fn validate_now(&self, attestation: &PriceAttestation) -> bool {
        self.validate(attestation, Utc::now())
    }

    /// `false` when msg_hash, price or timestamp is missing/falsy, or when the
    /// attestation is older than the age limit at `now`
    pub fn validate(&self, attestation: &PriceAttestation, now: DateTime<Utc>) -> bool {
        debug!(asset = %attestation.asset, "Validating attestation");

        let has_hash = attestation
            .msg_hash
            .as_deref()
            .map(|h| !h.is_empty())
            .unwrap_or(false);
        let has_price = attestation
            .price
            .as_deref()
            .map(|p| !p.is_empty())
            .unwrap_or(false);

        let timestamp = match attestation.timestamp {
            Some(ts) if has_hash && has_price && ts.timestamp_millis() != 0 => ts,
            _ => {
                warn!(asset = %attestation.asset, "Incomplete attestation, marking invalid");
                return false;
            }
        };

        let age = now - timestamp;
        if age > self.max_age {
            warn!(
                asset = %attestation.asset,
                age_minutes = age.num_minutes(),
                "Stale attestation, marking invalid"
            );
            return false;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attestation(age_minutes: i64, now: DateTime<Utc>) -> PriceAttestation {
        PriceAttestation {
            asset: "BTCUSD".to_string(),
            msg_hash: Some("0xabc123".to_string()),
            price: Some("97000120000000000000000".to_string()),
            timestamp: Some(now - Duration::minutes(age_minutes)),
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn fresh_complete_attestation_is_valid() {
        let now = Utc::now();
        assert!(Validator::default().validate(&attestation(5, now), now));
    }

    #[test]
    fn exactly_sixty_minutes_is_still_valid() {
        let now = Utc::now();
        assert!(Validator::default().validate(&attestation(60, now), now));
    }

    #[test]
    fn older_than_sixty_minutes_is_invalid() {
        let now = Utc::now();
        let mut a = attestation(60, now);
        a.timestamp = a.timestamp.map(|t| t - Duration::seconds(1));
        assert!(!Validator::default().validate(&a, now));
        assert!(!Validator::default().validate(&attestation(180, now), now));
    }

    #[test]
    fn missing_fields_are_invalid() {
        let now = Utc::now();
        let validator = Validator::default();

        let mut no_hash = attestation(1, now);
        no_hash.msg_hash = None;
        assert!(!validator.validate(&no_hash, now));

        let mut empty_hash = attestation(1, now);
        empty_hash.msg_hash = Some(String::new());
        assert!(!validator.validate(&empty_hash, now));

        let mut no_price = attestation(1, now);
        no_price.price = None;
        assert!(!validator.validate(&no_price, now));

        let mut empty_price = attestation(1, now);
        empty_price.price = Some(String::new());
        assert!(!validator.validate(&empty_price, now));

        let mut no_ts = attestation(1, now);
        no_ts.timestamp = None;
        assert!(!validator.validate(&no_ts, now));
    }

    #[test]
    fn zero_price_string_is_present() {
        // Only an empty string counts as missing; "0" and "0.0" are values
        let now = Utc::now();
        for price in ["0", "0.0"] {
            let mut a = attestation(1, now);
            a.price = Some(price.to_string());
            assert!(Validator::default().validate(&a, now), "price {price}");
        }
    }

    #[test]
    fn future_timestamps_are_not_stale() {
        let now = Utc::now();
        assert!(Validator::default().validate(&attestation(-2, now), now));
    }

    #[test]
    fn custom_age_limit_applies() {
        let now = Utc::now();
        let strict = Validator::new(5);
        assert!(strict.validate(&attestation(4, now), now));
        assert!(!strict.validate(&attestation(6, now), now));
    }
}
