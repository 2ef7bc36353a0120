//! Core types shared across the validator
//!
//! Tokens, attestations, verdicts, dispatch outcomes and server statistics.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum length for an access token to be considered usable
pub const MIN_ACCESS_TOKEN_LEN: usize = 20;

/// Token triple held by the session authenticator.
///
/// The JSON form matches the credential file; `expires_at` only lives in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBundle {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub id_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(skip)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_authenticated: bool,
    #[serde(default)]
    pub is_verifying: bool,
}

impl TokenBundle {
    /// Access token is present and long enough to send
    pub fn is_usable(&self) -> bool {
        self.access_token.len() >= MIN_ACCESS_TOKEN_LEN
    }

    /// Expired at or after `expires_at`; unknown expiry counts as expired
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now >= expires_at,
            None => true,
        }
    }

    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }

    /// Apply freshly issued tokens, keeping `expires_at` monotonic
    pub fn apply(&mut self, issued: IssuedTokens, now: DateTime<Utc>) {
        let candidate = now + Duration::milliseconds(issued.expires_in_ms);
        self.expires_at = Some(match self.expires_at {
            Some(previous) if previous > candidate => previous,
            _ => candidate,
        });
        self.access_token = issued.access_token;
        self.id_token = issued.id_token;
        if !issued.refresh_token.is_empty() {
            self.refresh_token = issued.refresh_token;
        }
        self.is_authenticated = true;
        self.is_verifying = false;
    }

    /// Short prefix safe to put in logs
    pub fn access_preview(&self) -> String {
        self.access_token.chars().take(10).collect()
    }
}

/// Token tuple returned by the identity provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedTokens {
    pub access_token: String,
    pub id_token: String,
    /// Empty when the provider did not rotate it
    pub refresh_token: String,
    pub expires_in_ms: i64,
}

/// Signed price record fetched from the oracle
#[derive(Debug, Clone, PartialEq)]
pub struct PriceAttestation {
    pub asset: String,
    pub msg_hash: Option<String>,
    /// Price as delivered by the provider (fixed point integer string)
    pub price: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    /// Untouched provider fields
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PriceAttestation {
    /// Hash used to tag outcomes, empty when the provider omitted it
    pub fn hash_or_empty(&self) -> &str {
        self.msg_hash.as_deref().unwrap_or("")
    }
}

/// Client judgement for one attestation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationVerdict {
    pub msg_hash: String,
    pub is_valid: bool,
    pub source_proxy: Option<String>,
}

/// Result of one dispatch unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub msg_hash: String,
    pub success: bool,
    pub is_valid: Option<bool>,
    pub error: Option<String>,
    pub proxy: Option<String>,
}

impl Outcome {
    pub fn submitted(verdict: ValidationVerdict) -> Self {
        Self {
            msg_hash: verdict.msg_hash,
            success: true,
            is_valid: Some(verdict.is_valid),
            error: None,
            proxy: verdict.source_proxy,
        }
    }

    pub fn failed(msg_hash: impl Into<String>, error: impl Into<String>, proxy: Option<String>) -> Self {
        Self {
            msg_hash: msg_hash.into(),
            success: false,
            is_valid: None,
            error: Some(error.into()),
            proxy,
        }
    }
}

/// Server-side cumulative counters from `/me`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CumulativeStats {
    #[serde(
        rename = "stork_signed_prices_valid_count",
        default,
        deserialize_with = "lenient_count"
    )]
    pub valid_count: u64,
    #[serde(
        rename = "stork_signed_prices_invalid_count",
        default,
        deserialize_with = "lenient_count"
    )]
    pub invalid_count: u64,
    #[serde(
        rename = "stork_signed_prices_last_verified_at",
        default,
        deserialize_with = "lenient_text"
    )]
    pub last_verified_at: Option<String>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub referral_usage_count: u64,
}

impl CumulativeStats {
    pub fn counts(&self) -> StatsCounts {
        StatsCounts {
            valid: self.valid_count,
            invalid: self.invalid_count,
        }
    }
}

/// Account profile from `/me`. Only the counters drive the cycle; the other
/// fields are display-only and accept any scalar.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default, deserialize_with = "lenient_text")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub referral_code: Option<String>,
    pub stats: CumulativeStats,
}

/// Counter that reads null, missing or unparsable values as 0
fn lenient_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f as u64))
            .unwrap_or(0),
        serde_json::Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

/// Any scalar rendered as text; null becomes `None`
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}

/// Valid/invalid counter pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsCounts {
    pub valid: u64,
    pub invalid: u64,
}

impl StatsCounts {
    pub fn new(valid: u64, invalid: u64) -> Self {
        Self { valid, invalid }
    }

    pub fn is_zero(&self) -> bool {
        self.valid == 0 && self.invalid == 0
    }
}

/// Per-cycle change of the server counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsDelta {
    pub delta_valid: i64,
    pub delta_invalid: i64,
}

impl StatsDelta {
    pub fn total(&self) -> i64 {
        self.delta_valid + self.delta_invalid
    }
}

impl fmt::Display for StatsDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed={} valid={:+} invalid={:+}",
            self.total(),
            self.delta_valid,
            self.delta_invalid
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issued(expires_in_ms: i64) -> IssuedTokens {
        IssuedTokens {
            access_token: "a".repeat(40),
            id_token: "id".to_string(),
            refresh_token: String::new(),
            expires_in_ms,
        }
    }

    #[test]
    fn expiry_is_inclusive_and_unknown_counts_as_expired() {
        let now = Utc::now();
        let mut bundle = TokenBundle::default();
        assert!(bundle.is_expired_at(now));

        bundle.expires_at = Some(now);
        assert!(bundle.is_expired_at(now));
        assert!(!bundle.is_expired_at(now - Duration::seconds(1)));
    }

    #[test]
    fn apply_keeps_refresh_token_when_not_rotated() {
        let now = Utc::now();
        let mut bundle = TokenBundle {
            refresh_token: "refresh-1".to_string(),
            ..TokenBundle::default()
        };
        bundle.apply(issued(3_600_000), now);

        assert_eq!(bundle.refresh_token, "refresh-1");
        assert!(bundle.is_authenticated);
        assert!(bundle.is_usable());
        assert_eq!(bundle.expires_at, Some(now + Duration::hours(1)));
    }

    #[test]
    fn apply_never_moves_expiry_backwards() {
        let now = Utc::now();
        let mut bundle = TokenBundle::default();
        bundle.apply(issued(3_600_000), now);
        let first = bundle.expires_at;

        bundle.apply(issued(60_000), now);
        assert_eq!(bundle.expires_at, first);
    }

    #[test]
    fn profile_tolerates_loose_field_types() {
        let profile: UserProfile = serde_json::from_value(serde_json::json!({
            "email": "user@example.com",
            "id": 12345,
            "referral_code": null,
            "stats": {
                "stork_signed_prices_valid_count": null,
                "stork_signed_prices_invalid_count": "7",
                "referral_usage_count": 2.0
            }
        }))
        .unwrap();

        assert_eq!(profile.id.as_deref(), Some("12345"));
        assert!(profile.referral_code.is_none());
        assert_eq!(profile.stats.counts(), StatsCounts::new(0, 7));
        assert_eq!(profile.stats.referral_usage_count, 2);
        assert!(profile.stats.last_verified_at.is_none());
    }

    #[test]
    fn delta_display_signs_both_directions() {
        let delta = StatsDelta {
            delta_valid: -3,
            delta_invalid: 2,
        };
        assert_eq!(delta.to_string(), "processed=-1 valid=-3 invalid=+2");
        assert_eq!(
            StatsDelta::default().to_string(),
            "processed=0 valid=+0 invalid=+0"
        );
    }

    #[test]
    fn credential_file_format_omits_expiry() {
        let bundle = TokenBundle {
            access_token: "x".repeat(20),
            expires_at: Some(Utc::now()),
            is_authenticated: true,
            ..TokenBundle::default()
        };
        let json = serde_json::to_value(&bundle).unwrap();
        assert!(json.get("expiresAt").is_none());
        assert_eq!(json["isAuthenticated"], true);
        assert_eq!(json["isVerifying"], false);
        assert!(json.get("accessToken").is_some());
    }
}
