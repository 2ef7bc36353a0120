//! Oracle client
//!
//! Thin request/response layer over the Stork API:
//! - signed price batch, mapped into ordered attestations
//! - verdict submission, optionally through an egress proxy
//! - account statistics
//!
//! All three share one retry rule: a 401 triggers a single token refresh and
//! exactly one retry, other errors propagate immediately.

pub mod rest;

pub use rest::{RestClientConfig, StorkRestClient};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::auth::SessionAuthenticator;
use crate::error::{ApiError, CallError, FetchError, StatsError, SubmitError};
use crate::proxy::ProxyEndpoint;
use crate::types::{PriceAttestation, UserProfile};

/// Raw oracle API calls, one per endpoint
#[async_trait]
pub trait OracleTransport: Send + Sync {
    async fn signed_prices(&self, token: &str) -> Result<Value, ApiError>;

    async fn submit_validation(
        &self,
        token: &str,
        msg_hash: &str,
        valid: bool,
        proxy: Option<&ProxyEndpoint>,
    ) -> Result<Value, ApiError>;

    async fn me(&self, token: &str) -> Result<Value, ApiError>;
}

/// Destination for verdicts produced by dispatch units
#[async_trait]
pub trait VerdictSink: Send + Sync {
    async fn submit_verdict(
        &self,
        token: &str,
        msg_hash: &str,
        is_valid: bool,
        proxy: Option<&ProxyEndpoint>,
    ) -> Result<Value, SubmitError>;
}

/// Oracle API client with the 401 refresh-and-retry-once policy
pub struct OracleClient {
    transport: Arc<dyn OracleTransport>,
    auth: Arc<SessionAuthenticator>,
}

impl OracleClient {
    pub fn new(transport: Arc<dyn OracleTransport>, auth: Arc<SessionAuthenticator>) -> Self {
        Self { transport, auth }
    }

    /// Fetch the current batch of signed prices
    pub async fn fetch_batch(&self, token: &str) -> Result<Vec<PriceAttestation>, FetchError> {
        info!("📥 Fetching signed prices...");
        let raw = self
            .with_reauth(token, |t| async move { self.transport.signed_prices(&t).await })
            .await
            .map_err(FetchError::from)?;
        let batch = parse_signed_prices(&raw);
        info!(count = batch.len(), "✅ Signed prices fetched");
        Ok(batch)
    }

    /// Fetch the account profile and cumulative counters
    pub async fn fetch_stats(&self, token: &str) -> Result<UserProfile, StatsError> {
        debug!("Fetching user stats");
        let raw = self
            .with_reauth(token, |t| async move { self.transport.me(&t).await })
            .await
            .map_err(StatsError::from)?;
        parse_user_profile(&raw).map_err(StatsError::Api)
    }

    /// Run `call` with `token`; on 401 refresh once and retry once
    async fn with_reauth<T, F, Fut>(&self, token: &str, call: F) -> Result<T, CallError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let err = match call(token.to_string()).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        if !err.is_unauthorized() || !self.auth.has_refresh_token().await {
            return Err(err.into());
        }

        warn!("🔄 Got 401, refreshing token and retrying once");
        let fresh = self.auth.force_refresh(token).await?;
        call(fresh).await.map_err(CallError::from)
    }
}

#[async_trait]
impl VerdictSink for OracleClient {
    async fn submit_verdict(
        &self,
        token: &str,
        msg_hash: &str,
        is_valid: bool,
        proxy: Option<&ProxyEndpoint>,
    ) -> Result<Value, SubmitError> {
        self.with_reauth(token, |t| async move {
            self.transport
                .submit_validation(&t, msg_hash, is_valid, proxy)
                .await
        })
        .await
        .map_err(SubmitError::from)
    }
}

/// Map `{data: {<asset>: {...}}}` into attestations ordered by asset key.
/// Any other shape yields an empty batch.
pub fn parse_signed_prices(raw: &Value) -> Vec<PriceAttestation> {
    let Some(data) = raw.get("data").and_then(Value::as_object) else {
        warn!("Signed prices payload has no data object, treating as empty");
        return Vec::new();
    };

    let mut batch: Vec<PriceAttestation> = data
        .iter()
        .filter_map(|(asset, entry)| {
            let fields = entry.as_object()?;
            let signature = fields.get("timestamped_signature");
            Some(PriceAttestation {
                asset: asset.clone(),
                msg_hash: signature
                    .and_then(|s| s.get("msg_hash"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                price: fields.get("price").and_then(price_value),
                timestamp: signature
                    .and_then(|s| s.get("timestamp"))
                    .and_then(nanos_to_datetime),
                extra: fields.clone(),
            })
        })
        .collect();
    batch.sort_by(|a, b| a.asset.cmp(&b.asset));
    batch
}

/// Extract `data` from the `/me` payload; `stats` is required
pub fn parse_user_profile(raw: &Value) -> Result<UserProfile, ApiError> {
    let data = raw
        .get("data")
        .ok_or_else(|| ApiError::Malformed("missing data object".to_string()))?;
    if !data.get("stats").map(Value::is_object).unwrap_or(false) {
        return Err(ApiError::Malformed("missing stats object".to_string()));
    }
    serde_json::from_value(data.clone()).map_err(|e| ApiError::Malformed(e.to_string()))
}

/// Strings are kept verbatim, numbers as text; numeric zero counts as absent
fn price_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) if n.as_f64() == Some(0.0) => None,
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Provider timestamps are nanoseconds; divide by 1e6 for epoch millis
fn nanos_to_datetime(value: &Value) -> Option<DateTime<Utc>> {
    let nanos: i128 = match value {
        Value::Number(n) => n
            .as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from))
            .or_else(|| n.as_f64().map(|f| f as i128))?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    let millis = i64::try_from(nanos / 1_000_000).ok()?;
    DateTime::<Utc>::from_timestamp_millis(millis)
}
