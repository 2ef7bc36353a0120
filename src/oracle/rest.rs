//! Stork REST transport
//!
//! Raw HTTP calls against the Stork app API. Every request carries the bearer
//! token, the extension origin and the browser user agent.
//! Endpoints:
//! - GET  /stork_signed_prices
//! - POST /stork_signed_prices/validations
//! - GET  /me

use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, ORIGIN, USER_AGENT},
    Client, Proxy, RequestBuilder, StatusCode,
};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use super::OracleTransport;
use crate::error::ApiError;
use crate::proxy::{ProxyEndpoint, ProxyScheme, Socks4Relay};

/// Fixed request identity sent with every call
#[derive(Debug, Clone)]
pub struct RestClientConfig {
    pub base_url: String,
    pub origin: String,
    pub user_agent: String,
    pub timeout: Duration,
}

/// Client bound to one egress proxy; socks4 clients own their relay
struct ProxiedClient {
    client: Client,
    _relay: Option<Socks4Relay>,
}

/// HTTP transport for the oracle API
pub struct StorkRestClient {
    direct: Client,
    proxied: Mutex<HashMap<String, ProxiedClient>>,
    config: RestClientConfig,
}

impl StorkRestClient {
    pub fn new(config: RestClientConfig) -> Result<Self, ApiError> {
        let direct = Self::build_client(&config, None)?;
        Ok(Self {
            direct,
            proxied: Mutex::new(HashMap::new()),
            config: RestClientConfig {
                base_url: config.base_url.trim_end_matches('/').to_string(),
                ..config
            },
        })
    }

    /// `proxy_url` is what reqwest dials; `proxy` labels errors
    fn build_client(
        config: &RestClientConfig,
        proxy: Option<(&ProxyEndpoint, &str)>,
    ) -> Result<Client, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            ORIGIN,
            HeaderValue::from_str(&config.origin)
                .map_err(|e| ApiError::Transport(format!("invalid origin header: {e}")))?,
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| ApiError::Transport(format!("invalid user agent header: {e}")))?,
        );

        let mut builder = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers);

        if let Some((proxy, proxy_url)) = proxy {
            let p = Proxy::all(proxy_url).map_err(|e| ApiError::Proxy {
                proxy: proxy.redacted(),
                reason: e.to_string(),
            })?;
            builder = builder.proxy(p);
        }

        builder.build().map_err(|e| match proxy {
            Some((p, _)) => ApiError::Proxy {
                proxy: p.redacted(),
                reason: e.to_string(),
            },
            None => ApiError::Transport(e.to_string()),
        })
    }

    /// Client for the given egress, built once per proxy URL.
    /// socks4 proxies get a local relay since reqwest only dials socks5.
    async fn client_for(&self, proxy: Option<&ProxyEndpoint>) -> Result<Client, ApiError> {
        let Some(proxy) = proxy else {
            return Ok(self.direct.clone());
        };

        let mut cache = self.proxied.lock().await;
        if let Some(entry) = cache.get(proxy.url()) {
            return Ok(entry.client.clone());
        }

        let entry = match proxy.scheme() {
            ProxyScheme::Socks4 => {
                let relay = Socks4Relay::start(proxy).await.map_err(|e| ApiError::Proxy {
                    proxy: proxy.redacted(),
                    reason: e.to_string(),
                })?;
                let client = Self::build_client(&self.config, Some((proxy, &relay.proxy_url())))?;
                ProxiedClient {
                    client,
                    _relay: Some(relay),
                }
            }
            ProxyScheme::Http | ProxyScheme::Https | ProxyScheme::Socks5 => ProxiedClient {
                client: Self::build_client(&self.config, Some((proxy, proxy.url())))?,
                _relay: None,
            },
        };
        let client = entry.client.clone();
        cache.insert(proxy.url().to_string(), entry);
        Ok(client)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    async fn send(request: RequestBuilder, token: &str) -> Result<serde_json::Value, ApiError> {
        let response = request
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }

        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: extract_server_message(&body),
            });
        }

        if body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| ApiError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl OracleTransport for StorkRestClient {
    async fn signed_prices(&self, token: &str) -> Result<serde_json::Value, ApiError> {
        debug!("GET /stork_signed_prices");
        let request = self.direct.get(self.url("/stork_signed_prices"));
        Self::send(request, token).await
    }

    async fn submit_validation(
        &self,
        token: &str,
        msg_hash: &str,
        valid: bool,
        proxy: Option<&ProxyEndpoint>,
    ) -> Result<serde_json::Value, ApiError> {
        let client = self.client_for(proxy).await?;
        let payload = serde_json::json!({ "msg_hash": msg_hash, "valid": valid });
        let request = client
            .post(self.url("/stork_signed_prices/validations"))
            .body(payload.to_string());
        Self::send(request, token).await
    }

    async fn me(&self, token: &str) -> Result<serde_json::Value, ApiError> {
        debug!("GET /me");
        let request = self.direct.get(self.url("/me"));
        Self::send(request, token).await
    }
}

/// Pull a human message out of an error body, falling back to the raw text
fn extract_server_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(raw) = serde_json::from_str::<serde_json::Value>(trimmed) {
        for key in ["message", "error", "detail"] {
            if let Some(v) = raw.get(key).and_then(|v| v.as_str()) {
                if !v.trim().is_empty() {
                    return Some(v.to_string());
                }
            }
        }
    }
    Some(trimmed.chars().take(200).collect())
}
