//! AWS Cognito identity provider
//!
//! Talks to the Cognito user pool `InitiateAuth` JSON endpoint directly:
//! `USER_PASSWORD_AUTH` for login and `REFRESH_TOKEN_AUTH` for refresh.

use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderValue, CONTENT_TYPE},
    Client,
};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::IdentityProvider;
use crate::error::AuthError;
use crate::types::IssuedTokens;

const INITIATE_AUTH_TARGET: &str = "AWSCognitoIdentityProviderService.InitiateAuth";
const AMZ_JSON: &str = "application/x-amz-json-1.1";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InitiateAuthResponse {
    authentication_result: Option<AuthenticationResult>,
    challenge_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuthenticationResult {
    access_token: String,
    #[serde(default)]
    id_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    /// Seconds
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct CognitoErrorBody {
    #[serde(rename = "__type", default)]
    kind: Option<String>,
    #[serde(default, alias = "Message")]
    message: Option<String>,
}

/// Cognito user pool client
pub struct CognitoProvider {
    client: Client,
    endpoint: String,
    client_id: String,
}

impl CognitoProvider {
    pub fn new(region: &str, client_id: &str, timeout: Duration) -> Result<Self, AuthError> {
        Self::with_endpoint(
            &format!("https://cognito-idp.{}.amazonaws.com/", region),
            client_id,
            timeout,
        )
    }

    /// Custom endpoint, used for local Cognito emulators
    pub fn with_endpoint(
        endpoint: &str,
        client_id: &str,
        timeout: Duration,
    ) -> Result<Self, AuthError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(AMZ_JSON));
        headers.insert("x-amz-target", HeaderValue::from_static(INITIATE_AUTH_TARGET));

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            client_id: client_id.to_string(),
        })
    }

    async fn initiate_auth(
        &self,
        flow: &str,
        parameters: serde_json::Value,
    ) -> Result<IssuedTokens, AuthError> {
        let payload = serde_json::json!({
            "AuthFlow": flow,
            "ClientId": self.client_id,
            "AuthParameters": parameters,
        });

        debug!(flow = %flow, "Sending Cognito InitiateAuth");
        let response = self
            .client
            .post(&self.endpoint)
            .body(payload.to_string())
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(parse_error_body(status.as_u16(), &body));
        }

        parse_initiate_auth(&body)
    }
}

#[async_trait]
impl IdentityProvider for CognitoProvider {
    async fn authenticate(&self, username: &str, password: &str) -> Result<IssuedTokens, AuthError> {
        self.initiate_auth(
            "USER_PASSWORD_AUTH",
            serde_json::json!({ "USERNAME": username, "PASSWORD": password }),
        )
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<IssuedTokens, AuthError> {
        self.initiate_auth(
            "REFRESH_TOKEN_AUTH",
            serde_json::json!({ "REFRESH_TOKEN": refresh_token }),
        )
        .await
    }
}

fn parse_initiate_auth(body: &str) -> Result<IssuedTokens, AuthError> {
    let resp: InitiateAuthResponse =
        serde_json::from_str(body).map_err(|e| AuthError::Malformed(e.to_string()))?;

    if let Some(result) = resp.authentication_result {
        return Ok(IssuedTokens {
            access_token: result.access_token,
            id_token: result.id_token,
            refresh_token: result.refresh_token.unwrap_or_default(),
            expires_in_ms: result.expires_in.saturating_mul(1000),
        });
    }

    match resp.challenge_name {
        Some(challenge) => Err(AuthError::ChallengeRequired(challenge)),
        None => Err(AuthError::Malformed(
            "neither AuthenticationResult nor ChallengeName present".to_string(),
        )),
    }
}

fn parse_error_body(status: u16, body: &str) -> AuthError {
    let parsed: Option<CognitoErrorBody> = serde_json::from_str(body).ok();
    let (kind, message) = match parsed {
        Some(b) => (b.kind, b.message),
        None => (None, None),
    };
    AuthError::Rejected {
        code: kind
            .map(|k| k.rsplit('#').next().unwrap_or(&k).to_string())
            .unwrap_or_else(|| format!("HTTP {}", status)),
        message: message.unwrap_or_else(|| body.chars().take(200).collect()),
    }
}
