//! Error taxonomy
//!
//! Item-level errors (`SubmitError`) are contained by the dispatcher,
//! cycle-level errors (`FetchError`, `StatsError`, `AuthError`) abort the
//! current cycle only, `ConfigError` is fatal at startup.

use thiserror::Error;

/// Login or refresh failure against the identity provider
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("identity provider rejected request ({code}): {message}")]
    Rejected { code: String, message: String },
    #[error("identity provider requires challenge {0}")]
    ChallengeRequired(String),
    #[error("identity provider transport error: {0}")]
    Transport(String),
    #[error("malformed identity provider response: {0}")]
    Malformed(String),
    #[error("no refresh token held")]
    NoRefreshToken,
}

/// Transport-level failure of a single oracle API call
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("unauthorized (HTTP 401)")]
    Unauthorized,
    #[error("HTTP {status}{}", message_suffix(.message))]
    Status { status: u16, message: Option<String> },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("unusable proxy {proxy}: {reason}")]
    Proxy { proxy: String, reason: String },
}

fn message_suffix(message: &Option<String>) -> String {
    match message {
        Some(m) if !m.is_empty() => format!(": {m}"),
        _ => String::new(),
    }
}

impl ApiError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized => Some(401),
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Failure of a call made under the 401 refresh-and-retry policy
#[derive(Debug, Clone, Error)]
pub enum CallError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// Fetching the signed price batch failed
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("fetch signed prices failed: {0}")]
    Api(ApiError),
    #[error("fetch signed prices failed, token refresh error: {0}")]
    Auth(AuthError),
}

/// Submitting a single verdict failed
#[derive(Debug, Clone, Error)]
pub enum SubmitError {
    #[error("submit verdict failed: {0}")]
    Api(ApiError),
    #[error("submit verdict failed, token refresh error: {0}")]
    Auth(AuthError),
}

/// Fetching the account statistics failed
#[derive(Debug, Clone, Error)]
pub enum StatsError {
    #[error("fetch stats failed: {0}")]
    Api(ApiError),
    #[error("fetch stats failed, token refresh error: {0}")]
    Auth(AuthError),
}

macro_rules! impl_call_error_conversions {
    ($($name:ident),+) => {
        $(
            impl From<CallError> for $name {
                fn from(err: CallError) -> Self {
                    match err {
                        CallError::Api(e) => $name::Api(e),
                        CallError::Auth(e) => $name::Auth(e),
                    }
                }
            }

            impl $name {
                /// HTTP status of the failed call, when there was one
                pub fn status(&self) -> Option<u16> {
                    match self {
                        $name::Api(e) => e.status(),
                        $name::Auth(_) => None,
                    }
                }
            }
        )+
    };
}

impl_call_error_conversions!(FetchError, SubmitError, StatsError);

/// SOCKS4 relay failure for one tunnelled connection
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid socks4 proxy url: {0}")]
    InvalidUrl(String),
    #[error("unsupported socks5 request: {0}")]
    Handshake(String),
    #[error("upstream socks4 proxy failed: {0}")]
    Upstream(#[from] tokio_socks::Error),
}

/// Credential store read/write failure
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("token file {0} not found")]
    NotFound(String),
    #[error("token file I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("token file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("access token missing or shorter than {min} characters")]
    InvalidAccessToken { min: usize },
}

/// Fatal configuration problem
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("username and password must be set (cognito.username / cognito.password or accounts)")]
    MissingCredentials,
    #[error("invalid configuration value {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Failure that aborts the remaining work of one cycle
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Stats(#[from] StatsError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_error_keeps_status_and_message() {
        let err = SubmitError::from(CallError::Api(ApiError::Status {
            status: 429,
            message: Some("too many requests".to_string()),
        }));
        assert_eq!(err.status(), Some(429));
        assert_eq!(
            err.to_string(),
            "submit verdict failed: HTTP 429: too many requests"
        );
    }

    #[test]
    fn auth_failure_maps_to_auth_variant() {
        let err = FetchError::from(CallError::Auth(AuthError::NoRefreshToken));
        assert!(matches!(err, FetchError::Auth(AuthError::NoRefreshToken)));
        assert_eq!(err.status(), None);
    }
}
