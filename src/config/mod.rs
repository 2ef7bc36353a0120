//! Configuration management for the Stork validator
//!
//! Loads defaults, then `config/default` and `config/local` (any format the
//! `config` crate understands), then `STORK__SECTION__KEY` environment
//! variables. A `.env` file is read first.

use anyhow::{Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_BASE_URL: &str = "https://app-api.jp.stork-oracle.network/v1";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/133.0.0.0 Safari/537.36";
pub const DEFAULT_ORIGIN: &str = "chrome-extension://knnliglhgkmlblppdejchidfihjnockl";
pub const DEFAULT_CLIENT_ID: &str = "5msns4n49hmg3dftp2tp1t2iuh";
pub const DEFAULT_REGION: &str = "ap-northeast-1";

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub cognito: CognitoConfig,
    pub stork: StorkConfig,
    pub threads: ThreadsConfig,
    pub validation: ValidationConfig,
    pub scheduler: SchedulerConfig,
    pub persistence: PersistenceConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CognitoConfig {
    pub region: String,
    pub client_id: String,
    /// Single-account credentials, ignored when `accounts` is set
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorkConfig {
    pub base_url: String,
    pub user_agent: String,
    pub origin: String,
    /// Credential file for the single-account mode
    pub token_path: String,
    /// Seconds between validation cycles
    pub interval_secs: u64,
    /// Proactive token refresh period in seconds
    pub refresh_interval_secs: u64,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThreadsConfig {
    /// Upper bound on dispatch chunks per cycle
    pub max_workers: usize,
    pub proxy_file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidationConfig {
    /// Attestations older than this are reported invalid
    pub max_age_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    pub account_delay_secs: u64,
    pub startup_cooldown_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    pub data_dir: String,
    /// Append per-cycle reports to CSV
    pub csv_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub token_path: Option<String>,
}

/// Resolved credentials for one account context
#[derive(Debug, Clone, PartialEq)]
pub struct AccountCredentials {
    pub username: String,
    pub password: String,
    pub token_path: PathBuf,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let builder = Self::defaults()?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (STORK__*)
            .add_source(Environment::with_prefix("STORK").separator("__"));

        Self::from_builder(builder)
    }

    /// Builder pre-populated with every default
    pub fn defaults() -> Result<ConfigBuilder<DefaultState>> {
        let builder = Config::builder()
            // Cognito defaults
            .set_default("cognito.region", DEFAULT_REGION)?
            .set_default("cognito.client_id", DEFAULT_CLIENT_ID)?
            .set_default("cognito.username", "")?
            .set_default("cognito.password", "")?
            // Stork API defaults
            .set_default("stork.base_url", DEFAULT_BASE_URL)?
            .set_default("stork.user_agent", DEFAULT_USER_AGENT)?
            .set_default("stork.origin", DEFAULT_ORIGIN)?
            .set_default("stork.token_path", "tokens.json")?
            .set_default("stork.interval_secs", 10)?
            .set_default("stork.refresh_interval_secs", 3000)?
            .set_default("stork.request_timeout_secs", 30)?
            // Dispatch defaults
            .set_default("threads.max_workers", 10)?
            .set_default("threads.proxy_file", "proxies.txt")?
            .set_default("validation.max_age_minutes", 60)?
            // Multi-account scheduling
            .set_default("scheduler.account_delay_secs", 5)?
            .set_default("scheduler.startup_cooldown_secs", 60)?
            // Persistence defaults
            .set_default("persistence.data_dir", "./data")?
            .set_default("persistence.csv_enabled", true)?
            .set_default("logging.json", false)?;
        Ok(builder)
    }

    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let config = builder.build().context("Failed to build configuration")?;
        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        Ok(app_config)
    }

    /// Check credentials and numeric bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.accounts.is_empty() {
            if self.cognito.username.trim().is_empty() || self.cognito.password.is_empty() {
                return Err(ConfigError::MissingCredentials);
            }
        } else if let Some(bad) = self
            .accounts
            .iter()
            .position(|a| a.username.trim().is_empty() || a.password.is_empty())
        {
            return Err(ConfigError::Invalid {
                key: "accounts",
                reason: format!("entry {} is missing username or password", bad),
            });
        }

        let positive: [(&'static str, u64); 3] = [
            ("stork.interval_secs", self.stork.interval_secs),
            ("stork.refresh_interval_secs", self.stork.refresh_interval_secs),
            ("stork.request_timeout_secs", self.stork.request_timeout_secs),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.threads.max_workers == 0 {
            return Err(ConfigError::Invalid {
                key: "threads.max_workers",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.validation.max_age_minutes <= 0 {
            return Err(ConfigError::Invalid {
                key: "validation.max_age_minutes",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn is_multi_account(&self) -> bool {
        !self.accounts.is_empty()
    }

    /// One entry per account context. Multi-account entries without a token
    /// path get `tokens_{n}.json` next to the single-account file.
    pub fn account_credentials(&self) -> Vec<AccountCredentials> {
        if self.accounts.is_empty() {
            return vec![AccountCredentials {
                username: self.cognito.username.trim().to_string(),
                password: self.cognito.password.clone(),
                token_path: PathBuf::from(&self.stork.token_path),
            }];
        }

        let base = PathBuf::from(&self.stork.token_path);
        let dir = base.parent().map(PathBuf::from).unwrap_or_default();
        self.accounts
            .iter()
            .enumerate()
            .map(|(i, account)| AccountCredentials {
                username: account.username.trim().to_string(),
                password: account.password.clone(),
                token_path: account
                    .token_path
                    .as_ref()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| dir.join(format!("tokens_{}.json", i + 1))),
            })
            .collect()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.stork.interval_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.stork.refresh_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.stork.request_timeout_secs)
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        let accounts = if self.accounts.is_empty() {
            1
        } else {
            self.accounts.len()
        };
        format!(
            "base_url={} region={} accounts={} interval={}s refresh={}s workers={} max_age={}m proxies={} csv={}",
            self.stork.base_url,
            self.cognito.region,
            accounts,
            self.stork.interval_secs,
            self.stork.refresh_interval_secs,
            self.threads.max_workers,
            self.validation.max_age_minutes,
            self.threads.proxy_file,
            self.persistence.csv_enabled
        )
    }

    /// Example snippet printed when credentials are missing
    pub fn example_snippet() -> &'static str {
        r#"Create config/local.yaml with:

cognito:
  username: "your@email.com"
  password: "your_password"
stork:
  interval_secs: 10
threads:
  max_workers: 10

or set STORK__COGNITO__USERNAME and STORK__COGNITO__PASSWORD in .env"#
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with(overrides: &[(&str, &str)]) -> AppConfig {
        let mut builder = AppConfig::defaults().unwrap();
        for (key, value) in overrides {
            builder = builder.set_override(*key, *value).unwrap();
        }
        AppConfig::from_builder(builder).unwrap()
    }

    #[test]
    fn defaults_match_stork_extension() {
        let config = with(&[]);
        assert_eq!(config.stork.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.stork.interval_secs, 10);
        assert_eq!(config.stork.refresh_interval_secs, 3000);
        assert_eq!(config.threads.max_workers, 10);
        assert_eq!(config.validation.max_age_minutes, 60);
        assert_eq!(config.cognito.region, "ap-northeast-1");
        assert!(config.accounts.is_empty());
    }

    #[test]
    fn missing_credentials_fail_validation() {
        let config = with(&[]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingCredentials)
        ));
    }

    #[test]
    fn zero_workers_is_invalid() {
        let config = with(&[
            ("cognito.username", "user@example.com"),
            ("cognito.password", "hunter2"),
            ("threads.max_workers", "0"),
        ]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                key: "threads.max_workers",
                ..
            })
        ));
    }

    #[test]
    fn single_account_credentials_use_token_path() {
        let config = with(&[
            ("cognito.username", " user@example.com "),
            ("cognito.password", "hunter2"),
        ]);
        config.validate().unwrap();
        let creds = config.account_credentials();
        assert_eq!(creds.len(), 1);
        assert_eq!(creds[0].username, "user@example.com");
        assert_eq!(creds[0].token_path, PathBuf::from("tokens.json"));
    }

    #[test]
    fn digest_never_contains_password() {
        let config = with(&[
            ("cognito.username", "user@example.com"),
            ("cognito.password", "s3cret-pass"),
        ]);
        let digest = config.to_string();
        assert!(!digest.contains("s3cret-pass"));
        assert!(digest.contains("workers=10"));
    }

    #[test]
    fn multi_account_entries_get_numbered_token_files() {
        let dir = std::env::temp_dir().join(format!("stork_config_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("accounts.yaml");
        std::fs::write(
            &path,
            "accounts:\n  - username: a@example.com\n    password: pa\n  - username: b@example.com\n    password: pb\n    token_path: custom.json\n",
        )
        .unwrap();

        let builder = AppConfig::defaults()
            .unwrap()
            .add_source(File::from(path.clone()));
        let config = AppConfig::from_builder(builder).unwrap();
        config.validate().unwrap();

        let creds = config.account_credentials();
        assert!(config.is_multi_account());
        assert_eq!(creds[0].token_path, PathBuf::from("tokens_1.json"));
        assert_eq!(creds[1].token_path, PathBuf::from("custom.json"));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
