//! Stork validator entry point
//!
//! Loads configuration, builds one account context per credential and hands
//! them to the scheduler until Ctrl+C.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use stork_validator::auth::{CognitoProvider, CredentialStore, IdentityProvider, SessionAuthenticator};
use stork_validator::config::{AccountCredentials, AppConfig};
use stork_validator::engine::AccountContext;
use stork_validator::history::CycleHistory;
use stork_validator::oracle::{OracleClient, OracleTransport, RestClientConfig, StorkRestClient};
use stork_validator::scheduler::{self, ScheduleSettings};
use stork_validator::validator::Validator;

#[tokio::main]
async fn main() -> Result<()> {
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load configuration: {:#}", e);
            eprintln!("{}", AppConfig::example_snippet());
            std::process::exit(1);
        }
    };

    init_tracing(config.logging.json);
    info!("🚀 Stork validator v{} starting", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config.validate() {
        error!(error = %e, "❌ Unusable configuration");
        eprintln!("{}", AppConfig::example_snippet());
        std::process::exit(1);
    }
    info!(config = %config, "⚙️ Configuration loaded");

    let provider: Arc<dyn IdentityProvider> = Arc::new(
        CognitoProvider::new(
            &config.cognito.region,
            &config.cognito.client_id,
            config.request_timeout(),
        )
        .context("Failed to build identity provider client")?,
    );
    let transport: Arc<dyn OracleTransport> = Arc::new(
        StorkRestClient::new(RestClientConfig {
            base_url: config.stork.base_url.clone(),
            origin: config.stork.origin.clone(),
            user_agent: config.stork.user_agent.clone(),
            timeout: config.request_timeout(),
        })
        .context("Failed to build oracle HTTP client")?,
    );

    let history = if config.persistence.csv_enabled {
        match CycleHistory::new(&config.persistence.data_dir) {
            Ok(history) => {
                info!(dir = %history.dir().display(), "💾 Cycle history enabled");
                Some(Arc::new(history))
            }
            Err(e) => {
                warn!(error = %e, "Cycle history disabled, could not prepare data directory");
                None
            }
        }
    } else {
        None
    };

    let mut contexts = Vec::new();
    for creds in config.account_credentials() {
        let ctx = build_context(&config, creds, &provider, &transport, history.clone()).await;
        contexts.push(Arc::new(ctx));
    }

    let settings = ScheduleSettings {
        poll_interval: config.poll_interval(),
        refresh_interval: config.refresh_interval(),
        account_delay: std::time::Duration::from_secs(config.scheduler.account_delay_secs),
        startup_cooldown: std::time::Duration::from_secs(config.scheduler.startup_cooldown_secs),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("🛑 Ctrl+C received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    if config.is_multi_account() {
        scheduler::run_round_robin(contexts, settings, shutdown_rx).await;
    } else if let Some(ctx) = contexts.into_iter().next() {
        if let Err(e) = initial_authentication(ctx.auth()).await {
            error!(account = %ctx.name(), error = %e, "❌ Initial authentication failed");
            std::process::exit(1);
        }
        scheduler::run_single(ctx, settings, shutdown_rx).await;
    }

    info!("👋 Stork validator stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }
}

async fn build_context(
    config: &AppConfig,
    creds: AccountCredentials,
    provider: &Arc<dyn IdentityProvider>,
    transport: &Arc<dyn OracleTransport>,
    history: Option<Arc<CycleHistory>>,
) -> AccountContext {
    let auth = Arc::new(SessionAuthenticator::new(
        creds.username,
        creds.password,
        Arc::clone(provider),
        CredentialStore::new(creds.token_path),
    ));
    auth.restore().await;

    let oracle = Arc::new(OracleClient::new(Arc::clone(transport), Arc::clone(&auth)));
    let ctx = AccountContext::new(
        auth,
        oracle,
        Validator::new(config.validation.max_age_minutes),
        config.threads.max_workers,
        &config.threads.proxy_file,
    )
    .with_next_cycle_secs(config.stork.interval_secs);

    match history {
        Some(history) => ctx.with_history(history),
        None => ctx,
    }
}

/// First login, or refresh of a restored session
async fn initial_authentication(
    auth: &SessionAuthenticator,
) -> Result<(), stork_validator::error::AuthError> {
    info!(account = %auth.username(), "🔐 Authenticating...");
    auth.get_valid_token().await?;
    info!(account = %auth.username(), "✅ Initial authentication successful");
    Ok(())
}
