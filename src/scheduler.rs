//! Cycle scheduling
//!
//! - single account: poll timer spawns a cycle per tick (skipped while one is
//!   running) plus an independent proactive refresh timer
//! - multiple accounts: round robin over the contexts, one cycle each, with a
//!   delay between accounts and a cooldown after a failed authentication
//!
//! Both loops stop when the shutdown channel flips to `true`.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::auth::SessionAuthenticator;
use crate::engine::AccountContext;

/// Timer settings shared by both scheduling modes
#[derive(Debug, Clone, Copy)]
pub struct ScheduleSettings {
    pub poll_interval: Duration,
    pub refresh_interval: Duration,
    pub account_delay: Duration,
    pub startup_cooldown: Duration,
}

/// Poll loop for one account
pub async fn run_single(
    ctx: Arc<AccountContext>,
    settings: ScheduleSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        account = %ctx.name(),
        interval_secs = settings.poll_interval.as_secs(),
        "⏱️ Scheduler started"
    );

    let refresh = spawn_refresh_timer(
        Arc::clone(ctx.auth()),
        settings.refresh_interval,
        shutdown.clone(),
    );

    let mut poll = interval(settings.poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = poll.tick() => {
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    if let Some(Err(e)) = ctx.run_if_idle().await {
                        error!(account = %ctx.name(), error = %e, "❌ Validation cycle failed");
                    }
                });
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    let _ = refresh.await;
    info!(account = %ctx.name(), "🛑 Scheduler stopped");
}

/// Round robin over independent accounts, restarting at the end of the list
pub async fn run_round_robin(
    contexts: Vec<Arc<AccountContext>>,
    settings: ScheduleSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    if contexts.is_empty() {
        warn!("No accounts configured, scheduler has nothing to do");
        return;
    }
    info!(accounts = contexts.len(), "⏱️ Round-robin scheduler started");

    let refreshers: Vec<JoinHandle<()>> = contexts
        .iter()
        .map(|ctx| {
            spawn_refresh_timer(
                Arc::clone(ctx.auth()),
                settings.refresh_interval,
                shutdown.clone(),
            )
        })
        .collect();

    'rounds: loop {
        for ctx in &contexts {
            if *shutdown.borrow() {
                break 'rounds;
            }

            if let Err(e) = ctx.auth().get_valid_token().await {
                error!(
                    account = %ctx.name(),
                    error = %e,
                    cooldown_secs = settings.startup_cooldown.as_secs(),
                    "❌ Authentication failed, skipping account"
                );
                if sleep_or_shutdown(settings.startup_cooldown, &mut shutdown).await {
                    break 'rounds;
                }
                continue;
            }

            if let Some(Err(e)) = ctx.run_if_idle().await {
                error!(account = %ctx.name(), error = %e, "❌ Validation cycle failed");
            }

            if sleep_or_shutdown(settings.account_delay, &mut shutdown).await {
                break 'rounds;
            }
        }
        info!("🔁 Completed a pass over all accounts, restarting");
    }

    for handle in refreshers {
        let _ = handle.await;
    }
    info!("🛑 Round-robin scheduler stopped");
}

/// Proactive refresh-or-login on a fixed period, independent of expiry.
/// Failures are logged and retried at the next tick.
pub fn spawn_refresh_timer(
    auth: Arc<SessionAuthenticator>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    info!(account = %auth.username(), "🔑 Scheduled token refresh");
                    if let Err(e) = auth.refresh_now().await {
                        warn!(
                            account = %auth.username(),
                            error = %e,
                            "Scheduled token refresh failed, retrying next tick"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

/// Sleep for `duration`; returns true if shutdown was requested meanwhile
async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if duration.is_zero() {
        return *shutdown.borrow();
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => *shutdown.borrow(),
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
