//! Validation cycle
//!
//! One `AccountContext` per credential. A cycle is:
//! 1. ensure a valid token
//! 2. snapshot stats and seed the reconciler
//! 3. fetch the signed price batch
//! 4. dispatch validations through the proxy pool (skipped when empty)
//! 5. snapshot stats again, reconcile and report

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::auth::SessionAuthenticator;
use crate::dispatch::Dispatcher;
use crate::error::CycleError;
use crate::history::{CycleHistory, CycleRecord};
use crate::oracle::OracleClient;
use crate::proxy::ProxyPool;
use crate::stats::{StatsReconciler, StatsSummary};
use crate::types::{StatsDelta, UserProfile};
use crate::validator::Validator;

/// Result of one completed cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub account: String,
    pub started_at: DateTime<Utc>,
    pub batch_size: usize,
    pub submitted_ok: usize,
    pub submitted_failed: usize,
    pub delta: StatsDelta,
    pub profile: UserProfile,
}

impl CycleReport {
    fn to_record(&self) -> CycleRecord {
        let counts = self.profile.stats.counts();
        CycleRecord {
            timestamp: self.started_at.timestamp_millis(),
            cycle_id: self.cycle_id.to_string(),
            account: self.account.clone(),
            batch_size: self.batch_size,
            submitted_ok: self.submitted_ok,
            failed: self.submitted_failed,
            delta_valid: self.delta.delta_valid,
            delta_invalid: self.delta.delta_invalid,
            cumulative_valid: counts.valid,
            cumulative_invalid: counts.invalid,
        }
    }
}

/// Everything one account needs to run cycles independently
pub struct AccountContext {
    name: String,
    auth: Arc<SessionAuthenticator>,
    oracle: Arc<OracleClient>,
    dispatcher: Dispatcher,
    reconciler: Mutex<StatsReconciler>,
    proxy_file: PathBuf,
    history: Option<Arc<CycleHistory>>,
    next_cycle_secs: u64,
    running: AtomicBool,
}

impl AccountContext {
    pub fn new(
        auth: Arc<SessionAuthenticator>,
        oracle: Arc<OracleClient>,
        validator: Validator,
        max_workers: usize,
        proxy_file: impl Into<PathBuf>,
    ) -> Self {
        let dispatcher = Dispatcher::new(oracle.clone(), validator, max_workers);
        Self {
            name: auth.username().to_string(),
            auth,
            oracle,
            dispatcher,
            reconciler: Mutex::new(StatsReconciler::new()),
            proxy_file: proxy_file.into(),
            history: None,
            next_cycle_secs: 0,
            running: AtomicBool::new(false),
        }
    }

    pub fn with_history(mut self, history: Arc<CycleHistory>) -> Self {
        self.history = Some(history);
        self
    }

    /// Seconds shown as "next validation in" in the summary
    pub fn with_next_cycle_secs(mut self, secs: u64) -> Self {
        self.next_cycle_secs = secs;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn auth(&self) -> &Arc<SessionAuthenticator> {
        &self.auth
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run a cycle unless one is already in progress for this account
    pub async fn run_if_idle(&self) -> Option<Result<CycleReport, CycleError>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(account = %self.name, "⏭️ Previous cycle still running, skipping tick");
            return None;
        }
        let _guard = RunningGuard(&self.running);
        Some(self.run_cycle().await)
    }

    /// Run one full cycle inside a span tagged with a fresh cycle id
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let cycle_id = Uuid::new_v4();
        let span = info_span!("cycle", cycle_id = %cycle_id, account = %self.name);
        self.execute(cycle_id).instrument(span).await
    }

    async fn execute(&self, cycle_id: Uuid) -> Result<CycleReport, CycleError> {
        let started_at = Utc::now();
        info!("🔄 Starting validation cycle");

        let token = self.auth.get_valid_token().await?;
        let initial = self.oracle.fetch_stats(&token).await?;
        self.reconciler.lock().await.seed(initial.stats.counts());

        let batch = self.oracle.fetch_batch(&token).await?;
        let batch_size = batch.len();

        let outcomes = if batch.is_empty() {
            info!("No signed prices to validate this cycle");
            Vec::new()
        } else {
            let pool = ProxyPool::load(&self.proxy_file);
            // fetch_batch may have refreshed the session on a 401
            let token = self.auth.get_valid_token().await?;
            self.dispatcher.dispatch(batch, &token, &pool).await
        };
        let submitted_ok = outcomes.iter().filter(|o| o.success).count();

        let token = self.auth.get_valid_token().await?;
        let profile = self.oracle.fetch_stats(&token).await?;
        let delta = self
            .reconciler
            .lock()
            .await
            .reconcile(profile.stats.counts());

        let report = CycleReport {
            cycle_id,
            account: self.name.clone(),
            started_at,
            batch_size,
            submitted_ok,
            submitted_failed: outcomes.len() - submitted_ok,
            delta,
            profile,
        };

        let summary = StatsSummary {
            account: &report.account,
            profile: &report.profile,
            delta: report.delta,
            submitted_ok: report.submitted_ok,
            submitted_total: outcomes.len(),
            next_cycle_secs: self.next_cycle_secs,
            at: Utc::now(),
        };
        for line in summary.to_string().lines() {
            info!("{}", line);
        }

        if let Some(history) = &self.history {
            if let Err(e) = history.record(&report.to_record()).await {
                warn!(error = %e, "Failed to append cycle history");
            }
        }

        Ok(report)
    }
}

/// Clears the running flag when the cycle future finishes or unwinds
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
