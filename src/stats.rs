//! Stats reconciliation
//!
//! The server only exposes cumulative valid/invalid counters, so the per-cycle
//! result is the difference between two snapshots. The delta is exact only
//! when no other client submits for the same account.

use chrono::{DateTime, Utc};
use std::fmt;

use crate::types::{StatsCounts, StatsDelta, UserProfile};

/// Previous-snapshot holder, one per account context
#[derive(Debug, Clone, Default)]
pub struct StatsReconciler {
    previous: StatsCounts,
}

impl StatsReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn previous(&self) -> StatsCounts {
        self.previous
    }

    /// Adopt the pre-dispatch snapshot while still at the zero default
    pub fn seed(&mut self, initial: StatsCounts) {
        if self.previous.is_zero() {
            self.previous = initial;
        }
    }

    /// `current - previous`, then `current` becomes the new previous
    pub fn reconcile(&mut self, current: StatsCounts) -> StatsDelta {
        let delta = StatsDelta {
            delta_valid: current.valid as i64 - self.previous.valid as i64,
            delta_invalid: current.invalid as i64 - self.previous.invalid as i64,
        };
        self.previous = current;
        delta
    }
}

/// Human-readable end-of-cycle summary
pub struct StatsSummary<'a> {
    pub account: &'a str,
    pub profile: &'a UserProfile,
    pub delta: StatsDelta,
    pub submitted_ok: usize,
    pub submitted_total: usize,
    pub next_cycle_secs: u64,
    pub at: DateTime<Utc>,
}

impl fmt::Display for StatsSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let line = "---------------------------------------------";
        let or_na = |v: &Option<String>| v.clone().unwrap_or_else(|| "N/A".to_string());
        writeln!(f, "Time: {}", self.at.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(f, "{}", line)?;
        writeln!(f, "Account: {}", self.account)?;
        writeln!(f, "User: {}", or_na(&self.profile.email))?;
        writeln!(f, "ID: {}", or_na(&self.profile.id))?;
        writeln!(f, "Referral code: {}", or_na(&self.profile.referral_code))?;
        writeln!(f, "{}", line)?;
        writeln!(f, "Validation stats:")?;
        writeln!(f, "✓ Valid: {}", self.profile.stats.valid_count)?;
        writeln!(f, "✗ Invalid: {}", self.profile.stats.invalid_count)?;
        if let Some(last) = &self.profile.stats.last_verified_at {
            writeln!(f, "Last verified: {}", last)?;
        }
        writeln!(f, "{}", line)?;
        writeln!(
            f,
            "This cycle: submitted {}/{}, {}",
            self.submitted_ok, self.submitted_total, self.delta
        )?;
        writeln!(f, "Next validation in {} seconds...", self.next_cycle_secs)?;
        write!(f, "=============================================")
    }
}
