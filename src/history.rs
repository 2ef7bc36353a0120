//! Cycle history persistence
//!
//! Appends one CSV row per completed cycle to
//! `{data_dir}/cycles/cycles_{YYYY-MM-DD}.csv`. The writer rolls over to a new
//! file when the UTC date changes.

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

/// One completed cycle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CycleRecord {
    pub timestamp: i64,
    pub cycle_id: String,
    pub account: String,
    pub batch_size: usize,
    pub submitted_ok: usize,
    pub failed: usize,
    pub delta_valid: i64,
    pub delta_invalid: i64,
    pub cumulative_valid: u64,
    pub cumulative_invalid: u64,
}

struct DailyWriter {
    date: NaiveDate,
    writer: csv::Writer<fs::File>,
}

/// Shared append-only cycle log
pub struct CycleHistory {
    dir: PathBuf,
    current: Mutex<Option<DailyWriter>>,
}

impl CycleHistory {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = data_dir.into().join("cycles");
        fs::create_dir_all(&dir).context("Failed to create cycles directory")?;
        Ok(Self {
            dir,
            current: Mutex::new(None),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("cycles_{}.csv", date.format("%Y-%m-%d")))
    }

    /// Append a record, flushing immediately
    pub async fn record(&self, record: &CycleRecord) -> Result<()> {
        let today = Utc::now().date_naive();
        let mut current = self.current.lock().await;

        let stale = current.as_ref().map(|w| w.date != today).unwrap_or(true);
        if stale {
            let path = self.path_for(today);
            debug!(path = %path.display(), "Opening cycle history file");
            *current = Some(DailyWriter {
                date: today,
                writer: create_writer(&path)?,
            });
        }

        if let Some(daily) = current.as_mut() {
            daily
                .writer
                .serialize(record)
                .context("Failed to write cycle record")?;
            daily
                .writer
                .flush()
                .context("Failed to flush cycle writer")?;
        }
        Ok(())
    }
}

fn create_writer(path: &Path) -> Result<csv::Writer<fs::File>> {
    let file_has_data =
        path.exists() && fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .context("Failed to open CSV file")?;

    Ok(WriterBuilder::new()
        .has_headers(!file_has_data)
        .from_writer(file))
}
