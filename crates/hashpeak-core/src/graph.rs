//! Graph-data export for the two sweep series.
//!
//! Chart rendering is left to external tooling; this just persists the
//! hashrate-vs-clock and hw-errors-vs-clock series plus the swept bounds as
//! pretty JSON under the same filename stem as the CSV log. A failed write
//! here does not invalidate the sweep itself — callers report it and move on.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::sweep::SweepOutcome;

/// Plottable summary of one completed sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphData {
    /// Lower bound of the swept clock range (MHz).
    pub min_clock: u32,
    /// Upper bound of the swept clock range (MHz).
    pub max_clock: u32,
    /// `(engine clock MHz, hashrate khash/s)` per step, in sweep order.
    pub hashrate_khs: Vec<(u32, f64)>,
    /// `(engine clock MHz, hardware-error delta)` per step, in sweep order.
    pub hw_error_deltas: Vec<(u32, u64)>,
}

impl GraphData {
    pub fn from_outcome(outcome: &SweepOutcome, min_clock: u32, max_clock: u32) -> Self {
        Self {
            min_clock,
            max_clock,
            hashrate_khs: outcome.hashrate_series.clone(),
            hw_error_deltas: outcome.hw_error_series.clone(),
        }
    }

    /// Write `<stem>.json` under `dir`, returning the path written.
    pub fn write(&self, dir: &Path, stem: &str) -> std::io::Result<PathBuf> {
        let path = dir.join(format!("{stem}.json"));
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(&path, json)?;
        Ok(path)
    }
}
