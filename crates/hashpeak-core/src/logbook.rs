//! CSV measurement log.
//!
//! One row per sweep step, appended to a file whose name is deterministic for
//! a given host, GPU, memory clock, clock range, and date, so re-running the
//! same sweep on the same day extends the same file. The header row is
//! written exactly once, when the file is first created.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::sweep::{MeasurementRecord, MeasurementSink};

const CSV_HEADER: &str =
    "\"Timestamp\",\"Memory clock\",\"GPU clock\",\"Hashrate (khash/s)\",\"Hardware errors\"";

/// Shared filename stem for the sweep's artifacts (CSV log, graph data).
///
/// Example: `HashPeak_127.0.0.1_GPU0_MEM1500_1000-1100_20260827`.
pub fn artifact_stem(
    host: &str,
    gpu_id: u32,
    memory_clock: u32,
    min_clock: u32,
    max_clock: u32,
    unix_secs: u64,
) -> String {
    let (year, month, day, ..) = secs_to_utc(unix_secs);
    format!(
        "HashPeak_{host}_GPU{gpu_id}_MEM{memory_clock}_{min_clock}-{max_clock}_{year:04}{month:02}{day:02}"
    )
}

// ---------------------------------------------------------------------------
// Log writer
// ---------------------------------------------------------------------------

/// Appending CSV writer for measurement records.
pub struct SweepLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl SweepLog {
    /// Open (or create) the log file `<stem>.csv` under `dir`, writing the
    /// header only when the file did not exist yet.
    pub fn open(dir: &Path, stem: &str) -> std::io::Result<Self> {
        let path = dir.join(format!("{stem}.csv"));
        let existed = path.exists();

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = BufWriter::new(file);

        if !existed {
            writeln!(writer, "{CSV_HEADER}")?;
            writer.flush()?;
        }

        Ok(Self { path, writer })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MeasurementSink for SweepLog {
    fn record(&mut self, record: &MeasurementRecord) -> Result<()> {
        writeln!(
            self.writer,
            "\"{}\",\"{}\",\"{}\",\"{:.1}\",\"{}\"",
            format_timestamp(record.unix_secs),
            record.memory_clock,
            record.engine_clock,
            record.hashrate_khs,
            record.hw_error_delta,
        )
        .map_err(Error::Log)?;
        // Flush per row so a crash mid-sweep loses at most one measurement.
        self.writer.flush().map_err(Error::Log)
    }
}

// ---------------------------------------------------------------------------
// Time formatting
// ---------------------------------------------------------------------------

/// Format seconds-since-epoch as `yyyy-MM-dd HH:mm:ss` (UTC).
pub fn format_timestamp(unix_secs: u64) -> String {
    let (year, month, day, hour, min, sec) = secs_to_utc(unix_secs);
    format!("{year:04}-{month:02}-{day:02} {hour:02}:{min:02}:{sec:02}")
}

/// Convert seconds since the Unix epoch to (year, month, day, hour, minute,
/// second) UTC. Simple implementation — no leap second handling.
fn secs_to_utc(secs: u64) -> (u64, u64, u64, u64, u64, u64) {
    let sec = secs % 60;
    let min = (secs / 60) % 60;
    let hour = (secs / 3600) % 24;

    let mut days = secs / 86400;
    let mut year = 1970u64;

    loop {
        let days_in_year = if is_leap(year) { 366 } else { 365 };
        if days < days_in_year {
            break;
        }
        days -= days_in_year;
        year += 1;
    }

    let months_days: [u64; 12] = if is_leap(year) {
        [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    } else {
        [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    };

    let mut month = 0u64;
    for (i, &md) in months_days.iter().enumerate() {
        if days < md {
            month = i as u64 + 1;
            break;
        }
        days -= md;
    }
    let day = days + 1;

    (year, month, day, hour, min, sec)
}

fn is_leap(year: u64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
