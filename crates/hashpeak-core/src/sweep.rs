//! Sweep controller: drives the clock range, tracks the peak, restores the
//! original clock.
//!
//! The controller owns all mutable sweep state for the lifetime of one run
//! and talks to the daemon exclusively through the [`MinerApi`] seam, one
//! outstanding call at a time. A failed exchange or a daemon rejection aborts
//! the run; partial results are not salvaged.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};

use crate::client::MinerApi;
use crate::error::{Error, Result};
use crate::protocol::{Command, GpuSection};
use crate::stability::{self, MAX_WAIT_ATTEMPTS, SAMPLE_INTERVAL};

/// Daemon family with too little API hashrate resolution for the adaptive
/// wait, detected from the version description.
pub const REDUCED_ACCURACY_PREFIX: &str = "cgminer";

/// Fixed delay forced when a reduced-accuracy daemon is detected.
pub const REDUCED_ACCURACY_DELAY_SECS: u64 = 20;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How long to wait after a clock change before taking the measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayMode {
    /// Adaptive: poll until the hashrate settles (see [`crate::stability`]).
    Auto,
    /// Sleep a fixed number of seconds, then take one telemetry sample.
    Fixed(u64),
}

/// Pre-validated sweep parameters. The CLI owns validation; the engine
/// assumes `min_clock <= max_clock` and `step >= 1`.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub gpu_id: u32,
    pub min_clock: u32,
    pub max_clock: u32,
    pub step: u32,
    pub delay: DelayMode,
}

/// Knobs for the engine's sleeps, injectable so tests run instantly.
#[derive(Debug, Clone)]
pub struct SweepTiming {
    /// Sleep between adaptive stability samples.
    pub sample_interval: Duration,
    /// Ceiling on stability samples per step.
    pub settle_attempts: usize,
    /// Length of one second of fixed delay.
    pub delay_unit: Duration,
}

impl Default for SweepTiming {
    fn default() -> Self {
        Self {
            sample_interval: SAMPLE_INTERVAL,
            settle_attempts: MAX_WAIT_ATTEMPTS,
            delay_unit: Duration::from_secs(1),
        }
    }
}

impl SweepTiming {
    /// All sleeps collapsed to zero; attempt ceiling unchanged.
    pub fn instant() -> Self {
        Self {
            sample_interval: Duration::ZERO,
            settle_attempts: MAX_WAIT_ATTEMPTS,
            delay_unit: Duration::ZERO,
        }
    }
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

/// Pre-sweep facts recorded by [`bootstrap`]: the restore point, the
/// hardware-error baseline, and the delay mode actually in effect.
#[derive(Debug, Clone)]
pub struct Baseline {
    /// Daemon's self-description from the version reply.
    pub daemon_description: String,
    /// Device status string at bootstrap time (e.g. "Alive").
    pub gpu_status: String,
    /// Engine clock to restore when the sweep ends.
    pub original_engine_clock: u32,
    /// Memory clock, recorded for context only; never modified.
    pub memory_clock: u32,
    /// Hardware-error counter at bootstrap; deltas are measured against it.
    pub hw_error_tally: u64,
    /// Delay mode after reduced-accuracy detection.
    pub effective_delay: DelayMode,
}

/// Verify connectivity, privilege, and the target GPU, and seed the sweep's
/// baseline state. Any daemon rejection aborts before the sweep begins.
pub fn bootstrap<A: MinerApi + ?Sized>(api: &A, config: &SweepConfig) -> Result<Baseline> {
    // Connectivity check doubles as daemon identification.
    let version = api.send(&Command::Version)?.into_version()?;
    let status = version
        .status
        .first()
        .ok_or_else(|| Error::UnexpectedResponse("version reply carried no status".into()))?;
    if status.is_rejection() {
        return Err(Error::DaemonRejected(status.msg.clone()));
    }
    let daemon_description = status.description.clone();

    // The adaptive wait needs more hashrate resolution than this daemon's
    // API reports; fall back to a long fixed delay whatever was configured.
    let effective_delay = if daemon_description.starts_with(REDUCED_ACCURACY_PREFIX) {
        info!(
            "detected {REDUCED_ACCURACY_PREFIX}; forcing fixed {REDUCED_ACCURACY_DELAY_SECS}s delay"
        );
        DelayMode::Fixed(REDUCED_ACCURACY_DELAY_SECS)
    } else {
        config.delay
    };

    // Clock changes need privileged API access.
    let privileged = api.send(&Command::Privileged)?.into_status()?;
    if let Some(status) = privileged.status.first()
        && status.is_rejection()
    {
        return Err(Error::DaemonRejected(status.msg.clone()));
    }

    // Record the restore point and the hardware-error baseline.
    let gpu = query_gpu(api, config.gpu_id)?;

    Ok(Baseline {
        daemon_description,
        gpu_status: gpu.status.clone(),
        original_engine_clock: gpu.gpu_clock,
        memory_clock: gpu.memory_clock,
        hw_error_tally: gpu.hardware_errors,
        effective_delay,
    })
}

/// Query telemetry for one GPU, mapping daemon rejection and an absent
/// device to their respective fatal errors.
fn query_gpu<A: MinerApi + ?Sized>(api: &A, gpu_id: u32) -> Result<GpuSection> {
    let reply = api.send(&Command::Gpu(gpu_id))?.into_gpu()?;

    if let Some(status) = reply.status.first()
        && status.is_rejection()
    {
        return Err(Error::DaemonRejected(status.msg.clone()));
    }
    reply
        .gpu
        .into_iter()
        .next()
        .ok_or(Error::DeviceNotFound(gpu_id))
}

// ---------------------------------------------------------------------------
// Measurement records
// ---------------------------------------------------------------------------

/// One normalized measurement per sweep step, handed to the logging
/// collaborator. Immutable once emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRecord {
    /// Seconds since the Unix epoch at measurement time.
    pub unix_secs: u64,
    pub memory_clock: u32,
    pub engine_clock: u32,
    pub hashrate_khs: f64,
    pub hw_error_delta: u64,
}

/// Consumer of measurement records (CSV log, test collectors).
pub trait MeasurementSink {
    fn record(&mut self, record: &MeasurementRecord) -> Result<()>;
}

/// Collecting into a plain vector is enough for library consumers that do
/// their own reporting.
impl MeasurementSink for Vec<MeasurementRecord> {
    fn record(&mut self, record: &MeasurementRecord) -> Result<()> {
        self.push(record.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sweep state
// ---------------------------------------------------------------------------

/// Mutable accumulation for one sweep run, exclusively owned by the
/// controller. No hidden globals.
#[derive(Debug)]
struct SweepState {
    tally: u64,
    peak_hashrate: f64,
    peak_clock: u32,
    peak_hw_errors: u64,
    hashrate_series: Vec<(u32, f64)>,
    hw_error_series: Vec<(u32, u64)>,
}

impl SweepState {
    fn new(tally_baseline: u64) -> Self {
        Self {
            tally: tally_baseline,
            peak_hashrate: 0.0,
            peak_clock: 0,
            peak_hw_errors: 0,
            hashrate_series: Vec::new(),
            hw_error_series: Vec::new(),
        }
    }

    /// Fold one settled measurement into the running state and return the
    /// hardware-error delta for this step.
    fn observe(&mut self, clock: u32, hashrate: f64, tally_now: u64) -> u64 {
        // The daemon's counter is monotonic; saturate anyway so a daemon
        // restart degrades to a zero delta instead of wrapping.
        let delta = tally_now.saturating_sub(self.tally);
        self.tally = tally_now;

        // Strict comparisons preserve the lowest-clock-at-peak tie-break:
        // a later equal value never displaces the first peak.
        if hashrate > self.peak_hashrate {
            self.peak_hashrate = hashrate;
            self.peak_clock = clock;
        }
        if delta > self.peak_hw_errors {
            self.peak_hw_errors = delta;
        }

        self.hashrate_series.push((clock, hashrate));
        self.hw_error_series.push((clock, delta));
        delta
    }

    fn into_outcome(self) -> SweepOutcome {
        SweepOutcome {
            peak_hashrate_khs: self.peak_hashrate,
            peak_clock: self.peak_clock,
            peak_hw_errors: self.peak_hw_errors,
            hashrate_series: self.hashrate_series,
            hw_error_series: self.hw_error_series,
        }
    }
}

/// Final result of a completed sweep, handed to the reporting and graphing
/// collaborators.
#[derive(Debug, Clone)]
pub struct SweepOutcome {
    pub peak_hashrate_khs: f64,
    pub peak_clock: u32,
    pub peak_hw_errors: u64,
    pub hashrate_series: Vec<(u32, f64)>,
    pub hw_error_series: Vec<(u32, u64)>,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Drives one sweep over the configured clock range.
pub struct SweepController<'a, A: MinerApi + ?Sized> {
    api: &'a A,
    config: &'a SweepConfig,
    baseline: &'a Baseline,
    timing: SweepTiming,
}

impl<'a, A: MinerApi + ?Sized> SweepController<'a, A> {
    pub fn new(api: &'a A, config: &'a SweepConfig, baseline: &'a Baseline) -> Self {
        Self {
            api,
            config,
            baseline,
            timing: SweepTiming::default(),
        }
    }

    pub fn with_timing(mut self, timing: SweepTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Run the whole sweep: step through the range, then restore the
    /// original clock.
    ///
    /// On a mid-sweep failure one best-effort restore is attempted before
    /// the error propagates, so the device is not left at an arbitrary test
    /// frequency. A restore failure during abort is logged and does not mask
    /// the original error.
    pub fn run(&self, sink: &mut dyn MeasurementSink) -> Result<SweepOutcome> {
        let mut state = SweepState::new(self.baseline.hw_error_tally);

        match self.drive(&mut state, sink) {
            Ok(()) => {
                self.restore()?;
                Ok(state.into_outcome())
            }
            Err(err) => {
                if let Err(restore_err) = self.restore() {
                    warn!(
                        "failed to restore engine clock to {} MHz after abort: {restore_err}",
                        self.baseline.original_engine_clock
                    );
                }
                Err(err)
            }
        }
    }

    fn drive(&self, state: &mut SweepState, sink: &mut dyn MeasurementSink) -> Result<()> {
        let mut clock = self.config.min_clock;
        while clock <= self.config.max_clock {
            self.step(clock, state, sink)?;
            match clock.checked_add(self.config.step) {
                Some(next) => clock = next,
                None => break,
            }
        }
        Ok(())
    }

    /// One sweep step: command the clock, wait for a settled reading, fold
    /// it into the state, emit the record.
    fn step(
        &self,
        clock: u32,
        state: &mut SweepState,
        sink: &mut dyn MeasurementSink,
    ) -> Result<()> {
        info!("setting GPU {} engine clock to {clock} MHz", self.config.gpu_id);
        self.set_engine_clock(clock)?;

        let telemetry = self.settled_telemetry()?;
        let hashrate = telemetry.hashrate_khs();
        let delta = state.observe(clock, hashrate, telemetry.hardware_errors);
        debug!("{clock} MHz -> {hashrate:.1} khash/s, +{delta} hw errors");

        let record = MeasurementRecord {
            unix_secs: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            memory_clock: telemetry.memory_clock,
            engine_clock: clock,
            hashrate_khs: hashrate,
            hw_error_delta: delta,
        };
        sink.record(&record)
    }

    /// Obtain a telemetry snapshot whose hashrate is considered settled,
    /// per the effective delay mode decided at bootstrap.
    fn settled_telemetry(&self) -> Result<GpuSection> {
        match self.baseline.effective_delay {
            DelayMode::Auto => {
                let mut latest: Option<GpuSection> = None;
                stability::wait_for_stable(
                    || {
                        let section = query_gpu(self.api, self.config.gpu_id)?;
                        let rate = section.hashrate_khs();
                        latest = Some(section);
                        Ok(rate)
                    },
                    self.timing.settle_attempts,
                    self.timing.sample_interval,
                )?;
                match latest {
                    Some(section) => Ok(section),
                    // Zero-attempt ceiling: fall back to a single sample.
                    None => query_gpu(self.api, self.config.gpu_id),
                }
            }
            DelayMode::Fixed(secs) => {
                let pause = fixed_pause(self.timing.delay_unit, secs);
                if !pause.is_zero() {
                    std::thread::sleep(pause);
                }
                query_gpu(self.api, self.config.gpu_id)
            }
        }
    }

    fn set_engine_clock(&self, clock: u32) -> Result<()> {
        let reply = self
            .api
            .send(&Command::GpuEngine {
                gpu: self.config.gpu_id,
                clock,
            })?
            .into_status()?;

        if let Some(status) = reply.status.first()
            && status.is_rejection()
        {
            return Err(Error::DaemonRejected(status.msg.clone()));
        }
        Ok(())
    }

    fn restore(&self) -> Result<()> {
        info!(
            "restoring GPU {} engine clock to {} MHz",
            self.config.gpu_id, self.baseline.original_engine_clock
        );
        self.set_engine_clock(self.baseline.original_engine_clock)
    }
}

/// Length of the fixed settle pause. Oversized second counts clamp instead
/// of wrapping through a narrowing cast.
fn fixed_pause(unit: Duration, secs: u64) -> Duration {
    let secs = u32::try_from(secs).unwrap_or(u32::MAX);
    unit.saturating_mul(secs)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
