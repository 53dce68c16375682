//! # hashpeak-core
//!
//! Measurement engine for finding the GPU engine clock that maximizes
//! mining hashrate against a cgminer/sgminer-compatible JSON TCP API.
//!
//! ## Quick Start
//!
//! ```no_run
//! use hashpeak_core::{
//!     ApiClient, DelayMode, Endpoint, SweepConfig, SweepController, bootstrap,
//! };
//!
//! let endpoint = Endpoint::resolve("127.0.0.1", 4028)?;
//! let api = ApiClient::new(endpoint);
//!
//! let config = SweepConfig {
//!     gpu_id: 0,
//!     min_clock: 1000,
//!     max_clock: 1100,
//!     step: 5,
//!     delay: DelayMode::Auto,
//! };
//!
//! // Verify connectivity/privilege and record the restore point.
//! let baseline = bootstrap(&api, &config)?;
//!
//! // Sweep, collecting one record per clock step.
//! let mut records = Vec::new();
//! let outcome = SweepController::new(&api, &config, &baseline).run(&mut records)?;
//! println!(
//!     "peak {:.1} khash/s at {} MHz",
//!     outcome.peak_hashrate_khs, outcome.peak_clock
//! );
//! # Ok::<(), hashpeak_core::Error>(())
//! ```
//!
//! ## Architecture
//!
//! Bootstrap → Controller → (Protocol Client, Stability Detector) →
//! measurement records → CSV log / graph data.
//!
//! Fully sequential: one outstanding API call at a time, a fresh connection
//! per call, and exactly one mutable state object owned by the controller.
//! Every failure is fatal to the run; there is no retry policy.

pub mod client;
pub mod error;
pub mod graph;
pub mod logbook;
pub mod protocol;
pub mod stability;
pub mod sweep;

pub use client::{ApiClient, EXCHANGE_TIMEOUT, Endpoint, MinerApi};
pub use error::{Error, Result};
pub use graph::GraphData;
pub use logbook::{SweepLog, artifact_stem, format_timestamp};
pub use protocol::{
    Command, GpuResponse, GpuSection, Response, StatusResponse, StatusSection, VersionResponse,
    VersionSection, normalize_mhs_key,
};
pub use stability::{
    MAX_WAIT_ATTEMPTS, SAMPLE_INTERVAL, STABILITY_MAX_DIFF, STABILITY_SAMPLE_COUNT,
    StabilityWindow, wait_for_stable,
};
pub use sweep::{
    Baseline, DelayMode, MeasurementRecord, MeasurementSink, REDUCED_ACCURACY_DELAY_SECS,
    REDUCED_ACCURACY_PREFIX, SweepConfig, SweepController, SweepOutcome, SweepTiming, bootstrap,
};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
