//! CLI for hashpeak — sweep a GPU engine-clock range against a
//! cgminer/sgminer API and find the hashrate peak.

use std::fmt::Display;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;

use hashpeak_core::{
    ApiClient, DelayMode, Endpoint, GraphData, MeasurementRecord, MeasurementSink, Result,
    SweepConfig, SweepController, SweepLog, artifact_stem, bootstrap,
};

#[derive(Parser)]
#[command(name = "hashpeak")]
#[command(about = "Find the GPU engine clock that maximizes mining hashrate")]
#[command(version = hashpeak_core::VERSION)]
struct Cli {
    /// IP or hostname of the miner API
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port number of the miner API
    #[arg(long, default_value = "4028")]
    port: u16,

    /// GPU id to work on
    #[arg(long = "gpu-id")]
    gpu_id: u32,

    /// Lower bound of the engine clock range to test (MHz)
    #[arg(long = "min-gpu-clock")]
    min_gpu_clock: u32,

    /// Upper bound of the engine clock range to test (MHz)
    #[arg(long = "max-gpu-clock")]
    max_gpu_clock: u32,

    /// MHz to increase the engine clock per iteration
    #[arg(long, default_value = "1")]
    step: u32,

    /// Seconds to wait between setting a clock and measuring, or "auto"
    /// to wait until the hashrate settles
    #[arg(long, default_value = "auto")]
    delay: String,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    // Validate before the engine sees anything.
    if cli.max_gpu_clock < cli.min_gpu_clock {
        fail("--max-gpu-clock must not be lower than --min-gpu-clock");
    }
    if cli.step == 0 {
        fail("--step must be at least 1");
    }
    let delay = parse_delay(&cli.delay);

    let config = SweepConfig {
        gpu_id: cli.gpu_id,
        min_clock: cli.min_gpu_clock,
        max_clock: cli.max_gpu_clock,
        step: cli.step,
        delay,
    };

    println!("Connecting to API on {}:{}...", cli.host, cli.port);
    let endpoint = Endpoint::resolve(&cli.host, cli.port).unwrap_or_else(|e| fail(e));
    let api = ApiClient::new(endpoint);

    let baseline = bootstrap(&api, &config).unwrap_or_else(|e| fail(e));
    println!(" - Connected ({})", baseline.daemon_description);
    println!(" - Privileged API access verified");
    println!(
        " - GPU {}: {} at {}/{} MHz (engine/memory)",
        config.gpu_id, baseline.gpu_status, baseline.original_engine_clock, baseline.memory_clock
    );
    if baseline.effective_delay != config.delay
        && let DelayMode::Fixed(secs) = baseline.effective_delay
    {
        println!(" - Reduced-accuracy daemon detected: forcing fixed {secs}s delay");
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let stem = artifact_stem(
        api.endpoint().host(),
        config.gpu_id,
        baseline.memory_clock,
        config.min_clock,
        config.max_clock,
        now,
    );

    let log = SweepLog::open(Path::new("."), &stem).unwrap_or_else(|e| fail(e));
    let log_path = log.path().to_path_buf();
    let mut sink = ConsoleSink { inner: log };

    println!();
    println!("Starting measurements.");
    let outcome = SweepController::new(&api, &config, &baseline)
        .run(&mut sink)
        .unwrap_or_else(|e| fail(e));

    println!();
    println!(
        "Peak of {:.1} khash/s detected at GPU clock {} MHz (worst hw-error excursion +{}).",
        outcome.peak_hashrate_khs, outcome.peak_clock, outcome.peak_hw_errors
    );
    println!("See {} for details.", log_path.display());

    // A graph-data write failure is reported but does not taint the sweep.
    let graph = GraphData::from_outcome(&outcome, config.min_clock, config.max_clock);
    match graph.write(Path::new("."), &stem) {
        Ok(path) => println!("Graph data written to {}.", path.display()),
        Err(e) => eprintln!("Warning: could not write graph data: {e}"),
    }
}

/// Parse the `--delay` flag: `auto` or a whole number of seconds.
fn parse_delay(raw: &str) -> DelayMode {
    if raw.eq_ignore_ascii_case("auto") {
        return DelayMode::Auto;
    }
    match raw.parse::<u64>() {
        Ok(secs) => DelayMode::Fixed(secs),
        Err(_) => fail(format!(
            "--delay must be either 'auto' or a delay in seconds, got '{raw}'"
        )),
    }
}

fn fail(context: impl Display) -> ! {
    eprintln!("Error: {context}");
    std::process::exit(1);
}

/// Prints each measurement as it lands, then forwards it to the CSV log.
struct ConsoleSink {
    inner: SweepLog,
}

impl MeasurementSink for ConsoleSink {
    fn record(&mut self, record: &MeasurementRecord) -> Result<()> {
        println!(
            " - {} MHz: {:.1} khash/s (+{} hw errors)",
            record.engine_clock, record.hashrate_khs, record.hw_error_delta
        );
        self.inner.record(record)
    }
}
