// Pullq runner
//
// Seeds a fresh in-memory stream and drives the pull consumer through
// numbered runs. In error mode every run ends with a simulated crash so the
// interrupted messages come back as redeliveries in the next run.

mod runs;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use pullq_consumer::telemetry::{init_telemetry, TelemetryConfig};

#[derive(Parser, Debug, Clone)]
#[command(name = "pullq")]
#[command(about = "Bounded-concurrency pull consumer demo against an in-memory stream")]
#[command(version)]
pub struct Cli {
    /// Run until the poller stops instead of simulating a crash each run
    #[arg(long, env = "PULLQ_NO_ERR")]
    pub no_err: bool,

    /// Maximum number of messages processed at once
    #[arg(long, env = "PULLQ_WORKERS", default_value = "4")]
    pub workers: usize,

    /// Messages published before the first run
    #[arg(long, env = "PULLQ_MESSAGES", default_value = "100")]
    pub messages: usize,

    /// Simulated processing time per message
    #[arg(long, env = "PULLQ_PROCESSING_DELAY_MS", default_value = "1500")]
    pub processing_delay_ms: u64,

    /// How long each run lasts in error mode
    #[arg(long, env = "PULLQ_RUN_DURATION_MS", default_value = "4000")]
    pub run_duration_ms: u64,

    /// Pause between consecutive runs
    #[arg(long, env = "PULLQ_PAUSE_BETWEEN_RUNS_MS", default_value = "2000")]
    pub pause_between_runs_ms: u64,

    /// Time before an unacknowledged message is redelivered
    #[arg(long, env = "PULLQ_ACK_WAIT_MS", default_value = "5000")]
    pub ack_wait_ms: u64,

    /// Maximum wait for a single fetch
    #[arg(long, env = "PULLQ_FETCH_TIMEOUT_MS", default_value = "5000")]
    pub fetch_timeout_ms: u64,

    /// Stop after this many runs (default: run until Ctrl-C)
    #[arg(long, env = "PULLQ_RUNS")]
    pub runs: Option<u64>,
}

impl Cli {
    fn processing_delay(&self) -> Duration {
        Duration::from_millis(self.processing_delay_ms)
    }

    fn run_duration(&self) -> Duration {
        Duration::from_millis(self.run_duration_ms)
    }

    fn pause_between_runs(&self) -> Duration {
        Duration::from_millis(self.pause_between_runs_ms)
    }

    fn ack_wait(&self) -> Duration {
        Duration::from_millis(self.ack_wait_ms)
    }

    fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut telemetry_config = TelemetryConfig::from_env();
    if telemetry_config.log_filter.is_none() {
        telemetry_config.log_filter = Some("pullq=info,pullq_consumer=info".to_string());
    }
    init_telemetry(telemetry_config).context("Failed to initialize logging")?;

    // One thread for the poller plus one per worker
    let threads = cli.workers.max(1) + 1;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(threads)
        .thread_name_fn(|| {
            static NEXT: AtomicUsize = AtomicUsize::new(1);
            format!("pullq-consumer-{}", NEXT.fetch_add(1, Ordering::Relaxed))
        })
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let result = runtime.block_on(runs::run(cli));
    if let Err(e) = &result {
        tracing::error!(error = %format!("{e:#}"), "Application error");
    }
    result
}
