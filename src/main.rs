//! Aggregator process: polls the shared directory and publishes one
//! fairness-weighted global model per round.

use std::error::Error;
use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use tracing::{info, warn};

use fair_aggreg::logging::{init_logging, LogLevel};
use fair_aggreg::orchestrator::millis;
use fair_aggreg::{AggregatorConfig, CkksBackend, HeBackend, Orchestrator, StopSignal, Termination};

#[derive(Parser, Debug)]
#[command(name = "fair-aggreg")]
#[command(about = "Fairness-weighted encrypted aggregation for federated learning")]
#[command(version)]
struct Args {
    /// YAML configuration; built-in defaults when absent
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `shared_root`
    #[arg(long)]
    shared_root: Option<PathBuf>,

    /// trace, debug, info, warn or error (RUST_LOG takes precedence)
    #[arg(long)]
    log_level: Option<LogLevel>,

    /// Stop after this many published rounds
    #[arg(long)]
    max_rounds: Option<u64>,

    /// First iteration to wait for
    #[arg(long, default_value_t = 0)]
    start_iteration: u64,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => AggregatorConfig::load(path)?,
        None => AggregatorConfig::default(),
    };
    if let Some(root) = args.shared_root {
        config.shared_root = root;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if args.max_rounds.is_some() {
        config.max_rounds = args.max_rounds;
    }
    config.validate()?;
    init_logging(config.log_level);

    let keygen = Instant::now();
    let backend = CkksBackend::new(&config.he)?;
    info!(
        log_n = config.he.log_n,
        slots = backend.slots(),
        levels = backend.max_level(),
        log_qp = backend.params().log_qp(),
        elapsed_ms = millis(keygen.elapsed()),
        "key material ready"
    );

    // SIGINT/SIGTERM: a round in progress finishes, a pending wait ends at once
    let stop = StopSignal::new();
    let on_signal = stop.clone();
    ctrlc::set_handler(move || {
        warn!("termination signal received, stopping");
        on_signal.stop();
    })?;

    let mut orchestrator =
        Orchestrator::new(&config, backend, stop)?.starting_at(args.start_iteration);
    match orchestrator.run()? {
        Termination::Stopped { iteration } => {
            info!(iteration, "aggregator stopped by signal");
        }
        termination => info!(?termination, "aggregator exiting"),
    }
    Ok(())
}
