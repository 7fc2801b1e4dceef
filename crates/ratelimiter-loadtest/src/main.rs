//! # Rate Limiter Load Test CLI
//!
//! Command-line interface for load testing and validating the rate limiter.
//!
//! ## Usage
//!
//! ```bash
//! # Full session with defaults
//! ratelimiter-loadtest --base-url http://localhost:8080
//!
//! # Shorter run, fail the process on threshold breaches
//! ratelimiter-loadtest --duration-seconds 60 --concurrency 50 --target-rps 500 --strict-validation
//!
//! # Settings from a file, overridden by flags
//! ratelimiter-loadtest --config loadtest.toml --seed 7
//!
//! # Only the edge-case scenarios
//! ratelimiter-loadtest edge-cases
//!
//! # Analyze a previous run
//! ratelimiter-loadtest analyze data/comprehensive_loadtest --timeline
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use ratelimiter_loadtest::analysis::analyze;
use ratelimiter_loadtest::{LoadTestRunner, RunConfig};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "ratelimiter-loadtest")]
#[command(author = "Rate Limiter Platform Team")]
#[command(version)]
#[command(about = "Load testing and validation harness for the rate limiter service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// TOML configuration file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Service base URL
    #[arg(long)]
    base_url: Option<String>,

    /// Main phase duration in seconds
    #[arg(short, long)]
    duration_seconds: Option<u64>,

    /// Warmup duration in seconds
    #[arg(long)]
    warmup_seconds: Option<u64>,

    /// Number of concurrent workers
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Aggregate target requests per second
    #[arg(short, long)]
    target_rps: Option<u64>,

    /// Directory for result artifacts
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Write every request to raw_metrics.csv
    #[arg(long)]
    raw_csv: bool,

    /// Seed for synthetic traffic
    #[arg(long)]
    seed: Option<u64>,

    /// Skip the pre-flight health check; the post-test re-check still runs
    #[arg(long)]
    skip_health_checks: bool,

    #[arg(long)]
    skip_setup: bool,

    #[arg(long)]
    skip_edge_cases: bool,

    #[arg(long)]
    skip_burst: bool,

    /// Skip the server-side benchmark runs
    #[arg(long)]
    skip_benchmark: bool,

    /// Skip the server-side regression analysis
    #[arg(long)]
    skip_performance: bool,

    /// Exit non-zero when health or post-test validation fails
    #[arg(long)]
    strict_validation: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Run only the edge-case scenarios
    EdgeCases,

    /// Print an analysis of a saved run
    Analyze {
        /// Output directory of the run
        dir: PathBuf,

        /// Include the per-second timeline analysis
        #[arg(long)]
        timeline: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

impl Cli {
    /// File (or default) configuration with flag overrides applied
    fn run_config(&self) -> anyhow::Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::load(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?,
            None => RunConfig::default(),
        };

        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.clone();
        }
        if let Some(duration) = self.duration_seconds {
            config.duration_secs = duration;
        }
        if let Some(warmup) = self.warmup_seconds {
            config.warmup_secs = warmup;
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(rps) = self.target_rps {
            config.target_rps = rps;
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        config.raw_csv |= self.raw_csv;
        config.strict_validation |= self.strict_validation;

        let phases = &mut config.phases;
        phases.health_checks &= !self.skip_health_checks;
        phases.setup &= !self.skip_setup;
        phases.edge_cases &= !self.skip_edge_cases;
        phases.burst &= !self.skip_burst;
        phases.benchmark &= !self.skip_benchmark;
        phases.performance &= !self.skip_performance;

        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    info!("Rate Limiter Load Test Tool v{}", env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Some(Commands::Analyze { dir, timeline }) => {
            analyze(dir, *timeline)?;
        }
        Some(Commands::EdgeCases) => {
            let runner = LoadTestRunner::new(cli.run_config()?)?;
            let suite = runner.run_edge_cases().await;
            suite.print_report();

            if runner.config().strict_validation && !suite.passed {
                std::process::exit(1);
            }
        }
        None => {
            let runner = LoadTestRunner::new(cli.run_config()?)?;
            let outcome = runner.run().await?;
            let code = outcome.exit_code();
            if code != 0 {
                std::process::exit(code);
            }
        }
    }

    Ok(())
}
