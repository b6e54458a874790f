//! carbon-guard: pick a low-carbon time and zone for a job.
//!
//! # Usage
//!
//! ```text
//! carbon-guard run --duration 1800 --region eu
//! carbon-guard suggest --zone DE --duration 3600 --lookahead 12
//! carbon-guard optimize --zones DE,FR,PL --duration 3600
//! carbon-guard optimize-global --zones DE,FR --duration 3600 --resample-fill strict
//! carbon-guard run-aware --zone DE --duration 3600 --threshold-enter 0.3 --max-wait 6h
//! ```
//!
//! Exit codes: 0 ok, 1 input, 2 provider, 10 max wait exceeded,
//! 11 missed optimal window, 12 timeout, 20 no valid window.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "carbon-guard",
    about = "Carbon-aware scheduling for CI jobs and batch work",
    version,
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

/// Flags shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// TOML config file (default: $CARBON_GUARD_CONFIG).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format: text or json.
    #[arg(long, global = true)]
    pub output: Option<String>,

    /// Per-call and overall operation timeout, e.g. 30s.
    #[arg(long, global = true, value_parser = parse_duration_arg)]
    pub timeout: Option<Duration>,

    /// Forecast cache directory; empty disables the cache.
    #[arg(long, global = true)]
    pub cache_dir: Option<String>,

    /// Forecast cache TTL, e.g. 10m.
    #[arg(long, global = true, value_parser = parse_duration_arg)]
    pub cache_ttl: Option<Duration>,

    /// Serve CI from a JSON fixture instead of Electricity Maps.
    #[arg(long, global = true)]
    pub fixture: Option<PathBuf>,

    /// Runner profile: ubuntu, windows or macos.
    #[arg(long, global = true, default_value = "ubuntu")]
    pub runner: String,

    /// CPU load factor in [0, 1].
    #[arg(long, global = true, default_value_t = 0.6)]
    pub load: f64,

    /// Data-center PUE (>= 1.0).
    #[arg(long, global = true, default_value_t = 1.2)]
    pub pue: f64,

    /// Print provider call metrics (Prometheus text) to stderr on exit.
    #[arg(long, global = true)]
    pub metrics: bool,

    /// Debug logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Estimate emissions for a job of known duration.
    Run(commands::run::RunArgs),
    /// Recommend when to run in one zone.
    Suggest(commands::suggest::SuggestArgs),
    /// Rank zones by their best window.
    Optimize(commands::optimize::OptimizeArgs),
    /// Find the best (start, zone) pair on a shared time axis.
    OptimizeGlobal(commands::optimize_global::OptimizeGlobalArgs),
    /// Block until a greener moment, then exit 0.
    RunAware(commands::run_aware::RunAwareArgs),
}

pub(crate) fn parse_duration_arg(raw: &str) -> Result<Duration, String> {
    carbon_core::parse_duration(raw).ok_or_else(|| format!("invalid duration {raw:?} (e.g. 500ms, 30s, 10m, 1h30m)"))
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "debug"
    } else {
        "warn,carbon_guard=info,carbon_scheduler=info,carbon_provider=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.global.verbose);

    let result = match cli.command {
        Command::Run(args) => commands::run::run(&cli.global, args).await,
        Command::Suggest(args) => commands::suggest::run(&cli.global, args).await,
        Command::Optimize(args) => commands::optimize::run(&cli.global, args).await,
        Command::OptimizeGlobal(args) => commands::optimize_global::run(&cli.global, args).await,
        Command::RunAware(args) => commands::run_aware::run(&cli.global, args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(commands::exit_code(&err))
        }
    }
}
