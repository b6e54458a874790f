use std::sync::Arc;
use std::time::Duration;

use carbon_scheduler::{RunAwareOutcome, RunAwareRequest, StatusSink};
use clap::Args;

use super::{OutputFormat, Session};
use crate::{GlobalArgs, parse_duration_arg};

#[derive(Args, Debug)]
pub struct RunAwareArgs {
    /// Electricity Maps zone, e.g. DE.
    #[arg(long)]
    pub zone: Option<String>,

    /// Job duration in seconds.
    #[arg(long)]
    pub duration: u64,

    /// Legacy threshold, used where enter/exit are not given.
    #[arg(long, default_value_t = 0.35)]
    pub threshold: f64,

    /// Run as soon as live CI is at or below this.
    #[arg(long, default_value_t = 0.0)]
    pub threshold_enter: f64,

    /// Live CI at or above this is reported as too high.
    #[arg(long, default_value_t = 0.0)]
    pub threshold_exit: f64,

    /// Forecast horizon in hours.
    #[arg(long, default_value_t = 6)]
    pub lookahead: u32,

    /// Give up after this long.
    #[arg(long, default_value = "6h", value_parser = parse_duration_arg)]
    pub max_wait: Duration,

    /// Live CI polling interval.
    #[arg(long, default_value = "15m", value_parser = parse_duration_arg)]
    pub poll_every: Duration,

    /// No-regret guard: longest wait worth it for a small gain.
    #[arg(long, default_value = "0s", value_parser = parse_duration_arg)]
    pub max_delay_for_gain: Duration,

    /// No-regret guard: minimum expected reduction (%) that justifies waiting.
    #[arg(long, default_value_t = 0.0)]
    pub min_reduction_for_wait: f64,
}

pub async fn run(global: &GlobalArgs, args: RunAwareArgs) -> anyhow::Result<()> {
    let session = Session::open(global, true)?;
    // Progress lines would corrupt JSON on stdout.
    let status: StatusSink = match session.output {
        OutputFormat::Text => Arc::new(|line: &str| println!("{line}")),
        OutputFormat::Json => Arc::new(|line: &str| eprintln!("{line}")),
    };
    let request = RunAwareRequest {
        zone: session.zone(args.zone)?,
        duration_secs: args.duration,
        threshold: args.threshold,
        threshold_enter: args.threshold_enter,
        threshold_exit: args.threshold_exit,
        lookahead_hours: args.lookahead,
        model: session.model.clone(),
        max_wait: args.max_wait,
        poll_every: args.poll_every,
        no_regret_max_delay: args.max_delay_for_gain,
        no_regret_min_reduction_pct: args.min_reduction_for_wait,
        status: Some(status),
    };
    let outcome = session.planner.run_aware(&session.ctx, &request).await?;
    session.emit(&outcome, render)
}

fn render(outcome: &RunAwareOutcome) -> String {
    format!("{}\n", outcome.message)
}
