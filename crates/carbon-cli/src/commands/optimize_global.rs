use std::time::Duration;

use carbon_scheduler::validation::parse_fill_mode;
use carbon_scheduler::{GlobalPlan, OptimizeGlobalRequest};
use clap::Args;

use super::Session;
use crate::{GlobalArgs, parse_duration_arg};

#[derive(Args, Debug)]
pub struct OptimizeGlobalArgs {
    /// Comma-separated zones, e.g. DE,FR,PL.
    #[arg(long)]
    pub zones: Option<String>,

    /// Job duration in seconds.
    #[arg(long)]
    pub duration: u64,

    /// Forecast horizon in hours.
    #[arg(long, default_value_t = 6)]
    pub lookahead: u32,

    /// Penalty in kgCO2 per hour of delay.
    #[arg(long, default_value_t = 0.0)]
    pub wait_cost: f64,

    /// Resampling: forward (carry last sample) or strict (exact match).
    #[arg(long, default_value = "forward")]
    pub resample_fill: String,

    /// Oldest sample forward fill may use; 0 means twice the step.
    #[arg(long, default_value = "0s", value_parser = parse_duration_arg)]
    pub resample_max_fill_age: Duration,
}

pub async fn run(global: &GlobalArgs, args: OptimizeGlobalArgs) -> anyhow::Result<()> {
    let session = Session::open(global, true)?;
    let request = OptimizeGlobalRequest {
        zones: session.zones(args.zones)?,
        duration_secs: args.duration,
        lookahead_hours: args.lookahead,
        model: session.model.clone(),
        wait_cost: args.wait_cost,
        timeout: session.timeout,
        fill_mode: parse_fill_mode(&args.resample_fill)?,
        max_fill_age: args.resample_max_fill_age,
    };
    let plan = session.planner.optimize_global(&session.ctx, &request).await?;
    session.emit(&plan, render)
}

fn render(plan: &GlobalPlan) -> String {
    format!(
        "Best zone: {}\n\
         Window: {} → {}\n\
         Emission: {:.4} kgCO2 (score {:.4})\n\
         Reduction vs worst: {:.2}%\n\
         Resampling: {} every {}s, max fill age {}s\n",
        plan.best_zone,
        plan.best_start.to_rfc3339(),
        plan.best_end.to_rfc3339(),
        plan.emission_kg,
        plan.score,
        plan.reduction_pct,
        plan.resample_fill_mode,
        plan.resample_step_secs,
        plan.resample_max_fill_age_secs
    )
}
