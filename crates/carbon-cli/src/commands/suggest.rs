use carbon_scheduler::{SuggestRequest, Suggestion};
use clap::Args;

use super::Session;
use crate::GlobalArgs;

#[derive(Args, Debug)]
pub struct SuggestArgs {
    /// Electricity Maps zone, e.g. DE.
    #[arg(long)]
    pub zone: Option<String>,

    /// Job duration in seconds.
    #[arg(long)]
    pub duration: u64,

    /// Live CI (kgCO2/kWh) at or below which running now is acceptable.
    #[arg(long, default_value_t = 0.35)]
    pub threshold: f64,

    /// Forecast horizon in hours.
    #[arg(long, default_value_t = 6)]
    pub lookahead: u32,

    /// Penalty in kgCO2 per hour of delay.
    #[arg(long, default_value_t = 0.0)]
    pub wait_cost: f64,
}

pub async fn run(global: &GlobalArgs, args: SuggestArgs) -> anyhow::Result<()> {
    let session = Session::open(global, true)?;
    let request = SuggestRequest {
        zone: session.zone(args.zone)?,
        duration_secs: args.duration,
        threshold: args.threshold,
        lookahead_hours: args.lookahead,
        model: session.model.clone(),
        wait_cost: args.wait_cost,
    };
    let suggestion = session.planner.suggest(&session.ctx, &request).await?;
    session.emit(&suggestion, render)
}

fn render(s: &Suggestion) -> String {
    let verdict = if s.run_now { "run now" } else { "wait" };
    format!(
        "Zone: {}\n\
         Current CI: {:.3} kgCO2/kWh\n\
         Recommendation: {verdict}\n\
         Best window: {} → {}\n\
         Expected emission: {:.4} kgCO2\n\
         Reduction vs now: {:.2}%\n",
        s.zone,
        s.current_ci,
        s.best_window_start.to_rfc3339(),
        s.best_window_end.to_rfc3339(),
        s.expected_emission_kg,
        s.emission_reduction_vs_now
    )
}
