use carbon_scheduler::{OptimizeReport, OptimizeRequest, format_zone_failures};
use clap::Args;

use super::Session;
use crate::GlobalArgs;

#[derive(Args, Debug)]
pub struct OptimizeArgs {
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
}

pub async fn run(global: &GlobalArgs, args: OptimizeArgs) -> anyhow::Result<()> {
    let session = Session::open(global, true)?;
    let request = OptimizeRequest {
        zones: session.zones(args.zones)?,
        duration_secs: args.duration,
        lookahead_hours: args.lookahead,
        model: session.model.clone(),
        wait_cost: args.wait_cost,
        timeout: session.timeout,
    };
    let report = session.planner.optimize(&session.ctx, &request).await?;
    session.emit(&report, render)
}

fn render(report: &OptimizeReport) -> String {
    let mut out = String::from("Zone ranking (best first)\n");
    for (rank, r) in report.results.iter().enumerate() {
        out.push_str(&format!(
            "{:>2}. {:<8} {} → {}  {:.4} kgCO2  score {:.4}\n",
            rank + 1,
            r.zone,
            r.best_start.to_rfc3339(),
            r.best_end.to_rfc3339(),
            r.emission_kg,
            r.score
        ));
    }
    out.push_str(&format!(
        "Best: {}  Worst: {}  Reduction: {:.2}%\n",
        report.best.zone, report.worst.zone, report.reduction_pct
    ));
    for line in format_zone_failures(&report.failures) {
        out.push_str(&line);
        out.push('\n');
    }
    out
}
