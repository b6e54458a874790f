use clap::Args;
use carbon_scheduler::{RunReport, RunRequest};

use super::Session;
use crate::GlobalArgs;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Job duration in seconds (ignored with --segments).
    #[arg(long, default_value_t = 0)]
    pub duration: u64,

    /// Static region CI: global, china, us or eu.
    #[arg(long, default_value = "global")]
    pub region: String,

    /// Explicit CI segments, "duration:ci,duration:ci".
    #[arg(long)]
    pub segments: Option<String>,

    /// Use the live CI of this zone.
    #[arg(long = "live-ci")]
    pub live_zone: Option<String>,
}

pub async fn run(global: &GlobalArgs, args: RunArgs) -> anyhow::Result<()> {
    let session = Session::open(global, args.live_zone.is_some())?;
    let request = RunRequest {
        duration_secs: args.duration,
        region: args.region,
        segments: args.segments,
        live_zone: args.live_zone,
        model: session.model.clone(),
    };
    let report = session.planner.run(&session.ctx, &request).await?;
    session.emit(&report, render)
}

fn render(report: &RunReport) -> String {
    format!(
        "Carbon estimate\n\
         Duration:         {}s\n\
         Emissions:        {:.4} kgCO2\n\
         Energy (IT):      {:.4} kWh\n\
         Energy (total):   {:.4} kWh\n\
         Effective CI:     {:.4} kgCO2/kWh\n",
        report.duration_secs,
        report.emissions_kg,
        report.energy_it_kwh,
        report.energy_total_kwh,
        report.effective_ci
    )
}
