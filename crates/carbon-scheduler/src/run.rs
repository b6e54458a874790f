//! Emission estimate for a job of known shape.

use carbon_core::{
    ModelContext, Segment, estimate_emissions_for_region, estimate_emissions_with_segments, estimate_energy,
};
use carbon_provider::CallContext;
use serde::Serialize;

use crate::error::{SchedulerError, SchedulerResult};
use crate::planner::Planner;
use crate::validation::validate_duration;

/// Where the CI for a run estimate comes from. Checked in this order:
/// explicit segments, live zone CI, static region table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunRequest {
    pub duration_secs: u64,
    /// Static region key (`global`, `china`, `us`, `eu`).
    pub region: String,
    /// `"dur:ci,dur:ci"`. When set, the duration is the sum of segments.
    pub segments: Option<String>,
    pub live_zone: Option<String>,
    pub model: ModelContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunReport {
    pub duration_secs: u64,
    pub emissions_kg: f64,
    pub energy_it_kwh: f64,
    pub energy_total_kwh: f64,
    /// Emissions per total kWh.
    pub effective_ci: f64,
}

/// Parse `"3600:0.4, 1800:0.2"` into segments. Every duration and CI must
/// be positive.
pub fn parse_segments(raw: &str) -> SchedulerResult<Vec<Segment>> {
    raw.split(',')
        .map(|item| {
            let item = item.trim();
            let (duration, ci) = item
                .split_once(':')
                .filter(|(_, ci)| !ci.contains(':'))
                .ok_or_else(|| SchedulerError::Input(format!("invalid segment format: {item}")))?;
            let duration_secs = duration
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|d| *d > 0)
                .ok_or_else(|| SchedulerError::Input(format!("invalid segment duration: {duration}")))?;
            let ci = ci
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|ci| *ci > 0.0 && ci.is_finite())
                .ok_or_else(|| SchedulerError::Input(format!("invalid segment ci: {ci}")))?;
            Ok(Segment { duration_secs, ci })
        })
        .collect()
}

impl Planner {
    pub async fn run(&self, ctx: &CallContext, request: &RunRequest) -> SchedulerResult<RunReport> {
        let model = request.model.clone().resolve()?;

        let (duration_secs, emissions_kg) = match (&request.segments, &request.live_zone) {
            (Some(raw), _) if !raw.trim().is_empty() => {
                let segments = parse_segments(raw)?;
                let duration: u64 = segments.iter().map(|s| s.duration_secs).sum();
                (duration, estimate_emissions_with_segments(&segments, &model))
            }
            (_, Some(zone)) if !zone.trim().is_empty() => {
                validate_duration(request.duration_secs)?;
                let ci = self.current_ci(ctx, zone).await?;
                let segment = Segment {
                    duration_secs: request.duration_secs,
                    ci,
                };
                (request.duration_secs, estimate_emissions_with_segments(&[segment], &model))
            }
            _ => {
                validate_duration(request.duration_secs)?;
                let emissions = estimate_emissions_for_region(request.duration_secs, &request.region, &model);
                (request.duration_secs, emissions)
            }
        };

        let energy = estimate_energy(duration_secs, &model);
        let effective_ci = if energy.total_kwh > 0.0 {
            emissions_kg / energy.total_kwh
        } else {
            0.0
        };

        Ok(RunReport {
            duration_secs,
            emissions_kg,
            energy_it_kwh: energy.it_kwh,
            energy_total_kwh: energy.total_kwh,
            effective_ci,
        })
    }
}
