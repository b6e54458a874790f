//! Single-zone recommendation: run now or at the best forecast window.

use carbon_core::{ModelContext, Segment, estimate_emissions_with_segments};
use carbon_provider::CallContext;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::error::SchedulerResult;
use crate::planner::{Planner, WindowRequest};
use crate::validation::{validate_threshold, validate_window, validate_zone};

/// Running now wins when its emission is within this factor of the best
/// score and live CI is under the threshold.
pub const RUN_NOW_TOLERANCE: f64 = 1.05;

#[derive(Debug, Clone, PartialEq)]
pub struct SuggestRequest {
    pub zone: String,
    pub duration_secs: u64,
    /// Live CI at or below this makes running now acceptable.
    pub threshold: f64,
    pub lookahead_hours: u32,
    pub model: ModelContext,
    pub wait_cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    pub zone: String,
    pub current_ci: f64,
    pub best_window_start: DateTime<Utc>,
    pub best_window_end: DateTime<Utc>,
    pub expected_emission_kg: f64,
    /// Saving of the suggested window over running now at live CI, percent.
    pub emission_reduction_vs_now: f64,
    pub run_now: bool,
}

impl Planner {
    pub async fn suggest(&self, ctx: &CallContext, request: &SuggestRequest) -> SchedulerResult<Suggestion> {
        validate_zone(&request.zone)?;
        validate_threshold("threshold", request.threshold)?;
        validate_window(request.duration_secs, request.lookahead_hours)?;
        let model = request.model.clone().resolve()?;
        let eval_start = self.clock().now();

        let analysis = self
            .analyze_best_window(
                ctx,
                &WindowRequest {
                    zone: request.zone.clone(),
                    duration_secs: request.duration_secs,
                    lookahead_hours: request.lookahead_hours,
                    model: model.clone(),
                    wait_cost: request.wait_cost,
                },
                eval_start,
            )
            .await?;

        let current_ci = self.current_ci(ctx, &request.zone).await?;
        let now_emission = estimate_emissions_with_segments(
            &[Segment {
                duration_secs: request.duration_secs,
                ci: current_ci,
            }],
            &model,
        );

        // Running now carries no wait penalty, so its score is its emission.
        let run_now = current_ci <= request.threshold && now_emission <= analysis.best.score * RUN_NOW_TOLERANCE;
        let chosen = if run_now { analysis.current } else { analysis.best };
        let (expected_emission_kg, emission_reduction_vs_now) = if run_now {
            (now_emission, 0.0)
        } else if now_emission > 0.0 {
            let best = analysis.best.window.emission_kg;
            (best, (now_emission - best) / now_emission * 100.0)
        } else {
            (analysis.best.window.emission_kg, 0.0)
        };

        info!(
            zone = %request.zone,
            current_ci,
            run_now,
            start = %chosen.window.start,
            "suggested window"
        );

        Ok(Suggestion {
            zone: request.zone.clone(),
            current_ci,
            best_window_start: chosen.window.start,
            best_window_end: chosen.window.end,
            expected_emission_kg,
            emission_reduction_vs_now,
            run_now,
        })
    }
}
