//! Joint search over start time and zone.
//!
//! All zones are fetched concurrently and aligned onto one time axis, then
//! every `(axis timestamp, zone)` pair is scored against a single anchor
//! captured before the fan-out. The first zone failure cancels the rest.

use std::collections::HashMap;
use std::time::Duration;

use carbon_core::{ForecastPoint, ModelContext};
use carbon_provider::{CallContext, ContextError};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::error::{ErrorKind, SchedulerError, SchedulerResult};
use crate::evaluator::EmissionEvaluator;
use crate::optimize::validate_timeout;
use crate::planner::Planner;
use crate::time_axis::{FillMode, ResampleOptions, build_resampled_intersection_with_options, infer_resample_step};
use crate::validation::{validate_wait_cost, validate_window, validate_zones};
use crate::window::wait_penalty;

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizeGlobalRequest {
    pub zones: Vec<String>,
    pub duration_secs: u64,
    pub lookahead_hours: u32,
    pub model: ModelContext,
    pub wait_cost: f64,
    pub timeout: Duration,
    pub fill_mode: FillMode,
    /// Forward fill only. Zero means twice the inferred step.
    pub max_fill_age: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalPlan {
    pub best_zone: String,
    pub best_start: DateTime<Utc>,
    pub best_end: DateTime<Utc>,
    pub emission_kg: f64,
    pub score: f64,
    /// `(worst_score - best_score) / worst_score × 100` over all pairs.
    pub reduction_pct: f64,
    pub resample_step_secs: u64,
    pub resample_fill_mode: FillMode,
    pub resample_max_fill_age_secs: u64,
}

#[derive(Debug, Clone, Copy)]
struct Candidate<'a> {
    zone: &'a str,
    start: DateTime<Utc>,
    emission: f64,
    score: f64,
}

impl Planner {
    pub async fn optimize_global(
        &self,
        ctx: &CallContext,
        request: &OptimizeGlobalRequest,
    ) -> SchedulerResult<GlobalPlan> {
        validate_zones(&request.zones)?;
        validate_window(request.duration_secs, request.lookahead_hours)?;
        validate_wait_cost(request.wait_cost)?;
        validate_timeout(request.timeout)?;
        let model = request.model.clone().resolve()?;

        let request_start = self.clock().now();
        let window_end = request_start + TimeDelta::hours(i64::from(request.lookahead_hours));

        let ctx = ctx.with_timeout(request.timeout);
        let forecasts = self.fetch_all_zones(&ctx, request, request_start).await?;

        let step = infer_resample_step(&forecasts);
        let options = ResampleOptions {
            fill_mode: request.fill_mode,
            max_fill_age: request.max_fill_age,
        };
        let max_fill_age = options.effective_max_fill_age(step);
        let aligned = build_resampled_intersection_with_options(&request.zones, &forecasts, step, options)
            .filter(|a| !a.axis.is_empty())
            .ok_or_else(|| SchedulerError::NoValidWindow("no common timestamps across zones".into()))?;
        debug!(
            step_secs = step.as_secs(),
            axis_len = aligned.axis.len(),
            fill_mode = %request.fill_mode,
            "aligned zone forecasts"
        );

        let evaluators: Vec<(&str, EmissionEvaluator)> = request
            .zones
            .iter()
            .filter_map(|zone| {
                let points = aligned.zones.get(zone)?;
                Some((zone.as_str(), EmissionEvaluator::build(points, window_end)?))
            })
            .collect();

        let mut best: Option<Candidate<'_>> = None;
        let mut worst: Option<Candidate<'_>> = None;
        for &start in &aligned.axis {
            let penalty = wait_penalty(start, request_start, request.wait_cost);
            for (zone, evaluator) in &evaluators {
                let Some(emission) = evaluator.estimate_at(start, request.duration_secs, &model) else {
                    continue;
                };
                let candidate = Candidate {
                    zone: *zone,
                    start,
                    emission,
                    score: emission + penalty,
                };
                if best.is_none_or(|b| {
                    candidate.score < b.score || (candidate.score == b.score && candidate.emission < b.emission)
                }) {
                    best = Some(candidate);
                }
                if worst.is_none_or(|w| {
                    candidate.score > w.score || (candidate.score == w.score && candidate.emission > w.emission)
                }) {
                    worst = Some(candidate);
                }
            }
        }

        let best = best.ok_or_else(|| {
            SchedulerError::NoValidWindow("no valid full window found across zones and timestamps".into())
        })?;
        let reduction_pct = match worst {
            Some(w) if w.score > 0.0 => (w.score - best.score) / w.score * 100.0,
            _ => 0.0,
        };

        info!(
            zone = %best.zone,
            start = %best.start,
            emission_kg = best.emission,
            reduction_pct,
            "global optimum found"
        );

        Ok(GlobalPlan {
            best_zone: best.zone.to_string(),
            best_start: best.start,
            best_end: best.start + TimeDelta::seconds(request.duration_secs as i64),
            emission_kg: best.emission,
            score: best.score,
            reduction_pct,
            resample_step_secs: step.as_secs(),
            resample_fill_mode: request.fill_mode,
            resample_max_fill_age_secs: max_fill_age.as_secs(),
        })
    }

    /// Clipped forecasts of every zone. The first failure observed cancels
    /// the remaining fetches and is the one reported.
    async fn fetch_all_zones(
        &self,
        ctx: &CallContext,
        request: &OptimizeGlobalRequest,
        request_start: DateTime<Utc>,
    ) -> SchedulerResult<HashMap<String, Vec<ForecastPoint>>> {
        let mut tasks = JoinSet::new();
        for zone in &request.zones {
            let planner = self.clone();
            let ctx = ctx.clone();
            let zone = zone.clone();
            let lookahead = request.lookahead_hours;
            tasks.spawn(async move {
                let result = planner.clipped_forecast(&ctx, &zone, lookahead, request_start).await;
                let result = result.and_then(|points| {
                    if points.is_empty() {
                        Err(SchedulerError::NoValidWindow(
                            "no forecast points in lookahead window".into(),
                        ))
                    } else {
                        Ok(points)
                    }
                });
                (zone, result)
            });
        }

        let mut forecasts = HashMap::with_capacity(request.zones.len());
        let mut first_error: Option<SchedulerError> = None;
        while let Some(joined) = tasks.join_next().await {
            let (zone, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    ctx.cancel();
                    first_error.get_or_insert(SchedulerError::Provider(format!("zone task failed: {e}")));
                    continue;
                }
            };
            match result {
                Ok(points) => {
                    forecasts.insert(zone, points);
                }
                Err(err) => {
                    ctx.cancel();
                    first_error.get_or_insert_with(|| err.context(format!("zone {zone} failed")));
                }
            }
        }

        if ctx.err() == Some(ContextError::DeadlineExceeded) {
            return Err(SchedulerError::Timeout("operation timed out".into()));
        }
        match first_error {
            Some(err) if err.kind() == ErrorKind::Timeout => Err(SchedulerError::Timeout("operation timed out".into())),
            Some(err) => Err(err),
            None => Ok(forecasts),
        }
    }
}
