//! The `Planner`: use cases over one provider and one clock.
//!
//! Each use case lives in its own module as an `impl Planner` block; this
//! module holds the shared single-zone analysis every other search builds
//! on.

use std::sync::Arc;

use carbon_core::{Clock, ForecastPoint, ModelContext, SystemClock};
use carbon_provider::{CallContext, SharedProvider};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::debug;

use crate::error::{SchedulerError, SchedulerResult};
use crate::evaluator::EmissionEvaluator;
use crate::forecast::{clip_forecast_to_window, normalize_forecast_utc};
use crate::validation::{validate_wait_cost, validate_window, validate_zone};
use crate::window::{ScoredWindow, find_best_window};

/// Parameters of a single-zone window search.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowRequest {
    pub zone: String,
    pub duration_secs: u64,
    pub lookahead_hours: u32,
    pub model: ModelContext,
    /// kg of equivalent penalty per hour of delay.
    pub wait_cost: f64,
}

/// Result of a single-zone search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WindowAnalysis {
    /// First valid window, the run-now baseline.
    pub current: ScoredWindow,
    pub best: ScoredWindow,
    /// Emission saving of `best` over `current`, in percent.
    pub reduction_pct: f64,
}

#[derive(Clone)]
pub struct Planner {
    provider: SharedProvider,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Planner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Planner").field("clock", &self.clock).finish_non_exhaustive()
    }
}

impl Planner {
    pub fn new(provider: SharedProvider) -> Self {
        Self::with_clock(provider, Arc::new(SystemClock))
    }

    pub fn with_clock(provider: SharedProvider, clock: Arc<dyn Clock>) -> Self {
        Self { provider, clock }
    }

    pub fn provider(&self) -> &SharedProvider {
        &self.provider
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Score every forecast-point start for `request.zone` against
    /// `eval_start` and keep the best and the first.
    pub async fn analyze_best_window(
        &self,
        ctx: &CallContext,
        request: &WindowRequest,
        eval_start: DateTime<Utc>,
    ) -> SchedulerResult<WindowAnalysis> {
        let zone = request.zone.as_str();
        validate_zone(zone)?;
        validate_window(request.duration_secs, request.lookahead_hours)?;
        let model = request.model.clone().resolve()?;
        validate_wait_cost(request.wait_cost)?;

        let forecast = self
            .clipped_forecast(ctx, zone, request.lookahead_hours, eval_start)
            .await?;
        if forecast.is_empty() {
            return Err(SchedulerError::NoValidWindow(format!(
                "no forecast points found for zone {zone}"
            )));
        }

        let window_end = eval_start + TimeDelta::hours(i64::from(request.lookahead_hours));
        let evaluator = EmissionEvaluator::build(&forecast, window_end).ok_or_else(|| {
            SchedulerError::NoValidWindow(format!("no forecast points found for zone {zone}"))
        })?;

        let duration = request.duration_secs;
        let coverage = evaluator.coverage_seconds();
        if coverage < duration as i64 {
            return Err(SchedulerError::NoValidWindow(format!(
                "forecast does not cover full duration: need {duration}s but only {coverage}s available"
            )));
        }

        let search = find_best_window(&forecast, &evaluator, duration, &model, eval_start, request.wait_cost)
            .ok_or_else(|| {
                SchedulerError::NoValidWindow(format!(
                    "forecast does not cover full duration: need {duration}s within lookahead {}h",
                    request.lookahead_hours
                ))
            })?;

        let current = search.current.window.emission_kg;
        let best = search.best.window.emission_kg;
        let reduction_pct = if current > 0.0 {
            (current - best) / current * 100.0
        } else {
            0.0
        };

        debug!(
            zone = %zone,
            points = forecast.len(),
            coverage_secs = coverage,
            best_start = %search.best.window.start,
            best_score = search.best.score,
            "analyzed forecast windows"
        );

        Ok(WindowAnalysis {
            current: search.current,
            best: search.best,
            reduction_pct,
        })
    }

    /// Fetch, sort and clip a zone's forecast to
    /// `[eval_start, eval_start + lookahead_hours]`.
    pub(crate) async fn clipped_forecast(
        &self,
        ctx: &CallContext,
        zone: &str,
        lookahead_hours: u32,
        eval_start: DateTime<Utc>,
    ) -> SchedulerResult<Vec<ForecastPoint>> {
        let forecast = self
            .provider
            .get_forecast_ci(ctx, zone, lookahead_hours)
            .await
            .map_err(|err| SchedulerError::from_provider(&format!("forecast for zone {zone}"), err))?;
        let normalized = normalize_forecast_utc(&forecast);
        Ok(clip_forecast_to_window(&normalized, eval_start, lookahead_hours))
    }

    pub(crate) async fn current_ci(&self, ctx: &CallContext, zone: &str) -> SchedulerResult<f64> {
        self.provider
            .get_current_ci(ctx, zone)
            .await
            .map_err(|err| SchedulerError::from_provider(&format!("current CI for zone {zone}"), err))
    }
}
