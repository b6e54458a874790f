//! Multi-zone search: the best window of each zone, ranked.
//!
//! Zones are analysed concurrently under one deadline and one evaluation
//! anchor. A zone that fails is reported in `failures`; the call only
//! fails when every zone does.

use std::collections::BTreeMap;
use std::time::Duration;

use carbon_core::ModelContext;
use carbon_provider::{CallContext, ContextError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{ErrorKind, SchedulerError, SchedulerResult};
use crate::planner::{Planner, WindowRequest};
use crate::validation::{validate_wait_cost, validate_window, validate_zones};

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizeRequest {
    pub zones: Vec<String>,
    pub duration_secs: u64,
    pub lookahead_hours: u32,
    pub model: ModelContext,
    pub wait_cost: f64,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneResult {
    pub zone: String,
    pub emission_kg: f64,
    pub score: f64,
    pub best_start: DateTime<Utc>,
    pub best_end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizeReport {
    /// Ascending by score, then emission.
    pub results: Vec<ZoneResult>,
    /// Zone → error message for zones that produced no window.
    pub failures: BTreeMap<String, String>,
    pub best: ZoneResult,
    pub worst: ZoneResult,
    /// `(worst.score - best.score) / worst.score × 100`.
    pub reduction_pct: f64,
}

pub(crate) fn validate_timeout(timeout: Duration) -> SchedulerResult<()> {
    if timeout.is_zero() {
        return Err(SchedulerError::Input("timeout must be > 0".into()));
    }
    Ok(())
}

/// `zone <name> failed: <reason>` lines, ordered by zone.
pub fn format_zone_failures(failures: &BTreeMap<String, String>) -> Vec<String> {
    failures
        .iter()
        .map(|(zone, reason)| format!("zone {zone} failed: {reason}"))
        .collect()
}

impl Planner {
    pub async fn optimize(&self, ctx: &CallContext, request: &OptimizeRequest) -> SchedulerResult<OptimizeReport> {
        validate_zones(&request.zones)?;
        validate_window(request.duration_secs, request.lookahead_hours)?;
        validate_wait_cost(request.wait_cost)?;
        validate_timeout(request.timeout)?;
        let model = request.model.clone().resolve()?;
        let eval_start = self.clock().now();

        let ctx = ctx.with_timeout(request.timeout);

        let handles: Vec<_> = request
            .zones
            .iter()
            .map(|zone| {
                let planner = self.clone();
                let ctx = ctx.clone();
                let window = WindowRequest {
                    zone: zone.clone(),
                    duration_secs: request.duration_secs,
                    lookahead_hours: request.lookahead_hours,
                    model: model.clone(),
                    wait_cost: request.wait_cost,
                };
                let handle = tokio::spawn(async move { planner.analyze_best_window(&ctx, &window, eval_start).await });
                (zone.clone(), handle)
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        let mut failures = BTreeMap::new();
        let mut failed_kinds = Vec::new();
        for (zone, handle) in handles {
            let outcome = handle
                .await
                .unwrap_or_else(|e| Err(SchedulerError::Provider(format!("zone task failed: {e}"))));
            match outcome {
                Ok(analysis) => results.push(ZoneResult {
                    zone,
                    emission_kg: analysis.best.window.emission_kg,
                    score: analysis.best.score,
                    best_start: analysis.best.window.start,
                    best_end: analysis.best.window.end,
                }),
                Err(err) => {
                    warn!(zone = %zone, error = %err, "zone analysis failed");
                    failed_kinds.push(err.kind());
                    failures.insert(zone, err.to_string());
                }
            }
        }

        if ctx.err() == Some(ContextError::DeadlineExceeded) {
            return Err(SchedulerError::Timeout("operation timed out".into()));
        }

        if results.is_empty() {
            return Err(all_zones_failed(&failed_kinds));
        }

        results.sort_by(|a, b| {
            a.score
                .total_cmp(&b.score)
                .then_with(|| a.emission_kg.total_cmp(&b.emission_kg))
        });
        let best = results[0].clone();
        let worst = results[results.len() - 1].clone();
        let reduction_pct = if worst.score > 0.0 {
            (worst.score - best.score) / worst.score * 100.0
        } else {
            0.0
        };

        info!(
            zones = request.zones.len(),
            failed = failures.len(),
            best_zone = %best.zone,
            reduction_pct,
            "optimized across zones"
        );

        Ok(OptimizeReport {
            results,
            failures,
            best,
            worst,
            reduction_pct,
        })
    }
}

/// Timeouts win over provider failures, which win over missing windows.
fn all_zones_failed(kinds: &[ErrorKind]) -> SchedulerError {
    if kinds.contains(&ErrorKind::Timeout) {
        SchedulerError::Timeout("operation timed out".into())
    } else if kinds
        .iter()
        .any(|k| !matches!(k, ErrorKind::Timeout | ErrorKind::NoValidWindow))
    {
        SchedulerError::Provider("all zones failed due to provider errors".into())
    } else {
        SchedulerError::NoValidWindow("no valid window found".into())
    }
}
