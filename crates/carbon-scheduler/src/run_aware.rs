//! Wait for a greener moment, then say "run".
//!
//! The best window is computed once on entry and never refreshed; only
//! the live CI is polled. Each poll ends the wait if we are inside the
//! best window or the live CI is at or below `threshold_enter`. The wait
//! ends in error once the best window has passed or `max_wait` runs out.

use std::sync::Arc;
use std::time::Duration;

use carbon_core::ModelContext;
use carbon_provider::{CallContext, ContextError};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::info;

use crate::error::{SchedulerError, SchedulerResult};
use crate::evaluator::is_within_window;
use crate::planner::{Planner, WindowRequest};
use crate::validation::{validate_max_wait, validate_no_regret, validate_threshold, validate_window, validate_zone};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Receives human-readable progress lines while waiting.
pub type StatusSink = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone)]
pub struct RunAwareRequest {
    pub zone: String,
    pub duration_secs: u64,
    /// Legacy single threshold, used for whichever of enter/exit is unset (0).
    pub threshold: f64,
    pub threshold_enter: f64,
    pub threshold_exit: f64,
    pub lookahead_hours: u32,
    pub model: ModelContext,
    pub max_wait: Duration,
    /// Zero means [`DEFAULT_POLL_INTERVAL`].
    pub poll_every: Duration,
    /// Guard is off unless both this and the reduction are positive.
    pub no_regret_max_delay: Duration,
    pub no_regret_min_reduction_pct: f64,
    pub status: Option<StatusSink>,
}

impl std::fmt::Debug for RunAwareRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunAwareRequest")
            .field("zone", &self.zone)
            .field("duration_secs", &self.duration_secs)
            .field("threshold_enter", &self.threshold_enter)
            .field("threshold_exit", &self.threshold_exit)
            .field("max_wait", &self.max_wait)
            .field("poll_every", &self.poll_every)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunDecision {
    /// The forecast saving is too small for the wait.
    NoRegretGuard,
    EnteredWindow,
    BelowThreshold,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunAwareOutcome {
    pub message: String,
    pub decision: RunDecision,
    pub best_window_start: DateTime<Utc>,
    pub best_window_end: DateTime<Utc>,
}

/// `(enter, exit)`; an unset (non-positive) side takes the legacy value.
pub fn resolve_thresholds(threshold: f64, enter: f64, exit: f64) -> SchedulerResult<(f64, f64)> {
    let enter = if enter > 0.0 { enter } else { threshold };
    let exit = if exit > 0.0 { exit } else { threshold };
    validate_threshold("threshold-enter", enter)?;
    validate_threshold("threshold-exit", exit)?;
    if enter > exit {
        return Err(SchedulerError::Input(
            "threshold-enter must be <= threshold-exit".into(),
        ));
    }
    Ok((enter, exit))
}

/// Whether waiting `best_start - start` is too long for `reduction_pct`.
pub fn no_regret_guard_fires(
    start: DateTime<Utc>,
    best_start: DateTime<Utc>,
    reduction_pct: f64,
    max_delay: Duration,
    min_reduction_pct: f64,
) -> bool {
    if max_delay.is_zero() || min_reduction_pct <= 0.0 {
        return false;
    }
    let Ok(wait) = (best_start - start).to_std() else {
        return false;
    };
    !wait.is_zero() && wait > max_delay && reduction_pct < min_reduction_pct
}

/// `1h30m0s` style, whole seconds.
fn format_wait(delta: TimeDelta) -> String {
    let secs = (delta.num_milliseconds() as f64 / 1000.0).round() as i64;
    let (h, m, s) = (secs / 3600, secs % 3600 / 60, secs % 60);
    match (h, m) {
        (0, 0) => format!("{s}s"),
        (0, _) => format!("{m}m{s}s"),
        _ => format!("{h}h{m}m{s}s"),
    }
}

impl Planner {
    pub async fn run_aware(&self, ctx: &CallContext, request: &RunAwareRequest) -> SchedulerResult<RunAwareOutcome> {
        validate_zone(&request.zone)?;
        let (enter, exit) = resolve_thresholds(request.threshold, request.threshold_enter, request.threshold_exit)?;
        validate_window(request.duration_secs, request.lookahead_hours)?;
        validate_max_wait(request.max_wait)?;
        validate_no_regret(request.no_regret_min_reduction_pct)?;
        let model = request.model.clone().resolve()?;

        let clock = self.clock();
        let start = clock.now();
        let max_wait = TimeDelta::from_std(request.max_wait)
            .map_err(|_| SchedulerError::Input("max-wait is out of range".into()))?;
        let deadline = start + max_wait;

        let analysis = self
            .analyze_best_window(
                ctx,
                &WindowRequest {
                    zone: request.zone.clone(),
                    duration_secs: request.duration_secs,
                    lookahead_hours: request.lookahead_hours,
                    model,
                    wait_cost: 0.0,
                },
                start,
            )
            .await?;
        if clock.now() >= deadline {
            return Err(max_wait_exceeded());
        }

        let best_start = analysis.best.window.start;
        let best_end = analysis.best.window.end;
        let outcome = |decision: RunDecision, message: String| {
            info!(zone = %request.zone, ?decision, "{message}");
            RunAwareOutcome {
                message,
                decision,
                best_window_start: best_start,
                best_window_end: best_end,
            }
        };

        if no_regret_guard_fires(
            start,
            best_start,
            analysis.reduction_pct,
            request.no_regret_max_delay,
            request.no_regret_min_reduction_pct,
        ) {
            let message = format!(
                "No-regret guard triggered: waiting {} for only {:.2}% expected reduction",
                format_wait(best_start - start),
                analysis.reduction_pct
            );
            return Ok(outcome(RunDecision::NoRegretGuard, message));
        }

        let poll_every = if request.poll_every.is_zero() {
            DEFAULT_POLL_INTERVAL
        } else {
            request.poll_every
        };
        info!(
            zone = %request.zone,
            best_start = %best_start,
            best_end = %best_end,
            enter,
            exit,
            "waiting for a greener window"
        );

        loop {
            let now = clock.now();
            if now >= deadline {
                return Err(max_wait_exceeded());
            }
            // The window end is exclusive.
            if now >= best_end {
                return Err(SchedulerError::MissedOptimalWindow("Missed optimal window".into()));
            }
            if is_within_window(now, best_start, best_end) {
                return Ok(outcome(RunDecision::EnteredWindow, "Entering optimal carbon window".into()));
            }

            let current_ci = self.current_ci(ctx, &request.zone).await?;
            if current_ci <= enter {
                return Ok(outcome(
                    RunDecision::BelowThreshold,
                    "CI dropped below threshold-enter, running now".into(),
                ));
            }

            let wait = match (deadline - now).to_std() {
                Ok(remaining) if !remaining.is_zero() => poll_every.min(remaining),
                _ => return Err(max_wait_exceeded()),
            };
            if let Some(status) = &request.status {
                if current_ci >= exit {
                    status(&format!("CI too high ({current_ci:.2} >= {exit:.2})"));
                } else {
                    status(&format!("CI in hysteresis band ({enter:.2} < {current_ci:.2} < {exit:.2})"));
                }
                let secs = wait.as_secs_f64().round().max(1.0) as u64;
                status(&format!("Waiting {secs}s..."));
            }

            ctx.run(clock.sleep(wait)).await.map_err(|err| match err {
                ContextError::DeadlineExceeded => SchedulerError::Timeout("operation timed out".into()),
                ContextError::Cancelled => SchedulerError::Provider(err.to_string()),
            })?;
        }
    }
}

fn max_wait_exceeded() -> SchedulerError {
    SchedulerError::MaxWaitExceeded("Max wait exceeded".into())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use carbon_core::{Clock, ForecastPoint, ManualClock};
    use carbon_provider::StaticProvider;

    use super::*;
    use crate::error::ErrorKind;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn hourly(cis: &[f64]) -> Vec<ForecastPoint> {
        cis.iter()
            .enumerate()
            .map(|(i, ci)| ForecastPoint::new(t0() + TimeDelta::hours(i as i64), *ci))
            .collect()
    }

    struct Harness {
        planner: Planner,
        clock: ManualClock,
        lines: Arc<Mutex<Vec<String>>>,
    }

    impl Harness {
        fn new(current: f64, forecast: &[f64]) -> Self {
            let provider = StaticProvider::new()
                .with_current("DE", current)
                .with_forecast("DE", hourly(forecast));
            let clock = ManualClock::new(t0());
            Self {
                planner: Planner::with_clock(Arc::new(provider), Arc::new(clock.clone())),
                clock,
                lines: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn request(&self, enter: f64, exit: f64) -> RunAwareRequest {
            let lines = Arc::clone(&self.lines);
            RunAwareRequest {
                zone: "DE".into(),
                duration_secs: 3600,
                threshold: 0.0,
                threshold_enter: enter,
                threshold_exit: exit,
                lookahead_hours: 12,
                model: ModelContext::default(),
                max_wait: Duration::from_secs(6 * 3600),
                poll_every: Duration::ZERO,
                no_regret_max_delay: Duration::ZERO,
                no_regret_min_reduction_pct: 0.0,
                status: Some(Arc::new(move |line: &str| lines.lock().unwrap().push(line.to_string()))),
            }
        }

        async fn run(&self, request: &RunAwareRequest) -> SchedulerResult<RunAwareOutcome> {
            self.planner.run_aware(&CallContext::background(), request).await
        }

        fn lines(&self) -> Vec<String> {
            self.lines.lock().unwrap().clone()
        }
    }

    #[tokio::test]
    async fn low_live_ci_runs_immediately() {
        let h = Harness::new(0.39, &[0.5, 0.45, 0.1]);
        let outcome = h.run(&h.request(0.40, 0.50)).await.unwrap();
        assert_eq!(outcome.decision, RunDecision::BelowThreshold);
        assert_eq!(outcome.message, "CI dropped below threshold-enter, running now");
        assert!(h.lines().is_empty());
        assert_eq!(h.clock.now(), t0());
    }

    #[tokio::test]
    async fn best_window_now_enters_immediately() {
        let h = Harness::new(0.9, &[0.1, 0.5]);
        let outcome = h.run(&h.request(0.2, 0.3)).await.unwrap();
        assert_eq!(outcome.decision, RunDecision::EnteredWindow);
        assert_eq!(outcome.best_window_start, t0());
    }

    #[tokio::test]
    async fn polls_until_the_best_window_opens() {
        let h = Harness::new(0.6, &[0.5, 0.1, 0.5]);
        let outcome = h.run(&h.request(0.3, 0.3)).await.unwrap();
        assert_eq!(outcome.decision, RunDecision::EnteredWindow);
        assert_eq!(h.clock.now(), t0() + TimeDelta::hours(1));

        let lines = h.lines();
        assert_eq!(lines.len(), 8);
        assert_eq!(lines[0], "CI too high (0.60 >= 0.30)");
        assert_eq!(lines[1], "Waiting 900s...");
    }

    #[tokio::test]
    async fn hysteresis_band_is_reported() {
        let h = Harness::new(0.4, &[0.5, 0.1, 0.5]);
        h.run(&h.request(0.3, 0.5)).await.unwrap();
        assert_eq!(h.lines()[0], "CI in hysteresis band (0.30 < 0.40 < 0.50)");
    }

    #[tokio::test]
    async fn gives_up_after_max_wait() {
        let h = Harness::new(0.9, &[0.5, 0.5, 0.1, 0.5]);
        let mut request = h.request(0.3, 0.3);
        request.max_wait = Duration::from_secs(30 * 60);
        let err = h.run(&request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MaxWaitExceeded);
        assert_eq!(h.clock.now(), t0() + TimeDelta::minutes(30));
    }

    #[tokio::test]
    async fn oversleeping_the_window_is_a_miss() {
        let h = Harness::new(0.9, &[0.5, 0.1, 0.5]);
        let mut request = h.request(0.3, 0.3);
        request.poll_every = Duration::from_secs(3 * 3600);
        let err = h.run(&request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissedOptimalWindow);
    }

    #[tokio::test]
    async fn no_regret_guard_skips_a_marginal_wait() {
        let h = Harness::new(0.9, &[0.30, 0.30, 0.29, 0.30]);
        let mut request = h.request(0.1, 0.1);
        request.no_regret_max_delay = Duration::from_secs(3600);
        request.no_regret_min_reduction_pct = 50.0;
        let outcome = h.run(&request).await.unwrap();
        assert_eq!(outcome.decision, RunDecision::NoRegretGuard);
        assert_eq!(
            outcome.message,
            "No-regret guard triggered: waiting 2h0m0s for only 3.33% expected reduction"
        );
    }

    #[tokio::test]
    async fn legacy_threshold_fills_both_sides() {
        let h = Harness::new(0.39, &[0.5, 0.1]);
        let mut request = h.request(0.0, 0.0);
        request.threshold = 0.4;
        assert_eq!(
            h.run(&request).await.unwrap().decision,
            RunDecision::BelowThreshold
        );
    }

    #[tokio::test(start_paused = true)]
    async fn context_deadline_interrupts_the_wait() {
        let base = Utc::now() + TimeDelta::minutes(30);
        let provider = StaticProvider::new().with_current("DE", 0.9).with_forecast(
            "DE",
            vec![ForecastPoint::new(base, 0.5), ForecastPoint::new(base + TimeDelta::hours(1), 0.1)],
        );
        let planner = Planner::new(Arc::new(provider));
        let request = RunAwareRequest {
            zone: "DE".into(),
            duration_secs: 3600,
            threshold: 0.3,
            threshold_enter: 0.0,
            threshold_exit: 0.0,
            lookahead_hours: 12,
            model: ModelContext::default(),
            max_wait: Duration::from_secs(6 * 3600),
            poll_every: Duration::ZERO,
            no_regret_max_delay: Duration::ZERO,
            no_regret_min_reduction_pct: 0.0,
            status: None,
        };
        let ctx = CallContext::background().with_timeout(Duration::from_secs(600));
        let err = planner.run_aware(&ctx, &request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn threshold_resolution() {
        assert_eq!(resolve_thresholds(0.4, 0.0, 0.0).unwrap(), (0.4, 0.4));
        assert_eq!(resolve_thresholds(0.4, 0.2, 0.0).unwrap(), (0.2, 0.4));
        assert!(resolve_thresholds(0.0, 0.0, 0.3).is_err());
        assert!(resolve_thresholds(0.0, 0.5, 0.3).is_err());
    }

    #[test]
    fn wait_formatting() {
        assert_eq!(format_wait(TimeDelta::seconds(45)), "45s");
        assert_eq!(format_wait(TimeDelta::minutes(90)), "1h30m0s");
        assert_eq!(format_wait(TimeDelta::seconds(125)), "2m5s");
    }
}
