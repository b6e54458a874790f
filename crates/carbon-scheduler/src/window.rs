//! Candidate-window scan and scoring.
//!
//! Candidates start at forecast points, in order. The first valid one is
//! the "current" window; the best is the lowest score, where score is
//! emission plus a per-hour penalty for starting later than the
//! evaluation start. Equal scores keep the earlier start unless a later
//! one has strictly lower emission.

use carbon_core::{ForecastPoint, ModelContext};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::evaluator::{EmissionEvaluator, IntegralCursor, emission_for_average};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WindowEstimate {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub emission_kg: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoredWindow {
    #[serde(flatten)]
    pub window: WindowEstimate,
    pub score: f64,
}

impl ScoredWindow {
    /// Strict improvement: lower score, or equal score and lower emission.
    pub fn beats(&self, other: &ScoredWindow) -> bool {
        self.score < other.score
            || (self.score == other.score && self.window.emission_kg < other.window.emission_kg)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowSearch {
    pub current: ScoredWindow,
    pub best: ScoredWindow,
}

/// `wait_cost × hours since eval_start`, zero for starts at or before it.
pub fn wait_penalty(start: DateTime<Utc>, eval_start: DateTime<Utc>, wait_cost: f64) -> f64 {
    if wait_cost <= 0.0 {
        return 0.0;
    }
    let hours = (start - eval_start).num_milliseconds() as f64 / 3_600_000.0;
    wait_cost * hours.max(0.0)
}

pub fn score_window(window: WindowEstimate, eval_start: DateTime<Utc>, wait_cost: f64) -> ScoredWindow {
    ScoredWindow {
        window,
        score: window.emission_kg + wait_penalty(window.start, eval_start, wait_cost),
    }
}

/// Iterator over valid windows starting at each forecast point.
pub struct WindowScan<'a> {
    points: &'a [ForecastPoint],
    evaluator: &'a EmissionEvaluator,
    model: &'a ModelContext,
    duration_secs: u64,
    duration: Option<TimeDelta>,
    next: usize,
    start_cursor: IntegralCursor<'a>,
    end_cursor: IntegralCursor<'a>,
    first_start: i64,
    coverage_end: i64,
}

impl<'a> WindowScan<'a> {
    pub fn new(
        points: &'a [ForecastPoint],
        evaluator: &'a EmissionEvaluator,
        duration_secs: u64,
        model: &'a ModelContext,
    ) -> Self {
        let coverage_end = evaluator.offset_of(evaluator.coverage_end());
        Self {
            points,
            evaluator,
            model,
            duration_secs,
            duration: i64::try_from(duration_secs).ok().and_then(TimeDelta::try_seconds),
            next: 0,
            start_cursor: evaluator.cursor(),
            end_cursor: evaluator.cursor(),
            first_start: evaluator.first_offset(),
            coverage_end,
        }
    }
}

impl Iterator for WindowScan<'_> {
    type Item = WindowEstimate;

    fn next(&mut self) -> Option<WindowEstimate> {
        let duration = self.duration.filter(|_| self.duration_secs > 0)?;
        while let Some(point) = self.points.get(self.next) {
            self.next += 1;
            let start = self.evaluator.offset_of(point.timestamp);
            if start < self.first_start {
                continue;
            }
            let end = start.saturating_add(duration.num_seconds());
            if end > self.coverage_end {
                // Sorted input: every later start overflows too.
                self.next = self.points.len();
                return None;
            }
            let ci_seconds = self.end_cursor.integral_at(end) - self.start_cursor.integral_at(start);
            let avg = ci_seconds / self.duration_secs as f64;
            return Some(WindowEstimate {
                start: point.timestamp,
                end: point.timestamp + duration,
                emission_kg: emission_for_average(self.duration_secs, avg, self.model),
            });
        }
        None
    }
}

/// Best and current windows among forecast-point starts, or `None` when no
/// start fits inside the covered range.
pub fn find_best_window(
    points: &[ForecastPoint],
    evaluator: &EmissionEvaluator,
    duration_secs: u64,
    model: &ModelContext,
    eval_start: DateTime<Utc>,
    wait_cost: f64,
) -> Option<WindowSearch> {
    let mut scan = WindowScan::new(points, evaluator, duration_secs, model)
        .map(|window| score_window(window, eval_start, wait_cost));
    let current = scan.next()?;
    let best = scan.fold(current, |best, candidate| {
        if candidate.beats(&best) { candidate } else { best }
    });
    Some(WindowSearch { current, best })
}
