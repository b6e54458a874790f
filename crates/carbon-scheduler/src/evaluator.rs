//! Windowed emission queries over a sparse forecast.
//!
//! Each forecast point becomes a segment lasting until the next point
//! (the last one lasts as long as the gap before it, a lone point one
//! hour), clipped at the window end. A prefix sum of `CI × seconds` over
//! the segments turns "average CI over `[start, start + duration)`" into
//! two integral lookups.

use carbon_core::{ForecastPoint, ModelContext, Segment, estimate_emissions_with_segments};
use chrono::{DateTime, TimeDelta, Utc};

/// Segment length used when a forecast has a single point.
pub const DEFAULT_SLICE_SECONDS: i64 = 3600;

/// Immutable prefix-sum view of one forecast up to a window end.
#[derive(Debug, Clone)]
pub struct EmissionEvaluator {
    base: DateTime<Utc>,
    starts: Vec<i64>,
    ends: Vec<i64>,
    ci: Vec<f64>,
    /// `prefix[i]` = integral of CI over segments `0..i`.
    prefix: Vec<f64>,
    coverage_secs: i64,
    coverage_end: i64,
}

/// One kept segment, as offsets in seconds from the first point.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Slice {
    start: i64,
    end: i64,
    ci: f64,
}

/// Segments inferred from sorted `points`, clipped at `window_end`.
fn inferred_slices(points: &[ForecastPoint], window_end: DateTime<Utc>) -> Vec<Slice> {
    let Some(first) = points.first() else {
        return Vec::new();
    };
    let base = first.timestamp;
    points
        .iter()
        .enumerate()
        .filter_map(|(i, point)| {
            let duration = inferred_slice_duration(points, i, window_end);
            let start = (point.timestamp - base).num_seconds();
            (duration > 0 && start >= 0).then_some(Slice {
                start,
                end: start + duration,
                ci: point.ci,
            })
        })
        .collect()
}

/// Seconds point `idx` stands for: gap to the next point, else gap from the
/// previous one, else [`DEFAULT_SLICE_SECONDS`], never past `window_end`.
/// Zero means the point contributes nothing.
pub fn inferred_slice_duration(points: &[ForecastPoint], idx: usize, window_end: DateTime<Utc>) -> i64 {
    let Some(point) = points.get(idx) else {
        return 0;
    };
    let max_available = (window_end - point.timestamp).num_seconds();
    if max_available <= 0 {
        return 0;
    }
    let candidate = if let Some(next) = points.get(idx + 1) {
        (next.timestamp - point.timestamp).num_seconds()
    } else if let Some(prev) = idx.checked_sub(1).and_then(|i| points.get(i)) {
        (point.timestamp - prev.timestamp).num_seconds()
    } else {
        DEFAULT_SLICE_SECONDS
    };
    if candidate <= 0 {
        return 0;
    }
    candidate.min(max_available)
}

impl EmissionEvaluator {
    /// Build from points sorted ascending. `None` if no point yields a
    /// positive-length segment.
    pub fn build(points: &[ForecastPoint], window_end: DateTime<Utc>) -> Option<Self> {
        let base = points.first()?.timestamp;
        let slices = inferred_slices(points, window_end);
        let last_end = slices.last()?.end;

        let mut prefix = Vec::with_capacity(slices.len() + 1);
        prefix.push(0.0);
        let mut coverage_secs = 0;
        for slice in &slices {
            let len = slice.end - slice.start;
            prefix.push(prefix[prefix.len() - 1] + len as f64 * slice.ci);
            coverage_secs += len;
        }

        Some(Self {
            base,
            starts: slices.iter().map(|s| s.start).collect(),
            ends: slices.iter().map(|s| s.end).collect(),
            ci: slices.iter().map(|s| s.ci).collect(),
            prefix,
            coverage_secs,
            coverage_end: last_end,
        })
    }

    pub fn base(&self) -> DateTime<Utc> {
        self.base
    }

    /// Offset of the first kept segment.
    pub fn first_offset(&self) -> i64 {
        self.starts[0]
    }

    /// Total seconds covered by kept segments.
    pub fn coverage_seconds(&self) -> i64 {
        self.coverage_secs
    }

    pub fn coverage_end(&self) -> DateTime<Utc> {
        self.base + TimeDelta::seconds(self.coverage_end)
    }

    pub fn offset_of(&self, at: DateTime<Utc>) -> i64 {
        (at - self.base).num_seconds()
    }

    /// Average CI over `[start_offset, start_offset + duration)`, or `None`
    /// when the window starts before the first segment or ends past the
    /// covered range.
    pub fn average_ci_at_offset(&self, start_offset: i64, duration_secs: u64) -> Option<f64> {
        let end_offset = self.window_end_offset(start_offset, duration_secs)?;
        let ci_seconds = self.integral_at(end_offset) - self.integral_at(start_offset);
        Some(ci_seconds / duration_secs as f64)
    }

    pub fn estimate_at(&self, start: DateTime<Utc>, duration_secs: u64, model: &ModelContext) -> Option<f64> {
        self.estimate_at_offset(self.offset_of(start), duration_secs, model)
    }

    pub fn estimate_at_offset(&self, start_offset: i64, duration_secs: u64, model: &ModelContext) -> Option<f64> {
        let avg = self.average_ci_at_offset(start_offset, duration_secs)?;
        Some(emission_for_average(duration_secs, avg, model))
    }

    /// A cursor for queries with non-decreasing offsets.
    pub fn cursor(&self) -> IntegralCursor<'_> {
        IntegralCursor {
            evaluator: self,
            idx: 0,
        }
    }

    fn window_end_offset(&self, start_offset: i64, duration_secs: u64) -> Option<i64> {
        let first_start = *self.starts.first()?;
        if duration_secs == 0 || start_offset < first_start {
            return None;
        }
        let end_offset = start_offset.checked_add(i64::try_from(duration_secs).ok()?)?;
        (end_offset <= self.coverage_end).then_some(end_offset)
    }

    fn total(&self) -> f64 {
        self.prefix[self.prefix.len() - 1]
    }

    /// Integral of CI from the first segment start up to `offset`.
    fn integral_at(&self, offset: i64) -> f64 {
        if offset <= self.starts[0] {
            return 0.0;
        }
        if offset >= self.coverage_end {
            return self.total();
        }
        let idx = self.ends.partition_point(|end| *end <= offset);
        self.integral_within(idx, offset)
    }

    /// Integral up to `offset`, given `idx` is the first segment ending
    /// after it.
    fn integral_within(&self, idx: usize, offset: i64) -> f64 {
        if idx >= self.ends.len() {
            return self.total();
        }
        if offset <= self.starts[idx] {
            return self.prefix[idx];
        }
        self.prefix[idx] + (offset - self.starts[idx]) as f64 * self.ci[idx]
    }
}

/// Amortised O(1) integral lookups for monotonically increasing offsets.
#[derive(Debug)]
pub struct IntegralCursor<'a> {
    evaluator: &'a EmissionEvaluator,
    idx: usize,
}

impl IntegralCursor<'_> {
    pub fn integral_at(&mut self, offset: i64) -> f64 {
        let e = self.evaluator;
        if offset <= e.starts[0] {
            return 0.0;
        }
        if offset >= e.coverage_end {
            return e.total();
        }
        while self.idx < e.ends.len() && offset >= e.ends[self.idx] {
            self.idx += 1;
        }
        e.integral_within(self.idx, offset)
    }
}

/// Emission of running `duration_secs` at a constant average CI.
pub fn emission_for_average(duration_secs: u64, avg_ci: f64, model: &ModelContext) -> f64 {
    estimate_emissions_with_segments(
        &[Segment {
            duration_secs,
            ci: avg_ci,
        }],
        model,
    )
}

/// Seconds of forecast coverage before `window_end`.
pub fn forecast_coverage_seconds(points: &[ForecastPoint], window_end: DateTime<Utc>) -> i64 {
    EmissionEvaluator::build(points, window_end)
        .map(|e| e.coverage_seconds())
        .unwrap_or(0)
}

/// Emission of a window starting at the first forecast point.
pub fn estimate_window_emissions(
    points: &[ForecastPoint],
    duration_secs: u64,
    model: &ModelContext,
    window_end: DateTime<Utc>,
) -> Option<f64> {
    let start = points.first()?.timestamp;
    estimate_window_emissions_at(points, start, duration_secs, model, window_end)
}

/// Emission of the window `[start, start + duration)` computed by walking
/// the segments one by one, without prefix sums.
pub fn estimate_window_emissions_at(
    points: &[ForecastPoint],
    start: DateTime<Utc>,
    duration_secs: u64,
    model: &ModelContext,
    window_end: DateTime<Utc>,
) -> Option<f64> {
    let base = points.first()?.timestamp;
    let slices = inferred_slices(points, window_end);
    let first = slices.first()?;
    let coverage_end = slices.last()?.end;

    let from = (start - base).num_seconds();
    let to = from.checked_add(i64::try_from(duration_secs).ok()?)?;
    if duration_secs == 0 || from < first.start || to > coverage_end {
        return None;
    }

    let segments: Vec<Segment> = slices
        .iter()
        .filter_map(|slice| {
            let overlap = slice.end.min(to) - slice.start.max(from);
            (overlap > 0).then_some(Segment {
                duration_secs: overlap as u64,
                ci: slice.ci,
            })
        })
        .collect();
    Some(estimate_emissions_with_segments(&segments, model))
}

/// `start <= now < end`.
pub fn is_within_window(now: DateTime<Utc>, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    now >= start && now < end
}

#[cfg(test)]
mod tests {
    use super::*;
    use carbon_core::estimate_energy;

    fn t(hh: u32, mm: u32) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(&format!("2026-01-01T{hh:02}:{mm:02}:00Z"))
            .unwrap()
            .with_timezone(&Utc)
    }

    fn point(hh: u32, mm: u32, ci: f64) -> ForecastPoint {
        ForecastPoint::new(t(hh, mm), ci)
    }

    fn model(load: f64) -> ModelContext {
        ModelContext::new("ubuntu", load, 1.2)
    }

    #[test]
    fn coverage_sums_inferred_segments() {
        let points = [point(10, 0, 0.4), point(10, 30, 0.5), point(11, 30, 0.6)];
        // 1800 + 3600 + min(3600, 1800 left before 12:00)
        assert_eq!(forecast_coverage_seconds(&points, t(12, 0)), 7200);

        let evaluator = EmissionEvaluator::build(&points, t(12, 0)).unwrap();
        assert_eq!(evaluator.coverage_end(), t(12, 0));
    }

    #[test]
    fn window_spanning_two_hours() {
        let points = [point(10, 0, 0.4), point(11, 0, 0.8)];
        let m = model(0.5);
        let emission = estimate_window_emissions(&points, 5400, &m, t(12, 0)).unwrap();

        // 165 W: one hour at 0.4 plus half an hour at 0.8, with PUE 1.2.
        let expected = 0.165 * 1.2 * 0.4 + 0.0825 * 1.2 * 0.8;
        assert!((emission - expected).abs() < 1e-9);
    }

    #[test]
    fn window_crossing_a_half_hour_step() {
        let points = [point(10, 0, 0.2), point(10, 30, 0.8)];
        let m = model(0.6);
        let emission = estimate_window_emissions(&points, 3600, &m, t(12, 0)).unwrap();

        // avg CI 0.5 over one hour at 176 W.
        let expected = estimate_energy(3600, &m).emission_kg(0.5);
        assert!((emission - expected).abs() < 1e-9);
    }

    #[test]
    fn prefix_sums_match_segment_walk_everywhere() {
        let points = [
            point(10, 0, 0.31),
            point(10, 15, 0.12),
            point(11, 0, 0.57),
            point(12, 30, 0.05),
            point(13, 0, 0.44),
        ];
        let window_end = t(13, 40);
        let m = model(0.7);
        let evaluator = EmissionEvaluator::build(&points, window_end).unwrap();

        for start_min in (0..=220).step_by(5) {
            let start = t(10, 0) + TimeDelta::minutes(start_min);
            for duration in [300u64, 900, 3600, 5400, 9000] {
                let fast = evaluator.estimate_at(start, duration, &m);
                let slow = estimate_window_emissions_at(&points, start, duration, &m, window_end);
                match (fast, slow) {
                    (Some(a), Some(b)) => assert!((a - b).abs() < 1e-9, "{start} {duration}: {a} vs {b}"),
                    (None, None) => {}
                    other => panic!("{start} {duration}: disagreement {other:?}"),
                }
            }
        }
    }

    #[test]
    fn window_past_coverage_is_rejected() {
        let points = [point(10, 0, 0.3)];
        let evaluator = EmissionEvaluator::build(&points, t(20, 0)).unwrap();
        assert_eq!(evaluator.coverage_seconds(), 3600);
        assert!(evaluator.estimate_at(t(10, 0), 3600, &model(0.5)).is_some());
        assert!(evaluator.estimate_at(t(10, 0), 3601, &model(0.5)).is_none());
        assert!(evaluator.estimate_at(t(9, 59), 60, &model(0.5)).is_none());
        assert!(evaluator.estimate_at(t(10, 0), 0, &model(0.5)).is_none());
    }

    #[test]
    fn window_end_clips_and_drops_segments() {
        let points = [point(10, 0, 0.3), point(11, 0, 0.4), point(12, 0, 0.5)];
        let evaluator = EmissionEvaluator::build(&points, t(11, 30)).unwrap();
        assert_eq!(evaluator.coverage_seconds(), 3600 + 1800);
        assert_eq!(inferred_slice_duration(&points, 2, t(11, 30)), 0);
        assert!(EmissionEvaluator::build(&points, t(10, 0)).is_none());
        assert!(EmissionEvaluator::build(&[], t(10, 0)).is_none());
    }

    #[test]
    fn cursor_agrees_with_binary_search() {
        let points = [point(10, 0, 0.3), point(10, 45, 0.1), point(12, 0, 0.6)];
        let evaluator = EmissionEvaluator::build(&points, t(13, 0)).unwrap();
        let mut cursor = evaluator.cursor();
        for offset in (-600..=12_000).step_by(300) {
            let a = cursor.integral_at(offset);
            let b = evaluator.integral_at(offset);
            assert!((a - b).abs() < 1e-12, "offset {offset}");
        }
    }

    #[test]
    fn within_window_is_half_open() {
        assert!(is_within_window(t(10, 0), t(10, 0), t(11, 0)));
        assert!(is_within_window(t(10, 59), t(10, 0), t(11, 0)));
        assert!(!is_within_window(t(11, 0), t(10, 0), t(11, 0)));
        assert!(!is_within_window(t(9, 59), t(10, 0), t(11, 0)));
    }
}
