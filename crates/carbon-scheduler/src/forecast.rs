//! Forecast preparation helpers.

use std::collections::{HashMap, HashSet};

use carbon_core::ForecastPoint;
use chrono::{DateTime, TimeDelta, Utc};

/// Sort ascending by timestamp. Equal timestamps keep their input order.
pub fn normalize_forecast_utc(points: &[ForecastPoint]) -> Vec<ForecastPoint> {
    let mut out = points.to_vec();
    out.sort_by_key(|p| p.timestamp);
    out
}

/// Keep points in `[eval_start, eval_start + lookahead_hours]`, both ends
/// inclusive.
pub fn clip_forecast_to_window(
    points: &[ForecastPoint],
    eval_start: DateTime<Utc>,
    lookahead_hours: u32,
) -> Vec<ForecastPoint> {
    if lookahead_hours == 0 {
        return Vec::new();
    }
    let limit = eval_start + TimeDelta::hours(i64::from(lookahead_hours));
    points
        .iter()
        .filter(|p| p.timestamp >= eval_start && p.timestamp <= limit)
        .copied()
        .collect()
}

/// Unix second → index of the first point at that second.
pub fn build_forecast_index(points: &[ForecastPoint]) -> HashMap<i64, usize> {
    let mut index = HashMap::with_capacity(points.len());
    for (i, point) in points.iter().enumerate() {
        index.entry(point.timestamp.timestamp()).or_insert(i);
    }
    index
}

/// Timestamps (to the second) present in every listed zone, ascending.
pub fn intersect_timestamps(
    zones: &[String],
    forecasts: &HashMap<String, Vec<ForecastPoint>>,
) -> Vec<DateTime<Utc>> {
    let Some((first, rest)) = zones.split_first() else {
        return Vec::new();
    };
    let seconds = |zone: &String| -> HashSet<i64> {
        forecasts
            .get(zone)
            .map(|points| points.iter().map(|p| p.timestamp.timestamp()).collect())
            .unwrap_or_default()
    };

    let mut common = seconds(first);
    for zone in rest {
        let other = seconds(zone);
        common.retain(|ts| other.contains(ts));
    }

    let mut out: Vec<DateTime<Utc>> = common
        .into_iter()
        .filter_map(|ts| DateTime::from_timestamp(ts, 0))
        .collect();
    out.sort();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_767_261_600 + h * 3600, 0).unwrap()
    }

    fn point(h: i64, ci: f64) -> ForecastPoint {
        ForecastPoint::new(at(h), ci)
    }

    #[test]
    fn normalize_sorts_ascending() {
        let out = normalize_forecast_utc(&[point(2, 0.2), point(0, 0.5), point(1, 0.1)]);
        let hours: Vec<_> = out.iter().map(|p| p.timestamp).collect();
        assert_eq!(hours, vec![at(0), at(1), at(2)]);
    }

    #[test]
    fn clip_is_inclusive_at_both_ends() {
        let points = [point(-1, 0.9), point(0, 0.5), point(2, 0.3), point(3, 0.2)];
        let clipped = clip_forecast_to_window(&points, at(0), 2);
        assert_eq!(clipped, vec![point(0, 0.5), point(2, 0.3)]);
        assert!(clip_forecast_to_window(&points, at(0), 0).is_empty());
    }

    #[test]
    fn index_keeps_first_occurrence() {
        let points = [point(0, 0.5), point(0, 0.7), point(1, 0.1)];
        let index = build_forecast_index(&points);
        assert_eq!(index[&at(0).timestamp()], 0);
        assert_eq!(index[&at(1).timestamp()], 2);
    }

    #[test]
    fn intersection_of_exact_timestamps() {
        let zones = vec!["A".to_string(), "B".to_string()];
        let forecasts = HashMap::from([
            ("A".to_string(), vec![point(0, 0.1), point(1, 0.2), point(2, 0.3)]),
            ("B".to_string(), vec![point(1, 0.4), point(2, 0.5), point(3, 0.6)]),
        ]);
        assert_eq!(intersect_timestamps(&zones, &forecasts), vec![at(1), at(2)]);
        assert!(intersect_timestamps(&[], &forecasts).is_empty());
    }
}
