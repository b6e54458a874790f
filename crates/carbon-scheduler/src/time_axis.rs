//! Aligning several zones' forecasts onto one regular UTC grid.
//!
//! The grid covers the overlap of all zones (latest first sample to
//! earliest last sample, snapped inward to step boundaries). Each zone is
//! sampled onto the grid either by exact match or by carrying its latest
//! earlier sample forward for a bounded age. Only grid points every zone
//! could fill survive.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use carbon_core::ForecastPoint;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub const MIN_RESAMPLE_STEP: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_RESAMPLE_STEP: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FillMode {
    /// Carry the last sample forward, bounded by a maximum age.
    #[default]
    Forward,
    /// Require an exact timestamp match.
    Strict,
}

impl FromStr for FillMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "forward" => Ok(FillMode::Forward),
            "strict" => Ok(FillMode::Strict),
            other => Err(format!("unknown fill mode {other:?}")),
        }
    }
}

impl fmt::Display for FillMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FillMode::Forward => f.write_str("forward"),
            FillMode::Strict => f.write_str("strict"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResampleOptions {
    pub fill_mode: FillMode,
    /// Forward mode only. Zero means twice the step.
    pub max_fill_age: Duration,
}

impl ResampleOptions {
    /// The age bound actually applied for `step`. Strict mode has none.
    pub fn effective_max_fill_age(&self, step: Duration) -> Duration {
        match self.fill_mode {
            FillMode::Strict => Duration::ZERO,
            FillMode::Forward if self.max_fill_age.is_zero() => step * 2,
            FillMode::Forward => self.max_fill_age,
        }
    }
}

/// Axis shared by every zone plus each zone's samples on it.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedForecasts {
    pub axis: Vec<DateTime<Utc>>,
    pub zones: HashMap<String, Vec<ForecastPoint>>,
}

/// Smallest positive gap between consecutive samples of any zone, at
/// least five minutes. One hour when no zone has two distinct samples.
pub fn infer_resample_step(forecasts: &HashMap<String, Vec<ForecastPoint>>) -> Duration {
    let min_delta = forecasts
        .values()
        .flat_map(|points| {
            points
                .windows(2)
                .map(|w| w[1].timestamp.timestamp() - w[0].timestamp.timestamp())
        })
        .filter(|delta| *delta > 0)
        .min();

    match min_delta {
        None => DEFAULT_RESAMPLE_STEP,
        Some(secs) => Duration::from_secs(secs as u64).max(MIN_RESAMPLE_STEP),
    }
}

pub fn build_resampled_intersection(
    zones: &[String],
    forecasts: &HashMap<String, Vec<ForecastPoint>>,
    step: Duration,
) -> Option<AlignedForecasts> {
    build_resampled_intersection_with_options(zones, forecasts, step, ResampleOptions::default())
}

/// Align `zones` on a grid of `step`. `None` when the zones do not overlap
/// or no grid point can be filled for all of them. Each zone's points must
/// be sorted ascending.
pub fn build_resampled_intersection_with_options(
    zones: &[String],
    forecasts: &HashMap<String, Vec<ForecastPoint>>,
    step: Duration,
    options: ResampleOptions,
) -> Option<AlignedForecasts> {
    let step_secs = step.as_secs() as i64;
    if zones.is_empty() || step_secs <= 0 {
        return None;
    }

    let mut max_first = i64::MIN;
    let mut min_last = i64::MAX;
    for zone in zones {
        let points = forecasts.get(zone).filter(|p| !p.is_empty())?;
        max_first = max_first.max(points[0].timestamp.timestamp());
        min_last = min_last.min(points[points.len() - 1].timestamp.timestamp());
    }

    let start = ceil_to_step(max_first, step_secs);
    let end = floor_to_step(min_last, step_secs);
    if start > end {
        return None;
    }
    let grid: Vec<i64> = (start..=end).step_by(step_secs as usize).collect();

    let strict = options.fill_mode == FillMode::Strict;
    let max_age = options.effective_max_fill_age(step).as_secs() as i64;
    let samples: Vec<HashMap<i64, f64>> = zones
        .iter()
        .map(|zone| {
            let points = forecasts.get(zone).map(Vec::as_slice).unwrap_or_default();
            resample_zone_on_axis(points, &grid, max_age, strict)
        })
        .collect();

    let common: Vec<i64> = grid
        .into_iter()
        .filter(|t| samples.iter().all(|s| s.contains_key(t)))
        .collect();
    if common.is_empty() {
        return None;
    }

    let axis: Vec<DateTime<Utc>> = common
        .iter()
        .filter_map(|t| DateTime::from_timestamp(*t, 0))
        .collect();
    let aligned = zones
        .iter()
        .zip(&samples)
        .map(|(zone, zone_samples)| {
            let points = axis
                .iter()
                .filter_map(|t| {
                    zone_samples
                        .get(&t.timestamp())
                        .map(|ci| ForecastPoint::new(*t, *ci))
                })
                .collect();
            (zone.clone(), points)
        })
        .collect();

    Some(AlignedForecasts {
        axis,
        zones: aligned,
    })
}

/// Sample one zone onto `grid` (unix seconds). For each grid point take the
/// latest sample not after it; strict mode requires equality, otherwise the
/// sample may be at most `max_age` seconds old (0 = unbounded).
fn resample_zone_on_axis(
    points: &[ForecastPoint],
    grid: &[i64],
    max_age: i64,
    strict: bool,
) -> HashMap<i64, f64> {
    let mut out = HashMap::with_capacity(grid.len());
    if points.is_empty() {
        return out;
    }

    let mut idx = 0;
    for &t in grid {
        while idx + 1 < points.len() && points[idx + 1].timestamp.timestamp() <= t {
            idx += 1;
        }
        let source = points[idx].timestamp.timestamp();
        if source > t {
            continue;
        }
        if strict && source != t {
            continue;
        }
        if max_age > 0 && t - source > max_age {
            continue;
        }
        out.insert(t, points[idx].ci);
    }
    out
}

fn floor_to_step(secs: i64, step: i64) -> i64 {
    secs - secs.rem_euclid(step)
}

fn ceil_to_step(secs: i64, step: i64) -> i64 {
    match secs.rem_euclid(step) {
        0 => secs,
        rem => secs + (step - rem),
    }
}
