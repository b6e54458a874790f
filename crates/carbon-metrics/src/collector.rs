//! Call metrics collector.
//!
//! Counters are atomics; latency samples sit behind a mutex per series.
//! The series map is read-locked on the hot path and write-locked only
//! the first time a new (operation, zone) pair is seen.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use carbon_provider::{MetricsRecorder, ProviderError};
use serde::Serialize;
use tracing::debug;

type SeriesKey = (String, String);

/// Per-(operation, zone) bucket.
#[derive(Default)]
struct CallSeries {
    calls: AtomicU64,
    errors: AtomicU64,
    /// Latency samples in microseconds.
    latencies: Mutex<Vec<u64>>,
}

/// Point-in-time view of one series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallSnapshot {
    pub operation: String,
    pub zone: String,
    pub calls: u64,
    pub errors: u64,
    pub latency_p50_ms: f64,
    pub latency_p99_ms: f64,
}

#[derive(Default)]
pub struct CallMetrics {
    series: RwLock<HashMap<SeriesKey, Arc<CallSeries>>>,
}

impl CallMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn series(&self, operation: &str, zone: &str) -> Arc<CallSeries> {
        let key = (operation.to_string(), zone.to_string());
        if let Some(series) = self
            .series
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
        {
            return series.clone();
        }
        let mut map = self.series.write().unwrap_or_else(|e| e.into_inner());
        map.entry(key).or_default().clone()
    }

    /// Current values of every series, sorted by operation then zone.
    pub fn snapshot(&self) -> Vec<CallSnapshot> {
        let map = self.series.read().unwrap_or_else(|e| e.into_inner());
        let mut snapshots: Vec<CallSnapshot> = map
            .iter()
            .map(|((operation, zone), series)| {
                let latencies = series.latencies.lock().unwrap_or_else(|e| e.into_inner());
                let (p50, p99) = compute_percentiles(&latencies);
                CallSnapshot {
                    operation: operation.clone(),
                    zone: zone.clone(),
                    calls: series.calls.load(Ordering::Relaxed),
                    errors: series.errors.load(Ordering::Relaxed),
                    latency_p50_ms: p50,
                    latency_p99_ms: p99,
                }
            })
            .collect();
        snapshots.sort_by(|a, b| (&a.operation, &a.zone).cmp(&(&b.operation, &b.zone)));
        snapshots
    }
}

impl MetricsRecorder for CallMetrics {
    fn observe_call(
        &self,
        operation: &str,
        zone: &str,
        latency: Duration,
        error: Option<&ProviderError>,
    ) {
        let series = self.series(operation, zone);
        series.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(err) = error {
            series.errors.fetch_add(1, Ordering::Relaxed);
            debug!(operation, zone, error = %err, "provider call failed");
        }
        series
            .latencies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(latency.as_micros() as u64);
    }
}

/// P50 and P99 of microsecond samples, in milliseconds. (0, 0) if empty.
fn compute_percentiles(latencies: &[u64]) -> (f64, f64) {
    if latencies.is_empty() {
        return (0.0, 0.0);
    }

    let mut sorted = latencies.to_vec();
    sorted.sort_unstable();

    let p50_idx = (sorted.len() as f64 * 0.50) as usize;
    let p99_idx = (sorted.len() as f64 * 0.99) as usize;

    let p50 = sorted[p50_idx.min(sorted.len() - 1)] as f64 / 1000.0;
    let p99 = sorted[p99_idx.min(sorted.len() - 1)] as f64 / 1000.0;

    (p50, p99)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_calls_and_errors_per_series() {
        let metrics = CallMetrics::new();
        let err = ProviderError::HttpStatus {
            status: 503,
            body: String::new(),
        };

        metrics.observe_call("get_forecast_ci", "DE", Duration::from_millis(5), None);
        metrics.observe_call("get_forecast_ci", "DE", Duration::from_millis(10), Some(&err));
        metrics.observe_call("get_current_ci", "FR", Duration::from_millis(1), None);

        let snapshots = metrics.snapshot();
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].operation, "get_current_ci");
        assert_eq!(snapshots[0].zone, "FR");
        assert_eq!(snapshots[0].calls, 1);

        let de = &snapshots[1];
        assert_eq!(de.calls, 2);
        assert_eq!(de.errors, 1);
        assert_eq!(de.latency_p99_ms, 10.0);
    }

    #[test]
    fn percentiles_empty() {
        assert_eq!(compute_percentiles(&[]), (0.0, 0.0));
    }

    #[test]
    fn percentiles_single_value() {
        let (p50, p99) = compute_percentiles(&[5000]);
        assert_eq!(p50, 5.0);
        assert_eq!(p99, 5.0);
    }

    #[test]
    fn percentiles_distribution() {
        let samples: Vec<u64> = (1..=100).map(|i| i * 1000).collect();
        let (p50, p99) = compute_percentiles(&samples);
        assert_eq!(p50, 51.0);
        assert_eq!(p99, 100.0);
    }
}
