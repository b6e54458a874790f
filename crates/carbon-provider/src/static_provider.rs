//! In-memory provider backed by fixed values, loadable from a JSON fixture.
//!
//! ```json
//! {
//!   "current": { "DE": 0.31 },
//!   "forecast": { "DE": [ { "timestamp": "2026-01-01T10:00:00Z", "ci": 0.29 } ] }
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use carbon_core::ForecastPoint;
use serde::{Deserialize, Serialize};

use crate::context::CallContext;
use crate::error::{ProviderError, ProviderResult};
use crate::provider::{Provider, ProviderFuture};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticProvider {
    #[serde(default)]
    current: HashMap<String, f64>,
    #[serde(default)]
    forecast: HashMap<String, Vec<ForecastPoint>>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_file(path: &Path) -> ProviderResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProviderError::Input(format!("failed to read fixture {}: {e}", path.display()))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            ProviderError::InvalidData(format!("failed to parse fixture {}: {e}", path.display()))
        })
    }

    pub fn with_current(mut self, zone: &str, ci: f64) -> Self {
        self.current.insert(zone.to_string(), ci);
        self
    }

    pub fn with_forecast(mut self, zone: &str, points: Vec<ForecastPoint>) -> Self {
        self.forecast.insert(zone.to_string(), points);
        self
    }

    fn current(&self, zone: &str) -> ProviderResult<f64> {
        self.current
            .get(zone)
            .copied()
            .ok_or_else(|| ProviderError::Input(format!("no current CI for zone {zone:?}")))
    }

    fn forecast(&self, zone: &str) -> ProviderResult<Vec<ForecastPoint>> {
        let mut points = self
            .forecast
            .get(zone)
            .cloned()
            .ok_or_else(|| ProviderError::Input(format!("no forecast for zone {zone:?}")))?;
        points.sort_by_key(|p| p.timestamp);
        Ok(points)
    }
}

impl Provider for StaticProvider {
    fn get_current_ci<'a>(&'a self, ctx: &'a CallContext, zone: &'a str) -> ProviderFuture<'a, f64> {
        Box::pin(async move {
            if let Some(err) = ctx.err() {
                return Err(err.into());
            }
            self.current(zone)
        })
    }

    fn get_forecast_ci<'a>(
        &'a self,
        ctx: &'a CallContext,
        zone: &'a str,
        _hours: u32,
    ) -> ProviderFuture<'a, Vec<ForecastPoint>> {
        Box::pin(async move {
            if let Some(err) = ctx.err() {
                return Err(err.into());
            }
            self.forecast(zone)
        })
    }
}
