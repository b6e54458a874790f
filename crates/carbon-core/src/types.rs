use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default runner key used when none is given.
pub const DEFAULT_RUNNER: &str = "ubuntu";
pub const DEFAULT_LOAD: f64 = 0.6;
pub const DEFAULT_PUE: f64 = 1.2;

/// One carbon-intensity sample, in kgCO2/kWh.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub timestamp: DateTime<Utc>,
    pub ci: f64,
}

impl ForecastPoint {
    pub fn new(timestamp: DateTime<Utc>, ci: f64) -> Self {
        Self { timestamp, ci }
    }
}

/// A run of `duration_secs` at a constant carbon intensity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub duration_secs: u64,
    pub ci: f64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("load must be between 0 and 1, got {0}")]
    Load(f64),

    #[error("pue must be >= 1.0, got {0}")]
    Pue(f64),
}

/// Hardware and facility parameters of the machine running the workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelContext {
    pub runner: String,
    pub load: f64,
    pub pue: f64,
}

impl Default for ModelContext {
    fn default() -> Self {
        Self {
            runner: DEFAULT_RUNNER.to_string(),
            load: DEFAULT_LOAD,
            pue: DEFAULT_PUE,
        }
    }
}

impl ModelContext {
    pub fn new(runner: impl Into<String>, load: f64, pue: f64) -> Self {
        Self {
            runner: runner.into(),
            load,
            pue,
        }
    }

    /// Fill in defaults and reject out-of-range values.
    ///
    /// An all-zero model (nothing supplied) resolves to the defaults; an
    /// empty runner key resolves to `ubuntu`. Out-of-range load or PUE is
    /// an error rather than being clamped.
    pub fn resolve(mut self) -> Result<Self, ModelError> {
        if self.runner.trim().is_empty() && self.load == 0.0 && self.pue == 0.0 {
            return Ok(Self::default());
        }
        if self.runner.trim().is_empty() {
            self.runner = DEFAULT_RUNNER.to_string();
        }
        if !(0.0..=1.0).contains(&self.load) {
            return Err(ModelError::Load(self.load));
        }
        if self.pue.is_nan() || self.pue < 1.0 {
            return Err(ModelError::Pue(self.pue));
        }
        Ok(self)
    }
}
