//! carbon-core: shared vocabulary for carbon-guard.
//!
//! Value types passed between the provider pipeline and the scheduler,
//! the energy model that turns a duration and a carbon intensity into
//! kilograms of CO2, an injectable clock, and the configuration file
//! format.

pub mod clock;
pub mod config;
pub mod energy;
pub mod types;

pub use clock::{Clock, ManualClock, SleepFuture, SystemClock};
pub use config::{CarbonConfig, ConfigError, RateLimitSettings, RetrySettings, parse_duration, split_zones};
pub use energy::{
    EnergyEstimate, PowerProfile, estimate_emissions_for_region, estimate_emissions_with_segments,
    estimate_energy, region_ci, runner_profile,
};
pub use types::{ForecastPoint, ModelContext, ModelError, Segment};
