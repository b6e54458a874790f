//! carbon-scheduler: choosing when (and where) to run a job.
//!
//! A [`Planner`] wraps a provider pipeline and a clock and exposes the use
//! cases:
//!
//! - `run`: emission estimate for a job of known shape
//! - `analyze_best_window` / `suggest`: best start in one zone
//! - `optimize`: best start per zone, ranked
//! - `optimize_global`: best `(start, zone)` pair on a shared time axis
//! - `run_aware`: poll live CI until the best window or a threshold
//!
//! # Architecture
//!
//! ```text
//! Planner
//!   ├── SharedProvider (timeout → retry → rate limit → cache → metrics → base)
//!   ├── Clock (system or manual)
//!   └── per call
//!       ├── forecast: normalize + clip to [eval_start, eval_start + lookahead]
//!       ├── time_axis: resample zones onto one grid (global only)
//!       ├── EmissionEvaluator (prefix sums of CI × seconds)
//!       └── window scan: score = emission + wait_cost × hours waited
//! ```

pub mod error;
pub mod evaluator;
pub mod forecast;
pub mod global;
pub mod optimize;
pub mod planner;
pub mod run;
pub mod run_aware;
pub mod suggest;
pub mod time_axis;
pub mod validation;
pub mod window;

pub use error::{ErrorKind, SchedulerError, SchedulerResult};
pub use evaluator::{EmissionEvaluator, estimate_window_emissions, forecast_coverage_seconds, is_within_window};
pub use global::{GlobalPlan, OptimizeGlobalRequest};
pub use optimize::{OptimizeReport, OptimizeRequest, ZoneResult, format_zone_failures};
pub use planner::{Planner, WindowAnalysis, WindowRequest};
pub use run::{RunReport, RunRequest, parse_segments};
pub use run_aware::{DEFAULT_POLL_INTERVAL, RunAwareOutcome, RunAwareRequest, RunDecision, StatusSink};
pub use suggest::{SuggestRequest, Suggestion};
pub use time_axis::{AlignedForecasts, FillMode, ResampleOptions};
pub use window::{ScoredWindow, WindowEstimate, WindowSearch, find_best_window};
