//! carbon-metrics: observability for provider calls.
//!
//! Tracks per-(operation, zone) call counts, error counts and latency,
//! and renders them in Prometheus text format.
//!
//! # Architecture
//!
//! ```text
//! CallMetrics (MetricsRecorder)
//!   ├── observe_call() ← called by MetricsProvider per provider call
//!   └── snapshot() → Vec<CallSnapshot> with p50/p99 latency
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain
//! ```

pub mod collector;
pub mod prometheus;

pub use collector::{CallMetrics, CallSnapshot};
pub use prometheus::render_prometheus;
