//! carbon-provider: carbon-intensity sources and the resilience pipeline.
//!
//! A [`Provider`] answers two questions for a zone: the current carbon
//! intensity and a forecast. Middleware layers wrap a provider and are
//! themselves providers, so a pipeline is built by nesting:
//!
//! ```text
//! Timeout
//!   └── Retry (exponential backoff, jitter)
//!       └── RateLimit (token bucket)
//!           └── Cache (TTL file cache, in-flight dedup, lock file)
//!               └── Metrics (call/latency/error hook)
//!                   └── base provider (ElectricityMaps, static fixture)
//! ```
//!
//! Every call carries a [`CallContext`] holding an optional deadline and a
//! cancellation token; all suspension points race against it.

pub mod cache;
pub mod context;
pub mod electricity_maps;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod provider;
pub mod rate_limit;
pub mod retry;
pub mod static_provider;
pub mod timeout;

pub use cache::CachedProvider;
pub use context::{CallContext, ContextError};
pub use electricity_maps::ElectricityMapsProvider;
pub use error::{ProviderError, ProviderResult};
pub use metrics::{MetricsProvider, MetricsRecorder};
pub use pipeline::{PipelineConfig, build_pipeline};
pub use provider::{Provider, ProviderFuture, SharedProvider};
pub use rate_limit::{RateLimitConfig, RateLimitProvider, TokenBucket};
pub use retry::{RetryConfig, RetryProvider};
pub use static_provider::StaticProvider;
pub use timeout::TimeoutProvider;
