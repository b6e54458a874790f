//! Assembling the resilience layers around a base provider.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use carbon_core::{Clock, SystemClock};
use tracing::debug;

use crate::cache::CachedProvider;
use crate::metrics::{MetricsProvider, MetricsRecorder};
use crate::provider::SharedProvider;
use crate::rate_limit::{RateLimitConfig, RateLimitProvider};
use crate::retry::{RetryConfig, RetryProvider};
use crate::timeout::TimeoutProvider;

/// Which resilience layers wrap the base provider, and how.
#[derive(Clone)]
pub struct PipelineConfig {
    /// Per-call timeout; zero disables the layer.
    pub timeout: Duration,
    pub retry: RetryConfig,
    pub rate_limit: RateLimitConfig,
    pub cache_dir: Option<PathBuf>,
    pub cache_ttl: Duration,
    pub metrics: Option<Arc<dyn MetricsRecorder>>,
    pub clock: Arc<dyn Clock>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            cache_dir: None,
            cache_ttl: Duration::from_secs(600),
            metrics: None,
            clock: Arc::new(SystemClock),
        }
    }
}

/// Wrap `base` so calls flow Timeout → Retry → RateLimit → Cache →
/// Metrics → base. Layers whose settings disable them are skipped.
pub fn build_pipeline(base: SharedProvider, cfg: &PipelineConfig) -> SharedProvider {
    let mut provider = base;

    if let Some(recorder) = &cfg.metrics {
        provider = Arc::new(MetricsProvider::new(provider, recorder.clone()));
    }
    if let Some(dir) = &cfg.cache_dir {
        debug!(dir = %dir.display(), ttl_secs = cfg.cache_ttl.as_secs(), "forecast cache enabled");
        provider = Arc::new(
            CachedProvider::new(provider, dir.clone(), cfg.cache_ttl).with_clock(cfg.clock.clone()),
        );
    }
    if cfg.rate_limit.requests_per_second > 0.0 {
        provider = Arc::new(RateLimitProvider::new(provider, cfg.rate_limit));
    }
    if cfg.retry.max_attempts > 1 {
        provider = Arc::new(RetryProvider::new(provider, cfg.retry));
    }
    if !cfg.timeout.is_zero() {
        provider = Arc::new(TimeoutProvider::new(provider, cfg.timeout));
    }
    provider
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CallContext;
    use crate::error::ProviderError;
    use crate::static_provider::StaticProvider;

    #[tokio::test]
    async fn bare_pipeline_is_the_base_provider() {
        let base: SharedProvider = Arc::new(StaticProvider::new().with_current("DE", 0.2));
        let cfg = PipelineConfig {
            timeout: Duration::ZERO,
            retry: RetryConfig {
                max_attempts: 1,
                ..RetryConfig::default()
            },
            rate_limit: RateLimitConfig {
                requests_per_second: 0.0,
                burst: 1,
            },
            ..PipelineConfig::default()
        };
        let provider = build_pipeline(base.clone(), &cfg);
        assert!(Arc::ptr_eq(&provider, &base));
    }

    #[tokio::test]
    async fn full_pipeline_forwards_calls() {
        let dir = tempfile::tempdir().unwrap();
        let base: SharedProvider = Arc::new(StaticProvider::new().with_current("DE", 0.2));
        let cfg = PipelineConfig {
            cache_dir: Some(dir.path().to_path_buf()),
            ..PipelineConfig::default()
        };
        let provider = build_pipeline(base, &cfg);
        let ctx = CallContext::background();
        assert_eq!(provider.get_current_ci(&ctx, "DE").await.unwrap(), 0.2);

        // Input errors are not retried and keep their kind.
        let err = provider.get_forecast_ci(&ctx, "FR", 24).await.unwrap_err();
        assert!(matches!(err, ProviderError::Input(_)));
    }
}
