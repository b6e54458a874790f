//! Token-bucket rate limiting for upstream calls.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use carbon_core::ForecastPoint;
use tokio::time::Instant;
use tracing::debug;

use crate::context::CallContext;
use crate::error::ProviderResult;
use crate::provider::{Provider, ProviderFuture, SharedProvider};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitConfig {
    pub requests_per_second: f64,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 5.0,
            burst: 5,
        }
    }
}

impl RateLimitConfig {
    pub fn normalized(mut self) -> Self {
        if self.requests_per_second.is_nan() || self.requests_per_second <= 0.0 {
            self.requests_per_second = 1.0;
        }
        if self.burst < 1 {
            self.burst = 1;
        }
        self
    }
}

/// Token bucket refilled continuously at `requests_per_second`, holding at
/// most `burst` tokens. Starts full.
#[derive(Debug)]
pub struct TokenBucket {
    rate: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last: Instant,
}

impl TokenBucket {
    pub fn new(cfg: RateLimitConfig) -> Self {
        let cfg = cfg.normalized();
        let burst = f64::from(cfg.burst);
        Self {
            rate: cfg.requests_per_second,
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                last: Instant::now(),
            }),
        }
    }

    /// Take a token if one is available, else report how long until one is.
    fn try_acquire(&self) -> Option<Duration> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.burst);
        state.last = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            return None;
        }
        let wait = Duration::from_secs_f64((1.0 - state.tokens) / self.rate);
        Some(wait.max(Duration::from_millis(1)))
    }

    /// Block until a token is available or the context ends.
    pub async fn wait(&self, ctx: &CallContext) -> ProviderResult<()> {
        loop {
            let Some(wait) = self.try_acquire() else {
                return Ok(());
            };
            debug!(wait_ms = wait.as_millis() as u64, "rate limited, waiting for token");
            ctx.sleep(wait).await?;
        }
    }
}

pub struct RateLimitProvider {
    next: SharedProvider,
    bucket: Arc<TokenBucket>,
}

impl RateLimitProvider {
    pub fn new(next: SharedProvider, cfg: RateLimitConfig) -> Self {
        Self::with_bucket(next, Arc::new(TokenBucket::new(cfg)))
    }

    /// Share one bucket between several wrapped providers.
    pub fn with_bucket(next: SharedProvider, bucket: Arc<TokenBucket>) -> Self {
        Self { next, bucket }
    }
}

impl Provider for RateLimitProvider {
    fn get_current_ci<'a>(&'a self, ctx: &'a CallContext, zone: &'a str) -> ProviderFuture<'a, f64> {
        Box::pin(async move {
            self.bucket.wait(ctx).await?;
            self.next.get_current_ci(ctx, zone).await
        })
    }

    fn get_forecast_ci<'a>(
        &'a self,
        ctx: &'a CallContext,
        zone: &'a str,
        hours: u32,
    ) -> ProviderFuture<'a, Vec<ForecastPoint>> {
        Box::pin(async move {
            self.bucket.wait(ctx).await?;
            self.next.get_forecast_ci(ctx, zone, hours).await
        })
    }
}
