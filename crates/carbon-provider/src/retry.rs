//! Retry layer: exponential backoff with jitter for retryable failures.

use std::future::Future;
use std::time::Duration;

use carbon_core::ForecastPoint;
use rand::Rng;
use tracing::{debug, warn};

use crate::context::CallContext;
use crate::error::ProviderResult;
use crate::provider::{Provider, ProviderFuture, SharedProvider};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(200);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_JITTER: f64 = 0.2;

const MIN_DELAY: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay applied as symmetric random jitter.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: DEFAULT_JITTER,
        }
    }
}

impl RetryConfig {
    pub fn normalized(mut self) -> Self {
        if self.max_attempts < 1 {
            self.max_attempts = 1;
        }
        if self.base_delay.is_zero() {
            self.base_delay = DEFAULT_BASE_DELAY;
        }
        if self.max_delay.is_zero() {
            self.max_delay = DEFAULT_MAX_DELAY;
        }
        if self.max_delay < self.base_delay {
            self.max_delay = self.base_delay;
        }
        self.jitter = if self.jitter.is_nan() {
            0.0
        } else {
            self.jitter.clamp(0.0, 1.0)
        };
        self
    }

    /// Delay after failed attempt `attempt` (1-based). `unit` in [-1, 1]
    /// picks where in the jitter band the delay lands.
    pub fn backoff_delay(&self, attempt: u32, unit: f64) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let delay = self
            .base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if self.jitter <= 0.0 {
            return delay.max(MIN_DELAY);
        }
        let secs = delay.as_secs_f64();
        let jittered = secs + unit.clamp(-1.0, 1.0) * self.jitter * secs;
        if jittered <= 0.0 {
            return MIN_DELAY;
        }
        Duration::from_secs_f64(jittered).max(MIN_DELAY)
    }
}

/// Retries transient failures with exponential backoff.
pub struct RetryProvider {
    next: SharedProvider,
    cfg: RetryConfig,
}

impl RetryProvider {
    pub fn new(next: SharedProvider, cfg: RetryConfig) -> Self {
        Self {
            next,
            cfg: cfg.normalized(),
        }
    }

    async fn with_retry<T, F, Fut>(
        &self,
        ctx: &CallContext,
        operation: &'static str,
        zone: &str,
        mut call: F,
    ) -> ProviderResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let mut attempt = 1;
        loop {
            if let Some(err) = ctx.err() {
                return Err(err.into());
            }

            let err = match call().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if attempt >= self.cfg.max_attempts || !err.is_retryable() {
                debug!(operation, zone, attempt, error = %err, "giving up");
                return Err(err);
            }

            let unit = rand::thread_rng().gen_range(-1.0..=1.0);
            let delay = self.cfg.backoff_delay(attempt, unit);
            warn!(
                operation,
                zone,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "provider call failed, retrying"
            );
            if ctx.sleep(delay).await.is_err() {
                return Err(err);
            }
            attempt += 1;
        }
    }
}

impl Provider for RetryProvider {
    fn get_current_ci<'a>(&'a self, ctx: &'a CallContext, zone: &'a str) -> ProviderFuture<'a, f64> {
        Box::pin(self.with_retry(ctx, "get_current_ci", zone, move || {
            self.next.get_current_ci(ctx, zone)
        }))
    }

    fn get_forecast_ci<'a>(
        &'a self,
        ctx: &'a CallContext,
        zone: &'a str,
        hours: u32,
    ) -> ProviderFuture<'a, Vec<ForecastPoint>> {
        Box::pin(self.with_retry(ctx, "get_forecast_ci", zone, move || {
            self.next.get_forecast_ci(ctx, zone, hours)
        }))
    }
}
