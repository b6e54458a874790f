//! Per-call timeout layer.

use std::time::Duration;

use carbon_core::ForecastPoint;

use crate::context::CallContext;
use crate::provider::{Provider, ProviderFuture, SharedProvider};

/// Bounds each call by `timeout`, unless the caller's deadline is tighter.
pub struct TimeoutProvider {
    next: SharedProvider,
    timeout: Duration,
}

impl TimeoutProvider {
    pub fn new(next: SharedProvider, timeout: Duration) -> Self {
        Self { next, timeout }
    }

    fn bounded(&self, ctx: &CallContext) -> CallContext {
        match ctx.remaining() {
            Some(remaining) if remaining <= self.timeout => ctx.child(),
            _ => ctx.with_timeout(self.timeout),
        }
    }
}

impl Provider for TimeoutProvider {
    fn get_current_ci<'a>(&'a self, ctx: &'a CallContext, zone: &'a str) -> ProviderFuture<'a, f64> {
        Box::pin(async move {
            let ctx = self.bounded(ctx);
            ctx.run(self.next.get_current_ci(&ctx, zone)).await?
        })
    }

    fn get_forecast_ci<'a>(
        &'a self,
        ctx: &'a CallContext,
        zone: &'a str,
        hours: u32,
    ) -> ProviderFuture<'a, Vec<ForecastPoint>> {
        Box::pin(async move {
            let ctx = self.bounded(ctx);
            ctx.run(self.next.get_forecast_ci(&ctx, zone, hours)).await?
        })
    }
}
