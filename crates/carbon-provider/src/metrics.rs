//! Metrics layer: one observation per upstream call, handed to a recorder.

use std::sync::Arc;
use std::time::Duration;

use carbon_core::ForecastPoint;
use tokio::time::Instant;

use crate::context::CallContext;
use crate::error::{ProviderError, ProviderResult};
use crate::provider::{Provider, ProviderFuture, SharedProvider};

pub const OP_CURRENT_CI: &str = "get_current_ci";
pub const OP_FORECAST_CI: &str = "get_forecast_ci";

/// Receives one observation per provider call.
pub trait MetricsRecorder: Send + Sync {
    fn observe_call(
        &self,
        operation: &str,
        zone: &str,
        latency: Duration,
        error: Option<&ProviderError>,
    );
}

pub struct MetricsProvider {
    next: SharedProvider,
    recorder: Arc<dyn MetricsRecorder>,
}

impl MetricsProvider {
    pub fn new(next: SharedProvider, recorder: Arc<dyn MetricsRecorder>) -> Self {
        Self { next, recorder }
    }

    fn record<T>(&self, operation: &str, zone: &str, started: Instant, result: &ProviderResult<T>) {
        self.recorder
            .observe_call(operation, zone, started.elapsed(), result.as_ref().err());
    }
}

impl Provider for MetricsProvider {
    fn get_current_ci<'a>(&'a self, ctx: &'a CallContext, zone: &'a str) -> ProviderFuture<'a, f64> {
        Box::pin(async move {
            let started = Instant::now();
            let result = self.next.get_current_ci(ctx, zone).await;
            self.record(OP_CURRENT_CI, zone, started, &result);
            result
        })
    }

    fn get_forecast_ci<'a>(
        &'a self,
        ctx: &'a CallContext,
        zone: &'a str,
        hours: u32,
    ) -> ProviderFuture<'a, Vec<ForecastPoint>> {
        Box::pin(async move {
            let started = Instant::now();
            let result = self.next.get_forecast_ci(ctx, zone, hours).await;
            self.record(OP_FORECAST_CI, zone, started, &result);
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::static_provider::StaticProvider;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<(String, String, bool)>>,
    }

    impl MetricsRecorder for Recording {
        fn observe_call(&self, operation: &str, zone: &str, _: Duration, error: Option<&ProviderError>) {
            self.calls
                .lock()
                .unwrap()
                .push((operation.to_string(), zone.to_string(), error.is_some()));
        }
    }

    #[tokio::test]
    async fn records_success_and_failure() {
        let recorder = Arc::new(Recording::default());
        let base = Arc::new(StaticProvider::new().with_current("DE", 0.3));
        let provider = MetricsProvider::new(base, recorder.clone());
        let ctx = CallContext::background();

        provider.get_current_ci(&ctx, "DE").await.unwrap();
        provider.get_current_ci(&ctx, "FR").await.unwrap_err();

        let calls = recorder.calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![
                (OP_CURRENT_CI.to_string(), "DE".to_string(), false),
                (OP_CURRENT_CI.to_string(), "FR".to_string(), true),
            ]
        );
    }
}
