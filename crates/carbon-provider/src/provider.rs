//! The provider capability every source and middleware layer implements.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use carbon_core::ForecastPoint;

use crate::context::CallContext;
use crate::error::ProviderResult;

pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = ProviderResult<T>> + Send + 'a>>;

/// A source of carbon intensity data, in kgCO2/kWh.
///
/// Implementations must honour the context: return promptly with
/// `Cancelled`/`DeadlineExceeded` once it is done.
pub trait Provider: Send + Sync {
    fn get_current_ci<'a>(&'a self, ctx: &'a CallContext, zone: &'a str) -> ProviderFuture<'a, f64>;

    fn get_forecast_ci<'a>(
        &'a self,
        ctx: &'a CallContext,
        zone: &'a str,
        hours: u32,
    ) -> ProviderFuture<'a, Vec<ForecastPoint>>;
}

pub type SharedProvider = Arc<dyn Provider>;

impl<P: Provider + ?Sized> Provider for Arc<P> {
    fn get_current_ci<'a>(&'a self, ctx: &'a CallContext, zone: &'a str) -> ProviderFuture<'a, f64> {
        (**self).get_current_ci(ctx, zone)
    }

    fn get_forecast_ci<'a>(
        &'a self,
        ctx: &'a CallContext,
        zone: &'a str,
        hours: u32,
    ) -> ProviderFuture<'a, Vec<ForecastPoint>> {
        (**self).get_forecast_ci(ctx, zone, hours)
    }
}
