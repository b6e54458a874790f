//! Electricity Maps v3 carbon-intensity API.
//!
//! Values arrive in gCO2/kWh and are returned in kgCO2/kWh. The HTTP
//! client and endpoint URLs are injected so tests can point the provider
//! at a local server.

use std::sync::Arc;
use std::time::Duration;

use carbon_core::{Clock, ForecastPoint, SystemClock};
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::context::CallContext;
use crate::error::{ProviderError, ProviderResult};
use crate::provider::{Provider, ProviderFuture};

pub const DEFAULT_LATEST_URL: &str = "https://api.electricitymaps.com/v3/carbon-intensity/latest";
pub const DEFAULT_FORECAST_URL: &str =
    "https://api.electricitymaps.com/v3/carbon-intensity/forecast";
pub const API_KEY_ENV: &str = "ELECTRICITY_MAPS_API_KEY";

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_ERROR_BODY: usize = 4096;

#[derive(Debug, Deserialize)]
struct LatestResponse {
    #[serde(rename = "carbonIntensity")]
    carbon_intensity: f64,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    #[serde(default)]
    forecast: Vec<ForecastEntry>,
}

#[derive(Debug, Deserialize)]
struct ForecastEntry {
    datetime: String,
    #[serde(rename = "carbonIntensity")]
    carbon_intensity: f64,
}

#[derive(Debug, Clone)]
pub struct ElectricityMapsProvider {
    api_key: String,
    client: reqwest::Client,
    latest_url: String,
    forecast_url: String,
    clock: Arc<dyn Clock>,
}

impl ElectricityMapsProvider {
    pub fn new(api_key: impl Into<String>) -> ProviderResult<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ProviderError::Auth(format!(
                "missing {API_KEY_ENV}: set an Electricity Maps API key to use live carbon data"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Network {
                message: format!("build http client: {e}"),
                timeout: false,
            })?;
        Ok(Self {
            api_key,
            client,
            latest_url: DEFAULT_LATEST_URL.to_string(),
            forecast_url: DEFAULT_FORECAST_URL.to_string(),
            clock: Arc::new(SystemClock),
        })
    }

    pub fn from_env() -> ProviderResult<Self> {
        Self::new(std::env::var(API_KEY_ENV).unwrap_or_default())
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_urls(mut self, latest: impl Into<String>, forecast: impl Into<String>) -> Self {
        self.latest_url = latest.into();
        self.forecast_url = forecast.into();
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        ctx: &CallContext,
        url: &str,
        zone: &str,
    ) -> ProviderResult<T> {
        let request = self
            .client
            .get(url)
            .query(&[("zone", zone)])
            .header("auth-token", &self.api_key)
            .send();
        let mut response = ctx.run(request).await?.map_err(network_error)?;

        let status = response.status();
        if status != StatusCode::OK {
            let mut body = Vec::new();
            while body.len() < MAX_ERROR_BODY {
                match ctx.run(response.chunk()).await? {
                    Ok(Some(chunk)) => body.extend_from_slice(&chunk),
                    _ => break,
                }
            }
            body.truncate(MAX_ERROR_BODY);
            let text = String::from_utf8_lossy(&body).trim().to_string();
            debug!(zone, status = status.as_u16(), "electricity maps returned error status");
            return Err(ProviderError::HttpStatus {
                status: status.as_u16(),
                body: if text.is_empty() {
                    "empty response body".to_string()
                } else {
                    text
                },
            });
        }

        let bytes = ctx.run(response.bytes()).await?.map_err(network_error)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ProviderError::InvalidData(format!("decode electricity maps response: {e}")))
    }

    async fn current(&self, ctx: &CallContext, zone: &str) -> ProviderResult<f64> {
        if zone.trim().is_empty() {
            return Err(ProviderError::Input("missing electricity maps zone".into()));
        }
        let body: LatestResponse = self.get_json(ctx, &self.latest_url, zone).await?;
        if body.carbon_intensity <= 0.0 {
            return Err(ProviderError::InvalidData(format!(
                "invalid carbonIntensity value: {}",
                body.carbon_intensity
            )));
        }
        Ok(body.carbon_intensity / 1000.0)
    }

    async fn forecast(
        &self,
        ctx: &CallContext,
        zone: &str,
        hours: u32,
    ) -> ProviderResult<Vec<ForecastPoint>> {
        if zone.trim().is_empty() {
            return Err(ProviderError::Input("missing electricity maps zone".into()));
        }
        if hours == 0 {
            return Err(ProviderError::Input("hours must be > 0".into()));
        }
        let body: ForecastResponse = self.get_json(ctx, &self.forecast_url, zone).await?;

        let now = self.clock.now();
        let limit = now + TimeDelta::hours(i64::from(hours));
        let mut points = Vec::with_capacity(body.forecast.len());
        for entry in body.forecast {
            if entry.carbon_intensity <= 0.0 {
                return Err(ProviderError::InvalidData(format!(
                    "invalid forecast carbonIntensity value: {}",
                    entry.carbon_intensity
                )));
            }
            let timestamp = DateTime::parse_from_rfc3339(&entry.datetime)
                .map_err(|_| {
                    ProviderError::InvalidData(format!("invalid forecast datetime: {}", entry.datetime))
                })?
                .with_timezone(&Utc);
            if timestamp < now || timestamp > limit {
                continue;
            }
            points.push(ForecastPoint::new(timestamp, entry.carbon_intensity / 1000.0));
        }
        points.sort_by_key(|p| p.timestamp);
        debug!(zone, hours, points = points.len(), "fetched forecast");
        Ok(points)
    }
}

fn network_error(err: reqwest::Error) -> ProviderError {
    ProviderError::Network {
        message: err.to_string(),
        timeout: err.is_timeout(),
    }
}

impl Provider for ElectricityMapsProvider {
    fn get_current_ci<'a>(&'a self, ctx: &'a CallContext, zone: &'a str) -> ProviderFuture<'a, f64> {
        Box::pin(self.current(ctx, zone))
    }

    fn get_forecast_ci<'a>(
        &'a self,
        ctx: &'a CallContext,
        zone: &'a str,
        hours: u32,
    ) -> ProviderFuture<'a, Vec<ForecastPoint>> {
        Box::pin(self.forecast(ctx, zone, hours))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_api_key_is_auth_error() {
        let err = ElectricityMapsProvider::new("  ").unwrap_err();
        assert!(matches!(err, ProviderError::Auth(_)));
    }

    #[tokio::test]
    async fn input_is_checked_before_any_request() {
        let provider = ElectricityMapsProvider::new("key")
            .unwrap()
            .with_urls("http://127.0.0.1:9/latest", "http://127.0.0.1:9/forecast");
        let ctx = CallContext::background();

        let err = provider.get_current_ci(&ctx, "").await.unwrap_err();
        assert!(matches!(err, ProviderError::Input(_)));

        let err = provider.get_forecast_ci(&ctx, "DE", 0).await.unwrap_err();
        assert!(matches!(err, ProviderError::Input(_)));
    }
}
