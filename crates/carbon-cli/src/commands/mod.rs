//! Subcommand glue: configuration, provider pipeline and output.

pub mod optimize;
pub mod optimize_global;
pub mod run;
pub mod run_aware;
pub mod suggest;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use carbon_core::{CarbonConfig, ModelContext, split_zones};
use carbon_metrics::{CallMetrics, render_prometheus};
use carbon_provider::{
    CallContext, ElectricityMapsProvider, PipelineConfig, RateLimitConfig, RetryConfig, SharedProvider,
    StaticProvider, build_pipeline,
};
use carbon_scheduler::{Planner, SchedulerError};
use serde::Serialize;
use tracing::debug;

use crate::GlobalArgs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Everything a subcommand needs after flag and config resolution.
pub struct Session {
    pub config: CarbonConfig,
    pub output: OutputFormat,
    pub timeout: Duration,
    pub model: ModelContext,
    pub planner: Planner,
    pub ctx: CallContext,
    metrics: Option<Arc<CallMetrics>>,
}

impl Session {
    /// Resolve configuration and build the provider pipeline. Without
    /// `needs_provider` an empty fixture stands in for the upstream.
    pub fn open(global: &GlobalArgs, needs_provider: bool) -> anyhow::Result<Self> {
        let mut config = CarbonConfig::resolve(global.config.as_deref(), |key| std::env::var(key).ok())
            .map_err(|e| SchedulerError::Input(e.to_string()))?;
        if let Some(output) = &global.output {
            config.output = output.trim().to_ascii_lowercase();
        }
        let output = match config.output.as_str() {
            "text" => OutputFormat::Text,
            "json" => OutputFormat::Json,
            other => {
                return Err(SchedulerError::Input(format!("output must be text or json, got {other:?}")).into());
            }
        };

        let timeout = match global.timeout {
            Some(t) => t,
            None => config.timeout_duration().map_err(input)?,
        };
        let cache_ttl = match global.cache_ttl {
            Some(t) => t,
            None => config.cache_ttl_duration().map_err(input)?,
        };
        let cache_dir = match &global.cache_dir {
            Some(dir) if dir.trim().is_empty() => None,
            Some(dir) => Some(PathBuf::from(dir.trim())),
            None => config.cache_dir_path(),
        };

        let metrics = global.metrics.then(|| Arc::new(CallMetrics::new()));
        let pipeline = PipelineConfig {
            timeout,
            retry: RetryConfig {
                max_attempts: config.retry.max_attempts,
                base_delay: config.retry.base_delay_duration().map_err(input)?,
                max_delay: config.retry.max_delay_duration().map_err(input)?,
                jitter: config.retry.jitter,
            }
            .normalized(),
            rate_limit: RateLimitConfig {
                requests_per_second: config.rate_limit.requests_per_second,
                burst: config.rate_limit.burst,
            }
            .normalized(),
            cache_dir,
            cache_ttl,
            metrics: metrics.clone().map(|m| m as Arc<dyn carbon_provider::MetricsRecorder>),
            ..PipelineConfig::default()
        };

        let base = base_provider(global, needs_provider)?;
        let planner = Planner::new(build_pipeline(base, &pipeline));

        let ctx = CallContext::background();
        let on_interrupt = ctx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("interrupted, cancelling");
                on_interrupt.cancel();
            }
        });

        Ok(Self {
            config,
            output,
            timeout,
            model: ModelContext::new(global.runner.clone(), global.load, global.pue),
            planner,
            ctx,
            metrics,
        })
    }

    /// `--zone`, else the configured zone.
    pub fn zone(&self, flag: Option<String>) -> anyhow::Result<String> {
        flag.or_else(|| self.config.zone.clone())
            .filter(|z| !z.trim().is_empty())
            .ok_or_else(|| SchedulerError::Input("zone is required (--zone or CARBON_GUARD_ZONE)".into()).into())
    }

    /// `--zones`, else the configured list.
    pub fn zones(&self, flag: Option<String>) -> anyhow::Result<Vec<String>> {
        let zones = match flag {
            Some(raw) => split_zones(&raw),
            None => self.config.zones.clone(),
        };
        if zones.is_empty() {
            return Err(SchedulerError::Input("zones is required (--zones or CARBON_GUARD_ZONES)".into()).into());
        }
        Ok(zones)
    }

    /// Print `value` as pretty JSON or through `text`.
    pub fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce(&T) -> String) -> anyhow::Result<()> {
        match self.output {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
            OutputFormat::Text => print!("{}", text(value)),
        }
        self.flush_metrics();
        Ok(())
    }

    fn flush_metrics(&self) {
        if let Some(metrics) = &self.metrics {
            eprint!("{}", render_prometheus(&metrics.snapshot()));
        }
    }
}

fn base_provider(global: &GlobalArgs, needs_provider: bool) -> anyhow::Result<SharedProvider> {
    if let Some(path) = &global.fixture {
        let fixture = StaticProvider::from_json_file(path)
            .map_err(|e| SchedulerError::Input(e.to_string()))
            .with_context(|| format!("loading fixture {}", path.display()))?;
        return Ok(Arc::new(fixture));
    }
    if !needs_provider {
        return Ok(Arc::new(StaticProvider::new()));
    }
    let live = ElectricityMapsProvider::from_env()
        .map_err(|e| SchedulerError::Input(format!("missing ELECTRICITY_MAPS_API_KEY: {e}")))?;
    Ok(Arc::new(live))
}

fn input(err: impl std::fmt::Display) -> SchedulerError {
    SchedulerError::Input(err.to_string())
}

/// Process exit code for a command failure. Anything not classified by
/// the scheduler is an input problem.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<SchedulerError>())
        .map(SchedulerError::exit_code)
        .unwrap_or(1)
}
