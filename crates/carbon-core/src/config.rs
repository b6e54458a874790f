//! carbon-guard configuration: an optional TOML file overridden by
//! `CARBON_GUARD_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const ENV_CONFIG: &str = "CARBON_GUARD_CONFIG";
pub const ENV_CACHE_DIR: &str = "CARBON_GUARD_CACHE_DIR";
pub const ENV_CACHE_TTL: &str = "CARBON_GUARD_CACHE_TTL";
pub const ENV_TIMEOUT: &str = "CARBON_GUARD_TIMEOUT";
pub const ENV_OUTPUT: &str = "CARBON_GUARD_OUTPUT";
pub const ENV_ZONE: &str = "CARBON_GUARD_ZONE";
pub const ENV_ZONES: &str = "CARBON_GUARD_ZONES";

pub const DEFAULT_CACHE_DIR: &str = "~/.carbon-guard";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid duration for {field}: {value:?}")]
    InvalidDuration { field: &'static str, value: String },

    #[error("invalid output format {0:?} (expected text or json)")]
    InvalidOutput(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CarbonConfig {
    pub cache_dir: String,
    pub cache_ttl: String,
    pub timeout: String,
    pub output: String,
    pub zone: Option<String>,
    pub zones: Vec<String>,
    pub retry: RetrySettings,
    pub rate_limit: RateLimitSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay: String,
    pub max_delay: String,
    pub jitter: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitSettings {
    pub requests_per_second: f64,
    pub burst: u32,
}

impl Default for CarbonConfig {
    fn default() -> Self {
        Self {
            cache_dir: DEFAULT_CACHE_DIR.to_string(),
            cache_ttl: "10m".to_string(),
            timeout: "30s".to_string(),
            output: "text".to_string(),
            zone: None,
            zones: Vec::new(),
            retry: RetrySettings::default(),
            rate_limit: RateLimitSettings::default(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: "200ms".to_string(),
            max_delay: "2s".to_string(),
            jitter: 0.2,
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests_per_second: 5.0,
            burst: 5,
        }
    }
}

impl CarbonConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Build the effective configuration.
    ///
    /// The file comes from `explicit_path`, else `CARBON_GUARD_CONFIG`; no
    /// file means defaults. Environment values then override file values.
    /// `env` is the variable lookup, normally `|k| std::env::var(k).ok()`.
    pub fn resolve<F>(explicit_path: Option<&Path>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let file_path = explicit_path
            .map(Path::to_path_buf)
            .or_else(|| lookup(ENV_CONFIG).map(PathBuf::from));
        let mut config = match file_path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        if let Some(v) = lookup(ENV_CACHE_DIR) {
            config.cache_dir = v;
        }
        if let Some(v) = lookup(ENV_CACHE_TTL) {
            config.cache_ttl = v;
        }
        if let Some(v) = lookup(ENV_TIMEOUT) {
            config.timeout = v;
        }
        if let Some(v) = lookup(ENV_OUTPUT) {
            config.output = v;
        }
        if let Some(v) = lookup(ENV_ZONE) {
            config.zone = Some(v);
        }
        if let Some(v) = lookup(ENV_ZONES) {
            config.zones = split_zones(&v);
        }

        config.output = config.output.trim().to_ascii_lowercase();
        if config.output != "text" && config.output != "json" {
            return Err(ConfigError::InvalidOutput(config.output));
        }
        config.cache_dir = expand_home(&config.cache_dir, lookup("HOME").as_deref());

        // Surface bad durations at load time rather than on first use.
        config.cache_ttl_duration()?;
        config.timeout_duration()?;
        config.retry.base_delay_duration()?;
        config.retry.max_delay_duration()?;

        Ok(config)
    }

    pub fn cache_ttl_duration(&self) -> Result<Duration, ConfigError> {
        duration_field("cache_ttl", &self.cache_ttl)
    }

    pub fn timeout_duration(&self) -> Result<Duration, ConfigError> {
        duration_field("timeout", &self.timeout)
    }

    pub fn cache_dir_path(&self) -> Option<PathBuf> {
        let dir = self.cache_dir.trim();
        (!dir.is_empty()).then(|| PathBuf::from(dir))
    }
}

impl RetrySettings {
    pub fn base_delay_duration(&self) -> Result<Duration, ConfigError> {
        duration_field("retry.base_delay", &self.base_delay)
    }

    pub fn max_delay_duration(&self) -> Result<Duration, ConfigError> {
        duration_field("retry.max_delay", &self.max_delay)
    }
}

/// Split a comma-separated zone list, dropping blanks.
pub fn split_zones(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|z| !z.is_empty())
        .map(str::to_string)
        .collect()
}

fn expand_home(path: &str, home: Option<&str>) -> String {
    match (path.strip_prefix('~'), home) {
        (Some(rest), Some(home)) if rest.is_empty() || rest.starts_with('/') => {
            format!("{home}{rest}")
        }
        _ => path.to_string(),
    }
}

fn duration_field(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
        field,
        value: value.to_string(),
    })
}

/// Parse durations such as "500ms", "30s", "10m", "2h" or "1h30m".
/// A bare number is seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let value: u64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let part = match &rest[..unit_len] {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.checked_mul(60)?),
            "h" => Duration::from_secs(value.checked_mul(3600)?),
            _ => return None,
        };
        rest = &rest[unit_len..];
        total = total.checked_add(part)?;
    }
    Some(total)
}
