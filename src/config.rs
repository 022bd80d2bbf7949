use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::models::{DriftThresholds, EndpointConfig};
use crate::report::OutputFormat;

pub const DEFAULT_TIMEOUT_SECS: f64 = 10.0;
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 250;

/// Probe policy applied to every endpoint unless overridden per endpoint.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ProbeConfig {
    pub timeout_secs: f64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct RpcEndpoint {
    pub url: String,
    pub nickname: Option<String>,
    pub timeout_secs: Option<f64>,
    pub max_retries: Option<u32>,
    pub backoff_base_ms: Option<u64>,
}

impl RpcEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            nickname: None,
            timeout_secs: None,
            max_retries: None,
            backoff_base_ms: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_secs: f64,
    pub history: usize,
    pub listen: Option<SocketAddr>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 15.0,
            history: 120,
            listen: None,
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Result<Duration, ConfigError> {
        if !(self.interval_secs.is_finite() && self.interval_secs > 0.0) {
            return Err(ConfigError::InvalidInterval(self.interval_secs));
        }
        if self.history == 0 {
            return Err(ConfigError::InvalidHistory);
        }
        Ok(Duration::from_secs_f64(self.interval_secs))
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub format: OutputFormat,
    pub probe: ProbeConfig,
    pub thresholds: DriftThresholds,
    pub monitor: MonitorConfig,
    /// The first entry is the primary.
    pub endpoints: Vec<RpcEndpoint>,
}

impl AppConfig {
    /// Resolves every endpoint against the probe defaults and validates the
    /// set. Nothing touches the network before this succeeds.
    pub fn endpoint_configs(&self) -> Result<Vec<EndpointConfig>, ConfigError> {
        match self.endpoints.len() {
            0 => return Err(ConfigError::NoEndpoints),
            1 => return Err(ConfigError::MissingSecondary),
            _ => {}
        }

        self.endpoints
            .iter()
            .enumerate()
            .map(|(i, endpoint)| self.resolve(i, endpoint))
            .collect()
    }

    fn resolve(&self, index: usize, endpoint: &RpcEndpoint) -> Result<EndpointConfig, ConfigError> {
        validate_url(&endpoint.url)?;

        let timeout_secs = endpoint.timeout_secs.unwrap_or(self.probe.timeout_secs);
        if !(timeout_secs.is_finite() && timeout_secs > 0.0) {
            return Err(ConfigError::NonPositiveTimeout {
                url: endpoint.url.clone(),
                secs: timeout_secs,
            });
        }

        let nickname = endpoint.nickname.clone().unwrap_or_else(|| match index {
            0 => "primary".to_string(),
            1 if self.endpoints.len() == 2 => "secondary".to_string(),
            n => format!("secondary-{}", n),
        });

        Ok(EndpointConfig {
            nickname,
            url: endpoint.url.clone(),
            timeout: Duration::from_secs_f64(timeout_secs),
            max_retries: endpoint.max_retries.unwrap_or(self.probe.max_retries),
            backoff_base: Duration::from_millis(
                endpoint.backoff_base_ms.unwrap_or(self.probe.backoff_base_ms),
            ),
        })
    }
}

fn validate_url(url: &str) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidUrl {
        url: url.to_string(),
        reason,
    };
    let parsed = Url::parse(url).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(format!("unsupported scheme '{}'", other))),
    }
    if parsed.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    Ok(())
}

pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let config_str = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&config_str).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
