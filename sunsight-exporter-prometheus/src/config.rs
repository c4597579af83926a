//! Configuration for the Prometheus endpoint.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Prometheus endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Serve the endpoint at all (default: true).
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Address to listen on (default: "0.0.0.0:2112").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,

    /// Default labels to add to all sample series.
    #[serde(default)]
    pub default_labels: HashMap<String, String>,

    /// Metric name prefix (default: none, series are named after their field).
    #[serde(default)]
    pub prefix: String,

    /// Staleness settings.
    #[serde(default)]
    pub aggregation: AggregationConfig,

    /// Metric filtering settings.
    #[serde(default)]
    pub filters: FilterConfig,
}

fn default_enabled() -> bool {
    true
}

fn default_listen() -> String {
    "0.0.0.0:2112".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            listen: default_listen(),
            path: default_path(),
            default_labels: HashMap::new(),
            prefix: String::new(),
            aggregation: AggregationConfig::default(),
            filters: FilterConfig::default(),
        }
    }
}

/// Staleness configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Drop the last sample when no new one arrived for this long (seconds).
    #[serde(default = "default_stale_timeout")]
    pub stale_timeout_secs: u64,

    /// How often to check for a stale sample (seconds).
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

fn default_stale_timeout() -> u64 {
    300 // 5 minutes
}

fn default_cleanup_interval() -> u64 {
    60 // 1 minute
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            stale_timeout_secs: default_stale_timeout(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

impl AggregationConfig {
    pub fn stale_timeout(&self) -> Duration {
        Duration::from_secs(self.stale_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

/// Metric filtering configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Glob patterns for field names to include (empty = all).
    #[serde(default)]
    pub include_metrics: Vec<String>,

    /// Glob patterns for field names to exclude.
    #[serde(default)]
    pub exclude_metrics: Vec<String>,

    /// Only include these sources, e.g. `inverter`, `meter1` (empty = all).
    #[serde(default)]
    pub include_sources: Vec<String>,

    /// Exclude these sources.
    #[serde(default)]
    pub exclude_sources: Vec<String>,
}

impl ExporterConfig {
    /// Parsed listen address.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen
            .parse()
            .map_err(|_| {
                ConfigError::Validation(format!("Invalid listen address: {}", self.listen))
            })
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.aggregation.stale_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "stale_timeout_secs must be > 0".to_string(),
            ));
        }

        if self.aggregation.cleanup_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "cleanup_interval_secs must be > 0".to_string(),
            ));
        }

        self.listen_addr()?;

        if !self.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        if ["/health", "/ready"].contains(&self.path.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Metrics path {} collides with a probe route",
                self.path
            )));
        }

        for pattern in self
            .filters
            .include_metrics
            .iter()
            .chain(&self.filters.exclude_metrics)
        {
            glob::Pattern::new(pattern).map_err(|e| {
                ConfigError::Validation(format!("Invalid metric pattern '{}': {}", pattern, e))
            })?;
        }

        Ok(())
    }
}
