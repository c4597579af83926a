//! Configuration for the InfluxDB sink.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),
}

/// InfluxDB connection and point settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfluxConfig {
    /// Push samples at all (default: true).
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Server URL (default: "http://localhost:8086").
    #[serde(default = "default_url")]
    pub url: String,

    /// Database (1.x) or bucket (2.x) name (default: "solaredge").
    #[serde(default = "default_database")]
    pub database: String,

    /// Organization, only meaningful on 2.x servers.
    #[serde(default)]
    pub org: String,

    /// 1.x username, sent as part of a `user:password` token.
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// 2.x API token. Takes precedence over username/password.
    #[serde(default)]
    pub token: Option<String>,

    /// Measurement name (default: "SolarEdge").
    #[serde(default = "default_measurement")]
    pub measurement: String,

    /// Extra tags added to every point.
    #[serde(default)]
    pub tags: HashMap<String, String>,

    /// Writes allowed in flight before samples are dropped (default: 4).
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_enabled() -> bool {
    true
}

fn default_url() -> String {
    "http://localhost:8086".to_string()
}

fn default_database() -> String {
    "solaredge".to_string()
}

fn default_measurement() -> String {
    "SolarEdge".to_string()
}

fn default_max_in_flight() -> usize {
    4
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            url: default_url(),
            database: default_database(),
            org: String::new(),
            username: None,
            password: None,
            token: None,
            measurement: default_measurement(),
            tags: HashMap::new(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

impl InfluxConfig {
    /// Token sent in the `Authorization` header.
    ///
    /// InfluxDB 1.8+ accepts `user:password` in place of a 2.x token.
    pub fn auth_token(&self) -> String {
        if let Some(token) = &self.token {
            return token.clone();
        }

        match (&self.username, &self.password) {
            (Some(user), Some(password)) => format!("{}:{}", user, password),
            (Some(user), None) => format!("{}:", user),
            _ => String::new(),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(ConfigError::Validation(format!(
                "InfluxDB url must be http(s): {}",
                self.url
            )));
        }

        if self.database.is_empty() {
            return Err(ConfigError::Validation(
                "InfluxDB database cannot be empty".to_string(),
            ));
        }

        if self.measurement.is_empty() {
            return Err(ConfigError::Validation(
                "InfluxDB measurement cannot be empty".to_string(),
            ));
        }

        if self.max_in_flight == 0 {
            return Err(ConfigError::Validation(
                "max_in_flight must be > 0".to_string(),
            ));
        }

        if self.password.is_some() && self.username.is_none() {
            return Err(ConfigError::Validation(
                "InfluxDB password given without username".to_string(),
            ));
        }

        Ok(())
    }
}
