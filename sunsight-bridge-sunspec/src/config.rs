//! Configuration for the SunSpec bridge.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use sunsight_common::{FieldNaming, LoggingConfig};
use sunsight_exporter_influx::InfluxConfig;
use sunsight_exporter_prometheus::ExporterConfig;
use thiserror::Error;

use crate::registers::{MAX_BATTERIES, MAX_METERS, Wiring};

/// Largest register count a single Modbus read request may carry.
pub const MODBUS_MAX_READ_REGISTERS: u16 = 125;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Inverter connection settings
    #[serde(default)]
    pub inverter: InverterConfig,

    /// Power meters chained behind the inverter
    #[serde(default)]
    pub meters: MeterChainConfig,

    /// Batteries chained behind the inverter
    #[serde(default)]
    pub batteries: BatteryChainConfig,

    /// Polling cadence
    #[serde(default)]
    pub poll: PollConfig,

    /// Publish meter 1 fields with the historical `M_` prefix instead of `M1_`
    #[serde(default)]
    pub legacy_support: bool,

    /// Time-series push sink
    #[serde(default)]
    pub influx: InfluxConfig,

    /// Metrics pull endpoint
    #[serde(default)]
    pub prometheus: ExporterConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Inverter connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InverterConfig {
    /// Host address (IP or hostname)
    #[serde(default)]
    pub host: String,

    /// TCP port (default: 502)
    #[serde(default = "default_modbus_port")]
    pub port: u16,

    /// Modbus unit ID (1-247)
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Connect and read timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Upper bound on registers per physical read request (1-125)
    #[serde(default = "default_max_registers_per_read")]
    pub max_registers_per_read: u16,

    /// Inverter phase model, or `auto` to detect it from the SunSpec DID
    #[serde(default)]
    pub model: WiringSelection,
}

fn default_modbus_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_max_registers_per_read() -> u16 {
    MODBUS_MAX_READ_REGISTERS
}

impl Default for InverterConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_modbus_port(),
            unit_id: default_unit_id(),
            timeout_ms: default_timeout_ms(),
            max_registers_per_read: default_max_registers_per_read(),
            model: WiringSelection::default(),
        }
    }
}

impl InverterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Power meters attached to the inverter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeterChainConfig {
    /// Number of meters (0-3)
    #[serde(default)]
    pub count: u8,

    /// Unit ID the meters answer on (default: the inverter's)
    #[serde(default)]
    pub unit_id: Option<u8>,

    /// Meter wiring, or `auto` to detect it from the SunSpec DID
    #[serde(default)]
    pub model: WiringSelection,
}

/// Batteries attached to the inverter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatteryChainConfig {
    /// Number of batteries (0-2)
    #[serde(default)]
    pub count: u8,

    /// Unit ID the batteries answer on (default: the inverter's)
    #[serde(default)]
    pub unit_id: Option<u8>,
}

/// Poll loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Poll interval in seconds
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
}

fn default_poll_interval() -> u64 {
    5
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval(),
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Phase model selection for a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WiringSelection {
    /// Detect from the SunSpec DID register on every read
    #[default]
    Auto,
    SinglePhase,
    SplitPhase,
    ThreePhase,
}

impl WiringSelection {
    /// The forced wiring, or `None` for auto-detection.
    pub fn fixed(&self) -> Option<Wiring> {
        match self {
            WiringSelection::Auto => None,
            WiringSelection::SinglePhase => Some(Wiring::SinglePhase),
            WiringSelection::SplitPhase => Some(Wiring::SplitPhase),
            WiringSelection::ThreePhase => Some(Wiring::ThreePhase),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a JSON5 file.
    ///
    /// The result is not validated; call [`BridgeConfig::validate`] once
    /// every override has been applied.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(json5::from_str(content)?)
    }

    /// Configuration with only the inverter host set.
    pub fn for_host(host: impl Into<String>) -> Self {
        Self {
            inverter: InverterConfig {
                host: host.into(),
                ..Default::default()
            },
            meters: MeterChainConfig::default(),
            batteries: BatteryChainConfig::default(),
            poll: PollConfig::default(),
            legacy_support: false,
            influx: InfluxConfig::default(),
            prometheus: ExporterConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Field naming scheme implied by the legacy flag.
    pub fn naming(&self) -> FieldNaming {
        if self.legacy_support {
            FieldNaming::Legacy
        } else {
            FieldNaming::Numbered
        }
    }

    /// Unit ID used for meter reads.
    pub fn meter_unit_id(&self) -> u8 {
        self.meters.unit_id.unwrap_or(self.inverter.unit_id)
    }

    /// Unit ID used for battery reads.
    pub fn battery_unit_id(&self) -> u8 {
        self.batteries.unit_id.unwrap_or(self.inverter.unit_id)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.inverter.host.trim().is_empty() {
            return Err(ConfigError::Validation(
                "inverter.host must be set".to_string(),
            ));
        }

        validate_unit_id("inverter.unit_id", self.inverter.unit_id)?;
        if let Some(unit_id) = self.meters.unit_id {
            validate_unit_id("meters.unit_id", unit_id)?;
        }
        if let Some(unit_id) = self.batteries.unit_id {
            validate_unit_id("batteries.unit_id", unit_id)?;
        }

        if self.inverter.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "inverter.timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.inverter.max_registers_per_read == 0
            || self.inverter.max_registers_per_read > MODBUS_MAX_READ_REGISTERS
        {
            return Err(ConfigError::Validation(format!(
                "inverter.max_registers_per_read must be 1-{}",
                MODBUS_MAX_READ_REGISTERS
            )));
        }

        if self.meters.count > MAX_METERS {
            return Err(ConfigError::Validation(format!(
                "meters.count must be 0-{}",
                MAX_METERS
            )));
        }

        if self.batteries.count > MAX_BATTERIES {
            return Err(ConfigError::Validation(format!(
                "batteries.count must be 0-{}",
                MAX_BATTERIES
            )));
        }

        if self.poll.interval_secs == 0 {
            return Err(ConfigError::Validation(
                "poll.interval_secs must be greater than 0".to_string(),
            ));
        }

        self.influx
            .validate()
            .map_err(|e| ConfigError::Validation(format!("influx: {}", e)))?;
        self.prometheus
            .validate()
            .map_err(|e| ConfigError::Validation(format!("prometheus: {}", e)))?;

        Ok(())
    }
}

fn validate_unit_id(field: &str, unit_id: u8) -> Result<(), ConfigError> {
    if unit_id == 0 || unit_id > 247 {
        return Err(ConfigError::Validation(format!(
            "{} must be 1-247, got {}",
            field, unit_id
        )));
    }
    Ok(())
}
