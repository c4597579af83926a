use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which device on the Modbus link a reading came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// The inverter itself.
    Inverter,
    /// Power meter chained behind the inverter (1-based index).
    Meter(u8),
    /// Storage battery chained behind the inverter (1-based index).
    Battery(u8),
}

impl Source {
    /// Label used for the `source` dimension in sinks (`inverter`, `meter1`, ...).
    pub fn label(&self) -> String {
        match self {
            Source::Inverter => "inverter".to_string(),
            Source::Meter(n) => format!("meter{}", n),
            Source::Battery(n) => format!("battery{}", n),
        }
    }

    /// Build the published field name for a field of this source.
    ///
    /// Inverter fields are published as-is, meter fields get `M{n}_` and
    /// battery fields `B{n}_`. Legacy naming publishes meter 1 as `M_`.
    pub fn qualify(&self, field: &str, naming: FieldNaming) -> String {
        match self {
            Source::Inverter => field.to_string(),
            Source::Meter(1) if naming == FieldNaming::Legacy => format!("M_{}", field),
            Source::Meter(n) => format!("M{}_{}", n, field),
            Source::Battery(n) => format!("B{}_{}", n, field),
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Naming scheme for meter fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldNaming {
    /// Every meter is numbered (`M1_`, `M2_`, ...).
    #[default]
    Numbered,
    /// Meter 1 keeps the historical `M_` prefix.
    Legacy,
}

/// SunSpec inverter operating state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingStatus {
    Off,
    Sleeping,
    Starting,
    Producing,
    Throttled,
    ShuttingDown,
    Fault,
    Standby,
}

impl OperatingStatus {
    /// Map a raw SunSpec status code to a state.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(OperatingStatus::Off),
            2 => Some(OperatingStatus::Sleeping),
            3 => Some(OperatingStatus::Starting),
            4 => Some(OperatingStatus::Producing),
            5 => Some(OperatingStatus::Throttled),
            6 => Some(OperatingStatus::ShuttingDown),
            7 => Some(OperatingStatus::Fault),
            8 => Some(OperatingStatus::Standby),
            _ => None,
        }
    }

    /// The raw SunSpec status code.
    pub fn code(&self) -> u16 {
        match self {
            OperatingStatus::Off => 1,
            OperatingStatus::Sleeping => 2,
            OperatingStatus::Starting => 3,
            OperatingStatus::Producing => 4,
            OperatingStatus::Throttled => 5,
            OperatingStatus::ShuttingDown => 6,
            OperatingStatus::Fault => 7,
            OperatingStatus::Standby => 8,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperatingStatus::Off => "off",
            OperatingStatus::Sleeping => "sleeping",
            OperatingStatus::Starting => "starting",
            OperatingStatus::Producing => "producing",
            OperatingStatus::Throttled => "throttled",
            OperatingStatus::ShuttingDown => "shutting_down",
            OperatingStatus::Fault => "fault",
            OperatingStatus::Standby => "standby",
        }
    }
}

impl std::fmt::Display for OperatingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A decoded field value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    /// Physical quantity with its scale factor already applied.
    Number(f64),

    /// Operating state.
    Status(OperatingStatus),

    /// Text value.
    Text(String),
}

impl FieldValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(v) => Some(*v),
            FieldValue::Status(s) => Some(s.code() as f64),
            FieldValue::Text(_) => None,
        }
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Number(v)
    }
}

impl From<OperatingStatus> for FieldValue {
    fn from(v: OperatingStatus) -> Self {
        FieldValue::Status(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

/// Identity block of a SunSpec device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub manufacturer: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub options: String,
    pub version: String,
    pub serial_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_address: Option<u16>,
}

impl DeviceIdentity {
    /// Human-readable device label, `Manufacturer(Serial)`.
    pub fn label(&self) -> String {
        format!("{}({})", self.manufacturer, self.serial_number)
    }
}

/// Decoded fields from one device for one poll cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reading {
    source: Source,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    identity: Option<DeviceIdentity>,

    fields: BTreeMap<String, FieldValue>,
}

impl Reading {
    /// Create an empty reading for a source.
    pub fn new(source: Source) -> Self {
        Self {
            source,
            identity: None,
            fields: BTreeMap::new(),
        }
    }

    /// Attach the device identity.
    pub fn with_identity(mut self, identity: Option<DeviceIdentity>) -> Self {
        self.identity = identity;
        self
    }

    /// Add a field to this reading.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Add multiple fields to this reading.
    pub fn with_fields(mut self, fields: impl IntoIterator<Item = (String, FieldValue)>) -> Self {
        self.fields.extend(fields);
        self
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref()
    }

    /// Fields keyed by their unqualified name (`AC_Power`).
    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}

/// A field of a sample with its published name resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleField<'a> {
    /// Qualified field name (`AC_Power`, `M1_AC_Power`, ...).
    pub name: String,
    pub source: Source,
    pub value: &'a FieldValue,
}

/// One complete decoded snapshot of every device for one poll cycle.
///
/// A sample is immutable once built; sinks receive it by shared reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    /// Unix epoch milliseconds when the cycle started.
    timestamp: i64,

    naming: FieldNaming,

    readings: Vec<Reading>,
}

impl Sample {
    pub fn new(timestamp: i64, naming: FieldNaming, readings: Vec<Reading>) -> Self {
        Self {
            timestamp,
            naming,
            readings,
        }
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn naming(&self) -> FieldNaming {
        self.naming
    }

    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    /// The reading for a given source, if it was polled this cycle.
    pub fn reading(&self, source: Source) -> Option<&Reading> {
        self.readings.iter().find(|r| r.source == source)
    }

    /// Iterate over every field with its qualified name, in reading order.
    pub fn fields(&self) -> impl Iterator<Item = SampleField<'_>> + '_ {
        self.readings.iter().flat_map(move |reading| {
            reading.fields.iter().map(move |(name, value)| SampleField {
                name: reading.source.qualify(name, self.naming),
                source: reading.source,
                value,
            })
        })
    }

    /// Look up a field by its qualified name.
    pub fn get(&self, qualified: &str) -> Option<&FieldValue> {
        self.fields()
            .find(|field| field.name == qualified)
            .map(|field| field.value)
    }

    /// Total number of decoded fields across all readings.
    pub fn field_count(&self) -> usize {
        self.readings.iter().map(|r| r.fields.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.field_count() == 0
    }
}
