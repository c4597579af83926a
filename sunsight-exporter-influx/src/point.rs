//! Sample to InfluxDB point mapping.

use std::collections::BTreeMap;

use influxdb2::models::DataPoint;
use sunsight_common::{FieldValue, Sample, SinkError, Source};
use tracing::trace;

use crate::config::InfluxConfig;

/// Field value as written to InfluxDB.
#[derive(Debug, Clone, PartialEq)]
pub enum PointValue {
    Float(f64),
    Text(String),
}

/// One InfluxDB point built from a sample.
#[derive(Debug, Clone, PartialEq)]
pub struct InfluxPoint {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, PointValue>,
    /// Unix epoch milliseconds.
    pub timestamp_ms: i64,
}

impl InfluxPoint {
    /// Build a point holding every field of `sample`.
    ///
    /// Non-finite numbers are skipped since line protocol cannot carry them.
    pub fn from_sample(sample: &Sample, config: &InfluxConfig) -> Self {
        let mut tags: BTreeMap<String, String> = config
            .tags
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if let Some(identity) = sample
            .reading(Source::Inverter)
            .and_then(|r| r.identity())
        {
            tags.insert("inverter".to_string(), identity.label());
        }

        let mut fields = BTreeMap::new();
        for field in sample.fields() {
            let value = match field.value {
                FieldValue::Number(v) if v.is_finite() => PointValue::Float(*v),
                FieldValue::Number(v) => {
                    trace!(field = %field.name, value = %v, "Skipping non-finite value");
                    continue;
                }
                FieldValue::Status(status) => PointValue::Text(status.as_str().to_string()),
                FieldValue::Text(text) => PointValue::Text(text.clone()),
            };
            fields.insert(field.name, value);
        }

        Self {
            measurement: config.measurement.clone(),
            tags,
            fields,
            timestamp_ms: sample.timestamp(),
        }
    }

    /// Convert into an `influxdb2` data point.
    pub fn to_data_point(&self) -> Result<DataPoint, SinkError> {
        if self.fields.is_empty() {
            return Err(SinkError::encode("influx", "sample has no fields"));
        }

        let mut builder = DataPoint::builder(self.measurement.as_str());
        for (key, value) in &self.tags {
            builder = builder.tag(key.as_str(), value.as_str());
        }
        for (key, value) in &self.fields {
            builder = match value {
                PointValue::Float(v) => builder.field(key.as_str(), *v),
                PointValue::Text(s) => builder.field(key.as_str(), s.as_str()),
            };
        }

        builder
            .timestamp(self.timestamp_ms)
            .build()
            .map_err(|e| SinkError::encode("influx", e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sunsight_common::{DeviceIdentity, FieldNaming, OperatingStatus, Reading};

    fn sample() -> Sample {
        let inverter = Reading::new(Source::Inverter)
            .with_identity(Some(DeviceIdentity {
                manufacturer: "SolarEdge".to_string(),
                serial_number: "7E0F2A11".to_string(),
                ..Default::default()
            }))
            .with_field("AC_Power", 3500.0)
            .with_field("Status", OperatingStatus::Producing)
            .with_field("Bad", f64::INFINITY);
        let meter = Reading::new(Source::Meter(1)).with_field("AC_Power", -120.0);
        Sample::new(1_700_000_000_123, FieldNaming::Legacy, vec![inverter, meter])
    }

    #[test]
    fn test_point_from_sample() {
        let mut config = InfluxConfig::default();
        config.tags.insert("site".to_string(), "roof".to_string());

        let point = InfluxPoint::from_sample(&sample(), &config);

        assert_eq!(point.measurement, "SolarEdge");
        assert_eq!(point.timestamp_ms, 1_700_000_000_123);
        assert_eq!(point.tags.get("site"), Some(&"roof".to_string()));
        assert_eq!(
            point.tags.get("inverter"),
            Some(&"SolarEdge(7E0F2A11)".to_string())
        );
        assert_eq!(point.fields.get("AC_Power"), Some(&PointValue::Float(3500.0)));
        assert_eq!(point.fields.get("M_AC_Power"), Some(&PointValue::Float(-120.0)));
        assert_eq!(
            point.fields.get("Status"),
            Some(&PointValue::Text("producing".to_string()))
        );
        assert!(!point.fields.contains_key("Bad"));
        assert!(point.to_data_point().is_ok());
    }

    #[test]
    fn test_no_identity_no_tag() {
        let reading = Reading::new(Source::Inverter).with_field("AC_Power", 1.0);
        let sample = Sample::new(0, FieldNaming::Numbered, vec![reading]);

        let point = InfluxPoint::from_sample(&sample, &InfluxConfig::default());
        assert!(point.tags.is_empty());
    }

    #[test]
    fn test_empty_sample_rejected() {
        let sample = Sample::new(0, FieldNaming::Numbered, vec![Reading::new(Source::Inverter)]);
        let point = InfluxPoint::from_sample(&sample, &InfluxConfig::default());

        let err = point.to_data_point().unwrap_err();
        assert!(matches!(err, SinkError::Encode { .. }));
    }
}
