//! Integration tests for sunsight-common library.

use sunsight_common::{
    DeviceIdentity, FieldNaming, FieldValue, OperatingStatus, Reading, Sample, SampleSink,
    SinkError, Source,
};
use std::sync::Mutex;

/// Sink that remembers every field name it was handed.
#[derive(Default)]
struct NameSink {
    names: Mutex<Vec<String>>,
}

impl SampleSink for NameSink {
    fn name(&self) -> &str {
        "names"
    }

    fn publish(&self, sample: &Sample) -> Result<(), SinkError> {
        let mut names = self.names.lock().unwrap();
        names.extend(sample.fields().map(|f| f.name));
        Ok(())
    }
}

fn full_sample(naming: FieldNaming) -> Sample {
    let inverter = Reading::new(Source::Inverter)
        .with_identity(Some(DeviceIdentity {
            manufacturer: "SolarEdge".to_string(),
            model: "SE5000".to_string(),
            version: "0003.2537".to_string(),
            serial_number: "7E123456".to_string(),
            ..Default::default()
        }))
        .with_field("AC_Power", 3500.0)
        .with_field("AC_Energy_WH", 12_345_678.0)
        .with_field("Status", OperatingStatus::Producing);

    let meter = Reading::new(Source::Meter(1))
        .with_field("AC_Power", -250.0)
        .with_field("Exported", 1_000.0);

    let battery = Reading::new(Source::Battery(1)).with_field("State_of_Energy", 87.5);

    Sample::new(1_700_000_000_000, naming, vec![inverter, meter, battery])
}

#[test]
fn test_sample_through_sink() {
    let sink = NameSink::default();
    sink.publish(&full_sample(FieldNaming::Numbered)).unwrap();

    let names = sink.names.lock().unwrap();
    assert_eq!(
        *names,
        vec![
            "AC_Energy_WH",
            "AC_Power",
            "Status",
            "M1_AC_Power",
            "M1_Exported",
            "B1_State_of_Energy",
        ]
    );
}

#[test]
fn test_legacy_naming_workflow() {
    let sample = full_sample(FieldNaming::Legacy);

    assert_eq!(sample.get("M_Exported"), Some(&FieldValue::Number(1_000.0)));
    assert!(sample.get("M1_Exported").is_none());
    assert_eq!(
        sample.get("B1_State_of_Energy"),
        Some(&FieldValue::Number(87.5))
    );
}

#[test]
fn test_reading_lookup() {
    let sample = full_sample(FieldNaming::Numbered);

    let inverter = sample.reading(Source::Inverter).unwrap();
    assert_eq!(
        inverter.identity().map(|i| i.label()),
        Some("SolarEdge(7E123456)".to_string())
    );
    assert_eq!(
        inverter.get("Status"),
        Some(&FieldValue::Status(OperatingStatus::Producing))
    );
    assert!(sample.reading(Source::Meter(2)).is_none());
    assert_eq!(sample.field_count(), 6);
}
