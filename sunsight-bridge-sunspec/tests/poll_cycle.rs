//! Poll cycle tests against an in-memory SunSpec device.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sunsight_bridge_sunspec::config::BridgeConfig;
use sunsight_bridge_sunspec::poller::{PollState, Poller};
use sunsight_bridge_sunspec::{ConnectionError, Connector, ModbusTransport, ReadError};
use sunsight_common::{FieldValue, OperatingStatus, Sample, SampleSink, SinkError, Source};
use sunsight_exporter_prometheus::{ExporterConfig, MetricRegistry, ModbusMetrics};
use tokio::sync::watch;

const INVERTER_INFO: u16 = 40004;
const INVERTER: u16 = 40069;
const METER1: u16 = 40188;
const BATTERY1: u16 = 57666;

/// Shared register image plus fault switches.
#[derive(Clone, Default)]
struct FakeDevice {
    registers: Arc<Mutex<HashMap<u16, u16>>>,
    refuse_connects: Arc<AtomicUsize>,
    fail_address: Arc<Mutex<Option<u16>>>,
    connect_attempts: Arc<AtomicUsize>,
}

impl FakeDevice {
    fn set(&self, address: u16, value: u16) {
        self.registers.lock().unwrap().insert(address, value);
    }

    fn set_i16(&self, address: u16, value: i16) {
        self.set(address, value as u16);
    }

    fn set_text(&self, address: u16, text: &str) {
        let mut bytes = text.as_bytes().to_vec();
        if bytes.len() % 2 == 1 {
            bytes.push(0);
        }
        for (i, pair) in bytes.chunks(2).enumerate() {
            self.set(address + i as u16, u16::from_be_bytes([pair[0], pair[1]]));
        }
    }

    /// Inverter producing 3500 W at 241.3 V.
    fn producing_inverter() -> Self {
        let device = FakeDevice::default();
        device.set_text(INVERTER_INFO, "SolarEdge");
        device.set_text(INVERTER_INFO + 16, "SE5000H");
        device.set_text(INVERTER_INFO + 48, "7E0F2A11");
        device.set(INVERTER_INFO + 64, 1);

        device.set(INVERTER, 101);
        device.set(INVERTER + 1, 50);
        device.set(INVERTER + 10, 2413);
        device.set_i16(INVERTER + 13, -1);
        device.set(INVERTER + 14, 3500);
        device.set(INVERTER + 15, 0);
        device.set(INVERTER + 38, 4);
        device
    }
}

struct FakeTransport {
    device: FakeDevice,
}

impl ModbusTransport for FakeTransport {
    async fn read_holding_registers(
        &mut self,
        _unit_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ReadError> {
        if let Some(bad) = *self.device.fail_address.lock().unwrap() {
            if (address..address + count).contains(&bad) {
                return Err(ReadError::Timeout {
                    address,
                    timeout: Duration::from_secs(10),
                });
            }
        }

        let registers = self.device.registers.lock().unwrap();
        Ok((address..address + count)
            .map(|a| registers.get(&a).copied().unwrap_or(0))
            .collect())
    }
}

struct FakeConnector {
    device: FakeDevice,
}

impl Connector for FakeConnector {
    type Transport = FakeTransport;

    async fn connect(&self) -> Result<FakeTransport, ConnectionError> {
        self.device.connect_attempts.fetch_add(1, Ordering::SeqCst);

        let refused = self
            .device
            .refuse_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(ConnectionError::Refused {
                addr: "fake:502".to_string(),
                message: "connection refused".to_string(),
            });
        }

        Ok(FakeTransport {
            device: self.device.clone(),
        })
    }
}

/// Records every sample it receives.
#[derive(Default)]
struct RecordingSink {
    samples: Mutex<Vec<Sample>>,
}

impl SampleSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    fn publish(&self, sample: &Sample) -> Result<(), SinkError> {
        self.samples.lock().unwrap().push(sample.clone());
        Ok(())
    }
}

struct FailingSink;

impl SampleSink for FailingSink {
    fn name(&self) -> &str {
        "failing"
    }

    fn publish(&self, _sample: &Sample) -> Result<(), SinkError> {
        Err(SinkError::write("failing", "database unreachable"))
    }
}

fn fake_poller(config: BridgeConfig, device: &FakeDevice) -> Poller<FakeConnector> {
    Poller::new(
        config,
        FakeConnector {
            device: device.clone(),
        },
    )
}

#[tokio::test]
async fn test_end_to_end_sample_reaches_both_sinks() {
    let device = FakeDevice::producing_inverter();
    let recording = Arc::new(RecordingSink::default());
    let registry = Arc::new(MetricRegistry::new(&ExporterConfig::default()));

    let mut poller = fake_poller(BridgeConfig::for_host("fake"), &device)
        .with_sink(recording.clone())
        .with_sink(registry.clone());

    let sample = poller.run_cycle().await.expect("cycle should succeed");
    assert_eq!(poller.state(), PollState::Idle);

    assert_eq!(sample.get("AC_Power"), Some(&FieldValue::Number(3500.0)));
    assert_eq!(sample.get("AC_VoltageAN"), Some(&FieldValue::Number(241.3)));
    assert_eq!(
        sample.get("Status"),
        Some(&FieldValue::Status(OperatingStatus::Producing))
    );
    // Single phase model: phase B/C registers are not published
    assert!(sample.get("AC_CurrentB").is_none());
    // Zero energy counter is the acc32 sentinel
    assert!(sample.get("AC_Energy_WH").is_none());

    let identity = poller.identity(Source::Inverter).unwrap();
    assert_eq!(identity.manufacturer, "SolarEdge");
    assert_eq!(identity.model, "SE5000H");
    assert_eq!(identity.serial_number, "7E0F2A11");
    assert_eq!(identity.device_address, Some(1));

    assert_eq!(recording.samples.lock().unwrap().len(), 1);

    let output = registry.render();
    assert!(output.contains("AC_Power{source=\"inverter\"} 3500"));
    assert!(output.contains("Status{source=\"inverter\",state=\"producing\"} 4"));
    assert!(output.contains("# HELP AC_Power AC_Power - SolarEdge(7E0F2A11)"));
}

#[tokio::test]
async fn test_identity_read_once_per_connection() {
    let device = FakeDevice::producing_inverter();
    let mut poller = fake_poller(BridgeConfig::for_host("fake"), &device);

    poller.run_cycle().await.unwrap();
    device.set_text(INVERTER_INFO, "Renamed!");
    poller.run_cycle().await.unwrap();

    assert_eq!(device.connect_attempts.load(Ordering::SeqCst), 1);
    assert_eq!(
        poller.identity(Source::Inverter).unwrap().manufacturer,
        "SolarEdge"
    );
}

#[tokio::test]
async fn test_connection_failure_recovers_next_cycle() {
    let device = FakeDevice::producing_inverter();
    device.refuse_connects.store(1, Ordering::SeqCst);

    let health = Arc::new(ModbusMetrics::new());
    let mut poller =
        fake_poller(BridgeConfig::for_host("fake"), &device).with_observer(health.clone());

    assert!(poller.run_cycle().await.is_none());
    let sample = poller.run_cycle().await.expect("second cycle should reconnect");
    assert_eq!(sample.get("AC_Power"), Some(&FieldValue::Number(3500.0)));
    assert_eq!(device.connect_attempts.load(Ordering::SeqCst), 2);

    let metrics = health.encode();
    assert!(metrics.contains("modbus_connect_attempts_total{result=\"failure\"} 1"));
    assert!(metrics.contains("modbus_connect_attempts_total{result=\"success\"} 1"));
    assert!(metrics.contains("poll_cycles_total{result=\"failure\"} 1"));
    assert!(metrics.contains("poll_cycles_total{result=\"success\"} 1"));
}

#[tokio::test]
async fn test_read_failure_drops_connection() {
    let device = FakeDevice::producing_inverter();
    let mut config = BridgeConfig::for_host("fake");
    config.meters.count = 1;

    let health = Arc::new(ModbusMetrics::new());
    let recording = Arc::new(RecordingSink::default());
    let mut poller = fake_poller(config, &device)
        .with_observer(health.clone())
        .with_sink(recording.clone());

    *device.fail_address.lock().unwrap() = Some(METER1 + 18);
    assert!(poller.run_cycle().await.is_none());
    assert!(recording.samples.lock().unwrap().is_empty());

    *device.fail_address.lock().unwrap() = None;
    assert!(poller.run_cycle().await.is_some());

    // The failed cycle dropped the connection
    assert_eq!(device.connect_attempts.load(Ordering::SeqCst), 2);
    assert!(
        health
            .encode()
            .contains("modbus_timeouts_total{section=\"meter1\"} 1")
    );
}

#[tokio::test]
async fn test_failing_sink_does_not_block_registry() {
    let device = FakeDevice::producing_inverter();
    let registry = Arc::new(MetricRegistry::new(&ExporterConfig::default()));

    let mut poller = fake_poller(BridgeConfig::for_host("fake"), &device)
        .with_sink(Arc::new(FailingSink))
        .with_sink(registry.clone());

    let sample = poller.run_cycle().await.unwrap();
    assert_eq!(poller.dispatch(&sample), 1);
    assert!(registry.snapshot().is_some());
    assert_eq!(registry.stats().samples_received, 2);
}

#[tokio::test]
async fn test_bad_field_does_not_abort_others() {
    let device = FakeDevice::producing_inverter();
    // Unknown operating state and a not-implemented power reading
    device.set(INVERTER + 38, 42);
    device.set(INVERTER + 31, 0x8000);

    let mut poller = fake_poller(BridgeConfig::for_host("fake"), &device);
    let sample = poller.run_cycle().await.unwrap();

    assert!(sample.get("Status").is_none());
    assert!(sample.get("DC_Power").is_none());
    assert_eq!(sample.get("AC_Power"), Some(&FieldValue::Number(3500.0)));
}

#[tokio::test]
async fn test_meters_and_batteries() {
    let device = FakeDevice::producing_inverter();
    device.set(METER1, 203);
    device.set_i16(METER1 + 18, -1200);
    device.set_i16(METER1 + 22, -1);
    device.set_i16(METER1 + 20, 300);

    // 87.5 % as a little-endian-word float32
    let bits = 87.5f32.to_bits();
    device.set(BATTERY1 + 66, (bits & 0xFFFF) as u16);
    device.set(BATTERY1 + 67, (bits >> 16) as u16);

    let mut config = BridgeConfig::for_host("fake");
    config.meters.count = 1;
    config.batteries.count = 1;

    let mut poller = fake_poller(config.clone(), &device);
    let sample = poller.run_cycle().await.unwrap();
    assert_eq!(sample.get("M1_AC_Power"), Some(&FieldValue::Number(-120.0)));
    assert_eq!(sample.get("M1_AC_Power_B"), Some(&FieldValue::Number(30.0)));
    assert_eq!(
        sample.get("B1_State_of_Energy"),
        Some(&FieldValue::Number(87.5))
    );

    config.legacy_support = true;
    let mut legacy = fake_poller(config, &device);
    let sample = legacy.run_cycle().await.unwrap();
    assert_eq!(sample.get("M_AC_Power"), Some(&FieldValue::Number(-120.0)));
    assert!(sample.get("M1_AC_Power").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_run_until_shutdown() {
    let device = FakeDevice::producing_inverter();
    let recording = Arc::new(RecordingSink::default());
    let mut config = BridgeConfig::for_host("fake");
    config.poll.interval_secs = 5;

    let poller = fake_poller(config, &device).with_sink(recording.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(poller.run(shutdown_rx));

    // First tick fires immediately, then every 5 s
    tokio::time::sleep(Duration::from_millis(11_000)).await;
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    assert_eq!(recording.samples.lock().unwrap().len(), 3);
}
