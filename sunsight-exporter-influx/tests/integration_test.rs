//! Integration tests for the InfluxDB sink against a local HTTP stub.

use std::time::Duration;

use sunsight_common::{
    DeviceIdentity, FieldNaming, OperatingStatus, Reading, Sample, SampleSink, Source,
};
use sunsight_exporter_influx::{InfluxConfig, InfluxSink};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn sample() -> Sample {
    let inverter = Reading::new(Source::Inverter)
        .with_identity(Some(DeviceIdentity {
            manufacturer: "SolarEdge".to_string(),
            serial_number: "7E0F2A11".to_string(),
            ..Default::default()
        }))
        .with_field("AC_Power", 3500.0)
        .with_field("Status", OperatingStatus::Producing);
    let meter = Reading::new(Source::Meter(1)).with_field("AC_Power", -120.0);
    Sample::new(1_700_000_000_000, FieldNaming::Numbered, vec![inverter, meter])
}

/// Accept one request, capture it and answer 204.
async fn serve_once(listener: TcpListener) -> String {
    let (mut socket, _) = listener.accept().await.unwrap();
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&buf);
        if text.contains("\r\n\r\n") && text.contains("1700000000000") {
            break;
        }
    }

    socket
        .write_all(b"HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    socket.shutdown().await.ok();

    String::from_utf8_lossy(&buf).into_owned()
}

#[tokio::test]
async fn test_write_reaches_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(serve_once(listener));

    let config: InfluxConfig = json5::from_str(&format!(
        r#"{{
            url: "http://{}",
            database: "solar",
            username: "grafana",
            password: "pw",
            tags: {{ site: "roof" }},
        }}"#,
        addr
    ))
    .unwrap();
    config.validate().unwrap();

    let sink = InfluxSink::new(config);
    sink.publish(&sample()).unwrap();

    let request = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), sink.drain())
        .await
        .unwrap();

    assert!(request.starts_with("POST /api/v2/write"));
    assert!(request.contains("bucket=solar"));
    assert!(request.contains("precision=ms"));
    assert!(request.contains("grafana:pw"));
    assert!(request.contains("SolarEdge,"));
    assert!(request.contains("site=roof"));
    assert!(request.contains("AC_Power=3500"));
    assert!(request.contains("M1_AC_Power=-120"));
    assert!(request.contains("Status=\"producing\""));
    assert_eq!(sink.stats().writes_ok, 1);
    assert_eq!(sink.stats().writes_failed, 0);
}

#[tokio::test]
async fn test_failed_write_is_counted() {
    // Nothing listens on the discard port
    let config = InfluxConfig {
        url: "http://127.0.0.1:9".to_string(),
        ..Default::default()
    };
    let sink = InfluxSink::new(config);

    sink.publish(&sample()).unwrap();
    tokio::time::timeout(Duration::from_secs(10), sink.drain())
        .await
        .unwrap();

    let stats = sink.stats();
    assert_eq!(stats.writes_ok, 0);
    assert_eq!(stats.writes_failed, 1);
    assert_eq!(sink.in_flight(), 0);
}

#[tokio::test]
async fn test_config_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("influx.json5");
    std::fs::write(&path, r#"{ database: "pv", measurement: "Roof" }"#).unwrap();

    let config: InfluxConfig = json5::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(config.database, "pv");
    assert_eq!(config.measurement, "Roof");
    assert!(config.validate().is_ok());
}
