//! Non-blocking InfluxDB writer.

use std::sync::Arc;

use futures::stream;
use influxdb2::Client;
use influxdb2::api::write::TimestampPrecision;
use parking_lot::RwLock;
use sunsight_common::{Sample, SampleSink, SinkError};
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use crate::config::InfluxConfig;
use crate::point::InfluxPoint;

const SINK_NAME: &str = "influx";

/// Write statistics.
#[derive(Debug, Clone, Default)]
pub struct InfluxStats {
    /// Points accepted by the server.
    pub writes_ok: u64,
    /// Writes that failed after being spawned.
    pub writes_failed: u64,
    /// Samples rejected because too many writes were in flight.
    pub dropped: u64,
}

/// Pushes each sample as one point to InfluxDB.
///
/// `publish` only builds the point and spawns the HTTP write; it never waits
/// on the network.
pub struct InfluxSink {
    client: Client,
    config: InfluxConfig,
    permits: Arc<Semaphore>,
    stats: Arc<RwLock<InfluxStats>>,
}

impl InfluxSink {
    pub fn new(config: InfluxConfig) -> Self {
        let client = Client::new(&config.url, &config.org, config.auth_token());
        let permits = Arc::new(Semaphore::new(config.max_in_flight));

        debug!(
            url = %config.url,
            database = %config.database,
            measurement = %config.measurement,
            "Created InfluxDB sink"
        );

        Self {
            client,
            config,
            permits,
            stats: Arc::new(RwLock::new(InfluxStats::default())),
        }
    }

    pub fn stats(&self) -> InfluxStats {
        self.stats.read().clone()
    }

    /// Writes currently in flight.
    pub fn in_flight(&self) -> usize {
        self.config.max_in_flight - self.permits.available_permits()
    }

    /// Wait until every spawned write has finished.
    pub async fn drain(&self) {
        let all = u32::try_from(self.config.max_in_flight).unwrap_or(u32::MAX);
        if let Ok(permits) = self.permits.acquire_many(all).await {
            drop(permits);
        }
    }
}

impl SampleSink for InfluxSink {
    fn name(&self) -> &str {
        SINK_NAME
    }

    fn publish(&self, sample: &Sample) -> Result<(), SinkError> {
        let point = InfluxPoint::from_sample(sample, &self.config).to_data_point()?;

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SinkError::write(SINK_NAME, e.to_string()))?;

        let Ok(permit) = self.permits.clone().try_acquire_owned() else {
            self.stats.write().dropped += 1;
            return Err(SinkError::Busy {
                sink: SINK_NAME.to_string(),
                in_flight: self.in_flight(),
            });
        };

        let client = self.client.clone();
        let bucket = self.config.database.clone();
        let stats = self.stats.clone();
        let timestamp = sample.timestamp();

        runtime.spawn(async move {
            let result = client
                .write_with_precision(
                    &bucket,
                    stream::iter(vec![point]),
                    TimestampPrecision::Milliseconds,
                )
                .await;

            match result {
                Ok(()) => {
                    stats.write().writes_ok += 1;
                    debug!(bucket = %bucket, timestamp, "Wrote sample to InfluxDB");
                }
                Err(e) => {
                    stats.write().writes_failed += 1;
                    error!(bucket = %bucket, timestamp, error = %e, "InfluxDB write failed");
                }
            }

            drop(permit);
        });

        Ok(())
    }
}

impl Drop for InfluxSink {
    fn drop(&mut self) {
        let in_flight = self.in_flight();
        if in_flight > 0 {
            warn!(in_flight, "InfluxDB sink dropped with writes in flight");
        }
    }
}
