//! Inverter polling and sample dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use sunsight_common::{
    DeviceIdentity, NoopObserver, PollObserver, Reading, Sample, SampleSink, Source,
};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::client::{ConnectionError, Connector, DeviceClient, ReadError, TcpConnector};
use crate::config::{BridgeConfig, WiringSelection};
use crate::decoder::decode_block;
use crate::registers::{
    DID_OFFSET, RegisterBlock, Wiring, battery_block, battery_identity_block, inverter_block,
    inverter_identity_block, meter_block, meter_identity_block,
};

/// Error type for a poll cycle.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("Connection failed: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Read of {section} failed: {source}")]
    Read { section: String, source: ReadError },
}

/// Poll loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Waiting for the next tick.
    Idle,
    /// A fetch, decode and publish cycle is in progress.
    Polling,
}

/// Polls the inverter and its chained devices, one cycle per tick.
pub struct Poller<C: Connector> {
    config: BridgeConfig,
    client: DeviceClient<C>,
    sinks: Vec<Arc<dyn SampleSink>>,
    observer: Arc<dyn PollObserver>,
    identities: HashMap<Source, DeviceIdentity>,
    state: PollState,
}

impl Poller<TcpConnector> {
    /// Create a poller talking Modbus TCP to the configured inverter.
    pub fn from_config(config: BridgeConfig) -> Self {
        let connector = TcpConnector::new(
            config.inverter.host.clone(),
            config.inverter.port,
            config.inverter.unit_id,
            config.inverter.timeout(),
        );
        Self::new(config, connector)
    }
}

impl<C: Connector> Poller<C> {
    pub fn new(config: BridgeConfig, connector: C) -> Self {
        let client = DeviceClient::new(connector, config.inverter.max_registers_per_read);
        Self {
            config,
            client,
            sinks: Vec::new(),
            observer: Arc::new(NoopObserver),
            identities: HashMap::new(),
            state: PollState::Idle,
        }
    }

    /// Add a sink; samples are handed to sinks in the order they were added.
    pub fn with_sink(mut self, sink: Arc<dyn SampleSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Report Modbus I/O events to an observer.
    pub fn with_observer(mut self, observer: Arc<dyn PollObserver>) -> Self {
        self.client = self.client.with_observer(observer.clone());
        self.observer = observer;
        self
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    /// Identity of a device, once read on the current connection.
    pub fn identity(&self, source: Source) -> Option<&DeviceIdentity> {
        self.identities.get(&source)
    }

    /// Run until the shutdown signal fires.
    ///
    /// Ticks are delayed rather than bursted when a cycle overruns, so two
    /// cycles never overlap.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.config.poll.interval();
        info!(
            host = %self.config.inverter.host,
            port = self.config.inverter.port,
            meters = self.config.meters.count,
            batteries = self.config.batteries.count,
            "Starting poller (interval: {}s)",
            interval.as_secs()
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(sample) = self.run_cycle().await {
                        debug!(fields = sample.field_count(), "Published sample");
                    }
                }
                _ = shutdown.changed() => {
                    info!("Poller shutting down");
                    break;
                }
            }
        }

        self.client.disconnect();
    }

    /// Run one full cycle: poll, then dispatch to every sink.
    ///
    /// Failures abort this cycle only and drop the connection, so the next
    /// cycle starts with a fresh connect.
    pub async fn run_cycle(&mut self) -> Option<Sample> {
        self.state = PollState::Polling;
        let started = Instant::now();

        let sample = match self.poll_once().await {
            Ok(sample) => {
                self.dispatch(&sample);
                Some(sample)
            }
            Err(e) => {
                error!(error = %e, "Poll cycle failed");
                self.client.disconnect();
                None
            }
        };

        self.observer.on_cycle(sample.is_some(), started.elapsed());
        self.state = PollState::Idle;
        sample
    }

    /// Hand a sample to every sink. A failing sink does not stop the others.
    ///
    /// Returns the number of sinks that accepted the sample.
    pub fn dispatch(&self, sample: &Sample) -> usize {
        let mut accepted = 0;
        for sink in &self.sinks {
            match sink.publish(sample) {
                Ok(()) => accepted += 1,
                Err(e) => warn!(sink = sink.name(), error = %e, "Sink rejected sample"),
            }
        }
        accepted
    }

    /// Read and decode every configured device into one sample.
    pub async fn poll_once(&mut self) -> Result<Sample, PollError> {
        let timestamp = chrono::Utc::now().timestamp_millis();

        if self.client.acquire().await? {
            self.identities.clear();
            self.read_identities().await?;
        }

        let mut readings = Vec::new();

        let unit_id = self.config.inverter.unit_id;
        let selection = self.config.inverter.model;
        readings.push(
            self.read_device(Source::Inverter, inverter_block(), unit_id, selection)
                .await?,
        );

        let unit_id = self.config.meter_unit_id();
        let selection = self.config.meters.model;
        for n in 1..=self.config.meters.count {
            readings.push(
                self.read_device(Source::Meter(n), meter_block(n), unit_id, selection)
                    .await?,
            );
        }

        let unit_id = self.config.battery_unit_id();
        for n in 1..=self.config.batteries.count {
            readings.push(
                self.read_device(
                    Source::Battery(n),
                    battery_block(n),
                    unit_id,
                    WiringSelection::Auto,
                )
                .await?,
            );
        }

        Ok(Sample::new(timestamp, self.config.naming(), readings))
    }

    async fn read_words(
        &mut self,
        block: &RegisterBlock,
        unit_id: u8,
    ) -> Result<Vec<u16>, PollError> {
        self.client
            .read(&block.section, unit_id, block.start, block.count)
            .await
            .map(|raw| raw.words)
            .map_err(|source| PollError::Read {
                section: block.section.clone(),
                source,
            })
    }

    async fn read_device(
        &mut self,
        source: Source,
        block: RegisterBlock,
        unit_id: u8,
        selection: WiringSelection,
    ) -> Result<Reading, PollError> {
        let words = self.read_words(&block, unit_id).await?;
        let wiring = match source {
            Source::Battery(_) => None,
            _ => resolve_wiring(selection, &words, &block.section),
        };

        let decoded = decode_block(&block, &words, wiring);
        for e in &decoded.errors {
            warn!(
                section = %block.section,
                field = e.field,
                address = e.address,
                raw = ?e.raw,
                error = %e.error,
                "Failed to decode field"
            );
        }

        Ok(Reading::new(source)
            .with_identity(self.identities.get(&source).cloned())
            .with_fields(decoded.into_fields()))
    }

    async fn read_identities(&mut self) -> Result<(), PollError> {
        let mut blocks = vec![(
            Source::Inverter,
            inverter_identity_block(),
            self.config.inverter.unit_id,
        )];
        for n in 1..=self.config.meters.count {
            blocks.push((
                Source::Meter(n),
                meter_identity_block(n),
                self.config.meter_unit_id(),
            ));
        }
        for n in 1..=self.config.batteries.count {
            blocks.push((
                Source::Battery(n),
                battery_identity_block(n),
                self.config.battery_unit_id(),
            ));
        }

        for (source, block, unit_id) in blocks {
            let words = self.read_words(&block, unit_id).await?;
            let decoded = decode_block(&block, &words, None);
            for e in &decoded.errors {
                warn!(section = %block.section, error = %e, "Invalid identity field");
            }

            let identity = decoded.to_identity();
            info!(
                %source,
                manufacturer = %identity.manufacturer,
                model = %identity.model,
                version = %identity.version,
                serial = %identity.serial_number,
                device_address = ?identity.device_address,
                "Device identified"
            );
            self.identities.insert(source, identity);
        }

        Ok(())
    }
}

/// Configured wiring, or the one announced by the block's SunSpec model ID.
fn resolve_wiring(selection: WiringSelection, words: &[u16], section: &str) -> Option<Wiring> {
    if let Some(wiring) = selection.fixed() {
        return Some(wiring);
    }

    let did = words.get(usize::from(DID_OFFSET)).copied()?;
    let wiring = Wiring::from_did(did);
    if wiring.is_none() {
        warn!(section, did, "Unknown SunSpec model, decoding every field");
    }
    wiring
}
