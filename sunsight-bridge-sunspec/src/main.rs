//! SunSpec bridge for SolarEdge inverters.
//!
//! Polls the inverter over Modbus TCP and publishes every sample to
//! InfluxDB and a Prometheus scrape endpoint.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use sunsight_bridge_sunspec::config::BridgeConfig;
use sunsight_bridge_sunspec::poller::Poller;
use sunsight_exporter_influx::InfluxSink;
use sunsight_exporter_prometheus::{HttpServer, MetricRegistry, ModbusMetrics};
use tokio::sync::watch;
use tracing::{error, info, warn};

/// SunSpec Modbus TCP bridge for SolarEdge inverters.
#[derive(Parser, Debug)]
#[command(name = "sunsight-bridge-sunspec")]
#[command(about = "Polls a SolarEdge inverter and publishes to InfluxDB and Prometheus")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format)
    #[arg(short, long, env = "SUNSIGHT_CONFIG")]
    config: Option<PathBuf>,

    /// Inverter host (IP or hostname)
    #[arg(long, env = "SUNSIGHT_INVERTER_HOST")]
    host: Option<String>,

    /// Inverter Modbus TCP port
    #[arg(long, env = "SUNSIGHT_INVERTER_PORT")]
    port: Option<u16>,

    /// Inverter Modbus unit ID
    #[arg(long, env = "SUNSIGHT_UNIT_ID")]
    unit_id: Option<u8>,

    /// Number of chained power meters (0-3)
    #[arg(long, env = "SUNSIGHT_METERS")]
    meters: Option<u8>,

    /// Number of chained batteries (0-2)
    #[arg(long, env = "SUNSIGHT_BATTERIES")]
    batteries: Option<u8>,

    /// Poll interval in seconds
    #[arg(long, env = "SUNSIGHT_INTERVAL")]
    interval: Option<u64>,

    /// Prometheus listen address
    #[arg(long, env = "SUNSIGHT_LISTEN")]
    listen: Option<String>,

    /// InfluxDB URL
    #[arg(long, env = "SUNSIGHT_INFLUX_URL")]
    influx_url: Option<String>,

    /// Publish meter 1 as `M_` instead of `M1_`
    #[arg(long, env = "SUNSIGHT_LEGACY_SUPPORT")]
    legacy_support: bool,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(long, env = "SUNSIGHT_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Args {
    /// Apply command line overrides on top of the file configuration.
    fn apply(&self, config: &mut BridgeConfig) {
        if let Some(host) = &self.host {
            config.inverter.host = host.clone();
        }
        if let Some(port) = self.port {
            config.inverter.port = port;
        }
        if let Some(unit_id) = self.unit_id {
            config.inverter.unit_id = unit_id;
        }
        if let Some(meters) = self.meters {
            config.meters.count = meters;
        }
        if let Some(batteries) = self.batteries {
            config.batteries.count = batteries;
        }
        if let Some(interval) = self.interval {
            config.poll.interval_secs = interval;
        }
        if let Some(listen) = &self.listen {
            config.prometheus.listen = listen.clone();
        }
        if let Some(url) = &self.influx_url {
            config.influx.url = url.clone();
        }
        if self.legacy_support {
            config.legacy_support = true;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }

    fn load_config(&self) -> Result<BridgeConfig> {
        let mut config = match &self.config {
            Some(path) => BridgeConfig::load_from_file(path)
                .with_context(|| format!("Failed to load config from {:?}", path))?,
            None => BridgeConfig::for_host(self.host.clone().unwrap_or_default()),
        };

        self.apply(&mut config);
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

async fn wait_for_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        warn!(error = %e, "Cannot listen for SIGTERM");
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.load_config()?;

    sunsight_common::init_tracing(&config.logging)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    info!("Starting sunsight-bridge-sunspec {}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let health = Arc::new(ModbusMetrics::new());
    let mut poller = Poller::from_config(config.clone()).with_observer(health.clone());
    let mut tasks = Vec::new();

    let influx = if config.influx.enabled {
        let sink = Arc::new(InfluxSink::new(config.influx.clone()));
        poller = poller.with_sink(sink.clone());
        info!(
            url = %config.influx.url,
            database = %config.influx.database,
            "InfluxDB sink enabled"
        );
        Some(sink)
    } else {
        None
    };

    let registry = if config.prometheus.enabled {
        let registry =
            Arc::new(MetricRegistry::new(&config.prometheus).with_health(health.clone()));
        let server = HttpServer::new(
            registry.clone(),
            config.prometheus.listen_addr()?,
            config.prometheus.path.clone(),
        );
        let listener = server.bind().await?;

        let http_shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = server.serve(listener, http_shutdown).await {
                error!("HTTP server error: {}", e);
            }
        }));
        tasks.push(tokio::spawn(registry.clone().run_cleanup(
            config.prometheus.aggregation.cleanup_interval(),
            shutdown_rx.clone(),
        )));

        poller = poller.with_sink(registry.clone());
        Some(registry)
    } else {
        None
    };

    if influx.is_none() && registry.is_none() {
        warn!("No sink enabled, samples are only logged");
    }

    tasks.push(tokio::spawn(poller.run(shutdown_rx.clone())));

    wait_for_signal().await;
    shutdown_tx.send(true)?;

    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        for task in tasks {
            let _ = task.await;
        }
        if let Some(sink) = &influx {
            sink.drain().await;
        }
    })
    .await;

    if let Some(sink) = &influx {
        let stats = sink.stats();
        info!(
            writes_ok = stats.writes_ok,
            writes_failed = stats.writes_failed,
            dropped = stats.dropped,
            "InfluxDB statistics"
        );
    }
    if let Some(registry) = &registry {
        let stats = registry.stats();
        info!(
            samples_received = stats.samples_received,
            fields_exported = stats.fields_exported,
            fields_filtered = stats.fields_filtered,
            "Prometheus statistics"
        );
    }

    info!("Bridge stopped");
    Ok(())
}
