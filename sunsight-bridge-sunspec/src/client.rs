//! Modbus TCP device client.
//!
//! The client owns the single connection to the inverter. Meters and
//! batteries behind the inverter are reached over the same connection by
//! switching the unit identifier per request.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sunsight_common::{NoopObserver, PollObserver, ReadOutcome};
use thiserror::Error;
use tokio_modbus::client::{Context, Reader};
use tokio_modbus::prelude::*;
use tracing::{debug, info};

use crate::config::MODBUS_MAX_READ_REGISTERS;

/// Failure to establish a connection to the device.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Failed to resolve {host}: {message}")]
    Resolve { host: String, message: String },

    #[error("Connection to {addr} timed out after {timeout:?}")]
    Timeout { addr: String, timeout: Duration },

    #[error("Connection to {addr} failed: {message}")]
    Refused { addr: String, message: String },
}

/// Failure of a register read on an established connection.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("Not connected")]
    NotConnected,

    #[error("Modbus exception reading {address}: {message}")]
    Exception { address: u16, message: String },

    #[error("Transport error reading {address}: {message}")]
    Transport { address: u16, message: String },

    #[error("Read of {address} timed out after {timeout:?}")]
    Timeout { address: u16, timeout: Duration },

    #[error("Read of {address} returned {actual} registers, expected {expected}")]
    LengthMismatch {
        address: u16,
        expected: u16,
        actual: usize,
    },
}

impl ReadError {
    /// Classification used by I/O health metrics.
    pub fn outcome(&self) -> ReadOutcome {
        match self {
            ReadError::Timeout { .. } => ReadOutcome::Timeout,
            _ => ReadOutcome::Failure,
        }
    }
}

/// Contiguous registers returned by a read, tagged with their start address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRegisterBlock {
    pub start: u16,
    pub words: Vec<u16>,
}

impl RawRegisterBlock {
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// A connected session able to read holding registers.
pub trait ModbusTransport: Send {
    /// Issue one physical read request.
    fn read_holding_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        count: u16,
    ) -> impl Future<Output = Result<Vec<u16>, ReadError>> + Send;
}

/// Establishes transports to the device.
pub trait Connector: Send + Sync {
    type Transport: ModbusTransport;

    fn connect(&self) -> impl Future<Output = Result<Self::Transport, ConnectionError>> + Send;
}

/// Connector for Modbus TCP using `tokio-modbus`.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
    unit_id: u8,
    timeout: Duration,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, port: u16, unit_id: u8, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            unit_id,
            timeout,
        }
    }

    async fn resolve(&self) -> Result<SocketAddr, ConnectionError> {
        let resolve_err = |message: String| ConnectionError::Resolve {
            host: self.host.clone(),
            message,
        };

        let mut addrs = tokio::time::timeout(
            self.timeout,
            tokio::net::lookup_host((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| resolve_err("lookup timed out".to_string()))?
        .map_err(|e| resolve_err(e.to_string()))?;

        addrs
            .next()
            .ok_or_else(|| resolve_err("no addresses found".to_string()))
    }
}

impl Connector for TcpConnector {
    type Transport = TcpTransport;

    async fn connect(&self) -> Result<TcpTransport, ConnectionError> {
        let addr = self.resolve().await?;

        let ctx = tokio::time::timeout(self.timeout, tcp::connect_slave(addr, Slave(self.unit_id)))
            .await
            .map_err(|_| ConnectionError::Timeout {
                addr: addr.to_string(),
                timeout: self.timeout,
            })?
            .map_err(|e| ConnectionError::Refused {
                addr: addr.to_string(),
                message: e.to_string(),
            })?;

        info!(%addr, unit_id = self.unit_id, "Connected to Modbus device");

        Ok(TcpTransport {
            ctx,
            unit_id: self.unit_id,
            timeout: self.timeout,
        })
    }
}

/// Live Modbus TCP session.
pub struct TcpTransport {
    ctx: Context,
    unit_id: u8,
    timeout: Duration,
}

impl ModbusTransport for TcpTransport {
    async fn read_holding_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ReadError> {
        if unit_id != self.unit_id {
            self.ctx.set_slave(Slave(unit_id));
            self.unit_id = unit_id;
        }

        tokio::time::timeout(self.timeout, self.ctx.read_holding_registers(address, count))
            .await
            .map_err(|_| ReadError::Timeout {
                address,
                timeout: self.timeout,
            })?
            .map_err(|e| ReadError::Transport {
                address,
                message: e.to_string(),
            })?
            .map_err(|e| ReadError::Exception {
                address,
                message: format!("{:?}", e),
            })
    }
}

/// Owns the device connection and performs block reads on it.
pub struct DeviceClient<C: Connector> {
    connector: C,
    connection: Option<C::Transport>,
    max_registers_per_read: u16,
    observer: Arc<dyn PollObserver>,
}

impl<C: Connector> DeviceClient<C> {
    pub fn new(connector: C, max_registers_per_read: u16) -> Self {
        Self {
            connector,
            connection: None,
            max_registers_per_read: max_registers_per_read.clamp(1, MODBUS_MAX_READ_REGISTERS),
            observer: Arc::new(NoopObserver),
        }
    }

    /// Report connection and read events to an observer.
    pub fn with_observer(mut self, observer: Arc<dyn PollObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Make sure a connection is available.
    ///
    /// Returns `true` when a new connection was established, `false` when
    /// the existing one is reused.
    pub async fn acquire(&mut self) -> Result<bool, ConnectionError> {
        if self.connection.is_some() {
            return Ok(false);
        }

        match self.connector.connect().await {
            Ok(transport) => {
                self.observer.on_connect(true);
                self.connection = Some(transport);
                Ok(true)
            }
            Err(e) => {
                self.observer.on_connect(false);
                Err(e)
            }
        }
    }

    /// Drop the current connection; the next `acquire` reconnects.
    pub fn disconnect(&mut self) {
        if self.connection.take().is_some() {
            debug!("Dropped Modbus connection");
        }
    }

    /// Read `count` registers starting at `start`.
    ///
    /// Spans longer than the per-request limit are split into several
    /// physical reads and reassembled into one block.
    pub async fn read(
        &mut self,
        section: &str,
        unit_id: u8,
        start: u16,
        count: u16,
    ) -> Result<RawRegisterBlock, ReadError> {
        let transport = self.connection.as_mut().ok_or(ReadError::NotConnected)?;
        let mut words = Vec::with_capacity(usize::from(count));

        for (address, chunk) in split_request(start, count, self.max_registers_per_read) {
            let started = Instant::now();
            let result = transport
                .read_holding_registers(unit_id, address, chunk)
                .await
                .and_then(|chunk_words| {
                    if chunk_words.len() == usize::from(chunk) {
                        Ok(chunk_words)
                    } else {
                        Err(ReadError::LengthMismatch {
                            address,
                            expected: chunk,
                            actual: chunk_words.len(),
                        })
                    }
                });

            match result {
                Ok(chunk_words) => {
                    self.observer
                        .on_read(section, started.elapsed(), ReadOutcome::Success);
                    words.extend(chunk_words);
                }
                Err(e) => {
                    self.observer.on_read(section, started.elapsed(), e.outcome());
                    return Err(e);
                }
            }
        }

        Ok(RawRegisterBlock { start, words })
    }
}

/// Split a register span into `(address, count)` requests of at most `limit` registers.
fn split_request(start: u16, count: u16, limit: u16) -> Vec<(u16, u16)> {
    let limit = limit.max(1);
    let mut requests = Vec::new();
    let mut offset = 0u16;

    while offset < count {
        let chunk = limit.min(count - offset);
        requests.push((start.wrapping_add(offset), chunk));
        offset += chunk;
    }

    requests
}
