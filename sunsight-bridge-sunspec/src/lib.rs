//! SunSpec bridge for SolarEdge inverters.
//!
//! Polls a SolarEdge inverter over Modbus TCP, together with up to three
//! power meters and two StorEdge batteries chained behind it, decodes the
//! SunSpec register blocks and hands each complete [`Sample`] to a set of
//! sinks (InfluxDB push, Prometheus pull).
//!
//! # Register map
//!
//! ```text
//! 40004  inverter identity   (65 regs)
//! 40069  inverter model 1xx  (50 regs)
//! 40123  meter 1 identity    (65 regs)   +174 per meter
//! 40188  meter 1 model 2xx   (105 regs)  +174 per meter
//! 57600  battery 1 identity  (76 regs)   +256 per battery
//! 57666  battery 1 data      (72 regs)   +256 per battery
//! ```
//!
//! [`Sample`]: sunsight_common::Sample

pub mod client;
pub mod config;
pub mod decoder;
pub mod poller;
pub mod registers;

pub use client::{
    ConnectionError, Connector, DeviceClient, ModbusTransport, RawRegisterBlock, ReadError,
    TcpConnector,
};
pub use config::{BridgeConfig, ConfigError};
pub use decoder::{DecodeError, DecodedBlock, decode_block, decode_field};
pub use poller::{PollError, PollState, Poller};
