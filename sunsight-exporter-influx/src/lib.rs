//! InfluxDB push sink for SunSight samples.
//!
//! Each sample becomes one point in the configured measurement, with one
//! field per decoded register field. Writes are spawned onto the tokio
//! runtime so the poll loop never waits on the database.
//!
//! Works against InfluxDB 2.x (org + token) and 1.8+ through its 2.x
//! compatibility API (database as bucket, `user:password` as token).

pub mod config;
pub mod point;
pub mod sink;

pub use config::{ConfigError, InfluxConfig};
pub use point::{InfluxPoint, PointValue};
pub use sink::{InfluxSink, InfluxStats};
