//! Prometheus pull endpoint for SunSight samples.
//!
//! The poll loop publishes each [`Sample`](sunsight_common::Sample) into a
//! [`MetricRegistry`]; the HTTP server renders the latest one on every scrape.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │   Poll loop     │────>│ MetricRegistry  │────>│   HTTP Server   │
//! │   (Sample)      │     │ (snapshot swap) │     │   (/metrics)    │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//!         │                        ^
//!         └──── ModbusMetrics ─────┘
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod config;
pub mod health;
pub mod http;
pub mod mapping;
pub mod registry;

pub use config::ExporterConfig;
pub use health::ModbusMetrics;
pub use http::HttpServer;
pub use registry::{MetricRegistry, SharedRegistry};
