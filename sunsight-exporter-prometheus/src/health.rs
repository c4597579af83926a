//! Modbus I/O health metrics.
//!
//! Counts read failures and timeouts per register section and records
//! request latency, so a flaky RS485/TCP link shows up in Prometheus
//! before the inverter data goes stale.

use std::time::Duration;

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use sunsight_common::{PollObserver, ReadOutcome};
use tracing::warn;

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
struct SectionLabels {
    section: String,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ResultLabels {
    result: String,
}

fn latency_histogram() -> Histogram {
    // 5 ms .. ~10 s
    Histogram::new(exponential_buckets(0.005, 2.0, 12))
}

fn result_label(success: bool) -> ResultLabels {
    ResultLabels {
        result: if success { "success" } else { "failure" }.to_string(),
    }
}

/// Prometheus instruments fed by the poll loop.
pub struct ModbusMetrics {
    registry: Registry,
    read_errors: Family<SectionLabels, Counter>,
    timeouts: Family<SectionLabels, Counter>,
    request_latency: Family<SectionLabels, Histogram>,
    connects: Family<ResultLabels, Counter>,
    cycles: Family<ResultLabels, Counter>,
    cycle_duration: Histogram,
}

impl ModbusMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let read_errors = Family::<SectionLabels, Counter>::default();
        registry.register(
            "modbus_read_errors",
            "Failed ReadHoldingRegisters requests",
            read_errors.clone(),
        );

        let timeouts = Family::<SectionLabels, Counter>::default();
        registry.register(
            "modbus_timeouts",
            "ReadHoldingRegisters requests that timed out",
            timeouts.clone(),
        );

        let request_latency: Family<SectionLabels, Histogram> =
            Family::new_with_constructor(latency_histogram);
        registry.register(
            "modbus_request_latency_seconds",
            "ReadHoldingRegisters latency",
            request_latency.clone(),
        );

        let connects = Family::<ResultLabels, Counter>::default();
        registry.register(
            "modbus_connect_attempts",
            "Connection attempts to the inverter",
            connects.clone(),
        );

        let cycles = Family::<ResultLabels, Counter>::default();
        registry.register("poll_cycles", "Completed poll cycles", cycles.clone());

        let cycle_duration = latency_histogram();
        registry.register(
            "poll_cycle_duration_seconds",
            "Duration of a full poll cycle",
            cycle_duration.clone(),
        );

        Self {
            registry,
            read_errors,
            timeouts,
            request_latency,
            connects,
            cycles,
            cycle_duration,
        }
    }

    /// Encode every instrument in OpenMetrics text, terminated by `# EOF`.
    pub fn encode(&self) -> String {
        let mut output = String::new();
        if let Err(e) = encode(&mut output, &self.registry) {
            warn!(error = %e, "Failed to encode Modbus health metrics");
            output.clear();
            output.push_str("# EOF\n");
        }
        output
    }
}

impl Default for ModbusMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PollObserver for ModbusMetrics {
    fn on_read(&self, section: &str, elapsed: Duration, outcome: ReadOutcome) {
        let labels = SectionLabels {
            section: section.to_string(),
        };
        self.request_latency
            .get_or_create(&labels)
            .observe(elapsed.as_secs_f64());

        match outcome {
            ReadOutcome::Success => {}
            ReadOutcome::Timeout => {
                self.timeouts.get_or_create(&labels).inc();
            }
            ReadOutcome::Failure => {
                self.read_errors.get_or_create(&labels).inc();
            }
        }
    }

    fn on_connect(&self, success: bool) {
        self.connects.get_or_create(&result_label(success)).inc();
    }

    fn on_cycle(&self, success: bool, elapsed: Duration) {
        self.cycles.get_or_create(&result_label(success)).inc();
        self.cycle_duration.observe(elapsed.as_secs_f64());
    }
}
