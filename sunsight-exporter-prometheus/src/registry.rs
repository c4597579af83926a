//! Process-wide metric registry fed by poll cycle samples.
//!
//! Every sample is turned into a complete [`Snapshot`] off to the side and
//! then swapped in with a single pointer store. A scrape clones the current
//! `Arc<Snapshot>` and renders it without holding the lock, so it always sees
//! one whole sample and never blocks the poll loop for longer than the swap.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use sunsight_common::{DeviceIdentity, FieldValue, Sample, SampleField, SampleSink, SinkError};
use tracing::{debug, trace};

use crate::config::{ExporterConfig, FilterConfig};
use crate::health::ModbusMetrics;
use crate::mapping::{PrometheusType, build_metric_name, sanitize_label_name};

/// One exposed time series.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    /// Sorted label key-value pairs.
    pub labels: Vec<(String, String)>,
    pub value: f64,
}

/// A metric family: name, help, type and its series.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub help: String,
    pub metric_type: PrometheusType,
    pub series: Vec<Series>,
}

/// Everything exposed for one sample.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub families: Vec<MetricFamily>,
    /// Capture time of the sample (Unix ms).
    pub timestamp_ms: i64,
    /// When the snapshot was swapped in.
    pub updated: Instant,
}

impl Snapshot {
    pub fn series_count(&self) -> usize {
        self.families.iter().map(|f| f.series.len()).sum()
    }

    /// Look up a family by metric name.
    pub fn family(&self, name: &str) -> Option<&MetricFamily> {
        self.families.iter().find(|f| f.name == name)
    }

    pub fn is_stale(&self, timeout: Duration) -> bool {
        self.updated.elapsed() > timeout
    }
}

/// Filter for sample fields.
pub struct MetricFilter {
    include_sources: Vec<String>,
    exclude_sources: Vec<String>,
    include_metrics: Vec<glob::Pattern>,
    exclude_metrics: Vec<glob::Pattern>,
}

impl MetricFilter {
    /// Create a new filter from configuration. Invalid patterns are ignored.
    pub fn new(config: &FilterConfig) -> Self {
        let compile = |patterns: &[String]| -> Vec<glob::Pattern> {
            patterns
                .iter()
                .filter_map(|p| glob::Pattern::new(p).ok())
                .collect()
        };

        Self {
            include_sources: config.include_sources.clone(),
            exclude_sources: config.exclude_sources.clone(),
            include_metrics: compile(&config.include_metrics),
            exclude_metrics: compile(&config.exclude_metrics),
        }
    }

    /// Check if a sample field should be exposed.
    pub fn should_include(&self, field: &SampleField<'_>) -> bool {
        let source = field.source.label();

        if !self.include_sources.is_empty() && !self.include_sources.contains(&source) {
            return false;
        }
        if self.exclude_sources.contains(&source) {
            return false;
        }

        if !self.include_metrics.is_empty()
            && !self.include_metrics.iter().any(|p| p.matches(&field.name))
        {
            return false;
        }
        !self.exclude_metrics.iter().any(|p| p.matches(&field.name))
    }
}

impl Default for MetricFilter {
    fn default() -> Self {
        Self::new(&FilterConfig::default())
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    /// Samples received from the poll loop.
    pub samples_received: u64,
    /// Fields exposed across all samples.
    pub fields_exported: u64,
    /// Fields rejected by the filter.
    pub fields_filtered: u64,
    /// Snapshots dropped because no new sample arrived in time.
    pub stale_snapshots_removed: u64,
}

/// Latest-sample registry served by the HTTP endpoint.
pub struct MetricRegistry {
    snapshot: RwLock<Option<Arc<Snapshot>>>,
    prefix: String,
    default_labels: Vec<(String, String)>,
    stale_timeout: Duration,
    filter: MetricFilter,
    health: Option<Arc<ModbusMetrics>>,
    stats: RwLock<RegistryStats>,
}

/// Shareable registry handle.
pub type SharedRegistry = Arc<MetricRegistry>;

impl MetricRegistry {
    pub fn new(config: &ExporterConfig) -> Self {
        let default_labels = config
            .default_labels
            .iter()
            .map(|(k, v)| (sanitize_label_name(k), v.clone()))
            .collect();

        Self {
            snapshot: RwLock::new(None),
            prefix: config.prefix.clone(),
            default_labels,
            stale_timeout: config.aggregation.stale_timeout(),
            filter: MetricFilter::new(&config.filters),
            health: None,
            stats: RwLock::new(RegistryStats::default()),
        }
    }

    /// Append Modbus I/O health metrics to every scrape.
    pub fn with_health(mut self, health: Arc<ModbusMetrics>) -> Self {
        self.health = Some(health);
        self
    }

    /// Replace the exposed values with those of `sample`.
    pub fn update(&self, sample: &Sample) {
        let (snapshot, exported, filtered) = self.build_snapshot(sample);

        // Build first, then publish with a single pointer swap.
        *self.snapshot.write() = Some(Arc::new(snapshot));

        let mut stats = self.stats.write();
        stats.samples_received += 1;
        stats.fields_exported += exported;
        stats.fields_filtered += filtered;
    }

    /// The snapshot currently being served.
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.snapshot.read().clone()
    }

    /// Drop the snapshot if no sample arrived within the stale timeout.
    ///
    /// Returns `true` when a snapshot was removed.
    pub fn cleanup_stale(&self) -> bool {
        let mut current = self.snapshot.write();
        let stale = current
            .as_ref()
            .is_some_and(|s| s.is_stale(self.stale_timeout));

        if stale {
            *current = None;
            drop(current);
            debug!("Dropped stale sample snapshot");
            self.stats.write().stale_snapshots_removed += 1;
        }

        stale
    }

    /// Number of series in the current snapshot.
    pub fn series_count(&self) -> usize {
        self.snapshot().map(|s| s.series_count()).unwrap_or(0)
    }

    pub fn stats(&self) -> RegistryStats {
        self.stats.read().clone()
    }

    /// Run stale cleanup until the shutdown signal fires.
    pub async fn run_cleanup(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.cleanup_stale();
                }
                _ = shutdown.changed() => {
                    break;
                }
            }
        }
    }

    fn labels(&self, pairs: &[(&str, String)]) -> Vec<(String, String)> {
        let mut labels: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();

        // Default labels never override built-in ones
        for (k, v) in &self.default_labels {
            if !labels.iter().any(|(lk, _)| lk == k) {
                labels.push((k.clone(), v.clone()));
            }
        }

        labels.sort_by(|a, b| a.0.cmp(&b.0));
        labels
    }

    fn build_snapshot(&self, sample: &Sample) -> (Snapshot, u64, u64) {
        let mut families: Vec<MetricFamily> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let (mut exported, mut filtered) = (0u64, 0u64);

        for field in sample.fields() {
            if !self.filter.should_include(&field) {
                filtered += 1;
                trace!(field = %field.name, "Field filtered out");
                continue;
            }

            let source = field.source.label();
            let help = match sample
                .reading(field.source)
                .and_then(|r| r.identity())
            {
                Some(identity) => format!("{} - {}", field.name, identity.label()),
                None => field.name.clone(),
            };

            let (labels, value) = match field.value {
                FieldValue::Number(v) => (self.labels(&[("source", source)]), *v),
                FieldValue::Status(status) => (
                    self.labels(&[("source", source), ("state", status.to_string())]),
                    f64::from(status.code()),
                ),
                FieldValue::Text(text) => (
                    self.labels(&[("source", source), ("value", text.clone())]),
                    1.0,
                ),
            };

            let name = build_metric_name(&self.prefix, &field.name);
            let series = Series { labels, value };
            match index.get(&name) {
                Some(&i) => families[i].series.push(series),
                None => {
                    index.insert(name.clone(), families.len());
                    families.push(MetricFamily {
                        name,
                        help,
                        metric_type: PrometheusType::from_value(field.value),
                        series: vec![series],
                    });
                }
            }
            exported += 1;
        }

        let devices: Vec<Series> = sample
            .readings()
            .iter()
            .filter_map(|r| r.identity().map(|id| (r.source().label(), id)))
            .map(|(source, identity)| Series {
                labels: self.identity_labels(source, identity),
                value: 1.0,
            })
            .collect();

        if !devices.is_empty() {
            families.push(MetricFamily {
                name: build_metric_name(&self.prefix, "sunspec_device"),
                help: "SunSpec device identity".to_string(),
                metric_type: PrometheusType::Info,
                series: devices,
            });
        }

        let snapshot = Snapshot {
            families,
            timestamp_ms: sample.timestamp(),
            updated: Instant::now(),
        };
        (snapshot, exported, filtered)
    }

    fn identity_labels(&self, source: String, identity: &DeviceIdentity) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("source", source),
            ("manufacturer", identity.manufacturer.clone()),
            ("model", identity.model.clone()),
            ("version", identity.version.clone()),
            ("serial_number", identity.serial_number.clone()),
        ];
        if let Some(address) = identity.device_address {
            pairs.push(("device_address", address.to_string()));
        }
        self.labels(&pairs)
    }

    /// Render the current snapshot, registry statistics and health metrics
    /// in OpenMetrics text format.
    pub fn render(&self) -> String {
        let snapshot = self.snapshot();
        let mut output = String::with_capacity(
            snapshot.as_ref().map(|s| s.series_count() * 64).unwrap_or(0) + 512,
        );

        if let Some(snapshot) = &snapshot {
            for family in &snapshot.families {
                render_family(&mut output, family);
            }
        }

        let stats = self.stats();
        let series = snapshot.as_ref().map(|s| s.series_count()).unwrap_or(0);
        let exporter = [
            (
                "sunsight_exporter_series",
                PrometheusType::Gauge,
                "Series in the current snapshot",
                series as f64,
            ),
            (
                "sunsight_exporter_samples_received",
                PrometheusType::Counter,
                "Samples received from the poll loop",
                stats.samples_received as f64,
            ),
            (
                "sunsight_exporter_fields_filtered",
                PrometheusType::Counter,
                "Fields rejected by filters",
                stats.fields_filtered as f64,
            ),
            (
                "sunsight_exporter_stale_snapshots_removed",
                PrometheusType::Counter,
                "Snapshots expired without a new sample",
                stats.stale_snapshots_removed as f64,
            ),
        ];
        for (name, metric_type, help, value) in exporter {
            render_family(
                &mut output,
                &MetricFamily {
                    name: name.to_string(),
                    help: help.to_string(),
                    metric_type,
                    series: vec![Series {
                        labels: Vec::new(),
                        value,
                    }],
                },
            );
        }

        match &self.health {
            Some(health) => output.push_str(&health.encode()),
            None => output.push_str("# EOF\n"),
        }

        output
    }
}

impl SampleSink for MetricRegistry {
    fn name(&self) -> &str {
        "prometheus"
    }

    fn publish(&self, sample: &Sample) -> Result<(), SinkError> {
        self.update(sample);
        Ok(())
    }
}

fn render_family(output: &mut String, family: &MetricFamily) {
    writeln!(output, "# TYPE {} {}", family.name, family.metric_type.as_str()).ok();
    writeln!(output, "# HELP {} {}", family.name, escape_label_value(&family.help)).ok();

    let suffix = family.metric_type.sample_suffix();
    for series in &family.series {
        writeln!(
            output,
            "{}{}{} {}",
            family.name,
            suffix,
            format_labels(&series.labels),
            format_value(series.value)
        )
        .ok();
    }
}

/// Escape special characters in label values and HELP text.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Format a floating point value for the exposition format.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

/// Format labels as `{k="v",...}`.
fn format_labels(labels: &[(String, String)]) -> String {
    if labels.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}
