//! Mapping from sample fields to Prometheus names and types.

use sunsight_common::FieldValue;

/// Sanitize a metric name to be Prometheus-compatible.
///
/// Metric names must match `[a-zA-Z_:][a-zA-Z0-9_:]*`. Invalid characters
/// become underscores, runs of underscores collapse into one, and a leading
/// digit gets an underscore in front.
pub fn sanitize_metric_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len() + 1);

    if name.starts_with(|c: char| c.is_ascii_digit()) {
        result.push('_');
    }

    for c in name.chars() {
        let c = if c.is_ascii_alphanumeric() || c == ':' {
            c
        } else {
            '_'
        };
        if c == '_' && result.ends_with('_') {
            continue;
        }
        result.push(c);
    }

    let trimmed = result.trim_end_matches('_');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Sanitize a label name to be Prometheus-compatible.
///
/// Label names must match `[a-zA-Z_][a-zA-Z0-9_]*`; names starting with
/// `__` are reserved and get prefixed.
pub fn sanitize_label_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len());

    for (i, c) in name.chars().enumerate() {
        let valid = c.is_ascii_alphabetic() || c == '_' || (i > 0 && c.is_ascii_digit());
        if valid {
            result.push(c);
        } else if !result.ends_with('_') {
            result.push('_');
        }
    }

    let mut result = result.trim_end_matches('_').to_string();
    if result.is_empty() {
        return "label".to_string();
    }
    if result.starts_with("__") {
        result.insert(0, 'z');
    }
    result
}

/// Full metric name for a qualified field name (`M1_AC_Power`).
pub fn build_metric_name(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        sanitize_metric_name(field)
    } else {
        sanitize_metric_name(&format!("{}_{}", prefix, field))
    }
}

/// Prometheus metric type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrometheusType {
    Counter,
    Gauge,
    Info,
}

impl PrometheusType {
    /// Type used to expose a decoded field value.
    pub fn from_value(value: &FieldValue) -> Self {
        match value {
            FieldValue::Number(_) | FieldValue::Status(_) => PrometheusType::Gauge,
            FieldValue::Text(_) => PrometheusType::Info,
        }
    }

    /// The TYPE keyword in the exposition format.
    pub fn as_str(&self) -> &'static str {
        match self {
            PrometheusType::Counter => "counter",
            PrometheusType::Gauge => "gauge",
            PrometheusType::Info => "info",
        }
    }

    /// Sample name suffix mandated by OpenMetrics for this type.
    pub fn sample_suffix(&self) -> &'static str {
        match self {
            PrometheusType::Counter => "_total",
            PrometheusType::Gauge => "",
            PrometheusType::Info => "_info",
        }
    }
}
