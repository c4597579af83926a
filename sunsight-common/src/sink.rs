//! Downstream consumers of decoded samples.

use thiserror::Error;

use crate::sample::Sample;

/// Errors raised by a sink while accepting a sample.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sample could not be translated into the sink's representation.
    #[error("{sink}: failed to encode sample: {message}")]
    Encode { sink: String, message: String },

    /// The write to the downstream system failed.
    #[error("{sink}: write failed: {message}")]
    Write { sink: String, message: String },

    /// Too many writes are still pending; the sample was dropped.
    #[error("{sink}: {in_flight} writes still in flight, sample dropped")]
    Busy { sink: String, in_flight: usize },
}

impl SinkError {
    /// Create an encoding error.
    pub fn encode(sink: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Encode {
            sink: sink.into(),
            message: message.into(),
        }
    }

    /// Create a write error.
    pub fn write(sink: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Write {
            sink: sink.into(),
            message: message.into(),
        }
    }
}

/// A downstream consumer of samples.
///
/// `publish` is called from the poll loop once per successful cycle and must
/// not block it: sinks that talk to the network hand the work off to the
/// runtime and report failures asynchronously.
pub trait SampleSink: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Accept a sample.
    fn publish(&self, sample: &Sample) -> Result<(), SinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = SinkError::write("influx", "connection refused");
        assert_eq!(err.to_string(), "influx: write failed: connection refused");

        let err = SinkError::Busy {
            sink: "influx".to_string(),
            in_flight: 4,
        };
        assert!(err.to_string().contains("4 writes still in flight"));
    }
}
