//! Instrumentation hooks for the Modbus poll loop.

use std::time::Duration;

/// Result classification of a single Modbus request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Success,
    Timeout,
    Failure,
}

impl ReadOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadOutcome::Success => "success",
            ReadOutcome::Timeout => "timeout",
            ReadOutcome::Failure => "failure",
        }
    }
}

/// Receives I/O events from the poll loop.
///
/// Implementations must be cheap; they are called inline on the poll task.
pub trait PollObserver: Send + Sync {
    /// One physical read request finished. `section` names the register
    /// block being read (`inverter`, `meter1`, ...).
    fn on_read(&self, section: &str, elapsed: Duration, outcome: ReadOutcome);

    /// A connection attempt finished.
    fn on_connect(&self, success: bool);

    /// A whole poll cycle finished.
    fn on_cycle(&self, success: bool, elapsed: Duration);
}

/// Observer that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl PollObserver for NoopObserver {
    fn on_read(&self, _section: &str, _elapsed: Duration, _outcome: ReadOutcome) {}

    fn on_connect(&self, _success: bool) {}

    fn on_cycle(&self, _success: bool, _elapsed: Duration) {}
}
