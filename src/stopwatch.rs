//! Accumulated running time

use std::time::{Duration, Instant};

/// Measures time spent between `start` and `stop` calls, across several spans
#[derive(Clone, Debug, Default)]
pub struct Stopwatch {
    accumulated: Duration,
    running_since: Option<Instant>,
}

impl Stopwatch {
    /// Create a stopped stopwatch with nothing accumulated
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a span; restarting a running stopwatch keeps the time measured so far
    pub fn start(&mut self) {
        self.stop();
        self.running_since = Some(Instant::now());
    }

    /// End the current span (no-op when stopped)
    pub fn stop(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += since.elapsed();
        }
    }

    /// Whether a span is in progress
    pub fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    /// Total measured time, including the span in progress
    pub fn elapsed(&self) -> Duration {
        match self.running_since {
            Some(since) => self.accumulated + since.elapsed(),
            None => self.accumulated,
        }
    }
}
