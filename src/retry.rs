//! Failure classification and the linear backoff / give-up policy
//!
//! A stream never propagates fetch or persist failures to its caller. Instead every
//! failure is fed into a [`FailureTracker`], which decides whether to back off and try
//! again or to give up on the stream altogether.
//!
//! # Example
//!
//! ```
//! use shift_archiver::config::RetryConfig;
//! use shift_archiver::retry::{FailureOutcome, FailureTracker};
//! use std::time::Duration;
//!
//! let mut tracker = FailureTracker::new(RetryConfig::default());
//! assert_eq!(tracker.record_failure(), FailureOutcome::Retry(Duration::from_secs(1)));
//! assert_eq!(tracker.record_failure(), FailureOutcome::Retry(Duration::from_secs(2)));
//! tracker.record_success();
//! assert_eq!(tracker.consecutive_failures(), 0);
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network errors, error responses, I/O hiccups) should return `true`.
/// Contract violations (sink used outside its lifecycle, invalid configuration) should
/// return `false`; retrying them cannot succeed.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Anything the endpoint or the transport produces is worth another attempt
            Error::Network(_) | Error::Http { .. } | Error::Api(_) => true,
            // Malformed pages are usually truncated or proxied error bodies
            Error::Serialization(_) => true,
            // Disk hiccups while appending are retried like fetch failures
            Error::Io(_) => true,
            // The stream was driven outside its lifecycle
            Error::SinkNotOpen | Error::InvalidState { .. } => false,
            Error::Config { .. } => false,
            Error::Other(_) => true,
        }
    }
}

/// What the fetch loop should do after a failed attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Sleep for the given delay, then attempt the same page again
    Retry(Duration),
    /// Stop the stream and report it done
    GiveUp,
}

/// Counts consecutive failures and applies the give-up threshold
#[derive(Clone, Debug)]
pub struct FailureTracker {
    config: RetryConfig,
    consecutive: u32,
}

impl FailureTracker {
    /// Create a tracker with no recorded failures
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            consecutive: 0,
        }
    }

    /// Number of failures since the last success
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive
    }

    /// Forget the current failure episode
    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    /// Register one more failure and decide how to continue
    ///
    /// The threshold is checked against the cost of the failures already retried in
    /// this episode, so with the default cost of 60 the 12th failure gives up.
    /// Giving up resets the counter, so a revived stream starts a fresh episode.
    pub fn record_failure(&mut self) -> FailureOutcome {
        let retried = self.consecutive;
        self.consecutive = self.consecutive.saturating_add(1);

        if episode_cost(retried) > self.config.give_up_cost {
            self.consecutive = 0;
            return FailureOutcome::GiveUp;
        }

        FailureOutcome::Retry(self.config.backoff_step * self.consecutive)
    }
}

/// Cost accumulated by `failures` consecutive failures: `0.5 * failures²`
pub fn episode_cost(failures: u32) -> f64 {
    0.5 * f64::from(failures).powi(2)
}
