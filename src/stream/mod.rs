//! Archive stream: one paginated fetch-and-persist loop against one endpoint.
//!
//! The `ArchiveStream` type and its methods are organized by concern:
//! - [`control`] - Lifecycle control (start/try_again/resume/pause/cancel)
//! - [`fetch_loop`] - The fetch loop, failure policy and checkpoint flushing
//!
//! Observers subscribe to [`ArchiveStream::on_state_change`] and re-read the public
//! flags, or to [`ArchiveStream::on_new_data`] to receive every page before it is
//! persisted.

mod control;
mod fetch_loop;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

use crate::config::ArchiveConfig;
use crate::error::Result;
use crate::notifier::Notifier;
use crate::record::Record;
use crate::retry::FailureTracker;
use crate::sink::Sink;
use crate::source::{HttpPageSource, PageSource};
use crate::stopwatch::Stopwatch;
use futures::future::{BoxFuture, Shared};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Lifecycle phase of a stream, derived from its flags
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Constructed, never started
    Idle,
    /// Fetch loop scheduled and healthy
    Running,
    /// Fetch loop scheduled, recent attempts failing
    Backoff,
    /// Stopped by `pause`, can be resumed
    Paused,
    /// Stopped by `cancel`, sink closed; only `try_again` revives it
    Cancelled,
    /// Upstream exhausted or given up after repeated failures
    Done,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Point-in-time view of a stream, for display
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamStatus {
    /// Stream name
    pub name: String,
    /// Current lifecycle phase
    pub phase: Phase,
    /// Cursor the stream started from (ms)
    pub start_cursor: i64,
    /// Exclusive lower bound of the next request (ms)
    pub cursor: i64,
    /// Records persisted by this stream instance
    pub records_written: u64,
    /// Failures since the last successful page
    pub consecutive_failures: u32,
    /// Time spent running, excluding paused time (ms)
    pub run_time_ms: u64,
}

/// Mutable flags and counters, guarded by a plain mutex that is never held across awaits
#[derive(Debug)]
pub(crate) struct StreamState {
    pub(crate) started: bool,
    pub(crate) running: bool,
    pub(crate) done: bool,
    pub(crate) has_error: bool,
    pub(crate) cancelled: bool,
    pub(crate) cursor: i64,
    pub(crate) records_written: u64,
    pub(crate) failures: FailureTracker,
}

impl StreamState {
    /// The flags whose changes observers are notified about
    fn observed(&self) -> (bool, bool, bool) {
        (self.running, self.done, self.has_error)
    }

    pub(crate) fn phase(&self) -> Phase {
        if !self.started {
            Phase::Idle
        } else if self.done {
            Phase::Done
        } else if self.cancelled {
            Phase::Cancelled
        } else if self.running && self.has_error {
            Phase::Backoff
        } else if self.running {
            Phase::Running
        } else {
            Phase::Paused
        }
    }
}

/// The sink plus the time of its last checkpoint flush
pub(crate) struct SinkSlot {
    pub(crate) sink: Box<dyn Sink>,
    pub(crate) last_flush: Option<Instant>,
}

/// One scheduled execution of the fetch loop
#[derive(Clone)]
pub(crate) struct RunHandle {
    /// Cancelled by pause/cancel; observed at every suspension point
    pub(crate) token: CancellationToken,
    /// Resolves once the loop task has exited
    pub(crate) finished: Shared<BoxFuture<'static, ()>>,
}

pub(crate) struct StreamInner<T: Record> {
    pub(crate) name: String,
    pub(crate) source: Box<dyn PageSource<T>>,
    pub(crate) config: ArchiveConfig,
    pub(crate) start_cursor: i64,
    pub(crate) state: Mutex<StreamState>,
    pub(crate) sink: tokio::sync::Mutex<SinkSlot>,
    pub(crate) run: Mutex<Option<RunHandle>>,
    pub(crate) stopwatch: Mutex<Stopwatch>,
    pub(crate) on_new_data: Notifier<Vec<T>>,
    pub(crate) on_state_change: Notifier<()>,
}

impl<T: Record> StreamInner<T> {
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn lock_stopwatch(&self) -> MutexGuard<'_, Stopwatch> {
        self.stopwatch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn lock_run(&self) -> MutexGuard<'_, Option<RunHandle>> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mutate the state and notify observers if `running`, `done` or `has_error` flipped
    ///
    /// Listeners run after the state lock is released, so they may read the flags.
    pub(crate) fn transition<R>(&self, change: impl FnOnce(&mut StreamState) -> R) -> R {
        let (before, after, result) = {
            let mut state = self.lock_state();
            let before = state.observed();
            let result = change(&mut state);
            (before, state.observed(), result)
        };
        if before != after {
            tracing::debug!(
                stream = %self.name,
                running = after.0,
                done = after.1,
                has_error = after.2,
                "Stream state changed"
            );
            self.on_state_change.notify(&());
        }
        result
    }
}

/// A pausable, resumable archive of one paginated endpoint into one sink
///
/// Cloning is cheap; clones control the same stream. All lifecycle methods must be
/// called from within a tokio runtime since the fetch loop runs as a spawned task.
pub struct ArchiveStream<T: Record> {
    pub(crate) inner: Arc<StreamInner<T>>,
}

impl<T: Record> Clone for ArchiveStream<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Record> std::fmt::Debug for ArchiveStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveStream")
            .field("name", &self.inner.name)
            .field("source", &self.inner.source.describe())
            .field("phase", &self.phase())
            .field("cursor", &self.cursor())
            .finish()
    }
}

impl<T: Record> ArchiveStream<T> {
    /// Create a stream reading from `source`, starting after `start_cursor` (ms)
    ///
    /// The sink is not opened until [`start`](Self::start) or
    /// [`try_again`](Self::try_again).
    ///
    /// # Errors
    /// Returns a configuration error if `config` fails validation
    pub fn new(
        name: impl Into<String>,
        source: impl PageSource<T> + 'static,
        start_cursor: i64,
        sink: impl Sink + 'static,
        config: ArchiveConfig,
    ) -> Result<Self> {
        config.validate()?;

        let state = StreamState {
            started: false,
            running: false,
            done: false,
            has_error: false,
            cancelled: false,
            cursor: start_cursor,
            records_written: 0,
            failures: FailureTracker::new(config.retry.clone()),
        };

        Ok(Self {
            inner: Arc::new(StreamInner {
                name: name.into(),
                source: Box::new(source),
                config,
                start_cursor,
                state: Mutex::new(state),
                sink: tokio::sync::Mutex::new(SinkSlot {
                    sink: Box::new(sink),
                    last_flush: None,
                }),
                run: Mutex::new(None),
                stopwatch: Mutex::new(Stopwatch::new()),
                on_new_data: Notifier::new(),
                on_state_change: Notifier::new(),
            }),
        })
    }

    /// Create a stream reading from an HTTP endpoint
    ///
    /// # Errors
    /// Returns error if the endpoint URL is invalid or the config fails validation
    pub fn from_endpoint(
        name: impl Into<String>,
        endpoint: &str,
        start_cursor: i64,
        sink: impl Sink + 'static,
        config: ArchiveConfig,
    ) -> Result<Self> {
        let source = HttpPageSource::<T>::new(endpoint, &config)?;
        Self::new(name, source, start_cursor, sink, config)
    }

    /// Stream name used in logs and status snapshots
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Fires whenever `running`, `done` or `has_error` changes
    pub fn on_state_change(&self) -> &Notifier<()> {
        &self.inner.on_state_change
    }

    /// Fires with every non-empty page, before it is persisted
    pub fn on_new_data(&self) -> &Notifier<Vec<T>> {
        &self.inner.on_new_data
    }

    /// Whether the fetch loop is scheduled
    pub fn is_running(&self) -> bool {
        self.inner.lock_state().running
    }

    /// Whether the stream has finished (exhausted upstream or given up)
    pub fn is_done(&self) -> bool {
        self.inner.lock_state().done
    }

    /// Whether the most recent attempts are failing
    pub fn has_error(&self) -> bool {
        self.inner.lock_state().has_error
    }

    /// Exclusive lower bound of the next request (ms)
    pub fn cursor(&self) -> i64 {
        self.inner.lock_state().cursor
    }

    /// Cursor the stream was created with (ms)
    pub fn start_cursor(&self) -> i64 {
        self.inner.start_cursor
    }

    /// Failures since the last successful page
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock_state().failures.consecutive_failures()
    }

    /// Records persisted since the stream was created
    pub fn records_written(&self) -> u64 {
        self.inner.lock_state().records_written
    }

    /// Time spent running, excluding paused time
    pub fn run_time(&self) -> Duration {
        self.inner.lock_stopwatch().elapsed()
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> Phase {
        self.inner.lock_state().phase()
    }

    /// Snapshot of the stream for display
    pub fn status(&self) -> StreamStatus {
        let run_time_ms = self.run_time().as_millis() as u64;
        let state = self.inner.lock_state();
        StreamStatus {
            name: self.inner.name.clone(),
            phase: state.phase(),
            start_cursor: self.inner.start_cursor,
            cursor: state.cursor,
            records_written: state.records_written,
            consecutive_failures: state.failures.consecutive_failures(),
            run_time_ms,
        }
    }
}
