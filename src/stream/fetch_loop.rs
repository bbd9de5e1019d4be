//! The fetch loop: request a page, persist it, advance the cursor, repeat.

use super::{SinkSlot, StreamInner};
use crate::error::{Error, Result};
use crate::record::{Record, encode_page, next_cursor};
use crate::retry::{FailureOutcome, IsRetryable};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Result of one successful iteration
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PageOutcome {
    /// A page was written and the cursor moved to `cursor`
    Persisted { records: usize, cursor: i64 },
    /// The endpoint returned an empty page
    Exhausted,
    /// The run was cancelled while the request was in flight
    Aborted,
}

impl SinkSlot {
    /// Close and reopen the sink if the flush interval has elapsed (or `force` is set)
    ///
    /// Returns whether a flush happened. The first checkpoint after the stream was
    /// constructed always flushes.
    pub(crate) async fn checkpoint(&mut self, interval: Duration, force: bool) -> Result<bool> {
        if !self.sink.is_open() {
            return Err(Error::SinkNotOpen);
        }

        let now = Instant::now();
        let due = self
            .last_flush
            .is_none_or(|last| now.duration_since(last) >= interval);
        if !force && !due {
            return Ok(false);
        }

        self.sink.close().await?;
        let len = self.sink.open_append().await?;
        self.last_flush = Some(now);

        debug!(
            sink = %self.sink.describe(),
            bytes = len,
            forced = force,
            took_ms = now.elapsed().as_millis() as u64,
            "Flushed sink"
        );
        Ok(true)
    }
}

/// Sleep unless the run is cancelled first; returns false when cancelled
async fn sleep_or_cancel(token: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

impl<T: Record> StreamInner<T> {
    fn should_continue(&self, token: &CancellationToken) -> bool {
        if token.is_cancelled() {
            return false;
        }
        let state = self.lock_state();
        state.running && !state.done
    }

    /// Drive the stream until it is paused, cancelled, exhausted or gives up
    pub(crate) async fn run_loop(self: Arc<Self>, token: CancellationToken) {
        self.lock_stopwatch().start();
        debug!(stream = %self.name, cursor = self.lock_state().cursor, "Fetch loop started");

        while self.should_continue(&token) {
            match self.fetch_and_persist(&token).await {
                Ok(PageOutcome::Persisted { records, cursor }) => {
                    self.transition(|s| {
                        s.failures.record_success();
                        s.has_error = false;
                    });
                    debug!(stream = %self.name, records, cursor, "Persisted page");

                    if !sleep_or_cancel(&token, self.config.inter_page_delay).await {
                        break;
                    }
                }
                Ok(PageOutcome::Exhausted) => {
                    let (cursor, records_written) = {
                        let state = self.lock_state();
                        (state.cursor, state.records_written)
                    };
                    info!(
                        stream = %self.name,
                        cursor,
                        records_written,
                        "Upstream exhausted, archive complete"
                    );
                    self.close_sink().await;
                    self.transition(|s| {
                        s.failures.record_success();
                        s.has_error = false;
                        s.done = true;
                        s.running = false;
                    });
                    break;
                }
                Ok(PageOutcome::Aborted) => break,
                Err(e) if !e.is_retryable() => {
                    error!(stream = %self.name, error = %e, "Unrecoverable stream failure, stopping");
                    self.close_sink().await;
                    self.transition(|s| {
                        s.failures.record_success();
                        s.has_error = true;
                        s.done = true;
                        s.running = false;
                    });
                    break;
                }
                Err(e) => {
                    let (outcome, attempt) = self.transition(|s| {
                        s.has_error = true;
                        let attempt = s.failures.consecutive_failures() + 1;
                        (s.failures.record_failure(), attempt)
                    });

                    match outcome {
                        FailureOutcome::GiveUp => {
                            error!(
                                stream = %self.name,
                                error = %e,
                                attempts = attempt,
                                "Giving up after repeated failures"
                            );
                            self.close_sink().await;
                            self.transition(|s| {
                                s.done = true;
                                s.running = false;
                            });
                            break;
                        }
                        FailureOutcome::Retry(delay) => {
                            warn!(
                                stream = %self.name,
                                error = %e,
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                "Page attempt failed, backing off"
                            );
                            if !sleep_or_cancel(&token, delay).await {
                                break;
                            }
                        }
                    }
                }
            }
        }

        self.lock_stopwatch().stop();
        debug!(stream = %self.name, "Fetch loop exited");
    }

    /// One iteration: fetch the page after the cursor and persist it
    ///
    /// The cursor only moves once the page has been written and any due flush has
    /// committed it, so a failed write or close re-requests the same page.
    async fn fetch_and_persist(&self, token: &CancellationToken) -> Result<PageOutcome> {
        let sink_open = self.sink.lock().await.sink.is_open();
        if !sink_open {
            return Err(Error::SinkNotOpen);
        }

        let cursor = self.lock_state().cursor;
        let page = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(PageOutcome::Aborted),
            page = self.source.fetch_page(cursor, self.config.page_size) => page?,
        };

        let Some(last) = page.last() else {
            return Ok(PageOutcome::Exhausted);
        };
        let last_created = last
            .created_utc()
            .ok_or_else(|| Error::Api("Last record of page has no created_utc".to_string()))?;
        let next = next_cursor(cursor, last_created);

        self.on_new_data.notify(&page);

        let bytes = encode_page(&page)?;
        let mut slot = self.sink.lock().await;
        slot.sink.write(&bytes).await?;
        let flushed = slot.checkpoint(self.config.flush_interval, false).await;
        // A closed sink after a failed checkpoint means the close committed the page and
        // only the reopen failed. A failed close keeps the page pending, so it is fetched
        // again from the same cursor.
        if flushed.is_ok() || !slot.sink.is_open() {
            let mut state = self.lock_state();
            state.cursor = next;
            state.records_written += page.len() as u64;
        }
        flushed?;

        Ok(PageOutcome::Persisted {
            records: page.len(),
            cursor: next,
        })
    }

    async fn close_sink(&self) {
        let mut slot = self.sink.lock().await;
        if let Err(e) = slot.sink.close().await {
            error!(stream = %self.name, sink = %slot.sink.describe(), error = %e, "Failed to close sink");
        }
    }
}
