//! Stream lifecycle control: start, try again, resume, pause and cancel

use super::{ArchiveStream, Phase, RunHandle, StreamInner};
use crate::error::{Error, Result};
use crate::record::Record;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

impl<T: Record> StreamInner<T> {
    pub(crate) fn invalid_state(&self, operation: &str, phase: Phase) -> Error {
        Error::InvalidState {
            stream: self.name.clone(),
            operation: operation.to_string(),
            current_state: phase.to_string(),
        }
    }

    /// Schedule a new run of the fetch loop
    ///
    /// The new run waits for the previous one to exit before issuing its first
    /// request, so a stream never has two attempts in flight.
    pub(crate) fn spawn_run(self: &Arc<Self>) {
        let mut slot = self.lock_run();
        let previous = slot.take();
        let token = CancellationToken::new();

        let inner = Arc::clone(self);
        let run_token = token.clone();
        let task = tokio::spawn(async move {
            if let Some(previous) = previous {
                previous.token.cancel();
                previous.finished.await;
            }
            inner.run_loop(run_token).await;
        });

        *slot = Some(RunHandle {
            token,
            finished: task.map(|_| ()).boxed().shared(),
        });
    }

    /// Close and reopen the sink regardless of the flush interval
    ///
    /// A sink that is not open (stream finished or cancelled) has nothing to flush.
    pub(crate) async fn force_flush(&self) -> Result<()> {
        let mut slot = self.sink.lock().await;
        match slot.checkpoint(self.config.flush_interval, true).await {
            Ok(_) | Err(Error::SinkNotOpen) => Ok(()),
            Err(e) => {
                error!(stream = %self.name, error = %e, "Failed to flush sink");
                Err(e)
            }
        }
    }
}

impl<T: Record> ArchiveStream<T> {
    /// Start archiving from the start cursor into a freshly truncated sink
    ///
    /// # Errors
    /// Returns an error if the stream was already started or the sink cannot be opened.
    /// Fetch failures are never returned here; they drive the backoff policy instead.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        inner.transition(|s| {
            if s.started {
                return Err(inner.invalid_state("start", s.phase()));
            }
            s.started = true;
            s.running = true;
            Ok(())
        })?;

        info!(
            stream = %inner.name,
            source = %inner.source.describe(),
            cursor = inner.start_cursor,
            "Starting archive stream"
        );

        let opened = {
            let mut slot = inner.sink.lock().await;
            slot.sink.open_fresh().await
        };
        if let Err(e) = opened {
            error!(stream = %inner.name, error = %e, "Failed to open sink");
            inner.transition(|s| s.running = false);
            return Err(e);
        }

        inner.spawn_run();
        Ok(())
    }

    /// Revive a finished, cancelled or paused stream from its last cursor
    ///
    /// The sink is reopened in append mode so previously written records are kept.
    /// A stream that is still running is paused first.
    ///
    /// # Errors
    /// Returns an error if the sink cannot be closed or reopened
    pub async fn try_again(&self) -> Result<()> {
        if self.is_running() {
            self.pause().await?;
        }

        let inner = &self.inner;
        inner.transition(|s| {
            s.started = true;
            s.done = false;
            s.cancelled = false;
            s.running = true;
        });

        let opened = {
            let mut slot = inner.sink.lock().await;
            match slot.sink.close().await {
                Ok(()) => slot.sink.open_append().await,
                Err(e) => Err(e),
            }
        };
        match opened {
            Ok(len) => {
                info!(
                    stream = %inner.name,
                    cursor = self.cursor(),
                    existing_bytes = len,
                    "Trying again"
                );
            }
            Err(e) => {
                error!(stream = %inner.name, error = %e, "Failed to reopen sink");
                inner.transition(|s| s.running = false);
                return Err(e);
            }
        }

        inner.spawn_run();
        Ok(())
    }

    /// Resume a paused stream without touching the sink
    ///
    /// Does nothing if the stream is already running or done.
    ///
    /// # Errors
    /// Returns [`Error::InvalidState`] if the stream was never started or was cancelled
    pub fn resume(&self) -> Result<()> {
        let inner = &self.inner;
        let resumed = inner.transition(|s| match s.phase() {
            phase @ (Phase::Idle | Phase::Cancelled) => Err(inner.invalid_state("resume", phase)),
            Phase::Running | Phase::Backoff | Phase::Done => Ok(false),
            Phase::Paused => {
                s.running = true;
                Ok(true)
            }
        })?;

        if resumed {
            debug!(stream = %inner.name, cursor = self.cursor(), "Resuming");
            inner.spawn_run();
        }
        Ok(())
    }

    /// Stop the fetch loop and flush the sink
    ///
    /// `running` is cleared and the in-flight request is aborted before this method
    /// returns; the returned future resolves once the loop has exited and the sink has
    /// been flushed.
    ///
    /// # Errors
    /// The future fails only if the sink cannot be closed or reopened
    pub fn pause(&self) -> BoxFuture<'static, Result<()>> {
        let was_running = self
            .inner
            .transition(|s| std::mem::replace(&mut s.running, false));

        let run = self.inner.lock_run().clone();
        if let Some(run) = &run {
            run.token.cancel();
        }
        if was_running {
            info!(stream = %self.inner.name, cursor = self.cursor(), "Pausing");
        }

        let inner = Arc::clone(&self.inner);
        async move {
            if let Some(run) = run {
                run.finished.await;
            }
            inner.force_flush().await
        }
        .boxed()
    }

    /// Pause and permanently close the sink
    ///
    /// A cancelled stream rejects [`resume`](Self::resume); only
    /// [`try_again`](Self::try_again) reopens it.
    ///
    /// # Errors
    /// The future fails if flushing or closing the sink fails
    pub fn cancel(&self) -> BoxFuture<'static, Result<()>> {
        let paused = self.pause();
        self.inner.transition(|s| s.cancelled = true);

        let inner = Arc::clone(&self.inner);
        async move {
            let flushed = paused.await;
            let closed = inner.sink.lock().await.sink.close().await;
            info!(stream = %inner.name, "Cancelled");
            flushed.and(closed)
        }
        .boxed()
    }
}
