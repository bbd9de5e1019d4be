//! Shared fixtures for stream and combiner tests

use super::ArchiveStream;
use crate::config::{ArchiveConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::sink::MemorySink;
use crate::source::PageSource;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted response of [`MockPageSource`]
#[derive(Debug, Clone)]
pub(crate) enum Step {
    Page(Vec<Value>),
    Fail(String),
    /// Never resolves; only cancellation gets the stream past it
    Hang,
}

#[derive(Default)]
struct MockState {
    script: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<i64>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    hangs: AtomicUsize,
    latency: Mutex<Duration>,
}

/// Scripted page source; answers with an empty page once the script runs out
#[derive(Clone, Default)]
pub(crate) struct MockPageSource {
    state: Arc<MockState>,
}

struct InFlight<'a>(&'a MockState);

impl<'a> InFlight<'a> {
    fn enter(state: &'a MockState) -> Self {
        let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(state)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockPageSource {
    pub(crate) fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        let source = Self::default();
        source.state.script.lock().unwrap().extend(steps);
        source
    }

    pub(crate) fn push(&self, step: Step) {
        self.state.script.lock().unwrap().push_back(step);
    }

    /// Delay every response by `latency`
    pub(crate) fn with_latency(self, latency: Duration) -> Self {
        *self.state.latency.lock().unwrap() = latency;
        self
    }

    /// Cursors requested so far, in order
    pub(crate) fn requests(&self) -> Vec<i64> {
        self.state.requests.lock().unwrap().clone()
    }

    pub(crate) fn calls(&self) -> usize {
        self.state.requests.lock().unwrap().len()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    /// Number of requests that reached a [`Step::Hang`]
    pub(crate) fn hangs(&self) -> usize {
        self.state.hangs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageSource<Value> for MockPageSource {
    async fn fetch_page(&self, after: i64, _limit: usize) -> Result<Vec<Value>> {
        self.state.requests.lock().unwrap().push(after);
        let _in_flight = InFlight::enter(&self.state);

        let latency = *self.state.latency.lock().unwrap();
        if latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(latency).await;
        }

        let step = self.state.script.lock().unwrap().pop_front();
        match step {
            Some(Step::Page(records)) => Ok(records),
            Some(Step::Fail(message)) => Err(Error::Api(message)),
            Some(Step::Hang) => {
                self.state.hangs.fetch_add(1, Ordering::SeqCst);
                std::future::pending().await
            }
            None => Ok(Vec::new()),
        }
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

/// A record with an id and a creation time in epoch seconds
pub(crate) fn rec(id: &str, created_utc: i64) -> Value {
    json!({ "id": id, "created_utc": created_utc })
}

pub(crate) fn page(records: &[(&str, i64)]) -> Step {
    Step::Page(records.iter().map(|(id, ts)| rec(id, *ts)).collect())
}

/// Millisecond delays so tests run the full policy quickly
pub(crate) fn fast_config() -> ArchiveConfig {
    ArchiveConfig {
        inter_page_delay: Duration::from_millis(1),
        retry: RetryConfig {
            backoff_step: Duration::from_millis(1),
            ..RetryConfig::default()
        },
        ..ArchiveConfig::default()
    }
}

pub(crate) fn stream(
    name: &str,
    source: &MockPageSource,
    sink: &MemorySink,
    config: ArchiveConfig,
) -> ArchiveStream<Value> {
    ArchiveStream::new(name, source.clone(), 0, sink.clone(), config).unwrap()
}

/// Ids of the committed lines of `sink`
pub(crate) fn committed_ids(sink: &MemorySink) -> Vec<String> {
    sink.lines()
        .iter()
        .map(|line| {
            let value: Value = serde_json::from_str(line).unwrap();
            value["id"].as_str().unwrap().to_string()
        })
        .collect()
}

/// Count state-change notifications of `stream`
pub(crate) fn count_state_changes(stream: &ArchiveStream<Value>) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&count);
    stream.on_state_change().add_listener(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    count
}

/// Poll `condition` until it holds or `timeout` elapses
pub(crate) async fn wait_until(condition: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

pub(crate) const WAIT: Duration = Duration::from_secs(5);
