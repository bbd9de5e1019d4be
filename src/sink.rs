//! Resumable byte sinks
//!
//! A [`Sink`] is opened either fresh (discarding previous content) or for appending at
//! its current end. Data written to it is only guaranteed durable once the sink is
//! closed, which is why the archive stream periodically closes and reopens it.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};

/// An append-capable persistent byte target
#[async_trait]
pub trait Sink: Send + Sync {
    /// Open for writing, discarding any existing content
    async fn open_fresh(&mut self) -> Result<()>;

    /// Open for writing positioned at the current end of data; returns that length
    async fn open_append(&mut self) -> Result<u64>;

    /// Write bytes at the current position
    ///
    /// Fails with [`Error::SinkNotOpen`] when the sink has not been opened.
    async fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Commit everything written and release the handle (no-op when not open)
    ///
    /// On failure the sink stays open with the uncommitted bytes still pending.
    async fn close(&mut self) -> Result<()>;

    /// Whether the sink currently holds an open handle
    fn is_open(&self) -> bool;

    /// Human readable location for diagnostics
    fn describe(&self) -> String {
        "sink".to_string()
    }
}

/// Sink backed by a file on disk
///
/// Writes go through a buffer; `close` flushes the buffer and syncs the file to disk.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    writer: Option<BufWriter<tokio::fs::File>>,
}

impl FileSink {
    /// Create a sink for `path`; nothing is touched until it is opened
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
        }
    }

    /// Path of the underlying file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open_with(&mut self, append: bool) -> Result<u64> {
        self.close().await?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(!append)
            .open(&self.path)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to open sink '{}': {}", self.path.display(), e),
                ))
            })?;

        let len = if append {
            let len = file.metadata().await?.len();
            file.seek(SeekFrom::Start(len)).await?;
            len
        } else {
            0
        };

        self.writer = Some(BufWriter::new(file));
        Ok(len)
    }
}

#[async_trait]
impl Sink for FileSink {
    async fn open_fresh(&mut self) -> Result<()> {
        self.open_with(false).await.map(|_| ())
    }

    async fn open_append(&mut self) -> Result<u64> {
        self.open_with(true).await
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(Error::SinkNotOpen)?;
        writer.write_all(bytes).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        // the handle is kept on failure so buffered bytes survive for the next attempt
        if let Some(writer) = self.writer.as_mut() {
            writer.flush().await?;
            writer.get_ref().sync_all().await?;
        }
        self.writer = None;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    committed: Vec<u8>,
    pending: Option<Vec<u8>>,
    fresh_opens: usize,
    append_opens: usize,
    closes: usize,
    failing_writes: usize,
    failing_closes: usize,
}

/// In-memory sink with commit-on-close semantics
///
/// Written bytes stay pending until `close`, just like a writable file handle that
/// swaps its content in when closed. Clones share the same buffer, so a test can keep
/// one clone for inspection while the stream owns another.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sink whose committed content is `bytes`
    pub fn with_contents(bytes: impl Into<Vec<u8>>) -> Self {
        let sink = Self::default();
        sink.lock().committed = bytes.into();
        sink
    }

    /// Committed (durable) content
    pub fn contents(&self) -> Vec<u8> {
        self.lock().committed.clone()
    }

    /// Committed content split into lines
    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.contents())
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Bytes written since the last open that are not yet committed
    pub fn pending_len(&self) -> usize {
        self.lock().pending.as_ref().map_or(0, Vec::len)
    }

    /// Number of `open_fresh` calls
    pub fn fresh_opens(&self) -> usize {
        self.lock().fresh_opens
    }

    /// Number of `open_append` calls
    pub fn append_opens(&self) -> usize {
        self.lock().append_opens
    }

    /// Number of closes that committed an open handle
    pub fn closes(&self) -> usize {
        self.lock().closes
    }

    /// Make the next `count` writes fail with an I/O error
    pub fn fail_next_writes(&self, count: usize) {
        self.lock().failing_writes = count;
    }

    /// Make the next `count` closes of an open handle fail, keeping the data pending
    pub fn fail_next_closes(&self, count: usize) {
        self.lock().failing_closes = count;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn open_fresh(&mut self) -> Result<()> {
        let mut state = self.lock();
        state.fresh_opens += 1;
        state.pending = Some(Vec::new());
        Ok(())
    }

    async fn open_append(&mut self) -> Result<u64> {
        let mut state = self.lock();
        state.append_opens += 1;
        let existing = state.committed.clone();
        let len = existing.len() as u64;
        state.pending = Some(existing);
        Ok(len)
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let mut state = self.lock();
        if state.pending.is_none() {
            return Err(Error::SinkNotOpen);
        }
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(Error::Io(std::io::Error::other("simulated write failure")));
        }
        if let Some(pending) = state.pending.as_mut() {
            pending.extend_from_slice(bytes);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.lock();
        if state.pending.is_some() && state.failing_closes > 0 {
            state.failing_closes -= 1;
            return Err(Error::Io(std::io::Error::other("simulated close failure")));
        }
        if let Some(pending) = state.pending.take() {
            state.committed = pending;
            state.closes += 1;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.lock().pending.is_some()
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn memory_sink_commits_only_on_close() {
        let handle = MemorySink::new();
        let mut sink = handle.clone();

        sink.open_fresh().await.unwrap();
        sink.write(b"one\n").await.unwrap();
        assert!(handle.contents().is_empty(), "nothing durable before close");
        assert_eq!(handle.pending_len(), 4);

        sink.close().await.unwrap();
        assert_eq!(handle.contents(), b"one\n");
        assert!(!sink.is_open());
    }

    #[tokio::test]
    async fn memory_sink_append_keeps_existing_data() {
        let handle = MemorySink::with_contents("old\n");
        let mut sink = handle.clone();

        assert_eq!(sink.open_append().await.unwrap(), 4);
        sink.write(b"new\n").await.unwrap();
        sink.close().await.unwrap();

        assert_eq!(handle.lines(), vec!["old", "new"]);
        assert_eq!(handle.append_opens(), 1);
        assert_eq!(handle.closes(), 1);
    }

    #[tokio::test]
    async fn memory_sink_fresh_open_discards_on_close() {
        let handle = MemorySink::with_contents("old\n");
        let mut sink = handle.clone();
        sink.open_fresh().await.unwrap();
        sink.close().await.unwrap();
        assert!(handle.contents().is_empty());
    }

    #[tokio::test]
    async fn write_without_open_is_rejected() {
        let mut sink = MemorySink::new();
        assert!(matches!(sink.write(b"x").await, Err(Error::SinkNotOpen)));

        let dir = tempdir().unwrap();
        let mut file = FileSink::new(dir.path().join("out.ndjson"));
        assert!(matches!(file.write(b"x").await, Err(Error::SinkNotOpen)));
    }

    #[tokio::test]
    async fn memory_sink_simulated_write_failures() {
        let handle = MemorySink::new();
        let mut sink = handle.clone();
        sink.open_fresh().await.unwrap();
        handle.fail_next_writes(1);
        assert!(matches!(sink.write(b"a").await, Err(Error::Io(_))));
        sink.write(b"b").await.unwrap();
        sink.close().await.unwrap();
        assert_eq!(handle.contents(), b"b");
    }

    #[tokio::test]
    async fn memory_sink_failed_close_keeps_pending_data() {
        let handle = MemorySink::new();
        let mut sink = handle.clone();
        sink.open_fresh().await.unwrap();
        sink.write(b"a\n").await.unwrap();

        handle.fail_next_closes(1);
        assert!(matches!(sink.close().await, Err(Error::Io(_))));
        assert!(sink.is_open());
        assert!(handle.contents().is_empty());
        assert_eq!(handle.closes(), 0);

        sink.close().await.unwrap();
        assert_eq!(handle.contents(), b"a\n");
    }

    #[tokio::test]
    async fn close_twice_is_noop() {
        let handle = MemorySink::new();
        let mut sink = handle.clone();
        sink.open_fresh().await.unwrap();
        sink.close().await.unwrap();
        sink.close().await.unwrap();
        assert_eq!(handle.closes(), 1);
    }

    #[tokio::test]
    async fn file_sink_fresh_then_append() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("posts.ndjson");
        let mut sink = FileSink::new(&path);

        sink.open_fresh().await.unwrap();
        sink.write(b"{\"id\":1}\n").await.unwrap();
        sink.close().await.unwrap();

        let len = sink.open_append().await.unwrap();
        assert_eq!(len, 9);
        sink.write(b"{\"id\":2}\n").await.unwrap();
        sink.close().await.unwrap();

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(text, "{\"id\":1}\n{\"id\":2}\n");
    }

    #[tokio::test]
    async fn file_sink_fresh_open_truncates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("posts.ndjson");
        tokio::fs::write(&path, b"stale data\n").await.unwrap();

        let mut sink = FileSink::new(&path);
        sink.open_fresh().await.unwrap();
        sink.write(b"fresh\n").await.unwrap();
        sink.close().await.unwrap();

        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "fresh\n");
    }

    #[tokio::test]
    async fn file_sink_append_creates_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("new.ndjson");
        let mut sink = FileSink::new(&path);
        assert_eq!(sink.open_append().await.unwrap(), 0);
        assert!(sink.is_open());
        sink.close().await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn file_sink_open_in_missing_directory_fails() {
        let dir = tempdir().unwrap();
        let mut sink = FileSink::new(dir.path().join("missing").join("out.ndjson"));
        let err = sink.open_fresh().await.unwrap_err();
        assert!(err.to_string().contains("Failed to open sink"));
    }
}
