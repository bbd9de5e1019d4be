//! # shift-archiver
//!
//! Pausable, resumable archiver for cursor-paginated record APIs.
//!
//! ## Design Philosophy
//!
//! shift-archiver is designed to be:
//! - **Crash tolerant** - Records are appended as newline-delimited JSON and the sink is
//!   checkpointed periodically, so an interrupted archive keeps what it fetched
//! - **Resumable** - A finished or cancelled stream continues from its last cursor
//! - **Library-first** - No UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to state changes, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use shift_archiver::{ArchiveConfig, ArchiveStream, CombinedArchiveStream, FileSink};
//! use shift_archiver::record::{Comment, Post};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let posts = ArchiveStream::<Post>::from_endpoint(
//!         "posts",
//!         "https://api.example.com/reddit/submission/search?subreddit=rust",
//!         0,
//!         FileSink::new("rust_posts.ndjson"),
//!         ArchiveConfig::default(),
//!     )?;
//!     let comments = ArchiveStream::<Comment>::from_endpoint(
//!         "comments",
//!         "https://api.example.com/reddit/comment/search?subreddit=rust",
//!         0,
//!         FileSink::new("rust_comments.ndjson"),
//!         ArchiveConfig::default(),
//!     )?;
//!
//!     let archive = CombinedArchiveStream::new(Some(posts), Some(comments));
//!     archive.on_done_change().add_listener(|done| println!("all done: {done}"));
//!     archive.start().await?;
//!
//!     shift_archiver::run_until_done_or_signal(&archive).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Combined posts + comments archive
pub mod combined;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Synchronous listener lists
pub mod notifier;
/// Record types and cursor arithmetic
pub mod record;
/// Failure classification and give-up policy
pub mod retry;
/// Resumable byte sinks
pub mod sink;
/// Paginated record sources
pub mod source;
/// Accumulated running time
pub mod stopwatch;
/// Single-endpoint archive stream (decomposed into focused submodules)
pub mod stream;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use combined::CombinedArchiveStream;
pub use config::{ArchiveConfig, RetryConfig};
pub use error::{Error, Result};
pub use notifier::{ListenerId, Notifier};
pub use record::{Comment, Post, Record};
pub use retry::{FailureOutcome, FailureTracker, IsRetryable};
pub use sink::{FileSink, MemorySink, Sink};
pub use source::{HttpPageSource, PageSource};
pub use stream::{ArchiveStream, Phase, StreamStatus};

/// Wait until the archive is done, cancelling it if a termination signal arrives first.
///
/// The signals are SIGTERM (unix only) and Ctrl+C.
///
/// Returns immediately if the archive is already done. An archive without streams is
/// never done, so for it this only returns on a signal.
///
/// # Errors
/// Returns the first error reported while cancelling the streams
pub async fn run_until_done_or_signal<P: Record, C: Record>(
    archive: &CombinedArchiveStream<P, C>,
) -> Result<()> {
    let (done_tx, mut done_rx) = tokio::sync::watch::channel(false);
    let listener = archive.on_done_change().add_listener(move |done| {
        done_tx.send_replace(*done);
    });
    let already_done = archive.is_done();

    let result = tokio::select! {
        _ = async { already_done || done_rx.wait_for(|done| *done).await.is_ok() } => {
            tracing::info!("Archive complete");
            Ok(())
        }
        _ = wait_for_signal() => {
            tracing::info!("Cancelling archive");
            archive.cancel().await
        }
    };

    archive.on_done_change().remove_listener(listener);
    result
}

/// Resolves on SIGTERM or Ctrl+C; never resolves if neither can be listened for
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = terminate.recv() => tracing::info!("Terminate signal received"),
                    result = tokio::signal::ctrl_c() => interrupted(result).await,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Terminate signal unavailable, listening for Ctrl+C only");
                interrupted(tokio::signal::ctrl_c().await).await;
            }
        }
    }

    #[cfg(not(unix))]
    interrupted(tokio::signal::ctrl_c().await).await;
}

async fn interrupted(result: std::io::Result<()>) {
    match result {
        Ok(()) => tracing::info!("Interrupt received"),
        Err(e) => {
            tracing::error!(error = %e, "Cannot listen for Ctrl+C, archive runs until done");
            std::future::pending::<()>().await;
        }
    }
}
