//! Composition root driving a posts stream and a comments stream as one unit
//!
//! Commands fan out to whichever children are present; the children's done flags are
//! folded into a single aggregate that is republished only when it actually changes.

use crate::error::Result;
use crate::notifier::Notifier;
use crate::record::Record;
use crate::stream::{ArchiveStream, StreamStatus};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tracing::info;

/// Aggregate completion over the present children
///
/// With both present it is the conjunction, with one present it mirrors that one, and
/// an empty combiner is never done.
pub fn aggregate_done(posts: Option<bool>, comments: Option<bool>) -> bool {
    match (posts, comments) {
        (Some(posts), Some(comments)) => posts && comments,
        (Some(done), None) | (None, Some(done)) => done,
        (None, None) => false,
    }
}

struct CombinedInner<P: Record, C: Record> {
    posts: Option<ArchiveStream<P>>,
    comments: Option<ArchiveStream<C>>,
    last_done: Mutex<bool>,
    on_done_change: Notifier<bool>,
    subscribed: AtomicBool,
}

impl<P: Record, C: Record> CombinedInner<P, C> {
    fn current_done(&self) -> bool {
        aggregate_done(
            self.posts.as_ref().map(ArchiveStream::is_done),
            self.comments.as_ref().map(ArchiveStream::is_done),
        )
    }

    /// Fold the children's flags into `last_done`, notifying if it changed
    ///
    /// The children are read while `last_done` is held, so concurrent callers agree on
    /// the final value; listeners run after the lock is released.
    fn recompute(&self) {
        let (done, changed) = {
            let mut last = self.last_done.lock().unwrap_or_else(PoisonError::into_inner);
            let done = self.current_done();
            let changed = *last != done;
            *last = done;
            (done, changed)
        };
        if changed {
            info!(done, "Combined archive done state changed");
            self.on_done_change.notify(&done);
        }
    }
}

/// Drives up to two archive streams and reports when all of them are done
pub struct CombinedArchiveStream<P: Record, C: Record> {
    inner: Arc<CombinedInner<P, C>>,
}

impl<P: Record, C: Record> Clone for CombinedArchiveStream<P, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Record, C: Record> std::fmt::Debug for CombinedArchiveStream<P, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CombinedArchiveStream")
            .field("posts", &self.inner.posts)
            .field("comments", &self.inner.comments)
            .field("done", &self.is_done())
            .finish()
    }
}

async fn settle<F>(future: Option<F>) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    match future {
        Some(future) => future.await,
        None => Ok(()),
    }
}

impl<P: Record, C: Record> CombinedArchiveStream<P, C> {
    /// Combine the given streams; either may be absent
    pub fn new(posts: Option<ArchiveStream<P>>, comments: Option<ArchiveStream<C>>) -> Self {
        Self {
            inner: Arc::new(CombinedInner {
                posts,
                comments,
                last_done: Mutex::new(false),
                on_done_change: Notifier::new(),
                subscribed: AtomicBool::new(false),
            }),
        }
    }

    /// The posts stream, if present
    pub fn posts(&self) -> Option<&ArchiveStream<P>> {
        self.inner.posts.as_ref()
    }

    /// The comments stream, if present
    pub fn comments(&self) -> Option<&ArchiveStream<C>> {
        self.inner.comments.as_ref()
    }

    /// Whether every present stream is done
    pub fn is_done(&self) -> bool {
        self.inner.current_done()
    }

    /// Fires with the new aggregate value whenever it changes
    pub fn on_done_change(&self) -> &Notifier<bool> {
        &self.inner.on_done_change
    }

    /// Status snapshots of the present streams, posts first
    pub fn status(&self) -> Vec<StreamStatus> {
        let mut statuses = Vec::with_capacity(2);
        if let Some(posts) = &self.inner.posts {
            statuses.push(posts.status());
        }
        if let Some(comments) = &self.inner.comments {
            statuses.push(comments.status());
        }
        statuses
    }

    /// Install the recompute handler on each child, once
    fn subscribe(&self) {
        if self.inner.subscribed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(posts) = &self.inner.posts {
            let weak = Arc::downgrade(&self.inner);
            posts.on_state_change().add_listener(move |_| recompute(&weak));
        }
        if let Some(comments) = &self.inner.comments {
            let weak = Arc::downgrade(&self.inner);
            comments.on_state_change().add_listener(move |_| recompute(&weak));
        }
    }

    /// Start every present stream concurrently
    ///
    /// # Errors
    /// Returns the first child error once all children have settled
    pub async fn start(&self) -> Result<()> {
        self.subscribe();
        let (posts, comments) = tokio::join!(
            settle(self.inner.posts.as_ref().map(ArchiveStream::start)),
            settle(self.inner.comments.as_ref().map(ArchiveStream::start)),
        );
        posts.and(comments)
    }

    /// Try every present stream again concurrently
    ///
    /// # Errors
    /// Returns the first child error once all children have settled
    pub async fn try_again(&self) -> Result<()> {
        self.subscribe();
        let (posts, comments) = tokio::join!(
            settle(self.inner.posts.as_ref().map(ArchiveStream::try_again)),
            settle(self.inner.comments.as_ref().map(ArchiveStream::try_again)),
        );
        posts.and(comments)
    }

    /// Resume every present stream
    ///
    /// # Errors
    /// Every child is resumed even if one fails; the first error is returned
    pub fn resume(&self) -> Result<()> {
        let posts = self.inner.posts.as_ref().map_or(Ok(()), ArchiveStream::resume);
        let comments = self.inner.comments.as_ref().map_or(Ok(()), ArchiveStream::resume);
        posts.and(comments)
    }

    /// Pause every present stream
    ///
    /// All children stop running before this method returns; the future resolves once
    /// every child has flushed.
    pub fn pause(&self) -> BoxFuture<'static, Result<()>> {
        let posts = self.inner.posts.as_ref().map(ArchiveStream::pause);
        let comments = self.inner.comments.as_ref().map(ArchiveStream::pause);
        async move {
            let (posts, comments) = futures::join!(settle(posts), settle(comments));
            posts.and(comments)
        }
        .boxed()
    }

    /// Cancel every present stream
    pub fn cancel(&self) -> BoxFuture<'static, Result<()>> {
        let posts = self.inner.posts.as_ref().map(ArchiveStream::cancel);
        let comments = self.inner.comments.as_ref().map(ArchiveStream::cancel);
        async move {
            let (posts, comments) = futures::join!(settle(posts), settle(comments));
            posts.and(comments)
        }
        .boxed()
    }
}

fn recompute<P: Record, C: Record>(weak: &Weak<CombinedInner<P, C>>) {
    if let Some(inner) = weak.upgrade() {
        inner.recompute();
    }
}
