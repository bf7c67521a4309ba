//! A queue of in-flight async results that can be drained without blocking.
//!
//! Subscribers (the async-check gate in particular) kick off background
//! work — a lint pass, a syntax check — that may not finish before the
//! turn engine is ready to start the next turn. `InterruptQueue` lets the
//! engine poll for whatever has settled so far instead of awaiting
//! everything up front, while still offering `flush` for call sites (like
//! session shutdown) that do need to wait for all of it.

use std::pin::Pin;

use futures::future::BoxFuture;
use futures::FutureExt;

type PendingFuture<T> = Pin<Box<dyn std::future::Future<Output = Option<T>> + Send>>;

/// Queue of futures that each resolve to `Some(T)` on success or `None` on
/// rejection/cancellation — callers coerce errors to `None` before
/// enqueueing so `drain`/`flush` never need to handle a `Result`.
pub struct InterruptQueue<T> {
    pending: std::sync::Mutex<Vec<PendingFuture<T>>>,
}

impl<T: Send + 'static> InterruptQueue<T> {
    pub fn new() -> Self {
        Self {
            pending: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Enqueue a fallible future; a rejection is coerced to `None` rather
    /// than propagated, since an interrupt that failed to compute carries
    /// no information the next turn can act on.
    pub fn enqueue<E: Send + 'static>(
        &self,
        fut: impl std::future::Future<Output = Result<T, E>> + Send + 'static,
    ) {
        let boxed: PendingFuture<T> = fut.map(|r| r.ok()).boxed();
        self.pending.lock().unwrap().push(boxed);
    }

    /// Poll every pending future once without blocking; settled ones are
    /// removed and their `Some` results returned. Unsettled futures remain
    /// queued for the next call.
    pub fn drain(&self) -> Vec<T> {
        use std::future::Future;
        use std::task::{Context, Poll};

        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);

        let mut pending = self.pending.lock().unwrap();
        let mut still_pending = Vec::new();
        let mut ready = Vec::new();

        for mut fut in pending.drain(..) {
            match fut.as_mut().poll(&mut cx) {
                Poll::Ready(Some(value)) => ready.push(value),
                Poll::Ready(None) => {}
                Poll::Pending => still_pending.push(fut),
            }
        }

        *pending = still_pending;
        ready
    }

    /// Await everything outstanding and return every value that resolved
    /// successfully.
    pub async fn flush(&self) -> Vec<T> {
        let futs: Vec<BoxFuture<'static, Option<T>>> = {
            let mut pending = self.pending.lock().unwrap();
            pending.drain(..).map(|f| f.boxed()).collect()
        };
        futures::future::join_all(futs)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

impl<T: Send + 'static> Default for InterruptQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
