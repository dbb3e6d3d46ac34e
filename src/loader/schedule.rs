use std::{mem, sync::Mutex};

use futures::future::BoxFuture;
use tracing::warn;

/// A claimed batch's dispatch: driving the future to completion runs the
/// fetch function and settles every promise in the batch.
///
/// The future itself claims the batch (the "touch" transition) as its first
/// step, so running a dispatch twice is harmless.
pub struct BatchDispatch {
    future: BoxFuture<'static, ()>,
}

impl BatchDispatch {
    pub(crate) fn new(future: BoxFuture<'static, ()>) -> Self {
        Self { future }
    }

    /// Runs the dispatch to completion.
    pub async fn run(self) {
        self.future.await;
    }

    /// The dispatch as a boxed future, for handing to a spawner.
    pub fn into_future(self) -> BoxFuture<'static, ()> {
        self.future
    }
}

/// Decides when an accumulated batch of pending keys is dispatched to its
/// fetch function.
///
/// Whatever the policy, a batch that has been claimed for dispatch accepts
/// no further keys; that invariant is enforced by the batch's own status
/// transition, not by the scheduler.
pub trait BatchScheduler: Send + Sync {
    /// Schedules a batch dispatch.
    fn schedule(&self, dispatch: BatchDispatch);
}

/// Collects dispatches for an explicit [`flush`](ManualBatchScheduler::flush),
/// giving tests deterministic control over batch windows.
#[derive(Default)]
pub struct ManualBatchScheduler {
    pending: Mutex<Vec<BatchDispatch>>,
}

impl ManualBatchScheduler {
    /// Creates a scheduler with no pending dispatches.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of dispatches waiting for a flush.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Runs every pending dispatch, including ones scheduled while
    /// flushing.
    pub async fn flush(&self) {
        loop {
            let pending = mem::take(&mut *self.pending.lock().unwrap());
            if pending.is_empty() {
                return;
            }
            for dispatch in pending {
                dispatch.run().await;
            }
        }
    }
}

impl BatchScheduler for ManualBatchScheduler {
    fn schedule(&self, dispatch: BatchDispatch) {
        self.pending.lock().unwrap().push(dispatch);
    }
}

/// Launches every dispatch as soon as it is scheduled, through a
/// caller-supplied spawn function (e.g. a runtime's `spawn`).
///
/// A failure to launch is logged and swallowed; fetch errors themselves
/// always travel through the batch's promises, never through the scheduler.
pub struct ImmediateScheduler<S> {
    spawn: S,
}

impl<S> ImmediateScheduler<S>
where
    S: Fn(BoxFuture<'static, ()>) -> Result<(), String> + Send + Sync,
{
    /// Creates a scheduler launching dispatches through `spawn`.
    pub fn new(spawn: S) -> Self {
        Self { spawn }
    }
}

impl<S> BatchScheduler for ImmediateScheduler<S>
where
    S: Fn(BoxFuture<'static, ()>) -> Result<(), String> + Send + Sync,
{
    fn schedule(&self, dispatch: BatchDispatch) {
        if let Err(error) = (self.spawn)(dispatch.into_future()) {
            warn!(%error, "failed to launch batch dispatch");
        }
    }
}
