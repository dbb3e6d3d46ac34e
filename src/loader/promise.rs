use std::{
    fmt,
    future::Future,
    mem,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll, Waker},
};

use super::LoaderError;

enum PromiseState<V> {
    Pending(Vec<Waker>),
    Ready(Result<V, LoaderError>),
}

/// A single-assignment future for one key's eventual fetched value.
///
/// All loads of the same key within a cache lifetime share one promise
/// instance; once resolved it stays resolved, and every clone observes the
/// same result.
pub struct Promise<V> {
    inner: Arc<Mutex<PromiseState<V>>>,
}

impl<V> Clone for Promise<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> fmt::Debug for Promise<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.inner.lock().unwrap() {
            PromiseState::Pending(_) => "pending",
            PromiseState::Ready(Ok(_)) => "resolved",
            PromiseState::Ready(Err(_)) => "rejected",
        };
        f.debug_tuple("Promise").field(&state).finish()
    }
}

impl<V: Clone> Promise<V> {
    pub(crate) fn pending() -> Self {
        Self {
            inner: Arc::new(Mutex::new(PromiseState::Pending(Vec::new()))),
        }
    }

    pub(crate) fn resolved(result: Result<V, LoaderError>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PromiseState::Ready(result))),
        }
    }

    /// Assigns the result, waking every waiter. Resolving an already
    /// resolved promise is a contract violation of the dispatcher and is
    /// ignored.
    pub(crate) fn resolve(&self, result: Result<V, LoaderError>) {
        let wakers = {
            let mut state = self.inner.lock().unwrap();
            match &mut *state {
                PromiseState::Ready(_) => {
                    debug_assert!(false, "promise resolved twice");
                    return;
                }
                PromiseState::Pending(wakers) => {
                    let wakers = mem::take(wakers);
                    *state = PromiseState::Ready(result);
                    wakers
                }
            }
        };
        for waker in wakers {
            waker.wake();
        }
    }

    /// Whether the promise has been assigned a result.
    pub fn is_resolved(&self) -> bool {
        matches!(&*self.inner.lock().unwrap(), PromiseState::Ready(_))
    }

    /// The result, if already assigned.
    pub fn peek(&self) -> Option<Result<V, LoaderError>> {
        match &*self.inner.lock().unwrap() {
            PromiseState::Ready(result) => Some(result.clone()),
            PromiseState::Pending(_) => None,
        }
    }

    /// Whether two handles share the same underlying promise.
    pub fn shares_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<V: Clone> Future for Promise<V> {
    type Output = Result<V, LoaderError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.inner.lock().unwrap();
        match &mut *state {
            PromiseState::Ready(result) => Poll::Ready(result.clone()),
            PromiseState::Pending(wakers) => {
                if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}
