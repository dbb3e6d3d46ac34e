use std::{
    hash::Hash,
    mem,
    sync::{
        atomic::{AtomicU8, Ordering},
        Mutex,
    },
    time::Instant,
};

use indexmap::IndexMap;

use super::Promise;

/// The batch is accumulating keys and may still be joined.
const ENQUEUED: u8 = 0;
/// The batch has been claimed for dispatch; late joiners start a new batch.
const TOUCHED: u8 = 1;

/// One coalescing window for a single loader: the unique keys requested so
/// far, in first-seen order, each mapped to its promise.
pub(crate) struct Batch<K, V> {
    entries: Mutex<IndexMap<K, Promise<V>>>,
    status: AtomicU8,
    last_modified: Mutex<Instant>,
}

impl<K, V> Batch<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(IndexMap::new()),
            status: AtomicU8::new(ENQUEUED),
            last_modified: Mutex::new(Instant::now()),
        }
    }

    /// Appends a key to the batch (or returns the promise it already holds).
    ///
    /// Returns `None` if the batch has been claimed for dispatch; the caller
    /// must open a new batch instead. The status check happens under the
    /// entry lock so an append can never race a concurrent claim-and-drain.
    pub(crate) fn join(&self, key: &K) -> Option<Promise<V>> {
        let mut entries = self.entries.lock().unwrap();
        if self.status.load(Ordering::Acquire) == TOUCHED {
            return None;
        }
        if let Some(promise) = entries.get(key) {
            return Some(promise.clone());
        }
        let promise = Promise::pending();
        entries.insert(key.clone(), promise.clone());
        *self.last_modified.lock().unwrap() = Instant::now();
        Some(promise)
    }

    /// Claims the batch for dispatch. Returns `false` if it was already
    /// claimed.
    pub(crate) fn touch(&self) -> bool {
        self.status
            .compare_exchange(ENQUEUED, TOUCHED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Drains the accumulated entries, in first-seen key order. Only valid
    /// after a successful [`touch`](Self::touch).
    pub(crate) fn take_entries(&self) -> IndexMap<K, Promise<V>> {
        mem::take(&mut *self.entries.lock().unwrap())
    }

    pub(crate) fn is_touched(&self) -> bool {
        self.status.load(Ordering::Acquire) == TOUCHED
    }

    /// How long ago the batch last accepted a key, for staleness decisions.
    pub(crate) fn age(&self) -> std::time::Duration {
        self.last_modified.lock().unwrap().elapsed()
    }
}
