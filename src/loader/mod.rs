//! Batched, deduplicating data fetching scoped to an execution.
//!
//! A [`DataLoader`] coalesces the keys requested within one batch window
//! into a single fetch call, and caches one [`Promise`] per key for the
//! lifetime of the execution's [`PromiseCache`], so concurrent requests for
//! the same key trigger at most one upstream fetch.

mod batch;
mod cache;
mod promise;
mod schedule;

use std::{
    hash::Hash,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use fnv::FnvHashMap;
use tracing::{debug, trace};

use crate::resolver::ExecutionContext;

use self::batch::Batch;

pub use self::{
    cache::{CacheLease, CachePool, PromiseCache, SharedPromiseCache},
    promise::Promise,
    schedule::{BatchDispatch, BatchScheduler, ImmediateScheduler, ManualBatchScheduler},
};

/// Identity of one loader within a [`PromiseCache`].
pub(crate) type LoaderId = u64;

static NEXT_LOADER_ID: AtomicU64 = AtomicU64::new(0);

/// Errors a promise can be rejected with.
#[derive(Clone, Debug, Eq, PartialEq, derive_more::Display, derive_more::Error)]
pub enum LoaderError {
    /// The fetch function returned a result count different from the
    /// requested key count: a fatal contract violation for the whole batch.
    #[display("batch fetch returned {actual} values for {expected} keys")]
    KeysValuesCountMismatch {
        /// The number of keys requested.
        expected: usize,
        /// The number of values returned.
        actual: usize,
    },
    /// The fetch function itself failed; every key in the batch shares this
    /// diagnostic.
    #[display("batch fetch failed: {message}")]
    Fetch {
        /// The fetch function's error, rendered.
        message: String,
    },
}

impl LoaderError {
    /// Constructs a fetch failure from any displayable error.
    pub fn fetch(message: impl std::fmt::Display) -> Self {
        Self::Fetch {
            message: message.to_string(),
        }
    }
}

impl From<LoaderError> for crate::error::FieldError {
    fn from(error: LoaderError) -> Self {
        let kind = match &error {
            LoaderError::KeysValuesCountMismatch { .. } => crate::error::ErrorKind::BatchContract,
            LoaderError::Fetch { .. } => crate::error::ErrorKind::Resolver,
        };
        Self::new(error, kind)
    }
}

/// The batched fetch contract: given the batch's unique keys in first-seen
/// order, produce one value per key, positionally aligned.
#[async_trait]
pub trait BatchFn<K, V>: Send + Sync {
    /// Fetches values for `keys`. The result must contain exactly
    /// `keys.len()` values, in key order.
    async fn load(&self, keys: &[K]) -> Result<Vec<V>, LoaderError>;
}

/// A convenience variant of [`BatchFn`] producing a keyed map instead of a
/// positionally aligned vector. Wrap with [`Keyed`] to use as a loader's
/// fetch function.
#[async_trait]
pub trait KeyedBatchFn<K, V>: Send + Sync {
    /// Fetches values for `keys`. The map must contain every requested key;
    /// use an `Option` value type for keys that may legitimately be absent.
    async fn load(&self, keys: &[K]) -> Result<FnvHashMap<K, V>, LoaderError>;
}

/// Adapts a [`KeyedBatchFn`] to the positional [`BatchFn`] contract.
pub struct Keyed<F>(pub F);

#[async_trait]
impl<K, V, F> BatchFn<K, V> for Keyed<F>
where
    K: Eq + Hash + Sync,
    V: Send,
    F: KeyedBatchFn<K, V>,
{
    async fn load(&self, keys: &[K]) -> Result<Vec<V>, LoaderError> {
        let mut map = self.0.load(keys).await?;
        let actual = map.len();
        keys.iter()
            .map(|key| {
                map.remove(key).ok_or(LoaderError::KeysValuesCountMismatch {
                    expected: keys.len(),
                    actual,
                })
            })
            .collect()
    }
}

/// A handle for batched, deduplicated loads of `V` by `K`.
///
/// The loader itself is stateless configuration; promises and batch windows
/// live in the execution's [`PromiseCache`], so one loader instance can be
/// shared across executions without leaking data between them.
pub struct DataLoader<K, V> {
    id: LoaderId,
    fetch: Arc<dyn BatchFn<K, V>>,
    max_batch_size: Option<usize>,
}

impl<K, V> DataLoader<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a loader with the given fetch function.
    pub fn new(fetch: impl BatchFn<K, V> + 'static) -> Self {
        Self {
            id: NEXT_LOADER_ID.fetch_add(1, Ordering::Relaxed),
            fetch: Arc::new(fetch),
            max_batch_size: None,
        }
    }

    /// Splits dispatched batches into fetch calls of at most `max` keys.
    pub fn with_max_batch_size(mut self, max: usize) -> Self {
        self.max_batch_size = Some(max.max(1));
        self
    }

    /// Requests the value for `key`.
    ///
    /// If a promise for the key already exists within the execution's cache
    /// it is returned unchanged; otherwise the key joins the loader's active
    /// batch (or opens a new one, scheduling its dispatch) and a fresh
    /// promise is returned.
    pub fn load(&self, ctx: &ExecutionContext, key: K) -> Promise<V> {
        let (promise, opened) = {
            let mut cache = ctx.loader_cache().lock().unwrap();
            let slot = cache.slot_mut::<K, V>(self.id);

            if let Some(existing) = slot.promises.get(&key) {
                trace!(loader = self.id, "promise cache hit");
                return existing.clone();
            }

            if let Some(batch) = &slot.active {
                if let Some(promise) = batch.join(&key) {
                    slot.promises.insert(key, promise.clone());
                    return promise;
                }
            }

            // No active batch, or it has been claimed for dispatch: open a
            // new coalescing window.
            let batch = Arc::new(Batch::new());
            let promise = batch.join(&key).expect("fresh batch accepts keys");
            slot.promises.insert(key, promise.clone());
            slot.active = Some(Arc::clone(&batch));
            (promise, batch)
        };

        self.schedule(ctx, opened);
        promise
    }

    /// Stores an already-known value, so future loads of `key` resolve
    /// without fetching. Has no effect if a promise for `key` exists.
    pub fn prime(&self, ctx: &ExecutionContext, key: K, value: V) {
        let mut cache = ctx.loader_cache().lock().unwrap();
        let slot = cache.slot_mut::<K, V>(self.id);
        slot.promises
            .entry(key)
            .or_insert_with(|| Promise::resolved(Ok(value)));
    }

    /// Forgets the cached promise for `key`, so a later load fetches anew.
    ///
    /// Callers already holding the promise are unaffected: if the key sits
    /// in a still-open batch window, that window keeps its entry and settles
    /// the issued promise when it dispatches.
    pub fn remove(&self, ctx: &ExecutionContext, key: &K) {
        let mut cache = ctx.loader_cache().lock().unwrap();
        let slot = cache.slot_mut::<K, V>(self.id);
        slot.promises.remove(key);
    }

    /// Forgets every cached promise of this loader. Pending batch windows
    /// still dispatch for their earlier callers.
    pub fn clear(&self, ctx: &ExecutionContext) {
        let mut cache = ctx.loader_cache().lock().unwrap();
        let slot = cache.slot_mut::<K, V>(self.id);
        slot.promises.clear();
        slot.active = None;
    }

    fn schedule(&self, ctx: &ExecutionContext, batch: Arc<Batch<K, V>>) {
        let fetch = Arc::clone(&self.fetch);
        let max_batch_size = self.max_batch_size;
        let id = self.id;
        ctx.batch_scheduler().schedule(BatchDispatch::new(Box::pin(
            async move { dispatch_batch(id, batch, fetch, max_batch_size).await },
        )));
    }
}

/// Claims a batch and runs its fetch, settling every promise.
///
/// A result count different from the key count rejects the whole batch with
/// the same [`LoaderError::KeysValuesCountMismatch`] diagnostic; results are
/// never truncated or partially applied.
async fn dispatch_batch<K, V>(
    loader: LoaderId,
    batch: Arc<Batch<K, V>>,
    fetch: Arc<dyn BatchFn<K, V>>,
    max_batch_size: Option<usize>,
) where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    if !batch.touch() {
        return;
    }
    let entries: Vec<_> = batch.take_entries().into_iter().collect();
    if entries.is_empty() {
        return;
    }
    debug!(
        loader,
        keys = entries.len(),
        age = ?batch.age(),
        "dispatching batch"
    );

    let chunk_size = max_batch_size.unwrap_or(entries.len()).max(1);
    for entries in entries.chunks(chunk_size) {
        let keys: Vec<K> = entries.iter().map(|(key, _)| key.clone()).collect();
        match fetch.load(&keys).await {
            Ok(values) if values.len() == keys.len() => {
                for ((_, promise), value) in entries.iter().zip(values) {
                    promise.resolve(Ok(value));
                }
            }
            Ok(values) => {
                let error = LoaderError::KeysValuesCountMismatch {
                    expected: keys.len(),
                    actual: values.len(),
                };
                for (_, promise) in entries {
                    promise.resolve(Err(error.clone()));
                }
            }
            Err(error) => {
                for (_, promise) in entries {
                    promise.resolve(Err(error.clone()));
                }
            }
        }
    }
}
