use std::{
    any::Any,
    hash::Hash,
    ops::{Deref, DerefMut},
    sync::{Arc, Mutex},
};

use fnv::FnvHashMap;

use super::{batch::Batch, LoaderId, Promise};

/// Promise caches kept around per pool; beyond this, returned instances are
/// dropped instead.
const MAX_POOLED: usize = 32;

/// One loader's storage within a [`PromiseCache`]: completed and in-flight
/// promises by key, plus the batch currently accumulating keys.
pub(crate) struct TypedSlot<K, V> {
    pub(crate) promises: FnvHashMap<K, Promise<V>>,
    pub(crate) active: Option<Arc<Batch<K, V>>>,
}

impl<K, V> TypedSlot<K, V> {
    fn new() -> Self {
        Self {
            promises: FnvHashMap::default(),
            active: None,
        }
    }
}

trait CacheSlot: Any + Send {
    fn promise_count(&self) -> usize;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<K, V> CacheSlot for TypedSlot<K, V>
where
    K: Eq + Hash + Send + 'static,
    V: Send + 'static,
{
    fn promise_count(&self) -> usize {
        self.promises.len()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A per-execution map of `(loader identity, key)` to a single in-flight or
/// completed promise.
///
/// Instances are rented from a [`CachePool`] and fully reset on return; a
/// cache never retains data across unrelated executions.
#[derive(Default)]
pub struct PromiseCache {
    slots: FnvHashMap<LoaderId, Box<dyn CacheSlot>>,
}

impl PromiseCache {
    /// Creates an empty cache, unpooled.
    pub fn new() -> Self {
        Self::default()
    }

    /// The total number of cached promises across all loaders.
    pub fn promise_count(&self) -> usize {
        self.slots.values().map(|s| s.promise_count()).sum()
    }

    /// Drops every slot, releasing all references to promises and batches.
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    pub(crate) fn slot_mut<K, V>(&mut self, loader: LoaderId) -> &mut TypedSlot<K, V>
    where
        K: Eq + Hash + Send + 'static,
        V: Send + 'static,
    {
        self.slots
            .entry(loader)
            .or_insert_with(|| Box::new(TypedSlot::<K, V>::new()))
            .as_any_mut()
            .downcast_mut::<TypedSlot<K, V>>()
            .expect("loader identity bound to one key/value type")
    }
}

/// An object pool of [`PromiseCache`] instances reused across executions.
#[derive(Clone, Default)]
pub struct CachePool {
    idle: Arc<Mutex<Vec<PromiseCache>>>,
}

impl CachePool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rents a cache from the pool, creating one if none is idle.
    pub fn rent(&self) -> CacheLease {
        let cache = self.idle.lock().unwrap().pop().unwrap_or_default();
        CacheLease {
            cache: Some(cache),
            pool: Arc::clone(&self.idle),
        }
    }

    /// Rents a cache wrapped for shared mutation across concurrent tasks.
    pub fn rent_shared(&self) -> SharedPromiseCache {
        Arc::new(Mutex::new(self.rent()))
    }

    /// The number of idle caches currently held.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().unwrap().len()
    }
}

/// A rented [`PromiseCache`]. Dropping the lease resets the cache and
/// returns it to its pool.
pub struct CacheLease {
    cache: Option<PromiseCache>,
    pool: Arc<Mutex<Vec<PromiseCache>>>,
}

impl Deref for CacheLease {
    type Target = PromiseCache;

    fn deref(&self) -> &PromiseCache {
        self.cache.as_ref().expect("lease not yet returned")
    }
}

impl DerefMut for CacheLease {
    fn deref_mut(&mut self) -> &mut PromiseCache {
        self.cache.as_mut().expect("lease not yet returned")
    }
}

impl Drop for CacheLease {
    fn drop(&mut self) {
        if let Some(mut cache) = self.cache.take() {
            cache.clear();
            let mut idle = self.pool.lock().unwrap();
            if idle.len() < MAX_POOLED {
                idle.push(cache);
            }
        }
    }
}

/// A promise cache shared by every task of one execution (or several, when
/// explicitly reused).
pub type SharedPromiseCache = Arc<Mutex<CacheLease>>;
