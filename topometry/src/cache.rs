//! Bounded LRU cache of analysis results.
//!
//! Keys embed the calibration epoch. `invalidate_epoch` only bumps a counter:
//! stale entries become unreachable at once and age out through normal LRU
//! eviction.

use crate::request::{AnalysisResult, CacheKey};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Stores refused because their key predates the current epoch
    pub stale_puts: u64,
}

#[derive(Debug, Default)]
struct LruInner {
    entries: HashMap<CacheKey, (Arc<AnalysisResult>, u64)>,
    /// Access tick to key, oldest first
    order: BTreeMap<u64, CacheKey>,
    tick: u64,
    stats: CacheStats,
}

impl LruInner {
    fn touch(&mut self, key: &CacheKey) {
        self.tick += 1;
        let tick = self.tick;
        if let Some((_, last)) = self.entries.get_mut(key) {
            self.order.remove(&*last);
            *last = tick;
            self.order.insert(tick, key.clone());
        }
    }
}

/// Thread-safe result cache shared by submitters and workers
#[derive(Debug)]
pub struct ResultCache {
    capacity: usize,
    epoch: AtomicU64,
    inner: Mutex<LruInner>,
}

impl ResultCache {
    /// Create a cache holding at most `capacity` results (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            epoch: AtomicU64::new(0),
            inner: Mutex::new(LruInner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Start a new calibration epoch, returning it
    pub fn invalidate_epoch(&self) -> u64 {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!("Result cache moved to epoch {epoch}");
        epoch
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<AnalysisResult>> {
        let current = self.epoch();
        let mut inner = self.lock();

        if key.epoch != current || !inner.entries.contains_key(key) {
            inner.stats.misses += 1;
            return None;
        }

        inner.touch(key);
        inner.stats.hits += 1;
        inner.entries.get(key).map(|(result, _)| result.clone())
    }

    /// Store a result, replacing any existing entry for the key.
    ///
    /// Returns false if the key belongs to an earlier epoch; such results are
    /// dropped instead of occupying capacity.
    pub fn put(&self, key: CacheKey, result: Arc<AnalysisResult>) -> bool {
        let mut inner = self.lock();

        if key.epoch != self.epoch() {
            inner.stats.stale_puts += 1;
            tracing::debug!("Dropping result from stale epoch {}", key.epoch);
            return false;
        }

        inner.tick += 1;
        let tick = inner.tick;
        if let Some((_, old_tick)) = inner.entries.insert(key.clone(), (result, tick)) {
            inner.order.remove(&old_tick);
        }
        inner.order.insert(tick, key);

        while inner.entries.len() > self.capacity {
            let Some((_, oldest)) = inner.order.pop_first() else {
                break;
            };
            inner.entries.remove(&oldest);
            inner.stats.evictions += 1;
        }
        true
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }
}
