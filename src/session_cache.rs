//! In-memory cache of loaded model sessions
//!
//! Loading a session dominates request latency (artifact fetch plus graph
//! optimisation), so sessions are kept for reuse and shared between
//! requests. The cache is an explicit object constructed once and injected
//! into the pipeline.
//!
//! Concurrency: the slot map is guarded by a short-lived lock that is only
//! held to find or insert a slot. Each slot owns an async once-cell, so at
//! most one load per model identifier is in flight, and loads for different
//! identifiers proceed independently.

use crate::error::Result;
use crate::inference::{ModelSessionHandle, SessionLoader};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::OnceCell;

#[derive(Debug)]
struct Slot {
    cell: Arc<OnceCell<ModelSessionHandle>>,
    last_used: u64,
}

/// Session cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCacheStats {
    /// Total `acquire` calls
    pub acquisitions: u64,
    /// Acquisitions served by an already-loaded session
    pub hits: u64,
    /// Loads started
    pub loads: u64,
    /// Loads that failed
    pub load_failures: u64,
    /// Sessions dropped by the LRU bound
    pub evictions: u64,
    /// Sessions currently held
    pub cached_sessions: usize,
}

impl SessionCacheStats {
    /// Fraction of acquisitions served from cache
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        if self.acquisitions == 0 {
            0.0
        } else {
            self.hits as f64 / self.acquisitions as f64
        }
    }
}

/// Model session cache keyed by model identifier
pub struct ModelSessionCache {
    loader: Arc<dyn SessionLoader>,
    /// Maximum loaded sessions; 0 means unbounded
    capacity: usize,
    slots: Mutex<HashMap<String, Slot>>,
    clock: AtomicU64,
    acquisitions: AtomicU64,
    hits: AtomicU64,
    loads: AtomicU64,
    load_failures: AtomicU64,
    evictions: AtomicU64,
}

impl std::fmt::Debug for ModelSessionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSessionCache")
            .field("capacity", &self.capacity)
            .field("cached_models", &self.cached_models())
            .finish_non_exhaustive()
    }
}

impl ModelSessionCache {
    /// Create a cache bounded to `capacity` loaded sessions (0 = unbounded)
    pub fn new(loader: Arc<dyn SessionLoader>, capacity: usize) -> Self {
        Self {
            loader,
            capacity,
            slots: Mutex::new(HashMap::new()),
            clock: AtomicU64::new(0),
            acquisitions: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            loads: AtomicU64::new(0),
            load_failures: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Create a cache that never evicts
    pub fn unbounded(loader: Arc<dyn SessionLoader>) -> Self {
        Self::new(loader, 0)
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        // Slot bookkeeping stays consistent even if a holder panicked
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the session for `model_id`, loading it on first use
    ///
    /// Repeated calls return the same handle. Concurrent first calls for the
    /// same identifier share one load. A failed load is not cached; the next
    /// call tries again.
    ///
    /// # Errors
    /// - Whatever the session loader reports for this identifier
    pub async fn acquire(&self, model_id: &str) -> Result<ModelSessionHandle> {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);

        let cell = {
            let mut slots = self.lock_slots();
            let tick = self.clock.fetch_add(1, Ordering::Relaxed);
            let slot = slots.entry(model_id.to_string()).or_insert_with(|| Slot {
                cell: Arc::new(OnceCell::new()),
                last_used: tick,
            });
            slot.last_used = tick;
            Arc::clone(&slot.cell)
        };

        if let Some(handle) = cell.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(model = model_id, "session cache hit");
            return Ok(Arc::clone(handle));
        }

        let mut loaded_here = false;
        let result = cell
            .get_or_try_init(|| {
                loaded_here = true;
                self.loads.fetch_add(1, Ordering::Relaxed);
                tracing::info!(model = model_id, "loading model session");
                let loader = Arc::clone(&self.loader);
                let id = model_id.to_string();
                async move { loader.load_session(&id).await }
            })
            .await;

        match result {
            Ok(handle) => {
                let handle = Arc::clone(handle);
                if loaded_here {
                    tracing::info!(model = model_id, "model session ready");
                    self.enforce_capacity(model_id);
                } else {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                }
                Ok(handle)
            },
            Err(e) => {
                if loaded_here {
                    self.load_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(model = model_id, error = %e, "model session load failed");
                }
                self.discard_failed(model_id, &cell);
                Err(e)
            },
        }
    }

    /// Drop an empty slot nobody else is waiting on
    fn discard_failed(&self, model_id: &str, cell: &Arc<OnceCell<ModelSessionHandle>>) {
        let mut slots = self.lock_slots();
        let removable = slots.get(model_id).is_some_and(|slot| {
            Arc::ptr_eq(&slot.cell, cell)
                && !slot.cell.initialized()
                && Arc::strong_count(&slot.cell) <= 2
        });
        if removable {
            slots.remove(model_id);
        }
    }

    /// Evict least recently used sessions beyond capacity, sparing `keep`
    fn enforce_capacity(&self, keep: &str) {
        if self.capacity == 0 {
            return;
        }

        let mut slots = self.lock_slots();
        loop {
            let loaded = slots.values().filter(|slot| slot.cell.initialized()).count();
            if loaded <= self.capacity {
                break;
            }

            let victim = slots
                .iter()
                .filter(|(id, slot)| id.as_str() != keep && slot.cell.initialized())
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(id, _)| id.clone());

            let Some(victim) = victim else { break };
            slots.remove(&victim);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            // Handles held by in-flight requests stay valid until they drop
            tracing::debug!(model = %victim, "evicted model session");
        }
    }

    /// Whether a loaded session is cached for `model_id`
    #[must_use]
    pub fn contains(&self, model_id: &str) -> bool {
        self.lock_slots()
            .get(model_id)
            .is_some_and(|slot| slot.cell.initialized())
    }

    /// Number of loaded sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_slots()
            .values()
            .filter(|slot| slot.cell.initialized())
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identifiers of loaded sessions, sorted
    #[must_use]
    pub fn cached_models(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .lock_slots()
            .iter()
            .filter(|(_, slot)| slot.cell.initialized())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Configured capacity (0 = unbounded)
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshot of cache statistics
    #[must_use]
    pub fn stats(&self) -> SessionCacheStats {
        SessionCacheStats {
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            cached_sessions: self.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::MockSessionLoader;

    #[tokio::test]
    async fn test_acquire_is_idempotent() {
        let loader = Arc::new(MockSessionLoader::new());
        let cache = ModelSessionCache::unbounded(loader.clone());

        let first = cache.acquire("u2net").await.unwrap();
        let second = cache.acquire("u2net").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loader.load_count("u2net"), 1);
        assert_eq!(first.model_id(), "u2net");

        let stats = cache.stats();
        assert_eq!(stats.acquisitions, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.loads, 1);
        assert!((stats.hit_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_failed_load_is_not_cached() {
        let loader = Arc::new(MockSessionLoader::new().fail_first_loads("u2net", 1));
        let cache = ModelSessionCache::unbounded(loader.clone());

        assert!(cache.acquire("u2net").await.is_err());
        assert!(!cache.contains("u2net"));
        assert!(cache.is_empty());

        assert!(cache.acquire("u2net").await.is_ok());
        assert_eq!(loader.load_count("u2net"), 2);
        assert_eq!(cache.stats().load_failures, 1);
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let loader = Arc::new(MockSessionLoader::new());
        let cache = ModelSessionCache::new(loader.clone(), 2);

        let a = cache.acquire("a").await.unwrap();
        cache.acquire("b").await.unwrap();
        // Touch "a" so "b" becomes least recently used
        cache.acquire("a").await.unwrap();
        cache.acquire("c").await.unwrap();

        assert_eq!(cache.cached_models(), vec!["a".to_string(), "c".to_string()]);
        assert_eq!(cache.stats().evictions, 1);
        // Evicted handles held by callers stay usable
        assert_eq!(a.model_id(), "a");

        cache.acquire("b").await.unwrap();
        assert_eq!(loader.load_count("b"), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_unbounded_never_evicts() {
        let loader = Arc::new(MockSessionLoader::new());
        let cache = ModelSessionCache::unbounded(loader);
        for id in ["a", "b", "c", "d", "e", "f"] {
            cache.acquire(id).await.unwrap();
        }
        assert_eq!(cache.len(), 6);
        assert_eq!(cache.stats().evictions, 0);
    }
}
