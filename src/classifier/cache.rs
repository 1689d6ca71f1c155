//! Trained-committee cache keyed by the exact labeled set
//!
//! Each key owns a slot behind its own mutex: the first caller for a key
//! trains while later callers for the same key wait on the slot and reuse
//! the result. Entries are evicted strictly in insertion order once the
//! capacity is exceeded; hits do not refresh an entry.

use super::committee::TrainedCommittee;
use super::TrainResult;
use crate::models::LabeledItem;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const DEFAULT_CACHE_CAPACITY: usize = 100;

/// Order-independent digest of a labeled set
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Hex SHA-256 over the sorted `(id, tier)` pairs of each side.
    /// Positives and negatives are hashed as separate sections, so swapping
    /// them yields a different key.
    pub fn from_labels(positives: &[LabeledItem], negatives: &[LabeledItem]) -> Self {
        let mut hasher = Sha256::new();
        for (tag, items) in [("pos", positives), ("neg", negatives)] {
            let mut pairs: Vec<(u64, &str)> =
                items.iter().map(|i| (i.id, i.tier.as_str())).collect();
            pairs.sort_unstable();
            hasher.update(tag.as_bytes());
            for (id, tier) in pairs {
                hasher.update(format!("[{}:{}]", id, tier).as_bytes());
            }
            hasher.update(b";");
        }
        let digest = hasher.finalize();
        Self(digest.iter().map(|b| format!("{:02x}", b)).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type Slot = Arc<Mutex<Option<Arc<TrainedCommittee>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bounded FIFO cache of trained committees
pub struct ModelCache {
    slots: DashMap<CacheKey, Slot>,
    order: Mutex<VecDeque<CacheKey>>,
    capacity: usize,
}

impl Default for ModelCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl ModelCache {
    /// Capacity is at least 1.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of trained entries
    pub fn len(&self) -> usize {
        lock(&self.order).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when a trained committee is stored under `key`.
    /// Blocks while that key is being trained.
    pub fn contains(&self, key: &CacheKey) -> bool {
        let slot = self.slots.get(key).map(|s| Arc::clone(s.value()));
        slot.is_some_and(|s| lock(&s).is_some())
    }

    /// Return the committee for `key`, running `train` on a miss.
    ///
    /// Concurrent callers for one key train at most once. A failed training
    /// is returned to the caller and leaves nothing behind.
    pub fn get_or_train<F>(&self, key: &CacheKey, train: F) -> TrainResult<Arc<TrainedCommittee>>
    where
        F: FnOnce() -> TrainResult<TrainedCommittee>,
    {
        let slot: Slot = Arc::clone(self.slots.entry(key.clone()).or_default().value());
        let mut guard = lock(&slot);

        if let Some(committee) = guard.as_ref() {
            tracing::debug!("Model cache hit for {}", key);
            return Ok(Arc::clone(committee));
        }

        tracing::debug!("Model cache miss for {}, training", key);
        match train() {
            Ok(committee) => {
                let committee = Arc::new(committee);
                *guard = Some(Arc::clone(&committee));
                // The slot may have been dropped by a failed attempt that
                // this caller was waiting behind.
                self.slots.insert(key.clone(), Arc::clone(&slot));
                self.record_insertion(key);
                Ok(committee)
            }
            Err(e) => {
                self.slots.remove_if(key, |_, s| Arc::ptr_eq(s, &slot));
                Err(e)
            }
        }
    }

    fn record_insertion(&self, key: &CacheKey) {
        let mut order = lock(&self.order);
        // A key retrained after its slot was recreated keeps its first position
        if order.contains(key) {
            return;
        }
        order.push_back(key.clone());
        while order.len() > self.capacity {
            if let Some(oldest) = order.pop_front() {
                self.slots.remove(&oldest);
                tracing::debug!("Evicted model cache entry {}", oldest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{train_committee, NeuralConfig, TrainError};
    use crate::models::Tier;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tiny_committee() -> TrainedCommittee {
        train_committee(
            &[vec![0.0, 0.0]],
            &[1.0],
            &[vec![1.0, 1.0]],
            &[1.0],
            &NeuralConfig::default(),
        )
        .unwrap()
    }

    fn key(id: u64) -> CacheKey {
        CacheKey::from_labels(&[LabeledItem::high(id)], &[LabeledItem::high(id + 1_000_000)])
    }

    #[test]
    fn test_key_is_order_independent() {
        let a = CacheKey::from_labels(
            &[LabeledItem::high(3), LabeledItem::low(1)],
            &[LabeledItem::high(7)],
        );
        let b = CacheKey::from_labels(
            &[LabeledItem::low(1), LabeledItem::high(3)],
            &[LabeledItem::high(7)],
        );
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_key_distinguishes_tiers_and_sides() {
        let base = CacheKey::from_labels(&[LabeledItem::high(1)], &[LabeledItem::high(2)]);
        let tier = CacheKey::from_labels(&[LabeledItem::new(1, Tier::Low)], &[LabeledItem::high(2)]);
        let swapped = CacheKey::from_labels(&[LabeledItem::high(2)], &[LabeledItem::high(1)]);
        assert_ne!(base, tier);
        assert_ne!(base, swapped);
    }

    #[test]
    fn test_hit_skips_training() {
        let cache = ModelCache::default();
        let calls = AtomicUsize::new(0);
        let train = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(tiny_committee())
        };

        let first = cache.get_or_train(&key(1), train).unwrap();
        let second = cache
            .get_or_train(&key(1), || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(tiny_committee())
            })
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_fifo_eviction_at_capacity() {
        let cache = ModelCache::default();
        let base = tiny_committee();
        for id in 0..=DEFAULT_CACHE_CAPACITY as u64 {
            cache.get_or_train(&key(id), || Ok(base.clone())).unwrap();
        }
        assert_eq!(cache.len(), DEFAULT_CACHE_CAPACITY);
        assert!(!cache.contains(&key(0)));
        assert!(cache.contains(&key(1)));
        assert!(cache.contains(&key(DEFAULT_CACHE_CAPACITY as u64)));
    }

    #[test]
    fn test_hits_do_not_refresh_entries() {
        let cache = ModelCache::new(2);
        let base = tiny_committee();
        cache.get_or_train(&key(1), || Ok(base.clone())).unwrap();
        cache.get_or_train(&key(2), || Ok(base.clone())).unwrap();
        cache.get_or_train(&key(1), || Ok(base.clone())).unwrap();
        cache.get_or_train(&key(3), || Ok(base.clone())).unwrap();

        assert!(!cache.contains(&key(1)));
        assert!(cache.contains(&key(2)));
        assert!(cache.contains(&key(3)));
    }

    #[test]
    fn test_failed_training_leaves_no_entry() {
        let cache = ModelCache::default();
        let err = cache
            .get_or_train(&key(5), || Err(TrainError::NoFeatures))
            .unwrap_err();
        assert_eq!(err, TrainError::NoFeatures);
        assert!(!cache.contains(&key(5)));
        assert!(cache.is_empty());

        // a later attempt trains normally
        cache.get_or_train(&key(5), || Ok(tiny_committee())).unwrap();
        assert!(cache.contains(&key(5)));
    }

    #[test]
    fn test_recreated_slot_is_tracked_once() {
        let cache = ModelCache::new(2);
        let base = tiny_committee();
        cache.get_or_train(&key(1), || Ok(base.clone())).unwrap();

        // slot dropped under a live order entry, as after a failed attempt
        // racing with a successful one
        cache.slots.remove(&key(1));
        cache.get_or_train(&key(1), || Ok(base.clone())).unwrap();
        assert_eq!(cache.len(), 1);

        cache.get_or_train(&key(2), || Ok(base.clone())).unwrap();
        cache.get_or_train(&key(3), || Ok(base.clone())).unwrap();
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&key(1)));
        assert!(cache.contains(&key(2)));
        assert!(cache.contains(&key(3)));
    }

    #[test]
    fn test_concurrent_callers_train_once() {
        let cache = ModelCache::default();
        let calls = AtomicUsize::new(0);
        let base = tiny_committee();

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    cache
                        .get_or_train(&key(42), || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(20));
                            Ok(base.clone())
                        })
                        .unwrap();
                });
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }
}
