use lru::LruCache;
use provider::EmbeddingResult;
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

struct Slot {
    result: EmbeddingResult,
    expires_at: Instant,
}

/// Bounded in-process tier. Strict LRU: a read refreshes recency, inserting past
/// capacity evicts the least recently used entry.
pub(crate) struct L1Cache {
    inner: Mutex<LruCache<String, Slot>>,
    capacity: NonZeroUsize,
}

impl L1Cache {
    pub(crate) fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            capacity,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Expired entries are dropped on read and reported as a miss.
    pub(crate) fn get(&self, key: &str, now: Instant) -> Option<EmbeddingResult> {
        let mut guard = self.lock();
        let expired = match guard.get(key) {
            Some(slot) if slot.expires_at > now => return Some(slot.result.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            guard.pop(key);
        }
        None
    }

    pub(crate) fn put(&self, key: String, result: EmbeddingResult, expires_at: Instant) {
        self.lock().put(key, Slot { result, expires_at });
    }

    pub(crate) fn remove(&self, key: &str) {
        self.lock().pop(key);
    }

    pub(crate) fn clear(&self) {
        self.lock().clear();
    }

    pub(crate) fn purge_expired(&self, now: Instant) -> usize {
        let mut guard = self.lock();
        let stale: Vec<String> = guard
            .iter()
            .filter(|(_, slot)| slot.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            guard.pop(key);
        }
        stale.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, Slot>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provider::ProviderKind;
    use std::time::Duration;

    fn result(v: f32) -> EmbeddingResult {
        EmbeddingResult {
            vector: vec![v, 0.0],
            provider: ProviderKind::Local,
            model: "m".into(),
            dimension: 2,
            latency: Duration::from_millis(1),
            tokens: Some(1),
            cost: Some(0.0),
            cache_hit: false,
        }
    }

    #[test]
    fn evicts_least_recently_used() {
        let l1 = L1Cache::new(NonZeroUsize::new(2).unwrap());
        let now = Instant::now();
        let later = now + Duration::from_secs(60);
        l1.put("a".into(), result(1.0), later);
        l1.put("b".into(), result(2.0), later);
        // touch "a" so "b" becomes the eviction candidate
        assert!(l1.get("a", now).is_some());
        l1.put("c".into(), result(3.0), later);

        assert!(l1.get("a", now).is_some());
        assert!(l1.get("b", now).is_none());
        assert!(l1.get("c", now).is_some());
        assert_eq!(l1.len(), 2);
    }

    #[test]
    fn expired_entries_miss_and_are_dropped() {
        let l1 = L1Cache::new(NonZeroUsize::new(4).unwrap());
        let now = Instant::now();
        l1.put("a".into(), result(1.0), now + Duration::from_millis(5));
        l1.put("b".into(), result(2.0), now + Duration::from_secs(60));

        let after = now + Duration::from_millis(10);
        assert!(l1.get("a", after).is_none());
        assert_eq!(l1.len(), 1);

        l1.put("c".into(), result(3.0), now);
        assert_eq!(l1.purge_expired(after), 1);
        assert_eq!(l1.len(), 1);
    }
}
