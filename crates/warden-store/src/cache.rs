use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// A keyed store whose entries expire `ttl` after insertion.
///
/// Safe to share between tasks. An entry is never returned past its expiry;
/// an expired entry found on read is evicted and reported as a miss.
pub struct TtlCache<K, V> {
    ttl: Duration,
    capacity: Option<usize>,
    entries: Mutex<HashMap<K, Entry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            capacity: None,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// A cache holding at most `capacity` entries. When full, expired entries
    /// go first, then the one closest to expiry.
    pub fn bounded(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: Some(capacity.max(1)),
            entries: Mutex::new(HashMap::with_capacity(capacity)),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.get_at(key, Instant::now())
    }

    pub fn insert(&self, key: K, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    /// Remove an entry. Removing an absent key is a no-op.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let now = Instant::now();
        self.lock()
            .remove(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value)
    }

    /// Drop every expired entry. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    /// Number of stored entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get_at<Q>(&self, key: &Q, now: Instant) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn insert_at(&self, key: K, value: V, now: Instant) {
        let mut entries = self.lock();

        if let Some(capacity) = self.capacity {
            if entries.len() >= capacity && !entries.contains_key(&key) {
                entries.retain(|_, entry| entry.expires_at > now);
            }
            if entries.len() >= capacity && !entries.contains_key(&key) {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.expires_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            key,
            Entry {
                value,
                expires_at: now + self.ttl,
            },
        );
    }

    fn purge_expired_at(&self, now: Instant) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    // A panic while holding the lock cannot leave an entry half-written, so
    // a poisoned map is still consistent.
    fn lock(&self) -> MutexGuard<'_, HashMap<K, Entry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn entries_expire_after_ttl() {
        let cache = TtlCache::new(TTL);
        let start = Instant::now();
        cache.insert_at("sid".to_string(), 1, start);

        assert_eq!(cache.get_at("sid", start + Duration::from_secs(59)), Some(1));
        assert_eq!(cache.get_at("sid", start + TTL), None);
        // The stale read evicted it.
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn reinsert_refreshes_expiry() {
        let cache = TtlCache::new(TTL);
        let start = Instant::now();
        cache.insert_at("k".to_string(), "old", start);
        cache.insert_at("k".to_string(), "new", start + Duration::from_secs(30));

        assert_eq!(cache.get_at("k", start + Duration::from_secs(75)), Some("new"));
    }

    #[test]
    fn remove_is_idempotent() {
        let cache: TtlCache<String, u32> = TtlCache::new(TTL);
        cache.insert("a".to_string(), 7);
        assert_eq!(cache.remove("a"), Some(7));
        assert_eq!(cache.remove("a"), None);
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn purge_drops_only_expired() {
        let cache = TtlCache::new(TTL);
        let start = Instant::now();
        cache.insert_at("old".to_string(), 1, start);
        cache.insert_at("new".to_string(), 2, start + Duration::from_secs(30));

        assert_eq!(cache.purge_expired_at(start + Duration::from_secs(61)), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_at("new", start + Duration::from_secs(61)), Some(2));
    }

    #[test]
    fn bounded_cache_evicts_closest_to_expiry() {
        let cache = TtlCache::bounded(TTL, 2);
        let start = Instant::now();
        cache.insert_at("a".to_string(), 1, start);
        cache.insert_at("b".to_string(), 2, start + Duration::from_secs(1));
        cache.insert_at("c".to_string(), 3, start + Duration::from_secs(2));

        let now = start + Duration::from_secs(3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_at("a", now), None);
        assert_eq!(cache.get_at("b", now), Some(2));
        assert_eq!(cache.get_at("c", now), Some(3));
    }

    #[test]
    fn bounded_cache_prefers_evicting_expired() {
        let cache = TtlCache::bounded(Duration::from_secs(10), 2);
        let start = Instant::now();
        cache.insert_at("a".to_string(), 1, start);
        cache.insert_at("b".to_string(), 2, start + Duration::from_secs(5));
        // "a" has expired by now; both slots must not be lost.
        let now = start + Duration::from_secs(11);
        cache.insert_at("c".to_string(), 3, now);

        assert_eq!(cache.get_at("b", now), Some(2));
        assert_eq!(cache.get_at("c", now), Some(3));
    }

    #[test]
    fn concurrent_writers_do_not_corrupt_the_map() {
        let cache = Arc::new(TtlCache::new(TTL));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let key = format!("{}-{}", t, i % 20);
                        cache.insert(key.clone(), i);
                        let _ = cache.get(key.as_str());
                        if i % 3 == 0 {
                            cache.remove(key.as_str());
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(cache.len() <= 8 * 20);
    }
}
