use crate::cache::{Cache, CacheKey};
use crate::value::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Session-side staging area in front of a shared namespace cache: writes
/// are withheld until commit and discarded on rollback, so other sessions
/// never observe uncommitted results.
pub struct TransactionalCache {
    delegate: Arc<dyn Cache>,
    clear_on_commit: bool,
    entries_to_add: HashMap<CacheKey, Value>,
    entries_missed: HashSet<CacheKey>,
}

impl TransactionalCache {
    pub fn new(delegate: Arc<dyn Cache>) -> Self {
        Self {
            delegate,
            clear_on_commit: false,
            entries_to_add: HashMap::new(),
            entries_missed: HashSet::new(),
        }
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<Value> {
        let value = self.delegate.get(key);
        if value.is_none() {
            self.entries_missed.insert(key.clone());
        }
        // A pending clear makes the shared content stale for this session.
        if self.clear_on_commit { None } else { value }
    }

    pub fn put(&mut self, key: CacheKey, value: Value) {
        self.entries_to_add.insert(key, value);
    }

    pub fn clear(&mut self) {
        self.clear_on_commit = true;
        self.entries_to_add.clear();
    }

    pub fn commit(&mut self) {
        if self.clear_on_commit {
            self.delegate.clear();
        }
        for (key, value) in self.entries_to_add.drain() {
            self.entries_missed.remove(&key);
            self.delegate.put(key, value);
        }
        // Unlock keys a blocking cache may still hold for our misses.
        for key in self.entries_missed.drain() {
            self.delegate.remove(&key);
        }
        self.clear_on_commit = false;
    }

    pub fn rollback(&mut self) {
        for key in self.entries_missed.drain() {
            self.delegate.remove(&key);
        }
        self.entries_to_add.clear();
        self.clear_on_commit = false;
    }
}

/// Tracks one transactional wrapper per namespace cache touched in a
/// session.
#[derive(Default)]
pub struct TransactionalCacheManager {
    caches: HashMap<String, TransactionalCache>,
}

impl TransactionalCacheManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn wrapper(&mut self, cache: &Arc<dyn Cache>) -> &mut TransactionalCache {
        self.caches
            .entry(cache.id().to_string())
            .or_insert_with(|| TransactionalCache::new(cache.clone()))
    }

    pub fn get(&mut self, cache: &Arc<dyn Cache>, key: &CacheKey) -> Option<Value> {
        self.wrapper(cache).get(key)
    }

    pub fn put(&mut self, cache: &Arc<dyn Cache>, key: CacheKey, value: Value) {
        self.wrapper(cache).put(key, value);
    }

    pub fn clear(&mut self, cache: &Arc<dyn Cache>) {
        self.wrapper(cache).clear();
    }

    pub fn commit(&mut self) {
        for tc in self.caches.values_mut() {
            tc.commit();
        }
    }

    pub fn rollback(&mut self) {
        for tc in self.caches.values_mut() {
            tc.rollback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::perpetual::PerpetualCache;

    fn key(n: i64) -> CacheKey {
        let mut k = CacheKey::new();
        k.update(Value::Long(n));
        k
    }

    #[test]
    fn test_writes_deferred_until_commit() {
        let shared: Arc<dyn Cache> = Arc::new(PerpetualCache::new("ns"));
        let mut tc = TransactionalCache::new(shared.clone());

        tc.put(key(1), Value::Long(10));
        assert!(shared.get(&key(1)).is_none());

        tc.commit();
        assert_eq!(shared.get(&key(1)), Some(Value::Long(10)));
    }

    #[test]
    fn test_rollback_discards() {
        let shared: Arc<dyn Cache> = Arc::new(PerpetualCache::new("ns"));
        let mut tc = TransactionalCache::new(shared.clone());
        tc.put(key(1), Value::Long(10));
        tc.rollback();
        tc.commit();
        assert!(shared.get(&key(1)).is_none());
    }

    #[test]
    fn test_pending_clear_masks_reads_then_applies() {
        let shared: Arc<dyn Cache> = Arc::new(PerpetualCache::new("ns"));
        shared.put(key(1), Value::Long(10));
        let mut tc = TransactionalCache::new(shared.clone());

        tc.clear();
        assert!(tc.get(&key(1)).is_none());
        assert!(shared.get(&key(1)).is_some());

        tc.commit();
        assert!(shared.get(&key(1)).is_none());
    }
}
