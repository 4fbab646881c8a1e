use crate::cache::{Cache, CacheKey};
use crate::value::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Least-recently-used eviction: tracks key recency beside the delegate and
/// drops the coldest entry once the size limit is exceeded.
pub struct LruCache {
    delegate: Box<dyn Cache>,
    order: Mutex<VecDeque<CacheKey>>,
    size: usize,
}

impl LruCache {
    pub fn new(delegate: Box<dyn Cache>, size: usize) -> Self {
        Self {
            delegate,
            order: Mutex::new(VecDeque::new()),
            size: size.max(1),
        }
    }

    fn touch(&self, key: &CacheKey) {
        let mut order = self.order.lock().unwrap();
        if let Some(pos) = order.iter().position(|k| k == key) {
            let k = order.remove(pos).unwrap();
            order.push_back(k);
        }
    }
}

impl Cache for LruCache {
    fn id(&self) -> &str {
        self.delegate.id()
    }

    fn put(&self, key: CacheKey, value: Value) {
        let evicted = {
            let mut order = self.order.lock().unwrap();
            if let Some(pos) = order.iter().position(|k| k == &key) {
                order.remove(pos);
            }
            order.push_back(key.clone());
            if order.len() > self.size {
                order.pop_front()
            } else {
                None
            }
        };
        self.delegate.put(key, value);
        if let Some(cold) = evicted {
            self.delegate.remove(&cold);
        }
    }

    fn get(&self, key: &CacheKey) -> Option<Value> {
        let value = self.delegate.get(key);
        if value.is_some() {
            self.touch(key);
        }
        value
    }

    fn remove(&self, key: &CacheKey) -> Option<Value> {
        let mut order = self.order.lock().unwrap();
        if let Some(pos) = order.iter().position(|k| k == key) {
            order.remove(pos);
        }
        drop(order);
        self.delegate.remove(key)
    }

    fn clear(&self) {
        self.order.lock().unwrap().clear();
        self.delegate.clear();
    }

    fn size(&self) -> usize {
        self.delegate.size()
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
    fn test_coldest_entry_evicted() {
        let cache = LruCache::new(Box::new(PerpetualCache::new("t")), 2);
        cache.put(key(1), Value::Long(1));
        cache.put(key(2), Value::Long(2));
        // Touch 1 so 2 becomes the eviction candidate.
        assert!(cache.get(&key(1)).is_some());
        cache.put(key(3), Value::Long(3));
        assert!(cache.get(&key(2)).is_none());
        assert!(cache.get(&key(1)).is_some());
        assert!(cache.get(&key(3)).is_some());
    }
}
