use crate::cache::{Cache, CacheKey};
use crate::value::Value;
use std::sync::Mutex;

/// Serializes every operation on the underlying store with one lock, so a
/// user-supplied base cache does not need to be internally synchronized.
pub struct SynchronizedCache {
    delegate: Box<dyn Cache>,
    lock: Mutex<()>,
}

impl SynchronizedCache {
    pub fn new(delegate: Box<dyn Cache>) -> Self {
        Self {
            delegate,
            lock: Mutex::new(()),
        }
    }
}

impl Cache for SynchronizedCache {
    fn id(&self) -> &str {
        self.delegate.id()
    }

    fn put(&self, key: CacheKey, value: Value) {
        let _guard = self.lock.lock().unwrap();
        self.delegate.put(key, value);
    }

    fn get(&self, key: &CacheKey) -> Option<Value> {
        let _guard = self.lock.lock().unwrap();
        self.delegate.get(key)
    }

    fn remove(&self, key: &CacheKey) -> Option<Value> {
        let _guard = self.lock.lock().unwrap();
        self.delegate.remove(key)
    }

    fn clear(&self) {
        let _guard = self.lock.lock().unwrap();
        self.delegate.clear();
    }

    fn size(&self) -> usize {
        let _guard = self.lock.lock().unwrap();
        self.delegate.size()
    }
}
