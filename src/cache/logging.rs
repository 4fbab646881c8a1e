use crate::cache::{Cache, CacheKey};
use crate::value::Value;
use log::debug;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Reports the running hit ratio of a namespace cache through the logging
/// facade.
pub struct LoggingCache {
    delegate: Box<dyn Cache>,
    requests: AtomicUsize,
    hits: AtomicUsize,
}

impl LoggingCache {
    pub fn new(delegate: Box<dyn Cache>) -> Self {
        Self {
            delegate,
            requests: AtomicUsize::new(0),
            hits: AtomicUsize::new(0),
        }
    }
}

impl Cache for LoggingCache {
    fn id(&self) -> &str {
        self.delegate.id()
    }

    fn put(&self, key: CacheKey, value: Value) {
        self.delegate.put(key, value);
    }

    fn get(&self, key: &CacheKey) -> Option<Value> {
        let requests = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
        let value = self.delegate.get(key);
        let hits = if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed) + 1
        } else {
            self.hits.load(Ordering::Relaxed)
        };
        debug!(
            "Cache '{}' hit ratio: {:.2}",
            self.id(),
            hits as f64 / requests as f64
        );
        value
    }

    fn remove(&self, key: &CacheKey) -> Option<Value> {
        self.delegate.remove(key)
    }

    fn clear(&self) {
        self.delegate.clear();
    }

    fn size(&self) -> usize {
        self.delegate.size()
    }
}
