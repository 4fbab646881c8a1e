use crate::cache::{Cache, CacheKey};
use crate::value::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

/// First-in-first-out eviction by insertion order.
pub struct FifoCache {
    delegate: Box<dyn Cache>,
    queue: Mutex<VecDeque<CacheKey>>,
    size: usize,
}

impl FifoCache {
    pub fn new(delegate: Box<dyn Cache>, size: usize) -> Self {
        Self {
            delegate,
            queue: Mutex::new(VecDeque::new()),
            size: size.max(1),
        }
    }
}

impl Cache for FifoCache {
    fn id(&self) -> &str {
        self.delegate.id()
    }

    fn put(&self, key: CacheKey, value: Value) {
        let evicted = {
            let mut queue = self.queue.lock().unwrap();
            queue.push_back(key.clone());
            if queue.len() > self.size {
                queue.pop_front()
            } else {
                None
            }
        };
        self.delegate.put(key, value);
        if let Some(oldest) = evicted {
            self.delegate.remove(&oldest);
        }
    }

    fn get(&self, key: &CacheKey) -> Option<Value> {
        self.delegate.get(key)
    }

    fn remove(&self, key: &CacheKey) -> Option<Value> {
        self.delegate.remove(key)
    }

    fn clear(&self) {
        self.queue.lock().unwrap().clear();
        self.delegate.clear();
    }

    fn size(&self) -> usize {
        self.delegate.size()
    }
}
