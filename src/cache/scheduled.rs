use crate::cache::{Cache, CacheKey};
use crate::value::Value;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Clears the whole delegate once the flush interval has elapsed; the
/// check piggybacks on every operation, no background thread is involved.
pub struct ScheduledCache {
    delegate: Box<dyn Cache>,
    interval: Duration,
    last_clear: Mutex<Instant>,
}

impl ScheduledCache {
    pub fn new(delegate: Box<dyn Cache>, interval: Duration) -> Self {
        Self {
            delegate,
            interval,
            last_clear: Mutex::new(Instant::now()),
        }
    }

    fn clear_when_stale(&self) {
        let mut last = self.last_clear.lock().unwrap();
        if last.elapsed() >= self.interval {
            *last = Instant::now();
            drop(last);
            self.delegate.clear();
        }
    }
}

impl Cache for ScheduledCache {
    fn id(&self) -> &str {
        self.delegate.id()
    }

    fn put(&self, key: CacheKey, value: Value) {
        self.clear_when_stale();
        self.delegate.put(key, value);
    }

    fn get(&self, key: &CacheKey) -> Option<Value> {
        self.clear_when_stale();
        self.delegate.get(key)
    }

    fn remove(&self, key: &CacheKey) -> Option<Value> {
        self.clear_when_stale();
        self.delegate.remove(key)
    }

    fn clear(&self) {
        *self.last_clear.lock().unwrap() = Instant::now();
        self.delegate.clear();
    }

    fn size(&self) -> usize {
        self.delegate.size()
    }
}
