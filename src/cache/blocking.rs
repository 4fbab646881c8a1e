use crate::cache::{Cache, CacheKey};
use crate::value::Value;
use dashmap::DashMap;
use log::warn;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

struct Latch {
    held: Mutex<bool>,
    released: Condvar,
}

/// Stricter coherence for cold entries: a miss leaves the per-key latch
/// held until the missing value is put (or the key is released), so only
/// one session computes a cold entry while the rest wait.
pub struct BlockingCache {
    delegate: Box<dyn Cache>,
    latches: DashMap<CacheKey, Arc<Latch>>,
    timeout: Option<Duration>,
}

impl BlockingCache {
    pub fn new(delegate: Box<dyn Cache>, timeout: Option<Duration>) -> Self {
        Self {
            delegate,
            latches: DashMap::new(),
            timeout,
        }
    }

    fn acquire(&self, key: &CacheKey) {
        let latch = self
            .latches
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(Latch {
                    held: Mutex::new(false),
                    released: Condvar::new(),
                })
            })
            .clone();

        let mut held = latch.held.lock().unwrap();
        while *held {
            match self.timeout {
                None => held = latch.released.wait(held).unwrap(),
                Some(limit) => {
                    let (guard, result) = latch.released.wait_timeout(held, limit).unwrap();
                    held = guard;
                    if result.timed_out() && *held {
                        warn!(
                            "Cache '{}': timed out waiting {}ms for a locked key",
                            self.id(),
                            limit.as_millis()
                        );
                        break;
                    }
                }
            }
        }
        *held = true;
    }

    fn release(&self, key: &CacheKey) {
        if let Some(latch) = self.latches.get(key).map(|l| l.clone()) {
            *latch.held.lock().unwrap() = false;
            latch.released.notify_one();
        }
    }
}

impl Cache for BlockingCache {
    fn id(&self) -> &str {
        self.delegate.id()
    }

    fn put(&self, key: CacheKey, value: Value) {
        self.delegate.put(key.clone(), value);
        self.release(&key);
    }

    fn get(&self, key: &CacheKey) -> Option<Value> {
        self.acquire(key);
        let value = self.delegate.get(key);
        if value.is_some() {
            self.release(key);
        }
        value
    }

    /// Releases the key's latch without touching the stored value, which is
    /// how a failed computation lets the next waiter proceed.
    fn remove(&self, key: &CacheKey) -> Option<Value> {
        self.release(key);
        None
    }

    fn clear(&self) {
        self.delegate.clear();
    }

    fn size(&self) -> usize {
        self.delegate.size()
    }
}
