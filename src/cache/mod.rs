pub mod blocking;
pub mod fifo;
mod key;
pub mod logging;
pub mod lru;
pub mod perpetual;
pub mod scheduled;
pub mod serialized;
pub mod synchronized;
pub mod transactional;

pub use key::CacheKey;

use crate::error::Error;
use crate::value::Value;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use blocking::BlockingCache;
use fifo::FifoCache;
use logging::LoggingCache;
use lru::LruCache;
use perpetual::PerpetualCache;
use scheduled::ScheduledCache;
use serialized::SerializedCache;
use synchronized::SynchronizedCache;

/// Named key-value store shared by every session of a namespace. The
/// engine only depends on this interface; the standard decorators compose
/// over an identity base, and user-supplied bases plug in unchanged.
pub trait Cache: Send + Sync {
    fn id(&self) -> &str;
    fn put(&self, key: CacheKey, value: Value);
    fn get(&self, key: &CacheKey) -> Option<Value>;
    fn remove(&self, key: &CacheKey) -> Option<Value>;
    fn clear(&self);
    fn size(&self) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Eviction {
    #[default]
    Lru,
    Fifo,
    None,
}

impl FromStr for Eviction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.to_ascii_uppercase().as_str() {
            "LRU" => Ok(Eviction::Lru),
            "FIFO" => Ok(Eviction::Fifo),
            "NONE" | "PERPETUAL" => Ok(Eviction::None),
            other => Err(Error::builder(format!("unknown eviction policy '{}'", other))),
        }
    }
}

const DEFAULT_SIZE: usize = 1024;

/// Composes the decorator stack for a namespace cache in fixed order:
/// eviction over the base, then scheduled flushing, copy semantics,
/// logging, synchronization, and optionally per-key blocking. A
/// user-supplied base is assumed to manage its own eviction, so the
/// default eviction decorator is skipped.
pub struct CacheBuilder {
    id: String,
    base: Option<Box<dyn Cache>>,
    eviction: Eviction,
    size: Option<usize>,
    flush_interval: Option<Duration>,
    read_write: bool,
    blocking: bool,
}

impl CacheBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base: None,
            eviction: Eviction::Lru,
            size: None,
            flush_interval: None,
            read_write: true,
            blocking: false,
        }
    }

    pub fn base(mut self, base: Box<dyn Cache>) -> Self {
        self.base = Some(base);
        self
    }

    pub fn eviction(mut self, eviction: Eviction) -> Self {
        self.eviction = eviction;
        self
    }

    pub fn size(mut self, size: Option<usize>) -> Self {
        self.size = size;
        self
    }

    pub fn flush_interval(mut self, interval: Option<Duration>) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn read_write(mut self, read_write: bool) -> Self {
        self.read_write = read_write;
        self
    }

    pub fn blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    pub fn build(self) -> Arc<dyn Cache> {
        let custom_base = self.base.is_some();
        let mut cache: Box<dyn Cache> = self
            .base
            .unwrap_or_else(|| Box::new(PerpetualCache::new(self.id)));

        if !custom_base {
            let size = self.size.unwrap_or(DEFAULT_SIZE);
            cache = match self.eviction {
                Eviction::Lru => Box::new(LruCache::new(cache, size)),
                Eviction::Fifo => Box::new(FifoCache::new(cache, size)),
                Eviction::None => cache,
            };
        }
        if let Some(interval) = self.flush_interval {
            cache = Box::new(ScheduledCache::new(cache, interval));
        }
        if self.read_write {
            cache = Box::new(SerializedCache::new(cache));
        }
        cache = Box::new(LoggingCache::new(cache));
        cache = Box::new(SynchronizedCache::new(cache));
        if self.blocking {
            cache = Box::new(BlockingCache::new(cache, None));
        }
        Arc::from(cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_stack_round_trip() {
        let cache = CacheBuilder::new("ns.cache").build();
        let mut key = CacheKey::new();
        key.update(Value::Text("q".to_string()));
        cache.put(key.clone(), Value::List(vec![Value::Long(1)]));
        assert_eq!(cache.get(&key), Some(Value::List(vec![Value::Long(1)])));
        cache.clear();
        assert_eq!(cache.get(&key), None);
    }

    #[test]
    fn test_fifo_eviction_bounds_size() {
        let cache = CacheBuilder::new("ns.fifo")
            .eviction(Eviction::Fifo)
            .size(Some(2))
            .build();
        for i in 0..3 {
            let mut key = CacheKey::new();
            key.update(Value::Long(i));
            cache.put(key, Value::Long(i));
        }
        let mut first = CacheKey::new();
        first.update(Value::Long(0));
        assert!(cache.get(&first).is_none());
        assert_eq!(cache.size(), 2);
    }
}
