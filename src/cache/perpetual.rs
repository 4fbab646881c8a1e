use crate::cache::{Cache, CacheKey};
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Mutex;

/// Identity base cache: an unbounded map. Eviction, logging, coherence and
/// copy semantics are layered on by decorators.
pub struct PerpetualCache {
    id: String,
    store: Mutex<HashMap<CacheKey, Value>>,
}

impl PerpetualCache {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            store: Mutex::new(HashMap::new()),
        }
    }
}

impl Cache for PerpetualCache {
    fn id(&self) -> &str {
        &self.id
    }

    fn put(&self, key: CacheKey, value: Value) {
        self.store.lock().unwrap().insert(key, value);
    }

    fn get(&self, key: &CacheKey) -> Option<Value> {
        self.store.lock().unwrap().get(key).cloned()
    }

    fn remove(&self, key: &CacheKey) -> Option<Value> {
        self.store.lock().unwrap().remove(key)
    }

    fn clear(&self) {
        self.store.lock().unwrap().clear();
    }

    fn size(&self) -> usize {
        self.store.lock().unwrap().len()
    }
}
