use crate::cache::{Cache, CacheKey};
use crate::value::Value;

/// Copy-semantics boundary for read-write caches: entries are deep-copied
/// on the way in and out, so a caller mutating a returned result list never
/// corrupts the shared entry. `Value` trees own all their data, which makes
/// the deep copy a plain clone of the stored tree.
pub struct SerializedCache {
    delegate: Box<dyn Cache>,
}

impl SerializedCache {
    pub fn new(delegate: Box<dyn Cache>) -> Self {
        Self { delegate }
    }
}

impl Cache for SerializedCache {
    fn id(&self) -> &str {
        self.delegate.id()
    }

    fn put(&self, key: CacheKey, value: Value) {
        self.delegate.put(key, value.clone());
    }

    fn get(&self, key: &CacheKey) -> Option<Value> {
        self.delegate.get(key)
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
