use crate::value::{Value, value_hash};
use std::hash::{Hash, Hasher};

const DEFAULT_MULTIPLIER: i64 = 37;
const DEFAULT_HASHCODE: i64 = 17;

/// Composite cache key built by appending an ordered sequence of component
/// values (statement id, row bounds, SQL text, parameter values,
/// environment id).
///
/// Equality requires equal running hash, equal cumulative checksum, equal
/// component count, and component-wise equality; the running hash alone
/// only serves as a fast reject. Cloning yields an independent key that can
/// keep growing, which is how compound parent/child keys are formed during
/// nested-result projection.
#[derive(Debug, Clone)]
pub struct CacheKey {
    hashcode: i64,
    checksum: i64,
    count: usize,
    update_list: Vec<Value>,
}

impl Default for CacheKey {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheKey {
    pub fn new() -> Self {
        CacheKey {
            hashcode: DEFAULT_HASHCODE,
            checksum: 0,
            count: 0,
            update_list: Vec::new(),
        }
    }

    pub fn update(&mut self, value: Value) {
        let base = value_hash(&value);
        self.count += 1;
        self.checksum = self.checksum.wrapping_add(base);
        self.hashcode = DEFAULT_MULTIPLIER
            .wrapping_mul(self.hashcode)
            .wrapping_add(base.wrapping_mul(self.count as i64));
        self.update_list.push(value);
    }

    pub fn update_all(&mut self, values: impl IntoIterator<Item = Value>) {
        for v in values {
            self.update(v);
        }
    }

    pub fn component_count(&self) -> usize {
        self.count
    }

    pub fn components(&self) -> &[Value] {
        &self.update_list
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.hashcode == other.hashcode
            && self.checksum == other.checksum
            && self.count == other.count
            && self.update_list == other.update_list
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_i64(self.hashcode);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_sequence_equal() {
        let mut a = CacheKey::new();
        let mut b = CacheKey::new();
        for k in [&mut a, &mut b] {
            k.update(Value::Text("ns.select".to_string()));
            k.update(Value::Long(0));
            k.update(Value::Text("SELECT 1".to_string()));
        }
        assert_eq!(a, b);

        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut ha = DefaultHasher::new();
        let mut hb = DefaultHasher::new();
        a.hash(&mut ha);
        b.hash(&mut hb);
        assert_eq!(ha.finish(), hb.finish());
    }

    #[test]
    fn test_different_sequence_unequal() {
        let mut a = CacheKey::new();
        a.update(Value::Long(1));
        a.update(Value::Long(2));
        let mut b = CacheKey::new();
        b.update(Value::Long(2));
        b.update(Value::Long(1));
        assert_ne!(a, b);

        let mut c = CacheKey::new();
        c.update(Value::Long(1));
        assert_ne!(a, c);
    }

    #[test]
    fn test_clone_extends_independently() {
        let mut parent = CacheKey::new();
        parent.update(Value::Text("row".to_string()));
        let mut child = parent.clone();
        child.update(Value::Long(1));
        assert_ne!(parent, child);
        assert_eq!(parent.component_count(), 1);
        assert_eq!(child.component_count(), 2);
    }

    #[test]
    fn test_null_components_still_counted() {
        let mut a = CacheKey::new();
        a.update(Value::Null);
        let mut b = CacheKey::new();
        b.update(Value::Null);
        b.update(Value::Null);
        assert_ne!(a, b);
    }
}
