use std::collections::BTreeMap;

/// Generic ordered keyed container, used for the mount registry, a
/// source's client set, and the persistent per-mount statistics table.
///
/// `std::collections::BTreeMap` already gives us a balanced ordered tree,
/// so this is a thin wrapper exposing the two insert semantics callers
/// actually need: refuse-if-present (`insert_new`) and
/// overwrite-and-return-prior (`replace`).
#[derive(Debug, Clone)]
pub struct OrderedMap<K, V> {
    inner: BTreeMap<K, V>,
}

impl<K: Ord, V> OrderedMap<K, V> {
    pub fn new() -> Self {
        Self {
            inner: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.inner.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.inner.get_mut(key)
    }

    /// Inserts only if the key is absent. Returns `false`
    /// (and leaves the map untouched) if the key was already present.
    pub fn insert_new(&mut self, key: K, value: V) -> bool {
        if self.inner.contains_key(&key) {
            return false;
        }
        self.inner.insert(key, value);
        true
    }

    /// Inserts unconditionally, returning the prior value if there was
    /// one.
    pub fn replace(&mut self, key: K, value: V) -> Option<V> {
        self.inner.insert(key, value)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.inner.remove(key)
    }

    /// In-order traversal, ordered by key.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.inner.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.inner.values()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.inner.values_mut()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.inner.keys()
    }
}

impl<K: Ord, V> Default for OrderedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_new_refuses_duplicates() {
        let mut m = OrderedMap::new();
        assert!(m.insert_new("/RTCM3", 1));
        assert!(!m.insert_new("/RTCM3", 2));
        assert_eq!(m.get(&"/RTCM3"), Some(&1));
    }

    #[test]
    fn replace_returns_prior_value() {
        let mut m = OrderedMap::new();
        assert_eq!(m.replace("/RTCM3", 1), None);
        assert_eq!(m.replace("/RTCM3", 2), Some(1));
        assert_eq!(m.get(&"/RTCM3"), Some(&2));
    }

    #[test]
    fn iter_is_key_ordered() {
        let mut m = OrderedMap::new();
        m.insert_new(3, "c");
        m.insert_new(1, "a");
        m.insert_new(2, "b");
        let keys: Vec<_> = m.keys().copied().collect();
        assert_eq!(keys, vec![1, 2, 3]);
    }
}
