use std::{collections::HashMap, hash::Hash, sync::RwLock};

/// A very basic concurrent hashmap that is hard to misuse in an async context.
/// A lock is only ever held for the duration of one call, so no guard can live across an `.await`.
#[derive(Default)]
pub struct SafeMap<K: Hash + Eq, V>(RwLock<HashMap<K, V>>);

impl<K: Hash + Eq, V> SafeMap<K, V> {
    pub fn new() -> Self { Self(RwLock::new(HashMap::new())) }

    pub fn insert(&self, key: K, value: V) { self.0.write().expect("Failed to lock the map").insert(key, value); }

    pub fn remove(&self, key: &K) -> Option<V> { self.0.write().expect("Failed to lock the map").remove(key) }

    pub fn is_empty(&self) -> bool { self.0.read().expect("Failed to lock the map").is_empty() }
    pub fn len(&self) -> usize { self.0.read().expect("Failed to lock the map").len() }

    pub fn clear(&self) { self.0.write().expect("Failed to lock the map").clear(); }

    pub fn contains_key(&self, key: &K) -> bool { self.0.read().expect("Failed to lock the map").contains_key(key) }
}

impl<K: Hash + Eq, V> SafeMap<K, V>
where V: Clone
{
    pub fn get(&self, k: &K) -> Option<V> { self.0.read().expect("Failed to lock the map").get(k).cloned() }
}

impl<K: Hash + Eq, V> SafeMap<K, V>
where V: Default
{
    /// Modify the value under `key` in place, starting from the default when absent
    pub fn update<R>(&self, key: K, f: impl FnOnce(&mut V) -> R) -> R { f(self.0.write().expect("Failed to lock the map").entry(key).or_default()) }
}

impl<K: Hash + Eq> SafeMap<K, usize> {
    /// Bump a counter, returning the new count
    pub fn increment(&self, key: K) -> usize {
        self.update(key, |count| {
            *count += 1;
            *count
        })
    }

    /// Zero when the key was never counted
    pub fn count(&self, key: &K) -> usize { self.get(key).unwrap_or(0) }
}

impl<K: Hash + Eq + Clone, V: Clone> SafeMap<K, V> {
    pub fn to_vec(&self) -> Vec<(K, V)> {
        self.0.read().expect("Failed to lock the map").iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

impl<K: Hash + Eq + std::fmt::Debug, V: std::fmt::Debug> std::fmt::Debug for SafeMap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SafeMap {{ {:?} }}", self.0.read().expect("Failed to lock the map"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let counters: SafeMap<&str, usize> = SafeMap::new();
        assert_eq!(counters.count(&"loads"), 0);
        counters.increment("loads");
        assert_eq!(counters.increment("loads"), 2);
        counters.update("loads", |c| *c = 10);
        assert_eq!(counters.get(&"loads"), Some(10));
        assert_eq!(counters.len(), 1);
    }
}
