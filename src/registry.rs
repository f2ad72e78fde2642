// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! A minimal in-process keyed registry used wherever the CORE needs to
//! resolve an identifier to the entity it names (§3: "references are by
//! identifier and must be resolvable at cue-entry time or the cue
//! fails"). Real persistence is external (§1) — this is just enough
//! shared state for the router/executor and the demonstration HTTP
//! surface to operate without a database, mirroring the teacher's
//! `Arc<RwLock<...>>` shared-index pattern.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::RwLock;

#[derive(Clone)]
pub struct Registry<K, V> {
    inner: Arc<RwLock<HashMap<K, V>>>,
}

impl<K: Eq + Hash + Clone, V: Clone> Registry<K, V> {
    pub fn new() -> Self {
        Self { inner: Arc::new(RwLock::new(HashMap::new())) }
    }

    pub fn insert(&self, id: K, value: V) {
        self.inner.write().insert(id, value);
    }

    pub fn get(&self, id: &K) -> Option<V> {
        self.inner.read().get(id).cloned()
    }

    pub fn remove(&self, id: &K) -> Option<V> {
        self.inner.write().remove(id)
    }

    pub fn all(&self) -> Vec<V> {
        self.inner.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Default for Registry<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove_roundtrip() {
        let reg: Registry<u32, &str> = Registry::new();
        reg.insert(1, "a");
        assert_eq!(reg.get(&1), Some("a"));
        assert_eq!(reg.remove(&1), Some("a"));
        assert!(reg.is_empty());
    }
}
