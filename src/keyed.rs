//! Per-key locked state
//!
//! A map from key to an independently locked record. The outer `RwLock` is
//! held only long enough to find or insert the slot; all mutation happens
//! under the slot's own mutex, so two updates to the same key are linearized
//! while updates to different keys never contend on a shared lock.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

#[derive(Debug)]
pub struct KeyedLocks<K, V> {
    slots: RwLock<HashMap<K, Arc<Mutex<V>>>>,
}

impl<K, V> Default for KeyedLocks<K, V> {
    fn default() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone, V> KeyedLocks<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing slot for `key`, if any
    pub fn get(&self, key: &K) -> Option<Arc<Mutex<V>>> {
        self.slots.read().get(key).cloned()
    }

    /// Slot for `key`, created with `init` on first use
    pub fn get_or_insert_with(&self, key: &K, init: impl FnOnce() -> V) -> Arc<Mutex<V>> {
        if let Some(slot) = self.slots.read().get(key) {
            return slot.clone();
        }
        self.slots
            .write()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(init())))
            .clone()
    }

    /// Run `f` with the slot for `key` locked
    pub fn with<R>(&self, key: &K, init: impl FnOnce() -> V, f: impl FnOnce(&mut V) -> R) -> R {
        let slot = self.get_or_insert_with(key, init);
        let mut guard = slot.lock();
        f(&mut guard)
    }

    /// Snapshot of all slots (locks are not taken)
    pub fn entries(&self) -> Vec<(K, Arc<Mutex<V>>)> {
        self.slots
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn remove(&self, key: &K) -> Option<Arc<Mutex<V>>> {
        self.slots.write().remove(key)
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_same_key_updates_are_linearized() {
        let locks: Arc<KeyedLocks<String, u64>> = Arc::new(KeyedLocks::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        locks.with(&"BTCUSDT".to_string(), || 0, |v| *v += 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let total = locks.with(&"BTCUSDT".to_string(), || 0, |v| *v);
        assert_eq!(total, 8000);
    }

    #[test]
    fn test_independent_keys() {
        let locks: KeyedLocks<&'static str, Vec<u32>> = KeyedLocks::new();
        locks.with(&"a", Vec::new, |v| v.push(1));
        locks.with(&"b", Vec::new, |v| v.push(2));
        assert_eq!(locks.len(), 2);
        assert_eq!(locks.get(&"a").map(|s| s.lock().clone()), Some(vec![1]));
        assert!(locks.remove(&"b").is_some());
        assert!(locks.get(&"b").is_none());
    }
}
