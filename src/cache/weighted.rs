//! Weighted LRU store: the physically-resident part of a tier.
//!
//! Entries are kept in an index-arena doubly-linked list ordered by recency,
//! with a hash map from key to arena slot. `put`, `get`, `delete` and
//! `least_recently_used` are O(1). The store only accounts weight; deciding
//! when to evict is the owning [`SpillCache`](crate::cache::spill::SpillCache)'s job.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use crate::cache::weigher::Weigher;
use crate::error::CacheError;

/// Sentinel indices in the `nodes` arena.
const HEAD: usize = 0; // most-recently-used end
const TAIL: usize = 1; // least-recently-used end
const NULL: usize = usize::MAX;

struct Entry<K, V> {
    key: K,
    value: V,
    weight: u64,
}

struct Node<K, V> {
    /// `None` for the sentinels and for free slots.
    entry: Option<Entry<K, V>>,
    /// Index toward HEAD (more recently used).
    prev: usize,
    /// Index toward TAIL (less recently used).
    next: usize,
}

pub struct WeightedStore<K, V, W> {
    /// Index 0 = HEAD sentinel, 1 = TAIL sentinel, 2+ = real entries.
    nodes: Vec<Node<K, V>>,
    /// Maps a key to its index in `nodes`.
    map: HashMap<K, usize>,
    /// Indices of freed (reusable) slots.
    free_list: Vec<usize>,
    total_weight: u64,
    weigher: W,
}

impl<K, V, W> WeightedStore<K, V, W>
where
    K: Hash + Eq + Clone + Debug,
    W: Weigher<V>,
{
    pub fn new(weigher: W) -> Self {
        let nodes = vec![
            Node {
                entry: None,
                prev: NULL,
                next: TAIL,
            },
            Node {
                entry: None,
                prev: HEAD,
                next: NULL,
            },
        ];

        Self {
            nodes,
            map: HashMap::new(),
            free_list: Vec::new(),
            total_weight: 0,
            weigher,
        }
    }

    /// Links `idx` immediately after the HEAD sentinel (marks it most-recently-used).
    fn link_after_head(&mut self, idx: usize) {
        let old_first = self.nodes[HEAD].next;
        self.nodes[idx].prev = HEAD;
        self.nodes[idx].next = old_first;
        self.nodes[HEAD].next = idx;
        self.nodes[old_first].prev = idx;
    }

    /// Detaches `idx` from its current position in the list.
    fn unlink(&mut self, idx: usize) {
        let prev = self.nodes[idx].prev;
        let next = self.nodes[idx].next;
        self.nodes[prev].next = next;
        self.nodes[next].prev = prev;
        self.nodes[idx].prev = NULL;
        self.nodes[idx].next = NULL;
    }

    fn touch(&mut self, idx: usize) {
        self.unlink(idx);
        self.link_after_head(idx);
    }

    fn alloc_node(&mut self, entry: Entry<K, V>) -> usize {
        if let Some(idx) = self.free_list.pop() {
            self.nodes[idx].entry = Some(entry);
            idx
        } else {
            self.nodes.push(Node {
                entry: Some(entry),
                prev: NULL,
                next: NULL,
            });
            self.nodes.len() - 1
        }
    }

    /// Insert or replace `key`, making it most-recently-used.
    ///
    /// Returns the replaced value, if any.
    pub fn put(&mut self, key: K, value: V) -> Option<V> {
        let weight = self.weigher.weigh(&value);

        if let Some(&idx) = self.map.get(&key) {
            if let Some(entry) = self.nodes[idx].entry.as_mut() {
                let old_value = std::mem::replace(&mut entry.value, value);
                self.total_weight = self.total_weight - entry.weight + weight;
                entry.weight = weight;
                self.touch(idx);
                return Some(old_value);
            }
        }

        let idx = self.alloc_node(Entry {
            key: key.clone(),
            value,
            weight,
        });
        self.map.insert(key, idx);
        self.link_after_head(idx);
        self.total_weight += weight;
        None
    }

    /// Look up `key` and mark it most-recently-used.
    pub fn get(&mut self, key: &K) -> Result<&V, CacheError> {
        let idx = *self
            .map
            .get(key)
            .ok_or_else(|| CacheError::not_found(key))?;
        self.touch(idx);
        self.nodes[idx]
            .entry
            .as_ref()
            .map(|entry| &entry.value)
            .ok_or_else(|| CacheError::not_found(key))
    }

    /// Look up `key` without changing recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        let idx = *self.map.get(key)?;
        self.nodes[idx].entry.as_ref().map(|entry| &entry.value)
    }

    /// Remove `key`, returning its value.
    pub fn delete(&mut self, key: &K) -> Result<V, CacheError> {
        let idx = self
            .map
            .remove(key)
            .ok_or_else(|| CacheError::not_found(key))?;
        self.unlink(idx);
        let entry = self.nodes[idx]
            .entry
            .take()
            .ok_or_else(|| CacheError::not_found(key))?;
        self.free_list.push(idx);
        self.total_weight -= entry.weight;
        Ok(entry.value)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    pub fn weight_of(&self, key: &K) -> Option<u64> {
        let idx = *self.map.get(key)?;
        self.nodes[idx].entry.as_ref().map(|entry| entry.weight)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }

    /// The key at the least-recently-used end, without removing it.
    pub fn least_recently_used(&self) -> Option<&K> {
        let idx = self.nodes[TAIL].prev;
        if idx == HEAD {
            return None;
        }
        self.nodes[idx].entry.as_ref().map(|entry| &entry.key)
    }

    /// Keys from least- to most-recently-used.
    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys {
            nodes: &self.nodes,
            cursor: self.nodes[TAIL].prev,
            remaining: self.map.len(),
        }
    }
}

/// Iterator over a [`WeightedStore`]'s keys, oldest first.
pub struct Keys<'a, K, V> {
    nodes: &'a [Node<K, V>],
    cursor: usize,
    remaining: usize,
}

impl<'a, K, V> Iterator for Keys<'a, K, V> {
    type Item = &'a K;

    fn next(&mut self) -> Option<&'a K> {
        if self.cursor == HEAD || self.cursor == NULL {
            return None;
        }
        let node = &self.nodes[self.cursor];
        self.cursor = node.prev;
        self.remaining = self.remaining.saturating_sub(1);
        node.entry.as_ref().map(|entry| &entry.key)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Keys<'_, K, V> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::weigher::SizeofWeigher;

    fn store() -> WeightedStore<&'static str, Vec<u8>, SizeofWeigher> {
        WeightedStore::new(SizeofWeigher)
    }

    #[test]
    fn test_put_accounts_weight() {
        let mut store = store();
        store.put("a", vec![0u8; 10]);
        store.put("b", vec![0u8; 5]);
        assert_eq!(store.total_weight(), 15);
        assert_eq!(store.len(), 2);

        // Replacing updates the total instead of adding to it.
        let old = store.put("a", vec![0u8; 3]);
        assert_eq!(old.map(|v| v.len()), Some(10));
        assert_eq!(store.total_weight(), 8);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_get_refreshes_recency() {
        let mut store = store();
        store.put("a", vec![1]);
        store.put("b", vec![2]);
        assert_eq!(store.least_recently_used(), Some(&"a"));

        store.get(&"a").unwrap();
        assert_eq!(store.least_recently_used(), Some(&"b"));

        // peek does not.
        store.peek(&"b").unwrap();
        assert_eq!(store.least_recently_used(), Some(&"b"));
    }

    #[test]
    fn test_replace_moves_to_mru() {
        let mut store = store();
        store.put("a", vec![1]);
        store.put("b", vec![2]);
        store.put("a", vec![3]);
        assert_eq!(store.keys().copied().collect::<Vec<_>>(), vec!["b", "a"]);
    }

    #[test]
    fn test_delete_and_missing_keys() {
        let mut store = store();
        store.put("a", vec![0u8; 4]);
        assert_eq!(store.delete(&"a").unwrap(), vec![0u8; 4]);
        assert_eq!(store.total_weight(), 0);
        assert!(store.is_empty());
        assert_eq!(store.least_recently_used(), None);

        assert!(store.get(&"a").unwrap_err().is_not_found());
        assert!(store.delete(&"a").unwrap_err().is_not_found());
    }

    #[test]
    fn test_slots_are_reused() {
        let mut store = store();
        for round in 0..3 {
            store.put("x", vec![round]);
            store.put("y", vec![round]);
            store.delete(&"x").unwrap();
            store.delete(&"y").unwrap();
        }
        // Two sentinels plus two reusable slots.
        assert_eq!(store.nodes.len(), 4);
    }

    #[test]
    fn test_keys_oldest_first() {
        let mut store = store();
        for key in ["a", "b", "c", "d"] {
            store.put(key, vec![0]);
        }
        store.get(&"b").unwrap();
        store.delete(&"c").unwrap();

        let keys: Vec<_> = store.keys().copied().collect();
        assert_eq!(keys, vec!["a", "d", "b"]);
        assert_eq!(store.keys().len(), 3);
    }
}
