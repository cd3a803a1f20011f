//! The next-level store interface a spill cache writes into.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use crate::error::CacheError;

/// A keyed store one tier down.
///
/// Implemented by [`SpillCache`](crate::cache::spill::SpillCache) (so caches
/// nest), [`PersistentStore`](crate::storage::PersistentStore) (the disk
/// tier) and `HashMap` (an unbounded in-memory tier).
pub trait Store<K> {
    type Value;

    /// Insert or replace `key`. On failure the store is unchanged for `key`.
    fn put(&mut self, key: K, value: Self::Value) -> Result<(), CacheError>;

    /// Fetch `key`. Fails with [`CacheError::NotFound`] if absent.
    fn get(&mut self, key: &K) -> Result<Self::Value, CacheError>;

    /// Remove `key`. Fails with [`CacheError::NotFound`] if absent.
    fn delete(&mut self, key: &K) -> Result<(), CacheError>;

    fn contains(&self, key: &K) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn keys<'a>(&'a self) -> impl Iterator<Item = &'a K> + 'a
    where
        K: 'a;
}

impl<K, V> Store<K> for HashMap<K, V>
where
    K: Hash + Eq + Debug,
    V: Clone,
{
    type Value = V;

    fn put(&mut self, key: K, value: V) -> Result<(), CacheError> {
        HashMap::insert(self, key, value);
        Ok(())
    }

    fn get(&mut self, key: &K) -> Result<V, CacheError> {
        HashMap::get(self, key)
            .cloned()
            .ok_or_else(|| CacheError::not_found(key))
    }

    fn delete(&mut self, key: &K) -> Result<(), CacheError> {
        HashMap::remove(self, key)
            .map(drop)
            .ok_or_else(|| CacheError::not_found(key))
    }

    fn contains(&self, key: &K) -> bool {
        HashMap::contains_key(self, key)
    }

    fn len(&self) -> usize {
        HashMap::len(self)
    }

    fn keys<'a>(&'a self) -> impl Iterator<Item = &'a K> + 'a
    where
        K: 'a,
    {
        HashMap::keys(self)
    }
}
