//! Two-level spill cache: a weighted LRU fast store over a next-level store.
//!
//! The fast store holds decoded values up to `capacity` bytes. Whenever it
//! goes over budget the least-recently-used entries are encoded with the
//! cache's [`Transform`] and written one level down; reads that miss the fast
//! store decode the value from the next level and promote it back.
//!
//! A key lives in exactly one place between operations: either in `fast`, or
//! somewhere beneath it.

use std::fmt::Debug;
use std::hash::Hash;

use tracing::debug;

use crate::cache::store::Store;
use crate::cache::tier::{Tier, TierObserver, TierStats};
use crate::cache::weighted::WeightedStore;
use crate::cache::weigher::Weigher;
use crate::error::CacheError;
use crate::serialize::Transform;

/// Spill and promotion counters for one cache level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpillStats {
    /// Reads served from the fast store.
    pub hits: u64,
    /// Reads that missed the fast store.
    pub misses: u64,
    /// Entries moved to the next level.
    pub spilled: u64,
    /// Fast-store bytes released by spilling.
    pub spilled_bytes: u64,
    /// Entries moved up from the next level.
    pub promoted: u64,
}

pub struct SpillCache<K, V, W, T, S, O = ()> {
    tier: Tier,
    fast: WeightedStore<K, V, W>,
    capacity: Option<u64>,
    transform: T,
    slow: S,
    observer: O,
    stats: SpillStats,
}

impl<K, V, W, T, S> SpillCache<K, V, W, T, S>
where
    K: Hash + Eq + Clone + Debug,
    V: Clone,
    W: Weigher<V>,
    T: Transform<V>,
    S: Store<K, Value = T::Encoded>,
{
    /// Create a cache level for `tier` holding at most `capacity` bytes
    /// (None = unbounded) before spilling into `slow` through `transform`.
    pub fn new(tier: Tier, weigher: W, capacity: Option<u64>, transform: T, slow: S) -> Self {
        Self {
            tier,
            fast: WeightedStore::new(weigher),
            capacity,
            transform,
            slow,
            observer: (),
            stats: SpillStats::default(),
        }
    }
}

impl<K, V, W, T, S, O> SpillCache<K, V, W, T, S, O>
where
    K: Hash + Eq + Clone + Debug,
    V: Clone,
    W: Weigher<V>,
    T: Transform<V>,
    S: Store<K, Value = T::Encoded>,
    O: TierObserver<K>,
{
    /// Attach an observer notified as keys enter and leave the fast store.
    ///
    /// Must be called before the first insert.
    pub fn with_observer<O2: TierObserver<K>>(self, observer: O2) -> SpillCache<K, V, W, T, S, O2> {
        SpillCache {
            tier: self.tier,
            fast: self.fast,
            capacity: self.capacity,
            transform: self.transform,
            slow: self.slow,
            observer,
            stats: self.stats,
        }
    }

    /// Insert `value`, then spill least-recently-used entries until the fast
    /// store is within capacity.
    ///
    /// A copy of `key` in the next level is removed once the new value is
    /// settled in the fast store. If a spill fails the key is put back the way
    /// it was (its previous value, or its copy below), the entry that failed
    /// to move stays in the fast store, and the error is returned.
    pub fn put(&mut self, key: K, value: V) -> Result<(), CacheError> {
        let stale_below = !self.fast.contains(&key) && self.slow.contains(&key);

        let previous = self.fast.put(key.clone(), value);
        if previous.is_none() {
            self.observer.on_enter(&key);
        }

        if let Err(err) = self.spill_to_capacity() {
            self.restore(&key, previous)?;
            return Err(err);
        }

        if stale_below && self.fast.contains(&key) {
            if let Err(err) = self.slow.delete(&key) {
                self.restore(&key, previous)?;
                return Err(err);
            }
            debug!(tier = %self.tier, key = ?key, "Dropped stale copy from next level");
        }
        Ok(())
    }

    /// Fetch `key`, promoting it into the fast store if it had spilled.
    pub fn get(&mut self, key: &K) -> Result<V, CacheError> {
        self.get_with(key, |_| true)
    }

    /// Fetch `key`; a value found in the next level is promoted only when
    /// `promote` accepts it, and otherwise left where it is.
    pub fn get_with(
        &mut self,
        key: &K,
        promote: impl FnOnce(&V) -> bool,
    ) -> Result<V, CacheError> {
        if self.fast.contains(key) {
            self.stats.hits += 1;
            return self.fast.get(key).cloned();
        }
        self.stats.misses += 1;

        let value = self.transform.up(self.slow.get(key)?)?;
        if !promote(&value) {
            debug!(tier = %self.tier, key = ?key, "Read entry from next level");
            return Ok(value);
        }
        self.insert_promoted(key, value)
    }

    /// Decode `encoded`, the copy of `key` held by the next level, and
    /// promote it into the fast store.
    ///
    /// For callers that already read the entry from the next level. Counts
    /// as a miss.
    pub fn promote(&mut self, key: &K, encoded: T::Encoded) -> Result<V, CacheError> {
        self.stats.misses += 1;
        let value = self.transform.up(encoded)?;
        self.insert_promoted(key, value)
    }

    fn insert_promoted(&mut self, key: &K, value: V) -> Result<V, CacheError> {
        // The copy below is only dropped once the value is settled here, so
        // a failed promotion leaves it in place.
        self.put(key.clone(), value.clone())?;
        self.stats.promoted += 1;
        debug!(tier = %self.tier, key = ?key, "Promoted entry");
        Ok(value)
    }

    /// Remove `key` from whichever level holds it.
    pub fn delete(&mut self, key: &K) -> Result<(), CacheError> {
        if self.fast.contains(key) {
            self.fast.delete(key)?;
            self.observer.on_leave(key);
            debug!(tier = %self.tier, key = ?key, "Deleted entry");
            Ok(())
        } else {
            self.slow.delete(key)
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.fast.contains(key) || self.slow.contains(key)
    }

    /// Number of keys in this level and every level beneath it.
    pub fn len(&self) -> usize {
        self.fast.len() + self.slow.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys of this level (oldest first) followed by those beneath it.
    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.fast
            .keys()
            .chain(self.slow.keys().filter(move |key| !self.fast.contains(key)))
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn capacity(&self) -> Option<u64> {
        self.capacity
    }

    pub fn fast(&self) -> &WeightedStore<K, V, W> {
        &self.fast
    }

    pub fn slow(&self) -> &S {
        &self.slow
    }

    pub fn slow_mut(&mut self) -> &mut S {
        &mut self.slow
    }

    pub fn transform(&self) -> &T {
        &self.transform
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn stats(&self) -> SpillStats {
        self.stats
    }

    /// Usage of the fast store.
    pub fn tier_stats(&self) -> TierStats {
        TierStats {
            entries: self.fast.len(),
            bytes_used: self.fast.total_weight(),
            capacity: self.capacity,
        }
    }

    fn spill_to_capacity(&mut self) -> Result<(), CacheError> {
        let Some(capacity) = self.capacity else {
            return Ok(());
        };
        while self.fast.total_weight() > capacity {
            let Some(victim) = self.fast.least_recently_used().cloned() else {
                break;
            };
            self.spill(victim)?;
        }
        Ok(())
    }

    /// Move one entry from the fast store to the next level.
    ///
    /// On failure the next level is unchanged and the entry stays here.
    fn spill(&mut self, key: K) -> Result<(), CacheError> {
        let weight = self.fast.weight_of(&key).unwrap_or(0);
        let value = self
            .fast
            .peek(&key)
            .ok_or_else(|| CacheError::not_found(&key))?;
        let encoded = self.transform.down(value)?;
        self.slow.put(key.clone(), encoded)?;
        self.release(&key, weight)
    }

    /// Undo an insert of `key` whose spill failed.
    fn restore(&mut self, key: &K, previous: Option<V>) -> Result<(), CacheError> {
        if !self.fast.contains(key) {
            return Ok(());
        }
        match previous {
            Some(value) => {
                self.fast.put(key.clone(), value);
            }
            None => {
                self.fast.delete(key)?;
                self.observer.on_leave(key);
            }
        }
        debug!(tier = %self.tier, key = ?key, "Rolled back failed insert");
        Ok(())
    }

    fn release(&mut self, key: &K, weight: u64) -> Result<(), CacheError> {
        self.fast.delete(key)?;
        self.observer.on_leave(key);
        self.stats.spilled += 1;
        self.stats.spilled_bytes += weight;
        debug!(
            tier = %self.tier,
            key = ?key,
            weight,
            to = %self.tier.demote().map_or_else(|| "none".to_string(), |t| t.to_string()),
            "Spilled entry"
        );
        Ok(())
    }
}

impl<K, V, W, T, S, O> Store<K> for SpillCache<K, V, W, T, S, O>
where
    K: Hash + Eq + Clone + Debug,
    V: Clone,
    W: Weigher<V>,
    T: Transform<V>,
    S: Store<K, Value = T::Encoded>,
    O: TierObserver<K>,
{
    type Value = V;

    fn put(&mut self, key: K, value: V) -> Result<(), CacheError> {
        SpillCache::put(self, key, value)
    }

    fn get(&mut self, key: &K) -> Result<V, CacheError> {
        SpillCache::get(self, key)
    }

    fn delete(&mut self, key: &K) -> Result<(), CacheError> {
        SpillCache::delete(self, key)
    }

    fn contains(&self, key: &K) -> bool {
        SpillCache::contains(self, key)
    }

    fn len(&self) -> usize {
        SpillCache::len(self)
    }

    fn keys<'a>(&'a self) -> impl Iterator<Item = &'a K> + 'a
    where
        K: 'a,
    {
        SpillCache::keys(self)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::cache::tier::ResidencyIndex;
    use crate::cache::weigher::SizeofWeigher;
    use crate::serialize::{Identity, SerializationError};

    type MemCache = SpillCache<&'static str, Vec<u8>, SizeofWeigher, Identity, HashMap<&'static str, Vec<u8>>>;

    fn cache(capacity: u64) -> MemCache {
        SpillCache::new(Tier::Host, SizeofWeigher, Some(capacity), Identity, HashMap::new())
    }

    #[test]
    fn test_spill_oldest_first() {
        let mut cache = cache(10);
        cache.put("a", vec![1; 4]).unwrap();
        cache.put("b", vec![2; 4]).unwrap();
        cache.put("c", vec![3; 4]).unwrap();

        assert!(!cache.fast().contains(&"a"));
        assert!(cache.slow().contains_key("a"));
        assert_eq!(cache.fast().total_weight(), 8);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.stats().spilled, 1);
        assert_eq!(cache.stats().spilled_bytes, 4);
    }

    #[test]
    fn test_lru_order_respects_reads() {
        let mut cache = cache(10);
        cache.put("a", vec![0; 5]).unwrap();
        cache.put("b", vec![0; 5]).unwrap();
        cache.get(&"a").unwrap();
        cache.put("c", vec![0; 5]).unwrap();

        assert!(cache.fast().contains(&"a"));
        assert!(cache.fast().contains(&"c"));
        assert!(cache.slow().contains_key("b"));
    }

    #[test]
    fn test_get_promotes_from_next_level() {
        let mut cache = cache(10);
        cache.put("a", vec![1; 6]).unwrap();
        cache.put("b", vec![2; 6]).unwrap();
        assert!(cache.slow().contains_key("a"));

        assert_eq!(cache.get(&"a").unwrap(), vec![1; 6]);
        assert!(cache.fast().contains(&"a"));
        assert!(!cache.slow().contains_key("a"));
        // Promoting "a" pushed "b" down.
        assert!(cache.slow().contains_key("b"));
        assert_eq!(cache.stats().promoted, 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_oversized_value_goes_straight_down() {
        let mut cache = cache(10);
        cache.put("big", vec![0; 50]).unwrap();
        assert!(cache.fast().is_empty());
        assert!(cache.slow().contains_key("big"));
        assert_eq!(cache.get(&"big").unwrap().len(), 50);
        assert!(cache.slow().contains_key("big"));
    }

    #[test]
    fn test_put_removes_stale_copy_below() {
        let mut cache = cache(10);
        cache.put("a", vec![1; 8]).unwrap();
        cache.put("b", vec![2; 8]).unwrap();
        assert!(cache.slow().contains_key("a"));

        cache.put("a", vec![9; 1]).unwrap();
        assert!(cache.fast().contains(&"a"));
        assert!(!cache.slow().contains_key("a"));
        assert_eq!(cache.get(&"a").unwrap(), vec![9]);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_delete_reaches_next_level() {
        let mut cache = cache(4);
        cache.put("a", vec![0; 4]).unwrap();
        cache.put("b", vec![0; 4]).unwrap();

        cache.delete(&"a").unwrap();
        cache.delete(&"b").unwrap();
        assert!(cache.is_empty());
        assert!(cache.delete(&"a").unwrap_err().is_not_found());
        assert!(cache.get(&"a").unwrap_err().is_not_found());
    }

    #[test]
    fn test_unbounded_never_spills() {
        let mut cache: MemCache =
            SpillCache::new(Tier::Host, SizeofWeigher, None, Identity, HashMap::new());
        for key in ["a", "b", "c"] {
            cache.put(key, vec![0; 1_000]).unwrap();
        }
        assert_eq!(cache.fast().len(), 3);
        assert!(cache.slow().is_empty());
    }

    #[test]
    fn test_observer_follows_fast_store() {
        let mut cache = cache(10).with_observer(ResidencyIndex::new());
        cache.put("a", vec![0; 6]).unwrap();
        cache.put("b", vec![0; 6]).unwrap();
        assert!(!cache.observer().contains(&"a"));
        assert!(cache.observer().contains(&"b"));

        cache.get(&"a").unwrap();
        assert!(cache.observer().contains(&"a"));
        assert!(!cache.observer().contains(&"b"));

        cache.delete(&"a").unwrap();
        assert!(cache.observer().is_empty());
    }

    #[test]
    fn test_keys_union_counts_each_once() {
        let mut cache = cache(10);
        for key in ["a", "b", "c", "d"] {
            cache.put(key, vec![0; 4]).unwrap();
        }
        let mut keys: Vec<_> = cache.keys().copied().collect();
        keys.sort();
        assert_eq!(keys, vec!["a", "b", "c", "d"]);
    }

    /// Fails to encode values starting with 0xFF.
    struct Picky;

    impl Transform<Vec<u8>> for Picky {
        type Encoded = Vec<u8>;

        fn down(&self, value: &Vec<u8>) -> Result<Vec<u8>, SerializationError> {
            if value.first() == Some(&0xFF) {
                return Err(SerializationError::Serializer("refused".into()));
            }
            Ok(value.clone())
        }

        fn up(&self, encoded: Vec<u8>) -> Result<Vec<u8>, SerializationError> {
            Ok(encoded)
        }
    }

    #[test]
    fn test_failed_spill_keeps_entry_resident() {
        let mut cache = SpillCache::new(Tier::Device, SizeofWeigher, Some(8), Picky, HashMap::new());
        cache.put("bad", vec![0xFF; 6]).unwrap();

        let err = cache.put("good", vec![1; 6]).unwrap_err();
        assert!(matches!(err, CacheError::Serialization(_)));
        assert!(cache.fast().contains(&"bad"));
        assert!(!cache.contains(&"good"));
        assert!(cache.slow().is_empty());
        assert_eq!(cache.fast().total_weight(), 6);
        assert_eq!(cache.stats().spilled, 0);
    }

    #[test]
    fn test_failed_put_keeps_previous_value() {
        let mut cache = SpillCache::new(Tier::Host, SizeofWeigher, Some(8), Picky, HashMap::new())
            .with_observer(ResidencyIndex::new());
        cache.put("bad", vec![0xFF; 6]).unwrap();
        cache.put("k", vec![1; 2]).unwrap();

        assert!(cache.put("k", vec![2; 4]).is_err());
        assert_eq!(cache.get(&"k").unwrap(), vec![1; 2]);
        assert_eq!(cache.fast().total_weight(), 8);
        assert!(cache.observer().contains(&"k"));
    }

    #[test]
    fn test_failed_put_keeps_copy_below() {
        let mut cache = SpillCache::new(Tier::Host, SizeofWeigher, Some(8), Picky, HashMap::new())
            .with_observer(ResidencyIndex::new());
        cache.put("k", vec![1; 6]).unwrap();
        cache.put("bad", vec![0xFF; 6]).unwrap();
        assert_eq!(cache.slow().get(&"k"), Some(&vec![1; 6]));

        assert!(cache.put("k", vec![3; 4]).is_err());
        assert!(!cache.fast().contains(&"k"));
        assert!(!cache.observer().contains(&"k"));
        assert_eq!(cache.slow().get(&"k"), Some(&vec![1; 6]));

        // Promotion would have to spill "bad"; the copy below survives that too.
        assert!(cache.get(&"k").is_err());
        assert_eq!(cache.slow().get(&"k"), Some(&vec![1; 6]));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().promoted, 0);
    }

    #[test]
    fn test_get_with_can_skip_promotion() {
        let mut cache = cache(10);
        cache.put("a", vec![1; 6]).unwrap();
        cache.put("b", vec![2; 6]).unwrap();

        assert_eq!(cache.get_with(&"a", |_| false).unwrap(), vec![1; 6]);
        assert!(cache.slow().contains_key("a"));
        assert!(cache.fast().contains(&"b"));
        assert_eq!(cache.stats().promoted, 0);
        assert_eq!(cache.stats().misses, 1);

        let encoded = cache.slow().get(&"a").cloned().unwrap();
        assert_eq!(cache.promote(&"a", encoded).unwrap(), vec![1; 6]);
        assert!(cache.fast().contains(&"a"));
        assert!(!cache.slow().contains_key("a"));
        assert_eq!(cache.stats().promoted, 1);
    }
}
