//! Integration tests for nested spill caches.

use std::collections::HashMap;

use device_host_cache::cache::spill::SpillCache;
use device_host_cache::cache::store::Store;
use device_host_cache::cache::weigher::SizeofWeigher;
use device_host_cache::serialize::{Identity, SerializationError, Transform};
use device_host_cache::Tier;

/// Stores strings one level down as UTF-8 bytes.
struct Utf8;

impl Transform<String> for Utf8 {
    type Encoded = Vec<u8>;

    fn down(&self, value: &String) -> Result<Vec<u8>, SerializationError> {
        Ok(value.clone().into_bytes())
    }

    fn up(&self, encoded: Vec<u8>) -> Result<String, SerializationError> {
        String::from_utf8(encoded).map_err(|err| SerializationError::Serializer(err.to_string()))
    }
}

type Lower = SpillCache<u64, Vec<u8>, SizeofWeigher, Identity, HashMap<u64, Vec<u8>>>;
type Upper = SpillCache<u64, String, SizeofWeigher, Utf8, Lower>;

fn nested(upper: u64, lower: u64) -> Upper {
    let lower = SpillCache::new(Tier::Host, SizeofWeigher, Some(lower), Identity, HashMap::new());
    SpillCache::new(Tier::Device, SizeofWeigher, Some(upper), Utf8, lower)
}

fn value(key: u64, len: usize) -> String {
    std::iter::repeat(char::from(b'a' + (key % 26) as u8))
        .take(len)
        .collect()
}

/// Where `key` lives: 0 = upper fast, 1 = lower fast, 2 = bottom map.
fn levels(cache: &Upper, key: u64) -> Vec<usize> {
    let mut found = Vec::new();
    if cache.fast().contains(&key) {
        found.push(0);
    }
    if cache.slow().fast().contains(&key) {
        found.push(1);
    }
    if cache.slow().slow().contains_key(&key) {
        found.push(2);
    }
    found
}

#[test]
fn test_cascade_through_levels() {
    let mut cache = nested(10, 5);
    for key in 0..4 {
        cache.put(key, value(key, 5)).unwrap();
    }

    assert_eq!(levels(&cache, 0), vec![2]);
    assert_eq!(levels(&cache, 1), vec![1]);
    assert_eq!(levels(&cache, 2), vec![0]);
    assert_eq!(levels(&cache, 3), vec![0]);

    assert_eq!(cache.get(&0).unwrap(), value(0, 5));
    assert_eq!(levels(&cache, 0), vec![0]);
    assert_eq!(levels(&cache, 1), vec![2]);
    assert_eq!(levels(&cache, 2), vec![1]);
    assert_eq!(cache.len(), 4);
}

#[test]
fn test_equal_age_spills_in_insert_order() {
    let mut cache = nested(9, 1_000);
    for key in 0..6 {
        cache.put(key, value(key, 3)).unwrap();
    }
    let lower: Vec<u64> = cache.slow().fast().keys().copied().collect();
    assert_eq!(lower, vec![0, 1, 2]);
}

#[test]
fn test_invariants_under_mixed_operations() {
    let mut cache = nested(40, 60);
    let mut model: HashMap<u64, String> = HashMap::new();

    let mut state = 42u64;
    for step in 0..1_000u64 {
        state = state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        let key = (state >> 33) % 16;
        match (state >> 13) % 3 {
            0 => {
                let v = value(key, (step % 17) as usize);
                cache.put(key, v.clone()).unwrap();
                model.insert(key, v);
            }
            1 => match model.get(&key) {
                Some(expected) => assert_eq!(&cache.get(&key).unwrap(), expected),
                None => assert!(cache.get(&key).unwrap_err().is_not_found()),
            },
            _ => {
                let deleted = cache.delete(&key);
                assert_eq!(deleted.is_ok(), model.remove(&key).is_some());
            }
        }

        assert!(cache.fast().total_weight() <= 40);
        assert!(cache.slow().fast().total_weight() <= 60);
        assert_eq!(cache.len(), model.len());
        for key in 0..16 {
            let expected = usize::from(model.contains_key(&key));
            assert_eq!(levels(&cache, key).len(), expected, "key {key}");
        }
    }

    let stats = cache.stats();
    assert!(stats.promoted <= stats.misses);
    assert!(stats.spilled > 0);
}

#[test]
fn test_store_trait_object_path() {
    fn fill<S: Store<u64, Value = String>>(store: &mut S) {
        for key in 0..5 {
            store.put(key, value(key, 4)).unwrap();
        }
    }

    let mut cache = nested(8, 8);
    fill(&mut cache);
    assert_eq!(Store::len(&cache), 5);
    assert!(Store::contains(&cache, &0));
    let mut keys: Vec<u64> = Store::keys(&cache).copied().collect();
    keys.sort_unstable();
    assert_eq!(keys, vec![0, 1, 2, 3, 4]);
    assert_eq!(Store::get(&mut cache, &0).unwrap(), value(0, 4));
}
