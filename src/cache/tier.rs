//! Storage tiers, residency classification and per-tier accounting.

use std::collections::HashSet;
use std::hash::Hash;

/// Identifies which storage tier an entry currently resides in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Tier 0: accelerator memory (hot).
    Device,
    /// Tier 1: host RAM (warm).
    Host,
    /// Tier 2: local disk (cold).
    Disk,
}

impl Tier {
    /// Returns the next slower tier for spilling, or None if already coldest.
    pub fn demote(&self) -> Option<Tier> {
        match self {
            Tier::Device => Some(Tier::Host),
            Tier::Host => Some(Tier::Disk),
            Tier::Disk => None,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Device => write!(f, "device"),
            Tier::Host => write!(f, "host"),
            Tier::Disk => write!(f, "disk"),
        }
    }
}

/// Capability test deciding whether a value belongs in the device tier.
///
/// Queried once, when the value is inserted.
pub trait DeviceResidency {
    fn is_device_resident(&self) -> bool;
}

/// Notified whenever a key enters or leaves a tier's fast store.
pub trait TierObserver<K> {
    fn on_enter(&mut self, key: &K);
    fn on_leave(&mut self, key: &K);
}

impl<K> TierObserver<K> for () {
    fn on_enter(&mut self, _key: &K) {}
    fn on_leave(&mut self, _key: &K) {}
}

/// Set of keys physically present in the device tier.
#[derive(Debug, Clone)]
pub struct ResidencyIndex<K> {
    keys: HashSet<K>,
}

impl<K: Hash + Eq> ResidencyIndex<K> {
    pub fn new() -> Self {
        Self {
            keys: HashSet::new(),
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &K> + '_ {
        self.keys.iter()
    }
}

impl<K: Hash + Eq> Default for ResidencyIndex<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq + Clone> TierObserver<K> for ResidencyIndex<K> {
    fn on_enter(&mut self, key: &K) {
        self.keys.insert(key.clone());
    }

    fn on_leave(&mut self, key: &K) {
        self.keys.remove(key);
    }
}

/// Per-tier usage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierStats {
    /// Number of entries in this tier.
    pub entries: usize,
    /// Total bytes used in this tier.
    pub bytes_used: u64,
    /// Capacity budget in bytes (None = unbounded).
    pub capacity: Option<u64>,
}

impl TierStats {
    /// Usage as a fraction of capacity, or None when unbounded.
    pub fn usage_fraction(&self) -> Option<f64> {
        match self.capacity {
            Some(0) => Some(0.0),
            Some(capacity) => Some(self.bytes_used as f64 / capacity as f64),
            None => None,
        }
    }

    /// Whether usage is within the budget.
    pub fn within_budget(&self) -> bool {
        self.capacity.map_or(true, |capacity| self.bytes_used <= capacity)
    }
}
