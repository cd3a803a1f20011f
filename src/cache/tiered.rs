//! Device → host → disk cache.
//!
//! Two [`SpillCache`]s nested over a [`PersistentStore`]:
//!
//! ```text
//! device SpillCache ──DeviceSerializer──▶ host SpillCache ──DiskCodec──▶ PersistentStore
//! ```
//!
//! Values that report themselves device-resident are inserted at the top;
//! everything else goes straight into the host cache. The device cache's
//! [`ResidencyIndex`] records exactly the keys sitting in device memory.

use std::any::Any;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::spill::{SpillCache, SpillStats};
use crate::cache::tier::{DeviceResidency, ResidencyIndex, Tier, TierStats};
use crate::cache::weigher::{HostObjectWeigher, Sizeof, TableWeigher, WeightTable};
use crate::config::{ByteLimit, CacheConfig, CompressionConfig, Config};
use crate::error::CacheError;
use crate::gpu::{DeviceAllocator, HostBackedAllocator};
use crate::serialize::{DeviceSerializer, DiskCodec, HostObject, ObjectSerializer, TransferStats};
use crate::storage::{DiskIoStats, PersistentStore, StorageKey};

/// Host tier: host values and spilled device values over the disk store.
pub type HostCache<K, V> =
    SpillCache<K, HostObject<V>, HostObjectWeigher, DiskCodec<V>, PersistentStore<K>>;

/// Device tier: device-resident values over the host cache.
pub type DeviceCache<K, V> =
    SpillCache<K, V, TableWeigher, DeviceSerializer<V>, HostCache<K, V>, ResidencyIndex<K>>;

/// Point-in-time view of every tier.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    pub device: TierStats,
    pub host: TierStats,
    pub disk: TierStats,
    pub device_spill: SpillStats,
    pub host_spill: SpillStats,
    pub transfer: TransferStats,
    pub disk_io: DiskIoStats,
}

impl CacheStats {
    pub fn tier(&self, tier: Tier) -> &TierStats {
        match tier {
            Tier::Device => &self.device,
            Tier::Host => &self.host,
            Tier::Disk => &self.disk,
        }
    }

    /// Spill counters of the cache whose fast store is `tier`.
    pub fn spill(&self, tier: Tier) -> Option<&SpillStats> {
        match tier {
            Tier::Device => Some(&self.device_spill),
            Tier::Host => Some(&self.host_spill),
            Tier::Disk => None,
        }
    }
}

/// Map-like cache spreading values over device memory, host memory and disk.
pub struct TieredCache<K, V>
where
    K: StorageKey,
    V: DeviceResidency + Sizeof + Any + Clone,
{
    device: DeviceCache<K, V>,
}

impl<K, V> TieredCache<K, V>
where
    K: StorageKey,
    V: DeviceResidency + Sizeof + Any + Clone,
{
    pub fn builder(serializer: Arc<dyn ObjectSerializer<V>>) -> TieredCacheBuilder<K, V> {
        TieredCacheBuilder::new(serializer)
    }

    /// Insert or replace `key`.
    ///
    /// Device-resident values go to the device tier, all others to the host
    /// tier. Residency is decided once, here. If the insert fails the key
    /// keeps its previous value.
    pub fn set(&mut self, key: K, value: V) -> Result<(), CacheError> {
        if value.is_device_resident() {
            debug!(key = ?key, "Inserting into device tier");
            return self.device.put(key, value);
        }

        debug!(key = ?key, "Inserting into host tier");
        let in_device = self.device.fast().contains(&key);
        self.device
            .slow_mut()
            .put(key.clone(), HostObject::Value(value))?;
        if in_device {
            self.device.delete(&key)?;
        }
        Ok(())
    }

    /// Fetch `key` from whichever tier holds it.
    ///
    /// Device values found below the device tier are copied back into device
    /// memory without passing through the host store; host values are
    /// promoted no further than the host tier.
    pub fn get(&mut self, key: &K) -> Result<V, CacheError> {
        if self.device.observer().contains(key) {
            return self.device.get(key);
        }
        let object = self
            .device
            .slow_mut()
            .get_with(key, |object| !object.is_device_serialized())?;
        match object {
            HostObject::Value(value) => Ok(value),
            serialized @ HostObject::DeviceSerialized(_) => self.device.promote(key, serialized),
        }
    }

    pub fn delete(&mut self, key: &K) -> Result<(), CacheError> {
        self.device.delete(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.device.contains(key)
    }

    /// Number of distinct keys across all tiers.
    pub fn len(&self) -> usize {
        self.device.len()
    }

    pub fn is_empty(&self) -> bool {
        self.device.is_empty()
    }

    /// Every key, device tier first, then host, then disk.
    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.device.keys()
    }

    /// Keys currently held in device memory.
    pub fn device_keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.device.observer().iter()
    }

    pub fn tier_of(&self, key: &K) -> Option<Tier> {
        let host = self.device.slow();
        if self.device.fast().contains(key) {
            Some(Tier::Device)
        } else if host.fast().contains(key) {
            Some(Tier::Host)
        } else if host.slow().contains(key) {
            Some(Tier::Disk)
        } else {
            None
        }
    }

    pub fn storage_directory(&self) -> &Path {
        self.device.slow().slow().directory()
    }

    pub fn stats(&self) -> CacheStats {
        let host = self.device.slow();
        let disk = host.slow();
        CacheStats {
            device: self.device.tier_stats(),
            host: host.tier_stats(),
            disk: TierStats {
                entries: disk.len(),
                bytes_used: disk.disk_usage(),
                capacity: None,
            },
            device_spill: self.device.stats(),
            host_spill: host.stats(),
            transfer: self.device.transform().stats(),
            disk_io: *disk.stats(),
        }
    }
}

/// Assembles a [`TieredCache`].
pub struct TieredCacheBuilder<K, V> {
    serializer: Arc<dyn ObjectSerializer<V>>,
    device_memory_limit: ByteLimit,
    host_memory_limit: ByteLimit,
    storage_directory: PathBuf,
    compression: CompressionConfig,
    weights: WeightTable,
    allocator: Option<Arc<dyn DeviceAllocator>>,
    _key: PhantomData<fn() -> K>,
}

impl<K, V> TieredCacheBuilder<K, V>
where
    K: StorageKey,
    V: DeviceResidency + Sizeof + Any + Clone,
{
    pub fn new(serializer: Arc<dyn ObjectSerializer<V>>) -> Self {
        let defaults = CacheConfig::default();
        Self {
            serializer,
            device_memory_limit: defaults.device_memory_limit,
            host_memory_limit: defaults.host_memory_limit,
            storage_directory: defaults.storage_directory,
            compression: CompressionConfig::default(),
            weights: WeightTable::new(),
            allocator: None,
            _key: PhantomData,
        }
    }

    /// Builder seeded from the `cache` and `compression` sections of `config`.
    pub fn from_config(config: &Config, serializer: Arc<dyn ObjectSerializer<V>>) -> Self {
        Self::new(serializer).with_config(config)
    }

    pub fn with_config(self, config: &Config) -> Self {
        self.device_memory_limit(config.cache.device_memory_limit)
            .host_memory_limit(config.cache.host_memory_limit)
            .storage_directory(config.cache.storage_directory.clone())
            .compression(config.compression.clone())
    }

    pub fn device_memory_limit(mut self, limit: impl Into<ByteLimit>) -> Self {
        self.device_memory_limit = limit.into();
        self
    }

    pub fn host_memory_limit(mut self, limit: impl Into<ByteLimit>) -> Self {
        self.host_memory_limit = limit.into();
        self
    }

    pub fn storage_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.storage_directory = directory.into();
        self
    }

    pub fn compression(mut self, compression: CompressionConfig) -> Self {
        self.compression = compression;
        self
    }

    /// Weight overrides; frozen once the cache is built.
    pub fn weights(mut self, weights: WeightTable) -> Self {
        self.weights = weights;
        self
    }

    /// Allocator used when promoting spilled values back into device memory.
    /// Defaults to an unbounded [`HostBackedAllocator`].
    pub fn allocator(mut self, allocator: Arc<dyn DeviceAllocator>) -> Self {
        self.allocator = Some(allocator);
        self
    }

    pub fn build(self) -> Result<TieredCache<K, V>, CacheError> {
        let disk = PersistentStore::open(&self.storage_directory)?;
        let weights = Arc::new(self.weights);
        let allocator = self
            .allocator
            .unwrap_or_else(|| Arc::new(HostBackedAllocator::unbounded()));

        info!(
            device_memory_limit = %self.device_memory_limit,
            host_memory_limit = %self.host_memory_limit,
            storage_directory = %self.storage_directory.display(),
            allocator = allocator.name(),
            zstd = self.compression.disk_zstd_compression,
            "Building tiered cache"
        );

        let host = SpillCache::new(
            Tier::Host,
            HostObjectWeigher(weights.clone()),
            self.host_memory_limit.get(),
            DiskCodec::new(self.serializer.clone(), self.compression),
            disk,
        );
        let device = SpillCache::new(
            Tier::Device,
            TableWeigher(weights),
            self.device_memory_limit.get(),
            DeviceSerializer::new(self.serializer, allocator),
            host,
        )
        .with_observer(ResidencyIndex::new());

        Ok(TieredCache { device })
    }
}
