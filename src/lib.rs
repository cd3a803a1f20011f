//! device-host-cache: byte-budgeted spill cache for compute artifacts.
//!
//! Keeps recently used values in accelerator memory and spills the least
//! recently used ones through a hierarchy of storage tiers:
//!   device memory (hot) → host RAM (warm) → local disk (cold)
//!
//! Values are serialized on the way down and rebuilt on the way up; device
//! frames are copied to host memory only when a device value leaves the
//! device tier.

pub mod cache;
pub mod config;
pub mod error;
pub mod gpu;
pub mod metrics;
pub mod serialize;
pub mod storage;

pub use cache::spill::{SpillCache, SpillStats};
pub use cache::store::Store;
pub use cache::tier::{DeviceResidency, Tier, TierStats};
pub use cache::tiered::{CacheStats, TieredCache, TieredCacheBuilder};
pub use cache::weigher::{Sizeof, WeightTable, Weigher};
pub use config::{ByteLimit, Config};
pub use error::CacheError;
