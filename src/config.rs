//! Runtime configuration for device-host-cache.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! Tier budgets, the disk location and disk compression live here.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::Parser;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "device-host-cache",
    about = "Run a synthetic workload through the device → host → disk cache"
)]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Number of artifacts to insert.
    #[arg(long, default_value_t = 64)]
    pub keys: usize,

    /// Payload size of each artifact in bytes.
    #[arg(long, default_value_t = 1 << 20)]
    pub artifact_bytes: usize,

    /// Fraction of artifacts created in device memory.
    #[arg(long, default_value_t = 0.5)]
    pub device_ratio: f64,

    /// Number of reads issued after the inserts.
    #[arg(long, default_value_t = 128)]
    pub reads: usize,

    /// Print Prometheus metrics when the workload finishes.
    #[arg(long)]
    pub metrics: bool,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid byte size {0:?}")]
    InvalidByteSize(String),
}

/// A byte budget; `None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ByteLimit(pub Option<u64>);

impl ByteLimit {
    pub const UNBOUNDED: ByteLimit = ByteLimit(None);

    pub const fn bytes(n: u64) -> Self {
        ByteLimit(Some(n))
    }

    pub fn get(&self) -> Option<u64> {
        self.0
    }

    pub fn is_unbounded(&self) -> bool {
        self.0.is_none()
    }
}

impl From<u64> for ByteLimit {
    fn from(n: u64) -> Self {
        ByteLimit(Some(n))
    }
}

impl From<Option<u64>> for ByteLimit {
    fn from(limit: Option<u64>) -> Self {
        ByteLimit(limit)
    }
}

const UNITS: &[(&str, u64)] = &[
    ("b", 1),
    ("kb", 1_000),
    ("mb", 1_000_000),
    ("gb", 1_000_000_000),
    ("tb", 1_000_000_000_000),
    ("kib", 1 << 10),
    ("mib", 1 << 20),
    ("gib", 1 << 30),
    ("tib", 1 << 40),
];

impl FromStr for ByteLimit {
    type Err = ConfigError;

    /// Parses `"unbounded"`, `"none"`, plain integers and sizes such as
    /// `"512MB"`, `"1.5 GiB"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidByteSize(s.to_string());
        let trimmed = s.trim().to_ascii_lowercase();
        if trimmed.is_empty() || trimmed == "unbounded" || trimmed == "none" {
            return Ok(ByteLimit::UNBOUNDED);
        }

        let split = trimmed
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(trimmed.len());
        let (number, unit) = trimmed.split_at(split);
        let unit = unit.trim();
        let multiplier = if unit.is_empty() {
            1
        } else {
            UNITS
                .iter()
                .find(|(name, _)| *name == unit)
                .map(|&(_, multiplier)| multiplier)
                .ok_or_else(invalid)?
        };

        if let Ok(n) = number.parse::<u64>() {
            return n.checked_mul(multiplier).map(ByteLimit::bytes).ok_or_else(invalid);
        }
        let n: f64 = number.parse().map_err(|_| invalid())?;
        let bytes = n * multiplier as f64;
        if !bytes.is_finite() || bytes < 0.0 || bytes > u64::MAX as f64 {
            return Err(invalid());
        }
        Ok(ByteLimit::bytes(bytes as u64))
    }
}

impl fmt::Display for ByteLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(n) => write!(f, "{n}"),
            None => write!(f, "unbounded"),
        }
    }
}

impl Serialize for ByteLimit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Some(n) => serializer.serialize_u64(n),
            None => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for ByteLimit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bytes(u64),
            Text(String),
        }

        match Option::<Raw>::deserialize(deserializer)? {
            None => Ok(ByteLimit::UNBOUNDED),
            Some(Raw::Bytes(n)) => Ok(ByteLimit::bytes(n)),
            Some(Raw::Text(text)) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tier budgets and disk location.
    pub cache: CacheConfig,

    /// Disk payload compression.
    pub compression: CompressionConfig,

    /// Accelerator selection.
    pub device: DeviceConfig,
}

/// Tier capacity and path configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Bytes of device-resident values kept in accelerator memory.
    pub device_memory_limit: ByteLimit,

    /// Bytes of host values (and spilled device values) kept in host memory.
    pub host_memory_limit: ByteLimit,

    /// Directory of the disk tier. Not capacity-managed.
    pub storage_directory: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            device_memory_limit: ByteLimit::bytes(256 * 1024 * 1024), // 256 MiB
            host_memory_limit: ByteLimit::bytes(1024 * 1024 * 1024),  // 1 GiB
            storage_directory: PathBuf::from("device-host-cache/storage"),
        }
    }
}

/// Compression applied to payloads written to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Apply zstd compression when writing to disk.
    pub disk_zstd_compression: bool,

    /// zstd compression level (1-22).
    pub zstd_level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            disk_zstd_compression: false,
            zstd_level: 3,
        }
    }
}

/// Accelerator settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Ordinal of the accelerator to allocate on.
    pub device_id: usize,

    /// Physical memory of the simulated accelerator used without the `cuda`
    /// feature.
    pub simulated_capacity: ByteLimit,
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }
}
