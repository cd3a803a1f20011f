//! Prometheus export of cache statistics.
//!
//! The cache itself keeps plain counters; [`CacheMetrics::observe`] copies a
//! [`CacheStats`] snapshot into a private registry.

use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::cache::tier::Tier;
use crate::cache::tiered::CacheStats;

const TIERS: [Tier; 3] = [Tier::Device, Tier::Host, Tier::Disk];

pub struct CacheMetrics {
    registry: Registry,
    entries: IntGaugeVec,
    bytes: IntGaugeVec,
    spilled: IntCounterVec,
    promoted: IntCounterVec,
    transfer_bytes: IntCounterVec,
}

impl CacheMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let entries = IntGaugeVec::new(
            Opts::new("device_host_cache_entries", "Entries held per tier"),
            &["tier"],
        )?;
        let bytes = IntGaugeVec::new(
            Opts::new("device_host_cache_bytes", "Bytes held per tier"),
            &["tier"],
        )?;
        let spilled = IntCounterVec::new(
            Opts::new(
                "device_host_cache_spilled_total",
                "Entries spilled out of a tier",
            ),
            &["tier"],
        )?;
        let promoted = IntCounterVec::new(
            Opts::new(
                "device_host_cache_promoted_total",
                "Entries promoted into a tier",
            ),
            &["tier"],
        )?;
        let transfer_bytes = IntCounterVec::new(
            Opts::new(
                "device_host_cache_transfer_bytes_total",
                "Bytes copied across the device boundary",
            ),
            &["direction"],
        )?;

        registry.register(Box::new(entries.clone()))?;
        registry.register(Box::new(bytes.clone()))?;
        registry.register(Box::new(spilled.clone()))?;
        registry.register(Box::new(promoted.clone()))?;
        registry.register(Box::new(transfer_bytes.clone()))?;

        Ok(Self {
            registry,
            entries,
            bytes,
            spilled,
            promoted,
            transfer_bytes,
        })
    }

    /// Update every metric from `stats`.
    pub fn observe(&self, stats: &CacheStats) {
        for tier in TIERS {
            let label = tier.to_string();
            let usage = stats.tier(tier);
            self.entries
                .with_label_values(&[label.as_str()])
                .set(usage.entries as i64);
            self.bytes
                .with_label_values(&[label.as_str()])
                .set(usage.bytes_used as i64);

            if let Some(spill) = stats.spill(tier) {
                advance(&self.spilled, &label, spill.spilled);
                advance(&self.promoted, &label, spill.promoted);
            }
        }
        advance(&self.transfer_bytes, "d2h", stats.transfer.d2h_bytes);
        advance(&self.transfer_bytes, "h2d", stats.transfer.h2d_bytes);
    }

    /// Text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|err| prometheus::Error::Msg(err.to_string()))
    }
}

/// Move a monotonic counter up to `total`.
fn advance(counter: &IntCounterVec, label: &str, total: u64) {
    let counter = counter.with_label_values(&[label]);
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}
