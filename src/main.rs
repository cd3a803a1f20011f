//! device-host-cache: synthetic workload driver.
//!
//! Inserts a mix of device and host artifacts into a tiered cache sized by
//! the configuration file, reads them back in a pseudo-random order, checks
//! every payload and reports per-tier statistics.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use bytes::Bytes;
use clap::Parser;
use tracing::{debug, info};

use device_host_cache::config::{Cli, Config};
use device_host_cache::gpu::DeviceAllocator;
use device_host_cache::metrics::CacheMetrics;
use device_host_cache::serialize::{Artifact, ArtifactMeta, ArtifactSerializer, Frame};
use device_host_cache::{CacheStats, TieredCache};

fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "device_host_cache=debug"
    } else {
        "device_host_cache=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("device-host-cache v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let config = Config::load(&cli.config)?;

    info!(
        device_memory_limit = %config.cache.device_memory_limit,
        host_memory_limit = %config.cache.host_memory_limit,
        storage_directory = %config.cache.storage_directory.display(),
        "Configuration loaded"
    );

    let allocator = build_allocator(&config)?;
    let mut cache = TieredCache::<String, Artifact>::builder(Arc::new(ArtifactSerializer))
        .with_config(&config)
        .allocator(allocator.clone())
        .build()
        .context("failed to build tiered cache")?;

    let device_ratio = cli.device_ratio.clamp(0.0, 1.0);
    let start = Instant::now();
    for i in 0..cli.keys {
        let artifact = make_artifact(i, cli.artifact_bytes, is_device(i, device_ratio), &*allocator)?;
        cache.set(key(i), artifact)?;
    }
    info!(
        keys = cli.keys,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Inserted artifacts"
    );

    let start = Instant::now();
    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    let mut mismatches = 0usize;
    let reads = if cli.keys == 0 { 0 } else { cli.reads };
    for _ in 0..reads {
        state = state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        let i = ((state >> 33) as usize) % cli.keys;

        let artifact = cache.get(&key(i))?;
        let expected = expected_frames(i, cli.artifact_bytes, is_device(i, device_ratio));
        if artifact.host_bytes()? != expected {
            mismatches += 1;
            debug!(key = %key(i), "Payload mismatch");
        }
    }
    info!(
        reads,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Read artifacts"
    );

    let stats = cache.stats();
    log_stats(&stats);

    if cli.metrics {
        let metrics = CacheMetrics::new()?;
        metrics.observe(&stats);
        print!("{}", metrics.render()?);
    }

    if mismatches > 0 {
        bail!("{mismatches} artifacts came back with different contents");
    }
    Ok(())
}

#[cfg(not(feature = "cuda"))]
fn build_allocator(config: &Config) -> anyhow::Result<Arc<dyn DeviceAllocator>> {
    use device_host_cache::gpu::HostBackedAllocator;

    let capacity = config
        .device
        .simulated_capacity
        .get()
        .map(usize::try_from)
        .transpose()
        .context("simulated device capacity does not fit in memory")?;
    Ok(Arc::new(HostBackedAllocator::new(config.device.device_id, capacity)))
}

#[cfg(feature = "cuda")]
fn build_allocator(config: &Config) -> anyhow::Result<Arc<dyn DeviceAllocator>> {
    use device_host_cache::gpu::CudaAllocator;

    Ok(Arc::new(CudaAllocator::new(config.device.device_id)?))
}

fn key(i: usize) -> String {
    format!("artifact-{i}")
}

/// Spread device artifacts evenly over the key range.
fn is_device(i: usize, ratio: f64) -> bool {
    ((i + 1) as f64 * ratio).floor() > (i as f64 * ratio).floor()
}

fn payload(i: usize, len: usize) -> Bytes {
    (0..len).map(|j| (i.wrapping_mul(31) + j) as u8).collect()
}

fn expected_frames(i: usize, len: usize, device: bool) -> Vec<Bytes> {
    if device {
        vec![Bytes::copy_from_slice(&(i as u64).to_le_bytes()), payload(i, len)]
    } else {
        vec![payload(i, len)]
    }
}

/// Device artifacts carry a host index frame next to their device payload.
fn make_artifact(
    i: usize,
    len: usize,
    device: bool,
    allocator: &dyn DeviceAllocator,
) -> anyhow::Result<Artifact> {
    let meta = ArtifactMeta::new(key(i), "uint8", vec![len]);
    if !device {
        return Ok(Artifact::host(meta, [payload(i, len)]));
    }
    let buffer = allocator.copy_to_device(&payload(i, len))?;
    Ok(Artifact::new(
        meta,
        vec![
            Frame::Host(Bytes::copy_from_slice(&(i as u64).to_le_bytes())),
            Frame::Device(buffer),
        ],
    ))
}

fn log_stats(stats: &CacheStats) {
    for (name, tier) in [
        ("device", &stats.device),
        ("host", &stats.host),
        ("disk", &stats.disk),
    ] {
        info!(
            tier = name,
            entries = tier.entries,
            bytes = tier.bytes_used,
            usage = tier.usage_fraction().unwrap_or(0.0),
            "Tier usage"
        );
    }
    info!(
        device_spilled = stats.device_spill.spilled,
        device_promoted = stats.device_spill.promoted,
        host_spilled = stats.host_spill.spilled,
        host_promoted = stats.host_spill.promoted,
        d2h_bytes = stats.transfer.d2h_bytes,
        h2d_bytes = stats.transfer.h2d_bytes,
        "Spill summary"
    );
}
