//! Benchmarks for the spill cache and device serializer.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use device_host_cache::cache::spill::SpillCache;
use device_host_cache::cache::weighted::WeightedStore;
use device_host_cache::cache::weigher::SizeofWeigher;
use device_host_cache::gpu::{DeviceAllocator, HostBackedAllocator};
use device_host_cache::serialize::{
    Artifact, ArtifactMeta, ArtifactSerializer, DeviceSerializer, Frame, Identity, Transform,
};
use device_host_cache::Tier;

fn bench_weighted_store(c: &mut Criterion) {
    let mut store: WeightedStore<u64, Vec<u8>, _> = WeightedStore::new(SizeofWeigher);
    for i in 0..10_000u64 {
        store.put(i, vec![0u8; 64]);
    }

    c.bench_function("weighted_store_get_10k", |b| {
        let mut i = 0u64;
        b.iter(|| {
            i = (i + 7_919) % 10_000;
            black_box(store.get(&i).is_ok());
        })
    });
}

fn bench_spill_churn(c: &mut Criterion) {
    // Room for 1,000 of the 4 KB entries; the rest live one level down.
    let mut cache: SpillCache<u64, Vec<u8>, _, _, HashMap<u64, Vec<u8>>> = SpillCache::new(
        Tier::Host,
        SizeofWeigher,
        Some(1_000 * 4096),
        Identity,
        HashMap::new(),
    );
    for i in 0..4_000u64 {
        cache.put(i, vec![1u8; 4096]).unwrap();
    }

    c.bench_function("spill_cache_get_with_promotion", |b| {
        let mut i = 0u64;
        b.iter(|| {
            i = (i + 2_003) % 4_000;
            black_box(cache.get(&i).unwrap());
        })
    });
}

fn bench_device_round_trip(c: &mut Criterion) {
    let alloc = HostBackedAllocator::unbounded();
    let transform = DeviceSerializer::new(Arc::new(ArtifactSerializer), Arc::new(alloc.clone()));

    // 256KB device payload with a small host index.
    let artifact = Artifact::new(
        ArtifactMeta::new("frame", "float32", vec![64 * 1024]),
        vec![
            Frame::Host(Bytes::from_static(b"index")),
            Frame::Device(alloc.copy_to_device(&vec![42u8; 256 * 1024]).unwrap()),
        ],
    );

    c.bench_function("device_serializer_round_trip_256kb", |b| {
        b.iter(|| {
            let encoded = transform.down(black_box(&artifact)).unwrap();
            black_box(transform.up(encoded).unwrap());
        })
    });
}

criterion_group!(
    benches,
    bench_weighted_store,
    bench_spill_churn,
    bench_device_round_trip
);
criterion_main!(benches);
