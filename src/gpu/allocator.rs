//! Host-backed device allocator.
//!
//! Stands in for accelerator memory when the `cuda` feature is disabled.
//! Allocations live in host RAM but go through the same handle and copy
//! paths as real device memory, and every byte is accounted so callers can
//! observe allocation, release and copy traffic.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::gpu::memory::{DeviceAllocation, DeviceAllocator, DeviceBuffer, DeviceError};

/// Live counters shared between an allocator and its allocations.
#[derive(Debug, Default)]
struct AllocatorCounters {
    live_bytes: AtomicUsize,
    live_allocations: AtomicUsize,
    total_allocations: AtomicU64,
    h2d_bytes: AtomicU64,
    d2h_bytes: AtomicU64,
    d2h_copies: AtomicU64,
}

/// Point-in-time view of a [`HostBackedAllocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllocatorStats {
    /// Bytes currently held by live allocations.
    pub live_bytes: usize,
    /// Number of live allocations.
    pub live_allocations: usize,
    /// Allocations made since creation.
    pub total_allocations: u64,
    /// Bytes copied host-to-device.
    pub h2d_bytes: u64,
    /// Bytes copied device-to-host.
    pub d2h_bytes: u64,
    /// Number of device-to-host copies.
    pub d2h_copies: u64,
}

/// Simulated device memory pool.
///
/// `capacity` models the physical memory of the device; `None` means the
/// pool never runs out.
#[derive(Debug, Clone)]
pub struct HostBackedAllocator {
    device_id: usize,
    capacity: Option<usize>,
    counters: Arc<AllocatorCounters>,
}

impl HostBackedAllocator {
    pub fn new(device_id: usize, capacity: Option<usize>) -> Self {
        Self {
            device_id,
            capacity,
            counters: Arc::new(AllocatorCounters::default()),
        }
    }

    /// An allocator with no physical limit on device 0.
    pub fn unbounded() -> Self {
        Self::new(0, None)
    }

    pub fn device_id(&self) -> usize {
        self.device_id
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn stats(&self) -> AllocatorStats {
        let c = &self.counters;
        AllocatorStats {
            live_bytes: c.live_bytes.load(Ordering::Relaxed),
            live_allocations: c.live_allocations.load(Ordering::Relaxed),
            total_allocations: c.total_allocations.load(Ordering::Relaxed),
            h2d_bytes: c.h2d_bytes.load(Ordering::Relaxed),
            d2h_bytes: c.d2h_bytes.load(Ordering::Relaxed),
            d2h_copies: c.d2h_copies.load(Ordering::Relaxed),
        }
    }

    /// Allocate a buffer on the simulated device holding `data`.
    pub fn allocate(&self, data: Vec<u8>) -> Result<DeviceBuffer, DeviceError> {
        let len = data.len();
        let capacity = self.capacity;
        self.counters
            .live_bytes
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |live| match capacity {
                Some(cap) if live + len > cap => None,
                _ => Some(live + len),
            })
            .map_err(|live| DeviceError::OutOfMemory {
                device_id: self.device_id,
                requested: len,
                available: capacity.unwrap_or(usize::MAX).saturating_sub(live),
            })?;

        self.counters.live_allocations.fetch_add(1, Ordering::Relaxed);
        self.counters.total_allocations.fetch_add(1, Ordering::Relaxed);
        debug!(device = self.device_id, size = len, "Allocated device buffer");

        Ok(DeviceBuffer::new(HostBackedAllocation {
            device_id: self.device_id,
            data,
            counters: Arc::clone(&self.counters),
        }))
    }
}

impl DeviceAllocator for HostBackedAllocator {
    fn copy_to_device(&self, data: &[u8]) -> Result<DeviceBuffer, DeviceError> {
        let buffer = self.allocate(data.to_vec())?;
        self.counters
            .h2d_bytes
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(buffer)
    }

    fn name(&self) -> &str {
        "host-backed"
    }
}

struct HostBackedAllocation {
    device_id: usize,
    data: Vec<u8>,
    counters: Arc<AllocatorCounters>,
}

impl DeviceAllocation for HostBackedAllocation {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn device_id(&self) -> usize {
        self.device_id
    }

    fn copy_to_host(&self) -> Result<Vec<u8>, DeviceError> {
        self.counters
            .d2h_bytes
            .fetch_add(self.data.len() as u64, Ordering::Relaxed);
        self.counters.d2h_copies.fetch_add(1, Ordering::Relaxed);
        Ok(self.data.clone())
    }
}

impl Drop for HostBackedAllocation {
    fn drop(&mut self) {
        self.counters
            .live_bytes
            .fetch_sub(self.data.len(), Ordering::Relaxed);
        self.counters.live_allocations.fetch_sub(1, Ordering::Relaxed);
        debug!(device = self.device_id, size = self.data.len(), "Freed device buffer");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_free() {
        let alloc = HostBackedAllocator::new(0, Some(4096));

        let a = alloc.allocate(vec![1u8; 1024]).unwrap();
        let b = alloc.allocate(vec![2u8; 1024]).unwrap();
        assert_eq!(alloc.stats().live_bytes, 2048);
        assert_eq!(alloc.stats().live_allocations, 2);

        drop(a);
        assert_eq!(alloc.stats().live_bytes, 1024);

        // Clones share the allocation; memory is freed on the last drop.
        let b2 = b.clone();
        drop(b);
        assert_eq!(alloc.stats().live_bytes, 1024);
        drop(b2);
        assert_eq!(alloc.stats().live_bytes, 0);
        assert_eq!(alloc.stats().total_allocations, 2);
    }

    #[test]
    fn test_out_of_memory() {
        let alloc = HostBackedAllocator::new(1, Some(2048));
        let _held = alloc.allocate(vec![0u8; 1500]).unwrap();

        let err = alloc.copy_to_device(&[0u8; 1000]).unwrap_err();
        match err {
            DeviceError::OutOfMemory {
                device_id,
                requested,
                available,
            } => {
                assert_eq!(device_id, 1);
                assert_eq!(requested, 1000);
                assert_eq!(available, 548);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(alloc.stats().live_bytes, 1500);
    }

    #[test]
    fn test_copy_counters() {
        let alloc = HostBackedAllocator::unbounded();
        let buf = alloc.copy_to_device(&[7u8; 300]).unwrap();
        assert_eq!(buf.copy_to_host().unwrap(), vec![7u8; 300]);

        let stats = alloc.stats();
        assert_eq!(stats.h2d_bytes, 300);
        assert_eq!(stats.d2h_bytes, 300);
        assert_eq!(stats.d2h_copies, 1);
    }
}
