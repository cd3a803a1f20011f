//! Device ↔ host transform.
//!
//! Spilling a device-resident value serializes it and copies only its device
//! frames into host memory; promotion allocates fresh device buffers for the
//! flagged parts and deserializes. Host frames pass through untouched.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::weigher::Sizeof;
use crate::gpu::DeviceAllocator;
use crate::serialize::{Frame, Header, ObjectSerializer, SerializationError, Transform};

/// Header of a [`DeviceSerialized`] value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceHeader {
    /// Header produced by the object serializer.
    #[serde(rename = "sub-header")]
    pub sub_header: Header,

    /// One flag per part: whether the part was copied off the device.
    #[serde(rename = "is-cuda")]
    pub is_cuda: Vec<bool>,
}

/// A device-resident value stored in host memory.
#[derive(Debug, Clone)]
pub struct DeviceSerialized {
    pub header: DeviceHeader,
    pub parts: Vec<Bytes>,
}

impl DeviceSerialized {
    pub fn nbytes(&self) -> usize {
        self.parts.iter().map(Bytes::len).sum()
    }

    /// Number of parts that came from device memory.
    pub fn device_parts(&self) -> usize {
        self.header.is_cuda.iter().filter(|&&flag| flag).count()
    }
}

impl Sizeof for DeviceSerialized {
    fn sizeof(&self) -> u64 {
        self.nbytes() as u64
    }
}

/// Value type of the host tier.
#[derive(Debug, Clone)]
pub enum HostObject<V> {
    /// A value that was inserted as host-resident.
    Value(V),
    /// A device-resident value spilled from the device tier.
    DeviceSerialized(DeviceSerialized),
}

impl<V> HostObject<V> {
    pub fn is_device_serialized(&self) -> bool {
        matches!(self, HostObject::DeviceSerialized(_))
    }
}

impl<V: Sizeof> Sizeof for HostObject<V> {
    fn sizeof(&self) -> u64 {
        match self {
            HostObject::Value(value) => value.sizeof(),
            HostObject::DeviceSerialized(serialized) => serialized.sizeof(),
        }
    }
}

/// Copy traffic across the device boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferStats {
    pub d2h_bytes: u64,
    pub h2d_bytes: u64,
    pub d2h_copies: u64,
    pub h2d_copies: u64,
}

#[derive(Debug, Default)]
struct TransferCounters {
    d2h_bytes: AtomicU64,
    h2d_bytes: AtomicU64,
    d2h_copies: AtomicU64,
    h2d_copies: AtomicU64,
}

impl TransferCounters {
    fn record_d2h(&self, bytes: usize) {
        self.d2h_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.d2h_copies.fetch_add(1, Ordering::Relaxed);
    }

    fn record_h2d(&self, bytes: usize) {
        self.h2d_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.h2d_copies.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> TransferStats {
        TransferStats {
            d2h_bytes: self.d2h_bytes.load(Ordering::Relaxed),
            h2d_bytes: self.h2d_bytes.load(Ordering::Relaxed),
            d2h_copies: self.d2h_copies.load(Ordering::Relaxed),
            h2d_copies: self.h2d_copies.load(Ordering::Relaxed),
        }
    }
}

/// Transform between device-resident values and [`HostObject::DeviceSerialized`].
pub struct DeviceSerializer<V> {
    serializer: Arc<dyn ObjectSerializer<V>>,
    allocator: Arc<dyn DeviceAllocator>,
    counters: TransferCounters,
}

impl<V> DeviceSerializer<V> {
    pub fn new(serializer: Arc<dyn ObjectSerializer<V>>, allocator: Arc<dyn DeviceAllocator>) -> Self {
        Self {
            serializer,
            allocator,
            counters: TransferCounters::default(),
        }
    }

    pub fn stats(&self) -> TransferStats {
        self.counters.snapshot()
    }

    /// Serialize `value` and move its device frames into host memory.
    pub fn device_to_host(&self, value: &V) -> Result<DeviceSerialized, SerializationError> {
        let (sub_header, frames) = self.serializer.serialize(value)?;

        let mut is_cuda = Vec::with_capacity(frames.len());
        let mut parts = Vec::with_capacity(frames.len());
        for frame in frames {
            match frame {
                Frame::Device(buffer) => {
                    let host = buffer.copy_to_host()?;
                    self.counters.record_d2h(host.len());
                    is_cuda.push(true);
                    parts.push(Bytes::from(host));
                }
                Frame::Host(bytes) => {
                    is_cuda.push(false);
                    parts.push(bytes);
                }
            }
        }

        let serialized = DeviceSerialized {
            header: DeviceHeader { sub_header, is_cuda },
            parts,
        };
        debug!(
            parts = serialized.parts.len(),
            device_parts = serialized.device_parts(),
            bytes = serialized.nbytes(),
            "Device to host"
        );
        Ok(serialized)
    }

    /// Rebuild a device-resident value from its host copy.
    pub fn host_to_device(&self, serialized: DeviceSerialized) -> Result<V, SerializationError> {
        let DeviceSerialized { header, parts } = serialized;
        if header.is_cuda.len() != parts.len() {
            return Err(SerializationError::FlagMismatch {
                flags: header.is_cuda.len(),
                parts: parts.len(),
            });
        }

        let frames = header
            .is_cuda
            .iter()
            .zip(parts)
            .map(|(&is_cuda, part)| {
                if is_cuda {
                    let buffer = self.allocator.copy_to_device(&part)?;
                    self.counters.record_h2d(part.len());
                    Ok(Frame::Device(buffer))
                } else {
                    Ok(Frame::Host(part))
                }
            })
            .collect::<Result<Vec<_>, SerializationError>>()?;

        debug!(
            allocator = self.allocator.name(),
            parts = frames.len(),
            "Host to device"
        );
        self.serializer.deserialize(header.sub_header, frames)
    }
}

impl<V> Transform<V> for DeviceSerializer<V> {
    type Encoded = HostObject<V>;

    fn down(&self, value: &V) -> Result<HostObject<V>, SerializationError> {
        self.device_to_host(value).map(HostObject::DeviceSerialized)
    }

    fn up(&self, encoded: HostObject<V>) -> Result<V, SerializationError> {
        match encoded {
            HostObject::DeviceSerialized(serialized) => self.host_to_device(serialized),
            HostObject::Value(_) => Err(SerializationError::UnexpectedEncoding(
                "host value where device-serialized data was expected",
            )),
        }
    }
}

impl<V> fmt::Debug for DeviceSerializer<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSerializer")
            .field("allocator", &self.allocator.name())
            .field("stats", &self.stats())
            .finish()
    }
}
