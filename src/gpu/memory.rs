//! Accelerator memory handles.
//!
//! A [`DeviceBuffer`] is a shared handle to one accelerator allocation. The
//! underlying memory is released when the last handle is dropped, which is
//! what lets the cache free device memory exactly when an entry leaves the
//! device tier.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Out of device memory on device {device_id}: requested {requested} bytes, {available} available")]
    OutOfMemory {
        device_id: usize,
        requested: usize,
        available: usize,
    },

    #[error("Device {0} not available")]
    DeviceNotAvailable(usize),

    #[error("CUDA error: {0}")]
    CudaError(String),
}

/// One live allocation in accelerator memory.
///
/// Implementations release their memory on drop.
pub trait DeviceAllocation: Send + Sync {
    /// Size of the allocation in bytes.
    fn len(&self) -> usize;

    /// Index of the device holding the allocation.
    fn device_id(&self) -> usize;

    /// Copy the allocation's contents into a new host buffer (device-to-host).
    fn copy_to_host(&self) -> Result<Vec<u8>, DeviceError>;
}

/// Allocates accelerator memory and fills it from host memory.
pub trait DeviceAllocator: Send + Sync {
    /// Allocate `data.len()` bytes on the device and copy `data` into them
    /// (host-to-device).
    fn copy_to_device(&self, data: &[u8]) -> Result<DeviceBuffer, DeviceError>;

    /// Short name used in logs.
    fn name(&self) -> &str;
}

/// Shared handle to accelerator memory.
#[derive(Clone)]
pub struct DeviceBuffer {
    inner: Arc<dyn DeviceAllocation>,
}

impl DeviceBuffer {
    pub fn new(allocation: impl DeviceAllocation + 'static) -> Self {
        Self {
            inner: Arc::new(allocation),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }

    pub fn device_id(&self) -> usize {
        self.inner.device_id()
    }

    pub fn copy_to_host(&self) -> Result<Vec<u8>, DeviceError> {
        self.inner.copy_to_host()
    }

    /// Whether two handles refer to the same allocation.
    pub fn same_allocation(&self, other: &DeviceBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("device_id", &self.device_id())
            .field("len", &self.len())
            .finish()
    }
}
