//! CUDA-backed device allocator (`cuda` feature).

use std::sync::Arc;

use cudarc::driver::{CudaContext, CudaSlice, CudaStream, DriverError};
use tracing::{debug, info};

use crate::gpu::memory::{DeviceAllocation, DeviceAllocator, DeviceBuffer, DeviceError};

impl From<DriverError> for DeviceError {
    fn from(err: DriverError) -> Self {
        DeviceError::CudaError(err.to_string())
    }
}

/// Allocates buffers on one CUDA device using its default stream.
pub struct CudaAllocator {
    device_id: usize,
    stream: Arc<CudaStream>,
}

impl CudaAllocator {
    pub fn new(device_id: usize) -> Result<Self, DeviceError> {
        let count = CudaContext::device_count()?;
        if device_id >= count.max(0) as usize {
            return Err(DeviceError::DeviceNotAvailable(device_id));
        }
        let ctx = CudaContext::new(device_id)?;
        info!(device = device_id, "CUDA context created");
        Ok(Self {
            device_id,
            stream: ctx.default_stream(),
        })
    }
}

impl DeviceAllocator for CudaAllocator {
    fn copy_to_device(&self, data: &[u8]) -> Result<DeviceBuffer, DeviceError> {
        let slice = self.stream.memcpy_stod(data)?;
        debug!(device = self.device_id, size = data.len(), "H2D transfer");
        Ok(DeviceBuffer::new(CudaAllocation {
            device_id: self.device_id,
            stream: Arc::clone(&self.stream),
            slice,
        }))
    }

    fn name(&self) -> &str {
        "cuda"
    }
}

struct CudaAllocation {
    device_id: usize,
    stream: Arc<CudaStream>,
    slice: CudaSlice<u8>,
}

impl DeviceAllocation for CudaAllocation {
    fn len(&self) -> usize {
        self.slice.len()
    }

    fn device_id(&self) -> usize {
        self.device_id
    }

    fn copy_to_host(&self) -> Result<Vec<u8>, DeviceError> {
        let data = self.stream.memcpy_dtov(&self.slice)?;
        debug!(device = self.device_id, size = data.len(), "D2H transfer");
        Ok(data)
    }
}
