//! Accelerator memory.
//!
//! - [`memory`]: device buffer handles and the allocator interface
//! - [`allocator`]: host-backed allocator used without the `cuda` feature
//! - `cuda`: CUDA allocator (feature `cuda`)

pub mod allocator;
#[cfg(feature = "cuda")]
pub mod cuda;
pub mod memory;

pub use allocator::{AllocatorStats, HostBackedAllocator};
#[cfg(feature = "cuda")]
pub use cuda::CudaAllocator;
pub use memory::{DeviceAllocation, DeviceAllocator, DeviceBuffer, DeviceError};
