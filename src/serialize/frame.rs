//! Serialized frames.

use bytes::Bytes;

use crate::gpu::{DeviceBuffer, DeviceError};

/// One contiguous buffer of a serialized value.
#[derive(Debug, Clone)]
pub enum Frame {
    /// Ordinary host memory.
    Host(Bytes),
    /// Accelerator memory.
    Device(DeviceBuffer),
}

impl Frame {
    pub fn is_device(&self) -> bool {
        matches!(self, Frame::Device(_))
    }

    pub fn nbytes(&self) -> usize {
        match self {
            Frame::Host(bytes) => bytes.len(),
            Frame::Device(buffer) => buffer.len(),
        }
    }

    /// The frame's contents in host memory, copying from the device if needed.
    pub fn to_host(&self) -> Result<Bytes, DeviceError> {
        match self {
            Frame::Host(bytes) => Ok(bytes.clone()),
            Frame::Device(buffer) => buffer.copy_to_host().map(Bytes::from),
        }
    }
}

impl From<Bytes> for Frame {
    fn from(bytes: Bytes) -> Self {
        Frame::Host(bytes)
    }
}

impl From<Vec<u8>> for Frame {
    fn from(bytes: Vec<u8>) -> Self {
        Frame::Host(Bytes::from(bytes))
    }
}

impl From<DeviceBuffer> for Frame {
    fn from(buffer: DeviceBuffer) -> Self {
        Frame::Device(buffer)
    }
}
