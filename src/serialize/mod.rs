//! Serialization across tier boundaries.
//!
//! - [`frame`]: host/device frames produced by object serializers
//! - [`artifact`]: the built-in artifact value and its serializer
//! - [`device`]: device↔host transform (copies device frames to host)
//! - [`disk`]: host↔disk transform (flattens host values into byte frames)

pub mod artifact;
pub mod device;
pub mod disk;
pub mod frame;

use thiserror::Error;

use crate::gpu::DeviceError;

pub use artifact::{Artifact, ArtifactMeta, ArtifactSerializer};
pub use device::{DeviceHeader, DeviceSerialized, DeviceSerializer, HostObject, TransferStats};
pub use disk::DiskCodec;
pub use frame::Frame;

/// Metadata produced by an object serializer alongside its frames.
pub type Header = serde_json::Value;

#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("Serializer failed: {0}")]
    Serializer(String),

    #[error("Device copy failed: {0}")]
    Device(#[from] DeviceError),

    #[error("Header has {flags} device flags but {parts} parts")]
    FlagMismatch { flags: usize, parts: usize },

    #[error("Expected {expected} frames, got {actual}")]
    FrameCount { expected: usize, actual: usize },

    #[error("Frame {index} is device-resident but the target tier is host-only")]
    DeviceFrameOnHost { index: usize },

    #[error("Unexpected encoding: {0}")]
    UnexpectedEncoding(&'static str),

    #[error("Invalid header: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Zstd compression failed: {0}")]
    Zstd(#[from] std::io::Error),
}

/// The generic object serializer the cache calls into.
///
/// `serialize` must not copy device memory: device-resident parts of the
/// value come back as [`Frame::Device`] handles sharing the value's buffers.
pub trait ObjectSerializer<V>: Send + Sync {
    fn serialize(&self, value: &V) -> Result<(Header, Vec<Frame>), SerializationError>;

    fn deserialize(&self, header: Header, frames: Vec<Frame>) -> Result<V, SerializationError>;
}

/// A pair of functions moving a value to and from the next tier.
///
/// `up(down(v))` must rebuild a value equal to `v`.
pub trait Transform<V> {
    type Encoded;

    fn down(&self, value: &V) -> Result<Self::Encoded, SerializationError>;

    fn up(&self, encoded: Self::Encoded) -> Result<V, SerializationError>;
}

/// Passes values through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl<V: Clone> Transform<V> for Identity {
    type Encoded = V;

    fn down(&self, value: &V) -> Result<V, SerializationError> {
        Ok(value.clone())
    }

    fn up(&self, encoded: V) -> Result<V, SerializationError> {
        Ok(encoded)
    }
}
