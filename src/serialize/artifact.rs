//! Compute artifacts: metadata plus an ordered list of host or device frames.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::cache::tier::DeviceResidency;
use crate::cache::weigher::Sizeof;
use crate::gpu::{DeviceBuffer, DeviceError};
use crate::serialize::{Frame, Header, ObjectSerializer, SerializationError};

/// Describes what an artifact's frames hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub name: String,
    pub dtype: String,
    pub shape: Vec<usize>,
}

impl ArtifactMeta {
    pub fn new(name: impl Into<String>, dtype: impl Into<String>, shape: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            dtype: dtype.into(),
            shape,
        }
    }
}

/// A cached compute result.
///
/// An artifact is device-resident when any of its frames lives in
/// accelerator memory; mixed artifacts (e.g. device columns with a host
/// index) are allowed.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub meta: ArtifactMeta,
    pub frames: Vec<Frame>,
}

impl Artifact {
    pub fn new(meta: ArtifactMeta, frames: Vec<Frame>) -> Self {
        Self { meta, frames }
    }

    /// An artifact made only of host frames.
    pub fn host(meta: ArtifactMeta, frames: impl IntoIterator<Item = Bytes>) -> Self {
        Self::new(meta, frames.into_iter().map(Frame::Host).collect())
    }

    /// An artifact made only of device frames.
    pub fn device(meta: ArtifactMeta, buffers: impl IntoIterator<Item = DeviceBuffer>) -> Self {
        Self::new(meta, buffers.into_iter().map(Frame::Device).collect())
    }

    pub fn nbytes(&self) -> usize {
        self.frames.iter().map(Frame::nbytes).sum()
    }

    /// Frame contents in host memory, copying device frames.
    pub fn host_bytes(&self) -> Result<Vec<Bytes>, DeviceError> {
        self.frames.iter().map(Frame::to_host).collect()
    }

    /// Per-frame device placement.
    pub fn placement(&self) -> Vec<bool> {
        self.frames.iter().map(Frame::is_device).collect()
    }
}

impl DeviceResidency for Artifact {
    fn is_device_resident(&self) -> bool {
        self.frames.iter().any(Frame::is_device)
    }
}

impl Sizeof for Artifact {
    fn sizeof(&self) -> u64 {
        self.nbytes() as u64
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ArtifactHeader {
    meta: ArtifactMeta,
    frame_count: usize,
}

/// Serializes artifacts as `{meta, frame_count}` plus their frames, sharing
/// frame buffers instead of copying them.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactSerializer;

impl ObjectSerializer<Artifact> for ArtifactSerializer {
    fn serialize(&self, value: &Artifact) -> Result<(Header, Vec<Frame>), SerializationError> {
        let header = serde_json::to_value(ArtifactHeader {
            meta: value.meta.clone(),
            frame_count: value.frames.len(),
        })?;
        Ok((header, value.frames.clone()))
    }

    fn deserialize(&self, header: Header, frames: Vec<Frame>) -> Result<Artifact, SerializationError> {
        let header: ArtifactHeader = serde_json::from_value(header)?;
        if header.frame_count != frames.len() {
            return Err(SerializationError::FrameCount {
                expected: header.frame_count,
                actual: frames.len(),
            });
        }
        Ok(Artifact::new(header.meta, frames))
    }
}
