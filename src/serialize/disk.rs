//! Host ↔ disk transform.
//!
//! Flattens a host-tier value into a list of byte frames for the persistent
//! store. The first frame is a JSON envelope describing the payload; the
//! remaining frames are the payload's parts, optionally zstd-compressed.

use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::config::CompressionConfig;
use crate::serialize::device::{DeviceHeader, DeviceSerialized, HostObject};
use crate::serialize::{Frame, Header, ObjectSerializer, SerializationError, Transform};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum PayloadKind {
    Object,
    DeviceSerialized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Compression {
    Zstd,
}

#[derive(Debug, Serialize, Deserialize)]
struct DiskEnvelope {
    kind: PayloadKind,
    header: Header,
    compression: Option<Compression>,
}

/// Transform between [`HostObject`] values and byte frames.
pub struct DiskCodec<V> {
    serializer: Arc<dyn ObjectSerializer<V>>,
    config: CompressionConfig,
    _value: PhantomData<fn() -> V>,
}

impl<V> DiskCodec<V> {
    pub fn new(serializer: Arc<dyn ObjectSerializer<V>>, config: CompressionConfig) -> Self {
        Self {
            serializer,
            config,
            _value: PhantomData,
        }
    }

    fn compression(&self) -> Option<Compression> {
        self.config.disk_zstd_compression.then_some(Compression::Zstd)
    }

    fn encode_parts(
        &self,
        envelope: DiskEnvelope,
        parts: impl IntoIterator<Item = Bytes>,
    ) -> Result<Vec<Bytes>, SerializationError> {
        let mut frames = vec![Bytes::from(serde_json::to_vec(&envelope)?)];
        for part in parts {
            let part = match envelope.compression {
                Some(Compression::Zstd) => {
                    Bytes::from(zstd::encode_all(&part[..], self.config.zstd_level)?)
                }
                None => part,
            };
            frames.push(part);
        }
        Ok(frames)
    }
}

impl<V> Transform<HostObject<V>> for DiskCodec<V> {
    type Encoded = Vec<Bytes>;

    fn down(&self, value: &HostObject<V>) -> Result<Vec<Bytes>, SerializationError> {
        match value {
            HostObject::Value(value) => {
                let (header, frames) = self.serializer.serialize(value)?;
                let parts = frames
                    .into_iter()
                    .enumerate()
                    .map(|(index, frame)| match frame {
                        Frame::Host(bytes) => Ok(bytes),
                        Frame::Device(_) => Err(SerializationError::DeviceFrameOnHost { index }),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let envelope = DiskEnvelope {
                    kind: PayloadKind::Object,
                    header,
                    compression: self.compression(),
                };
                self.encode_parts(envelope, parts)
            }
            HostObject::DeviceSerialized(serialized) => {
                let envelope = DiskEnvelope {
                    kind: PayloadKind::DeviceSerialized,
                    header: serde_json::to_value(&serialized.header)?,
                    compression: self.compression(),
                };
                self.encode_parts(envelope, serialized.parts.iter().cloned())
            }
        }
    }

    fn up(&self, encoded: Vec<Bytes>) -> Result<HostObject<V>, SerializationError> {
        let mut frames = encoded.into_iter();
        let first = frames
            .next()
            .ok_or(SerializationError::UnexpectedEncoding("empty frame list"))?;
        let envelope: DiskEnvelope = serde_json::from_slice(&first)?;

        let parts = frames
            .map(|part| match envelope.compression {
                Some(Compression::Zstd) => zstd::decode_all(&part[..]).map(Bytes::from),
                None => Ok(part),
            })
            .collect::<Result<Vec<_>, _>>()?;

        match envelope.kind {
            PayloadKind::Object => {
                let frames = parts.into_iter().map(Frame::Host).collect();
                self.serializer
                    .deserialize(envelope.header, frames)
                    .map(HostObject::Value)
            }
            PayloadKind::DeviceSerialized => {
                let header: DeviceHeader = serde_json::from_value(envelope.header)?;
                if header.is_cuda.len() != parts.len() {
                    return Err(SerializationError::FlagMismatch {
                        flags: header.is_cuda.len(),
                        parts: parts.len(),
                    });
                }
                Ok(HostObject::DeviceSerialized(DeviceSerialized { header, parts }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{DeviceAllocator, HostBackedAllocator};
    use crate::serialize::{Artifact, ArtifactMeta, ArtifactSerializer};

    fn codec(zstd: bool) -> DiskCodec<Artifact> {
        let config = CompressionConfig {
            disk_zstd_compression: zstd,
            ..Default::default()
        };
        DiskCodec::new(Arc::new(ArtifactSerializer), config)
    }

    fn host_artifact() -> Artifact {
        Artifact::host(
            ArtifactMeta::new("y", "uint8", vec![4096]),
            [Bytes::from(vec![42u8; 4096])],
        )
    }

    #[test]
    fn test_host_value_roundtrip() {
        let codec = codec(false);
        let frames = codec.down(&HostObject::Value(host_artifact())).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].len(), 4096);

        match codec.up(frames).unwrap() {
            HostObject::Value(artifact) => {
                assert_eq!(artifact.meta, host_artifact().meta);
                assert_eq!(artifact.host_bytes().unwrap(), host_artifact().host_bytes().unwrap());
            }
            HostObject::DeviceSerialized(_) => panic!("decoded the wrong payload kind"),
        }
    }

    #[test]
    fn test_zstd_shrinks_parts() {
        let codec = codec(true);
        let frames = codec.down(&HostObject::Value(host_artifact())).unwrap();
        assert!(frames[1].len() < 4096); // should compress well

        let decoded = codec.up(frames).unwrap();
        assert!(!decoded.is_device_serialized());
    }

    #[test]
    fn test_device_serialized_keeps_flags() {
        let codec = codec(true);
        let serialized = DeviceSerialized {
            header: DeviceHeader {
                sub_header: serde_json::json!({"meta": "opaque"}),
                is_cuda: vec![true, false],
            },
            parts: vec![Bytes::from(vec![1u8; 100]), Bytes::from_static(b"host")],
        };

        let frames = codec.down(&HostObject::DeviceSerialized(serialized)).unwrap();
        match codec.up(frames).unwrap() {
            HostObject::DeviceSerialized(back) => {
                assert_eq!(back.header.is_cuda, vec![true, false]);
                assert_eq!(back.parts[1], Bytes::from_static(b"host"));
                assert_eq!(back.nbytes(), 104);
            }
            HostObject::Value(_) => panic!("decoded the wrong payload kind"),
        }
    }

    #[test]
    fn test_device_frame_cannot_go_to_disk() {
        let alloc = HostBackedAllocator::unbounded();
        let artifact = Artifact::device(
            ArtifactMeta::new("z", "float16", vec![8]),
            [alloc.copy_to_device(&[0u8; 16]).unwrap()],
        );

        let err = codec(false).down(&HostObject::Value(artifact)).unwrap_err();
        assert!(matches!(err, SerializationError::DeviceFrameOnHost { index: 0 }));
    }

    #[test]
    fn test_empty_frames_rejected() {
        let err = codec(false).up(Vec::new()).unwrap_err();
        assert!(matches!(err, SerializationError::UnexpectedEncoding(_)));
    }
}
