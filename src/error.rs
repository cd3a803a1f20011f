//! Crate-level error type.

use std::fmt::Debug;

use thiserror::Error;

use crate::serialize::SerializationError;
use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Storage failed: {0}")]
    Storage(#[from] StorageError),
}

impl CacheError {
    pub fn not_found(key: &impl Debug) -> Self {
        CacheError::NotFound(format!("{key:?}"))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound(_))
    }
}
