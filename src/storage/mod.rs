//! Disk tier.
//!
//! - [`key`]: reversible key ↔ file name encoding
//! - [`persistent`]: one-file-per-key frame store

pub mod key;
pub mod persistent;

use std::path::PathBuf;

use thiserror::Error;

pub use key::StorageKey;
pub use persistent::{DiskIoStats, PersistentStore};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt block file {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
}
