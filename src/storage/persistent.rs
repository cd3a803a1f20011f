//! One-file-per-key frame store.
//!
//! Each key is stored as a single file inside the store directory, named by
//! [`StorageKey::to_file_name`] (shortened by [`bounded_file_name`] when too
//! long). Directory membership is the index: opening a store scans the
//! directory and picks up every file left by a previous run.
//!
//! File layout (little-endian):
//!
//! ```text
//! magic "DHC1" | u32 name length | encoded key | u32 frame count | (u64 length | bytes) per frame
//! ```
//!
//! The encoded key lets shortened names be mapped back to their key.
//! Writes go to `<name>.tmp`, are synced, then renamed over the final name.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use bytes::{Buf, Bytes};
use tracing::{debug, info, warn};

use crate::cache::store::Store;
use crate::error::CacheError;
use crate::storage::key::{bounded_file_name, is_hashed_file_name};
use crate::storage::{StorageError, StorageKey};

const MAGIC: &[u8; 4] = b"DHC1";
const TMP_SUFFIX: &str = ".tmp";

/// Upper bound on the encoded key read back from a file header.
const MAX_ENCODED_KEY_LEN: usize = 1 << 20;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DiskIoStats {
    pub total_writes: u64,
    pub total_reads: u64,
    pub total_deletes: u64,
    pub total_bytes_written: u64,
    pub total_bytes_read: u64,
}

#[derive(Debug, Clone)]
struct DiskEntry {
    file_name: String,
    size: u64,
}

/// Durable key → frames mapping backed by one file per key.
pub struct PersistentStore<K> {
    directory: PathBuf,

    /// Keys on disk with their file names and sizes.
    files: HashMap<K, DiskEntry>,

    stats: DiskIoStats,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl<K: StorageKey> PersistentStore<K> {
    /// Open (creating if needed) a store rooted at `directory`.
    pub fn open(directory: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let directory = directory.into();
        fs::create_dir_all(&directory).map_err(io_error(&directory))?;

        let mut files = HashMap::new();
        for entry in fs::read_dir(&directory).map_err(io_error(&directory))? {
            let entry = entry.map_err(io_error(&directory))?;
            let path = entry.path();
            let metadata = entry.metadata().map_err(io_error(&path))?;
            if !metadata.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                warn!(path = %path.display(), "Skipping non UTF-8 file name");
                continue;
            };

            if let Some(stem) = name.strip_suffix(TMP_SUFFIX) {
                if K::from_file_name(stem).is_some() || is_hashed_file_name(stem) {
                    warn!(path = %path.display(), "Removing leftover temporary file");
                    fs::remove_file(&path).map_err(io_error(&path))?;
                } else {
                    warn!(path = %path.display(), "Skipping file that is not a cache key");
                }
                continue;
            }

            match recover_key::<K>(&path, name) {
                Some(key) => {
                    files.insert(
                        key,
                        DiskEntry {
                            file_name: name.to_string(),
                            size: metadata.len(),
                        },
                    );
                }
                None => warn!(path = %path.display(), "Skipping file that is not a cache key"),
            }
        }

        info!(
            directory = %directory.display(),
            entries = files.len(),
            "Opened persistent store"
        );

        Ok(Self {
            directory,
            files,
            stats: DiskIoStats::default(),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Write `frames` as the file for `key`, replacing any previous file.
    ///
    /// On failure the previous file, if any, is left untouched.
    pub fn put(&mut self, key: K, frames: Vec<Bytes>) -> Result<(), StorageError> {
        let encoded = key.to_file_name();
        let file_name = match self.files.get(&key) {
            Some(entry) => entry.file_name.clone(),
            None => bounded_file_name(&encoded).into_owned(),
        };
        let path = self.directory.join(&file_name);
        let tmp_path = self.directory.join(format!("{file_name}{TMP_SUFFIX}"));

        let size = match write_file(&tmp_path, &encoded, &frames) {
            Ok(size) => size,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path);
                return Err(err);
            }
        };
        if let Err(source) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(StorageError::Io { path, source });
        }

        debug!(
            key = ?key,
            path = %path.display(),
            frames = frames.len(),
            size,
            "Wrote block to disk"
        );

        self.stats.total_writes += 1;
        self.stats.total_bytes_written += size;
        self.files.insert(key, DiskEntry { file_name, size });
        Ok(())
    }

    /// Read the frames stored for `key`.
    pub fn get(&mut self, key: &K) -> Result<Vec<Bytes>, CacheError> {
        let path = self.path_for(key)?;
        let data = fs::read(&path).map_err(io_error(&path))?;
        let size = data.len() as u64;
        let (stored_key, frames) = read_file(&path, Bytes::from(data))?;
        if stored_key != key.to_file_name().as_bytes() {
            return Err(StorageError::Corrupt {
                path,
                reason: "file holds a different key".to_string(),
            }
            .into());
        }

        debug!(key = ?key, path = %path.display(), size, "Read block from disk");

        self.stats.total_reads += 1;
        self.stats.total_bytes_read += size;
        Ok(frames)
    }

    /// Remove the file for `key`.
    pub fn delete(&mut self, key: &K) -> Result<(), CacheError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                self.files.remove(key);
                return Err(CacheError::not_found(key));
            }
            Err(source) => return Err(StorageError::Io { path, source }.into()),
        }

        debug!(key = ?key, path = %path.display(), "Deleted block file");
        self.files.remove(key);
        self.stats.total_deletes += 1;
        Ok(())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.files.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.files.keys()
    }

    /// Total size of the files held by this store.
    pub fn disk_usage(&self) -> u64 {
        self.files.values().map(|entry| entry.size).sum()
    }

    pub fn stats(&self) -> &DiskIoStats {
        &self.stats
    }

    fn path_for(&self, key: &K) -> Result<PathBuf, CacheError> {
        self.files
            .get(key)
            .map(|entry| self.directory.join(&entry.file_name))
            .ok_or_else(|| CacheError::not_found(key))
    }
}

/// Key stored under `name`, read from the file header for shortened names.
fn recover_key<K: StorageKey>(path: &Path, name: &str) -> Option<K> {
    if let Some(key) = K::from_file_name(name) {
        return Some(key);
    }
    if !is_hashed_file_name(name) {
        return None;
    }
    match read_encoded_key(path) {
        Ok(encoded) => K::from_file_name(&encoded),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Unreadable block header");
            None
        }
    }
}

fn read_encoded_key(path: &Path) -> Result<String, StorageError> {
    let corrupt = |reason: &str| StorageError::Corrupt {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let mut file = File::open(path).map_err(io_error(path))?;
    let mut header = [0u8; 8];
    file.read_exact(&mut header).map_err(io_error(path))?;
    if &header[..MAGIC.len()] != MAGIC {
        return Err(corrupt("bad header"));
    }
    let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if len > MAX_ENCODED_KEY_LEN {
        return Err(corrupt("key too long"));
    }
    let mut encoded = vec![0u8; len];
    file.read_exact(&mut encoded).map_err(io_error(path))?;
    String::from_utf8(encoded).map_err(|_| corrupt("key is not UTF-8"))
}

fn write_file(path: &Path, encoded: &str, frames: &[Bytes]) -> Result<u64, StorageError> {
    let file = File::create(path).map_err(io_error(path))?;
    let mut writer = BufWriter::new(file);

    writer.write_all(MAGIC).map_err(io_error(path))?;
    writer
        .write_all(&(encoded.len() as u32).to_le_bytes())
        .map_err(io_error(path))?;
    writer
        .write_all(encoded.as_bytes())
        .map_err(io_error(path))?;
    writer
        .write_all(&(frames.len() as u32).to_le_bytes())
        .map_err(io_error(path))?;
    let mut size = (MAGIC.len() + 4 + encoded.len() + 4) as u64;
    for frame in frames {
        writer
            .write_all(&(frame.len() as u64).to_le_bytes())
            .map_err(io_error(path))?;
        writer.write_all(frame).map_err(io_error(path))?;
        size += 8 + frame.len() as u64;
    }

    let file = writer
        .into_inner()
        .map_err(|err| io_error(path)(err.into_error()))?;
    file.sync_all().map_err(io_error(path))?;
    Ok(size)
}

/// Split a file into its encoded key and frames.
fn read_file(path: &Path, mut data: Bytes) -> Result<(Bytes, Vec<Bytes>), StorageError> {
    let corrupt = |reason: &str| StorageError::Corrupt {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    if data.len() < MAGIC.len() + 4 || &data[..MAGIC.len()] != MAGIC {
        return Err(corrupt("bad header"));
    }
    data.advance(MAGIC.len());
    let key_len = data.get_u32_le() as usize;
    if data.remaining() < key_len + 4 {
        return Err(corrupt("truncated key"));
    }
    let key = data.split_to(key_len);
    let count = data.get_u32_le() as usize;

    let mut frames = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        if data.remaining() < 8 {
            return Err(corrupt("truncated frame length"));
        }
        let len = data.get_u64_le();
        if (data.remaining() as u64) < len {
            return Err(corrupt("truncated frame"));
        }
        frames.push(data.split_to(len as usize));
    }
    if data.has_remaining() {
        return Err(corrupt("trailing bytes"));
    }
    Ok((key, frames))
}

impl<K: StorageKey> Store<K> for PersistentStore<K> {
    type Value = Vec<Bytes>;

    fn put(&mut self, key: K, value: Vec<Bytes>) -> Result<(), CacheError> {
        PersistentStore::put(self, key, value).map_err(CacheError::from)
    }

    fn get(&mut self, key: &K) -> Result<Vec<Bytes>, CacheError> {
        PersistentStore::get(self, key)
    }

    fn delete(&mut self, key: &K) -> Result<(), CacheError> {
        PersistentStore::delete(self, key)
    }

    fn contains(&self, key: &K) -> bool {
        PersistentStore::contains(self, key)
    }

    fn len(&self) -> usize {
        PersistentStore::len(self)
    }

    fn keys<'a>(&'a self) -> impl Iterator<Item = &'a K> + 'a
    where
        K: 'a,
    {
        PersistentStore::keys(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn frames() -> Vec<Bytes> {
        vec![Bytes::from_static(b"{\"kind\":\"object\"}"), Bytes::from(vec![42u8; 4096])]
    }

    #[test]
    fn test_write_and_read_block() {
        let tmp = TempDir::new().unwrap();
        let mut store = PersistentStore::<String>::open(tmp.path().join("storage")).unwrap();

        store.put("x".to_string(), frames()).unwrap();
        assert!(store.directory().join("x").exists());
        assert_eq!(store.get(&"x".to_string()).unwrap(), frames());
        assert_eq!(store.stats().total_writes, 1);
        assert_eq!(store.stats().total_reads, 1);
    }

    #[test]
    fn test_delete_block() {
        let tmp = TempDir::new().unwrap();
        let mut store = PersistentStore::<u64>::open(tmp.path()).unwrap();

        store.put(5, frames()).unwrap();
        store.delete(&5).unwrap();

        assert!(store.get(&5).unwrap_err().is_not_found());
        assert!(store.delete(&5).unwrap_err().is_not_found());
        assert!(store.is_empty());
    }

    #[test]
    fn test_empty_frame_list() {
        let tmp = TempDir::new().unwrap();
        let mut store = PersistentStore::<u64>::open(tmp.path()).unwrap();

        store.put(1, Vec::new()).unwrap();
        assert!(store.get(&1).unwrap().is_empty());
        // Magic, name length, "1", frame count.
        assert_eq!(store.disk_usage(), 4 + 4 + 1 + 4);
    }

    #[test]
    fn test_corrupt_file_detected() {
        let tmp = TempDir::new().unwrap();
        let mut store = PersistentStore::<String>::open(tmp.path()).unwrap();
        store.put("k".to_string(), frames()).unwrap();

        fs::write(tmp.path().join("k"), b"DHC1\x05\x00\x00\x00").unwrap();
        let err = store.get(&"k".to_string()).unwrap_err();
        assert!(matches!(err, CacheError::Storage(StorageError::Corrupt { .. })));
    }

    #[test]
    fn test_overwrite_replaces_file() {
        let tmp = TempDir::new().unwrap();
        let mut store = PersistentStore::<String>::open(tmp.path()).unwrap();

        store.put("k".to_string(), frames()).unwrap();
        store.put("k".to_string(), vec![Bytes::from_static(b"new")]).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&"k".to_string()).unwrap(), vec![Bytes::from_static(b"new")]);
        assert_eq!(store.disk_usage(), 4 + 4 + 1 + 4 + 8 + 3);
    }

    #[test]
    fn test_long_key_uses_bounded_name() {
        let tmp = TempDir::new().unwrap();
        let key = "a/".repeat(150);
        {
            let mut store = PersistentStore::<String>::open(tmp.path()).unwrap();
            store.put(key.clone(), frames()).unwrap();
            assert_eq!(store.get(&key).unwrap(), frames());
        }

        let names: Vec<String> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].len() <= crate::storage::key::MAX_FILE_NAME_LEN);

        let mut store = PersistentStore::<String>::open(tmp.path()).unwrap();
        assert_eq!(store.keys().cloned().collect::<Vec<_>>(), vec![key.clone()]);
        assert_eq!(store.get(&key).unwrap(), frames());
        store.delete(&key).unwrap();
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_file_for_another_key_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut store = PersistentStore::<String>::open(tmp.path()).unwrap();
        store.put("a".to_string(), frames()).unwrap();
        store.put("b".to_string(), frames()).unwrap();

        fs::copy(tmp.path().join("a"), tmp.path().join("b")).unwrap();
        let err = store.get(&"b".to_string()).unwrap_err();
        assert!(matches!(err, CacheError::Storage(StorageError::Corrupt { .. })));
    }
}
