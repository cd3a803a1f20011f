//! Mapping between cache keys and file names.
//!
//! String keys keep ASCII alphanumerics, `-` and `_`; every other byte is
//! written as `%XX`. Encoded names never contain `.`, so temporary files
//! (`<name>.tmp`) can't collide with a key. The empty string encodes as `%`.
//!
//! Encoded names longer than [`MAX_FILE_NAME_LEN`] are shortened by
//! [`bounded_file_name`] to a prefix plus `~` and a hash of the whole name.

use std::borrow::Cow;
use std::collections::hash_map::DefaultHasher;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};

/// Longest file name written to the store directory, leaving room for the
/// `.tmp` suffix under the usual 255 byte limit.
pub const MAX_FILE_NAME_LEN: usize = 200;

/// Bytes of the encoded name kept in front of the hash of a shortened name.
const HASHED_PREFIX_LEN: usize = 64;

/// A key the disk tier can store under a file name.
///
/// Encoded names must not contain `.` or `~`.
pub trait StorageKey: Hash + Eq + Clone + Debug {
    fn to_file_name(&self) -> String;

    /// Inverse of [`to_file_name`](Self::to_file_name); `None` for names that
    /// no key encodes to.
    fn from_file_name(name: &str) -> Option<Self>;
}

impl StorageKey for String {
    fn to_file_name(&self) -> String {
        if self.is_empty() {
            return "%".to_string();
        }
        let mut name = String::with_capacity(self.len());
        for byte in self.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
                name.push(byte as char);
            } else {
                name.push_str(&format!("%{byte:02X}"));
            }
        }
        name
    }

    fn from_file_name(name: &str) -> Option<Self> {
        if name == "%" {
            return Some(String::new());
        }
        let raw = name.as_bytes();
        let mut bytes = Vec::with_capacity(raw.len());
        let mut i = 0;
        while i < raw.len() {
            match raw[i] {
                b'%' => {
                    let hex = name.get(i + 1..i + 3)?;
                    let byte = u8::from_str_radix(hex, 16).ok()?;
                    // Reject non-canonical escapes so decoding stays one-to-one.
                    if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
                        return None;
                    }
                    if !hex.bytes().all(|b| b.is_ascii_digit() || b.is_ascii_uppercase()) {
                        return None;
                    }
                    bytes.push(byte);
                    i += 3;
                }
                b if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' => {
                    bytes.push(b);
                    i += 1;
                }
                _ => return None,
            }
        }
        String::from_utf8(bytes).ok()
    }
}

impl StorageKey for u64 {
    fn to_file_name(&self) -> String {
        self.to_string()
    }

    fn from_file_name(name: &str) -> Option<Self> {
        let value: u64 = name.parse().ok()?;
        (value.to_string() == name).then_some(value)
    }
}

/// The file name used for a key encoded as `encoded`.
pub fn bounded_file_name(encoded: &str) -> Cow<'_, str> {
    if encoded.len() <= MAX_FILE_NAME_LEN {
        return Cow::Borrowed(encoded);
    }
    let mut end = HASHED_PREFIX_LEN;
    while !encoded.is_char_boundary(end) {
        end -= 1;
    }
    let mut hasher = DefaultHasher::new();
    encoded.hash(&mut hasher);
    Cow::Owned(format!("{}~{:016x}", &encoded[..end], hasher.finish()))
}

/// Whether `name` has the shape [`bounded_file_name`] gives long names.
pub fn is_hashed_file_name(name: &str) -> bool {
    name.rsplit_once('~').is_some_and(|(prefix, hash)| {
        !prefix.contains('~') && hash.len() == 16 && hash.bytes().all(|b| b.is_ascii_hexdigit())
    })
}
