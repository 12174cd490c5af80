#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

pub mod config;
pub mod error;
mod get;
mod handle;
mod item;
mod manager;
mod page;
mod page_manager;
pub mod partition;
pub mod platform;
mod set;
mod storage;

/// Maximum Key length is 15 bytes + 1 byte for the null terminator.
const MAX_KEY_LENGTH: usize = 15;
const MAX_KEY_NUL_TERMINATED_LENGTH: usize = MAX_KEY_LENGTH + 1;

/// A 16-byte key used for values and namespace names (15 characters + null terminator)
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Key([u8; MAX_KEY_NUL_TERMINATED_LENGTH]);

impl Key {
    /// Checked conversion for keys known only at runtime. Fails with `InvalidArg` for an
    /// empty key and `KeyTooLong` beyond 15 bytes.
    pub fn new(s: &str) -> Result<Self, Error> {
        if s.is_empty() || s.as_bytes().contains(&0) {
            return Err(Error::InvalidArg);
        }
        if s.len() > MAX_KEY_LENGTH {
            return Err(Error::KeyTooLong);
        }
        Ok(Self::from_str(s))
    }

    /// Creates a 16 byte, null-padded byte array used as key for values and namespaces.
    ///
    /// Usage: `Key::from_array(b"my_key")`
    ///
    /// Tip: use a const context if possible to ensure that the key is transformed at compile time:
    ///   `let my_key = const { Key::from_array(b"my_key") };`
    pub const fn from_array<const M: usize>(src: &[u8; M]) -> Self {
        assert!(M <= MAX_KEY_LENGTH);
        let mut dst = [0u8; MAX_KEY_NUL_TERMINATED_LENGTH];
        let mut i = 0;
        while i < M {
            dst[i] = src[i];
            i += 1;
        }
        Self(dst)
    }

    /// Creates a 16 byte, null-padded byte array used as key for values and namespaces.
    ///
    /// Usage: `Key::from_slice(b"my_key")`
    pub const fn from_slice(src: &[u8]) -> Self {
        assert!(src.len() <= MAX_KEY_LENGTH);
        let mut dst = [0u8; MAX_KEY_NUL_TERMINATED_LENGTH];
        let mut i = 0;
        while i < src.len() {
            dst[i] = src[i];
            i += 1;
        }
        Self(dst)
    }

    /// Creates a 16 byte, null-padded byte array used as key for values and namespaces.
    ///
    /// Usage: `Key::from_str("my_key")`
    pub const fn from_str(s: &str) -> Self {
        let bytes = s.as_bytes();
        Self::from_slice(bytes)
    }

    /// The key field as read from the medium, not validated.
    pub(crate) const fn from_raw(raw: [u8; MAX_KEY_NUL_TERMINATED_LENGTH]) -> Self {
        Self(raw)
    }

    /// Converts a key to a byte array.
    pub const fn as_bytes(&self) -> &[u8; MAX_KEY_NUL_TERMINATED_LENGTH] {
        &self.0
    }

    /// The key up to the first null byte. Keys that aren't valid UTF-8 yield the valid prefix.
    pub fn name(&self) -> &str {
        let len = self.0.iter().position(|&b| b == 0).unwrap_or(self.0.len());
        match core::str::from_utf8(&self.0[..len]) {
            Ok(name) => name,
            Err(e) => core::str::from_utf8(&self.0[..e.valid_up_to()]).unwrap_or_default(),
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key(b\"")?;

        // the last byte is always null for a valid key, leave it out
        for &byte in &self.0[..self.0.len() - 1] {
            // escape_default would escape 0 as \x00, but \0 is more readable
            if byte == 0 {
                write!(f, "\\0")?;
                continue;
            }

            write!(f, "{}", core::ascii::escape_default(byte))?;
        }

        write!(f, "\")")
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

pub use config::{DEFAULT_PARTITION_NAME, PartitionEntry, PartitionTable};
pub use error::Error;
pub use get::Get;
pub use handle::Handle;
pub use item::{ItemType, Primitive};
#[cfg(feature = "std")]
pub use manager::Nvs;
pub use manager::{EntryIterator, OpenMode, PartitionManager};
pub use page::{CHUNK_MAX_SIZE, PageState};
pub use partition::Partition;
pub use set::Set;
pub use storage::{EntryCursor, EntryInfo, Storage};

extern crate alloc;

use alloc::vec::Vec;
use core::fmt;

/// Entry counts of a partition. Free pages count as free entries.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NvsStats {
    pub used_entries: usize,
    pub free_entries: usize,
    pub total_entries: usize,
    pub namespace_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartitionStatistics {
    pub pages: PageStatistics,
    pub entries_per_page: Vec<EntryStatistics>,
    pub entries_overall: EntryStatistics,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct PageStatistics {
    pub empty: u16,
    pub active: u16,
    pub full: u16,
    pub erasing: u16,
    pub corrupted: u16,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct EntryStatistics {
    pub empty: u32,
    pub written: u32,
    pub erased: u32,
    pub illegal: u32,
}
