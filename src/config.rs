//! Partition table supplied by the host. The engine never discovers partitions by itself,
//! the table maps the short partition names used by `PartitionManager::init_partition` to a
//! location on the medium.

use crate::error::Error;
use crate::page::SECTOR_SIZE;
use alloc::string::String;
use alloc::vec::Vec;

/// Name of the partition used by `PartitionManager::init` and `open_default`.
pub const DEFAULT_PARTITION_NAME: &str = "nvs";

/// Partition names are limited to 16 bytes.
pub const PARTITION_NAME_MAX_LENGTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionEntry {
    pub name: String,
    pub address: u32,
    pub size: u32,
}

impl PartitionEntry {
    pub fn new(name: &str, address: u32, size: u32) -> Result<Self, Error> {
        validate_name(name)?;
        validate_geometry(address, size)?;
        Ok(Self {
            name: String::from(name),
            address,
            size,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionTable {
    entries: Vec<PartitionEntry>,
}

impl PartitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the entry with the same name.
    ///
    /// Usage: `PartitionTable::new().with("nvs", 0x9000, 0x6000)?`
    pub fn with(mut self, name: &str, address: u32, size: u32) -> Result<Self, Error> {
        self.insert(PartitionEntry::new(name, address, size)?);
        Ok(self)
    }

    pub fn insert(&mut self, entry: PartitionEntry) {
        match self.entries.iter_mut().find(|it| it.name == entry.name) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn lookup(&self, name: &str) -> Result<&PartitionEntry, Error> {
        validate_name(name)?;
        self.entries
            .iter()
            .find(|it| it.name == name)
            .ok_or(Error::PartitionNotFound)
    }

    pub fn entries(&self) -> &[PartitionEntry] {
        &self.entries
    }
}

pub(crate) fn validate_name(name: &str) -> Result<(), Error> {
    if name.is_empty() || name.len() > PARTITION_NAME_MAX_LENGTH {
        return Err(Error::InvalidArg);
    }
    Ok(())
}

pub(crate) fn validate_geometry(address: u32, size: u32) -> Result<(), Error> {
    if !(address as usize).is_multiple_of(SECTOR_SIZE) {
        return Err(Error::InvalidPartitionOffset);
    }
    // one page is always kept free for compaction
    if !(size as usize).is_multiple_of(SECTOR_SIZE) || (size as usize) < 2 * SECTOR_SIZE {
        return Err(Error::InvalidPartitionSize);
    }
    if address.checked_add(size).is_none() {
        return Err(Error::InvalidPartitionSize);
    }
    Ok(())
}
