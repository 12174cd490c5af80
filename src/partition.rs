use crate::config::{PartitionEntry, validate_geometry, validate_name};
use crate::error::Error;
use crate::page::SECTOR_SIZE;
use crate::platform::{AlignedOps, Platform};
use alloc::string::String;
use alloc::vec;
#[cfg(feature = "defmt")]
use defmt::trace;

/// A named window onto the medium. All offsets are relative to the partition start.
pub struct Partition<T: Platform> {
    name: String,
    address: u32,
    size: u32,
    medium: T,
}

impl<T: Platform> Partition<T> {
    pub fn new(name: &str, address: u32, size: u32, medium: T) -> Result<Self, Error> {
        validate_name(name)?;
        validate_geometry(address, size)?;

        Ok(Self {
            name: String::from(name),
            address,
            size,
            medium,
        })
    }

    pub fn from_entry(entry: &PartitionEntry, medium: T) -> Result<Self, Error> {
        Self::new(&entry.name, entry.address, entry.size, medium)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub(crate) fn sector_count(&self) -> usize {
        self.size as usize / SECTOR_SIZE
    }

    /// Gives the medium back, e.g. after `PartitionManager::deinit_partition`.
    pub fn into_medium(self) -> T {
        self.medium
    }

    fn absolute(&self, offset: u32, len: usize) -> Result<u32, Error> {
        let end = (offset as usize)
            .checked_add(len)
            .ok_or(Error::InvalidArg)?;
        if end > self.size as usize {
            return Err(Error::InvalidArg);
        }
        Ok(self.address + offset)
    }

    /// Reads `buf.len()` bytes. `offset` has to be aligned to the read size of the medium, the
    /// length is padded internally if necessary.
    pub fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), Error> {
        let address = self.absolute(offset, buf.len())?;

        if buf.len().is_multiple_of(T::READ_SIZE) {
            return self
                .medium
                .read(address, buf)
                .map_err(|_| Error::MediumError);
        }

        // the padding has to stay inside the partition as well
        let mut aligned = vec![0u8; T::align_read(buf.len())];
        self.absolute(offset, aligned.len())?;
        self.medium
            .read(address, &mut aligned)
            .map_err(|_| Error::MediumError)?;
        buf.copy_from_slice(&aligned[..buf.len()]);
        Ok(())
    }

    /// Writes `bytes`. Bits can only be cleared, the region has to be erased beforehand.
    pub fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Error> {
        let address = self.absolute(offset, T::align_write_ceil(bytes.len()))?;
        write_aligned(&mut self.medium, address, bytes).map_err(|_| Error::MediumError)
    }

    /// Erases whole sectors, both `offset` and `len` have to be sector aligned.
    pub fn erase_range(&mut self, offset: u32, len: u32) -> Result<(), Error> {
        if !(offset as usize).is_multiple_of(SECTOR_SIZE) || !(len as usize).is_multiple_of(SECTOR_SIZE)
        {
            return Err(Error::InvalidArg);
        }
        let address = self.absolute(offset, len as usize)?;

        #[cfg(feature = "defmt")]
        trace!("erase_range @{:#08x}: [{}]", address, len);

        self.medium
            .erase(address, address + len)
            .map_err(|_| Error::MediumError)
    }
}

#[inline(always)]
pub(crate) fn write_aligned<T: Platform>(
    medium: &mut T,
    offset: u32,
    bytes: &[u8],
) -> Result<(), T::Error> {
    #[cfg(feature = "defmt")]
    trace!("write_aligned @{:#08x}: [{}]", offset, bytes.len());

    if bytes.len().is_multiple_of(T::WRITE_SIZE) {
        return medium.write(offset, bytes);
    }

    let pivot = T::align_write_floor(bytes.len());
    let (head, tail) = bytes.split_at(pivot);
    if !head.is_empty() {
        medium.write(offset, head)?;
    }

    // erased flash reads as ones, an all ones tail doesn't need a write
    if tail.iter().any(|&e| e != 0xFF) {
        let mut buf = vec![0xFFu8; T::WRITE_SIZE];
        buf[..tail.len()].copy_from_slice(tail);
        medium.write(offset + pivot as u32, &buf)?;
    }

    Ok(())
}
