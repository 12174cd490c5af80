#![allow(dead_code)]

use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};

pub const FLASH_SECTOR_SIZE: usize = 4096;
// read and write granularity of esp-storage
pub const WORD_SIZE: usize = 4;

const ITEM_OFFSET: usize = 64;
const ITEM_SIZE: usize = 32;

/// Offset of the item slot `index` on `page`.
pub const fn item_offset(page: usize, index: usize) -> usize {
    page * FLASH_SECTOR_SIZE + ITEM_OFFSET + index * ITEM_SIZE
}

/// NOR flash simulated in memory. Writes can only clear bits, every call is logged and all
/// calls starting with operation number `fail_after_operation` fail. With `transient_fault`
/// only the first of them fails and the medium works again afterwards.
pub struct Flash {
    pub buf: Vec<u8>,
    pub fail_after_operation: usize,
    pub transient_fault: bool,
    pub operations: Vec<Operation>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Operation {
    Read { offset: u32, len: usize },
    Write { offset: u32, len: usize },
    Erase { offset: u32, len: usize },
}

impl Flash {
    pub fn new(pages: usize) -> Self {
        Self {
            buf: vec![0xFF; FLASH_SECTOR_SIZE * pages],
            fail_after_operation: usize::MAX,
            transient_fault: false,
            operations: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Fails a single operation once `operations` more have succeeded.
    pub fn fail_once_after(&mut self, operations: usize) {
        self.fail_after_operation = self.operations.len() + operations;
        self.transient_fault = true;
    }

    pub fn disable_faults(&mut self) {
        self.fail_after_operation = usize::MAX;
        self.transient_fault = false;
    }

    pub fn erases(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Erase { .. }))
            .count()
    }

    pub fn writes(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Write { .. }))
            .count()
    }

    /// Flips bits without going through the driver, like a worn out cell would.
    pub fn corrupt(&mut self, offset: usize, mask: u8) {
        self.buf[offset] ^= mask;
    }

    /// Offset of the first occurrence of `needle`, used to locate a stored key or value.
    pub fn find(&self, needle: &[u8]) -> Option<usize> {
        self.buf
            .windows(needle.len())
            .position(|window| window == needle)
    }

    fn record(&mut self, operation: Operation) -> Result<(), FlashError> {
        println!("    flash: {operation:?} #{}", self.operations.len());
        if self.operations.len() >= self.fail_after_operation {
            println!("    flash: FAULT");
            if self.transient_fault {
                self.disable_faults();
            }
            return Err(FlashError);
        }
        self.operations.push(operation);
        Ok(())
    }
}

#[derive(Debug)]
pub struct FlashError;

impl NorFlashError for FlashError {
    fn kind(&self) -> NorFlashErrorKind {
        NorFlashErrorKind::Other
    }
}

impl ErrorType for Flash {
    type Error = FlashError;
}

impl ReadNorFlash for Flash {
    const READ_SIZE: usize = WORD_SIZE;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(Self::READ_SIZE as u32));

        self.record(Operation::Read {
            offset,
            len: bytes.len(),
        })?;

        let offset = offset as usize;
        bytes.copy_from_slice(&self.buf[offset..offset + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.buf.len()
    }
}

impl NorFlash for Flash {
    const WRITE_SIZE: usize = WORD_SIZE;
    const ERASE_SIZE: usize = FLASH_SECTOR_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        assert!(from.is_multiple_of(Self::ERASE_SIZE as u32));
        assert!(to.is_multiple_of(Self::ERASE_SIZE as u32));

        self.record(Operation::Erase {
            offset: from,
            len: (to - from) as usize,
        })?;

        self.buf[from as usize..to as usize].fill(0xFF);
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(Self::WRITE_SIZE as u32));
        assert!(bytes.len().is_multiple_of(Self::WRITE_SIZE));
        assert!(!bytes.is_empty());

        self.record(Operation::Write {
            offset,
            len: bytes.len(),
        })?;

        // bits can only go from 1 to 0 without an erase
        let offset = offset as usize;
        for (cell, &value) in self.buf[offset..offset + bytes.len()].iter_mut().zip(bytes) {
            *cell &= value;
        }
        Ok(())
    }
}

impl nvs_flash::platform::Crc for Flash {
    fn crc32(init: u32, data: &[u8]) -> u32 {
        unsafe { libz_sys::crc32(init as u64, data.as_ptr(), data.len() as u32) as u32 }
    }
}

pub type FlashStorage<'a> = nvs_flash::Storage<&'a mut Flash>;

/// Loads the whole flash as the partition "nvs".
pub fn storage(flash: &mut Flash) -> Result<FlashStorage<'_>, nvs_flash::Error> {
    let size = flash.len() as u32;
    nvs_flash::Storage::init(nvs_flash::Partition::new("nvs", 0, size, flash)?)
}

pub fn table(flash: &Flash) -> nvs_flash::PartitionTable {
    nvs_flash::PartitionTable::new()
        .with("nvs", 0, flash.len() as u32)
        .unwrap()
}
