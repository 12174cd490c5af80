use crate::item;
use thiserror::Error;

pub use item::ItemType;

/// Errors returned by every public operation. A caller usually only has to handle
/// `NotFound`, `InvalidLength` and `NotEnoughSpace`, the other variants report misuse or a
/// broken medium.
#[derive(Error, Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// No partition has been initialized yet.
    #[error("not initialized")]
    NotInitialized,

    /// The partition name is neither in the partition table nor initialized.
    #[error("partition not found")]
    PartitionNotFound,

    /// The handle was closed or its partition was deinitialized.
    #[error("invalid handle")]
    InvalidHandle,

    /// Write or erase through a handle opened in read-only mode.
    #[error("handle is read-only")]
    ReadOnly,

    /// An allocation for a value buffer failed.
    #[error("out of memory")]
    NoMemory,

    /// Key or namespace not found. Either no value was written yet or a corrupted entry was
    /// silently dropped.
    #[error("not found")]
    NotFound,

    /// Empty or otherwise malformed argument.
    #[error("invalid argument")]
    InvalidArg,

    /// The provided buffer is shorter than the stored value.
    #[error("buffer too small, {required} bytes required")]
    InvalidLength { required: usize },

    /// Loading left no free page behind. The partition has to be erased before use.
    #[error("no free pages")]
    NoFreePages,

    /// Partition is full and compaction doesn't help.
    #[error("not enough space")]
    NotEnoughSpace,

    /// The payload of a string or blob failed its CRC check.
    #[error("crc mismatch")]
    CrcMismatch,

    /// The underlying medium reported an error. Further writes are refused until the
    /// partition is initialized again.
    #[error("medium error")]
    MediumError,

    /// The partition address has to be aligned to the sector size (4k).
    #[error("invalid partition offset")]
    InvalidPartitionOffset,

    /// The partition size has to be a multiple of the sector size (4k), at least two sectors.
    #[error("invalid partition size")]
    InvalidPartitionSize,

    /// Keys and namespace names are limited to 15 bytes.
    #[error("key too long")]
    KeyTooLong,

    /// Strings are limited to `CHUNK_MAX_SIZE`, blobs to what fits into all but one page.
    #[error("value too long")]
    ValueTooLong,

    /// A stored string is not valid UTF-8.
    #[error("corrupted data")]
    CorruptedData,

    /// The stored item has a different type, the encountered type is reported.
    #[error("item type mismatch: {0}")]
    TypeMismatch(ItemType),

    /// An operation was attempted on a page in the wrong state.
    #[error("invalid state")]
    InvalidState,

    /// Used internally to request a new active page.
    #[error("page full")]
    PageFull,
}
