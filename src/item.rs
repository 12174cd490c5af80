//! The 32 byte record stored in every page slot.
//!
//! Layout: `namespace_index:u8 | type:u8 | span:u8 | chunk_index:u8 | crc:u32 | key:[u8;16] | data:[u8;8]`.
//! All multi-byte fields are little endian. Variable length types (strings and blob chunks)
//! carry their payload in the `span - 1` slots following the header slot.

use crate::Key;
#[cfg(any(test, feature = "debug-logs"))]
use crate::error::Error;
use crate::platform::FnCrc32;
#[cfg(feature = "debug-logs")]
use alloc::format;
#[cfg(feature = "debug-logs")]
use alloc::string::String;
use core::fmt;

pub(crate) const ITEM_SIZE: usize = 32;
pub(crate) const KEY_SIZE: usize = 16;

/// Chunk index used by every item except `BlobData`.
pub(crate) const CHUNK_ANY: u8 = u8::MAX;

/// Matches every namespace during a lookup. Never stored.
pub(crate) const NS_ANY: u8 = u8::MAX;

/// Namespace index reserved for the namespace table itself.
pub(crate) const NS_INDEX: u8 = 0;

#[derive(strum::FromRepr, strum::Display, Debug, Eq, PartialEq, Copy, Clone, Hash)]
#[repr(u8)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ItemType {
    U8 = 0x01,
    I8 = 0x11,
    U16 = 0x02,
    I16 = 0x12,
    U32 = 0x04,
    I32 = 0x14,
    U64 = 0x08,
    I64 = 0x18,
    /// Zero terminated string, stored in a single chunk.
    Sized = 0x21,
    /// Legacy single chunk blob. Only read, never written.
    Blob = 0x41,
    BlobData = 0x42,
    BlobIndex = 0x48,
    /// Lookup filter, never stored.
    Any = 0xff,
}

impl ItemType {
    /// Byte width of the inline value for primitive types.
    pub(crate) fn primitive_width(&self) -> Option<usize> {
        match self {
            ItemType::U8 | ItemType::I8 => Some(1),
            ItemType::U16 | ItemType::I16 => Some(2),
            ItemType::U32 | ItemType::I32 => Some(4),
            ItemType::U64 | ItemType::I64 => Some(8),
            _ => None,
        }
    }

    /// Types whose header is followed by payload slots.
    pub(crate) fn is_variable_length(&self) -> bool {
        matches!(
            self,
            ItemType::Sized | ItemType::Blob | ItemType::BlobData
        )
    }
}

/// Integer types (and `bool`) stored inline in a single item.
pub trait Primitive: Copy {
    const ITEM_TYPE: ItemType;

    /// Little endian bits, zero extended.
    fn to_bits(self) -> u64;

    fn from_bits(bits: u64) -> Self;
}

impl Primitive for bool {
    const ITEM_TYPE: ItemType = ItemType::U8;

    fn to_bits(self) -> u64 {
        self as u64
    }

    fn from_bits(bits: u64) -> Self {
        bits as u8 != 0
    }
}

impl Primitive for u8 {
    const ITEM_TYPE: ItemType = ItemType::U8;

    fn to_bits(self) -> u64 {
        self as u64
    }

    fn from_bits(bits: u64) -> Self {
        bits as u8
    }
}

impl Primitive for u16 {
    const ITEM_TYPE: ItemType = ItemType::U16;

    fn to_bits(self) -> u64 {
        self as u64
    }

    fn from_bits(bits: u64) -> Self {
        bits as u16
    }
}

impl Primitive for u32 {
    const ITEM_TYPE: ItemType = ItemType::U32;

    fn to_bits(self) -> u64 {
        self as u64
    }

    fn from_bits(bits: u64) -> Self {
        bits as u32
    }
}

impl Primitive for u64 {
    const ITEM_TYPE: ItemType = ItemType::U64;

    fn to_bits(self) -> u64 {
        self
    }

    fn from_bits(bits: u64) -> Self {
        bits
    }
}

// signed values keep their width, the stored bytes are the two's complement of the type

impl Primitive for i8 {
    const ITEM_TYPE: ItemType = ItemType::I8;

    fn to_bits(self) -> u64 {
        self.cast_unsigned() as u64
    }

    fn from_bits(bits: u64) -> Self {
        (bits as u8).cast_signed()
    }
}

impl Primitive for i16 {
    const ITEM_TYPE: ItemType = ItemType::I16;

    fn to_bits(self) -> u64 {
        self.cast_unsigned() as u64
    }

    fn from_bits(bits: u64) -> Self {
        (bits as u16).cast_signed()
    }
}

impl Primitive for i32 {
    const ITEM_TYPE: ItemType = ItemType::I32;

    fn to_bits(self) -> u64 {
        self.cast_unsigned() as u64
    }

    fn from_bits(bits: u64) -> Self {
        (bits as u32).cast_signed()
    }
}

impl Primitive for i64 {
    const ITEM_TYPE: ItemType = ItemType::I64;

    fn to_bits(self) -> u64 {
        self.cast_unsigned()
    }

    fn from_bits(bits: u64) -> Self {
        bits.cast_signed()
    }
}

/// The two chunk index ranges a blob alternates between on every update, so the chunks of
/// the old and the new value never collide.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum VersionOffset {
    V0 = 0x00,
    V1 = 0x80,
}

impl VersionOffset {
    pub(crate) fn invert(&self) -> VersionOffset {
        match self {
            VersionOffset::V0 => VersionOffset::V1,
            VersionOffset::V1 => VersionOffset::V0,
        }
    }

    /// Version of a `BlobData` chunk index.
    pub(crate) fn of_chunk(chunk_index: u8) -> VersionOffset {
        if chunk_index < VersionOffset::V1 as u8 {
            VersionOffset::V0
        } else {
            VersionOffset::V1
        }
    }
}

/// Header of a variable length item, stored in the data field.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub(crate) struct SizedData {
    pub(crate) size: u16,
    pub(crate) crc: u32,
}

/// Describes a chunked blob, stored in the data field of a `BlobIndex` item.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub(crate) struct BlobIndexData {
    pub(crate) size: u32,
    pub(crate) chunk_count: u8,
    pub(crate) chunk_start: VersionOffset,
}

#[derive(Copy, Clone, PartialEq, Eq)]
pub(crate) struct Item {
    pub(crate) namespace_index: u8,
    pub(crate) item_type: ItemType,
    pub(crate) span: u8,
    pub(crate) chunk_index: u8,
    pub(crate) crc: u32,
    pub(crate) key: Key,
    pub(crate) data: [u8; 8],
}

impl Item {
    /// Creates an item with a valid crc.
    pub(crate) fn new(
        crc32: FnCrc32,
        namespace_index: u8,
        item_type: ItemType,
        span: u8,
        chunk_index: u8,
        key: Key,
        data: [u8; 8],
    ) -> Self {
        let mut item = Self {
            namespace_index,
            item_type,
            span,
            chunk_index,
            crc: 0,
            key,
            data,
        };
        item.crc = item.calculate_crc32(crc32);
        item
    }

    /// Returns `None` for an unknown type byte. Such slots are handled like corrupted ones.
    pub(crate) fn from_bytes(raw: &[u8; ITEM_SIZE]) -> Option<Self> {
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&raw[8..24]);
        let mut data = [0u8; 8];
        data.copy_from_slice(&raw[24..32]);

        Some(Self {
            namespace_index: raw[0],
            item_type: ItemType::from_repr(raw[1])?,
            span: raw[2],
            chunk_index: raw[3],
            crc: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
            key: Key::from_raw(key),
            data,
        })
    }

    pub(crate) fn to_bytes(&self) -> [u8; ITEM_SIZE] {
        let mut raw = [0u8; ITEM_SIZE];
        raw[..4].copy_from_slice(&self.header_bytes());
        raw[4..8].copy_from_slice(&self.crc.to_le_bytes());
        raw[8..24].copy_from_slice(self.key.as_bytes());
        raw[24..32].copy_from_slice(&self.data);
        raw
    }

    fn header_bytes(&self) -> [u8; 4] {
        [
            self.namespace_index,
            self.item_type as u8,
            self.span,
            self.chunk_index,
        ]
    }

    /// Covers everything but the crc field itself.
    pub(crate) fn calculate_crc32(&self, crc32: FnCrc32) -> u32 {
        let mut result = u32::MAX;
        result = crc32(result, &self.header_bytes());
        result = crc32(result, self.key.as_bytes());
        crc32(result, &self.data)
    }

    pub(crate) fn is_crc_valid(&self, crc32: FnCrc32) -> bool {
        self.crc == self.calculate_crc32(crc32)
    }

    pub(crate) fn calculate_hash(&self, crc32: FnCrc32) -> u32 {
        Self::calculate_hash_ref(crc32, self.namespace_index, &self.key, self.chunk_index)
    }

    /// 24 bit hash of the lookup identity. The type is not part of it, so a lookup with the
    /// wrong type still finds the item and can report the mismatch.
    pub(crate) fn calculate_hash_ref(
        crc32: FnCrc32,
        namespace_index: u8,
        key: &Key,
        chunk_index: u8,
    ) -> u32 {
        let mut result = u32::MAX;
        result = crc32(result, &[namespace_index]);
        result = crc32(result, key.as_bytes());
        result = crc32(result, &[chunk_index]);
        result & 0x00FF_FFFF
    }

    /// Value of a primitive item, zero extended to 64 bit.
    #[cfg(any(test, feature = "debug-logs"))]
    pub(crate) fn primitive(&self) -> Result<u64, Error> {
        let width = self
            .item_type
            .primitive_width()
            .ok_or(Error::TypeMismatch(self.item_type))?;

        let mut buf = [0u8; 8];
        buf[..width].copy_from_slice(&self.data[..width]);
        Ok(u64::from_le_bytes(buf))
    }

    /// Encodes the low `width` bytes of `value`, the unused bytes stay erased.
    #[cfg(test)]
    pub(crate) fn primitive_data(item_type: ItemType, value: u64) -> Result<[u8; 8], Error> {
        let width = item_type
            .primitive_width()
            .ok_or(Error::TypeMismatch(item_type))?;

        let mut data = [0xFFu8; 8];
        data[..width].copy_from_slice(&value.to_le_bytes()[..width]);
        Ok(data)
    }

    pub(crate) fn sized(&self) -> SizedData {
        SizedData {
            size: u16::from_le_bytes([self.data[0], self.data[1]]),
            crc: u32::from_le_bytes([self.data[4], self.data[5], self.data[6], self.data[7]]),
        }
    }

    pub(crate) fn sized_data(size: u16, crc: u32) -> [u8; 8] {
        let mut data = [0xFFu8; 8];
        data[..2].copy_from_slice(&size.to_le_bytes());
        data[4..].copy_from_slice(&crc.to_le_bytes());
        data
    }

    pub(crate) fn blob_index(&self) -> BlobIndexData {
        BlobIndexData {
            size: u32::from_le_bytes([self.data[0], self.data[1], self.data[2], self.data[3]]),
            chunk_count: self.data[4],
            chunk_start: VersionOffset::of_chunk(self.data[5]),
        }
    }

    pub(crate) fn blob_index_data(size: u32, chunk_count: u8, chunk_start: VersionOffset) -> [u8; 8] {
        let mut data = [0xFFu8; 8];
        data[..4].copy_from_slice(&size.to_le_bytes());
        data[4] = chunk_count;
        data[5] = chunk_start as u8;
        data
    }

    /// Number of slots occupied by the item including its payload.
    pub(crate) fn span_for(item_type: ItemType, payload_len: usize) -> usize {
        if item_type.is_variable_length() {
            1 + payload_len.div_ceil(ITEM_SIZE)
        } else {
            1
        }
    }

    /// Same lookup identity, used to match an old copy against a new one.
    pub(crate) fn same_identity(&self, other: &Item) -> bool {
        self.namespace_index == other.namespace_index
            && self.item_type == other.item_type
            && self.key == other.key
            && self.chunk_index == other.chunk_index
    }

    #[cfg(feature = "debug-logs")]
    fn value_string(&self) -> String {
        match self.item_type {
            ItemType::Sized | ItemType::BlobData | ItemType::Blob => {
                let sized = self.sized();
                format!("size: {}, crc: {:0>8x}", sized.size, sized.crc)
            }
            ItemType::BlobIndex => {
                let index = self.blob_index();
                format!(
                    "size: {}, chunk_count: {}, chunk_start: {:?}",
                    index.size, index.chunk_count, index.chunk_start
                )
            }
            ItemType::Any => format!("{:?}", self.data),
            _ => match self.primitive() {
                Ok(value) => format!("{value}"),
                Err(_) => format!("{:?}", self.data),
            },
        }
    }
}

impl fmt::Debug for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ns_idx = self.namespace_index;
        let item_type = self.item_type;
        let span = self.span;
        let chunk_index = self.chunk_index;
        let crc = self.crc;
        let key = self.key.name();
        write!(
            f,
            "Item {{ns_idx: {ns_idx}, type: {item_type:<9}, span: {span}, chunk_idx: {chunk_index:>3}, crc: {crc:0>8x}, key: '{key}'"
        )?;

        #[cfg(feature = "debug-logs")]
        write!(f, ", value: {}", self.value_string())?;

        write!(f, "}}")
    }
}
