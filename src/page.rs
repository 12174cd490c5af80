//! One erase sector of the partition.
//!
//! ```text
//! 0x000  header            state:u32 | sequence:u32 | version:u8 | reserved:[u8;19] | crc:u32
//! 0x020  entry state bitmap, 2 bits per slot
//! 0x040  126 item slots of 32 bytes
//! ```
//!
//! Only the metadata needed for lookups is kept in memory (state, bitmap, a hash per item),
//! items are read from the medium on demand.

use crate::Key;
use crate::error::Error;
use crate::item::{CHUNK_ANY, ITEM_SIZE, Item, ItemType, NS_ANY, VersionOffset};
use crate::partition::Partition;
use crate::platform::{AlignedOps, FnCrc32, Platform};
use crate::{EntryStatistics, NvsStats};
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;
use core::ops::Range;
#[cfg(feature = "defmt")]
use defmt::{trace, warn};

pub(crate) const SECTOR_SIZE: usize = 4096;
pub(crate) const HEADER_SIZE: usize = 32;
pub(crate) const ENTRY_STATE_BITMAP_SIZE: usize = 32;
pub(crate) const ENTRY_COUNT: usize = 126;

const ENTRY_TABLE_OFFSET: usize = HEADER_SIZE;
const ENTRY_DATA_OFFSET: usize = ENTRY_TABLE_OFFSET + ENTRY_STATE_BITMAP_SIZE;

/// Largest payload of a single string or blob chunk. One slot is taken by the item header.
pub const CHUNK_MAX_SIZE: usize = (ENTRY_COUNT - 1) * ITEM_SIZE;

/// Format version written to new pages. Versions count down, 0xFF is the pre-blob format.
pub(crate) const PAGE_VERSION: u8 = 0xFE;

const _: () = assert!(
    HEADER_SIZE + ENTRY_STATE_BITMAP_SIZE + ENTRY_COUNT * ITEM_SIZE == SECTOR_SIZE,
    "Page structure size must equal flash sector size"
);

#[derive(strum::FromRepr, strum::Display, Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub(crate) enum EntryState {
    Empty = 0b11,
    Written = 0b10,
    Erased = 0b00,
    Illegal = 0b01,
}

const PSB_INIT: u32 = 0x1;
const PSB_FULL: u32 = 0x2;
const PSB_FREEING: u32 = 0x4;
const PSB_CORRUPT: u32 = 0x8;

/// Every transition clears bits, so it is a single word write without an erase.
#[derive(strum::Display, Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum PageState {
    /// All bits set, default state after an erase.
    Uninitialized = u32::MAX,

    /// Accepts writes. There is at most one active page per partition.
    Active = PageState::Uninitialized as u32 & !PSB_INIT,

    /// No more writes, items may still be erased.
    Full = PageState::Active as u32 & !PSB_FULL,

    /// Live items are being copied to the active page before this page is erased.
    Freeing = PageState::Full as u32 & !PSB_FREEING,

    /// Unreadable page. Kept until the space is needed, then erased.
    Corrupt = PageState::Freeing as u32 & !PSB_CORRUPT,

    /// A medium operation failed on this page.
    Invalid = 0,
}

const PAGE_STATE_UNINITIALIZED: u32 = PageState::Uninitialized as u32;
const PAGE_STATE_ACTIVE: u32 = PageState::Active as u32;
const PAGE_STATE_FULL: u32 = PageState::Full as u32;
const PAGE_STATE_FREEING: u32 = PageState::Freeing as u32;
const PAGE_STATE_INVALID: u32 = PageState::Invalid as u32;

impl From<u32> for PageState {
    fn from(val: u32) -> Self {
        match val {
            PAGE_STATE_UNINITIALIZED => PageState::Uninitialized,
            PAGE_STATE_ACTIVE => PageState::Active,
            PAGE_STATE_FULL => PageState::Full,
            PAGE_STATE_FREEING => PageState::Freeing,
            PAGE_STATE_INVALID => PageState::Invalid,
            _ => PageState::Corrupt,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct PageHeader {
    pub(crate) state: u32,
    pub(crate) sequence: u32,
    pub(crate) version: u8,
    pub(crate) crc: u32,
}

impl PageHeader {
    pub(crate) fn new(crc32: FnCrc32, state: PageState, sequence: u32) -> Self {
        let mut header = Self {
            state: state as u32,
            sequence,
            version: PAGE_VERSION,
            crc: 0,
        };
        header.crc = header.calculate_crc32(crc32);
        header
    }

    pub(crate) fn from_bytes(raw: &[u8; HEADER_SIZE]) -> Self {
        Self {
            state: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            sequence: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
            version: raw[8],
            crc: u32::from_le_bytes([raw[28], raw[29], raw[30], raw[31]]),
        }
    }

    pub(crate) fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut raw = [0xFFu8; HEADER_SIZE];
        raw[..4].copy_from_slice(&self.state.to_le_bytes());
        raw[4..8].copy_from_slice(&self.sequence.to_le_bytes());
        raw[8] = self.version;
        raw[28..].copy_from_slice(&self.crc.to_le_bytes());
        raw
    }

    /// Covers sequence, version and the reserved bytes, not the state, which changes over
    /// the lifetime of the page.
    pub(crate) fn calculate_crc32(&self, crc32: FnCrc32) -> u32 {
        let raw = self.to_bytes();
        crc32(u32::MAX, &raw[4..28])
    }
}

struct HashListEntry {
    hash: u32,
    index: u8,
}

pub(crate) struct Page {
    pub(crate) sector: usize,
    state: PageState,
    sequence: u32,
    version: u8,
    entry_state_bitmap: [u8; ENTRY_STATE_BITMAP_SIZE],
    hash_list: Vec<HashListEntry>,
    next_free_entry: usize,
    used_entry_count: usize,
    erased_entry_count: usize,
}

impl Page {
    pub(crate) fn uninitialized(sector: usize) -> Self {
        Self {
            sector,
            state: PageState::Uninitialized,
            sequence: 0,
            version: PAGE_VERSION,
            entry_state_bitmap: [0xFF; ENTRY_STATE_BITMAP_SIZE],
            hash_list: Vec::new(),
            next_free_entry: 0,
            used_entry_count: 0,
            erased_entry_count: 0,
        }
    }

    /// Reads the sector and repairs what an interrupted write left behind. Slots that fail
    /// their crc are erased, as are partially written variable length items.
    pub(crate) fn load<T: Platform>(
        partition: &mut Partition<T>,
        sector: usize,
    ) -> Result<Self, Error> {
        #[cfg(feature = "defmt")]
        trace!("load page: sector {}", sector);

        #[cfg(feature = "debug-logs")]
        println!("  page: load sector {sector}");

        let mut page = Self::uninitialized(sector);
        let mut buf = vec![0u8; SECTOR_SIZE];
        partition.read(page.base(), &mut buf)?;

        let mut raw_header = [0u8; HEADER_SIZE];
        raw_header.copy_from_slice(&buf[..HEADER_SIZE]);

        if raw_header == [0xFF; HEADER_SIZE] {
            if buf.iter().any(|&b| b != 0xFF) {
                #[cfg(feature = "defmt")]
                warn!("sector {} has no header but contains data", sector);

                page.state = PageState::Corrupt;
            }
            return Ok(page);
        }

        let header = PageHeader::from_bytes(&raw_header);
        if header.crc != header.calculate_crc32(T::crc32) {
            #[cfg(feature = "defmt")]
            warn!("sector {}: header crc mismatch", sector);

            page.state = PageState::Corrupt;
            return Ok(page);
        }

        page.state = match PageState::from(header.state) {
            state @ (PageState::Active | PageState::Full | PageState::Freeing) => state,
            _ => PageState::Corrupt,
        };
        if page.state == PageState::Corrupt {
            return Ok(page);
        }

        page.sequence = header.sequence;
        page.version = header.version;
        page.entry_state_bitmap
            .copy_from_slice(&buf[ENTRY_TABLE_OFFSET..ENTRY_DATA_OFFSET]);

        page.load_entry_table(partition, &buf)?;

        Ok(page)
    }

    fn load_entry_table<T: Platform>(
        &mut self,
        partition: &mut Partition<T>,
        buf: &[u8],
    ) -> Result<(), Error> {
        for index in 0..ENTRY_COUNT {
            match self.entry_state(index) {
                EntryState::Written => self.used_entry_count += 1,
                EntryState::Erased => self.erased_entry_count += 1,
                _ => {}
            }
        }

        let end = if self.state == PageState::Active {
            let mut next_free = (0..ENTRY_COUNT)
                .find(|&index| self.entry_state(index) == EntryState::Empty)
                .unwrap_or(ENTRY_COUNT);

            // power was lost after the slot was written but before the bitmap was updated
            while next_free < ENTRY_COUNT && slot(buf, next_free).iter().any(|&b| b != 0xFF) {
                #[cfg(feature = "defmt")]
                warn!("sector {}: half written slot {}", self.sector, next_free);

                self.erase_range(partition, next_free..next_free + 1)?;
                next_free += 1;
            }

            self.next_free_entry = next_free;
            next_free
        } else {
            self.next_free_entry = ENTRY_COUNT;
            ENTRY_COUNT
        };

        let mut index = 0;
        while index < end {
            match self.entry_state(index) {
                EntryState::Empty | EntryState::Erased => {
                    index += 1;
                    continue;
                }
                EntryState::Illegal => {
                    self.erase_range(partition, index..index + 1)?;
                    index += 1;
                    continue;
                }
                EntryState::Written => {}
            }

            let item = match parse_slot::<T>(buf, index) {
                Some(item) if span_is_consistent(index, &item) => item,
                _ => {
                    #[cfg(feature = "defmt")]
                    warn!("sector {}: slot {} failed its crc", self.sector, index);

                    self.erase_range(partition, index..index + 1)?;
                    index += 1;
                    continue;
                }
            };

            let span = item.span as usize;
            if item.item_type.is_variable_length()
                && (index..index + span).any(|it| self.entry_state(it) != EntryState::Written)
            {
                #[cfg(feature = "defmt")]
                warn!("sector {}: incomplete item at {}", self.sector, index);

                self.erase_range(partition, index..index + span)?;
                index += span;
                continue;
            }

            if self.state == PageState::Active {
                let duplicate = self
                    .hash_candidates(item.calculate_hash(T::crc32), 0)
                    .find(|&other| {
                        parse_slot::<T>(buf, other).is_some_and(|it| it.same_identity(&item))
                    });
                if let Some(other) = duplicate {
                    self.erase_entry_and_span(partition, other)?;
                }
            }

            self.hash_list.push(HashListEntry {
                hash: item.calculate_hash(T::crc32),
                index: index as u8,
            });
            index += span;
        }

        Ok(())
    }

    fn base(&self) -> u32 {
        (self.sector * SECTOR_SIZE) as u32
    }

    fn entry_offset(&self, index: usize) -> u32 {
        self.base() + (ENTRY_DATA_OFFSET + index * ITEM_SIZE) as u32
    }

    pub(crate) fn state(&self) -> PageState {
        self.state
    }

    /// Only pages that were activated at some point carry a sequence number.
    pub(crate) fn sequence(&self) -> Option<u32> {
        match self.state {
            PageState::Active | PageState::Full | PageState::Freeing => Some(self.sequence),
            _ => None,
        }
    }

    pub(crate) fn used_entry_count(&self) -> usize {
        self.used_entry_count
    }

    pub(crate) fn erased_entry_count(&self) -> usize {
        self.erased_entry_count
    }

    /// Payload bytes a variable length item written next could still hold.
    pub(crate) fn var_data_tailroom(&self) -> usize {
        match self.state {
            PageState::Uninitialized => CHUNK_MAX_SIZE,
            PageState::Active if self.next_free_entry + 1 < ENTRY_COUNT => {
                (ENTRY_COUNT - self.next_free_entry - 1) * ITEM_SIZE
            }
            _ => 0,
        }
    }

    pub(crate) fn initialize<T: Platform>(
        &mut self,
        partition: &mut Partition<T>,
        sequence: u32,
    ) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("initialize: sector {} seq {}", self.sector, sequence);

        #[cfg(feature = "debug-logs")]
        println!("  page: initialize sector {} seq {sequence}", self.sector);

        if self.state != PageState::Uninitialized {
            return Err(Error::InvalidState);
        }

        let header = PageHeader::new(T::crc32, PageState::Active, sequence);
        partition.write(self.base(), &header.to_bytes())?;

        self.state = PageState::Active;
        self.sequence = sequence;
        self.version = PAGE_VERSION;

        Ok(())
    }

    pub(crate) fn mark_full<T: Platform>(&mut self, partition: &mut Partition<T>) -> Result<(), Error> {
        if self.state != PageState::Active {
            return Err(Error::InvalidState);
        }
        self.alter_page_state(partition, PageState::Full)
    }

    pub(crate) fn mark_freeing<T: Platform>(
        &mut self,
        partition: &mut Partition<T>,
    ) -> Result<(), Error> {
        if self.state != PageState::Active && self.state != PageState::Full {
            return Err(Error::InvalidState);
        }
        self.alter_page_state(partition, PageState::Freeing)
    }

    fn alter_page_state<T: Platform>(
        &mut self,
        partition: &mut Partition<T>,
        state: PageState,
    ) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("alter_page_state: sector {} -> {}", self.sector, state);

        #[cfg(feature = "debug-logs")]
        println!("  page: sector {} {} -> {state}", self.sector, self.state);

        partition.write(self.base(), &(state as u32).to_le_bytes())?;
        self.state = state;
        if state != PageState::Active {
            self.next_free_entry = ENTRY_COUNT;
        }
        Ok(())
    }

    /// Erases the whole sector, the page is uninitialized afterwards.
    pub(crate) fn erase<T: Platform>(&mut self, partition: &mut Partition<T>) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("erase: sector {}", self.sector);

        #[cfg(feature = "debug-logs")]
        println!("  page: erase sector {}", self.sector);

        partition.erase_range(self.base(), SECTOR_SIZE as u32)?;
        *self = Self::uninitialized(self.sector);
        Ok(())
    }

    /// Appends an item. Primitive values and blob indices pass their inline data (at most 8
    /// bytes), strings and blob chunks their payload. Returns the slot index.
    pub(crate) fn write_item<T: Platform>(
        &mut self,
        partition: &mut Partition<T>,
        namespace_index: u8,
        item_type: ItemType,
        key: &Key,
        chunk_index: u8,
        value: &[u8],
    ) -> Result<usize, Error> {
        match self.state {
            PageState::Active => {}
            PageState::Full => return Err(Error::PageFull),
            _ => return Err(Error::InvalidState),
        }

        let (span, data) = if item_type.is_variable_length() {
            if value.len() > CHUNK_MAX_SIZE {
                return Err(Error::ValueTooLong);
            }
            (
                Item::span_for(item_type, value.len()),
                Item::sized_data(value.len() as u16, T::crc32(u32::MAX, value)),
            )
        } else {
            if value.len() > 8 {
                return Err(Error::InvalidArg);
            }
            let mut data = [0xFFu8; 8];
            data[..value.len()].copy_from_slice(value);
            (1, data)
        };

        if self.next_free_entry + span > ENTRY_COUNT {
            return Err(Error::PageFull);
        }

        let index = self.next_free_entry;
        let item = Item::new(
            T::crc32,
            namespace_index,
            item_type,
            span as u8,
            chunk_index,
            *key,
            data,
        );

        #[cfg(feature = "defmt")]
        trace!("write_item: sector {} [{}-{}]", self.sector, index, index + span - 1);

        #[cfg(feature = "debug-logs")]
        println!("  page: write_item sector {} @{index}: {item:?}", self.sector);

        partition.write(self.entry_offset(index), &item.to_bytes())?;
        if span > 1 {
            partition.write(self.entry_offset(index + 1), value)?;
        }
        self.commit_entries(partition, &item, index, span)?;

        Ok(index)
    }

    /// Writes an item together with its raw payload slots, used when copying between pages.
    fn write_raw<T: Platform>(
        &mut self,
        partition: &mut Partition<T>,
        item: &Item,
        slots: &[u8],
    ) -> Result<(), Error> {
        if self.state != PageState::Active {
            return Err(Error::InvalidState);
        }

        let span = slots.len() / ITEM_SIZE;
        if self.next_free_entry + span > ENTRY_COUNT {
            return Err(Error::PageFull);
        }

        let index = self.next_free_entry;
        partition.write(self.entry_offset(index), slots)?;
        self.commit_entries(partition, item, index, span)
    }

    fn commit_entries<T: Platform>(
        &mut self,
        partition: &mut Partition<T>,
        item: &Item,
        index: usize,
        span: usize,
    ) -> Result<(), Error> {
        self.set_entry_state_range(partition, index..index + span, EntryState::Written)?;

        self.hash_list.push(HashListEntry {
            hash: item.calculate_hash(T::crc32),
            index: index as u8,
        });
        self.used_entry_count += span;
        self.next_free_entry = index + span;

        Ok(())
    }

    pub(crate) fn read_entry<T: Platform>(
        &self,
        partition: &mut Partition<T>,
        index: usize,
    ) -> Result<[u8; ITEM_SIZE], Error> {
        let mut buf = [0u8; ITEM_SIZE];
        partition.read(self.entry_offset(index), &mut buf)?;
        Ok(buf)
    }

    /// Reads and verifies the payload of a variable length item found at `index`.
    /// `out` has to be exactly as long as the stored payload.
    pub(crate) fn read_payload<T: Platform>(
        &self,
        partition: &mut Partition<T>,
        index: usize,
        item: &Item,
        out: &mut [u8],
    ) -> Result<(), Error> {
        let sized = item.sized();
        if out.len() != sized.size as usize {
            return Err(Error::InvalidLength {
                required: sized.size as usize,
            });
        }

        partition.read(self.entry_offset(index + 1), out)?;

        if T::crc32(u32::MAX, out) != sized.crc {
            #[cfg(feature = "defmt")]
            warn!("sector {}: payload crc mismatch at {}", self.sector, index);

            return Err(Error::CrcMismatch);
        }

        Ok(())
    }

    /// Forward scan for the first live item matching all filters, starting at `cursor`. On
    /// success `cursor` points at the item. An item with matching identity but another type
    /// is reported as `TypeMismatch` unless the search is a pure type scan.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn find_item<T: Platform>(
        &mut self,
        partition: &mut Partition<T>,
        namespace_index: u8,
        item_type: ItemType,
        key: Option<&Key>,
        chunk_index: u8,
        version: Option<VersionOffset>,
        cursor: &mut usize,
    ) -> Result<Item, Error> {
        if self.sequence().is_none() {
            return Err(Error::NotFound);
        }

        let mut start = *cursor;
        if start >= ENTRY_COUNT {
            return Err(Error::NotFound);
        }

        let end = self.next_free_entry.min(ENTRY_COUNT);

        // chunks are hashed with their own index, a search over all chunks has to scan
        if namespace_index != NS_ANY
            && item_type != ItemType::Any
            && !(item_type == ItemType::BlobData && chunk_index == CHUNK_ANY)
            && let Some(key) = key
        {
            let hash = Item::calculate_hash_ref(T::crc32, namespace_index, key, chunk_index);
            start = self
                .hash_candidates(hash, start)
                .min()
                .ok_or(Error::NotFound)?;
        }

        let mut index = start;
        while index < end {
            let mut next = index + 1;
            if self.entry_state(index) != EntryState::Written {
                index = next;
                continue;
            }

            let raw = self.read_entry(partition, index)?;
            let item = match Item::from_bytes(&raw) {
                Some(item) if item.is_crc_valid(T::crc32) => item,
                _ => {
                    self.erase_entry_and_span(partition, index)?;
                    index = next;
                    continue;
                }
            };

            if item.item_type.is_variable_length() {
                next = index + item.span as usize;
            }

            if namespace_index != NS_ANY && item.namespace_index != namespace_index {
                index = next;
                continue;
            }

            if let Some(key) = key
                && *key != item.key
            {
                index = next;
                continue;
            }

            if chunk_index != CHUNK_ANY
                && item_type == ItemType::BlobData
                && item.chunk_index != chunk_index
            {
                index = next;
                continue;
            }

            // the chunks of a blob share its key
            if item_type == ItemType::BlobIndex && item.chunk_index != CHUNK_ANY {
                index = next;
                continue;
            }

            if item_type == ItemType::BlobIndex
                && let Some(version) = version
                && item.blob_index().chunk_start != version
            {
                index = next;
                continue;
            }

            if item_type != ItemType::Any && item.item_type != item_type {
                if key.is_none() && namespace_index == NS_ANY && chunk_index == CHUNK_ANY {
                    index = next;
                    continue;
                }
                *cursor = index;
                return Err(Error::TypeMismatch(item.item_type));
            }

            *cursor = index;
            return Ok(item);
        }

        Err(Error::NotFound)
    }

    pub(crate) fn erase_item<T: Platform>(
        &mut self,
        partition: &mut Partition<T>,
        namespace_index: u8,
        item_type: ItemType,
        key: &Key,
        chunk_index: u8,
        version: Option<VersionOffset>,
    ) -> Result<(), Error> {
        let mut cursor = 0;
        self.find_item(
            partition,
            namespace_index,
            item_type,
            Some(key),
            chunk_index,
            version,
            &mut cursor,
        )?;
        self.erase_entry_and_span(partition, cursor)
    }

    /// Marks the item at `index` and its payload slots as erased. A slot failing its crc is
    /// erased alone, its span can't be trusted.
    pub(crate) fn erase_entry_and_span<T: Platform>(
        &mut self,
        partition: &mut Partition<T>,
        index: usize,
    ) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("erase_entry_and_span: sector {} [{}]", self.sector, index);

        let mut span = 1;
        if self.entry_state(index) == EntryState::Written {
            let raw = self.read_entry(partition, index)?;
            if let Some(item) = Item::from_bytes(&raw)
                && item.is_crc_valid(T::crc32)
                && span_is_consistent(index, &item)
            {
                span = item.span as usize;
            }
        }

        self.erase_range(partition, index..index + span)?;
        self.next_free_entry = self.next_free_entry.max(index + span);
        Ok(())
    }

    fn erase_range<T: Platform>(
        &mut self,
        partition: &mut Partition<T>,
        range: Range<usize>,
    ) -> Result<(), Error> {
        for index in range.clone() {
            match self.entry_state(index) {
                EntryState::Written => {
                    self.used_entry_count -= 1;
                    self.erased_entry_count += 1;
                }
                EntryState::Empty | EntryState::Illegal => self.erased_entry_count += 1,
                EntryState::Erased => {}
            }
        }
        self.hash_list
            .retain(|entry| !range.contains(&(entry.index as usize)));

        self.set_entry_state_range(partition, range, EntryState::Erased)
    }

    /// Copies all live items, used to compact this page into `target`.
    pub(crate) fn copy_items<T: Platform>(
        &self,
        partition: &mut Partition<T>,
        target: &mut Page,
    ) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("copy_items: sector {} -> {}", self.sector, target.sector);

        #[cfg(feature = "debug-logs")]
        println!("  page: copy_items sector {} -> {}", self.sector, target.sector);

        let mut index = 0;
        while index < ENTRY_COUNT {
            if self.entry_state(index) != EntryState::Written {
                index += 1;
                continue;
            }

            let raw = self.read_entry(partition, index)?;
            let item = match Item::from_bytes(&raw) {
                Some(item) if item.is_crc_valid(T::crc32) && span_is_consistent(index, &item) => {
                    item
                }
                _ => {
                    index += 1;
                    continue;
                }
            };

            let span = item.span as usize;
            let mut slots = vec![0xFFu8; span * ITEM_SIZE];
            partition.read(self.entry_offset(index), &mut slots)?;
            target.write_raw(partition, &item, &slots)?;

            index += span;
        }

        Ok(())
    }

    pub(crate) fn calc_entries(&self, stats: &mut NvsStats) -> Result<(), Error> {
        stats.total_entries += ENTRY_COUNT;

        match self.state {
            PageState::Uninitialized | PageState::Corrupt => stats.free_entries += ENTRY_COUNT,
            PageState::Active | PageState::Full | PageState::Freeing => {
                stats.used_entries += self.used_entry_count;
                stats.free_entries += ENTRY_COUNT - self.used_entry_count;
            }
            PageState::Invalid => return Err(Error::InvalidState),
        }

        Ok(())
    }

    pub(crate) fn entry_statistics(&self) -> EntryStatistics {
        let mut stats = EntryStatistics::default();

        if self.state == PageState::Corrupt {
            stats.illegal = ENTRY_COUNT as u32;
            return stats;
        }

        for index in 0..ENTRY_COUNT {
            match self.entry_state(index) {
                EntryState::Empty => stats.empty += 1,
                EntryState::Written => stats.written += 1,
                EntryState::Erased => stats.erased += 1,
                EntryState::Illegal => stats.illegal += 1,
            }
        }

        stats
    }

    /// One line per slot: `E` empty, `X` erased, `W` item header, `D` payload.
    pub(crate) fn debug_dump<T: Platform>(
        &self,
        partition: &mut Partition<T>,
        out: &mut impl fmt::Write,
    ) -> Result<(), Error> {
        writeln!(
            out,
            "state={:x} ({}) sector={} seq={} nextFree={} used={} erased={}",
            self.state as u32,
            self.state,
            self.sector,
            self.sequence,
            self.next_free_entry,
            self.used_entry_count,
            self.erased_entry_count
        )
        .map_err(|_| Error::InvalidArg)?;

        if self.sequence().is_none() {
            return Ok(());
        }

        let mut skip = 0usize;
        for index in 0..ENTRY_COUNT {
            let line = match self.entry_state(index) {
                EntryState::Empty => writeln!(out, "{index:>3}: E"),
                EntryState::Erased => writeln!(out, "{index:>3}: X"),
                EntryState::Illegal => writeln!(out, "{index:>3}: I"),
                EntryState::Written if skip > 0 => {
                    skip -= 1;
                    writeln!(out, "{index:>3}: D")
                }
                EntryState::Written => {
                    let raw = self.read_entry(partition, index)?;
                    match Item::from_bytes(&raw) {
                        Some(item) => {
                            if span_is_consistent(index, &item) {
                                skip = item.span as usize - 1;
                            }
                            let len = if item.item_type.is_variable_length() {
                                item.sized().size as i32
                            } else {
                                -1
                            };
                            writeln!(
                                out,
                                "{index:>3}: W ns={:>2} type={:>2} span={:>3} key=\"{}\" chunkIdx={} len={}",
                                item.namespace_index,
                                item.item_type as u8,
                                item.span,
                                item.key.name(),
                                item.chunk_index,
                                len
                            )
                        }
                        None => writeln!(out, "{index:>3}: W ?"),
                    }
                }
            };
            line.map_err(|_| Error::InvalidArg)?;
        }

        Ok(())
    }

    fn hash_candidates(&self, hash: u32, start: usize) -> impl Iterator<Item = usize> + '_ {
        self.hash_list
            .iter()
            .filter(move |entry| entry.hash == hash && entry.index as usize >= start)
            .map(|entry| entry.index as usize)
    }

    fn entry_state(&self, index: usize) -> EntryState {
        let byte = self.entry_state_bitmap[index / 4];
        let two_bits = (byte >> ((index % 4) * 2)) & 0b11;
        // every two bit pattern is a variant
        EntryState::from_repr(two_bits).unwrap_or(EntryState::Illegal)
    }

    fn set_entry_state_range<T: Platform>(
        &mut self,
        partition: &mut Partition<T>,
        indices: Range<usize>,
        state: EntryState,
    ) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!(
            "set_entry_state_range: sector {} [{}-{}]: {}",
            self.sector, indices.start, indices.end, state
        );

        if indices.is_empty() {
            return Ok(());
        }

        for index in indices.clone() {
            let shift = (index % 4) * 2;
            let mask = 0b11u8 << shift;
            let bits = (state as u8) << shift;
            self.entry_state_bitmap[index / 4] &= bits | !mask;
        }

        let start_byte = T::align_write_floor(indices.start / 4);
        let end_byte = T::align_write_ceil((indices.end - 1) / 4 + 1).min(ENTRY_STATE_BITMAP_SIZE);

        partition.write(
            self.base() + (ENTRY_TABLE_OFFSET + start_byte) as u32,
            &self.entry_state_bitmap[start_byte..end_byte],
        )
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sector = self.sector;
        let state = self.state;
        match self.sequence() {
            Some(sequence) => write!(
                f,
                "Page {{ sector: {sector}, state: {state}, sequence: {sequence}, used: {}, erased: {}, next_free: {} }}",
                self.used_entry_count, self.erased_entry_count, self.next_free_entry
            ),
            None => write!(f, "Page {{ sector: {sector}, state: {state} }}"),
        }
    }
}

fn slot(buf: &[u8], index: usize) -> &[u8] {
    let start = ENTRY_DATA_OFFSET + index * ITEM_SIZE;
    &buf[start..start + ITEM_SIZE]
}

fn parse_slot<T: Platform>(buf: &[u8], index: usize) -> Option<Item> {
    let mut raw = [0u8; ITEM_SIZE];
    raw.copy_from_slice(slot(buf, index));
    Item::from_bytes(&raw).filter(|item| item.is_crc_valid(T::crc32))
}

/// Rejects spans that leave the page or disagree with the type and stored size.
fn span_is_consistent(index: usize, item: &Item) -> bool {
    let span = item.span as usize;
    if span == 0 || index + span > ENTRY_COUNT {
        return false;
    }

    if item.item_type.is_variable_length() {
        Item::span_for(item.item_type, item.sized().size as usize) == span
    } else {
        span == 1
    }
}
