//! A single initialized partition: the page manager, the namespace table and every item
//! operation on top of them.
//!
//! Updates are always written before the old copy is erased. Whatever is left after a power
//! loss in between is resolved by `Storage::init`, which keeps the newer copy.

use crate::error::Error;
use crate::item::{CHUNK_ANY, ITEM_SIZE, Item, ItemType, NS_ANY, NS_INDEX, VersionOffset};
use crate::page::{CHUNK_MAX_SIZE, PageState};
use crate::page_manager::PageManager;
use crate::partition::Partition;
use crate::platform::Platform;
use crate::{Key, NvsStats, PartitionStatistics};
use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec::Vec;
use core::fmt;
#[cfg(feature = "defmt")]
use defmt::{trace, warn};

/// Position of a live item: arena index of the page and slot index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Location {
    page: usize,
    index: usize,
}

/// Decision of a `Storage::scan` visitor.
enum Visit {
    Skip,
    Erase,
    EraseAndStop,
}

/// Whatever was stored under a key before a write.
enum Previous {
    None,
    Same(Location, Item),
    Other(ItemType),
}

/// Key, namespace and type of a stored value as reported by the entry iterator. Blobs are
/// reported as `ItemType::Blob`, independent of how they are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EntryInfo {
    pub namespace: Key,
    pub key: Key,
    pub item_type: ItemType,
}

/// Position of an entry iteration. Iteration is forward only, values written after the cursor
/// passed their page may or may not be reported. Every key is reported at most once, also when
/// compaction moves already reported values to a newer page.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EntryCursor {
    sequence: u32,
    index: usize,
    reported: BTreeSet<(u8, Key)>,
}

pub struct Storage<T: Platform> {
    partition: Partition<T>,
    page_manager: PageManager,
    namespaces: BTreeMap<Key, u8>,
    faulted: bool,
}

impl<T: Platform> Storage<T> {
    /// Loads all pages of the partition and
    /// 1. repairs interrupted writes and compactions
    /// 2. resolves the namespace table
    /// 3. erases older duplicates of values written twice
    /// 4. erases incomplete blobs and blob chunks without an index
    pub fn init(mut partition: Partition<T>) -> Result<Self, Error> {
        #[cfg(feature = "defmt")]
        trace!("storage: init");

        #[cfg(feature = "debug-logs")]
        println!("storage: init '{}'", partition.name());

        let page_manager = PageManager::load(&mut partition)?;

        let mut storage = Self {
            partition,
            page_manager,
            namespaces: BTreeMap::new(),
            faulted: false,
        };

        storage.load_namespaces()?;
        storage.cleanup_duplicate_entries()?;
        storage.cleanup_dirty_blobs()?;

        Ok(storage)
    }

    pub fn partition(&self) -> &Partition<T> {
        &self.partition
    }

    pub fn into_partition(self) -> Partition<T> {
        self.partition
    }

    /// Erases every sector and starts over with an empty partition.
    pub fn erase_all(&mut self) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        warn!("storage: erasing partition");

        let size = self.partition.size();
        let result = self.partition.erase_range(0, size);
        self.track(result)?;

        self.page_manager = PageManager::load(&mut self.partition)?;
        self.namespaces.clear();
        self.faulted = false;
        Ok(())
    }

    /// Looks up a namespace by name, creating it when `can_create` is set. Namespace indices
    /// are never reused, a partition holds at most 254 namespaces.
    pub fn create_or_open_namespace(&mut self, name: &Key, can_create: bool) -> Result<u8, Error> {
        validate_key(name)?;

        if let Some(&index) = self.namespaces.get(name) {
            return Ok(index);
        }

        if !can_create {
            return Err(Error::NotFound);
        }

        self.check_writable()?;

        let used = self.namespaces.values().copied().collect::<BTreeSet<_>>();
        let index = (1..NS_ANY)
            .find(|it| !used.contains(it))
            .ok_or(Error::NotEnoughSpace)?;

        #[cfg(feature = "debug-logs")]
        println!("storage: create namespace {name:?} -> {index}");

        let result = self.write_single(NS_INDEX, ItemType::U8, name, CHUNK_ANY, &[index]);
        self.track(result)?;

        self.namespaces.insert(*name, index);
        Ok(index)
    }

    /// Writes a value. Primitive types expect their little endian bytes, `Sized` the raw
    /// string bytes and `Blob` an arbitrary payload, which is split into chunks. Writing the
    /// stored value again doesn't touch the medium.
    pub fn write_item(
        &mut self,
        namespace_index: u8,
        item_type: ItemType,
        key: &Key,
        data: &[u8],
    ) -> Result<(), Error> {
        self.check_writable()?;
        let result = self.write_item_inner(namespace_index, item_type, key, data);
        self.track(result)
    }

    fn write_item_inner(
        &mut self,
        namespace_index: u8,
        item_type: ItemType,
        key: &Key,
        data: &[u8],
    ) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("write_item: ns {} type {}", namespace_index, item_type);

        #[cfg(feature = "debug-logs")]
        println!("storage: write_item ns {namespace_index} {key:?} {item_type} [{}]", data.len());

        validate_namespace_index(namespace_index)?;
        validate_key(key)?;

        match item_type {
            ItemType::Sized if data.len() > CHUNK_MAX_SIZE => return Err(Error::ValueTooLong),
            ItemType::Sized => {}
            ItemType::Blob if data.len() > self.max_blob_size() => {
                return Err(Error::ValueTooLong);
            }
            ItemType::Blob => {}
            _ => match item_type.primitive_width() {
                Some(width) if width == data.len() => {}
                _ => return Err(Error::InvalidArg),
            },
        }

        let lookup_type = match item_type {
            ItemType::Blob => ItemType::BlobIndex,
            other => other,
        };
        let previous = match self.find_item(namespace_index, lookup_type, Some(key), CHUNK_ANY, None) {
            Ok((location, item)) => Previous::Same(location, item),
            Err(Error::TypeMismatch(found)) => Previous::Other(found),
            Err(Error::NotFound) => Previous::None,
            Err(e) => return Err(e),
        };

        if let Previous::Same(location, item) = &previous
            && self.is_unchanged(namespace_index, key, *location, item, data)?
        {
            #[cfg(feature = "debug-logs")]
            println!("storage: value unchanged");

            return Ok(());
        }

        if item_type == ItemType::Blob {
            let version = match &previous {
                Previous::Same(_, item) => item.blob_index().chunk_start.invert(),
                _ => VersionOffset::V0,
            };

            // chunks of an earlier failed attempt would collide with the new ones
            self.erase_matching(namespace_index, key, |item| is_blob_chunk(item, version))?;

            if let Err(e) = self.write_multi_page_blob(namespace_index, key, data, version) {
                #[cfg(feature = "defmt")]
                warn!("blob write failed, erasing written chunks");

                // a failed cleanup takes precedence, the medium error has to latch
                self.erase_matching(namespace_index, key, |item| is_blob_chunk(item, version))?;
                return Err(e);
            }

            return match previous {
                Previous::None => Ok(()),
                Previous::Same(_, item) => {
                    let old = item.blob_index().chunk_start;
                    self.erase_matching(namespace_index, key, |item| is_blob_part(item, Some(old)))
                }
                Previous::Other(found) => self.erase_other(namespace_index, key, found, None),
            };
        }

        let location = self.write_single(namespace_index, item_type, key, CHUNK_ANY, data)?;

        match previous {
            Previous::None => Ok(()),
            Previous::Same(..) => self.erase_other(namespace_index, key, item_type, Some(location)),
            Previous::Other(found) => self.erase_other(namespace_index, key, found, Some(location)),
        }
    }

    fn is_unchanged(
        &mut self,
        namespace_index: u8,
        key: &Key,
        location: Location,
        item: &Item,
        data: &[u8],
    ) -> Result<bool, Error> {
        if let Some(width) = item.item_type.primitive_width() {
            return Ok(item.data[..width] == *data);
        }

        let stored_len = match item.item_type {
            ItemType::Sized => item.sized().size as usize,
            ItemType::BlobIndex => item.blob_index().size as usize,
            _ => return Ok(false),
        };
        if stored_len != data.len() {
            return Ok(false);
        }

        let mut stored = Vec::new();
        stored
            .try_reserve_exact(stored_len)
            .map_err(|_| Error::NoMemory)?;
        stored.resize(stored_len, 0);

        let result = if item.item_type == ItemType::Sized {
            self.page_manager
                .page(location.page)
                .read_payload(&mut self.partition, location.index, item, &mut stored)
        } else {
            self.read_blob_chunks(namespace_index, key, item, &mut stored)
        };

        match result {
            Ok(()) => Ok(stored == data),
            Err(Error::MediumError) => Err(Error::MediumError),
            Err(_) => Ok(false),
        }
    }

    /// Appends a single item to the active page. A full page is swapped for a new one once,
    /// if the item doesn't fit there either the partition is out of space.
    fn write_single(
        &mut self,
        namespace_index: u8,
        item_type: ItemType,
        key: &Key,
        chunk_index: u8,
        value: &[u8],
    ) -> Result<Location, Error> {
        let current = self.page_manager.current()?;
        match self.page_manager.page_mut(current).write_item(
            &mut self.partition,
            namespace_index,
            item_type,
            key,
            chunk_index,
            value,
        ) {
            Ok(index) => {
                return Ok(Location {
                    page: current,
                    index,
                });
            }
            Err(Error::PageFull) => {}
            Err(e) => return Err(e),
        }

        self.mark_full(current)?;
        self.page_manager.request_new_page(&mut self.partition)?;

        let current = self.page_manager.current()?;
        match self.page_manager.page_mut(current).write_item(
            &mut self.partition,
            namespace_index,
            item_type,
            key,
            chunk_index,
            value,
        ) {
            Ok(index) => Ok(Location {
                page: current,
                index,
            }),
            Err(Error::PageFull) => Err(Error::NotEnoughSpace),
            Err(e) => Err(e),
        }
    }

    /// Splits `data` into chunks filling the tail of the active page and continuing on new
    /// pages, then writes the index describing them.
    fn write_multi_page_blob(
        &mut self,
        namespace_index: u8,
        key: &Key,
        data: &[u8],
        version: VersionOffset,
    ) -> Result<(), Error> {
        let mut chunk_count: u8 = 0;
        let mut offset = 0;

        loop {
            let current = self.page_manager.current()?;
            let tailroom = self.page_manager.page(current).var_data_tailroom();
            let remaining = data.len() - offset;

            // don't start a blob with a tiny chunk at the end of a page
            if chunk_count == 0
                && (tailroom < remaining || (tailroom == 0 && remaining == 0))
                && tailroom < CHUNK_MAX_SIZE / 10
            {
                self.mark_full(current)?;
                self.page_manager.request_new_page(&mut self.partition)?;

                let next = self.page_manager.current()?;
                if self.page_manager.page(next).var_data_tailroom() == tailroom {
                    return Err(Error::NotEnoughSpace);
                }
                continue;
            }

            if tailroom == 0 {
                return Err(Error::NotEnoughSpace);
            }

            // the chunk indices of one version have to stay below the other version
            if chunk_count >= VersionOffset::V1 as u8 {
                return Err(Error::ValueTooLong);
            }

            let chunk_size = remaining.min(tailroom);
            self.page_manager.page_mut(current).write_item(
                &mut self.partition,
                namespace_index,
                ItemType::BlobData,
                key,
                version as u8 + chunk_count,
                &data[offset..offset + chunk_size],
            )?;
            chunk_count += 1;
            offset += chunk_size;

            if offset < data.len() || tailroom - chunk_size < ITEM_SIZE {
                self.mark_full(current)?;
                self.page_manager.request_new_page(&mut self.partition)?;
            }

            if offset == data.len() {
                let index = Item::blob_index_data(data.len() as u32, chunk_count, version);
                let current = self.page_manager.current()?;
                self.page_manager.page_mut(current).write_item(
                    &mut self.partition,
                    namespace_index,
                    ItemType::BlobIndex,
                    key,
                    CHUNK_ANY,
                    &index,
                )?;

                #[cfg(feature = "debug-logs")]
                println!("storage: blob written in {chunk_count} chunks, {version:?}");

                return Ok(());
            }
        }
    }

    fn mark_full(&mut self, page: usize) -> Result<(), Error> {
        let page = self.page_manager.page_mut(page);
        if page.state() == PageState::Active {
            page.mark_full(&mut self.partition)?;
        }
        Ok(())
    }

    /// Erases the first item of type `item_type` stored under `key`, skipping `keep`. Any
    /// part of a blob takes the whole blob with it.
    fn erase_other(
        &mut self,
        namespace_index: u8,
        key: &Key,
        item_type: ItemType,
        keep: Option<Location>,
    ) -> Result<(), Error> {
        if matches!(item_type, ItemType::BlobIndex | ItemType::BlobData) {
            return self.erase_matching(namespace_index, key, |item| is_blob_part(item, None));
        }

        self.scan(namespace_index, Some(key), |location, item| {
            if Some(location) != keep
                && item.item_type == item_type
                && item.chunk_index == CHUNK_ANY
            {
                Visit::EraseAndStop
            } else {
                Visit::Skip
            }
        })
    }

    fn erase_matching(
        &mut self,
        namespace_index: u8,
        key: &Key,
        filter: impl Fn(&Item) -> bool,
    ) -> Result<(), Error> {
        self.scan(namespace_index, Some(key), |_, item| {
            if filter(item) { Visit::Erase } else { Visit::Skip }
        })
    }

    /// Visits every live item of the namespace (and key, if given), oldest page first.
    fn scan(
        &mut self,
        namespace_index: u8,
        key: Option<&Key>,
        mut visit: impl FnMut(Location, &Item) -> Visit,
    ) -> Result<(), Error> {
        for position in 0..self.page_manager.page_list().len() {
            let page_idx = self.page_manager.page_list()[position];
            let mut cursor = 0;
            loop {
                let page = self.page_manager.page_mut(page_idx);
                let item = match page.find_item(
                    &mut self.partition,
                    namespace_index,
                    ItemType::Any,
                    key,
                    CHUNK_ANY,
                    None,
                    &mut cursor,
                ) {
                    Ok(item) => item,
                    Err(Error::NotFound) => break,
                    Err(e) => return Err(e),
                };

                let location = Location {
                    page: page_idx,
                    index: cursor,
                };
                match visit(location, &item) {
                    Visit::Skip => {}
                    Visit::Erase => page.erase_entry_and_span(&mut self.partition, cursor)?,
                    Visit::EraseAndStop => {
                        return page.erase_entry_and_span(&mut self.partition, cursor);
                    }
                }
                cursor += item.span as usize;
            }
        }

        Ok(())
    }

    /// First match in page order. A type mismatch is only reported if no page holds a
    /// matching item.
    fn find_item(
        &mut self,
        namespace_index: u8,
        item_type: ItemType,
        key: Option<&Key>,
        chunk_index: u8,
        version: Option<VersionOffset>,
    ) -> Result<(Location, Item), Error> {
        let mut mismatch = None;

        for position in 0..self.page_manager.page_list().len() {
            let page_idx = self.page_manager.page_list()[position];
            let mut cursor = 0;
            match self.page_manager.page_mut(page_idx).find_item(
                &mut self.partition,
                namespace_index,
                item_type,
                key,
                chunk_index,
                version,
                &mut cursor,
            ) {
                Ok(item) => {
                    return Ok((
                        Location {
                            page: page_idx,
                            index: cursor,
                        },
                        item,
                    ));
                }
                Err(Error::NotFound) => {}
                Err(Error::TypeMismatch(found)) => {
                    mismatch.get_or_insert(found);
                }
                Err(e) => return Err(e),
            }
        }

        Err(mismatch.map_or(Error::NotFound, Error::TypeMismatch))
    }

    /// Copies a value into `out` and returns its length. `out` may be longer than the value,
    /// a shorter one fails with `InvalidLength` carrying the required length.
    pub fn read_item(
        &mut self,
        namespace_index: u8,
        item_type: ItemType,
        key: &Key,
        out: &mut [u8],
    ) -> Result<usize, Error> {
        let result = self.read_item_inner(namespace_index, item_type, key, out);
        self.track(result)
    }

    fn read_item_inner(
        &mut self,
        namespace_index: u8,
        item_type: ItemType,
        key: &Key,
        out: &mut [u8],
    ) -> Result<usize, Error> {
        #[cfg(feature = "defmt")]
        trace!("read_item: ns {} type {}", namespace_index, item_type);

        validate_namespace_index(namespace_index)?;
        validate_key(key)?;

        if let Some(width) = item_type.primitive_width() {
            let (_, item) = self.find_item(namespace_index, item_type, Some(key), CHUNK_ANY, None)?;
            if out.len() < width {
                return Err(Error::InvalidLength { required: width });
            }
            out[..width].copy_from_slice(&item.data[..width]);
            return Ok(width);
        }

        match item_type {
            ItemType::Sized => {
                let (location, item) =
                    self.find_item(namespace_index, ItemType::Sized, Some(key), CHUNK_ANY, None)?;
                self.read_single_payload(location, &item, out)
            }
            ItemType::Blob => {
                match self.find_item(namespace_index, ItemType::BlobIndex, Some(key), CHUNK_ANY, None) {
                    Ok((_, index)) => {
                        let size = index.blob_index().size as usize;
                        if out.len() < size {
                            return Err(Error::InvalidLength { required: size });
                        }
                        self.read_blob_chunks(namespace_index, key, &index, &mut out[..size])?;
                        Ok(size)
                    }
                    // written by an old format version as a single item
                    Err(Error::TypeMismatch(ItemType::Blob)) => {
                        let (location, item) = self.find_item(
                            namespace_index,
                            ItemType::Blob,
                            Some(key),
                            CHUNK_ANY,
                            None,
                        )?;
                        self.read_single_payload(location, &item, out)
                    }
                    Err(e) => Err(e),
                }
            }
            _ => Err(Error::InvalidArg),
        }
    }

    fn read_single_payload(
        &mut self,
        location: Location,
        item: &Item,
        out: &mut [u8],
    ) -> Result<usize, Error> {
        let size = item.sized().size as usize;
        if out.len() < size {
            return Err(Error::InvalidLength { required: size });
        }
        self.page_manager.page(location.page).read_payload(
            &mut self.partition,
            location.index,
            item,
            &mut out[..size],
        )?;
        Ok(size)
    }

    /// Reassembles the chunks referenced by a blob index, `out` has exactly the blob size.
    fn read_blob_chunks(
        &mut self,
        namespace_index: u8,
        key: &Key,
        index: &Item,
        out: &mut [u8],
    ) -> Result<(), Error> {
        let blob = index.blob_index();
        let mut offset = 0;

        for chunk in 0..blob.chunk_count {
            let chunk_index = blob.chunk_start as u8 + chunk;
            let (location, item) = self.find_item(
                namespace_index,
                ItemType::BlobData,
                Some(key),
                chunk_index,
                None,
            )?;

            let len = item.sized().size as usize;
            if offset + len > out.len() {
                return Err(Error::NotFound);
            }
            self.page_manager.page(location.page).read_payload(
                &mut self.partition,
                location.index,
                &item,
                &mut out[offset..offset + len],
            )?;
            offset += len;
        }

        if offset != out.len() {
            return Err(Error::NotFound);
        }

        Ok(())
    }

    /// Length of the stored value in bytes, the string terminator included.
    pub fn get_item_data_size(
        &mut self,
        namespace_index: u8,
        item_type: ItemType,
        key: &Key,
    ) -> Result<usize, Error> {
        validate_namespace_index(namespace_index)?;
        validate_key(key)?;

        if let Some(width) = item_type.primitive_width() {
            self.find_item(namespace_index, item_type, Some(key), CHUNK_ANY, None)?;
            return Ok(width);
        }

        let result = match item_type {
            ItemType::Sized => self
                .find_item(namespace_index, ItemType::Sized, Some(key), CHUNK_ANY, None)
                .map(|(_, item)| item.sized().size as usize),
            ItemType::Blob => {
                match self.find_item(namespace_index, ItemType::BlobIndex, Some(key), CHUNK_ANY, None) {
                    Ok((_, item)) => Ok(item.blob_index().size as usize),
                    Err(Error::TypeMismatch(ItemType::Blob)) => self
                        .find_item(namespace_index, ItemType::Blob, Some(key), CHUNK_ANY, None)
                        .map(|(_, item)| item.sized().size as usize),
                    Err(e) => Err(e),
                }
            }
            _ => Err(Error::InvalidArg),
        };
        self.track(result)
    }

    pub(crate) fn read_primitive(
        &mut self,
        namespace_index: u8,
        item_type: ItemType,
        key: &Key,
    ) -> Result<u64, Error> {
        let mut buf = [0u8; 8];
        self.read_item(namespace_index, item_type, key, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    pub(crate) fn write_primitive(
        &mut self,
        namespace_index: u8,
        item_type: ItemType,
        key: &Key,
        value: u64,
    ) -> Result<(), Error> {
        let width = item_type.primitive_width().ok_or(Error::InvalidArg)?;
        self.write_item(namespace_index, item_type, key, &value.to_le_bytes()[..width])
    }

    /// Reads a string or blob into a freshly allocated buffer.
    pub(crate) fn read_to_vec(
        &mut self,
        namespace_index: u8,
        item_type: ItemType,
        key: &Key,
    ) -> Result<Vec<u8>, Error> {
        let size = self.get_item_data_size(namespace_index, item_type, key)?;

        let mut buf = Vec::new();
        buf.try_reserve_exact(size).map_err(|_| Error::NoMemory)?;
        buf.resize(size, 0);

        let len = self.read_item(namespace_index, item_type, key, &mut buf)?;
        buf.truncate(len);
        Ok(buf)
    }

    /// Erases a value of any type, blobs with all their chunks.
    pub fn erase_item(&mut self, namespace_index: u8, key: &Key) -> Result<(), Error> {
        self.check_writable()?;
        let result = self.erase_item_inner(namespace_index, key);
        self.track(result)
    }

    fn erase_item_inner(&mut self, namespace_index: u8, key: &Key) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("erase_item: ns {}", namespace_index);

        validate_namespace_index(namespace_index)?;
        validate_key(key)?;

        let (location, item) =
            self.find_item(namespace_index, ItemType::Any, Some(key), CHUNK_ANY, None)?;

        match item.item_type {
            ItemType::BlobIndex | ItemType::BlobData => {
                self.erase_matching(namespace_index, key, |item| is_blob_part(item, None))
            }
            _ => self
                .page_manager
                .page_mut(location.page)
                .erase_entry_and_span(&mut self.partition, location.index),
        }
    }

    /// Erases every value of the namespace. The namespace itself stays registered.
    pub fn erase_namespace(&mut self, namespace_index: u8) -> Result<(), Error> {
        self.check_writable()?;
        validate_namespace_index(namespace_index)?;

        #[cfg(feature = "debug-logs")]
        println!("storage: erase_namespace {namespace_index}");

        let result = self.scan(namespace_index, None, |_, _| Visit::Erase);
        self.track(result)
    }

    /// Slots used by the namespace, payload slots and blob chunks included.
    pub fn calc_entries_in_namespace(&mut self, namespace_index: u8) -> Result<usize, Error> {
        validate_namespace_index(namespace_index)?;

        let mut used = 0;
        let result = self.scan(namespace_index, None, |_, item| {
            used += item.span as usize;
            Visit::Skip
        });
        self.track(result)?;
        Ok(used)
    }

    pub fn fill_stats(&self) -> Result<NvsStats, Error> {
        let mut stats = NvsStats::default();
        self.page_manager.fill_stats(&mut stats)?;
        stats.namespace_count = self.namespaces.len();
        Ok(stats)
    }

    pub fn page_statistics(&self) -> PartitionStatistics {
        self.page_manager.statistics()
    }

    /// Starts an iteration, see `next_entry`.
    pub fn find_entry(
        &mut self,
        namespace_index: u8,
        item_type: ItemType,
    ) -> Result<Option<(EntryCursor, EntryInfo)>, Error> {
        let mut cursor = EntryCursor::default();
        let entry = self.next_entry(&mut cursor, namespace_index, item_type)?;
        Ok(entry.map(|info| (cursor, info)))
    }

    /// Advances `cursor` to the next value matching the filters. `NS_ANY` and `ItemType::Any`
    /// match everything, the namespace table and blob chunks are never reported.
    pub fn next_entry(
        &mut self,
        cursor: &mut EntryCursor,
        namespace_index: u8,
        item_type: ItemType,
    ) -> Result<Option<EntryInfo>, Error> {
        let pages = self.page_manager.page_list().to_vec();

        for page_idx in pages {
            let Some(sequence) = self.page_manager.page(page_idx).sequence() else {
                continue;
            };
            if sequence < cursor.sequence {
                continue;
            }

            let mut index = if sequence == cursor.sequence {
                cursor.index
            } else {
                0
            };

            loop {
                let item = match self.page_manager.page_mut(page_idx).find_item(
                    &mut self.partition,
                    namespace_index,
                    ItemType::Any,
                    None,
                    CHUNK_ANY,
                    None,
                    &mut index,
                ) {
                    Ok(item) => item,
                    Err(Error::NotFound) => break,
                    Err(e) => return Err(e),
                };
                index += item.span as usize;

                if item.namespace_index == NS_INDEX {
                    continue;
                }

                let reported = match item.item_type {
                    ItemType::BlobData => continue,
                    ItemType::BlobIndex | ItemType::Blob => ItemType::Blob,
                    other => other,
                };
                if item_type != ItemType::Any && item_type != reported {
                    continue;
                }

                let Some(namespace) = self.namespace_name(item.namespace_index) else {
                    continue;
                };

                cursor.sequence = sequence;
                cursor.index = index;
                if !cursor.reported.insert((item.namespace_index, item.key)) {
                    continue;
                }

                return Ok(Some(EntryInfo {
                    namespace,
                    key: item.key,
                    item_type: reported,
                }));
            }
        }

        Ok(None)
    }

    fn namespace_name(&self, namespace_index: u8) -> Option<Key> {
        self.namespaces
            .iter()
            .find(|(_, index)| **index == namespace_index)
            .map(|(name, _)| *name)
    }

    /// Human readable dump of every page and slot.
    pub fn debug_dump(&mut self, out: &mut impl fmt::Write) -> Result<(), Error> {
        for position in 0..self.page_manager.page_list().len() {
            let page_idx = self.page_manager.page_list()[position];
            self.page_manager
                .page(page_idx)
                .debug_dump(&mut self.partition, out)?;
        }

        for page in self.page_manager.free_pages() {
            writeln!(out, "free: {page:?}").map_err(|_| Error::InvalidArg)?;
        }

        Ok(())
    }

    fn check_writable(&self) -> Result<(), Error> {
        if self.faulted {
            return Err(Error::MediumError);
        }
        Ok(())
    }

    fn track<V>(&mut self, result: Result<V, Error>) -> Result<V, Error> {
        if let Err(Error::MediumError) = result {
            #[cfg(feature = "defmt")]
            warn!("medium error, refusing further writes");

            self.faulted = true;
        }
        result
    }

    /// The largest blob the partition could hold, one page is always kept for compaction.
    pub fn max_blob_size(&self) -> usize {
        (self.page_manager.page_count() - 1) * CHUNK_MAX_SIZE
    }
}

// load time cleanup
impl<T: Platform> Storage<T> {
    fn load_namespaces(&mut self) -> Result<(), Error> {
        let mut found = Vec::new();
        self.scan(NS_INDEX, None, |_, item| {
            if item.item_type == ItemType::U8 && item.data[0] != NS_INDEX && item.data[0] != NS_ANY {
                found.push((item.key, item.data[0]));
            }
            Visit::Skip
        })?;

        #[cfg(feature = "debug-logs")]
        println!("storage: {} namespaces", found.len());

        self.namespaces.extend(found);
        Ok(())
    }

    /// Every live item, oldest first.
    fn collect_live(&mut self) -> Result<Vec<(Location, Item)>, Error> {
        let mut live = Vec::new();
        self.scan(NS_ANY, None, |location, item| {
            live.push((location, *item));
            Visit::Skip
        })?;
        Ok(live)
    }

    /// A write whose old copy wasn't erased leaves two values under one key. The newest one
    /// is kept, an erased blob index takes its chunks with it.
    fn cleanup_duplicate_entries(&mut self) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("cleanup_duplicate_entries");

        let mut groups = BTreeMap::<(u8, Key), Vec<(Location, Item)>>::new();
        for (location, item) in self.collect_live()? {
            if item.namespace_index == NS_INDEX || item.item_type == ItemType::BlobData {
                continue;
            }
            groups
                .entry((item.namespace_index, item.key))
                .or_default()
                .push((location, item));
        }

        for ((namespace_index, key), mut group) in groups {
            let Some((_, newest)) = group.pop() else {
                continue;
            };

            for (location, item) in group {
                #[cfg(feature = "debug-logs")]
                println!("storage: erasing older duplicate {item:?}");

                let version = (item.item_type == ItemType::BlobIndex)
                    .then(|| item.blob_index().chunk_start);
                let shares_chunks = newest.item_type == ItemType::BlobIndex
                    && version == Some(newest.blob_index().chunk_start);

                match version {
                    Some(version) if !shares_chunks => {
                        self.erase_matching(namespace_index, &key, |it| {
                            is_blob_part(it, Some(version))
                        })?;
                    }
                    _ => self
                        .page_manager
                        .page_mut(location.page)
                        .erase_entry_and_span(&mut self.partition, location.index)?,
                }
            }
        }

        Ok(())
    }

    /// Erases blob indices missing a chunk and chunks no complete index refers to.
    fn cleanup_dirty_blobs(&mut self) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("cleanup_dirty_blobs");

        let live = self.collect_live()?;
        let chunks = live
            .iter()
            .filter(|(_, item)| item.item_type == ItemType::BlobData)
            .collect::<Vec<_>>();

        let mut referenced = BTreeSet::new();
        let mut dirty = Vec::new();

        for (location, index) in live.iter().filter(|(_, it)| it.item_type == ItemType::BlobIndex) {
            let blob = index.blob_index();
            let start = blob.chunk_start as u8;
            let range = start..start.saturating_add(blob.chunk_count);

            let mut sizes = BTreeMap::new();
            for (_, chunk) in &chunks {
                if chunk.namespace_index == index.namespace_index
                    && chunk.key == index.key
                    && range.contains(&chunk.chunk_index)
                {
                    sizes.insert(chunk.chunk_index, chunk.sized().size as u32);
                }
            }

            if sizes.len() == blob.chunk_count as usize && sizes.values().sum::<u32>() == blob.size {
                for chunk_index in range {
                    referenced.insert((index.namespace_index, index.key, chunk_index));
                }
            } else {
                #[cfg(feature = "defmt")]
                warn!("incomplete blob index, erasing");

                #[cfg(feature = "debug-logs")]
                println!("storage: incomplete blob {index:?}, found {} chunks", sizes.len());

                dirty.push(*location);
            }
        }

        for (location, chunk) in &chunks {
            if !referenced.contains(&(chunk.namespace_index, chunk.key, chunk.chunk_index)) {
                #[cfg(feature = "debug-logs")]
                println!("storage: orphaned blob chunk {chunk:?}");

                dirty.push(*location);
            }
        }

        for location in dirty {
            self.page_manager
                .page_mut(location.page)
                .erase_entry_and_span(&mut self.partition, location.index)?;
        }

        Ok(())
    }
}

fn is_blob_chunk(item: &Item, version: VersionOffset) -> bool {
    item.item_type == ItemType::BlobData && VersionOffset::of_chunk(item.chunk_index) == version
}

/// Index or chunk of a blob, of the given version or of any.
fn is_blob_part(item: &Item, version: Option<VersionOffset>) -> bool {
    match item.item_type {
        ItemType::BlobIndex => version.is_none_or(|it| item.blob_index().chunk_start == it),
        ItemType::BlobData => version.is_none_or(|it| VersionOffset::of_chunk(item.chunk_index) == it),
        _ => false,
    }
}

fn validate_namespace_index(namespace_index: u8) -> Result<(), Error> {
    if namespace_index == NS_INDEX || namespace_index == NS_ANY {
        return Err(Error::InvalidArg);
    }
    Ok(())
}

pub(crate) fn validate_key(key: &Key) -> Result<(), Error> {
    let bytes = key.as_bytes();
    if bytes[0] == 0 {
        return Err(Error::InvalidArg);
    }
    if bytes[bytes.len() - 1] != 0 {
        return Err(Error::KeyTooLong);
    }
    Ok(())
}
