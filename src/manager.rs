//! Entry point of the crate. The `PartitionManager` owns every initialized partition behind a
//! single lock and hands out namespace handles referring to them.
//!
//! ```text
//! PartitionManager
//! └── Mutex<Registry>
//!     ├── storages: one Storage per initialized partition
//!     └── handles:  id -> (partition, namespace, mode)
//! ```
//!
//! Handles only hold their id, every operation resolves it under the lock, so deinitializing a
//! partition invalidates its handles without touching them.

use crate::config::{DEFAULT_PARTITION_NAME, PartitionTable, validate_name};
use crate::error::Error;
use crate::handle::Handle;
use crate::item::{ItemType, NS_ANY};
use crate::partition::Partition;
use crate::platform::Platform;
use crate::storage::{EntryCursor, EntryInfo, Storage};
use crate::{Key, NvsStats, PartitionStatistics};
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
#[cfg(feature = "defmt")]
use defmt::{debug, trace};
use lock_api::{Mutex, RawMutex};

/// The manager used on hosts and under an OS.
#[cfg(feature = "std")]
pub type Nvs<P> = PartitionManager<parking_lot::RawMutex, P>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OpenMode {
    ReadOnly,
    /// Creates the namespace if it doesn't exist yet.
    ReadWrite,
}

struct HandleEntry {
    partition: String,
    namespace_index: u8,
    read_only: bool,
}

struct Registry<P: Platform> {
    storages: Vec<Storage<P>>,
    handles: BTreeMap<u32, HandleEntry>,
    next_handle: u32,
}

impl<P: Platform> Registry<P> {
    fn storage(&mut self, name: &str) -> Result<&mut Storage<P>, Error> {
        if self.storages.is_empty() {
            return Err(Error::NotInitialized);
        }
        self.storages
            .iter_mut()
            .find(|it| it.partition().name() == name)
            .ok_or(Error::PartitionNotFound)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.storages
            .iter()
            .position(|it| it.partition().name() == name)
    }

    fn invalidate_handles(&mut self, name: &str) {
        self.handles.retain(|_, handle| handle.partition != name);
    }
}

pub struct PartitionManager<R: RawMutex, P: Platform> {
    table: PartitionTable,
    registry: Mutex<R, Registry<P>>,
}

impl<R: RawMutex, P: Platform> PartitionManager<R, P> {
    pub fn new(table: PartitionTable) -> Self {
        Self {
            table,
            registry: Mutex::new(Registry {
                storages: Vec::new(),
                handles: BTreeMap::new(),
                next_handle: 1,
            }),
        }
    }

    pub fn partition_table(&self) -> &PartitionTable {
        &self.table
    }

    /// Initializes the default partition `"nvs"`.
    pub fn init(&self, medium: P) -> Result<(), Error> {
        self.init_partition(DEFAULT_PARTITION_NAME, medium)
    }

    /// Loads a partition of the table. Initializing it a second time does nothing, the
    /// medium is dropped in that case.
    pub fn init_partition(&self, name: &str, medium: P) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("init_partition");

        validate_name(name)?;

        let mut registry = self.registry.lock();
        if registry.position(name).is_some() {
            return Ok(());
        }

        let entry = self.table.lookup(name)?;
        let storage = Storage::init(Partition::from_entry(entry, medium)?)?;
        registry.storages.push(storage);

        #[cfg(feature = "defmt")]
        debug!("partition initialized");

        Ok(())
    }

    /// Loads a partition that isn't part of the table.
    pub fn init_custom(&self, partition: Partition<P>) -> Result<(), Error> {
        let mut registry = self.registry.lock();
        if registry.position(partition.name()).is_some() {
            return Ok(());
        }

        let storage = Storage::init(partition)?;
        registry.storages.push(storage);
        Ok(())
    }

    /// Deinitializes the default partition `"nvs"`, see `deinit_partition`.
    pub fn deinit(&self) -> Result<P, Error> {
        self.deinit_partition(DEFAULT_PARTITION_NAME)
    }

    /// Closes all handles of the partition and gives the medium back.
    pub fn deinit_partition(&self, name: &str) -> Result<P, Error> {
        let mut registry = self.registry.lock();
        let position = registry.position(name).ok_or(Error::NotInitialized)?;

        registry.invalidate_handles(name);
        let storage = registry.storages.remove(position);
        Ok(storage.into_partition().into_medium())
    }

    /// Erases every sector of an initialized partition. Its handles are closed.
    pub fn erase_partition(&self, name: &str) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("erase_partition");

        let mut registry = self.registry.lock();
        let position = registry.position(name).ok_or(Error::NotInitialized)?;

        registry.invalidate_handles(name);
        registry.storages[position].erase_all()
    }

    /// Opens a namespace. In `ReadOnly` mode a missing namespace is `NotFound`.
    pub fn open(
        &self,
        partition: &str,
        namespace: &str,
        mode: OpenMode,
    ) -> Result<Handle<'_, R, P>, Error> {
        let namespace = Key::new(namespace)?;

        let mut registry = self.registry.lock();
        let storage = registry.storage(partition)?;
        let namespace_index =
            storage.create_or_open_namespace(&namespace, mode == OpenMode::ReadWrite)?;

        let mut id = registry.next_handle;
        while registry.handles.contains_key(&id) {
            id = id.wrapping_add(1);
        }
        registry.next_handle = id.wrapping_add(1);

        registry.handles.insert(
            id,
            HandleEntry {
                partition: String::from(partition),
                namespace_index,
                read_only: mode == OpenMode::ReadOnly,
            },
        );

        Ok(Handle::new(self, id))
    }

    pub fn open_default(&self, namespace: &str, mode: OpenMode) -> Result<Handle<'_, R, P>, Error> {
        self.open(DEFAULT_PARTITION_NAME, namespace, mode)
    }

    pub fn open_handle_count(&self) -> usize {
        self.registry.lock().handles.len()
    }

    pub fn stats(&self, partition: &str) -> Result<NvsStats, Error> {
        self.registry.lock().storage(partition)?.fill_stats()
    }

    /// Page and entry state counts, for diagnostics.
    pub fn partition_statistics(&self, partition: &str) -> Result<PartitionStatistics, Error> {
        Ok(self.registry.lock().storage(partition)?.page_statistics())
    }

    /// Iterates over the values of a partition, optionally limited to one namespace and one
    /// type. A missing namespace is `NotFound`.
    pub fn entry_find(
        &self,
        partition: &str,
        namespace: Option<&str>,
        item_type: ItemType,
    ) -> Result<EntryIterator<'_, R, P>, Error> {
        let namespace_index = match namespace {
            Some(name) => {
                let name = Key::new(name)?;
                self.registry
                    .lock()
                    .storage(partition)?
                    .create_or_open_namespace(&name, false)?
            }
            None => {
                self.registry.lock().storage(partition)?;
                NS_ANY
            }
        };

        Ok(EntryIterator::new(
            self,
            String::from(partition),
            namespace_index,
            item_type,
        ))
    }

    /// Resolves a handle and runs `f` on its storage. Writes through a read-only handle fail.
    pub(crate) fn with_handle<V>(
        &self,
        id: u32,
        write: bool,
        f: impl FnOnce(&mut Storage<P>, u8) -> Result<V, Error>,
    ) -> Result<V, Error> {
        let mut registry = self.registry.lock();
        let registry = &mut *registry;

        let handle = registry.handles.get(&id).ok_or(Error::InvalidHandle)?;
        if write && handle.read_only {
            return Err(Error::ReadOnly);
        }

        let namespace_index = handle.namespace_index;
        let storage = registry
            .storages
            .iter_mut()
            .find(|it| it.partition().name() == handle.partition)
            .ok_or(Error::InvalidHandle)?;

        f(storage, namespace_index)
    }

    /// Partition name and namespace index of an open handle.
    pub(crate) fn handle_target(&self, id: u32) -> Result<(String, u8), Error> {
        let registry = self.registry.lock();
        let handle = registry.handles.get(&id).ok_or(Error::InvalidHandle)?;
        Ok((handle.partition.clone(), handle.namespace_index))
    }

    pub(crate) fn close_handle(&self, id: u32) {
        self.registry.lock().handles.remove(&id);
    }

    fn with_storage<V>(
        &self,
        partition: &str,
        f: impl FnOnce(&mut Storage<P>) -> Result<V, Error>,
    ) -> Result<V, Error> {
        let mut registry = self.registry.lock();
        f(registry.storage(partition)?)
    }
}

/// Lazy iterator over the values of a partition. Every step takes the lock for a short scan,
/// other operations may run in between.
pub struct EntryIterator<'a, R: RawMutex, P: Platform> {
    manager: &'a PartitionManager<R, P>,
    partition: String,
    namespace_index: u8,
    item_type: ItemType,
    cursor: EntryCursor,
    done: bool,
}

impl<'a, R: RawMutex, P: Platform> EntryIterator<'a, R, P> {
    pub(crate) fn new(
        manager: &'a PartitionManager<R, P>,
        partition: String,
        namespace_index: u8,
        item_type: ItemType,
    ) -> Self {
        Self {
            manager,
            partition,
            namespace_index,
            item_type,
            cursor: EntryCursor::default(),
            done: false,
        }
    }
}

impl<R: RawMutex, P: Platform> Iterator for EntryIterator<'_, R, P> {
    type Item = Result<EntryInfo, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let namespace_index = self.namespace_index;
        let item_type = self.item_type;
        let cursor = &mut self.cursor;
        let result = self.manager.with_storage(&self.partition, |storage| {
            storage.next_entry(cursor, namespace_index, item_type)
        });

        match result {
            Ok(Some(info)) => Some(Ok(info)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
