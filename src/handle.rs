use crate::error::Error;
use crate::get::Get;
use crate::item::{ItemType, Primitive};
use crate::manager::{EntryIterator, PartitionManager};
use crate::platform::Platform;
use crate::set::Set;
use crate::storage::Storage;
use crate::{Key, NvsStats};
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
#[cfg(feature = "defmt")]
use defmt::trace;
use lock_api::RawMutex;

/// An open namespace of one partition. Closed on drop.
///
/// Keys have up to 15 bytes. Every call fails with `InvalidHandle` once the partition was
/// deinitialized or erased.
pub struct Handle<'a, R: RawMutex, P: Platform> {
    manager: &'a PartitionManager<R, P>,
    id: u32,
}

impl<'a, R: RawMutex, P: Platform> Handle<'a, R, P> {
    pub(crate) fn new(manager: &'a PartitionManager<R, P>, id: u32) -> Self {
        Self { manager, id }
    }

    fn read<V>(
        &self,
        key: &str,
        f: impl FnOnce(&mut Storage<P>, u8, &Key) -> Result<V, Error>,
    ) -> Result<V, Error> {
        let key = Key::new(key)?;
        self.manager
            .with_handle(self.id, false, |storage, ns| f(storage, ns, &key))
    }

    fn write<V>(
        &self,
        key: &str,
        f: impl FnOnce(&mut Storage<P>, u8, &Key) -> Result<V, Error>,
    ) -> Result<V, Error> {
        let key = Key::new(key)?;
        self.manager
            .with_handle(self.id, true, |storage, ns| f(storage, ns, &key))
    }

    pub fn set_typed_item<V: Primitive>(&self, key: &str, value: V) -> Result<(), Error> {
        self.write(key, |storage, ns, key| storage.set_typed_item(ns, key, value))
    }

    /// Fails with `TypeMismatch` if the value was stored with another type.
    pub fn get_typed_item<V: Primitive>(&self, key: &str) -> Result<V, Error> {
        self.read(key, |storage, ns, key| storage.get_typed_item(ns, key))
    }

    /// Set a value of any supported type
    ///
    /// Type support:
    ///  * bool, signed and unsigned integers up to 64-bit width: stored inline in a single entry
    ///  * &str: stored on a single page with a max size of 4000 bytes including the terminator
    ///  * &[u8]: may span multiple pages
    pub fn set<V>(&self, key: &str, value: V) -> Result<(), Error>
    where
        Storage<P>: Set<V>,
    {
        self.write(key, |storage, ns, key| Set::set(storage, ns, key, value))
    }

    /// Get a value of any supported type: bool, integers, `String` and `Vec<u8>`.
    pub fn get<V>(&self, key: &str) -> Result<V, Error>
    where
        Storage<P>: Get<V>,
    {
        self.read(key, |storage, ns, key| Get::get(storage, ns, key))
    }

    pub fn set_string(&self, key: &str, value: &str) -> Result<(), Error> {
        self.write(key, |storage, ns, key| storage.set_str(ns, key, value))
    }

    pub fn get_string(&self, key: &str) -> Result<String, Error> {
        self.get(key)
    }

    /// Copies the string including its null terminator into `out`, returns the copied length.
    pub fn get_string_into(&self, key: &str, out: &mut [u8]) -> Result<usize, Error> {
        self.read(key, |storage, ns, key| {
            storage.read_item(ns, ItemType::Sized, key, out)
        })
    }

    pub fn set_blob(&self, key: &str, value: &[u8]) -> Result<(), Error> {
        self.write(key, |storage, ns, key| {
            storage.write_item(ns, ItemType::Blob, key, value)
        })
    }

    pub fn get_blob(&self, key: &str) -> Result<Vec<u8>, Error> {
        self.get(key)
    }

    /// Copies the blob into `out`, returns its length.
    pub fn get_blob_into(&self, key: &str, out: &mut [u8]) -> Result<usize, Error> {
        self.read(key, |storage, ns, key| {
            storage.read_item(ns, ItemType::Blob, key, out)
        })
    }

    /// Stored length in bytes. For strings the null terminator is included.
    pub fn get_item_size(&self, item_type: ItemType, key: &str) -> Result<usize, Error> {
        self.read(key, |storage, ns, key| {
            storage.get_item_data_size(ns, item_type, key)
        })
    }

    pub fn erase_item(&self, key: &str) -> Result<(), Error> {
        self.write(key, |storage, ns, key| storage.erase_item(ns, key))
    }

    /// Erases every value of the namespace.
    pub fn erase_all(&self) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("handle: erase_all");

        self.manager
            .with_handle(self.id, true, |storage, ns| storage.erase_namespace(ns))
    }

    /// Every write is on the medium once it returns, this only checks that the handle is
    /// still valid.
    pub fn commit(&self) -> Result<(), Error> {
        self.manager.with_handle(self.id, false, |_, _| Ok(()))
    }

    /// Entries used by this namespace, payload and blob chunks included.
    pub fn get_used_entry_count(&self) -> Result<usize, Error> {
        self.manager.with_handle(self.id, false, |storage, ns| {
            storage.calc_entries_in_namespace(ns)
        })
    }

    /// Statistics of the whole partition.
    pub fn stats(&self) -> Result<NvsStats, Error> {
        self.manager
            .with_handle(self.id, false, |storage, _| storage.fill_stats())
    }

    pub fn debug_dump(&self, out: &mut impl fmt::Write) -> Result<(), Error> {
        self.manager
            .with_handle(self.id, false, |storage, _| storage.debug_dump(out))
    }

    /// Iterates over the values of this namespace, `ItemType::Any` matches all types.
    pub fn entries(&self, item_type: ItemType) -> Result<EntryIterator<'a, R, P>, Error> {
        let (partition, namespace_index) = self.manager.handle_target(self.id)?;
        Ok(EntryIterator::new(
            self.manager,
            partition,
            namespace_index,
            item_type,
        ))
    }
}

impl<R: RawMutex, P: Platform> Drop for Handle<'_, R, P> {
    fn drop(&mut self) {
        self.manager.close_handle(self.id);
    }
}
