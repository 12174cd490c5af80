use crate::error::Error;
use crate::item::{ItemType, Primitive};
use crate::platform::Platform;
use crate::storage::Storage;
use crate::Key;
use alloc::vec::Vec;

pub trait Set<T> {
    fn set(&mut self, namespace_index: u8, key: &Key, value: T) -> Result<(), Error>;
}

impl<T, S: Set<T>> Set<T> for &mut S {
    fn set(&mut self, namespace_index: u8, key: &Key, value: T) -> Result<(), Error> {
        (*self).set(namespace_index, key, value)
    }
}

impl<T: Platform> Storage<T> {
    /// Set a value of any supported type, see `Set`.
    pub fn set<V>(&mut self, namespace_index: u8, key: &Key, value: V) -> Result<(), Error>
    where
        Self: Set<V>,
    {
        <Self as Set<V>>::set(self, namespace_index, key, value)
    }

    /// Writes a primitive value, replacing whatever was stored under the key.
    pub fn set_typed_item<V: Primitive>(
        &mut self,
        namespace_index: u8,
        key: &Key,
        value: V,
    ) -> Result<(), Error> {
        self.write_primitive(namespace_index, V::ITEM_TYPE, key, value.to_bits())
    }

    /// Strings are stored zero terminated.
    pub fn set_str(&mut self, namespace_index: u8, key: &Key, value: &str) -> Result<(), Error> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(value.len() + 1)
            .map_err(|_| Error::NoMemory)?;
        buf.extend_from_slice(value.as_bytes());
        buf.push(0);
        self.write_item(namespace_index, ItemType::Sized, key, &buf)
    }
}

impl<T: Platform> Set<bool> for Storage<T> {
    fn set(&mut self, namespace_index: u8, key: &Key, value: bool) -> Result<(), Error> {
        self.set_typed_item(namespace_index, key, value)
    }
}

impl<T: Platform> Set<u8> for Storage<T> {
    fn set(&mut self, namespace_index: u8, key: &Key, value: u8) -> Result<(), Error> {
        self.set_typed_item(namespace_index, key, value)
    }
}

impl<T: Platform> Set<u16> for Storage<T> {
    fn set(&mut self, namespace_index: u8, key: &Key, value: u16) -> Result<(), Error> {
        self.set_typed_item(namespace_index, key, value)
    }
}

impl<T: Platform> Set<u32> for Storage<T> {
    fn set(&mut self, namespace_index: u8, key: &Key, value: u32) -> Result<(), Error> {
        self.set_typed_item(namespace_index, key, value)
    }
}

impl<T: Platform> Set<u64> for Storage<T> {
    fn set(&mut self, namespace_index: u8, key: &Key, value: u64) -> Result<(), Error> {
        self.set_typed_item(namespace_index, key, value)
    }
}

impl<T: Platform> Set<i8> for Storage<T> {
    fn set(&mut self, namespace_index: u8, key: &Key, value: i8) -> Result<(), Error> {
        self.set_typed_item(namespace_index, key, value)
    }
}

impl<T: Platform> Set<i16> for Storage<T> {
    fn set(&mut self, namespace_index: u8, key: &Key, value: i16) -> Result<(), Error> {
        self.set_typed_item(namespace_index, key, value)
    }
}

impl<T: Platform> Set<i32> for Storage<T> {
    fn set(&mut self, namespace_index: u8, key: &Key, value: i32) -> Result<(), Error> {
        self.set_typed_item(namespace_index, key, value)
    }
}

impl<T: Platform> Set<i64> for Storage<T> {
    fn set(&mut self, namespace_index: u8, key: &Key, value: i64) -> Result<(), Error> {
        self.set_typed_item(namespace_index, key, value)
    }
}

impl<T: Platform> Set<&str> for Storage<T> {
    fn set(&mut self, namespace_index: u8, key: &Key, value: &str) -> Result<(), Error> {
        self.set_str(namespace_index, key, value)
    }
}

impl<T: Platform> Set<&[u8]> for Storage<T> {
    fn set(&mut self, namespace_index: u8, key: &Key, value: &[u8]) -> Result<(), Error> {
        self.write_item(namespace_index, ItemType::Blob, key, value)
    }
}
