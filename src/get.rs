//! The `Get<T>` trait and its implementation in this module allows providing a single generic,
//! overloaded function `get<T>()` for all supported types of the driver.

use crate::error::Error;
use crate::item::{ItemType, Primitive};
use crate::platform::Platform;
use crate::storage::Storage;
use crate::Key;
use alloc::string::String;
use alloc::vec::Vec;

pub trait Get<T> {
    fn get(&mut self, namespace_index: u8, key: &Key) -> Result<T, Error>;
}

impl<T, G: Get<T>> Get<T> for &mut G {
    fn get(&mut self, namespace_index: u8, key: &Key) -> Result<T, Error> {
        (*self).get(namespace_index, key)
    }
}

impl<T: Platform> Storage<T> {
    /// Get a value of any supported type, see `Get`.
    pub fn get<V>(&mut self, namespace_index: u8, key: &Key) -> Result<V, Error>
    where
        Self: Get<V>,
    {
        <Self as Get<V>>::get(self, namespace_index, key)
    }

    /// Reads a primitive value of the exact type `V`.
    pub fn get_typed_item<V: Primitive>(&mut self, namespace_index: u8, key: &Key) -> Result<V, Error> {
        let bits = self.read_primitive(namespace_index, V::ITEM_TYPE, key)?;
        Ok(V::from_bits(bits))
    }
}

impl<T: Platform> Get<bool> for Storage<T> {
    fn get(&mut self, namespace_index: u8, key: &Key) -> Result<bool, Error> {
        self.get_typed_item(namespace_index, key)
    }
}

impl<T: Platform> Get<u8> for Storage<T> {
    fn get(&mut self, namespace_index: u8, key: &Key) -> Result<u8, Error> {
        self.get_typed_item(namespace_index, key)
    }
}

impl<T: Platform> Get<u16> for Storage<T> {
    fn get(&mut self, namespace_index: u8, key: &Key) -> Result<u16, Error> {
        self.get_typed_item(namespace_index, key)
    }
}

impl<T: Platform> Get<u32> for Storage<T> {
    fn get(&mut self, namespace_index: u8, key: &Key) -> Result<u32, Error> {
        self.get_typed_item(namespace_index, key)
    }
}

impl<T: Platform> Get<u64> for Storage<T> {
    fn get(&mut self, namespace_index: u8, key: &Key) -> Result<u64, Error> {
        self.get_typed_item(namespace_index, key)
    }
}

impl<T: Platform> Get<i8> for Storage<T> {
    fn get(&mut self, namespace_index: u8, key: &Key) -> Result<i8, Error> {
        self.get_typed_item(namespace_index, key)
    }
}

impl<T: Platform> Get<i16> for Storage<T> {
    fn get(&mut self, namespace_index: u8, key: &Key) -> Result<i16, Error> {
        self.get_typed_item(namespace_index, key)
    }
}

impl<T: Platform> Get<i32> for Storage<T> {
    fn get(&mut self, namespace_index: u8, key: &Key) -> Result<i32, Error> {
        self.get_typed_item(namespace_index, key)
    }
}

impl<T: Platform> Get<i64> for Storage<T> {
    fn get(&mut self, namespace_index: u8, key: &Key) -> Result<i64, Error> {
        self.get_typed_item(namespace_index, key)
    }
}

impl<T: Platform> Get<String> for Storage<T> {
    fn get(&mut self, namespace_index: u8, key: &Key) -> Result<String, Error> {
        let mut buf = self.read_to_vec(namespace_index, ItemType::Sized, key)?;
        // we don't want the null terminator
        if buf.last() == Some(&0) {
            buf.pop();
        }
        String::from_utf8(buf).map_err(|_| Error::CorruptedData)
    }
}

impl<T: Platform> Get<Vec<u8>> for Storage<T> {
    fn get(&mut self, namespace_index: u8, key: &Key) -> Result<Vec<u8>, Error> {
        self.read_to_vec(namespace_index, ItemType::Blob, key)
    }
}
