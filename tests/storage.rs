mod common;

mod set {
    use crate::common;
    use nvs_flash::error::Error;
    use nvs_flash::{ItemType, Key};
    use pretty_assertions::assert_eq;

    #[test]
    fn primitives() {
        let mut flash = common::Flash::new(2);
        let mut storage = common::storage(&mut flash).unwrap();
        let ns = storage
            .create_or_open_namespace(&Key::from_str("hello world"), true)
            .unwrap();

        storage.set(ns, &Key::from_str("bool"), false).unwrap();
        assert_eq!(storage.get::<bool>(ns, &Key::from_str("bool")), Ok(false));
        storage.set(ns, &Key::from_str("bool"), true).unwrap();
        assert_eq!(storage.get::<bool>(ns, &Key::from_str("bool")), Ok(true));

        storage.set(ns, &Key::from_str("u8"), 0xAAu8).unwrap();
        assert_eq!(storage.get::<u8>(ns, &Key::from_str("u8")), Ok(0xAA));
        storage.set(ns, &Key::from_str("i8"), -100i8).unwrap();
        assert_eq!(storage.get::<i8>(ns, &Key::from_str("i8")), Ok(-100));

        storage.set(ns, &Key::from_str("u16"), 0xAAAAu16).unwrap();
        assert_eq!(storage.get::<u16>(ns, &Key::from_str("u16")), Ok(0xAAAA));
        storage.set(ns, &Key::from_str("i16"), i16::MIN).unwrap();
        assert_eq!(storage.get::<i16>(ns, &Key::from_str("i16")), Ok(i16::MIN));

        storage.set(ns, &Key::from_str("u32"), 0xAAAA_AAAAu32).unwrap();
        assert_eq!(storage.get::<u32>(ns, &Key::from_str("u32")), Ok(0xAAAA_AAAA));
        storage.set(ns, &Key::from_str("i32"), -1i32).unwrap();
        assert_eq!(storage.get::<i32>(ns, &Key::from_str("i32")), Ok(-1));

        storage.set(ns, &Key::from_str("u64"), u64::MAX - 1).unwrap();
        assert_eq!(storage.get::<u64>(ns, &Key::from_str("u64")), Ok(u64::MAX - 1));
        storage.set(ns, &Key::from_str("i64"), i64::MIN + 1).unwrap();
        assert_eq!(storage.get::<i64>(ns, &Key::from_str("i64")), Ok(i64::MIN + 1));

        assert_eq!(storage.calc_entries_in_namespace(ns), Ok(9));
    }

    #[test]
    fn typed_items() {
        let mut flash = common::Flash::new(2);
        let mut storage = common::storage(&mut flash).unwrap();
        let ns = storage
            .create_or_open_namespace(&Key::from_str("typed"), true)
            .unwrap();

        storage
            .set_typed_item(ns, &Key::from_str("offset"), -5i16)
            .unwrap();
        assert_eq!(
            storage.get_typed_item::<i16>(ns, &Key::from_str("offset")),
            Ok(-5)
        );
        assert_eq!(
            storage.get_typed_item::<u16>(ns, &Key::from_str("offset")),
            Err(Error::TypeMismatch(ItemType::I16))
        );
        assert_eq!(
            storage.get_item_data_size(ns, ItemType::I16, &Key::from_str("offset")),
            Ok(2)
        );
    }

    #[test]
    fn string() {
        let mut flash = common::Flash::new(2);
        let mut storage = common::storage(&mut flash).unwrap();
        let ns = storage
            .create_or_open_namespace(&Key::from_str("strings"), true)
            .unwrap();

        storage
            .set(ns, &Key::from_str("greeting"), "Hello, NVS!")
            .unwrap();
        assert_eq!(
            storage.get::<String>(ns, &Key::from_str("greeting")),
            Ok(String::from("Hello, NVS!"))
        );
        // the null terminator is part of the stored value
        assert_eq!(
            storage.get_item_data_size(ns, ItemType::Sized, &Key::from_str("greeting")),
            Ok(12)
        );

        storage.set(ns, &Key::from_str("empty"), "").unwrap();
        assert_eq!(
            storage.get::<String>(ns, &Key::from_str("empty")),
            Ok(String::new())
        );

        let mut buf = [0u8; 4];
        assert_eq!(
            storage.read_item(ns, ItemType::Sized, &Key::from_str("greeting"), &mut buf),
            Err(Error::InvalidLength { required: 12 })
        );
    }

    #[test]
    fn longest_string_takes_a_whole_page() {
        let mut flash = common::Flash::new(3);
        let mut storage = common::storage(&mut flash).unwrap();
        let ns = storage
            .create_or_open_namespace(&Key::from_str("strings"), true)
            .unwrap();

        let value = "x".repeat(3999);
        storage
            .set(ns, &Key::from_str("long"), value.as_str())
            .unwrap();
        assert_eq!(storage.get::<String>(ns, &Key::from_str("long")), Ok(value));

        let stats = storage.page_statistics();
        assert_eq!(stats.pages.full, 1);
        assert_eq!(stats.pages.active, 1);
        assert_eq!(stats.entries_per_page[1].written, 126);

        assert_eq!(
            storage.set(ns, &Key::from_str("too_long"), "x".repeat(4000).as_str()),
            Err(Error::ValueTooLong)
        );
    }

    #[test]
    fn blob() {
        let mut flash = common::Flash::new(2);
        let mut storage = common::storage(&mut flash).unwrap();
        let ns = storage
            .create_or_open_namespace(&Key::from_str("blobs"), true)
            .unwrap();

        let data = [1u8, 2, 3, 4, 5];
        storage
            .set(ns, &Key::from_str("small"), data.as_slice())
            .unwrap();
        assert_eq!(
            storage.get::<Vec<u8>>(ns, &Key::from_str("small")),
            Ok(data.to_vec())
        );
        assert_eq!(
            storage.get_item_data_size(ns, ItemType::Blob, &Key::from_str("small")),
            Ok(5)
        );

        // one chunk with its payload slot and the index
        assert_eq!(storage.calc_entries_in_namespace(ns), Ok(3));
    }

    #[test]
    fn empty_blob() {
        let mut flash = common::Flash::new(2);
        let mut storage = common::storage(&mut flash).unwrap();
        let ns = storage
            .create_or_open_namespace(&Key::from_str("blobs"), true)
            .unwrap();

        storage
            .set(ns, &Key::from_str("nothing"), [0u8; 0].as_slice())
            .unwrap();
        assert_eq!(
            storage.get::<Vec<u8>>(ns, &Key::from_str("nothing")),
            Ok(Vec::new())
        );
    }

    #[test]
    fn blob_spanning_pages() {
        let mut flash = common::Flash::new(3);
        let data = (0..6000).map(|i| (i % 251) as u8).collect::<Vec<_>>();

        {
            let mut storage = common::storage(&mut flash).unwrap();
            let ns = storage
                .create_or_open_namespace(&Key::from_str("blobs"), true)
                .unwrap();

            storage
                .set(ns, &Key::from_str("large"), data.as_slice())
                .unwrap();
            assert_eq!(
                storage.get::<Vec<u8>>(ns, &Key::from_str("large")),
                Ok(data.clone())
            );

            // 3968 bytes fill the first page behind the namespace entry, the rest goes to the
            // second page followed by the index
            assert_eq!(storage.calc_entries_in_namespace(ns), Ok(125 + 65 + 1));
        }

        let mut storage = common::storage(&mut flash).unwrap();
        let ns = storage
            .create_or_open_namespace(&Key::from_str("blobs"), false)
            .unwrap();
        assert_eq!(storage.get::<Vec<u8>>(ns, &Key::from_str("large")), Ok(data));
    }

    #[test]
    fn blob_larger_than_partition() {
        let mut flash = common::Flash::new(3);
        let mut storage = common::storage(&mut flash).unwrap();
        let ns = storage
            .create_or_open_namespace(&Key::from_str("blobs"), true)
            .unwrap();

        assert_eq!(storage.max_blob_size(), 8000);
        assert_eq!(
            storage.set(ns, &Key::from_str("huge"), vec![0u8; 8001].as_slice()),
            Err(Error::ValueTooLong)
        );
        assert_eq!(storage.calc_entries_in_namespace(ns), Ok(0));
    }

    #[test]
    fn primitive_no_change() {
        let mut flash = common::Flash::new(2);
        {
            let mut storage = common::storage(&mut flash).unwrap();
            let ns = storage
                .create_or_open_namespace(&Key::from_str("ns"), true)
                .unwrap();
            storage.set(ns, &Key::from_str("value"), 42u32).unwrap();
        }

        let snapshot = flash.buf.clone();
        let writes = flash.writes();

        {
            let mut storage = common::storage(&mut flash).unwrap();
            let ns = storage
                .create_or_open_namespace(&Key::from_str("ns"), true)
                .unwrap();
            storage.set(ns, &Key::from_str("value"), 42u32).unwrap();
        }

        assert_eq!(flash.writes(), writes);
        assert!(flash.buf == snapshot);
    }

    #[test]
    fn string_no_change() {
        let mut flash = common::Flash::new(2);
        {
            let mut storage = common::storage(&mut flash).unwrap();
            let ns = storage
                .create_or_open_namespace(&Key::from_str("ns"), true)
                .unwrap();
            storage.set(ns, &Key::from_str("name"), "unchanged").unwrap();
        }

        let writes = flash.writes();
        {
            let mut storage = common::storage(&mut flash).unwrap();
            storage.set(1, &Key::from_str("name"), "unchanged").unwrap();
        }
        assert_eq!(flash.writes(), writes);
    }

    #[test]
    fn blob_no_change() {
        let mut flash = common::Flash::new(3);
        let data = (0..5000).map(|i| (i % 7) as u8).collect::<Vec<_>>();
        {
            let mut storage = common::storage(&mut flash).unwrap();
            let ns = storage
                .create_or_open_namespace(&Key::from_str("ns"), true)
                .unwrap();
            storage
                .set(ns, &Key::from_str("blob"), data.as_slice())
                .unwrap();
        }

        let snapshot = flash.buf.clone();
        {
            let mut storage = common::storage(&mut flash).unwrap();
            storage
                .set(1, &Key::from_str("blob"), data.as_slice())
                .unwrap();
        }
        assert!(flash.buf == snapshot);
    }

    #[test]
    fn second_page_is_allocated() {
        let mut flash = common::Flash::new(3);
        let mut storage = common::storage(&mut flash).unwrap();
        let ns = storage
            .create_or_open_namespace(&Key::from_str("ns"), true)
            .unwrap();

        // the namespace entry and 125 values fill the first page
        for i in 0..126u8 {
            storage
                .set(ns, &Key::from_str(&format!("key_{i}")), i)
                .unwrap();
        }

        let stats = storage.page_statistics();
        assert_eq!(stats.pages.full, 1);
        assert_eq!(stats.pages.active, 1);
        assert_eq!(stats.pages.empty, 1);
        assert_eq!(stats.entries_per_page[1].written, 1);
    }

    #[test]
    fn invalid_arguments() {
        let mut flash = common::Flash::new(2);
        let mut storage = common::storage(&mut flash).unwrap();
        let ns = storage
            .create_or_open_namespace(&Key::from_str("ns"), true)
            .unwrap();

        assert_eq!(
            storage.set(ns, &Key::from_str(""), 1u8),
            Err(Error::InvalidArg)
        );
        // the namespace table itself isn't writable through the value api
        assert_eq!(
            storage.set(0, &Key::from_str("key"), 1u8),
            Err(Error::InvalidArg)
        );
        assert_eq!(
            storage.write_item(ns, ItemType::U32, &Key::from_str("key"), &[1, 2]),
            Err(Error::InvalidArg)
        );
        assert_eq!(
            storage.create_or_open_namespace(&Key::from_str(""), true),
            Err(Error::InvalidArg)
        );
    }
}

mod delete {
    use crate::common;
    use nvs_flash::Key;
    use nvs_flash::error::Error;
    use pretty_assertions::assert_eq;

    #[test]
    fn primitive() {
        let mut flash = common::Flash::new(2);
        let mut storage = common::storage(&mut flash).unwrap();
        let ns = storage
            .create_or_open_namespace(&Key::from_str("ns"), true)
            .unwrap();

        storage.set(ns, &Key::from_str("value"), 7u16).unwrap();
        storage.erase_item(ns, &Key::from_str("value")).unwrap();

        assert_eq!(
            storage.get::<u16>(ns, &Key::from_str("value")),
            Err(Error::NotFound)
        );
        assert_eq!(
            storage.erase_item(ns, &Key::from_str("value")),
            Err(Error::NotFound)
        );
        assert_eq!(storage.calc_entries_in_namespace(ns), Ok(0));
    }

    #[test]
    fn string() {
        let mut flash = common::Flash::new(2);
        let mut storage = common::storage(&mut flash).unwrap();
        let ns = storage
            .create_or_open_namespace(&Key::from_str("ns"), true)
            .unwrap();

        storage
            .set(ns, &Key::from_str("text"), "a string spanning two slots")
            .unwrap();
        storage.erase_item(ns, &Key::from_str("text")).unwrap();

        assert_eq!(
            storage.get::<String>(ns, &Key::from_str("text")),
            Err(Error::NotFound)
        );
        assert_eq!(storage.page_statistics().entries_overall.erased, 2);
    }

    #[test]
    fn blob_large() {
        let mut flash = common::Flash::new(3);
        let mut storage = common::storage(&mut flash).unwrap();
        let ns = storage
            .create_or_open_namespace(&Key::from_str("ns"), true)
            .unwrap();

        storage
            .set(ns, &Key::from_str("blob"), vec![0x5Au8; 6000].as_slice())
            .unwrap();
        storage.erase_item(ns, &Key::from_str("blob")).unwrap();

        assert_eq!(
            storage.get::<Vec<u8>>(ns, &Key::from_str("blob")),
            Err(Error::NotFound)
        );
        // every chunk went with the index
        assert_eq!(storage.calc_entries_in_namespace(ns), Ok(0));
    }

    #[test]
    fn nonexisting_key() {
        let mut flash = common::Flash::new(2);
        let mut storage = common::storage(&mut flash).unwrap();
        let ns = storage
            .create_or_open_namespace(&Key::from_str("ns"), true)
            .unwrap();

        assert_eq!(
            storage.erase_item(ns, &Key::from_str("missing")),
            Err(Error::NotFound)
        );
    }

    #[test]
    fn namespace() {
        let mut flash = common::Flash::new(2);
        let mut storage = common::storage(&mut flash).unwrap();
        let first = storage
            .create_or_open_namespace(&Key::from_str("first"), true)
            .unwrap();
        let second = storage
            .create_or_open_namespace(&Key::from_str("second"), true)
            .unwrap();

        storage.set(first, &Key::from_str("a"), 1u8).unwrap();
        storage.set(first, &Key::from_str("b"), "text").unwrap();
        storage
            .set(first, &Key::from_str("c"), [1u8, 2, 3].as_slice())
            .unwrap();
        storage.set(second, &Key::from_str("a"), 2u8).unwrap();

        storage.erase_namespace(first).unwrap();

        assert_eq!(storage.calc_entries_in_namespace(first), Ok(0));
        assert_eq!(storage.get::<u8>(first, &Key::from_str("a")), Err(Error::NotFound));
        assert_eq!(storage.get::<u8>(second, &Key::from_str("a")), Ok(2));

        // the namespace itself stays registered
        assert_eq!(
            storage.create_or_open_namespace(&Key::from_str("first"), false),
            Ok(first)
        );
    }

    #[test]
    fn whole_partition() {
        let mut flash = common::Flash::new(2);
        {
            let mut storage = common::storage(&mut flash).unwrap();
            let ns = storage
                .create_or_open_namespace(&Key::from_str("ns"), true)
                .unwrap();
            storage.set(ns, &Key::from_str("a"), 1u8).unwrap();

            storage.erase_all().unwrap();
            assert_eq!(
                storage.create_or_open_namespace(&Key::from_str("ns"), false),
                Err(Error::NotFound)
            );
            assert_eq!(storage.fill_stats().unwrap().used_entries, 0);
        }

        // a single erase covering the whole partition
        assert_eq!(flash.erases(), 1);
        let mut storage = common::storage(&mut flash).unwrap();
        assert_eq!(
            storage.create_or_open_namespace(&Key::from_str("ns"), false),
            Err(Error::NotFound)
        );
    }
}

mod overwrite {
    use crate::common;
    use nvs_flash::error::Error;
    use nvs_flash::{ItemType, Key};
    use pretty_assertions::assert_eq;

    #[test]
    fn primitive_overwrites_primitive() {
        let mut flash = common::Flash::new(2);
        let mut storage = common::storage(&mut flash).unwrap();
        let ns = storage
            .create_or_open_namespace(&Key::from_str("ns"), true)
            .unwrap();

        storage.set(ns, &Key::from_str("value"), 1u8).unwrap();
        storage.set(ns, &Key::from_str("value"), 2u8).unwrap();
        assert_eq!(storage.get::<u8>(ns, &Key::from_str("value")), Ok(2));

        // a new type replaces the old value
        storage.set(ns, &Key::from_str("value"), 3u16).unwrap();
        assert_eq!(storage.get::<u16>(ns, &Key::from_str("value")), Ok(3));
        assert_eq!(
            storage.get::<u8>(ns, &Key::from_str("value")),
            Err(Error::TypeMismatch(ItemType::U16))
        );

        assert_eq!(storage.calc_entries_in_namespace(ns), Ok(1));
        assert_eq!(storage.page_statistics().entries_overall.erased, 2);
    }

    #[test]
    fn blob_overwrites_string() {
        let mut flash = common::Flash::new(2);
        let mut storage = common::storage(&mut flash).unwrap();
        let ns = storage
            .create_or_open_namespace(&Key::from_str("ns"), true)
            .unwrap();

        storage.set(ns, &Key::from_str("value"), "text").unwrap();
        storage
            .set(ns, &Key::from_str("value"), [1u8, 2, 3].as_slice())
            .unwrap();

        assert_eq!(
            storage.get::<Vec<u8>>(ns, &Key::from_str("value")),
            Ok(vec![1, 2, 3])
        );
        assert!(matches!(
            storage.get::<String>(ns, &Key::from_str("value")),
            Err(Error::TypeMismatch(_))
        ));
        assert_eq!(storage.calc_entries_in_namespace(ns), Ok(3));
    }

    #[test]
    fn primitive_overwrites_blob() {
        let mut flash = common::Flash::new(3);
        let mut storage = common::storage(&mut flash).unwrap();
        let ns = storage
            .create_or_open_namespace(&Key::from_str("ns"), true)
            .unwrap();

        storage
            .set(ns, &Key::from_str("value"), vec![9u8; 5000].as_slice())
            .unwrap();
        storage.set(ns, &Key::from_str("value"), 9u32).unwrap();

        assert_eq!(storage.get::<u32>(ns, &Key::from_str("value")), Ok(9));
        // neither the index nor a chunk of the blob is left
        assert_eq!(storage.calc_entries_in_namespace(ns), Ok(1));
    }

    #[test]
    fn blob_overwrites_blob() {
        let mut flash = common::Flash::new(4);
        let old = vec![0xA1u8; 5000];
        let new = vec![0xB2u8; 5000];

        {
            let mut storage = common::storage(&mut flash).unwrap();
            let ns = storage
                .create_or_open_namespace(&Key::from_str("ns"), true)
                .unwrap();

            storage
                .set(ns, &Key::from_str("blob"), old.as_slice())
                .unwrap();
            storage
                .set(ns, &Key::from_str("blob"), new.as_slice())
                .unwrap();

            assert_eq!(
                storage.get::<Vec<u8>>(ns, &Key::from_str("blob")),
                Ok(new.clone())
            );
            // the new version starts behind the old one on the second page
            assert_eq!(storage.calc_entries_in_namespace(ns), Ok(91 + 68 + 1));
        }

        let mut storage = common::storage(&mut flash).unwrap();
        assert_eq!(storage.get::<Vec<u8>>(1, &Key::from_str("blob")), Ok(new));
        assert_eq!(storage.calc_entries_in_namespace(1), Ok(160));
    }

    #[test]
    fn blob_replace_with_different_size() {
        let mut flash = common::Flash::new(2);
        let mut storage = common::storage(&mut flash).unwrap();
        let ns = storage
            .create_or_open_namespace(&Key::from_str("ns"), true)
            .unwrap();

        storage
            .set(ns, &Key::from_str("blob"), vec![1u8; 100].as_slice())
            .unwrap();
        storage
            .set(ns, &Key::from_str("blob"), [2u8, 2, 2].as_slice())
            .unwrap();
        assert_eq!(
            storage.get::<Vec<u8>>(ns, &Key::from_str("blob")),
            Ok(vec![2, 2, 2])
        );

        storage
            .set(ns, &Key::from_str("blob"), vec![3u8; 100].as_slice())
            .unwrap();
        assert_eq!(
            storage.get::<Vec<u8>>(ns, &Key::from_str("blob")),
            Ok(vec![3; 100])
        );
        assert_eq!(storage.calc_entries_in_namespace(ns), Ok(1 + 4 + 1));
    }

    #[test]
    fn blob_overwrite_without_space_keeps_old_value() {
        let mut flash = common::Flash::new(3);
        let mut storage = common::storage(&mut flash).unwrap();
        let ns = storage
            .create_or_open_namespace(&Key::from_str("ns"), true)
            .unwrap();

        let old = vec![0x11u8; 5000];
        storage
            .set(ns, &Key::from_str("blob"), old.as_slice())
            .unwrap();

        // both versions would have to fit at the same time
        assert_eq!(
            storage.set(ns, &Key::from_str("blob"), vec![0x22u8; 5000].as_slice()),
            Err(Error::NotEnoughSpace)
        );
        assert_eq!(storage.get::<Vec<u8>>(ns, &Key::from_str("blob")), Ok(old));
    }
}

mod namespace {
    use crate::common;
    use nvs_flash::{ItemType, Key};
    use nvs_flash::error::Error;
    use pretty_assertions::assert_eq;

    #[test]
    fn indices_are_stable() {
        let mut flash = common::Flash::new(2);
        {
            let mut storage = common::storage(&mut flash).unwrap();
            assert_eq!(
                storage.create_or_open_namespace(&Key::from_str("first"), true),
                Ok(1)
            );
            assert_eq!(
                storage.create_or_open_namespace(&Key::from_str("second"), true),
                Ok(2)
            );
            assert_eq!(
                storage.create_or_open_namespace(&Key::from_str("first"), true),
                Ok(1)
            );
            assert_eq!(
                storage.create_or_open_namespace(&Key::from_str("missing"), false),
                Err(Error::NotFound)
            );
        }

        let mut storage = common::storage(&mut flash).unwrap();
        assert_eq!(
            storage.create_or_open_namespace(&Key::from_str("second"), false),
            Ok(2)
        );
        assert_eq!(
            storage.create_or_open_namespace(&Key::from_str("third"), true),
            Ok(3)
        );
        assert_eq!(storage.fill_stats().unwrap().namespace_count, 3);
    }

    #[test]
    fn isolation() {
        let mut flash = common::Flash::new(2);
        let mut storage = common::storage(&mut flash).unwrap();
        let first = storage
            .create_or_open_namespace(&Key::from_str("first"), true)
            .unwrap();
        let second = storage
            .create_or_open_namespace(&Key::from_str("second"), true)
            .unwrap();

        storage.set(first, &Key::from_str("key"), 1u32).unwrap();
        storage.set(second, &Key::from_str("key"), 2u32).unwrap();
        storage.set(first, &Key::from_str("only_first"), 3u32).unwrap();

        assert_eq!(storage.get::<u32>(first, &Key::from_str("key")), Ok(1));
        assert_eq!(storage.get::<u32>(second, &Key::from_str("key")), Ok(2));
        assert_eq!(
            storage.get::<u32>(second, &Key::from_str("only_first")),
            Err(Error::NotFound)
        );
    }

    #[test]
    fn entries_of_one_namespace() {
        let mut flash = common::Flash::new(2);
        let mut storage = common::storage(&mut flash).unwrap();
        let first = storage
            .create_or_open_namespace(&Key::from_str("first"), true)
            .unwrap();
        let second = storage
            .create_or_open_namespace(&Key::from_str("second"), true)
            .unwrap();

        storage.set(first, &Key::from_str("a"), 1u8).unwrap();
        storage.set(second, &Key::from_str("c"), 3u8).unwrap();
        storage.set(first, &Key::from_str("b"), 2u16).unwrap();

        let (mut cursor, entry) = storage.find_entry(first, ItemType::Any).unwrap().unwrap();
        assert_eq!(entry.namespace, Key::from_str("first"));
        assert_eq!(entry.key, Key::from_str("a"));
        assert_eq!(entry.item_type, ItemType::U8);

        let entry = storage
            .next_entry(&mut cursor, first, ItemType::Any)
            .unwrap()
            .unwrap();
        assert_eq!(entry.key, Key::from_str("b"));
        assert_eq!(entry.item_type, ItemType::U16);

        assert_eq!(storage.next_entry(&mut cursor, first, ItemType::Any), Ok(None));
        assert_eq!(storage.find_entry(second, ItemType::U16), Ok(None));
    }

    #[test]
    fn limited_to_254() {
        let mut flash = common::Flash::new(4);
        let mut storage = common::storage(&mut flash).unwrap();

        for i in 0..254u32 {
            assert_eq!(
                storage.create_or_open_namespace(&Key::from_str(&format!("ns_{i}")), true),
                Ok(i as u8 + 1)
            );
        }

        assert_eq!(
            storage.create_or_open_namespace(&Key::from_str("one_too_many"), true),
            Err(Error::NotEnoughSpace)
        );
    }
}

mod crc {
    use crate::common;
    use nvs_flash::Key;
    use nvs_flash::error::Error;
    use pretty_assertions::assert_eq;

    fn write_values(flash: &mut common::Flash) {
        let mut storage = common::storage(flash).unwrap();
        let ns = storage
            .create_or_open_namespace(&Key::from_str("crc"), true)
            .unwrap();

        storage.set(ns, &Key::from_str("victim"), 42u32).unwrap();
        storage.set(ns, &Key::from_str("bystander"), 7u32).unwrap();
        storage
            .set(ns, &Key::from_str("pattern"), 0x0123_4567_89AB_CDEFu64)
            .unwrap();
        storage
            .set(ns, &Key::from_str("greeting"), "hello world")
            .unwrap();
        storage
            .set(ns, &Key::from_str("blob"), b"binary payload".as_slice())
            .unwrap();
    }

    #[test]
    fn corrupted_key_drops_the_item() {
        let mut flash = common::Flash::new(2);
        write_values(&mut flash);

        let offset = flash.find(b"victim").unwrap();
        flash.corrupt(offset, 0x01);

        let mut storage = common::storage(&mut flash).unwrap();
        assert_eq!(
            storage.get::<u32>(1, &Key::from_str("victim")),
            Err(Error::NotFound)
        );
        assert_eq!(storage.get::<u32>(1, &Key::from_str("bystander")), Ok(7));
    }

    #[test]
    fn corrupted_namespace_drops_the_item() {
        let mut flash = common::Flash::new(2);
        write_values(&mut flash);

        // the namespace index is the first byte of the item, the key starts at byte 8
        let offset = flash.find(b"victim").unwrap() - 8;
        flash.corrupt(offset, 0x02);

        let mut storage = common::storage(&mut flash).unwrap();
        assert_eq!(
            storage.get::<u32>(1, &Key::from_str("victim")),
            Err(Error::NotFound)
        );
        assert_eq!(storage.get::<u32>(3, &Key::from_str("victim")), Err(Error::NotFound));
    }

    #[test]
    fn corrupted_inline_value_drops_the_item() {
        let mut flash = common::Flash::new(2);
        write_values(&mut flash);

        let offset = flash
            .find(&0x0123_4567_89AB_CDEFu64.to_le_bytes())
            .unwrap();
        flash.corrupt(offset + 3, 0x80);

        let mut storage = common::storage(&mut flash).unwrap();
        assert_eq!(
            storage.get::<u64>(1, &Key::from_str("pattern")),
            Err(Error::NotFound)
        );
    }

    #[test]
    fn corrupted_string_payload_fails_the_read() {
        let mut flash = common::Flash::new(2);
        write_values(&mut flash);

        let offset = flash.find(b"hello world").unwrap();
        flash.corrupt(offset + 4, 0x10);

        let mut storage = common::storage(&mut flash).unwrap();
        assert_eq!(
            storage.get::<String>(1, &Key::from_str("greeting")),
            Err(Error::CrcMismatch)
        );
        assert_eq!(storage.get::<u32>(1, &Key::from_str("victim")), Ok(42));
    }

    #[test]
    fn corrupted_blob_payload_fails_the_read() {
        let mut flash = common::Flash::new(2);
        write_values(&mut flash);

        let offset = flash.find(b"binary payload").unwrap();
        flash.corrupt(offset, 0x01);

        let mut storage = common::storage(&mut flash).unwrap();
        assert_eq!(
            storage.get::<Vec<u8>>(1, &Key::from_str("blob")),
            Err(Error::CrcMismatch)
        );
    }
}

mod rotation {
    use crate::common;
    use nvs_flash::error::Error;
    use nvs_flash::{Key, NvsStats};
    use pretty_assertions::assert_eq;

    #[test]
    fn fill_until_no_space() {
        let mut flash = common::Flash::new(3);

        let written = {
            let mut storage = common::storage(&mut flash).unwrap();
            let ns = storage
                .create_or_open_namespace(&Key::from_str("rotation"), true)
                .unwrap();

            let mut written = 0usize;
            loop {
                let key = Key::from_str(&format!("item_{written}"));
                match storage.set(ns, &key, written as u8) {
                    Ok(()) => written += 1,
                    Err(e) => {
                        assert_eq!(e, Error::NotEnoughSpace);
                        break;
                    }
                }
            }

            // two pages minus the namespace entry, the last page is kept for compaction
            assert_eq!(written, 251);
            assert_eq!(
                storage.fill_stats(),
                Ok(NvsStats {
                    used_entries: 252,
                    free_entries: 126,
                    total_entries: 378,
                    namespace_count: 1,
                })
            );
            written
        };

        let mut storage = common::storage(&mut flash).unwrap();
        for i in 0..written {
            assert_eq!(
                storage.get::<u8>(1, &Key::from_str(&format!("item_{i}"))),
                Ok(i as u8)
            );
        }

        // an erased entry is enough to compact the oldest page
        storage.erase_item(1, &Key::from_str("item_0")).unwrap();
        storage.set(1, &Key::from_str("late"), 0xFFu8).unwrap();

        assert_eq!(storage.get::<u8>(1, &Key::from_str("late")), Ok(0xFF));
        for i in 1..written {
            assert_eq!(
                storage.get::<u8>(1, &Key::from_str(&format!("item_{i}"))),
                Ok(i as u8)
            );
        }
        assert_eq!(storage.fill_stats().unwrap().used_entries, 252);
        assert_eq!(storage.page_statistics().pages.empty, 1);
    }

    #[test]
    fn compaction_preserves_values() {
        let mut flash = common::Flash::new(2);

        {
            let mut storage = common::storage(&mut flash).unwrap();
            let ns = storage
                .create_or_open_namespace(&Key::from_str("defrag"), true)
                .unwrap();

            for i in 0..10u32 {
                storage
                    .set(ns, &Key::from_str(&format!("unique_{i}")), i * 1000)
                    .unwrap();
            }
            for i in 0..300u32 {
                storage.set(ns, &Key::from_str("counter"), i).unwrap();
                assert_eq!(storage.get::<u32>(ns, &Key::from_str("counter")), Ok(i));
            }

            assert_eq!(storage.calc_entries_in_namespace(ns), Ok(11));
        }

        // the first page is compacted after 115 updates, the second one 114 updates later
        assert_eq!(flash.erases(), 2);

        let mut storage = common::storage(&mut flash).unwrap();
        assert_eq!(storage.get::<u32>(1, &Key::from_str("counter")), Ok(299));
        for i in 0..10u32 {
            assert_eq!(
                storage.get::<u32>(1, &Key::from_str(&format!("unique_{i}"))),
                Ok(i * 1000)
            );
        }
    }
}

mod partition {
    use crate::common;
    use nvs_flash::Partition;
    use nvs_flash::error::Error;
    use pretty_assertions::assert_eq;

    #[test]
    fn padded_access_stays_inside() {
        let mut flash = common::Flash::new(2);
        let size = flash.len() as u32;
        let mut partition = Partition::new("nvs", 0, size, &mut flash).unwrap();

        let mut buf = [0u8; 2];
        assert_eq!(partition.read(size - 4, &mut buf), Ok(()));
        assert_eq!(buf, [0xFF, 0xFF]);

        // two bytes fit, their padding to a full word doesn't
        assert_eq!(partition.read(size - 3, &mut buf), Err(Error::InvalidArg));
        assert_eq!(partition.write(size - 2, &[0x00, 0x00]), Err(Error::InvalidArg));
        assert_eq!(partition.read(size - 1, &mut buf), Err(Error::InvalidArg));

        assert_eq!(partition.write(size - 4, &[0x12, 0x34]), Ok(()));
        drop(partition);
        assert_eq!(flash.buf[flash.len() - 4..], [0x12, 0x34, 0xFF, 0xFF]);
        assert_eq!(flash.operations.len(), 2);
    }
}
