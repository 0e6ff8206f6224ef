// Shared memory backend tests for Linux
// Run with: cargo test --test shared_memory -- --nocapture

#[cfg(target_os = "linux")]
mod linux_tests {
    use chatterbox::Core::{attach_shared_memory, create_shared_memory, unlink_shared_memory, RawHandle};
    use serial_test::serial;

    fn unique(name: &str) -> String {
        format!("chatterbox_test_{}_{}", name, std::process::id())
    }

    #[test]
    #[serial]
    fn test_create_shared_memory() {
        let name = unique("create");
        let size = 4096;
        let shm = create_shared_memory(size, Some(&name)).unwrap();

        assert_eq!(shm.size(), size);
        assert!(!shm.as_ptr().is_null());
        assert!(shm.is_writable());

        // Test writing to the memory
        unsafe {
            let slice = std::slice::from_raw_parts_mut(shm.as_ptr(), size);
            slice[0] = 0x42;
            assert_eq!(slice[0], 0x42);
        }
        unlink_shared_memory(&name).unwrap();
    }

    #[test]
    fn test_anonymous_sizes() {
        let sizes = vec![1024, 4096, 65536, 1024 * 1024];

        for size in sizes {
            let shm = create_shared_memory(size, None).unwrap();
            assert_eq!(shm.size(), size);
            assert_eq!(shm.raw_handle(), RawHandle::Anonymous);
        }
    }

    #[test]
    #[serial]
    fn test_raw_handle() {
        let name = unique("handle");
        let shm = create_shared_memory(4096, Some(&name)).unwrap();

        match shm.raw_handle() {
            RawHandle::Fd(fd) => assert!(fd > 0, "File descriptor should be positive"),
            RawHandle::Anonymous => panic!("named region should carry a descriptor"),
        }
        unlink_shared_memory(&name).unwrap();
    }

    #[test]
    #[serial]
    fn test_attach_sees_writes() {
        let name = unique("attach");
        let size = 8192;
        let owner = create_shared_memory(size, Some(&name)).unwrap();
        let reader = attach_shared_memory(&name, size, false).unwrap();

        assert_eq!(reader.size(), size);
        assert!(!reader.is_writable());

        unsafe {
            let slice = std::slice::from_raw_parts_mut(owner.as_ptr(), size);
            for (i, byte) in slice.iter_mut().take(100).enumerate() {
                *byte = (i % 256) as u8;
            }

            let seen = std::slice::from_raw_parts(reader.as_ptr(), size);
            for (i, byte) in seen.iter().take(100).enumerate() {
                assert_eq!(*byte, (i % 256) as u8);
            }
        }
        unlink_shared_memory(&name).unwrap();
    }

    #[test]
    #[serial]
    fn test_attach_missing_region() {
        let result = attach_shared_memory(&unique("missing"), 4096, true);
        let err = result.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    #[serial]
    fn test_attach_too_small() {
        let name = unique("small");
        let _owner = create_shared_memory(1024, Some(&name)).unwrap();

        let err = attach_shared_memory(&name, 4096, true).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
        unlink_shared_memory(&name).unwrap();
    }

    #[test]
    #[serial]
    fn test_unlink_keeps_mapping_and_is_idempotent() {
        let name = unique("unlink");
        let shm = create_shared_memory(4096, Some(&name)).unwrap();
        unlink_shared_memory(&name).unwrap();
        unlink_shared_memory(&name).unwrap();

        // still mapped after the name is gone
        unsafe {
            *shm.as_ptr() = 7;
            assert_eq!(*shm.as_ptr(), 7);
        }
        assert!(attach_shared_memory(&name, 4096, true).is_err());
    }

    #[test]
    fn test_invalid_names() {
        for name in ["", "a/b"] {
            let err = create_shared_memory(4096, Some(name)).unwrap_err();
            assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
        }
    }

    #[test]
    fn test_mmap_zero_initialized() {
        // Verify mmap'd memory is zero-initialized
        let size = 1024;
        let shm = create_shared_memory(size, None).unwrap();

        unsafe {
            let slice = std::slice::from_raw_parts(shm.as_ptr(), size);
            assert!(slice.iter().all(|&b| b == 0), "Mmap'd memory should be zero-initialized");
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod non_linux_tests {
    use chatterbox::Core::{attach_shared_memory, create_shared_memory};

    #[test]
    fn test_unsupported_platform() {
        let err = create_shared_memory(4096, None).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::Unsupported);
    }

    #[test]
    fn test_attach_unsupported_platform() {
        let err = attach_shared_memory("test", 4096, true).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::Unsupported);
    }
}
