// Shared memory backend abstraction for Linux
// Named regions live in /dev/shm so independent processes can attach by name;
// unnamed regions are anonymous MAP_SHARED mappings (shared with forked children only).

use std::fmt::Debug;
use std::fs::OpenOptions;
use std::io;
#[cfg(target_os = "linux")]
use std::os::fd::IntoRawFd;
#[cfg(target_os = "linux")]
use std::os::unix::fs::OpenOptionsExt;
use std::path::PathBuf;
use std::ptr::NonNull;

/// Directory backing named regions.
pub const SHM_DIR: &str = "/dev/shm";

/// Shared memory backend trait for memory mapping
pub trait SharedMemoryBackend: Send + Sync + Debug {
    /// Get a pointer to the mapped memory region
    fn as_ptr(&self) -> *mut u8;

    /// Get the size of the mapped region in bytes
    fn size(&self) -> usize;

    /// Get the underlying handle
    fn raw_handle(&self) -> RawHandle;

    /// Whether the mapping was made writable
    fn is_writable(&self) -> bool;
}

/// Platform-specific handle type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawHandle {
    /// Unix file descriptor of a named region
    Fd(i32),
    /// Anonymous mapping, no descriptor
    Anonymous,
}

/// Path of a named region.
pub fn shm_path(name: &str) -> io::Result<PathBuf> {
    if name.is_empty() || name.contains('/') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid shared memory name {:?}", name),
        ));
    }
    Ok(PathBuf::from(SHM_DIR).join(name))
}

/// Create a new shared memory region with the specified size
///
/// # Arguments
/// * `size` - Size of the shared memory region in bytes
/// * `name` - Name for cross-process access; `None` creates an anonymous mapping
///
/// An existing region with the same name is truncated and replaced.
#[cfg(target_os = "linux")]
pub fn create_shared_memory(size: usize, name: Option<&str>) -> io::Result<Box<dyn SharedMemoryBackend>> {
    match name {
        Some(name) => Ok(Box::new(LinuxSharedMemory::create(size, name)?)),
        None => Ok(Box::new(LinuxSharedMemory::anonymous(size)?)),
    }
}

/// Attach to an existing named shared memory region
///
/// # Arguments
/// * `name` - Name of the shared memory region to attach to
/// * `min_size` - Minimum size the region must have
/// * `writable` - Map read-write instead of read-only
#[cfg(target_os = "linux")]
pub fn attach_shared_memory(name: &str, min_size: usize, writable: bool) -> io::Result<Box<dyn SharedMemoryBackend>> {
    Ok(Box::new(LinuxSharedMemory::attach(name, min_size, writable)?))
}

/// Remove a named region. Existing mappings stay valid until dropped.
#[cfg(target_os = "linux")]
pub fn unlink_shared_memory(name: &str) -> io::Result<()> {
    match std::fs::remove_file(shm_path(name)?) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(not(target_os = "linux"))]
pub fn create_shared_memory(_size: usize, _name: Option<&str>) -> io::Result<Box<dyn SharedMemoryBackend>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "Shared memory only supported on Linux",
    ))
}

#[cfg(not(target_os = "linux"))]
pub fn attach_shared_memory(_name: &str, _min_size: usize, _writable: bool) -> io::Result<Box<dyn SharedMemoryBackend>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "Shared memory only supported on Linux",
    ))
}

#[cfg(not(target_os = "linux"))]
pub fn unlink_shared_memory(_name: &str) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "Shared memory only supported on Linux",
    ))
}

#[cfg(target_os = "linux")]
#[derive(Debug)]
pub struct LinuxSharedMemory {
    ptr: NonNull<u8>,
    size: usize,
    fd: Option<i32>,
    writable: bool,
}

#[cfg(target_os = "linux")]
unsafe impl Send for LinuxSharedMemory {}
#[cfg(target_os = "linux")]
unsafe impl Sync for LinuxSharedMemory {}

#[cfg(target_os = "linux")]
impl LinuxSharedMemory {
    /// Create (or truncate) a named region under /dev/shm
    pub fn create(size: usize, name: &str) -> io::Result<Self> {
        if size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "size must be non-zero"));
        }
        let path = shm_path(name)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o666)
            .open(&path)
            .map_err(|e| {
                io::Error::new(
                    e.kind(),
                    format!("Failed to create shared memory file at {}: {}", path.display(), e),
                )
            })?;

        // Set size
        file.set_len(size as u64)?;

        // Keep the file descriptor alive for the lifetime of the mapping
        let fd = file.into_raw_fd();
        let ptr = unsafe { map(size, Some(fd), true) }.map_err(|e| {
            unsafe { libc::close(fd) };
            e
        })?;

        Ok(Self {
            ptr,
            size,
            fd: Some(fd),
            writable: true,
        })
    }

    /// Map an existing named region
    pub fn attach(name: &str, min_size: usize, writable: bool) -> io::Result<Self> {
        let path = shm_path(name)?;
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(&path)
            .map_err(|e| {
                io::Error::new(
                    e.kind(),
                    format!("Failed to open shared memory at {}: {}", path.display(), e),
                )
            })?;

        let actual_size = file.metadata()?.len() as usize;
        if actual_size < min_size || actual_size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Shared memory too small: expected at least {} bytes, got {}",
                    min_size, actual_size
                ),
            ));
        }

        let fd = file.into_raw_fd();
        let ptr = unsafe { map(actual_size, Some(fd), writable) }.map_err(|e| {
            unsafe { libc::close(fd) };
            e
        })?;

        Ok(Self {
            ptr,
            size: actual_size,
            fd: Some(fd),
            writable,
        })
    }

    /// Anonymous shared mapping, zero-initialised
    pub fn anonymous(size: usize) -> io::Result<Self> {
        if size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "size must be non-zero"));
        }
        let ptr = unsafe { map(size, None, true)? };
        Ok(Self {
            ptr,
            size,
            fd: None,
            writable: true,
        })
    }
}

#[cfg(target_os = "linux")]
unsafe fn map(size: usize, fd: Option<i32>, writable: bool) -> io::Result<NonNull<u8>> {
    let prot = if writable {
        libc::PROT_READ | libc::PROT_WRITE
    } else {
        libc::PROT_READ
    };
    let (flags, fd) = match fd {
        Some(fd) => (libc::MAP_SHARED, fd),
        None => (libc::MAP_SHARED | libc::MAP_ANONYMOUS, -1),
    };
    let ptr = libc::mmap(std::ptr::null_mut(), size, prot, flags, fd, 0);
    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    NonNull::new(ptr as *mut u8).ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))
}

#[cfg(target_os = "linux")]
impl Drop for LinuxSharedMemory {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size);
            if let Some(fd) = self.fd {
                libc::close(fd);
            }
        }
    }
}

#[cfg(target_os = "linux")]
impl SharedMemoryBackend for LinuxSharedMemory {
    fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn size(&self) -> usize {
        self.size
    }

    fn raw_handle(&self) -> RawHandle {
        match self.fd {
            Some(fd) => RawHandle::Fd(fd),
            None => RawHandle::Anonymous,
        }
    }

    fn is_writable(&self) -> bool {
        self.writable
    }
}
