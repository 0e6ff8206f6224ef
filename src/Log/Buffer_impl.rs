use std::ptr::{self, addr_of, addr_of_mut};
use std::time::Duration;

use chrono::{Local, TimeZone};
use crossbeam_utils::CachePadded;
use std::sync::atomic::AtomicU32;
use tracing::debug;

use super::layout::{region_size, LogHeader, HEADER_SIZE, LOG_MAGIC, LOG_VERSION};
use super::lock::{ShmGuard, ShmMutex};
use super::Buffer::LogBuffer;
use crate::error::{RelayError, Result};
use crate::Core::{attach_shared_memory, create_shared_memory, unlink_shared_memory, SharedMemoryBackend};
use crate::Transport::Structs::Message_Structs::unix_now;
use crate::Transport::Message;

impl LogBuffer {
    /// Create a named log region of `capacity` bytes (server side).
    pub fn create(name: &str, capacity: usize) -> Result<Self> {
        Self::init(Some(name), capacity)
    }

    /// Create an unnamed log region, shared only within this process tree.
    pub fn anonymous(capacity: usize) -> Result<Self> {
        Self::init(None, capacity)
    }

    fn init(name: Option<&str>, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(RelayError::TransportUnavailable(
                "log buffer capacity must be non-zero".into(),
            ));
        }
        let shm = create_shared_memory(region_size(capacity), name).map_err(|e| {
            RelayError::TransportUnavailable(format!(
                "failed to create log region {:?}:\n\
                ├─ Capacity:    {capacity}\n\
                ├─ Header size: {HEADER_SIZE}\n\
                ╰─ Error: {e}",
                name.unwrap_or("<anonymous>")
            ))
        })?;

        let header = shm.as_ptr() as *mut LogHeader;
        unsafe {
            ptr::write(
                header,
                LogHeader {
                    magic: LOG_MAGIC,
                    version: LOG_VERSION,
                    owner_pid: std::process::id(),
                    capacity: capacity as u64,
                    used: 0,
                    write_cursor: 0,
                    lock: CachePadded::new(AtomicU32::new(0)),
                },
            );
        }
        debug!(name = name.unwrap_or("<anonymous>"), capacity, "log buffer created");

        Ok(Self::from_parts(shm, capacity, name))
    }

    /// Attach to a log region created by another process.
    pub fn attach(name: &str) -> Result<Self> {
        let shm = attach_shared_memory(name, HEADER_SIZE, true)?;
        let header = shm.as_ptr() as *const LogHeader;

        let (magic, version, capacity) = unsafe {
            (
                addr_of!((*header).magic).read(),
                addr_of!((*header).version).read(),
                addr_of!((*header).capacity).read() as usize,
            )
        };
        if magic != LOG_MAGIC || version != LOG_VERSION {
            return Err(RelayError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "Invalid magic number - region is not a chat log",
            )));
        }
        if shm.size() < region_size(capacity) {
            return Err(RelayError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "log region too small: header claims {} bytes, mapped {}",
                    capacity,
                    shm.size()
                ),
            )));
        }

        Ok(Self::from_parts(shm, capacity, Some(name)))
    }

    fn from_parts(shm: Box<dyn SharedMemoryBackend>, capacity: usize, name: Option<&str>) -> Self {
        let base = shm.as_ptr();
        Self {
            header: base as *mut LogHeader,
            data: unsafe { base.add(HEADER_SIZE) },
            shm,
            capacity,
            name: name.map(str::to_owned),
        }
    }

    /// Remove the named region; current mappings stay valid.
    pub fn unlink(&self) -> Result<()> {
        if let Some(name) = &self.name {
            unlink_shared_memory(name)?;
            debug!(name = name.as_str(), "log buffer unlinked");
        }
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn mutex(&self) -> ShmMutex<'_> {
        // the lock word is an atomic, shared references to it are fine
        let word: &AtomicU32 = unsafe { &(*self.header).lock };
        ShmMutex::new(word)
    }

    fn lock(&self) -> ShmGuard<'_> {
        self.mutex().lock()
    }

    // Header counters; callers hold the lock.
    unsafe fn load_used(&self) -> usize {
        (addr_of!((*self.header).used).read() as usize).min(self.capacity)
    }

    unsafe fn store_used(&self, used: usize) {
        addr_of_mut!((*self.header).used).write(used as u64);
        addr_of_mut!((*self.header).write_cursor).write(used as u64);
    }

    /// Bytes currently holding log text.
    pub fn used(&self) -> usize {
        let _guard = self.lock();
        unsafe { self.load_used() }
    }

    pub fn write_cursor(&self) -> usize {
        let _guard = self.lock();
        unsafe { addr_of!((*self.header).write_cursor).read() as usize }
    }

    /// Append one entry, evicting old contents if needed.
    ///
    /// Returns the number of bytes evicted to make room. Entries larger
    /// than the whole buffer are refused with `EntryTooLarge` and nothing
    /// is written.
    pub fn append(&self, entry: &[u8]) -> Result<usize> {
        let len = entry.len();
        if len > self.capacity {
            return Err(RelayError::EntryTooLarge {
                len,
                capacity: self.capacity,
            });
        }
        if len == 0 {
            return Ok(0);
        }

        let _guard = self.lock();
        unsafe {
            let mut used = self.load_used();
            let mut evicted = 0;

            if used + len > self.capacity {
                let half = used / 2;
                self.discard_front(half, used);
                used -= half;
                evicted += half;

                // entry larger than half the buffer: drop exactly what is still missing
                let overflow = (used + len).saturating_sub(self.capacity);
                if overflow > 0 {
                    self.discard_front(overflow, used);
                    used -= overflow;
                    evicted += overflow;
                }
            }

            ptr::copy_nonoverlapping(entry.as_ptr(), self.data.add(used), len);
            self.store_used(used + len);
            Ok(evicted)
        }
    }

    // Shift contents[count..used] down to offset 0.
    unsafe fn discard_front(&self, count: usize, used: usize) {
        if count == 0 {
            return;
        }
        ptr::copy(self.data.add(count), self.data, used - count);
    }

    /// Render and append a message as `[HH:MM:SS] <user>: body\n`.
    pub fn append_message(&self, message: &Message) -> Result<usize> {
        self.append(Self::render(message).as_bytes())
    }

    pub fn render(message: &Message) -> String {
        let ts = if message.sent_at != 0 {
            message.sent_at
        } else {
            unix_now()
        };
        let when = Local
            .timestamp_opt(ts, 0)
            .single()
            .unwrap_or_else(Local::now);
        format!(
            "[{}] <{}>: {}\n",
            when.format("%H:%M:%S"),
            message.sender,
            message.body
        )
    }

    /// Copy of the current contents.
    pub fn read_snapshot(&self) -> Vec<u8> {
        let _guard = self.lock();
        unsafe { self.copy_out() }
    }

    /// Snapshot that gives up if the lock cannot be taken within `timeout`.
    pub fn read_snapshot_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        let _guard = self.mutex().lock_timeout(timeout)?;
        Some(unsafe { self.copy_out() })
    }

    /// Take the current contents and reset the buffer to empty.
    pub fn drain(&self) -> Vec<u8> {
        let _guard = self.lock();
        unsafe {
            let out = self.copy_out();
            self.store_used(0);
            out
        }
    }

    /// Hand the current contents to `sink` under the lock and reset the
    /// buffer only if it succeeds. On error the contents stay in place.
    pub fn drain_with<T, E>(&self, sink: impl FnOnce(&[u8]) -> std::result::Result<T, E>) -> std::result::Result<T, E> {
        let _guard = self.lock();
        unsafe {
            let used = self.load_used();
            let contents = std::slice::from_raw_parts(self.data, used);
            let out = sink(contents)?;
            self.store_used(0);
            Ok(out)
        }
    }

    unsafe fn copy_out(&self) -> Vec<u8> {
        let used = self.load_used();
        std::slice::from_raw_parts(self.data, used).to_vec()
    }
}

impl std::fmt::Debug for LogBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        crate::Debug::StructDebug::debug_log_buffer(self, f)
    }
}
