use crossbeam_utils::CachePadded;
use std::sync::atomic::AtomicU32;

/// Identifies a region as a chatterbox activity log ("CHATLOG1").
pub const LOG_MAGIC: u64 = 0x4348_4154_4C4F_4731;

/// Version of the memory layout.
pub const LOG_VERSION: u32 = 1;

/// Control block at the very beginning of the shared log region.
///
/// Any process that maps the region reads `capacity` from here and locks
/// `lock` before touching `used`, `write_cursor` or the bytes that follow
/// the header.
#[repr(C, align(128))]
pub struct LogHeader {
    /// A "magic number" to identify the memory region.
    pub magic: u64,

    /// The version of the memory layout.
    pub version: u32,

    /// Process that created the region.
    pub owner_pid: u32,

    /// Bytes of log storage following the header.
    pub capacity: u64,

    /// Bytes currently holding log text.
    pub used: u64,

    /// Offset of the next write; equals `used` after every append.
    pub write_cursor: u64,

    /// Futex word of the process-shared mutex.
    /// Padded so lock traffic does not share a line with the counters.
    pub lock: CachePadded<AtomicU32>,
}

/// Offset of the log bytes from the start of the region.
pub const HEADER_SIZE: usize = std::mem::size_of::<LogHeader>();

/// Total region size for a log of `capacity` bytes.
pub const fn region_size(capacity: usize) -> usize {
    HEADER_SIZE + capacity
}
