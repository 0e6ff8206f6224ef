// This is the shared activity log: a fixed-capacity byte buffer in shared memory

use super::layout::LogHeader;
use crate::Core::SharedMemoryBackend;

/// A view over a log region, owned by whoever created or attached it.
///
/// ### Concurrency Design:
/// - The header and the log bytes are only touched while holding the
///   process-shared mutex embedded in the header.
/// - Appends are whole-entry: readers never observe a partial write.
/// - When an entry does not fit, the oldest half of the contents is
///   discarded and the newer half shifted to offset 0.
pub struct LogBuffer {
    /// Mapping that keeps the region alive.
    pub(crate) shm: Box<dyn SharedMemoryBackend>,

    /// Pointer to the control block at the start of the region.
    pub(crate) header: *mut LogHeader,

    /// Pointer to the first byte of log storage.
    pub(crate) data: *mut u8,

    /// Bytes of log storage.
    pub(crate) capacity: usize,

    /// Name under /dev/shm, `None` for anonymous regions.
    pub(crate) name: Option<String>,
}

unsafe impl Send for LogBuffer {}
unsafe impl Sync for LogBuffer {}
