use std::fmt;
use std::sync::atomic::Ordering;

use crate::Log::LogBuffer;
use crate::Relay::registry::ClientRegistry;

/// Debug function for LogBuffer
///
/// Shows the region name, capacity and header location without taking the
/// shared lock, so it is safe to call while the buffer is locked.
pub fn debug_log_buffer(buffer: &LogBuffer, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let locked = unsafe { (*buffer.header).lock.load(Ordering::Relaxed) != 0 };
    f.debug_struct("LogBuffer")
        .field("name", &buffer.name)
        .field("capacity", &buffer.capacity)
        .field("header", &format_args!("{:p}", buffer.header))
        .field("locked", &locked)
        .field("shm", &buffer.shm.raw_handle())
        .finish()
}

/// Debug function for ClientRegistry
///
/// Lists active slots only; empty slots are summarised as a count.
pub fn debug_client_registry(registry: &ClientRegistry, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let active: Vec<_> = registry
        .active()
        .map(|(slot, record)| (slot, record.username.as_str(), record.mailbox.as_raw()))
        .collect();
    f.debug_struct("ClientRegistry")
        .field("capacity", &registry.capacity())
        .field("active", &active)
        .field("empty", &(registry.capacity() - active.len()))
        .finish()
}
