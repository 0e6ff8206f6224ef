pub mod Buffer;
pub mod Buffer_impl;
pub mod layout;
pub mod lock;

pub use Buffer::LogBuffer; // re-export for stable path
pub use layout::{LogHeader, HEADER_SIZE};
pub use lock::{ShmGuard, ShmMutex};
