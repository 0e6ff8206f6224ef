pub mod SharedMemory;
pub mod futex;

pub use SharedMemory::{
    attach_shared_memory, create_shared_memory, unlink_shared_memory, RawHandle, SharedMemoryBackend,
};
