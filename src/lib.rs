// Module naming follows project convention (Core = OS primitives, Log = shared activity log)
#[allow(non_snake_case)]
pub mod Core;
#[allow(non_snake_case)]
pub mod Transport;
#[allow(non_snake_case)]
pub mod Log;
#[allow(non_snake_case)]
pub mod Relay;
#[allow(non_snake_case)]
pub mod Debug {
    pub mod StructDebug;
}

pub mod config;
pub mod error;
pub mod logging;

pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use Log::LogBuffer;
pub use Relay::{ChatClient, ChatServer, RelayBuilder, ShutdownToken};
