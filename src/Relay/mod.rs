pub mod builder;
pub mod client;
pub mod dispatch;
pub mod flusher;
pub mod registry;
pub mod server;
pub mod shutdown;

pub use builder::RelayBuilder;
pub use client::ChatClient;
pub use dispatch::{BroadcastReport, DispatchOutcome, Dispatcher, Roster, ServerState};
pub use flusher::LogFlusher;
pub use registry::{ClientRecord, ClientRegistry};
pub use server::ChatServer;
pub use shutdown::{install_signal_handler, Fallback, ShutdownToken, Watchdog};
