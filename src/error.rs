// Error taxonomy shared by the transport, the log buffer and the relay.

use std::io;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
    /// Creating an OS resource (mailbox, shared region) failed.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// Nonblocking send found the target mailbox full.
    #[error("mailbox is full")]
    WouldBlock,

    /// Nonblocking receive found nothing matching the filter.
    #[error("no message available")]
    NoMessage,

    /// The peer's mailbox no longer exists.
    #[error("peer mailbox is gone")]
    PeerGone,

    /// Our own mailbox was destroyed while we were using it.
    #[error("mailbox was removed")]
    MailboxRemoved,

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("username '{0}' is already taken")]
    DuplicateUsername(String),

    #[error("registry is full ({capacity} clients)")]
    RegistryFull { capacity: usize },

    #[error("log entry of {len} bytes exceeds buffer capacity of {capacity} bytes")]
    EntryTooLarge { len: usize, capacity: usize },

    #[error("shutdown did not complete within {0:?}")]
    ShutdownTimeout(Duration),

    /// The server refused a handshake for a reason this client does not know.
    #[error("connection rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl RelayError {
    /// Routine conditions that callers retry with backoff.
    pub fn is_routine(&self) -> bool {
        matches!(self, RelayError::WouldBlock | RelayError::NoMessage)
    }

    /// Conditions that mean a mailbox disappeared underneath us.
    pub fn is_peer_loss(&self) -> bool {
        matches!(self, RelayError::PeerGone | RelayError::MailboxRemoved)
    }

    /// Registry-level rejections of a request.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            RelayError::MalformedRequest(_)
                | RelayError::DuplicateUsername(_)
                | RelayError::RegistryFull { .. }
        )
    }
}
