// Mailbox transport: every participant owns one named inbound queue.

use std::fmt;
use std::time::{Duration, Instant};

use crossbeam_utils::Backoff;
use sha2::{Digest, Sha256};

use crate::error::{RelayError, Result};

pub mod local;
#[cfg(target_os = "linux")]
pub mod sysv;

pub mod Structs {
    pub mod Message_Structs;
    pub use Message_Structs::{ConnectPayload, Message, MessageKind, RejectReason}; // re-export for stable path
}

pub use local::LocalMailboxes;
pub use Structs::{ConnectPayload, Message, MessageKind, RejectReason};
#[cfg(target_os = "linux")]
pub use sysv::SysVMailboxes;

/// Upper bound on one sleep while polling a mailbox.
const POLL_CEILING: Duration = Duration::from_millis(10);

/// OS-level identifier of a mailbox (a System V queue id, or a local slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MailboxId(i32);

impl MailboxId {
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for MailboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Well-known name plus owner identity, e.g. `chatterbox.client` / pid.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MailboxName {
    pub base: String,
    pub owner: u32,
}

impl MailboxName {
    pub fn new(base: impl Into<String>, owner: u32) -> Self {
        Self {
            base: base.into(),
            owner,
        }
    }

    /// Stable System V key for this name: the first four bytes of
    /// SHA-256("base:owner"), forced positive and never `IPC_PRIVATE`.
    pub fn ipc_key(&self) -> i32 {
        let digest = Sha256::digest(self.to_string().as_bytes());
        let raw = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]) & 0x7fff_ffff;
        if raw == 0 {
            1
        } else {
            raw as i32
        }
    }
}

impl fmt::Display for MailboxName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.base, self.owner)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// Wait for room in the target mailbox.
    Blocking,
    /// Fail fast with `WouldBlock` / `PeerGone`.
    NonBlocking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvMode {
    /// Park until a matching message arrives or the mailbox is destroyed.
    Blocking,
    /// Return `NoMessage` immediately when nothing matches.
    NonBlocking,
    /// Poll until the deadline, then `NoMessage`.
    Timeout(Duration),
}

/// Which messages a receive may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindFilter {
    Any,
    Only(MessageKind),
}

impl KindFilter {
    pub fn matches(self, kind: MessageKind) -> bool {
        match self {
            KindFilter::Any => true,
            KindFilter::Only(k) => k == kind,
        }
    }
}

/// The mailbox contract shared by server and clients.
///
/// Routine failures (`WouldBlock`, `NoMessage`, `PeerGone`, `MailboxRemoved`)
/// come back as errors; callers decide which of them are fatal.
pub trait MailboxBackend: Send + Sync + fmt::Debug {
    /// Create the mailbox for `name`, or return the existing one.
    fn create(&self, name: &MailboxName) -> Result<MailboxId>;

    /// Find an existing mailbox without creating it.
    fn lookup(&self, name: &MailboxName) -> Result<MailboxId>;

    fn send(&self, to: MailboxId, message: &Message, mode: SendMode) -> Result<()>;

    /// Receive in `Blocking` or `NonBlocking` mode.
    fn receive_now(&self, from: MailboxId, filter: KindFilter, blocking: bool) -> Result<Message>;

    /// Release the mailbox; parked receivers observe `MailboxRemoved`.
    fn destroy(&self, id: MailboxId) -> Result<()>;

    fn receive(&self, from: MailboxId, filter: KindFilter, mode: RecvMode) -> Result<Message> {
        match mode {
            RecvMode::Blocking => self.receive_now(from, filter, true),
            RecvMode::NonBlocking => self.receive_now(from, filter, false),
            RecvMode::Timeout(timeout) => {
                let start = Instant::now();
                let backoff = Backoff::new();
                loop {
                    match self.receive_now(from, filter, false) {
                        Err(RelayError::NoMessage) => {}
                        other => return other,
                    }
                    let remaining = timeout.saturating_sub(start.elapsed());
                    if remaining.is_zero() {
                        return Err(RelayError::NoMessage);
                    }
                    if backoff.is_completed() {
                        std::thread::sleep(remaining.min(POLL_CEILING));
                    } else {
                        backoff.snooze();
                    }
                }
            }
        }
    }

    /// Nonblocking send retried until `timeout`; a queue that stays full
    /// yields `WouldBlock`.
    fn send_timeout(&self, to: MailboxId, message: &Message, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        let backoff = Backoff::new();
        loop {
            match self.send(to, message, SendMode::NonBlocking) {
                Err(RelayError::WouldBlock) => {}
                other => return other,
            }
            let remaining = timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                return Err(RelayError::WouldBlock);
            }
            if backoff.is_completed() {
                std::thread::sleep(remaining.min(POLL_CEILING));
            } else {
                backoff.snooze();
            }
        }
    }

    /// Discard everything currently queued; returns how many were dropped.
    fn purge(&self, id: MailboxId) -> Result<usize> {
        let mut dropped = 0;
        loop {
            match self.receive_now(id, KindFilter::Any, false) {
                Ok(_) => dropped += 1,
                Err(RelayError::NoMessage) => return Ok(dropped),
                Err(RelayError::MalformedRequest(_)) => dropped += 1,
                Err(e) => return Err(e),
            }
        }
    }
}
