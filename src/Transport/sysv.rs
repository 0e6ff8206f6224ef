// System V message queue backend.
// Each mailbox is one msgget() queue; the record's kind doubles as mtype so
// filtered receives are done by the kernel.

use std::io;

use tracing::debug;

use super::Structs::Message_Structs::WIRE_SIZE;
use super::{KindFilter, MailboxBackend, MailboxId, MailboxName, Message, SendMode};
use crate::error::{RelayError, Result};

/// msgsnd/msgrcv buffer: `long mtype` followed by the record.
#[repr(C)]
struct RawMsgBuf {
    mtype: libc::c_long,
    mtext: [u8; WIRE_SIZE],
}

impl RawMsgBuf {
    fn empty() -> Self {
        Self {
            mtype: 0,
            mtext: [0; WIRE_SIZE],
        }
    }
}

fn errno(err: &io::Error) -> i32 {
    err.raw_os_error().unwrap_or(0)
}

/// Mailboxes backed by kernel message queues, visible with `ipcs -q`.
#[derive(Debug, Clone, Copy)]
pub struct SysVMailboxes {
    mode: libc::c_int,
}

impl Default for SysVMailboxes {
    fn default() -> Self {
        Self { mode: 0o666 }
    }
}

impl SysVMailboxes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Permission bits for queues this process creates.
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = (mode & 0o777) as libc::c_int;
        self
    }

    fn msgget(&self, name: &MailboxName, flags: libc::c_int) -> io::Result<MailboxId> {
        let id = unsafe { libc::msgget(name.ipc_key() as libc::key_t, self.mode | flags) };
        if id == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(MailboxId::from_raw(id))
        }
    }
}

impl MailboxBackend for SysVMailboxes {
    fn create(&self, name: &MailboxName) -> Result<MailboxId> {
        match self.msgget(name, libc::IPC_CREAT) {
            Ok(id) => {
                debug!(%name, %id, "mailbox created");
                Ok(id)
            }
            Err(e) if errno(&e) == libc::ENOSPC => Err(RelayError::TransportUnavailable(format!(
                "msgget {}: system queue limit reached ({})",
                name, e
            ))),
            Err(e) => Err(RelayError::TransportUnavailable(format!("msgget {}: {}", name, e))),
        }
    }

    fn lookup(&self, name: &MailboxName) -> Result<MailboxId> {
        self.msgget(name, 0).map_err(|e| match errno(&e) {
            libc::ENOENT => RelayError::PeerGone,
            _ => RelayError::Io(e),
        })
    }

    fn send(&self, to: MailboxId, message: &Message, mode: SendMode) -> Result<()> {
        let mtype = message.kind.as_raw();
        if mtype == 0 {
            return Err(RelayError::MalformedRequest("message kind 0 cannot be queued".into()));
        }
        let buf = RawMsgBuf {
            mtype: mtype as libc::c_long,
            mtext: message.encode(),
        };
        let flags = match mode {
            SendMode::Blocking => 0,
            SendMode::NonBlocking => libc::IPC_NOWAIT,
        };

        loop {
            let rc = unsafe {
                libc::msgsnd(
                    to.as_raw(),
                    &buf as *const RawMsgBuf as *const libc::c_void,
                    WIRE_SIZE,
                    flags,
                )
            };
            if rc == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            return Err(match errno(&err) {
                libc::EINTR => continue,
                libc::EAGAIN => RelayError::WouldBlock,
                libc::EIDRM | libc::EINVAL => RelayError::PeerGone,
                _ => RelayError::Io(err),
            });
        }
    }

    fn receive_now(&self, from: MailboxId, filter: KindFilter, blocking: bool) -> Result<Message> {
        let msgtyp = match filter {
            KindFilter::Any => 0,
            KindFilter::Only(kind) => kind.as_raw() as libc::c_long,
        };
        let mut flags = libc::MSG_NOERROR;
        if !blocking {
            flags |= libc::IPC_NOWAIT;
        }
        let mut buf = RawMsgBuf::empty();

        loop {
            let n = unsafe {
                libc::msgrcv(
                    from.as_raw(),
                    &mut buf as *mut RawMsgBuf as *mut libc::c_void,
                    WIRE_SIZE,
                    msgtyp,
                    flags,
                )
            };
            if n >= 0 {
                // short records are zero-padded by `empty()`
                return Message::decode(&buf.mtext);
            }
            let err = io::Error::last_os_error();
            return Err(match errno(&err) {
                libc::EINTR => continue,
                libc::ENOMSG | libc::EAGAIN => RelayError::NoMessage,
                libc::EIDRM | libc::EINVAL => RelayError::MailboxRemoved,
                _ => RelayError::Io(err),
            });
        }
    }

    fn destroy(&self, id: MailboxId) -> Result<()> {
        let rc = unsafe { libc::msgctl(id.as_raw(), libc::IPC_RMID, std::ptr::null_mut()) };
        if rc == 0 {
            debug!(%id, "mailbox destroyed");
            return Ok(());
        }
        let err = io::Error::last_os_error();
        match errno(&err) {
            // already gone
            libc::EIDRM | libc::EINVAL => Ok(()),
            _ => Err(RelayError::Io(err)),
        }
    }
}
