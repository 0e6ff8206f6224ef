// In-process mailboxes with the same contract as the System V backend.
// Used when server and clients share one process (tests, embedding).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use super::{KindFilter, MailboxBackend, MailboxId, MailboxName, Message, SendMode};
use crate::error::{RelayError, Result};

/// Default per-mailbox depth, close to what a 16 KiB kernel queue holds.
pub const DEFAULT_DEPTH: usize = 64;

/// Default ceiling on live mailboxes.
pub const DEFAULT_MAX_MAILBOXES: usize = 256;

#[derive(Debug)]
struct QueueState {
    messages: VecDeque<Message>,
    removed: bool,
}

#[derive(Debug)]
struct LocalQueue {
    state: Mutex<QueueState>,
    readable: Condvar,
    writable: Condvar,
}

#[derive(Debug, Default)]
struct HubState {
    next_id: i32,
    by_name: HashMap<MailboxName, MailboxId>,
    queues: HashMap<MailboxId, Arc<LocalQueue>>,
}

#[derive(Debug)]
struct Hub {
    state: Mutex<HubState>,
    depth: usize,
    max_mailboxes: usize,
}

/// Cloneable handle to one namespace of in-process mailboxes.
#[derive(Debug, Clone)]
pub struct LocalMailboxes {
    hub: Arc<Hub>,
}

impl Default for LocalMailboxes {
    fn default() -> Self {
        Self::with_limits(DEFAULT_DEPTH, DEFAULT_MAX_MAILBOXES)
    }
}

impl LocalMailboxes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(depth: usize, max_mailboxes: usize) -> Self {
        Self {
            hub: Arc::new(Hub {
                state: Mutex::new(HubState::default()),
                depth: depth.max(1),
                max_mailboxes,
            }),
        }
    }

    fn queue(&self, id: MailboxId) -> Option<Arc<LocalQueue>> {
        self.hub.state.lock().queues.get(&id).cloned()
    }

    /// Number of messages waiting in `id`, or `None` if it does not exist.
    pub fn queued(&self, id: MailboxId) -> Option<usize> {
        self.queue(id).map(|q| q.state.lock().messages.len())
    }

    pub fn exists(&self, id: MailboxId) -> bool {
        self.queue(id).is_some()
    }

    pub fn mailbox_count(&self) -> usize {
        self.hub.state.lock().queues.len()
    }
}

impl MailboxBackend for LocalMailboxes {
    fn create(&self, name: &MailboxName) -> Result<MailboxId> {
        let mut hub = self.hub.state.lock();
        if let Some(id) = hub.by_name.get(name) {
            return Ok(*id);
        }
        if hub.queues.len() >= self.hub.max_mailboxes {
            return Err(RelayError::TransportUnavailable(format!(
                "mailbox limit of {} reached",
                self.hub.max_mailboxes
            )));
        }
        let id = MailboxId::from_raw(hub.next_id);
        hub.next_id += 1;
        hub.by_name.insert(name.clone(), id);
        hub.queues.insert(
            id,
            Arc::new(LocalQueue {
                state: Mutex::new(QueueState {
                    messages: VecDeque::new(),
                    removed: false,
                }),
                readable: Condvar::new(),
                writable: Condvar::new(),
            }),
        );
        Ok(id)
    }

    fn lookup(&self, name: &MailboxName) -> Result<MailboxId> {
        self.hub
            .state
            .lock()
            .by_name
            .get(name)
            .copied()
            .ok_or(RelayError::PeerGone)
    }

    fn send(&self, to: MailboxId, message: &Message, mode: SendMode) -> Result<()> {
        if message.kind.as_raw() == 0 {
            return Err(RelayError::MalformedRequest("message kind 0 cannot be queued".into()));
        }
        let queue = self.queue(to).ok_or(RelayError::PeerGone)?;
        let mut state = queue.state.lock();
        loop {
            if state.removed {
                return Err(RelayError::PeerGone);
            }
            if state.messages.len() < self.hub.depth {
                break;
            }
            match mode {
                SendMode::NonBlocking => return Err(RelayError::WouldBlock),
                SendMode::Blocking => queue.writable.wait(&mut state),
            }
        }
        state.messages.push_back(message.clone());
        queue.readable.notify_all();
        Ok(())
    }

    fn receive_now(&self, from: MailboxId, filter: KindFilter, blocking: bool) -> Result<Message> {
        let queue = self.queue(from).ok_or(RelayError::MailboxRemoved)?;
        let mut state = queue.state.lock();
        loop {
            if state.removed {
                return Err(RelayError::MailboxRemoved);
            }
            if let Some(pos) = state.messages.iter().position(|m| filter.matches(m.kind)) {
                let message = state.messages.remove(pos).ok_or(RelayError::NoMessage)?;
                queue.writable.notify_one();
                return Ok(message);
            }
            if !blocking {
                return Err(RelayError::NoMessage);
            }
            queue.readable.wait(&mut state);
        }
    }

    fn destroy(&self, id: MailboxId) -> Result<()> {
        let queue = {
            let mut hub = self.hub.state.lock();
            hub.by_name.retain(|_, v| *v != id);
            hub.queues.remove(&id)
        };
        if let Some(queue) = queue {
            let mut state = queue.state.lock();
            state.removed = true;
            state.messages.clear();
            queue.readable.notify_all();
            queue.writable.notify_all();
        }
        Ok(())
    }
}
