// Fixed-capacity client table.
//
// Slots are an arena indexed by position and are reused, never removed.
// A username index points at the active slot holding that name.

use std::collections::HashMap;
use std::fmt;

use crate::error::{RelayError, Result};
use crate::Transport::MailboxId;

/// One registry slot. `active == false` means the slot is empty and its
/// other fields are leftovers from the previous occupant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRecord {
    pub username: String,
    pub mailbox: MailboxId,
    pub pid: u32,
    pub active: bool,
    pub connected_at: i64,
}

impl Default for ClientRecord {
    fn default() -> Self {
        Self {
            username: String::new(),
            mailbox: MailboxId::from_raw(-1),
            pid: 0,
            active: false,
            connected_at: 0,
        }
    }
}

pub struct ClientRegistry {
    slots: Vec<ClientRecord>,
    index: HashMap<String, usize>,
}

impl ClientRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![ClientRecord::default(); capacity],
            index: HashMap::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn active_count(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Occupy the first empty slot. Returns its index.
    pub fn connect(&mut self, username: &str, mailbox: MailboxId, pid: u32, now: i64) -> Result<usize> {
        if username.is_empty() {
            return Err(RelayError::MalformedRequest("empty username".into()));
        }
        if self.index.contains_key(username) {
            return Err(RelayError::DuplicateUsername(username.to_owned()));
        }
        let slot = self
            .slots
            .iter()
            .position(|r| !r.active)
            .ok_or(RelayError::RegistryFull {
                capacity: self.capacity(),
            })?;

        self.slots[slot] = ClientRecord {
            username: username.to_owned(),
            mailbox,
            pid,
            active: true,
            connected_at: now,
        };
        self.index.insert(username.to_owned(), slot);
        Ok(slot)
    }

    /// Empty the slot held by `username`. `None` when nobody by that name is
    /// connected, which callers treat as a no-op.
    pub fn disconnect(&mut self, username: &str) -> Option<ClientRecord> {
        let slot = self.index.remove(username)?;
        let record = &mut self.slots[slot];
        record.active = false;
        Some(record.clone())
    }

    /// Empty a slot by position (peer found unreachable).
    pub fn evict(&mut self, slot: usize) -> Option<ClientRecord> {
        let record = self.slots.get_mut(slot)?;
        if !record.active {
            return None;
        }
        record.active = false;
        self.index.remove(&record.username);
        Some(record.clone())
    }

    pub fn find_active(&self, username: &str) -> Option<usize> {
        self.index.get(username).copied()
    }

    pub fn get(&self, slot: usize) -> Option<&ClientRecord> {
        self.slots.get(slot).filter(|r| r.active)
    }

    /// Active slots in slot order.
    pub fn active(&self) -> impl Iterator<Item = (usize, &ClientRecord)> + '_ {
        self.slots.iter().enumerate().filter(|(_, r)| r.active)
    }

    pub fn usernames(&self) -> Vec<String> {
        self.active().map(|(_, r)| r.username.clone()).collect()
    }

    /// Empty every slot, returning the records that were active.
    pub fn clear(&mut self) -> Vec<ClientRecord> {
        self.index.clear();
        self.slots
            .iter_mut()
            .filter(|r| r.active)
            .map(|r| {
                r.active = false;
                r.clone()
            })
            .collect()
    }
}

impl fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_client_registry(self, f)
    }
}
