// Message dispatch engine.
//
// Runs on the server's receiver thread, which is the only writer of the
// registry. Fan-out uses nonblocking sends; an unreachable recipient is
// dropped from the registry instead of failing the sender.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::registry::ClientRegistry;
use crate::error::RelayError;
use crate::Log::LogBuffer;
use crate::Transport::Structs::Message_Structs::unix_now;
use crate::Transport::{MailboxBackend, MailboxId, Message, MessageKind, RejectReason, SendMode};

/// How long the welcome Ack may wait for room in the newcomer's mailbox.
pub const WELCOME_TIMEOUT: Duration = Duration::from_millis(250);

/// Everything the relay mutates while serving, passed explicitly instead of
/// living in process-wide globals.
pub struct ServerState {
    pub registry: ClientRegistry,
    pub log: Arc<LogBuffer>,
    pub transport: Arc<dyn MailboxBackend>,
    /// The server's own mailbox.
    pub mailbox: MailboxId,
}

/// Read-only copy of the connected usernames for other threads.
#[derive(Debug, Clone, Default)]
pub struct Roster(Arc<RwLock<Vec<String>>>);

impl Roster {
    pub fn snapshot(&self) -> Vec<String> {
        self.0.read().clone()
    }

    fn publish(&self, names: Vec<String>) {
        *self.0.write() = names;
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Recipients dropped from the registry because their mailbox was gone or full.
    pub evicted: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Connected { slot: usize, username: String },
    Rejected { username: String, reason: RejectReason, detail: String },
    Disconnected { username: String },
    /// Disconnect for a name with no active slot.
    NotConnected { username: String },
    Broadcast(BroadcastReport),
    /// Wake sentinel, discarded.
    Woken,
    Unknown(u32),
}

pub struct Dispatcher {
    state: ServerState,
    roster: Roster,
}

impl Dispatcher {
    pub fn new(state: ServerState) -> Self {
        Self::with_roster(state, Roster::default())
    }

    pub fn with_roster(state: ServerState, roster: Roster) -> Self {
        let dispatcher = Self { state, roster };
        dispatcher.publish_roster();
        dispatcher
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.state.registry
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    pub fn roster(&self) -> Roster {
        self.roster.clone()
    }

    pub fn into_state(self) -> ServerState {
        self.state
    }

    pub fn handle(&mut self, message: Message) -> DispatchOutcome {
        debug!(kind = %message.kind, sender = %message.sender, "dispatching");
        match message.kind {
            MessageKind::Connect => self.connect(&message),
            MessageKind::Disconnect => self.disconnect(&message.sender),
            MessageKind::Chat => self.chat(&message),
            MessageKind::Wake => DispatchOutcome::Woken,
            other => {
                warn!(kind = other.as_raw(), sender = %message.sender, "unknown message type, discarded");
                DispatchOutcome::Unknown(other.as_raw())
            }
        }
    }

    fn connect(&mut self, message: &Message) -> DispatchOutcome {
        let username = message.sender.clone();
        let payload = match message.connect_payload() {
            Ok(payload) => payload,
            Err(e) => {
                // requester's mailbox unknown: nothing to reply to
                warn!(%username, error = %e, "dropping connect request");
                return DispatchOutcome::Rejected {
                    username,
                    reason: RejectReason::MalformedRequest,
                    detail: e.to_string(),
                };
            }
        };

        if payload.mailbox == self.state.mailbox {
            let detail = format!("reply mailbox {} is the server's own", payload.mailbox);
            warn!(%username, %detail, "dropping connect request");
            return DispatchOutcome::Rejected {
                username,
                reason: RejectReason::MalformedRequest,
                detail,
            };
        }

        let slot = match self
            .state
            .registry
            .connect(&username, payload.mailbox, payload.pid, unix_now())
        {
            Ok(slot) => slot,
            Err(e) => {
                warn!(%username, error = %e, "connect rejected");
                let reason = RejectReason::of(&e).unwrap_or(RejectReason::MalformedRequest);
                let detail = e.to_string();
                let reply = Message::rejection(reason, &detail);
                if let Err(send_err) = self.state.transport.send(payload.mailbox, &reply, SendMode::NonBlocking) {
                    debug!(%username, error = %send_err, "could not deliver rejection");
                }
                return DispatchOutcome::Rejected {
                    username,
                    reason,
                    detail,
                };
            }
        };

        // Bounded so a stale or full reply queue cannot park the receiver;
        // a lost welcome does not undo the connect.
        if let Err(e) = self
            .state
            .transport
            .send_timeout(payload.mailbox, &Message::welcome(&username), WELCOME_TIMEOUT)
        {
            warn!(%username, error = %e, "welcome ack not delivered");
        }

        let joined = Message::announcement(&format!("{} has joined the chat.", username));
        self.broadcast(&joined, Some(slot));
        self.record(&joined);
        self.publish_roster();

        info!(%username, slot, mailbox = %payload.mailbox, pid = payload.pid, "client connected");
        DispatchOutcome::Connected { slot, username }
    }

    fn disconnect(&mut self, username: &str) -> DispatchOutcome {
        if self.state.registry.disconnect(username).is_none() {
            debug!(%username, "disconnect for unknown user ignored");
            return DispatchOutcome::NotConnected {
                username: username.to_owned(),
            };
        }

        let left = Message::announcement(&format!("{} has left the chat.", username));
        self.broadcast(&left, None);
        self.record(&left);
        self.publish_roster();

        info!(%username, "client disconnected");
        DispatchOutcome::Disconnected {
            username: username.to_owned(),
        }
    }

    fn chat(&mut self, message: &Message) -> DispatchOutcome {
        // Exclusion is best effort: an unknown sender still reaches everyone.
        let exclude = self.state.registry.find_active(&message.sender);
        let report = self.broadcast(message, exclude);
        self.record(message);
        DispatchOutcome::Broadcast(report)
    }

    /// Send one copy of `message` to every active client except `exclude`.
    pub fn broadcast(&mut self, message: &Message, exclude: Option<usize>) -> BroadcastReport {
        let targets: Vec<(usize, MailboxId)> = self
            .state
            .registry
            .active()
            .filter(|(slot, _)| Some(*slot) != exclude)
            .map(|(slot, record)| (slot, record.mailbox))
            .collect();

        let mut report = BroadcastReport::default();
        for (slot, mailbox) in targets {
            match self.state.transport.send(mailbox, message, SendMode::NonBlocking) {
                Ok(()) => report.delivered += 1,
                Err(e @ (RelayError::PeerGone | RelayError::WouldBlock)) => {
                    if let Some(record) = self.state.registry.evict(slot) {
                        warn!(username = %record.username, %mailbox, error = %e, "peer unreachable, slot released");
                        report.evicted.push(record.username);
                    }
                }
                Err(e) => warn!(%mailbox, error = %e, "broadcast send failed"),
            }
        }

        if !report.evicted.is_empty() {
            self.publish_roster();
        }
        report
    }

    /// Tell every active client the relay is stopping and empty all slots.
    /// Returns how many notices were delivered.
    pub fn farewell(&mut self) -> usize {
        let notice = Message::farewell();
        let mut delivered = 0;
        for (_, record) in self.state.registry.active() {
            match self.state.transport.send(record.mailbox, &notice, SendMode::NonBlocking) {
                Ok(()) => delivered += 1,
                Err(e) => debug!(username = %record.username, error = %e, "farewell not delivered"),
            }
        }
        self.record(&notice);
        let released = self.state.registry.clear();
        self.publish_roster();
        info!(delivered, released = released.len(), "clients notified of shutdown");
        delivered
    }

    fn record(&self, message: &Message) {
        match self.state.log.append_message(message) {
            Ok(0) => {}
            Ok(evicted) => debug!(evicted, "log buffer made room"),
            Err(e) => warn!(error = %e, "log entry dropped"),
        }
    }

    fn publish_roster(&self) {
        self.roster.publish(self.state.registry.usernames());
    }
}
