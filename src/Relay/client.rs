// A chat participant: owns one inbound mailbox, talks to the server's.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::shutdown::{Fallback, ShutdownToken, Watchdog};
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::Log::LogBuffer;
use crate::Transport::{
    ConnectPayload, KindFilter, MailboxBackend, MailboxId, Message, MessageKind, RecvMode, SendMode,
};

/// How long `view_logs` waits for the log lock.
pub const LOG_VIEW_TIMEOUT: Duration = Duration::from_secs(1);

pub struct ChatClient {
    username: String,
    config: RelayConfig,
    transport: Arc<dyn MailboxBackend>,
    server: MailboxId,
    mailbox: MailboxId,
    welcome: Message,
    log: Option<Arc<LogBuffer>>,
    token: ShutdownToken,
    receiver: Option<JoinHandle<()>>,
    fallback: Option<Fallback>,
    closed: bool,
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("username", &self.username)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl ChatClient {
    /// Join the chat as `username`.
    ///
    /// `identity` names this client's mailbox; separate processes use their
    /// pid, clients sharing a process need distinct values. On rejection the
    /// mailbox is released and the server's reason comes back as the error.
    pub fn connect(
        config: RelayConfig,
        transport: Arc<dyn MailboxBackend>,
        username: &str,
        identity: u32,
    ) -> Result<Self> {
        let server = transport.lookup(&config.server_mailbox).map_err(|e| {
            warn!(name = %config.server_mailbox, error = %e, "chat server not reachable");
            e
        })?;

        let mailbox = transport.create(&config.client_mailbox(identity))?;
        let stale = transport.purge(mailbox)?;
        if stale > 0 {
            debug!(stale, "discarded stale messages in client mailbox");
        }

        match handshake(&config, transport.as_ref(), server, mailbox, username) {
            Ok(welcome) => {
                let token = ShutdownToken::new();
                token.wake_mailbox_on_cancel(Arc::clone(&transport), mailbox);
                info!(%username, %mailbox, "joined the chat");
                Ok(Self {
                    username: welcome_name(username),
                    config,
                    transport,
                    server,
                    mailbox,
                    welcome,
                    log: None,
                    token,
                    receiver: None,
                    fallback: None,
                    closed: false,
                })
            }
            Err(e) => {
                if let Err(destroy_err) = transport.destroy(mailbox) {
                    debug!(error = %destroy_err, "could not release client mailbox");
                }
                Err(e)
            }
        }
    }

    /// Read the log through an already mapped region instead of attaching by name.
    pub fn with_log(mut self, log: Arc<LogBuffer>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn set_fallback(&mut self, fallback: Fallback) {
        self.fallback = Some(fallback);
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn mailbox(&self) -> MailboxId {
        self.mailbox
    }

    /// The server's welcome Ack.
    pub fn welcome(&self) -> &Message {
        &self.welcome
    }

    /// Cancelled when the server says goodbye or on shutdown.
    pub fn token(&self) -> ShutdownToken {
        self.token.clone()
    }

    pub fn send_chat(&self, body: &str) -> Result<()> {
        self.transport
            .send(self.server, &Message::chat(&self.username, body), SendMode::Blocking)
    }

    /// Take the next message from this client's mailbox.
    pub fn receive(&self, mode: RecvMode) -> Result<Message> {
        self.transport.receive(self.mailbox, KindFilter::Any, mode)
    }

    /// Deliver incoming messages to `handler` on a background thread until
    /// the server disconnects us or the client shuts down. Wake sentinels
    /// are never delivered.
    pub fn spawn_receiver(&mut self, mut handler: impl FnMut(Message) + Send + 'static) -> Result<()> {
        if self.receiver.is_some() {
            return Ok(());
        }
        let transport = Arc::clone(&self.transport);
        let mailbox = self.mailbox;
        let token = self.token.clone();
        let handle = thread::Builder::new()
            .name("client-receiver".into())
            .spawn(move || {
                while !token.is_cancelled() {
                    match transport.receive(mailbox, KindFilter::Any, RecvMode::Blocking) {
                        Ok(message) if message.kind == MessageKind::Wake => {}
                        Ok(message) if message.kind == MessageKind::Disconnect && message.is_from_server() => {
                            info!(reason = %message.body, "disconnected by server");
                            handler(message);
                            token.cancel();
                        }
                        Ok(message) => handler(message),
                        Err(RelayError::MailboxRemoved) => break,
                        Err(e) if e.is_routine() => {}
                        Err(e) => {
                            warn!(error = %e, "client receive failed");
                            break;
                        }
                    }
                }
                debug!(%mailbox, "client receiver stopped");
            })?;
        self.receiver = Some(handle);
        Ok(())
    }

    /// Current contents of the shared activity log.
    pub fn view_logs(&self) -> Result<String> {
        let attached;
        let log = match &self.log {
            Some(log) => log.as_ref(),
            None => {
                attached = LogBuffer::attach(&self.config.log_name)?;
                &attached
            }
        };
        let bytes = log.read_snapshot_timeout(LOG_VIEW_TIMEOUT).ok_or_else(|| {
            RelayError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "log buffer is busy",
            ))
        })?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Leave the chat and release the mailbox, bounded by the configured deadline.
    pub fn shutdown(mut self) -> Result<()> {
        let fallback = self
            .fallback
            .take()
            .unwrap_or(Fallback::Exit(super::server::FORCED_EXIT_CODE));
        let watchdog = Watchdog::arm(self.config.shutdown_deadline, fallback)?;
        self.close()?;
        watchdog.disarm()
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        // the server may already be gone; that is fine on the way out
        match self
            .transport
            .send(self.server, &Message::disconnect(&self.username), SendMode::Blocking)
        {
            Ok(()) => {}
            Err(e) if e.is_peer_loss() => debug!("server already gone"),
            Err(e) => warn!(error = %e, "disconnect not delivered"),
        }

        self.token.cancel();
        if let Some(receiver) = self.receiver.take() {
            receiver.join().map_err(|_| {
                RelayError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "client-receiver thread panicked",
                ))
            })?;
        }
        self.transport.destroy(self.mailbox)?;
        info!(username = %self.username, "left the chat");
        Ok(())
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "client teardown incomplete");
        }
    }
}

// Username as the server sees it after wire clamping.
fn welcome_name(username: &str) -> String {
    Message::chat(username, "").sender
}

fn handshake(
    config: &RelayConfig,
    transport: &dyn MailboxBackend,
    server: MailboxId,
    mailbox: MailboxId,
    username: &str,
) -> Result<Message> {
    let request = Message::connect(
        username,
        ConnectPayload {
            mailbox,
            pid: std::process::id(),
        },
    );
    transport.send(server, &request, SendMode::Blocking)?;

    let ack = transport
        .receive(
            mailbox,
            KindFilter::Only(MessageKind::Ack),
            RecvMode::Timeout(config.handshake_timeout),
        )
        .map_err(|e| match e {
            RelayError::NoMessage => RelayError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("no reply from server within {:?}", config.handshake_timeout),
            )),
            other => other,
        })?;

    match ack.rejection_error(username) {
        Some(err) => {
            warn!(%username, error = %err, "connect rejected by server");
            Err(err)
        }
        None => Ok(ack),
    }
}
