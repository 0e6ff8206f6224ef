// The relay process: one receiver thread owning the dispatcher, one flusher
// thread draining the shared log to disk.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use super::dispatch::{Dispatcher, Roster, ServerState};
use super::flusher::LogFlusher;
use super::registry::ClientRegistry;
use super::shutdown::{Fallback, ShutdownToken, Watchdog};
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::Log::LogBuffer;
use crate::Transport::{KindFilter, MailboxBackend, MailboxId, MessageKind, RecvMode};

/// Exit code used when a shutdown overruns its deadline.
pub const FORCED_EXIT_CODE: i32 = 1;

pub struct ChatServer {
    config: RelayConfig,
    transport: Arc<dyn MailboxBackend>,
    mailbox: MailboxId,
    log: Arc<LogBuffer>,
    roster: Roster,
    token: ShutdownToken,
    // stopped only after the receiver has logged its farewell
    flush_token: ShutdownToken,
    receiver: Option<JoinHandle<ServerState>>,
    flusher: Option<JoinHandle<usize>>,
    fallback: Option<Fallback>,
}

impl ChatServer {
    /// Open the server mailbox, discard stale requests and start serving.
    pub fn start(config: RelayConfig, transport: Arc<dyn MailboxBackend>, log: Arc<LogBuffer>) -> Result<Self> {
        config.validate()?;

        let mailbox = transport.create(&config.server_mailbox).map_err(|e| {
            error!(name = %config.server_mailbox, error = %e, "cannot open server mailbox");
            e
        })?;
        let purged = transport.purge(mailbox)?;
        if purged > 0 {
            info!(purged, "discarded stale messages from a previous run");
        }

        let token = ShutdownToken::new();
        token.wake_mailbox_on_cancel(Arc::clone(&transport), mailbox);

        let roster = Roster::default();
        let dispatcher = Dispatcher::with_roster(
            ServerState {
                registry: ClientRegistry::new(config.max_clients),
                log: Arc::clone(&log),
                transport: Arc::clone(&transport),
                mailbox,
            },
            roster.clone(),
        );

        let receiver = {
            let token = token.clone();
            thread::Builder::new()
                .name("relay-receiver".into())
                .spawn(move || serve(dispatcher, token))?
        };

        let flush_token = ShutdownToken::new();
        let flusher = LogFlusher::new(Arc::clone(&log), config.log_file.clone())
            .spawn(config.flush_interval, flush_token.clone())?;

        info!(
            %mailbox,
            name = %config.server_mailbox,
            max_clients = config.max_clients,
            log_capacity = log.capacity(),
            "chat server started"
        );

        Ok(Self {
            config,
            transport,
            mailbox,
            log,
            roster,
            token,
            flush_token,
            receiver: Some(receiver),
            flusher: Some(flusher),
            fallback: None,
        })
    }

    /// Replace the default watchdog action (exit with [`FORCED_EXIT_CODE`]).
    pub fn set_fallback(&mut self, fallback: Fallback) {
        self.fallback = Some(fallback);
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn mailbox(&self) -> MailboxId {
        self.mailbox
    }

    pub fn log(&self) -> &Arc<LogBuffer> {
        &self.log
    }

    /// Names of connected clients, as of the last registry change.
    pub fn roster(&self) -> Vec<String> {
        self.roster.snapshot()
    }

    /// Shared handle to the roster, for threads that outlive a borrow of the server.
    pub fn roster_handle(&self) -> Roster {
        self.roster.clone()
    }

    /// Token that stops the receiver; hand it to a signal handler.
    pub fn token(&self) -> ShutdownToken {
        self.token.clone()
    }

    /// Current contents of the activity log.
    pub fn view_logs(&self) -> String {
        String::from_utf8_lossy(&self.log.read_snapshot()).into_owned()
    }

    /// Notify clients, flush the log and release every OS resource, bounded
    /// by the configured deadline. Returns the final (empty) server state.
    pub fn shutdown(mut self) -> Result<ServerState> {
        let fallback = self
            .fallback
            .take()
            .unwrap_or(Fallback::Exit(FORCED_EXIT_CODE));
        let watchdog = Watchdog::arm(self.config.shutdown_deadline, fallback)?;
        let state = self.stop()?;
        watchdog.disarm()?;
        state.ok_or_else(|| RelayError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "server already stopped",
        )))
    }

    fn stop(&mut self) -> Result<Option<ServerState>> {
        let Some(receiver) = self.receiver.take() else {
            return Ok(None);
        };
        info!("chat server shutting down");
        self.token.cancel();
        let state = receiver
            .join()
            .map_err(|_| thread_panicked("relay-receiver"))?;

        self.flush_token.cancel();
        if let Some(flusher) = self.flusher.take() {
            let flushed = flusher.join().map_err(|_| thread_panicked("log-flusher"))?;
            debug!(flushed, "final log flush done");
        }

        if let Err(e) = self.log.unlink() {
            warn!(error = %e, "could not unlink log region");
        }
        self.transport.destroy(self.mailbox)?;
        info!("chat server stopped");
        Ok(Some(state))
    }
}

impl Drop for ChatServer {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "server teardown incomplete");
        }
    }
}

fn thread_panicked(name: &str) -> RelayError {
    RelayError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("{name} thread panicked"),
    ))
}

// Receiver loop: dispatch until cancelled, then say goodbye to everyone.
fn serve(mut dispatcher: Dispatcher, token: ShutdownToken) -> ServerState {
    let transport = Arc::clone(&dispatcher.state().transport);
    let mailbox = dispatcher.state().mailbox;

    while !token.is_cancelled() {
        match transport.receive(mailbox, KindFilter::Any, RecvMode::Blocking) {
            Ok(message) if message.kind == MessageKind::Wake => {
                debug!("receiver woken");
            }
            Ok(message) => {
                dispatcher.handle(message);
            }
            Err(RelayError::MailboxRemoved) => {
                warn!(%mailbox, "server mailbox removed, receiver stopping");
                break;
            }
            Err(RelayError::MalformedRequest(detail)) => {
                warn!(%detail, "discarding undecodable record");
            }
            Err(e) if e.is_routine() => {}
            Err(e) => {
                error!(error = %e, "receive failed, receiver stopping");
                break;
            }
        }
    }

    dispatcher.farewell();
    dispatcher.into_state()
}
