// Runtime settings for servers and clients.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::error::{RelayError, Result};
use crate::Transport::MailboxName;

pub const DEFAULT_SERVER_MAILBOX: &str = "chatterbox.server";
pub const DEFAULT_CLIENT_MAILBOX: &str = "chatterbox.client";
pub const DEFAULT_LOG_NAME: &str = "chatterbox_log";
pub const DEFAULT_LOG_CAPACITY: usize = 1024 * 1024; // 1MB
pub const DEFAULT_MAX_CLIENTS: usize = 10;
pub const DEFAULT_LOG_FILE: &str = "chat_server.log";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Well-known mailbox clients send requests to.
    pub server_mailbox: MailboxName,
    /// Base name of per-client mailboxes; the owner is the client identity.
    pub client_mailbox_base: String,
    /// Name of the shared log region.
    pub log_name: String,
    pub log_capacity: usize,
    pub max_clients: usize,
    /// Upper bound on a graceful shutdown before the watchdog fires.
    pub shutdown_deadline: Duration,
    pub flush_interval: Duration,
    pub log_file: PathBuf,
    pub handshake_timeout: Duration,
    /// Per-mailbox depth of the in-process backend.
    pub local_mailbox_depth: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            server_mailbox: MailboxName::new(DEFAULT_SERVER_MAILBOX, 0),
            client_mailbox_base: DEFAULT_CLIENT_MAILBOX.to_owned(),
            log_name: DEFAULT_LOG_NAME.to_owned(),
            log_capacity: DEFAULT_LOG_CAPACITY,
            max_clients: DEFAULT_MAX_CLIENTS,
            shutdown_deadline: Duration::from_secs(5),
            flush_interval: Duration::from_secs(5),
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            handshake_timeout: Duration::from_secs(5),
            local_mailbox_depth: crate::Transport::local::DEFAULT_DEPTH,
        }
    }
}

impl RelayConfig {
    /// Defaults overridden by `CHATTERBOX_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| env::var(key).ok())
    }

    /// Apply overrides from any key lookup. Unparsable values are ignored.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(base) = lookup("CHATTERBOX_SERVER_MAILBOX") {
            self.server_mailbox = MailboxName::new(base, self.server_mailbox.owner);
        }
        if let Some(name) = lookup("CHATTERBOX_LOG_NAME") {
            self.log_name = name;
        }
        if let Some(capacity) = parse_var(&lookup, "CHATTERBOX_LOG_CAPACITY") {
            self.log_capacity = capacity;
        }
        if let Some(max) = parse_var(&lookup, "CHATTERBOX_MAX_CLIENTS") {
            self.max_clients = max;
        }
        if let Some(ms) = parse_var(&lookup, "CHATTERBOX_SHUTDOWN_DEADLINE_MS") {
            self.shutdown_deadline = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&lookup, "CHATTERBOX_FLUSH_INTERVAL_MS") {
            self.flush_interval = Duration::from_millis(ms);
        }
        if let Some(path) = lookup("CHATTERBOX_LOG_FILE") {
            self.log_file = PathBuf::from(path);
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.log_capacity == 0 {
            return Err(must_be_non_zero("log_capacity"));
        }
        if self.max_clients == 0 {
            return Err(must_be_non_zero("max_clients"));
        }
        if self.shutdown_deadline.is_zero() {
            return Err(must_be_non_zero("shutdown_deadline"));
        }
        if self.flush_interval.is_zero() {
            return Err(must_be_non_zero("flush_interval"));
        }
        if self.local_mailbox_depth == 0 {
            return Err(must_be_non_zero("local_mailbox_depth"));
        }
        Ok(())
    }

    /// Mailbox name of the client identified by `owner`.
    pub fn client_mailbox(&self, owner: u32) -> MailboxName {
        MailboxName::new(self.client_mailbox_base.clone(), owner)
    }
}

fn must_be_non_zero(what: &str) -> RelayError {
    RelayError::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        format!("{what} must be non-zero"),
    ))
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}
