use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::{ChatClient, ChatServer};
use crate::config::RelayConfig;
use crate::error::Result;
use crate::Log::LogBuffer;
use crate::Transport::{LocalMailboxes, MailboxBackend, MailboxName};

pub struct RelayBuilder {
    config: RelayConfig,
    transport: Option<Arc<dyn MailboxBackend>>,
    log: Option<Arc<LogBuffer>>,
    identity: Option<u32>,
}

impl Default for RelayBuilder {
    fn default() -> Self {
        Self {
            config: RelayConfig::default(),
            transport: None, // System V queues
            log: None,       // named region from config.log_name
            identity: None,  // this process's pid
        }
    }
}

impl RelayBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: RelayConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn with_server_mailbox(mut self, base: impl Into<String>) -> Self {
        self.config.server_mailbox = MailboxName::new(base, self.config.server_mailbox.owner);
        self
    }

    pub fn with_client_mailbox_base(mut self, base: impl Into<String>) -> Self {
        self.config.client_mailbox_base = base.into();
        self
    }

    pub fn with_log_name(mut self, name: impl Into<String>) -> Self {
        self.config.log_name = name.into();
        self
    }

    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.config.log_capacity = capacity;
        self
    }

    pub fn with_max_clients(mut self, max_clients: usize) -> Self {
        self.config.max_clients = max_clients;
        self
    }

    pub fn with_shutdown_deadline(mut self, deadline: Duration) -> Self {
        self.config.shutdown_deadline = deadline;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.config.flush_interval = interval;
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.log_file = path.into();
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn MailboxBackend>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// In-process mailboxes sized from the config.
    pub fn with_local_transport(mut self) -> Self {
        let local = LocalMailboxes::with_limits(
            self.config.local_mailbox_depth,
            crate::Transport::local::DEFAULT_MAX_MAILBOXES,
        );
        self.transport = Some(Arc::new(local));
        self
    }

    /// Use an existing log region instead of the named one.
    pub fn with_shared_log(mut self, log: Arc<LogBuffer>) -> Self {
        self.log = Some(log);
        self
    }

    /// Owner identity of the client mailbox.
    pub fn with_identity(mut self, identity: u32) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn build_server(self) -> Result<ChatServer> {
        self.config.validate()?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport()?,
        };
        let log = match self.log {
            Some(log) => log,
            None => Arc::new(LogBuffer::create(&self.config.log_name, self.config.log_capacity)?),
        };
        ChatServer::start(self.config, transport, log)
    }

    pub fn build_client(self, username: &str) -> Result<ChatClient> {
        self.config.validate()?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport()?,
        };
        let identity = self.identity.unwrap_or_else(std::process::id);
        let client = ChatClient::connect(self.config, transport, username, identity)?;
        Ok(match self.log {
            Some(log) => client.with_log(log),
            None => client,
        })
    }
}

#[cfg(target_os = "linux")]
fn default_transport() -> Result<Arc<dyn MailboxBackend>> {
    Ok(Arc::new(crate::Transport::SysVMailboxes::new()))
}

#[cfg(not(target_os = "linux"))]
fn default_transport() -> Result<Arc<dyn MailboxBackend>> {
    Err(crate::error::RelayError::TransportUnavailable(
        "System V message queues are only supported on Linux".into(),
    ))
}
