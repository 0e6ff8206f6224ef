// Periodic drain of the shared log into an append-only file.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::shutdown::ShutdownToken;
use crate::error::Result;
use crate::Log::LogBuffer;

pub struct LogFlusher {
    log: Arc<LogBuffer>,
    path: PathBuf,
}

impl LogFlusher {
    pub fn new(log: Arc<LogBuffer>, path: impl Into<PathBuf>) -> Self {
        Self {
            log,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append whatever the buffer holds, then empty it. Returns bytes
    /// written. The buffer is left untouched if the file cannot be written.
    pub fn flush(&self) -> Result<usize> {
        if self.log.used() == 0 {
            return Ok(0);
        }
        let mut file = open_append(&self.path)?;
        let written = self.log.drain_with(|contents| -> std::io::Result<usize> {
            file.write_all(contents)?;
            file.flush()?;
            Ok(contents.len())
        })?;
        debug!(bytes = written, path = %self.path.display(), "log flushed");
        Ok(written)
    }

    /// Flush every `interval` until `token` is cancelled, then once more.
    pub fn spawn(self, interval: Duration, token: ShutdownToken) -> Result<JoinHandle<usize>> {
        let handle = thread::Builder::new()
            .name("log-flusher".into())
            .spawn(move || {
                let mut total = 0;
                loop {
                    let stopping = token.wait_timeout(interval);
                    match self.flush() {
                        Ok(n) => total += n,
                        Err(e) => warn!(path = %self.path.display(), error = %e, "log flush failed"),
                    }
                    if stopping {
                        break;
                    }
                }
                info!(total, path = %self.path.display(), "log flusher stopped");
                total
            })?;
        Ok(handle)
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}
