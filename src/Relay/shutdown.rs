// Cooperative shutdown.
//
// A blocking mailbox receive cannot be cancelled from another thread, so a
// token carries wake hooks: cancelling it sets the stop flag and then runs
// every hook, each of which posts a Wake sentinel to a mailbox somebody may
// be parked on. A watchdog bounds the whole sequence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info};

use crate::error::{RelayError, Result};
use crate::Transport::{MailboxBackend, MailboxId, Message, SendMode};

type WakeHook = Box<dyn Fn() + Send + Sync>;

struct TokenInner {
    cancelled: AtomicBool,
    hooks: Mutex<Vec<WakeHook>>,
    signalled: Mutex<bool>,
    cv: Condvar,
}

/// Cloneable stop flag with wake hooks.
#[derive(Clone)]
pub struct ShutdownToken {
    inner: Arc<TokenInner>,
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShutdownToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownToken")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                hooks: Mutex::new(Vec::new()),
                signalled: Mutex::new(false),
                cv: Condvar::new(),
            }),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Set the stop flag, run wake hooks once, release waiters.
    /// Later calls are no-ops.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let hooks = std::mem::take(&mut *self.inner.hooks.lock());
        debug!(hooks = hooks.len(), "shutdown requested");
        for hook in &hooks {
            hook();
        }
        *self.inner.signalled.lock() = true;
        self.inner.cv.notify_all();
    }

    /// Run `hook` on cancellation, or right away if already cancelled.
    pub fn on_cancel(&self, hook: impl Fn() + Send + Sync + 'static) {
        let mut hooks = self.inner.hooks.lock();
        if self.is_cancelled() {
            drop(hooks);
            hook();
            return;
        }
        hooks.push(Box::new(hook));
    }

    /// Wake hook that posts the sentinel to `mailbox`.
    pub fn wake_mailbox_on_cancel(&self, transport: Arc<dyn MailboxBackend>, mailbox: MailboxId) {
        self.on_cancel(move || {
            if let Err(e) = transport.send(mailbox, &Message::wake(), SendMode::NonBlocking) {
                debug!(%mailbox, error = %e, "wake sentinel not delivered");
            }
        });
    }

    /// Block until cancelled.
    pub fn wait(&self) {
        let mut signalled = self.inner.signalled.lock();
        while !*signalled {
            self.inner.cv.wait(&mut signalled);
        }
    }

    /// Block until cancelled or `timeout` elapses. Returns whether cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let until = Instant::now() + timeout;
        let mut signalled = self.inner.signalled.lock();
        while !*signalled {
            if self.inner.cv.wait_until(&mut signalled, until).timed_out() {
                break;
            }
        }
        *signalled
    }
}

/// What the watchdog does when the deadline passes.
pub enum Fallback {
    /// Terminate the process with this exit code.
    Exit(i32),
    /// Run a callback instead (embedding, tests).
    Callback(Box<dyn FnOnce() + Send>),
}

impl Fallback {
    fn fire(self) {
        match self {
            Fallback::Exit(code) => std::process::exit(code),
            Fallback::Callback(callback) => callback(),
        }
    }
}

/// Forced-exit timer armed for the duration of a shutdown sequence.
pub struct Watchdog {
    done: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<JoinHandle<bool>>,
    deadline: Duration,
}

impl Watchdog {
    pub fn arm(deadline: Duration, fallback: Fallback) -> Result<Self> {
        let done = Arc::new((Mutex::new(false), Condvar::new()));
        let shared = Arc::clone(&done);
        let handle = thread::Builder::new()
            .name("shutdown-watchdog".into())
            .spawn(move || {
                let (lock, cv) = &*shared;
                let until = Instant::now() + deadline;
                let mut finished = lock.lock();
                while !*finished {
                    if cv.wait_until(&mut finished, until).timed_out() {
                        break;
                    }
                }
                if *finished {
                    return false;
                }
                drop(finished);
                error!(?deadline, "shutdown deadline exceeded, forcing exit");
                fallback.fire();
                true
            })?;
        Ok(Self {
            done,
            handle: Some(handle),
            deadline,
        })
    }

    /// Stop the timer. Errors with `ShutdownTimeout` if the fallback already fired.
    pub fn disarm(mut self) -> Result<()> {
        {
            let (lock, cv) = &*self.done;
            *lock.lock() = true;
            cv.notify_all();
        }
        let fired = self
            .handle
            .take()
            .map(|h| h.join().unwrap_or(true))
            .unwrap_or(false);
        if fired {
            Err(RelayError::ShutdownTimeout(self.deadline))
        } else {
            Ok(())
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        let (lock, cv) = &*self.done;
        *lock.lock() = true;
        cv.notify_all();
    }
}

lazy_static! {
    // ctrlc allows one handler per process; it fans out to these.
    static ref SIGNAL_TOKENS: Mutex<Vec<ShutdownToken>> = Mutex::new(Vec::new());
    static ref SIGNAL_INSTALLED: Mutex<bool> = Mutex::new(false);
}

/// Cancel `token` on SIGINT / SIGTERM. May be called for several tokens.
pub fn install_signal_handler(token: &ShutdownToken) -> Result<()> {
    {
        let mut tokens = SIGNAL_TOKENS.lock();
        // finished servers and clients no longer need the signal
        tokens.retain(|t| !t.is_cancelled());
        tokens.push(token.clone());
    }

    let mut installed = SIGNAL_INSTALLED.lock();
    if *installed {
        return Ok(());
    }
    ctrlc::set_handler(|| {
        info!("termination signal received");
        let tokens = SIGNAL_TOKENS.lock().clone();
        for token in tokens {
            token.cancel();
        }
    })
    .map_err(|e| RelayError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
    *installed = true;
    Ok(())
}
