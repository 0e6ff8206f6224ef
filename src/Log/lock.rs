// Mutex whose state lives in shared memory, usable across processes.
//
// States: 0 unlocked, 1 locked, 2 locked with (possible) waiters.
// Waiters sleep on the word with a shared futex.

use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use std::time::{Duration, Instant};

use crossbeam_utils::Backoff;

use crate::Core::futex::{futex_wait, futex_wake};

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;
const CONTENDED: u32 = 2;

/// View over a futex word; does not own the memory.
#[derive(Clone, Copy)]
pub struct ShmMutex<'a> {
    word: &'a AtomicU32,
}

/// Releases the lock on drop, on every exit path.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ShmGuard<'a> {
    word: &'a AtomicU32,
}

impl<'a> ShmMutex<'a> {
    pub fn new(word: &'a AtomicU32) -> Self {
        Self { word }
    }

    pub fn try_lock(&self) -> Option<ShmGuard<'a>> {
        self.word
            .compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed)
            .ok()
            .map(|_| ShmGuard { word: self.word })
    }

    pub fn lock(&self) -> ShmGuard<'a> {
        if let Some(guard) = self.spin() {
            return guard;
        }
        let mut state = self.word.swap(CONTENDED, Acquire);
        while state != UNLOCKED {
            futex_wait(self.word, CONTENDED, None);
            state = self.word.swap(CONTENDED, Acquire);
        }
        ShmGuard { word: self.word }
    }

    /// Like [`lock`](Self::lock) but gives up after `timeout`, so a reader
    /// is never stuck behind a writer that died holding the lock.
    pub fn lock_timeout(&self, timeout: Duration) -> Option<ShmGuard<'a>> {
        if let Some(guard) = self.spin() {
            return Some(guard);
        }
        let deadline = Instant::now() + timeout;
        loop {
            if self.word.swap(CONTENDED, Acquire) == UNLOCKED {
                return Some(ShmGuard { word: self.word });
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            futex_wait(self.word, CONTENDED, Some(remaining));
        }
    }

    pub fn is_locked(&self) -> bool {
        self.word.load(Relaxed) != UNLOCKED
    }

    // short optimistic phase before sleeping
    fn spin(&self) -> Option<ShmGuard<'a>> {
        let backoff = Backoff::new();
        while !backoff.is_completed() {
            if let Some(guard) = self.try_lock() {
                return Some(guard);
            }
            backoff.spin();
        }
        None
    }
}

impl Drop for ShmGuard<'_> {
    fn drop(&mut self) {
        if self.word.swap(UNLOCKED, Release) == CONTENDED {
            futex_wake(self.word, 1);
        }
    }
}
