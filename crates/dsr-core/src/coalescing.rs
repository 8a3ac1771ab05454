//! Collapses bursts of identical events into one per cool-down window.
//!
//! The set of awaiting keys lives for the lifetime of the emitter (normally the process) and
//! is never persisted. A pending end callback is dropped if the runtime shuts down before its
//! delay elapses: start runs at most once per window, end is best effort.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;

/// Result of [`CoalescingEmitter::emit`].
#[derive(Debug, PartialEq, Eq)]
pub enum Emission<T> {
    /// The key was idle; `start` ran and returned this value.
    Started(T),
    /// The key is inside its window; nothing ran.
    Coalesced,
}

#[derive(Clone, Debug)]
pub struct CoalescingEmitter {
    awaiting: Arc<Mutex<HashSet<String>>>,
    runtime: Handle,
}

impl CoalescingEmitter {
    /// Schedule end callbacks on `runtime`.
    pub fn new(runtime: Handle) -> Self {
        Self {
            awaiting: Arc::new(Mutex::new(HashSet::new())),
            runtime,
        }
    }

    /// An emitter bound to the runtime the caller is running in, if any.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }

    pub fn is_awaiting(&self, key: &str) -> bool {
        self.awaiting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    /// Run `start` now unless `key` is already awaiting, then run `end` after `delay`.
    ///
    /// Never blocks on the delay.
    pub fn emit<T, S, E>(&self, key: &str, delay: Duration, start: S, end: E) -> Emission<T>
    where
        S: FnOnce() -> T,
        E: FnOnce() + Send + 'static,
    {
        let newly_awaiting = self
            .awaiting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_owned());
        if !newly_awaiting {
            tracing::debug!(key, "coalesced");
            return Emission::Coalesced;
        }

        let mut reservation = Reservation {
            awaiting: &self.awaiting,
            key,
            held: true,
        };
        let value = start();
        reservation.held = false;

        let awaiting = Arc::clone(&self.awaiting);
        let key = key.to_owned();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            awaiting
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
            end();
        });

        Emission::Started(value)
    }
}

/// Frees a reserved key if `start` unwinds, so a panic cannot silence the key for good.
struct Reservation<'a> {
    awaiting: &'a Mutex<HashSet<String>>,
    key: &'a str,
    held: bool,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.held {
            self.awaiting
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(self.key);
        }
    }
}
