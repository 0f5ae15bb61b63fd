//! Single-use signalling primitive used to suspend a caller until a ticket
//! is issued.
//!
//! A [`Waiter`] fires exactly once. It is deliberately not a reusable event
//! (see design note "Waiter primitive"): once signalled, further signals are
//! no-ops, and a caller that only starts waiting after the signal already
//! fired still observes it immediately.

use crate::ticket::Ticket;
use std::collections::HashMap;
use std::sync::{Condvar, Mutex};

/// A one-shot latch bound to exactly one [`Ticket`].
///
/// Created when a caller must block on [`crate::limiter::Limiter::acquire`]
/// or [`crate::limiter::Limiter::rate_limit_exceeded`]; signalled by the
/// limiter (outside its own lock) once a replacement ticket is promoted.
#[derive(Debug)]
pub(crate) struct Waiter {
    state: Mutex<Option<Ticket>>,
    ready: Condvar,
}

impl Waiter {
    fn new() -> Self {
        Self {
            state: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    /// Signal this waiter with the now-issued ticket. Idempotent: signalling
    /// twice simply overwrites the stored ticket, and a waiter is only ever
    /// signalled once in practice (each request id is removed from the
    /// registry on wake).
    fn signal(&self, ticket: Ticket) {
        let mut state = self.state.lock().expect("waiter poisoned");
        *state = Some(ticket);
        self.ready.notify_all();
    }

    /// Block until signalled, returning the promoted ticket.
    fn wait(&self) -> Ticket {
        let mut state = self.state.lock().expect("waiter poisoned");
        loop {
            if let Some(ticket) = state.take() {
                return ticket;
            }
            state = self.ready.wait(state).expect("waiter poisoned");
        }
    }
}

/// Maps in-flight request ids to the [`Waiter`] a caller is blocked on.
///
/// Owned by [`crate::limiter::Limiter`] behind its lock; entries are created
/// just before a caller suspends and removed right after it wakes.
#[derive(Debug, Default)]
pub(crate) struct WaiterRegistry {
    waiters: HashMap<u64, std::sync::Arc<Waiter>>,
}

impl WaiterRegistry {
    /// Register a new waiter for `request_id` and return a handle the caller
    /// can block on outside the limiter lock.
    pub(crate) fn register(&mut self, request_id: u64) -> std::sync::Arc<Waiter> {
        let waiter = std::sync::Arc::new(Waiter::new());
        self.waiters.insert(request_id, std::sync::Arc::clone(&waiter));
        waiter
    }

    /// Signal and deregister the waiter for `ticket.request_id`, if any is
    /// registered. Called under the limiter lock; the actual blocking
    /// `Condvar::wait` always happens on a clone of the `Arc<Waiter>` taken
    /// before the caller releases the lock, so this never blocks the caller
    /// that's about to start waiting.
    pub(crate) fn resolve(&mut self, ticket: Ticket) {
        if let Some(waiter) = self.waiters.remove(&ticket.request_id) {
            waiter.signal(ticket);
        }
    }
}

/// A handle a caller blocks on outside the limiter lock.
pub(crate) type WaiterHandle = std::sync::Arc<Waiter>;

/// Block the current thread until `handle` is signalled, returning the
/// promoted ticket.
pub(crate) fn park(handle: &WaiterHandle) -> Ticket {
    handle.wait()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn signal_before_wait_is_observed_immediately() {
        let mut registry = WaiterRegistry::default();
        let handle = registry.register(7);
        registry.resolve(Ticket::new(7, 0, None, None));

        let ticket = park(&handle);
        assert_eq!(ticket.request_id, 7);
    }

    #[test]
    fn wait_blocks_until_signalled_from_another_thread() {
        let mut registry = WaiterRegistry::default();
        let handle = registry.register(3);

        let signal_handle = std::sync::Arc::clone(&handle);
        let joiner = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            signal_handle.signal(Ticket::new(3, 0, None, None));
        });

        let ticket = park(&handle);
        assert_eq!(ticket.request_id, 3);
        joiner.join().unwrap();
    }
}
