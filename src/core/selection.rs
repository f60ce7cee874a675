//! Single displayed selection shared by concurrent requests
//!
//! Every interaction takes a ticket before starting its (stateless)
//! evaluation. Only the holder of the newest ticket may publish, so a slow
//! evaluation finishing after a newer one started is silently dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Proof of which interaction an evaluation belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ticket(u64);

#[derive(Debug)]
pub struct ActiveSelection<T> {
    issued: AtomicU64,
    current: Mutex<Option<(Ticket, T)>>,
}

impl<T: Clone> ActiveSelection<T> {
    pub fn new() -> Self {
        Self {
            issued: AtomicU64::new(0),
            current: Mutex::new(None),
        }
    }

    /// Start a new interaction, superseding every earlier one
    pub fn begin(&self) -> Ticket {
        Ticket(self.issued.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Store `value` if `ticket` is still the newest; returns whether it was stored
    pub fn publish(&self, ticket: Ticket, value: T) -> bool {
        let mut slot = self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Checked under the lock so a newer publish cannot be overwritten
        if ticket.0 != self.issued.load(Ordering::SeqCst) {
            log::debug!("Dropping stale result for ticket {}", ticket.0);
            return false;
        }
        *slot = Some((ticket, value));
        true
    }

    /// Result currently on display
    pub fn current(&self) -> Option<T> {
        let slot = self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slot.as_ref().map(|(_, value)| value.clone())
    }
}

impl<T: Clone> Default for ActiveSelection<T> {
    fn default() -> Self {
        Self::new()
    }
}
