//! Timeout alarm and cross-thread rollback signal
//!
//! Neither type touches participants. The coordinator polls both at the
//! start of every operation and only then marks itself rollback-only, so an
//! expiring deadline can never race an in-progress commit.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Request, from another thread, that a transaction be rolled back
///
/// Raised by the pool when an enlisted connection is destroyed underneath
/// a running transaction. Only the first cause is kept.
#[derive(Debug, Default)]
pub struct RollbackSignal {
    cause: Mutex<Option<String>>,
}

impl RollbackSignal {
    /// Unraised signal
    pub fn new() -> Self {
        RollbackSignal::default()
    }

    /// Raise the signal; later causes are ignored while one is pending
    pub fn raise(&self, cause: impl Into<String>) {
        let mut slot = self.cause.lock();
        if slot.is_none() {
            *slot = Some(cause.into());
        }
    }

    /// True while a cause is pending
    pub fn is_raised(&self) -> bool {
        self.cause.lock().is_some()
    }

    /// Consume the pending cause
    pub fn take(&self) -> Option<String> {
        self.cause.lock().take()
    }

    /// Drop any pending cause
    pub fn clear(&self) {
        *self.cause.lock() = None;
    }
}

/// Deadline for the running transaction
#[derive(Debug, Default)]
pub struct TimeoutAlarm {
    deadline: Option<Instant>,
}

impl TimeoutAlarm {
    /// Disarmed alarm
    pub fn new() -> Self {
        TimeoutAlarm::default()
    }

    /// Arm the alarm to fire `timeout` from now
    pub fn queue(&mut self, timeout: Duration) {
        self.deadline = Instant::now().checked_add(timeout);
    }

    /// Disarm the alarm
    pub fn dequeue(&mut self) {
        self.deadline = None;
    }

    /// True while armed
    pub fn is_queued(&self) -> bool {
        self.deadline.is_some()
    }

    /// Time left before firing
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// True if armed and the deadline has passed at `now`
    pub fn has_fired(&self, now: Instant) -> bool {
        matches!(self.deadline, Some(d) if now >= d)
    }
}
