//! Single-shot, restartable timers driven by the owner's clock.
//!
//! The engine never sleeps. A [`Timer`] only records a deadline; the owner
//! passes the current [`Instant`] into [`Timer::fire_if_due`] from its event
//! loop, which keeps every timeout deterministic under test.

use std::time::{Duration, Instant};

/// A cancellable one-shot deadline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timer {
    deadline: Option<Instant>,
}

impl Timer {
    /// Create an idle timer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the timer, replacing any pending deadline.
    pub fn start(&mut self, now: Instant, after: Duration) {
        self.deadline = Some(now + after);
    }

    /// Drop the pending deadline, if any.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_running(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline (zero once due).
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Returns true exactly once when the deadline has passed, clearing it.
    pub fn fire_if_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}
