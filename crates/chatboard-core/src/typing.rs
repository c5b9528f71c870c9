//! TYPING / STOP_TYPING signals derived from local input activity.

use std::time::{Duration, Instant};

use crate::protocol::ClientMessage;
use crate::timer::Timer;

/// Inactivity period after which STOP_TYPING is sent.
pub const TYPING_TIMEOUT: Duration = Duration::from_millis(3000);

/// Debounces input changes into typing signals.
///
/// At most one TYPING is sent per burst of input; the burst ends after
/// [`TYPING_TIMEOUT`] of inactivity, an explicit send, or a blur. Signals are
/// dropped, not queued, while the session is not open.
#[derive(Debug, Clone)]
pub struct TypingController {
    timer: Timer,
    timeout: Duration,
}

impl Default for TypingController {
    fn default() -> Self {
        Self::new(TYPING_TIMEOUT)
    }
}

impl TypingController {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timer: Timer::new(),
            timeout,
        }
    }

    /// Whether a burst is in progress.
    pub fn is_typing(&self) -> bool {
        self.timer.is_running()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    /// The input field changed.
    pub fn on_input(&mut self, text: &str, open: bool, now: Instant) -> Option<ClientMessage> {
        if text.is_empty() || !open {
            return None;
        }
        let signal = (!self.timer.is_running()).then_some(ClientMessage::Typing {});
        self.timer.start(now, self.timeout);
        signal
    }

    /// Check the inactivity timer.
    pub fn poll(&mut self, now: Instant, open: bool) -> Option<ClientMessage> {
        if self.timer.fire_if_due(now) && open {
            Some(ClientMessage::StopTyping {})
        } else {
            None
        }
    }

    /// End the burst immediately (message sent or input blurred).
    pub fn force_stop(&mut self, open: bool) -> Option<ClientMessage> {
        let was_typing = self.timer.is_running();
        self.timer.cancel();
        (was_typing && open).then_some(ClientMessage::StopTyping {})
    }

    /// Drop the timer without signalling.
    pub fn cancel(&mut self) {
        self.timer.cancel();
    }
}
