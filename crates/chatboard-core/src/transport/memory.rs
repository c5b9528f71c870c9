//! In-memory transport for tests and offline use.

use std::collections::VecDeque;

use super::{Transport, TransportError, TransportEvent, TransportResult};

/// Scripted transport: events are pushed by the owner, sent frames are recorded.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    url: Option<String>,
    held: bool,
    pending: VecDeque<TransportEvent>,
    sent: Vec<String>,
    opens: usize,
    closes: usize,
    fail_next_open: Option<String>,
}

impl MemoryTransport {
    /// Create a new idle memory transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event for the next `poll`.
    pub fn push(&mut self, event: TransportEvent) {
        self.pending.push_back(event);
    }

    /// Queue an incoming text frame.
    pub fn push_frame(&mut self, frame: impl Into<String>) {
        self.push(TransportEvent::Frame(frame.into()));
    }

    /// Make the next `open` fail synchronously with `reason`.
    pub fn fail_next_open(&mut self, reason: impl Into<String>) {
        self.fail_next_open = Some(reason.into());
    }

    /// Whether a channel is currently held.
    pub fn is_open(&self) -> bool {
        self.held
    }

    /// URL of the last `open` call.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Frames written so far.
    pub fn sent(&self) -> &[String] {
        &self.sent
    }

    /// Take and clear the recorded frames.
    pub fn take_sent(&mut self) -> Vec<String> {
        std::mem::take(&mut self.sent)
    }

    /// Number of `open` calls that succeeded.
    pub fn open_count(&self) -> usize {
        self.opens
    }

    /// Number of `close` calls on a held channel.
    pub fn close_count(&self) -> usize {
        self.closes
    }
}

impl Transport for MemoryTransport {
    fn open(&mut self, url: &str) -> TransportResult<()> {
        if self.held {
            return Err(TransportError::AlreadyOpen);
        }
        if let Some(reason) = self.fail_next_open.take() {
            return Err(TransportError::InvalidUrl(reason));
        }
        self.url = Some(url.to_string());
        self.held = true;
        self.opens += 1;
        Ok(())
    }

    fn send(&mut self, frame: &str) -> TransportResult<()> {
        if !self.held {
            return Err(TransportError::NotOpen);
        }
        self.sent.push(frame.to_string());
        Ok(())
    }

    fn close(&mut self) {
        if self.held {
            self.closes += 1;
        }
        self.held = false;
        self.pending.clear();
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        let events: Vec<TransportEvent> = self.pending.drain(..).collect();
        if events
            .iter()
            .any(|e| matches!(e, TransportEvent::Closed { .. } | TransportEvent::Failed { .. }))
        {
            self.held = false;
        }
        events
    }
}
