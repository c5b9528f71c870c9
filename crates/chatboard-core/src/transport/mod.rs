//! Realtime channel abstraction.
//!
//! A [`Transport`] carries text frames to and from the chat server. It only
//! moves bytes: lifecycle decisions (retry, backoff, JOIN) belong to
//! [`crate::session::Session`].

mod memory;

#[cfg(feature = "native")]
mod native;

pub use memory::MemoryTransport;

#[cfg(feature = "native")]
pub use native::NativeWebSocket;

use thiserror::Error;

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Already connected")]
    AlreadyOpen,
    #[error("Not connected")]
    NotOpen,
    #[error("Channel closed: {0}")]
    ChannelClosed(String),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Lifecycle and data events reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The channel finished opening.
    Opened,
    /// A text frame arrived.
    Frame(String),
    /// The channel closed.
    Closed { reason: String },
    /// The channel could not be established.
    Failed { reason: String },
}

/// A single bidirectional text channel.
///
/// `open` fails synchronously only when the channel cannot even be
/// constructed; a failed handshake is reported later as
/// [`TransportEvent::Failed`]. After `close`, no event from the closed channel
/// is ever returned by `poll`.
pub trait Transport {
    /// Start opening a channel to `url`.
    fn open(&mut self, url: &str) -> TransportResult<()>;

    /// Write one text frame.
    fn send(&mut self, frame: &str) -> TransportResult<()>;

    /// Close the channel, if any.
    fn close(&mut self);

    /// Drain pending events (non-blocking).
    fn poll(&mut self) -> Vec<TransportEvent>;
}
