//! Chatboard Core Library
//!
//! Session synchronization engine for a realtime group chat with a shared
//! whiteboard: connection lifecycle with reconnection, the JSON wire
//! protocol, presence and typing state, and stroke capture and replay.

pub mod chat;
pub mod client;
pub mod config;
pub mod protocol;
pub mod session;
pub mod timer;
pub mod transport;
pub mod typing;
pub mod upload;
pub mod whiteboard;

pub use chat::{ChatMessage, ChatState, MessageBody, MessageKind};
pub use client::ChatClient;
pub use config::{ClientConfig, ConfigError};
pub use protocol::{ClientMessage, DrawData, Event, EventBody, EventKind, ProtocolError, Tool};
pub use session::{ConnectionState, Session, SessionCommand, SessionError, SessionInput};
pub use timer::Timer;
pub use transport::{MemoryTransport, Transport, TransportError, TransportEvent};
pub use typing::TypingController;
pub use upload::{AttachmentError, AttachmentUploader, UploadReceipt, VoiceClip};
pub use whiteboard::{Surface, WhiteboardController};

#[cfg(feature = "native")]
pub use transport::NativeWebSocket;
#[cfg(feature = "native")]
pub use upload::HttpUploader;
