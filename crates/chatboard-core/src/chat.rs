//! Local view of the conversation: message log, presence, typing and errors.

use serde_json::{Value, json};

use crate::protocol::{Attachment, Event, EventBody, VoiceAttachment};

/// Kind of a logged message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    File,
    Voice,
    System,
    /// Any other event kind appended as-is (JOIN echoes, unknown kinds).
    Other(String),
}

/// Content of a logged message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    Text(String),
    File(Attachment),
    Voice(VoiceAttachment),
    Raw(Value),
}

/// One entry in the message log.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub kind: MessageKind,
    pub sender: Option<String>,
    pub timestamp: Option<String>,
    pub body: MessageBody,
}

impl ChatMessage {
    /// Text content, if this is a text or system message.
    pub fn text(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Folded state of everything the server has told us.
#[derive(Debug, Clone, Default)]
pub struct ChatState {
    identity: Option<String>,
    messages: Vec<ChatMessage>,
    users: Vec<String>,
    typing: Vec<String>,
    error: Option<String>,
}

impl ChatState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the local username; it is never added to the typing set.
    pub fn set_identity(&mut self, identity: impl Into<String>) {
        self.identity = Some(identity.into());
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Online users in server order.
    pub fn users(&self) -> &[String] {
        &self.users
    }

    /// Users currently typing, in the order they started.
    pub fn typing(&self) -> &[String] {
        &self.typing
    }

    /// The most recent error, if not cleared.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn set_error(&mut self, text: impl Into<String>) {
        self.error = Some(text.into());
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    /// Drop the log, presence and typing sets. The error slot and identity
    /// are kept.
    pub fn reset(&mut self) {
        self.messages.clear();
        self.users.clear();
        self.typing.clear();
    }

    /// Fold one decoded event. Whiteboard events are not part of the chat
    /// view and are ignored here.
    pub fn apply(&mut self, event: &Event) {
        let timestamp = event.timestamp.clone();
        match &event.body {
            EventBody::UserListUpdate { users } => {
                self.users = users.clone();
            }
            EventBody::Typing { username } => {
                if username.is_empty() || self.identity.as_deref() == Some(username.as_str()) {
                    return;
                }
                if !self.typing.contains(username) {
                    self.typing.push(username.clone());
                }
            }
            EventBody::StopTyping { username } => {
                self.typing.retain(|u| u != username);
            }
            EventBody::Error { text } => {
                log::warn!("Server error: {}", text);
                self.error = Some(text.clone());
            }
            EventBody::Message { username, text } => self.push(ChatMessage {
                kind: MessageKind::Text,
                sender: Some(username.clone()),
                timestamp,
                body: MessageBody::Text(text.clone()),
            }),
            EventBody::System { text } => self.push(ChatMessage {
                kind: MessageKind::System,
                sender: None,
                timestamp,
                body: MessageBody::Text(text.clone()),
            }),
            EventBody::FileUpload(file) => self.push(ChatMessage {
                kind: MessageKind::File,
                sender: Some(file.username.clone()),
                timestamp,
                body: MessageBody::File(file.clone()),
            }),
            EventBody::VoiceMessage(voice) => self.push(ChatMessage {
                kind: MessageKind::Voice,
                sender: Some(voice.file.username.clone()),
                timestamp,
                body: MessageBody::Voice(voice.clone()),
            }),
            EventBody::Join { username } => self.push(ChatMessage {
                kind: MessageKind::Other(event.kind().to_string()),
                sender: Some(username.clone()),
                timestamp,
                body: MessageBody::Raw(json!({ "username": username })),
            }),
            EventBody::Unknown { kind, payload } => self.push(ChatMessage {
                kind: MessageKind::Other(kind.clone()),
                sender: payload
                    .get("username")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                timestamp,
                body: MessageBody::Raw(payload.clone()),
            }),
            EventBody::WhiteboardDraw { .. } | EventBody::WhiteboardClear { .. } => {}
        }
    }

    fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }
}
