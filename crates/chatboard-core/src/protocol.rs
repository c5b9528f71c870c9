//! Wire protocol for the realtime channel.
//!
//! Every frame is a JSON text message:
//! ```json
//! { "type": "MESSAGE", "payload": { "username": "alice", "text": "hi" }, "timestamp": "10:00" }
//! ```
//!
//! Outgoing intents are [`ClientMessage`]s. Incoming frames decode into an
//! [`Event`]; payload fields are read leniently (missing values default to
//! empty) and kinds this client does not know are kept as
//! [`EventBody::Unknown`] instead of being dropped.

use std::fmt;

use kurbo::Point;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

/// Text used when the server reports an error without any detail.
pub const DEFAULT_ERROR_TEXT: &str = "An error occurred";

/// Codec errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Frame has no message type")]
    MissingType,
    #[error("{kind} frame is missing `{field}`")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },
}

/// Result type for codec operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Message kinds carried in the `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Join,
    Message,
    Typing,
    StopTyping,
    UserListUpdate,
    Error,
    FileUpload,
    VoiceMessage,
    WhiteboardDraw,
    WhiteboardClear,
    System,
    /// Any kind not listed above, kept verbatim.
    Other(String),
}

impl EventKind {
    /// Parse the wire name of a kind.
    pub fn parse(name: &str) -> Self {
        match name {
            "JOIN" => Self::Join,
            "MESSAGE" => Self::Message,
            "TYPING" => Self::Typing,
            "STOP_TYPING" => Self::StopTyping,
            "USER_LIST_UPDATE" => Self::UserListUpdate,
            "ERROR" => Self::Error,
            "FILE_UPLOAD" => Self::FileUpload,
            "VOICE_MESSAGE" => Self::VoiceMessage,
            "WHITEBOARD_DRAW" => Self::WhiteboardDraw,
            "WHITEBOARD_CLEAR" => Self::WhiteboardClear,
            "SYSTEM" => Self::System,
            other => Self::Other(other.to_string()),
        }
    }

    /// Wire name of this kind.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Join => "JOIN",
            Self::Message => "MESSAGE",
            Self::Typing => "TYPING",
            Self::StopTyping => "STOP_TYPING",
            Self::UserListUpdate => "USER_LIST_UPDATE",
            Self::Error => "ERROR",
            Self::FileUpload => "FILE_UPLOAD",
            Self::VoiceMessage => "VOICE_MESSAGE",
            Self::WhiteboardDraw => "WHITEBOARD_DRAW",
            Self::WhiteboardClear => "WHITEBOARD_CLEAR",
            Self::System => "SYSTEM",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drawing tool carried with each stroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    #[default]
    Pen,
    /// Paints in the surface background color.
    Eraser,
}

fn default_color() -> String {
    crate::whiteboard::DEFAULT_COLOR.to_string()
}

fn default_line_width() -> f64 {
    crate::whiteboard::DEFAULT_LINE_WIDTH
}

// Stroke attributes from other clients fall back to defaults instead of
// rejecting the whole stroke.

fn lenient_color<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(color) if !color.is_empty() => color,
        _ => default_color(),
    })
}

fn lenient_line_width<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    Ok(Value::deserialize(d)?
        .as_f64()
        .filter(|w| w.is_finite() && *w > 0.0)
        .unwrap_or_else(default_line_width))
}

/// Anything but `"eraser"` draws as a pen.
fn lenient_tool<'de, D: Deserializer<'de>>(d: D) -> Result<Tool, D::Error> {
    Ok(match Value::deserialize(d)?.as_str() {
        Some("eraser") => Tool::Eraser,
        _ => Tool::Pen,
    })
}

/// One completed stroke as exchanged in WHITEBOARD_DRAW frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawData {
    /// Canvas-relative points in capture order.
    pub points: Vec<Point>,
    #[serde(default = "default_color", deserialize_with = "lenient_color")]
    pub color: String,
    #[serde(
        rename = "lineWidth",
        default = "default_line_width",
        deserialize_with = "lenient_line_width"
    )]
    pub line_width: f64,
    #[serde(default, deserialize_with = "lenient_tool")]
    pub tool: Tool,
}

/// Descriptor of an uploaded file, as announced by the server.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Attachment {
    pub filename: String,
    pub username: String,
    pub url: String,
    /// Human-readable size, e.g. `"12.4 KB"`.
    pub filesize: String,
}

/// Descriptor of an uploaded voice clip.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VoiceAttachment {
    #[serde(flatten)]
    pub file: Attachment,
    /// Clip length formatted `m:ss`.
    #[serde(default)]
    pub duration: String,
}

/// Intents sent by this client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    Join {
        username: String,
    },
    Message {
        text: String,
    },
    Typing {},
    StopTyping {},
    WhiteboardDraw {
        username: String,
        #[serde(rename = "drawData")]
        draw_data: DrawData,
    },
    WhiteboardClear {
        username: String,
    },
}

impl ClientMessage {
    /// Encode to a JSON text frame.
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a frame sent by a client.
    pub fn from_json(text: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// The kind this intent is sent as.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Join { .. } => EventKind::Join,
            Self::Message { .. } => EventKind::Message,
            Self::Typing {} => EventKind::Typing,
            Self::StopTyping {} => EventKind::StopTyping,
            Self::WhiteboardDraw { .. } => EventKind::WhiteboardDraw,
            Self::WhiteboardClear { .. } => EventKind::WhiteboardClear,
        }
    }
}

/// Decoded payload of an incoming frame.
#[derive(Debug, Clone, PartialEq)]
pub enum EventBody {
    Join { username: String },
    Message { username: String, text: String },
    Typing { username: String },
    StopTyping { username: String },
    UserListUpdate { users: Vec<String> },
    Error { text: String },
    FileUpload(Attachment),
    VoiceMessage(VoiceAttachment),
    WhiteboardDraw { username: String, draw: DrawData },
    WhiteboardClear { username: String },
    /// Server notice such as "alice joined the chat".
    System { text: String },
    Unknown { kind: String, payload: Value },
}

impl EventBody {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Join { .. } => EventKind::Join,
            Self::Message { .. } => EventKind::Message,
            Self::Typing { .. } => EventKind::Typing,
            Self::StopTyping { .. } => EventKind::StopTyping,
            Self::UserListUpdate { .. } => EventKind::UserListUpdate,
            Self::Error { .. } => EventKind::Error,
            Self::FileUpload(_) => EventKind::FileUpload,
            Self::VoiceMessage(_) => EventKind::VoiceMessage,
            Self::WhiteboardDraw { .. } => EventKind::WhiteboardDraw,
            Self::WhiteboardClear { .. } => EventKind::WhiteboardClear,
            Self::System { .. } => EventKind::System,
            Self::Unknown { kind, .. } => EventKind::Other(kind.clone()),
        }
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub body: EventBody,
    /// Server-assigned timestamp, if any.
    pub timestamp: Option<String>,
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    timestamp: Option<String>,
}

impl Event {
    /// Create an event without a timestamp.
    pub fn new(body: EventBody) -> Self {
        Self {
            body,
            timestamp: None,
        }
    }

    /// Attach a server timestamp.
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    pub fn kind(&self) -> EventKind {
        self.body.kind()
    }

    /// Decode an incoming text frame.
    pub fn from_json(text: &str) -> ProtocolResult<Self> {
        let raw: RawFrame = serde_json::from_str(text)?;
        let kind = raw.kind.ok_or(ProtocolError::MissingType)?;
        let payload = raw.payload;

        let body = match EventKind::parse(&kind) {
            EventKind::Join => EventBody::Join {
                username: text_field(&payload, "username"),
            },
            EventKind::Message => EventBody::Message {
                username: text_field(&payload, "username"),
                text: text_field(&payload, "text"),
            },
            EventKind::Typing => EventBody::Typing {
                username: text_field(&payload, "username"),
            },
            EventKind::StopTyping => EventBody::StopTyping {
                username: text_field(&payload, "username"),
            },
            EventKind::UserListUpdate => EventBody::UserListUpdate {
                users: text_list(&payload, "users"),
            },
            EventKind::Error => {
                let text = text_field(&payload, "text");
                EventBody::Error {
                    text: if text.is_empty() {
                        DEFAULT_ERROR_TEXT.to_string()
                    } else {
                        text
                    },
                }
            }
            EventKind::FileUpload => EventBody::FileUpload(attachment(&payload)),
            EventKind::VoiceMessage => EventBody::VoiceMessage(VoiceAttachment {
                file: attachment(&payload),
                duration: text_field(&payload, "duration"),
            }),
            EventKind::WhiteboardDraw => {
                let draw = payload
                    .get("drawData")
                    .filter(|v| !v.is_null())
                    .ok_or(ProtocolError::MissingField {
                        kind: "WHITEBOARD_DRAW",
                        field: "drawData",
                    })?;
                EventBody::WhiteboardDraw {
                    username: text_field(&payload, "username"),
                    draw: DrawData::deserialize(draw)?,
                }
            }
            EventKind::WhiteboardClear => EventBody::WhiteboardClear {
                username: text_field(&payload, "username"),
            },
            EventKind::System => EventBody::System {
                text: text_field(&payload, "text"),
            },
            EventKind::Other(kind) => EventBody::Unknown {
                kind,
                payload: payload.clone(),
            },
        };

        Ok(Self {
            body,
            timestamp: raw.timestamp,
        })
    }

    /// Encode back into a text frame.
    pub fn to_json(&self) -> ProtocolResult<String> {
        let payload = match &self.body {
            EventBody::Join { username }
            | EventBody::Typing { username }
            | EventBody::StopTyping { username }
            | EventBody::WhiteboardClear { username } => json!({ "username": username }),
            EventBody::Message { username, text } => {
                json!({ "username": username, "text": text })
            }
            EventBody::UserListUpdate { users } => json!({ "users": users }),
            EventBody::Error { text } | EventBody::System { text } => json!({ "text": text }),
            EventBody::FileUpload(file) => serde_json::to_value(file)?,
            EventBody::VoiceMessage(voice) => serde_json::to_value(voice)?,
            EventBody::WhiteboardDraw { username, draw } => {
                json!({ "username": username, "drawData": serde_json::to_value(draw)? })
            }
            EventBody::Unknown { payload, .. } => payload.clone(),
        };

        let mut frame = Map::new();
        frame.insert("type".into(), Value::String(self.kind().as_str().to_string()));
        frame.insert("payload".into(), payload);
        if let Some(timestamp) = &self.timestamp {
            frame.insert("timestamp".into(), Value::String(timestamp.clone()));
        }
        Ok(serde_json::to_string(&Value::Object(frame))?)
    }
}

impl From<ClientMessage> for EventBody {
    /// The body a server relays for an intent, with `username` filled in for
    /// intents that do not carry it.
    fn from(msg: ClientMessage) -> Self {
        match msg {
            ClientMessage::Join { username } => Self::Join { username },
            ClientMessage::Message { text } => Self::Message {
                username: String::new(),
                text,
            },
            ClientMessage::Typing {} => Self::Typing {
                username: String::new(),
            },
            ClientMessage::StopTyping {} => Self::StopTyping {
                username: String::new(),
            },
            ClientMessage::WhiteboardDraw {
                username,
                draw_data,
            } => Self::WhiteboardDraw {
                username,
                draw: draw_data,
            },
            ClientMessage::WhiteboardClear { username } => Self::WhiteboardClear { username },
        }
    }
}

/// Read a string field; numbers are accepted and stringified, anything else is empty.
fn text_field(payload: &Value, key: &str) -> String {
    match payload.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Read a list of strings; a missing or non-array field is an empty list.
fn text_list(payload: &Value, key: &str) -> Vec<String> {
    payload
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn attachment(payload: &Value) -> Attachment {
    Attachment {
        filename: text_field(payload, "filename"),
        username: text_field(payload, "username"),
        url: text_field(payload, "url"),
        filesize: text_field(payload, "filesize"),
    }
}

/// Shorten a frame for log output without splitting a UTF-8 character.
pub fn preview(frame: &str) -> &str {
    const MAX: usize = 100;
    match frame.char_indices().nth(MAX) {
        Some((idx, _)) => &frame[..idx],
        None => frame,
    }
}
