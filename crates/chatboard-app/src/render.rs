//! Plain-text rendering of chat state.

use chatboard_core::{ChatMessage, ConnectionState, MessageBody, MessageKind};

/// One log line for a chat message.
pub fn message_line(msg: &ChatMessage) -> String {
    let time = msg
        .timestamp
        .as_deref()
        .map(|t| format!("[{}] ", t))
        .unwrap_or_default();
    let sender = msg.sender.as_deref().unwrap_or("?");

    match (&msg.kind, &msg.body) {
        (MessageKind::System, MessageBody::Text(text)) => format!("{}* {}", time, text),
        (_, MessageBody::Text(text)) => format!("{}{}: {}", time, sender, text),
        (_, MessageBody::File(file)) => format!(
            "{}{} shared {} ({}) {}",
            time, sender, file.filename, file.filesize, file.url
        ),
        (_, MessageBody::Voice(voice)) => format!(
            "{}{} sent a voice message ({}, {}) {}",
            time, sender, voice.duration, voice.file.filesize, voice.file.url
        ),
        (MessageKind::Other(kind), MessageBody::Raw(payload)) => {
            format!("{}<{}> {}", time, kind, payload)
        }
        (_, MessageBody::Raw(payload)) => format!("{}{}", time, payload),
    }
}

/// Status line for typing users, or `None` when nobody is typing.
pub fn typing_line(typing: &[String]) -> Option<String> {
    match typing {
        [] => None,
        [one] => Some(format!("{} is typing...", one)),
        many => Some(format!("{} are typing...", many.join(", "))),
    }
}

pub fn state_label(state: ConnectionState) -> String {
    match state {
        ConnectionState::Disconnected => "disconnected".to_string(),
        ConnectionState::Connecting => "connecting".to_string(),
        ConnectionState::Open => "connected".to_string(),
        ConnectionState::Retrying { attempt } => format!("reconnecting (attempt {})", attempt),
        ConnectionState::GivenUp => "disconnected, use /reconnect".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use chatboard_core::protocol::{Attachment, VoiceAttachment};
    use serde_json::json;

    use super::*;

    fn text(kind: MessageKind, sender: Option<&str>, body: &str) -> ChatMessage {
        ChatMessage {
            kind,
            sender: sender.map(str::to_string),
            timestamp: Some("10:00".to_string()),
            body: MessageBody::Text(body.to_string()),
        }
    }

    #[test]
    fn test_text_and_system_lines() {
        assert_eq!(
            message_line(&text(MessageKind::Text, Some("alice"), "hi")),
            "[10:00] alice: hi"
        );
        assert_eq!(
            message_line(&text(MessageKind::System, None, "bob joined the chat")),
            "[10:00] * bob joined the chat"
        );
    }

    #[test]
    fn test_attachment_lines() {
        let file = Attachment {
            filename: "a.pdf".to_string(),
            username: "bob".to_string(),
            url: "http://h/download/1".to_string(),
            filesize: "1.00 KB".to_string(),
        };
        let msg = ChatMessage {
            kind: MessageKind::Voice,
            sender: Some("bob".to_string()),
            timestamp: None,
            body: MessageBody::Voice(VoiceAttachment {
                file,
                duration: "0:07".to_string(),
            }),
        };
        assert_eq!(
            message_line(&msg),
            "bob sent a voice message (0:07, 1.00 KB) http://h/download/1"
        );

        let raw = ChatMessage {
            kind: MessageKind::Other("POLL".to_string()),
            sender: None,
            timestamp: None,
            body: MessageBody::Raw(json!({ "q": 1 })),
        };
        assert_eq!(message_line(&raw), r#"<POLL> {"q":1}"#);
    }

    #[test]
    fn test_typing_line() {
        assert_eq!(typing_line(&[]), None);
        assert_eq!(
            typing_line(&["bob".to_string()]).as_deref(),
            Some("bob is typing...")
        );
        assert_eq!(
            typing_line(&["bob".to_string(), "carol".to_string()]).as_deref(),
            Some("bob, carol are typing...")
        );
    }
}
