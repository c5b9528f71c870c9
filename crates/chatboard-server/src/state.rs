//! Shared relay state: joined users, history, uploaded files.
//!
//! Every handler returns the [`Envelope`]s it wants delivered instead of
//! writing to sockets, so the protocol rules can be tested without a network.
//! Envelopes go out on one broadcast channel; each connection picks the ones
//! addressed to it.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use chatboard_core::protocol::{Attachment, Event, EventBody, VoiceAttachment};
use chatboard_core::upload::{UploadReceipt, readable_size};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;

/// Logged events replayed to a new joiner.
pub const MAX_HISTORY: usize = 100;
const CHANNEL_CAPACITY: usize = 256;
/// Largest accepted upload.
pub const MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;
/// Accepted voice clip extensions.
pub const VOICE_EXTENSIONS: [&str; 6] = ["webm", "mp3", "ogg", "wav", "m4a", "aac"];

pub type PeerId = Uuid;

/// Who a frame is for. "Everyone" means every joined user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Peer(PeerId),
    Everyone,
    EveryoneExcept(PeerId),
}

/// A frame and its recipients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub target: Target,
    pub frame: String,
}

impl Envelope {
    /// Whether connection `peer` should deliver this frame.
    pub fn is_for(&self, peer: PeerId, joined: bool) -> bool {
        match self.target {
            Target::Peer(to) => to == peer,
            Target::Everyone => joined,
            Target::EveryoneExcept(from) => joined && from != peer,
        }
    }
}

/// Upload endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    File,
    Voice,
}

/// A multipart upload as received.
#[derive(Debug, Clone)]
pub struct Upload {
    pub kind: UploadKind,
    pub username: String,
    pub filename: Option<String>,
    pub data: Option<Bytes>,
    pub duration: Option<String>,
}

/// Why an upload was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadRejection {
    #[error("No file uploaded!")]
    MissingFile,
    #[error("Username is required and cannot be empty.")]
    MissingUsername,
    #[error("Invalid audio format. Supported: webm, mp3, ogg, wav, m4a, aac")]
    InvalidAudioFormat,
    #[error("{0} too large (max 5MB)")]
    TooLarge(&'static str),
}

impl UploadRejection {
    pub fn status(&self) -> u16 {
        match self {
            Self::TooLarge(_) => 413,
            _ => 400,
        }
    }
}

/// An uploaded file kept in memory.
#[derive(Debug, Clone)]
pub struct StoredFile {
    /// Name as uploaded.
    pub name: String,
    pub data: Bytes,
}

/// Shared state for all connections.
pub struct ChatServer {
    /// Joined users in join order.
    users: Mutex<Vec<(PeerId, String)>>,
    history: Mutex<VecDeque<String>>,
    files: DashMap<String, StoredFile>,
    tx: broadcast::Sender<Envelope>,
}

impl Default for ChatServer {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn now() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

fn envelope(target: Target, event: Event) -> Option<Envelope> {
    match event.to_json() {
        Ok(frame) => Some(Envelope { target, frame }),
        Err(e) => {
            warn!("Failed to encode {} frame: {}", event.kind(), e);
            None
        }
    }
}

fn error_to(peer: PeerId, text: impl Into<String>) -> Vec<Envelope> {
    envelope(Target::Peer(peer), Event::new(EventBody::Error { text: text.into() }))
        .into_iter()
        .collect()
}

/// Replace anything outside `[A-Za-z0-9._-]` and cap the length.
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(100)
        .collect()
}

impl ChatServer {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            users: Mutex::new(Vec::new()),
            history: Mutex::new(VecDeque::new()),
            files: DashMap::new(),
            tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    /// Send envelopes to the connections they are addressed to.
    pub fn publish(&self, envelopes: Vec<Envelope>) {
        for envelope in envelopes {
            // No receivers just means nobody is connected.
            let _ = self.tx.send(envelope);
        }
    }

    pub fn username(&self, peer: PeerId) -> Option<String> {
        lock(&self.users)
            .iter()
            .find(|(id, _)| *id == peer)
            .map(|(_, name)| name.clone())
    }

    pub fn users(&self) -> Vec<String> {
        lock(&self.users).iter().map(|(_, name)| name.clone()).collect()
    }

    fn save(&self, envelope: &Envelope) {
        let mut history = lock(&self.history);
        history.push_back(envelope.frame.clone());
        while history.len() > MAX_HISTORY {
            history.pop_front();
        }
    }

    fn user_list(&self) -> Option<Envelope> {
        envelope(
            Target::Everyone,
            Event::new(EventBody::UserListUpdate { users: self.users() }),
        )
    }

    fn system(&self, target: Target, text: String) -> Option<Envelope> {
        let env = envelope(target, Event::new(EventBody::System { text }).with_timestamp(now()))?;
        self.save(&env);
        Some(env)
    }

    /// Handle one text frame from `peer`.
    pub fn handle_text(&self, peer: PeerId, text: &str) -> Vec<Envelope> {
        let event = match Event::from_json(text) {
            Ok(event) => event,
            Err(e) => {
                warn!("Invalid message from {}: {}", peer, e);
                return error_to(peer, "Invalid message format");
            }
        };

        match event.body {
            EventBody::Join { username } => self.join(peer, username),
            EventBody::Message { text, .. } => {
                let Some(username) = self.username(peer) else {
                    return error_to(peer, "Please join the chat first");
                };
                if text.trim().is_empty() {
                    return Vec::new();
                }
                let body = EventBody::Message { username, text };
                let env = envelope(Target::Everyone, Event::new(body).with_timestamp(now()));
                if let Some(env) = &env {
                    self.save(env);
                }
                env.into_iter().collect()
            }
            EventBody::Typing { .. } | EventBody::StopTyping { .. } => {
                let Some(username) = self.username(peer) else {
                    return Vec::new();
                };
                let body = match event.body {
                    EventBody::Typing { .. } => EventBody::Typing { username },
                    _ => EventBody::StopTyping { username },
                };
                envelope(Target::EveryoneExcept(peer), Event::new(body))
                    .into_iter()
                    .collect()
            }
            EventBody::WhiteboardDraw { draw, .. } => {
                let Some(username) = self.username(peer) else {
                    return error_to(peer, "Please join the chat first");
                };
                envelope(
                    Target::EveryoneExcept(peer),
                    Event::new(EventBody::WhiteboardDraw { username, draw }),
                )
                .into_iter()
                .collect()
            }
            EventBody::WhiteboardClear { .. } => {
                let Some(username) = self.username(peer) else {
                    return error_to(peer, "Please join the chat first");
                };
                envelope(
                    Target::Everyone,
                    Event::new(EventBody::WhiteboardClear { username }),
                )
                .into_iter()
                .collect()
            }
            other => error_to(peer, format!("Unknown message type: {}", other.kind())),
        }
    }

    fn join(&self, peer: PeerId, username: String) -> Vec<Envelope> {
        let username = username.trim().to_string();
        if username.is_empty() {
            return error_to(peer, "Username cannot be empty");
        }

        {
            let mut users = lock(&self.users);
            if users.iter().any(|(_, name)| *name == username) {
                return error_to(peer, format!("Username '{}' is already taken", username));
            }
            match users.iter_mut().find(|(id, _)| *id == peer) {
                Some(entry) => entry.1 = username.clone(),
                None => users.push((peer, username.clone())),
            }
            info!("{} joined the chat (Total users: {})", username, users.len());
        }

        let mut out: Vec<Envelope> = lock(&self.history)
            .iter()
            .map(|frame| Envelope {
                target: Target::Peer(peer),
                frame: frame.clone(),
            })
            .collect();
        out.extend(self.user_list());
        out.extend(self.system(Target::Everyone, format!("{} joined the chat", username)));
        out
    }

    /// Forget `peer` when its connection closes.
    pub fn leave(&self, peer: PeerId) -> Vec<Envelope> {
        let removed = {
            let mut users = lock(&self.users);
            let idx = users.iter().position(|(id, _)| *id == peer);
            idx.map(|idx| users.remove(idx).1)
        };
        let Some(username) = removed else {
            return Vec::new();
        };
        info!("{} left the chat (Remaining: {})", username, self.users().len());

        let mut out = Vec::new();
        out.extend(self.user_list());
        out.extend(self.system(
            Target::EveryoneExcept(peer),
            format!("{} left the chat", username),
        ));
        out
    }

    /// Store an upload and build its announcement. `base_url` is the
    /// externally visible `scheme://host` of this server.
    pub fn register_upload(
        &self,
        upload: Upload,
        base_url: &str,
    ) -> Result<(UploadReceipt, Vec<Envelope>), UploadRejection> {
        let data = upload.data.ok_or(UploadRejection::MissingFile)?;
        let username = upload.username.trim().to_string();
        if username.is_empty() {
            return Err(UploadRejection::MissingUsername);
        }

        let name = match (upload.kind, upload.filename) {
            (_, Some(name)) if !name.is_empty() => name,
            (UploadKind::File, _) => "file".to_string(),
            (UploadKind::Voice, _) => "voice-message.webm".to_string(),
        };

        if upload.kind == UploadKind::Voice {
            let ext = name.rsplit('.').next().unwrap_or_default().to_lowercase();
            if !VOICE_EXTENSIONS.contains(&ext.as_str()) {
                return Err(UploadRejection::InvalidAudioFormat);
            }
        }

        if data.len() > MAX_UPLOAD_BYTES {
            return Err(UploadRejection::TooLarge(match upload.kind {
                UploadKind::File => "File",
                UploadKind::Voice => "Voice file",
            }));
        }

        let id = format!("{}_{}", Uuid::new_v4().simple(), sanitize_filename(&name));
        let filesize = readable_size(data.len() as u64);
        self.files.insert(
            id.clone(),
            StoredFile {
                name: name.clone(),
                data,
            },
        );

        let file = Attachment {
            filename: name.clone(),
            username: username.clone(),
            url: format!("{}/download/{}", base_url.trim_end_matches('/'), id),
            filesize,
        };
        let (message, body) = match upload.kind {
            UploadKind::File => {
                info!("File uploaded by {}: {}", username, name);
                ("File uploaded successfully", EventBody::FileUpload(file))
            }
            UploadKind::Voice => {
                let duration = upload
                    .duration
                    .filter(|d| !d.is_empty())
                    .unwrap_or_else(|| "0:00".to_string());
                info!("Voice message uploaded by {} (duration: {})", username, duration);
                (
                    "Voice message uploaded successfully",
                    EventBody::VoiceMessage(VoiceAttachment { file, duration }),
                )
            }
        };

        let receipt = UploadReceipt {
            message: message.to_string(),
            filename: name,
        };
        let announce = envelope(Target::Everyone, Event::new(body).with_timestamp(now()));
        Ok((receipt, announce.into_iter().collect()))
    }

    pub fn download(&self, id: &str) -> Option<StoredFile> {
        self.files.get(id).map(|file| file.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use chatboard_core::protocol::EventKind;

    use super::*;

    fn kinds(envelopes: &[Envelope]) -> Vec<(Target, EventKind)> {
        envelopes
            .iter()
            .map(|e| (e.target, Event::from_json(&e.frame).unwrap().kind()))
            .collect()
    }

    fn join(server: &ChatServer, name: &str) -> (PeerId, Vec<Envelope>) {
        let peer = Uuid::new_v4();
        let out = server.handle_text(
            peer,
            &format!(r#"{{"type":"JOIN","payload":{{"username":"{}"}}}}"#, name),
        );
        (peer, out)
    }

    fn error_text(envelopes: &[Envelope]) -> String {
        match &Event::from_json(&envelopes[0].frame).unwrap().body {
            EventBody::Error { text } => text.clone(),
            other => panic!("Expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_join_sends_user_list_and_notice() {
        let server = ChatServer::new();
        let (_, out) = join(&server, "alice");
        assert_eq!(
            kinds(&out),
            vec![
                (Target::Everyone, EventKind::UserListUpdate),
                (Target::Everyone, EventKind::System),
            ]
        );
        assert_eq!(server.users(), vec!["alice".to_string()]);
    }

    #[test]
    fn test_join_replays_history() {
        let server = ChatServer::new();
        let (alice, _) = join(&server, "alice");
        server.handle_text(alice, r#"{"type":"MESSAGE","payload":{"text":"hi"}}"#);

        let (bob, out) = join(&server, "bob");
        let replay: Vec<_> = out
            .iter()
            .filter(|e| e.target == Target::Peer(bob))
            .map(|e| Event::from_json(&e.frame).unwrap().body)
            .collect();
        assert_eq!(replay.len(), 2);
        assert_eq!(
            replay[1],
            EventBody::Message {
                username: "alice".to_string(),
                text: "hi".to_string()
            }
        );
    }

    #[test]
    fn test_history_is_capped() {
        let server = ChatServer::new();
        let (alice, _) = join(&server, "alice");
        for i in 0..150 {
            server.handle_text(
                alice,
                &format!(r#"{{"type":"MESSAGE","payload":{{"text":"m{}"}}}}"#, i),
            );
        }
        let (bob, out) = join(&server, "bob");
        let replayed = out.iter().filter(|e| e.target == Target::Peer(bob)).count();
        assert_eq!(replayed, MAX_HISTORY);
    }

    #[test]
    fn test_join_rejections() {
        let server = ChatServer::new();
        let (_, out) = join(&server, "  ");
        assert_eq!(error_text(&out), "Username cannot be empty");

        join(&server, "alice");
        let (peer, out) = join(&server, "alice");
        assert_eq!(out[0].target, Target::Peer(peer));
        assert_eq!(error_text(&out), "Username 'alice' is already taken");
        assert_eq!(server.users().len(), 1);
    }

    #[test]
    fn test_message_rules() {
        let server = ChatServer::new();
        let stranger = Uuid::new_v4();
        let out = server.handle_text(stranger, r#"{"type":"MESSAGE","payload":{"text":"hi"}}"#);
        assert_eq!(error_text(&out), "Please join the chat first");

        let (alice, _) = join(&server, "alice");
        assert!(server
            .handle_text(alice, r#"{"type":"MESSAGE","payload":{"text":"   "}}"#)
            .is_empty());

        let out = server.handle_text(
            alice,
            r#"{"type":"MESSAGE","payload":{"username":"mallory","text":"hi"}}"#,
        );
        assert_eq!(out[0].target, Target::Everyone);
        let event = Event::from_json(&out[0].frame).unwrap();
        assert_eq!(
            event.body,
            EventBody::Message {
                username: "alice".to_string(),
                text: "hi".to_string()
            }
        );
        assert_eq!(event.timestamp.map(|t| t.len()), Some(8));
    }

    #[test]
    fn test_typing_and_whiteboard_relay() {
        let server = ChatServer::new();
        let (alice, _) = join(&server, "alice");

        let out = server.handle_text(alice, r#"{"type":"TYPING","payload":{}}"#);
        assert_eq!(kinds(&out), vec![(Target::EveryoneExcept(alice), EventKind::Typing)]);
        assert_eq!(
            Event::from_json(&out[0].frame).unwrap().body,
            EventBody::Typing {
                username: "alice".to_string()
            }
        );

        let out = server.handle_text(
            alice,
            r#"{"type":"WHITEBOARD_DRAW","payload":{"username":"alice","drawData":{"points":[{"x":1,"y":1},{"x":2,"y":2}]}}}"#,
        );
        assert_eq!(
            kinds(&out),
            vec![(Target::EveryoneExcept(alice), EventKind::WhiteboardDraw)]
        );

        let out = server.handle_text(alice, r#"{"type":"WHITEBOARD_CLEAR","payload":{}}"#);
        assert_eq!(kinds(&out), vec![(Target::Everyone, EventKind::WhiteboardClear)]);

        let stranger = Uuid::new_v4();
        assert!(server
            .handle_text(stranger, r#"{"type":"TYPING","payload":{}}"#)
            .is_empty());
    }

    #[test]
    fn test_bad_frames() {
        let server = ChatServer::new();
        let peer = Uuid::new_v4();
        assert_eq!(
            error_text(&server.handle_text(peer, "garbage")),
            "Invalid message format"
        );
        assert_eq!(
            error_text(&server.handle_text(peer, r#"{"type":"DANCE","payload":{}}"#)),
            "Unknown message type: DANCE"
        );
    }

    #[test]
    fn test_leave_notifies_others() {
        let server = ChatServer::new();
        let (alice, _) = join(&server, "alice");
        join(&server, "bob");

        let out = server.leave(alice);
        assert_eq!(
            kinds(&out),
            vec![
                (Target::Everyone, EventKind::UserListUpdate),
                (Target::EveryoneExcept(alice), EventKind::System),
            ]
        );
        assert_eq!(server.users(), vec!["bob".to_string()]);
        assert!(server.leave(alice).is_empty());
    }

    #[test]
    fn test_envelope_targets() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let frame = String::new();
        let direct = Envelope { target: Target::Peer(me), frame: frame.clone() };
        let all = Envelope { target: Target::Everyone, frame: frame.clone() };
        let others = Envelope { target: Target::EveryoneExcept(me), frame };

        assert!(direct.is_for(me, false));
        assert!(!direct.is_for(other, true));
        assert!(all.is_for(me, true));
        assert!(!all.is_for(me, false));
        assert!(!others.is_for(me, true));
        assert!(others.is_for(other, true));
    }

    #[test]
    fn test_upload_and_download() {
        let server = ChatServer::new();
        let upload = Upload {
            kind: UploadKind::File,
            username: "alice".to_string(),
            filename: Some("my notes.txt".to_string()),
            data: Some(Bytes::from_static(b"hello")),
            duration: None,
        };
        let (receipt, out) = server
            .register_upload(upload, "http://localhost:7070")
            .unwrap();
        assert_eq!(receipt.message, "File uploaded successfully");
        assert_eq!(receipt.filename, "my notes.txt");

        let event = Event::from_json(&out[0].frame).unwrap();
        let EventBody::FileUpload(file) = event.body else {
            panic!("Expected FILE_UPLOAD");
        };
        assert_eq!(file.filesize, "5.00 B");
        let id = file.url.rsplit('/').next().unwrap();
        assert!(id.ends_with("_my_notes.txt"));
        assert!(file.url.starts_with("http://localhost:7070/download/"));

        let stored = server.download(id).unwrap();
        assert_eq!(stored.name, "my notes.txt");
        assert_eq!(&stored.data[..], b"hello");
        assert!(server.download("missing").is_none());
    }

    #[test]
    fn test_upload_rejections() {
        let server = ChatServer::new();
        let base = Upload {
            kind: UploadKind::Voice,
            username: "alice".to_string(),
            filename: Some("clip.webm".to_string()),
            data: Some(Bytes::from_static(b"..")),
            duration: Some("0:03".to_string()),
        };

        let missing = Upload { data: None, ..base.clone() };
        assert_eq!(
            server.register_upload(missing, "").unwrap_err(),
            UploadRejection::MissingFile
        );

        let anonymous = Upload { username: " ".to_string(), ..base.clone() };
        assert_eq!(
            server.register_upload(anonymous, "").unwrap_err(),
            UploadRejection::MissingUsername
        );

        let text = Upload { filename: Some("clip.txt".to_string()), ..base.clone() };
        assert_eq!(
            server.register_upload(text, "").unwrap_err(),
            UploadRejection::InvalidAudioFormat
        );

        let big = Upload {
            data: Some(Bytes::from(vec![0u8; MAX_UPLOAD_BYTES + 1])),
            ..base.clone()
        };
        let err = server.register_upload(big, "").unwrap_err();
        assert_eq!(err.status(), 413);
        assert_eq!(err.to_string(), "Voice file too large (max 5MB)");

        let (receipt, out) = server.register_upload(base, "http://h").unwrap();
        assert_eq!(receipt.message, "Voice message uploaded successfully");
        match Event::from_json(&out[0].frame).unwrap().body {
            EventBody::VoiceMessage(voice) => assert_eq!(voice.duration, "0:03"),
            other => panic!("Wrong body: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let server = ChatServer::new();
        let mut rx = server.subscribe();
        let (_, out) = join(&server, "alice");
        server.publish(out.clone());

        for expected in out {
            assert_eq!(rx.recv().await.unwrap(), expected);
        }
    }
}
