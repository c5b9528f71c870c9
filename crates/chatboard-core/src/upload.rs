//! Attachment uploads.
//!
//! Files and voice clips are not sent over the realtime channel. They are
//! posted to the server over HTTP, and the server announces them to everyone
//! with a FILE_UPLOAD or VOICE_MESSAGE event. Upload failures are returned to
//! the caller only and never affect the session.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upload errors.
#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("Upload failed: {0}")]
    Transport(String),
    #[error("Upload failed: {text}")]
    Rejected { status: u16, text: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Microphone permission denied")]
    MicrophonePermissionDenied,
}

/// Result type for uploads.
pub type AttachmentResult<T> = Result<T, AttachmentError>;

/// Server acknowledgement of an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub message: String,
    pub filename: String,
}

/// A finished audio recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceClip {
    pub filename: String,
    pub data: Vec<u8>,
    pub duration: Duration,
}

impl VoiceClip {
    pub fn new(filename: impl Into<String>, data: Vec<u8>, duration: Duration) -> Self {
        Self {
            filename: filename.into(),
            data,
            duration,
        }
    }

    /// Load a finished recording. The file name is kept for the upload.
    pub fn from_recording(path: &Path, duration: Duration) -> AttachmentResult<Self> {
        let data = std::fs::read(path).map_err(recording_error)?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "voice-message.webm".to_string());
        Ok(Self::new(filename, data, duration))
    }

    /// Duration as sent to the server, `m:ss`.
    pub fn duration_label(&self) -> String {
        format_duration(self.duration)
    }
}

/// A recording the user may not read is a denied capture, not an IO fault.
fn recording_error(e: std::io::Error) -> AttachmentError {
    match e.kind() {
        std::io::ErrorKind::PermissionDenied => AttachmentError::MicrophonePermissionDenied,
        _ => AttachmentError::Io(e),
    }
}

/// Format a clip length as `m:ss` (whole seconds, truncated).
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}

/// Human-readable byte count with two decimals, e.g. `"1.50 KB"`.
pub fn readable_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", size, UNITS[unit])
}

/// Posts attachments to the chat server.
pub trait AttachmentUploader {
    /// Upload a regular file on behalf of `username`.
    fn upload_file(
        &self,
        username: &str,
        filename: &str,
        data: Vec<u8>,
    ) -> AttachmentResult<UploadReceipt>;

    /// Upload a recorded voice clip on behalf of `username`.
    fn upload_voice(&self, username: &str, clip: VoiceClip) -> AttachmentResult<UploadReceipt>;

    /// Read `path` and upload it as a regular file.
    fn upload_path(&self, username: &str, path: &Path) -> AttachmentResult<UploadReceipt> {
        let data = std::fs::read(path)?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        self.upload_file(username, &filename, data)
    }
}

#[cfg(feature = "native")]
pub use http::HttpUploader;

#[cfg(feature = "native")]
mod http {
    use reqwest::blocking::{Client, multipart};

    use super::*;
    use crate::config::ClientConfig;

    /// Multipart HTTP uploader.
    #[derive(Debug, Clone)]
    pub struct HttpUploader {
        client: Client,
        upload_url: String,
        voice_url: String,
    }

    impl HttpUploader {
        pub fn new(upload_url: impl Into<String>, voice_url: impl Into<String>) -> Self {
            Self {
                client: Client::new(),
                upload_url: upload_url.into(),
                voice_url: voice_url.into(),
            }
        }

        pub fn from_config(config: &ClientConfig) -> Self {
            Self::new(config.upload_url(), config.voice_upload_url())
        }

        fn post(&self, url: &str, form: multipart::Form) -> AttachmentResult<UploadReceipt> {
            let response = self
                .client
                .post(url)
                .multipart(form)
                .send()
                .map_err(|e| AttachmentError::Transport(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let text = response
                    .text()
                    .map_err(|e| AttachmentError::Transport(e.to_string()))?;
                log::warn!("Upload to {} rejected with {}: {}", url, status, text);
                return Err(AttachmentError::Rejected {
                    status: status.as_u16(),
                    text,
                });
            }

            response
                .json::<UploadReceipt>()
                .map_err(|e| AttachmentError::Transport(e.to_string()))
        }
    }

    impl AttachmentUploader for HttpUploader {
        fn upload_file(
            &self,
            username: &str,
            filename: &str,
            data: Vec<u8>,
        ) -> AttachmentResult<UploadReceipt> {
            log::info!("Uploading {} ({})", filename, readable_size(data.len() as u64));
            let form = multipart::Form::new()
                .text("username", username.to_string())
                .part(
                    "file",
                    multipart::Part::bytes(data).file_name(filename.to_string()),
                );
            self.post(&self.upload_url, form)
        }

        fn upload_voice(&self, username: &str, clip: VoiceClip) -> AttachmentResult<UploadReceipt> {
            let duration = clip.duration_label();
            log::info!("Uploading voice clip {} ({})", clip.filename, duration);
            let form = multipart::Form::new()
                .text("username", username.to_string())
                .text("duration", duration)
                .part(
                    "file",
                    multipart::Part::bytes(clip.data).file_name(clip.filename),
                );
            self.post(&self.voice_url, form)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(0)), "0:00");
        assert_eq!(format_duration(Duration::from_millis(7900)), "0:07");
        assert_eq!(format_duration(Duration::from_secs(75)), "1:15");
        assert_eq!(format_duration(Duration::from_secs(600)), "10:00");
    }

    #[test]
    fn test_readable_size() {
        assert_eq!(readable_size(0), "0 B");
        assert_eq!(readable_size(512), "512.00 B");
        assert_eq!(readable_size(1536), "1.50 KB");
        assert_eq!(readable_size(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(readable_size(u64::MAX), "16777216.00 TB");
    }

    #[test]
    fn test_receipt_decodes() {
        let receipt: UploadReceipt = serde_json::from_str(
            r#"{"message":"File uploaded successfully","filename":"notes.txt"}"#,
        )
        .unwrap();
        assert_eq!(receipt.filename, "notes.txt");
    }

    #[test]
    fn test_upload_path_missing_file() {
        struct Never;
        impl AttachmentUploader for Never {
            fn upload_file(&self, _: &str, _: &str, _: Vec<u8>) -> AttachmentResult<UploadReceipt> {
                panic!("should not upload");
            }
            fn upload_voice(&self, _: &str, _: VoiceClip) -> AttachmentResult<UploadReceipt> {
                panic!("should not upload");
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let result = Never.upload_path("alice", &dir.path().join("missing.bin"));
        assert!(matches!(result, Err(AttachmentError::Io(_))));
    }

    #[test]
    fn test_voice_clip_from_recording() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.ogg");
        std::fs::write(&path, b"OggS").unwrap();

        let clip = VoiceClip::from_recording(&path, Duration::from_secs(65)).unwrap();
        assert_eq!(clip.filename, "clip.ogg");
        assert_eq!(clip.data, b"OggS");
        assert_eq!(clip.duration_label(), "1:05");

        let missing = VoiceClip::from_recording(&dir.path().join("none.ogg"), Duration::ZERO);
        assert!(matches!(missing, Err(AttachmentError::Io(_))));
    }

    #[test]
    fn test_denied_recording_is_microphone_error() {
        let denied = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(matches!(
            recording_error(denied),
            AttachmentError::MicrophonePermissionDenied
        ));
    }

    #[cfg(feature = "native")]
    #[test]
    fn test_unreachable_server_is_transport_error() {
        let uploader = HttpUploader::new("http://127.0.0.1:1/upload", "http://127.0.0.1:1/upload-voice");
        let result = uploader.upload_file("alice", "a.txt", b"hi".to_vec());
        assert!(matches!(result, Err(AttachmentError::Transport(_))));
    }
}
