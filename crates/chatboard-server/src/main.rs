//! Chatboard Relay Server
//!
//! Development server for the Chatboard client. Relays chat, presence,
//! typing and whiteboard frames between joined users and accepts file and
//! voice uploads over HTTP.
//!
//! Listens on plain HTTP only. Secure clients (`wss://`, port 7443 by
//! default) need a TLS-terminating proxy in front that sets
//! `X-Forwarded-Proto`, so download links are built with `https`.
//!
//! ## Protocol
//!
//! Every frame is a JSON object with a `type` and a `payload`:
//! ```json
//! { "type": "JOIN", "payload": { "username": "alice" } }
//! { "type": "MESSAGE", "payload": { "text": "hi" } }
//! { "type": "WHITEBOARD_DRAW", "payload": { "drawData": { "points": [...] } } }
//! ```

mod state;

use std::{env, error::Error, net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Multipart, Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::{ChatServer, MAX_UPLOAD_BYTES, Upload, UploadKind};

const DEFAULT_ADDR: &str = "0.0.0.0:7070";

type AppState = Arc<ChatServer>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatboard_server=info,tower_http=info".into()),
        )
        .init();

    let state: AppState = Arc::new(ChatServer::new());

    let app = Router::new()
        .route("/", get(index))
        .route("/chat", get(ws_handler))
        .route("/health", get(health))
        .route("/upload", post(upload_file))
        .route("/upload-voice", post(upload_voice))
        .route("/download/{id}", get(download))
        // Leave room for multipart framing so oversized files reach our own check.
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + 1024 * 1024))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = env::var("CHATBOARD_ADDR")
        .unwrap_or_else(|_| DEFAULT_ADDR.to_string())
        .parse()?;
    info!("Chatboard relay server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/chat", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Index page
async fn index() -> &'static str {
    "Chatboard Relay Server - Connect via WebSocket at /chat"
}

/// Health check
async fn health() -> &'static str {
    "ok"
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let peer = Uuid::new_v4();
    info!("New connection: {}", peer);

    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.subscribe();

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let out = state.handle_text(peer, text.as_str());
                        state.publish(out);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // Ignore binary and ping/pong
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", peer, e);
                        break;
                    }
                }
            }

            envelope = rx.recv() => {
                match envelope {
                    Ok(envelope) => {
                        let joined = state.username(peer).is_some();
                        if envelope.is_for(peer, joined)
                            && sender.send(Message::Text(envelope.frame.into())).await.is_err()
                        {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Connection {} lagged, dropped {} frames", peer, skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    state.publish(state.leave(peer));
    info!("Connection closed: {}", peer);
}

/// `scheme://host` as seen by the client.
fn base_url(headers: &HeaderMap) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    format!("{}://{}", scheme, host)
}

async fn read_upload(kind: UploadKind, mut multipart: Multipart) -> Result<Upload, Response> {
    let mut upload = Upload {
        kind,
        username: String::new(),
        filename: None,
        data: None,
        duration: None,
    };

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err((StatusCode::BAD_REQUEST, e.body_text()).into_response()),
        };
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                upload.filename = field.file_name().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| (StatusCode::BAD_REQUEST, e.body_text()).into_response())?;
                if !data.is_empty() {
                    upload.data = Some(data);
                }
            }
            "username" | "duration" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| (StatusCode::BAD_REQUEST, e.body_text()).into_response())?;
                if name == "username" {
                    upload.username = value;
                } else {
                    upload.duration = Some(value);
                }
            }
            _ => {}
        }
    }
    Ok(upload)
}

async fn accept_upload(
    kind: UploadKind,
    state: AppState,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    let upload = match read_upload(kind, multipart).await {
        Ok(upload) => upload,
        Err(response) => return response,
    };

    match state.register_upload(upload, &base_url(&headers)) {
        Ok((receipt, announce)) => {
            state.publish(announce);
            Json(receipt).into_response()
        }
        Err(rejection) => {
            warn!("Upload rejected: {}", rejection);
            let status =
                StatusCode::from_u16(rejection.status()).unwrap_or(StatusCode::BAD_REQUEST);
            (status, rejection.to_string()).into_response()
        }
    }
}

async fn upload_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    accept_upload(UploadKind::File, state, headers, multipart).await
}

async fn upload_voice(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    accept_upload(UploadKind::Voice, state, headers, multipart).await
}

fn valid_file_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

async fn download(Path(id): Path<String>, State(state): State<AppState>) -> Response {
    if !valid_file_id(&id) {
        return (StatusCode::BAD_REQUEST, "Invalid filename").into_response();
    }
    let Some(file) = state.download(&id) else {
        return (StatusCode::NOT_FOUND, "File not found").into_response();
    };

    let disposition = format!("attachment; filename=\"{}\"", file.name.replace('"', "_"));
    (
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        file.data,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_file_id() {
        assert!(valid_file_id("1a2b_notes.txt"));
        assert!(!valid_file_id("../etc/passwd"));
        assert!(!valid_file_id("a b"));
        assert!(!valid_file_id(""));
    }

    #[test]
    fn test_base_url() {
        let mut headers = HeaderMap::new();
        assert_eq!(base_url(&headers), "http://localhost");

        headers.insert(header::HOST, "chat.example.com".parse().unwrap());
        headers.insert("x-forwarded-proto", "https".parse().unwrap());
        assert_eq!(base_url(&headers), "https://chat.example.com");
    }
}
