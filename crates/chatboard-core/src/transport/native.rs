//! WebSocket transport backed by a background socket thread.

use std::io;
use std::net::TcpStream;
use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, connect};
use url::Url;

use super::{Transport, TransportError, TransportEvent, TransportResult};
use crate::protocol::preview;

const READ_TIMEOUT: Duration = Duration::from_millis(50);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Commands sent to the socket thread.
enum WsCommand {
    Send(String),
    Close,
}

/// Short read timeout on the underlying TCP stream, plain or TLS, so the socket
/// loop can service outgoing commands while the server is silent.
fn set_timeouts(stream: &mut MaybeTlsStream<TcpStream>) -> io::Result<()> {
    let tcp = match stream {
        MaybeTlsStream::Plain(tcp) => tcp,
        MaybeTlsStream::Rustls(tls) => tls.get_mut(),
        _ => return Ok(()),
    };
    tcp.set_read_timeout(Some(READ_TIMEOUT))?;
    tcp.set_write_timeout(Some(WRITE_TIMEOUT))
}

/// WebSocket client for native platforms.
///
/// The socket lives on its own thread; frames and lifecycle events come back
/// over a channel that [`Transport::poll`] drains. Closing drops the receiver,
/// so a superseded connection can never deliver events.
pub struct NativeWebSocket {
    /// Channel to send commands to the socket thread.
    cmd_tx: Option<Sender<WsCommand>>,
    /// Channel to receive events from the socket thread.
    event_rx: Option<Receiver<TransportEvent>>,
    _thread: Option<JoinHandle<()>>,
}

impl NativeWebSocket {
    /// Create a new disconnected client.
    pub fn new() -> Self {
        Self {
            cmd_tx: None,
            event_rx: None,
            _thread: None,
        }
    }
}

impl Default for NativeWebSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NativeWebSocket {
    fn drop(&mut self) {
        self.close();
    }
}

impl Transport for NativeWebSocket {
    fn open(&mut self, url: &str) -> TransportResult<()> {
        if self.cmd_tx.is_some() {
            return Err(TransportError::AlreadyOpen);
        }

        let parsed = Url::parse(url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
            return Err(TransportError::InvalidUrl(format!(
                "Invalid WebSocket URL scheme: {}",
                parsed.scheme()
            )));
        }

        let (cmd_tx, cmd_rx) = channel::<WsCommand>();
        let (event_tx, event_rx) = channel::<TransportEvent>();
        let url = url.to_string();

        let handle = thread::spawn(move || {
            log::info!("WebSocket thread: connecting to {}", url);

            let (mut socket, response) = match connect(&url) {
                Ok(pair) => pair,
                Err(e) => {
                    log::error!("WebSocket connection failed: {}", e);
                    let _ = event_tx.send(TransportEvent::Failed {
                        reason: e.to_string(),
                    });
                    return;
                }
            };

            log::info!("WebSocket connected, status: {}", response.status());
            if let Err(e) = set_timeouts(socket.get_mut()) {
                log::warn!("Failed to set socket timeouts: {}", e);
            }
            let _ = event_tx.send(TransportEvent::Opened);

            let reason = loop {
                match cmd_rx.try_recv() {
                    Ok(WsCommand::Send(frame)) => {
                        log::debug!("WebSocket sending: {}", preview(&frame));
                        if let Err(e) = socket.send(Message::Text(frame)) {
                            log::error!("WebSocket send error: {}", e);
                            break format!("send failed: {}", e);
                        }
                    }
                    Ok(WsCommand::Close) => {
                        log::info!("WebSocket close requested");
                        let _ = socket.close(None);
                        break "closed by client".to_string();
                    }
                    Err(TryRecvError::Disconnected) => {
                        let _ = socket.close(None);
                        break "client dropped".to_string();
                    }
                    Err(TryRecvError::Empty) => {}
                }

                match socket.read() {
                    Ok(Message::Text(text)) => {
                        log::debug!("WebSocket received: {}", preview(&text));
                        if event_tx.send(TransportEvent::Frame(text)).is_err() {
                            let _ = socket.close(None);
                            break "client dropped".to_string();
                        }
                    }
                    Ok(Message::Ping(data)) => {
                        let _ = socket.send(Message::Pong(data));
                    }
                    Ok(Message::Close(frame)) => {
                        log::info!("WebSocket received close frame");
                        break frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "closed by server".to_string());
                    }
                    Ok(_) => {}
                    Err(tungstenite::Error::Io(ref e))
                        if e.kind() == std::io::ErrorKind::WouldBlock
                            || e.kind() == std::io::ErrorKind::TimedOut =>
                    {
                        continue;
                    }
                    Err(e) => {
                        log::error!("WebSocket read error: {}", e);
                        break e.to_string();
                    }
                }
            };

            log::info!("WebSocket thread exiting");
            let _ = event_tx.send(TransportEvent::Closed { reason });
        });

        self.cmd_tx = Some(cmd_tx);
        self.event_rx = Some(event_rx);
        self._thread = Some(handle);
        Ok(())
    }

    fn send(&mut self, frame: &str) -> TransportResult<()> {
        let tx = self.cmd_tx.as_ref().ok_or(TransportError::NotOpen)?;
        tx.send(WsCommand::Send(frame.to_string()))
            .map_err(|e| TransportError::ChannelClosed(e.to_string()))
    }

    fn close(&mut self) {
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.send(WsCommand::Close);
        }
        self.event_rx = None;
        self._thread = None;
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        let Some(rx) = self.event_rx.as_ref() else {
            return Vec::new();
        };

        let mut events = Vec::new();
        let mut finished = false;
        loop {
            match rx.try_recv() {
                Ok(event) => {
                    finished |= matches!(
                        event,
                        TransportEvent::Closed { .. } | TransportEvent::Failed { .. }
                    );
                    events.push(event);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !finished {
                        events.push(TransportEvent::Closed {
                            reason: "socket thread ended".to_string(),
                        });
                    }
                    finished = true;
                    break;
                }
            }
        }

        if finished {
            // The thread is gone; release the handles so `open` can be called again.
            self.cmd_tx = None;
            self.event_rx = None;
            self._thread = None;
        }
        events
    }
}
