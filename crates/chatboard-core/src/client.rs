//! Chat client facade.
//!
//! [`ChatClient`] wires the session state machine, the codec, the chat
//! reducer, the typing controller and the whiteboard together over one
//! [`Transport`]. It is single-threaded: the owner calls the input methods and
//! [`ChatClient::tick`] from its event loop, passing the current time.

use std::time::{Duration, Instant};

use kurbo::Point;

use crate::chat::ChatState;
use crate::config::ClientConfig;
use crate::protocol::{ClientMessage, Event, EventBody, preview};
use crate::session::{ConnectionState, Session, SessionCommand, SessionError, SessionInput};
use crate::timer::Timer;
use crate::transport::{Transport, TransportEvent};
use crate::typing::TypingController;
use crate::whiteboard::WhiteboardController;

/// Local wall-clock time in the server's timestamp format.
pub fn local_timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

/// A chat and whiteboard client bound to one transport.
pub struct ChatClient<T: Transport> {
    config: ClientConfig,
    transport: T,
    session: Session,
    chat: ChatState,
    typing: TypingController,
    whiteboard: WhiteboardController,
    /// Pending reconnection attempt.
    retry: Timer,
}

impl<T: Transport> ChatClient<T> {
    pub fn new(config: ClientConfig, transport: T) -> Self {
        Self {
            session: Session::new(config.backoff_policy()),
            typing: TypingController::new(config.typing_timeout()),
            whiteboard: WhiteboardController::new(config.canvas_width, config.canvas_height),
            chat: ChatState::new(),
            retry: Timer::new(),
            config,
            transport,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn is_open(&self) -> bool {
        self.session.is_open()
    }

    /// The username this client joins as.
    pub fn identity(&self) -> Option<&str> {
        self.session.identity()
    }

    pub fn chat(&self) -> &ChatState {
        &self.chat
    }

    pub fn whiteboard(&self) -> &WhiteboardController {
        &self.whiteboard
    }

    /// Brush settings and export go through the controller directly.
    pub fn whiteboard_mut(&mut self) -> &mut WhiteboardController {
        &mut self.whiteboard
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Earliest timer deadline, so the owner knows when to tick next.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.retry.deadline(), self.typing.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Time left before the pending reconnection attempt.
    pub fn retry_in(&self, now: Instant) -> Option<Duration> {
        self.retry.remaining(now)
    }

    // --- Session ---

    /// Join as `username`, replacing any current connection.
    pub fn connect(&mut self, username: &str, now: Instant) {
        log::info!("Connecting to {} as {}", self.config.realtime_url(), username);
        self.chat.set_identity(username);
        self.dispatch(
            SessionInput::Connect {
                identity: username.to_string(),
            },
            now,
        );
    }

    /// Leave the chat. No reconnection is attempted afterwards.
    pub fn disconnect(&mut self, now: Instant) {
        log::info!("Disconnecting");
        self.dispatch(SessionInput::Disconnect, now);
    }

    /// Drive timers and drain transport events. Returns true if any event
    /// was processed.
    pub fn tick(&mut self, now: Instant) -> bool {
        let mut changed = false;

        if self.retry.fire_if_due(now) {
            self.dispatch(SessionInput::RetryElapsed, now);
            changed = true;
        }

        if let Some(stop) = self.typing.poll(now, self.is_open()) {
            self.send_logged(&stop);
        }

        for event in self.transport.poll() {
            changed = true;
            match event {
                TransportEvent::Opened => self.dispatch(SessionInput::ChannelOpened, now),
                TransportEvent::Frame(text) => self.handle_frame(&text),
                TransportEvent::Closed { reason } => {
                    self.dispatch(SessionInput::ChannelClosed { reason }, now)
                }
                TransportEvent::Failed { reason } => {
                    self.dispatch(SessionInput::ChannelFailed { reason }, now)
                }
            }
        }

        changed
    }

    fn dispatch(&mut self, input: SessionInput, now: Instant) {
        let commands = self.session.handle(input);
        for command in commands {
            self.execute(command, now);
        }
    }

    fn execute(&mut self, command: SessionCommand, now: Instant) {
        match command {
            SessionCommand::OpenChannel => {
                let url = self.config.realtime_url();
                if let Err(e) = self.transport.open(&url) {
                    self.dispatch(
                        SessionInput::ChannelFailed {
                            reason: e.to_string(),
                        },
                        now,
                    );
                }
            }
            SessionCommand::CloseChannel => self.transport.close(),
            SessionCommand::Send(msg) => self.send_logged(&msg),
            SessionCommand::ScheduleRetry { delay, .. } => self.retry.start(now, delay),
            SessionCommand::CancelRetry => self.retry.cancel(),
            SessionCommand::ResetLocalState => {
                self.chat.reset();
                self.typing.cancel();
            }
            SessionCommand::ClearError => self.chat.clear_error(),
            SessionCommand::Report(err) => self.chat.set_error(err.to_string()),
        }
    }

    // --- Inbound ---

    fn handle_frame(&mut self, text: &str) {
        log::debug!("Received: {}", preview(text));
        let mut event = match Event::from_json(text) {
            Ok(event) => event,
            Err(e) => {
                log::warn!("{}", SessionError::MalformedFrame(e.to_string()));
                return;
            }
        };

        match &event.body {
            EventBody::WhiteboardDraw { draw, .. } => self.whiteboard.apply_remote(draw),
            EventBody::WhiteboardClear { .. } => self.whiteboard.apply_remote_clear(),
            EventBody::FileUpload(_) | EventBody::VoiceMessage(_) => {
                if event.timestamp.is_none() {
                    event.timestamp = Some(local_timestamp());
                }
                self.chat.apply(&event);
            }
            _ => self.chat.apply(&event),
        }
    }

    // --- Outbound ---

    fn send(&mut self, msg: &ClientMessage) -> Result<(), SessionError> {
        let kind = msg.kind().to_string();
        let frame = msg.to_json().map_err(|e| SessionError::SendFailed {
            kind: kind.clone(),
            reason: e.to_string(),
        })?;
        log::debug!("Sending: {}", preview(&frame));
        self.transport
            .send(&frame)
            .map_err(|e| SessionError::SendFailed {
                kind,
                reason: e.to_string(),
            })
    }

    fn send_logged(&mut self, msg: &ClientMessage) {
        if let Err(e) = self.send(msg) {
            log::error!("{}", e);
        }
    }

    /// Send a chat message. Blank text is ignored.
    pub fn send_message(&mut self, text: &str) -> Result<(), SessionError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        if !self.is_open() {
            let err = SessionError::NotConnected("Message");
            self.chat.set_error(err.to_string());
            return Err(err);
        }

        if let Err(err) = self.send(&ClientMessage::Message {
            text: text.to_string(),
        }) {
            log::error!("{}", err);
            self.chat.set_error(err.to_string());
            return Err(err);
        }
        if let Some(stop) = self.typing.force_stop(true) {
            self.send_logged(&stop);
        }
        Ok(())
    }

    /// The message input changed.
    pub fn input_changed(&mut self, text: &str, now: Instant) {
        if let Some(signal) = self.typing.on_input(text, self.is_open(), now) {
            self.send_logged(&signal);
        }
    }

    /// The message input lost focus.
    pub fn input_blurred(&mut self) {
        if let Some(stop) = self.typing.force_stop(self.is_open()) {
            self.send_logged(&stop);
        }
    }

    // --- Whiteboard ---

    pub fn pointer_down(&mut self, point: Point) {
        self.whiteboard.pointer_down(point);
    }

    pub fn pointer_move(&mut self, point: Point) {
        self.whiteboard.pointer_move(point);
    }

    /// End the current stroke and broadcast it.
    pub fn pointer_up(&mut self) {
        let draw = self.whiteboard.pointer_up();
        self.broadcast_stroke(draw);
    }

    pub fn pointer_leave(&mut self) {
        let draw = self.whiteboard.pointer_leave();
        self.broadcast_stroke(draw);
    }

    fn broadcast_stroke(&mut self, draw: Option<crate::protocol::DrawData>) {
        let Some(draw_data) = draw else {
            return;
        };
        if !self.is_open() {
            self.report_not_connected("Stroke");
            return;
        }
        let username = self.identity().unwrap_or_default().to_string();
        self.send_logged(&ClientMessage::WhiteboardDraw {
            username,
            draw_data,
        });
    }

    /// The local change stands; only the broadcast is lost.
    fn report_not_connected(&mut self, what: &'static str) {
        let err = SessionError::NotConnected(what);
        log::warn!("{}", err);
        self.chat.set_error(err.to_string());
    }

    /// Clear the whiteboard for everyone.
    pub fn clear_whiteboard(&mut self) {
        self.whiteboard.clear();
        if !self.is_open() {
            self.report_not_connected("Clear");
            return;
        }
        let username = self.identity().unwrap_or_default().to_string();
        self.send_logged(&ClientMessage::WhiteboardClear { username });
    }
}
