//! Connection lifecycle state machine.
//!
//! [`Session::handle`] is a pure transition function: it takes one
//! [`SessionInput`] and returns the [`SessionCommand`]s the owner must carry
//! out (open or close the channel, send JOIN, arm or cancel the retry timer,
//! reset local state, report an error). Nothing here touches a socket or a
//! clock, so every path can be exercised without a network.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::ClientMessage;

/// Default cap on consecutive reconnection attempts.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 6;
/// Delay before the first reconnection attempt.
pub const BASE_RETRY_DELAY: Duration = Duration::from_millis(1000);
/// Upper bound for any reconnection delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_millis(30_000);

/// Session-level failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Failed to connect: {0}")]
    ConnectionConstruction(String),
    #[error("Connection closed unexpectedly: {0}")]
    UnexpectedClose(String),
    #[error("Max reconnect attempts reached. Please reconnect manually.")]
    MaxReconnectsExceeded { attempts: u32 },
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),
    #[error("Not connected. {0} not sent.")]
    NotConnected(&'static str),
    #[error("{0}")]
    Server(String),
    #[error("Failed to send {kind}: {reason}")]
    SendFailed { kind: String, reason: String },
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    /// Disconnected with a retry scheduled.
    Retrying { attempt: u32 },
    /// Disconnected after exhausting all retries; needs a manual connect.
    GivenUp,
}

impl ConnectionState {
    /// Whether a channel is held (being opened or open).
    pub fn holds_channel(self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }
}

/// Exponential backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RECONNECT_ATTEMPTS,
            base_delay: BASE_RETRY_DELAY,
            max_delay: MAX_RETRY_DELAY,
        }
    }
}

impl BackoffPolicy {
    /// Delay before attempt `attempt` (1-indexed): `min(max, base * 2^(attempt-1))`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionInput {
    /// User asked to join as `identity`.
    Connect { identity: String },
    /// User asked to leave.
    Disconnect,
    /// The underlying channel finished opening.
    ChannelOpened,
    /// The channel closed without being asked to.
    ChannelClosed { reason: String },
    /// The channel could not be constructed or established.
    ChannelFailed { reason: String },
    /// The retry timer fired.
    RetryElapsed,
}

/// Side effects requested by a transition, in execution order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    OpenChannel,
    CloseChannel,
    Send(ClientMessage),
    ScheduleRetry { attempt: u32, delay: Duration },
    CancelRetry,
    /// Clear message log, presence, typing set and typing timer.
    ResetLocalState,
    ClearError,
    Report(SessionError),
}

/// The single logical session with the server.
#[derive(Debug, Clone)]
pub struct Session {
    state: ConnectionState,
    identity: Option<String>,
    attempt: u32,
    should_reconnect: bool,
    policy: BackoffPolicy,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}

impl Session {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            identity: None,
            attempt: 0,
            should_reconnect: false,
            policy,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// The username this session joins as.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Consecutive failed attempts since the last successful open.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn should_reconnect(&self) -> bool {
        self.should_reconnect
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Apply one input and return the commands to execute.
    pub fn handle(&mut self, input: SessionInput) -> Vec<SessionCommand> {
        let mut commands = Vec::new();

        match input {
            SessionInput::Connect { identity } => {
                commands.push(SessionCommand::CancelRetry);
                if self.state.holds_channel() {
                    commands.push(SessionCommand::CloseChannel);
                }
                self.identity = Some(identity);
                self.should_reconnect = true;
                self.attempt = 0;
                self.state = ConnectionState::Connecting;
                commands.push(SessionCommand::ClearError);
                commands.push(SessionCommand::OpenChannel);
            }
            SessionInput::Disconnect => {
                self.should_reconnect = false;
                commands.push(SessionCommand::CancelRetry);
                if self.state.holds_channel() {
                    commands.push(SessionCommand::CloseChannel);
                }
                self.state = ConnectionState::Disconnected;
                self.attempt = 0;
                commands.push(SessionCommand::ResetLocalState);
            }
            SessionInput::ChannelOpened => {
                if self.state != ConnectionState::Connecting {
                    log::warn!("Ignoring channel open in state {:?}", self.state);
                    return commands;
                }
                self.state = ConnectionState::Open;
                self.attempt = 0;
                commands.push(SessionCommand::ClearError);
                if let Some(identity) = &self.identity {
                    commands.push(SessionCommand::Send(ClientMessage::Join {
                        username: identity.clone(),
                    }));
                }
            }
            SessionInput::ChannelClosed { reason } => {
                if !self.state.holds_channel() {
                    log::debug!("Ignoring close in state {:?}: {}", self.state, reason);
                    return commands;
                }
                log::info!("{}", SessionError::UnexpectedClose(reason));
                self.on_channel_lost(&mut commands);
            }
            SessionInput::ChannelFailed { reason } => {
                if !self.state.holds_channel() {
                    log::debug!("Ignoring failure in state {:?}: {}", self.state, reason);
                    return commands;
                }
                log::error!("Connection failed: {}", reason);
                commands.push(SessionCommand::Report(SessionError::ConnectionConstruction(
                    reason,
                )));
                self.on_channel_lost(&mut commands);
            }
            SessionInput::RetryElapsed => {
                if !matches!(self.state, ConnectionState::Retrying { .. }) || !self.should_reconnect {
                    return commands;
                }
                self.state = ConnectionState::Connecting;
                commands.push(SessionCommand::OpenChannel);
            }
        }

        commands
    }

    fn on_channel_lost(&mut self, commands: &mut Vec<SessionCommand>) {
        if !self.should_reconnect {
            self.state = ConnectionState::Disconnected;
            return;
        }

        self.attempt += 1;
        if self.attempt <= self.policy.max_attempts {
            let delay = self.policy.delay(self.attempt);
            log::info!(
                "Reconnecting attempt {} in {}ms",
                self.attempt,
                delay.as_millis()
            );
            self.state = ConnectionState::Retrying {
                attempt: self.attempt,
            };
            commands.push(SessionCommand::ScheduleRetry {
                attempt: self.attempt,
                delay,
            });
        } else {
            log::warn!("Giving up after {} reconnect attempts", self.policy.max_attempts);
            self.state = ConnectionState::GivenUp;
            self.should_reconnect = false;
            commands.push(SessionCommand::Report(SessionError::MaxReconnectsExceeded {
                attempts: self.policy.max_attempts,
            }));
        }
    }
}
