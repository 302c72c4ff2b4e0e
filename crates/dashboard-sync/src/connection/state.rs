//! Connection state tracking

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Lifecycle state of the single logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No link, no driver activity (or waiting out a backoff)
    Disconnected,
    /// Opening a link
    Connecting,
    /// Link open, waiting for the `authenticated` acknowledgement
    Authenticating,
    /// Session usable
    Connected,
}

impl ConnectionState {
    /// True while a transport link is open
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Authenticating | Self::Connected)
    }

    /// True once the session is usable
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Authenticating => write!(f, "Authenticating"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

#[derive(Debug)]
pub(crate) struct InternalState {
    pub state: ConnectionState,
    /// Consecutive failures since the last successful open
    pub failures: u32,
    pub current_delay: Option<Duration>,
    pub transport: Option<String>,
    pub last_connected: Option<Instant>,
    pub last_message: Option<Instant>,
    pub last_ping: Option<Instant>,
    pub last_pong: Option<Instant>,
}

impl Default for InternalState {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            failures: 0,
            current_delay: None,
            transport: None,
            last_connected: None,
            last_message: None,
            last_ping: None,
            last_pong: None,
        }
    }
}

impl InternalState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_connecting(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    /// Link opened. Resets the failure counter.
    pub fn mark_open(&mut self, transport: &str, authenticating: bool) {
        self.state = if authenticating {
            ConnectionState::Authenticating
        } else {
            ConnectionState::Connected
        };
        self.failures = 0;
        self.current_delay = None;
        self.transport = Some(transport.to_string());
        self.last_connected = Some(Instant::now());
    }

    /// Returns `true` if this call moved the session to ready.
    pub fn mark_authenticated(&mut self) -> bool {
        if self.state == ConnectionState::Authenticating {
            self.state = ConnectionState::Connected;
            true
        } else {
            false
        }
    }

    pub fn mark_disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
    }

    /// Count a failure and return the new consecutive count.
    pub fn record_failure(&mut self) -> u32 {
        self.failures = self.failures.saturating_add(1);
        self.failures
    }

    pub fn record_message(&mut self) {
        self.last_message = Some(Instant::now());
    }

    pub fn record_ping(&mut self) {
        self.last_ping = Some(Instant::now());
    }

    pub fn record_pong(&mut self) {
        self.last_pong = Some(Instant::now());
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        let now = Instant::now();
        ConnectionSnapshot {
            state: self.state,
            attempts: self.failures,
            current_delay_ms: self.current_delay.map(|d| d.as_millis() as u64),
            transport: self.transport.clone(),
            last_message_age_ms: self
                .last_message
                .map(|t| now.saturating_duration_since(t).as_millis() as u64),
            last_pong_age_ms: self
                .last_pong
                .map(|t| now.saturating_duration_since(t).as_millis() as u64),
        }
    }
}

/// Point-in-time view of the connection for connectivity indicators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSnapshot {
    /// Current state
    pub state: ConnectionState,
    /// Consecutive failures since the last successful open
    pub attempts: u32,
    /// Backoff currently being waited out
    pub current_delay_ms: Option<u64>,
    /// Transport of the current or last link
    pub transport: Option<String>,
    /// Time since the last inbound frame
    pub last_message_age_ms: Option<u64>,
    /// Time since the last `pong`
    pub last_pong_age_ms: Option<u64>,
}
