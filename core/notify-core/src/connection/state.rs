use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Health of the live channel, exposed to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub last_error: Option<String>,
    pub socket_id: Option<String>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            last_error: None,
            socket_id: None,
        }
    }
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    /// Non-fatal error string for optional display.
    pub fn connection_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

/// Events the manager publishes to the rest of the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connected {
        socket_id: String,
    },
    Disconnected {
        reason: String,
    },
    /// `fatal` errors (rejected credentials) end the session's channel; the
    /// transport will not retry.
    Error {
        message: String,
        fatal: bool,
    },
    Inbound {
        event: String,
        data: Value,
    },
    Pong {
        round_trip: Duration,
    },
}

/// Outcome of the single liveness probe sent after each connect.
///
/// Diagnostic only: an overdue pong never forces a disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Idle,
    Awaiting,
    Confirmed(Duration),
    Overdue,
}
