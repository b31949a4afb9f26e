//! Connection status types shared between the hub and its callers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Hub connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected and no attempt in flight.
    Disconnected,
    /// First attempt after `start()` in flight.
    Connecting,
    /// Retry scheduled or in flight after a failure or drop.
    Reconnecting,
    /// Handshake complete; sends go out.
    Connected,
    /// Explicitly shut down. Only `start()` leaves this state.
    Stopped,
}

impl ConnectionState {
    /// States in which a worker owns the connection and `start()` is a no-op.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting | ConnectionState::Connected
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// One failed connect attempt, published to failure subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectFailure {
    /// 1-based count of consecutive failures, reset on a successful connect.
    pub attempt: u32,
    pub reason: String,
}

/// What happened to a send-style call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the transport.
    Sent,
    /// Join recorded; it goes out on the next successful connect.
    Queued,
    /// Join for a chat already joined on this connection.
    AlreadyJoined,
    /// Dropped because the hub is not connected. Never retried.
    NotConnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_states() {
        assert!(ConnectionState::Connecting.is_active());
        assert!(ConnectionState::Reconnecting.is_active());
        assert!(ConnectionState::Connected.is_active());
        assert!(!ConnectionState::Disconnected.is_active());
        assert!(!ConnectionState::Stopped.is_active());
    }

    #[test]
    fn state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ConnectionState::Reconnecting).unwrap(),
            "\"reconnecting\""
        );
        assert_eq!(ConnectionState::Stopped.to_string(), "stopped");
    }
}
