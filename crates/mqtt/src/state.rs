//! Connection state of the relay's single broker connection.
//!
//! The state is owned by the [`ConnectionManager`](crate::manager::ConnectionManager)
//! and broadcast through a `watch` channel so other components (the CLI
//! host, tests) can observe transitions without touching the manager.
//!
//! ```text
//! Disconnected ──connect()──> Connecting ──success──> Connected
//!      ^                          │                      │
//!      └────────failure───────────┘                 reconnect()
//!                                  ^                      │
//!                                  └──disconnect ok── Reconnecting
//!
//! any live state ──disconnect()──> Disconnecting ──> Destroyed
//! ```

use std::fmt;

/// Lifecycle state of the broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection and no connect in flight.
    Disconnected,

    /// A connect request was handed to the transport and has not resolved yet.
    Connecting,

    /// The broker acknowledged the connection; publishing is allowed.
    Connected,

    /// An explicit reconnect tore down the link and is about to connect again.
    Reconnecting,

    /// Shutdown in progress; the transport is being disconnected.
    Disconnecting,

    /// Terminal: the transport handle has been released.
    Destroyed,
}

impl ConnectionState {
    /// Short identifier used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Reconnecting => "Reconnecting",
            ConnectionState::Disconnecting => "Disconnecting",
            ConnectionState::Destroyed => "Destroyed",
        }
    }

    /// Returns true only in `Connected`, the single state where publish is valid.
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Returns true once no further operation is valid.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Destroyed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_as_str() {
        assert_eq!(ConnectionState::Disconnected.as_str(), "Disconnected");
        assert_eq!(ConnectionState::Connecting.as_str(), "Connecting");
        assert_eq!(ConnectionState::Connected.as_str(), "Connected");
        assert_eq!(ConnectionState::Reconnecting.as_str(), "Reconnecting");
        assert_eq!(ConnectionState::Disconnecting.as_str(), "Disconnecting");
        assert_eq!(ConnectionState::Destroyed.as_str(), "Destroyed");
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Reconnecting.to_string(), "Reconnecting");
    }

    #[test]
    fn test_is_connected() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(!ConnectionState::Reconnecting.is_connected());
        assert!(!ConnectionState::Disconnecting.is_connected());
    }

    #[test]
    fn test_only_destroyed_is_terminal() {
        assert!(ConnectionState::Destroyed.is_terminal());
        assert!(!ConnectionState::Disconnected.is_terminal());
        assert!(!ConnectionState::Disconnecting.is_terminal());
    }
}
