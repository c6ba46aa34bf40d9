//! Error type for the MQTT side of the relay.
//!
//! `TransferError` covers the three moments things can go wrong:
//!
//! **Setup** (returned from `Relay::init`, fatal):
//! - `InvalidUrl`, `ClientSetup`, `ConfigError`, `Io`
//!
//! **Per message** (logged by the dispatcher, the message is dropped):
//! - `InvalidMetadata`, `NotConnected`, `Transport`
//!
//! **State machine** (logged by whoever asked for the transition):
//! - `InvalidTransition`, `Destroyed`, `ConnectAborted`, `Transport`

use thiserror::Error;

use crate::{state::ConnectionState, transport::TransportFailure};

#[derive(Debug, Error)]
pub enum TransferError {
    /// QoS out of range, bad topic and similar publish parameter problems.
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("Invalid broker URL: {0}")]
    InvalidUrl(String),

    /// Building the `rumqttc` client failed, usually TLS material.
    #[error("Client setup error: {0}")]
    ClientSetup(String),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] validator::ValidationErrors),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport rejected an operation or the broker refused us.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportFailure),

    /// Publishing is only valid while connected.
    #[error("Not connected (state: {0})")]
    NotConnected(ConnectionState),

    #[error("Cannot {operation} while {state}")]
    InvalidTransition {
        operation: &'static str,
        state: ConnectionState,
    },

    /// The transport handle has been released.
    #[error("Connection context destroyed")]
    Destroyed,

    /// A disconnect was requested while the connect was still pending.
    #[error("Connect aborted by disconnect")]
    ConnectAborted,

    #[error("Disconnect did not complete within {0} seconds")]
    DisconnectTimeout(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_error_display() {
        let err = TransferError::InvalidMetadata("QoS must be 0-2".into());
        assert_eq!(err.to_string(), "Invalid metadata: QoS must be 0-2");
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = TransferError::InvalidTransition {
            operation: "connect",
            state: ConnectionState::Connected,
        };
        assert_eq!(err.to_string(), "Cannot connect while Connected");
    }

    #[test]
    fn test_not_connected_display() {
        let err = TransferError::NotConnected(ConnectionState::Reconnecting);
        assert_eq!(err.to_string(), "Not connected (state: Reconnecting)");
    }

    #[test]
    fn test_transfer_error_from_transport_failure() {
        let err: TransferError = TransportFailure::new(4, "bad credentials").into();
        assert!(err.to_string().contains("bad credentials"));
    }

    #[test]
    fn test_transfer_error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let transfer_err: TransferError = io_err.into();
        assert!(transfer_err.to_string().contains("file not found"));
    }
}
