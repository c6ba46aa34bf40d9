//! The broker client seam.
//!
//! [`ConnectionManager`](crate::manager::ConnectionManager) drives its state
//! machine against the [`Transport`] trait rather than against `rumqttc`
//! directly. Every operation is a future that resolves exactly once with
//! success or a [`TransportFailure`]; unexpected link loss and recovery are
//! reported out of band as [`TransportEvent`]s.
//!
//! The production implementation is
//! [`MqttTransport`](crate::connection::MqttTransport). Tests substitute an
//! in-memory transport.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use rumqttc::{ConnectReturnCode, QoS};
use thiserror::Error;
use tokio::sync::broadcast;

/// Failure code used for errors that never reached a CONNACK.
pub const LOCAL_FAILURE: i32 = -1;

/// Session parameters applied to each connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub keep_alive: Duration,
    pub clean_session: bool,

    /// `(username, password)`.
    pub credentials: Option<(String, String)>,

    /// Recover unexpected link loss without being asked.
    pub auto_reconnect: bool,
}

/// Decoded broker refusal reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFailure {
    ProtocolVersion,
    IdentifierRejected,
    ServerUnavailable,
    BadCredentials,
    NotAuthorized,
    Unknown,
}

impl ConnectFailure {
    /// Maps the numeric failure code to its reason. Codes outside 1..=5 are
    /// [`ConnectFailure::Unknown`].
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => ConnectFailure::ProtocolVersion,
            2 => ConnectFailure::IdentifierRejected,
            3 => ConnectFailure::ServerUnavailable,
            4 => ConnectFailure::BadCredentials,
            5 => ConnectFailure::NotAuthorized,
            _ => ConnectFailure::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectFailure::ProtocolVersion => {
                "Connection refused - unacceptable protocol version"
            }
            ConnectFailure::IdentifierRejected => "Connection refused - identifier rejected",
            ConnectFailure::ServerUnavailable => "Connection refused - server unavailable",
            ConnectFailure::BadCredentials => "Connection refused - bad credentials",
            ConnectFailure::NotAuthorized => "Connection refused - not authorized",
            ConnectFailure::Unknown => "Connection refused - unknown error",
        }
    }
}

impl fmt::Display for ConnectFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a transport operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (code {code})")]
pub struct TransportFailure {
    /// CONNACK return code, or [`LOCAL_FAILURE`].
    pub code: i32,
    pub message: String,
}

impl TransportFailure {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// A failure that happened on this side of the wire.
    pub fn local(message: impl Into<String>) -> Self {
        Self::new(LOCAL_FAILURE, message)
    }

    /// The transport's background task is gone.
    pub fn closed() -> Self {
        Self::local("Transport is shut down")
    }

    /// Broker refused the connection with the given CONNACK code.
    pub fn refused(code: ConnectReturnCode) -> Self {
        let code = return_code_number(code);
        Self::new(code, ConnectFailure::from_code(code).as_str())
    }

    /// Decoded reason for the failure code.
    pub fn reason(&self) -> ConnectFailure {
        ConnectFailure::from_code(self.code)
    }
}

impl From<rumqttc::ClientError> for TransportFailure {
    fn from(err: rumqttc::ClientError) -> Self {
        TransportFailure::local(format!("Client request failed: {err}"))
    }
}

/// Numeric code for a CONNACK return code (MQTT 3.1.1 numbering).
pub fn return_code_number(code: ConnectReturnCode) -> i32 {
    match code {
        ConnectReturnCode::Success => 0,
        ConnectReturnCode::RefusedProtocolVersion => 1,
        ConnectReturnCode::BadClientId => 2,
        ConnectReturnCode::ServiceUnavailable => 3,
        ConnectReturnCode::BadUserNamePassword => 4,
        ConnectReturnCode::NotAuthorized => 5,
    }
}

/// Out-of-band link notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// An established link dropped without being asked to.
    ConnectionLost(String),

    /// Automatic recovery re-established the link.
    Restored,

    /// Automatic recovery stopped; the link stays down until the next connect.
    GaveUp(String),
}

/// Broker client driven by the connection manager.
///
/// Implementations must be cheap to share behind an `Arc`; every method takes
/// `&self`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establishes the session. Resolves once the broker acknowledged it or
    /// the attempt failed.
    async fn connect(&self, options: &ConnectOptions) -> Result<(), TransportFailure>;

    /// Gracefully closes the session, flushing requests queued before it.
    async fn disconnect(&self) -> Result<(), TransportFailure>;

    /// Hands one message to the client. Must not wait for the network.
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportFailure>;

    /// Receiver for loss and recovery notifications.
    fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_code_decoding() {
        assert_eq!(ConnectFailure::from_code(1), ConnectFailure::ProtocolVersion);
        assert_eq!(ConnectFailure::from_code(2), ConnectFailure::IdentifierRejected);
        assert_eq!(ConnectFailure::from_code(3), ConnectFailure::ServerUnavailable);
        assert_eq!(ConnectFailure::from_code(4), ConnectFailure::BadCredentials);
        assert_eq!(ConnectFailure::from_code(5), ConnectFailure::NotAuthorized);
    }

    #[test]
    fn test_bad_credentials_reason() {
        let failure = TransportFailure::new(4, "refused");
        assert_eq!(failure.reason(), ConnectFailure::BadCredentials);
        assert!(failure.reason().to_string().contains("bad credentials"));
    }

    #[test]
    fn test_unknown_codes() {
        for code in [0, 6, 42, LOCAL_FAILURE, i32::MAX] {
            let reason = ConnectFailure::from_code(code);
            assert_eq!(reason, ConnectFailure::Unknown);
            assert!(reason.to_string().contains("unknown error"));
        }
    }

    #[test]
    fn test_refused_maps_return_code() {
        let failure = TransportFailure::refused(ConnectReturnCode::NotAuthorized);
        assert_eq!(failure.code, 5);
        assert_eq!(failure.message, "Connection refused - not authorized");
        assert_eq!(
            failure.to_string(),
            "Connection refused - not authorized (code 5)"
        );
    }

    #[test]
    fn test_local_failure() {
        let failure = TransportFailure::closed();
        assert_eq!(failure.code, LOCAL_FAILURE);
        assert_eq!(failure.reason(), ConnectFailure::Unknown);
    }
}
