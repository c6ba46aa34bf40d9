//! # eventbee-mqtt: the broker side of the event relay
//!
//! This crate owns everything between "a serialized event and a topic" and
//! the MQTT broker:
//!
//! - **Connection manager** with an explicit state machine
//!   (`Disconnected`, `Connecting`, `Connected`, `Reconnecting`,
//!   `Disconnecting`, `Destroyed`)
//! - **Transport seam** so the state machine can be driven by any broker client
//! - **`rumqttc` transport** with automatic reconnection and exponential backoff
//! - **Configuration** for URL, session, TLS, last will and publish defaults
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use eventbee_mqtt::{Config, ConnectionManager, MqttTransport};
//!
//! #[tokio::main]
//! async fn main() -> eventbee_mqtt::Result<()> {
//!     let config = Config::default();
//!     let transport = Arc::new(MqttTransport::start(&config)?);
//!     let manager = ConnectionManager::new(config, transport);
//!
//!     manager.connect().await?;
//!     manager
//!         .publish("/janus/events/core", br#"{"type":256}"#.to_vec(), 1, false)
//!         .await?;
//!     manager.disconnect().await
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │ ConnectionManager                    │
//! │ state machine, status message        │
//! └────────────┬─────────────────────────┘
//!              │ Transport trait
//! ┌────────────▼─────────────────────────┐
//! │ MqttTransport + ConnectionKernel     │
//! │ command channel, Backoff, events     │
//! └────────────┬─────────────────────────┘
//!              │
//! ┌────────────▼─────────────────────────┐
//! │ rumqttc AsyncClient & EventLoop      │
//! └────────────┬─────────────────────────┘
//!              │
//!          TCP / TLS
//! ```
//!
//! # Connection Lifecycle
//!
//! Explicit operations drive the manager; unexpected loss is recovered by
//! the kernel and only logged by the manager:
//!
//! ```ignore
//! let mut state_rx = manager.subscribe_state();
//!
//! while state_rx.changed().await.is_ok() {
//!     match *state_rx.borrow() {
//!         ConnectionState::Connected => println!("online"),
//!         ConnectionState::Destroyed => break,
//!         _ => {}
//!     }
//! }
//! ```
//!
//! # Error Handling
//!
//! Every fallible operation returns [`Result`], i.e.
//! `std::result::Result<T, TransferError>`. Connect failures carry a
//! [`TransportFailure`] whose code decodes to a [`ConnectFailure`] reason.

pub mod backoff;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod manager;
pub mod state;
pub mod transport;

pub use backoff::{Backoff, BackoffError};
pub use client::ClientBuilder;
pub use config::{BrokerUrl, Config, ReconnectConfig, Scheme, TlsConfig, WillConfig};
pub use connection::MqttTransport;
pub use error::TransferError;
pub use manager::{ConnectionManager, PACKAGE};
pub use state::ConnectionState;
pub use transport::{
    ConnectFailure, ConnectOptions, Transport, TransportEvent, TransportFailure,
};

// rumqttc types that appear in the public API
pub use rumqttc::QoS;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TransferError>;
