//! Connection manager: the state machine around the single broker link.
//!
//! `ConnectionManager` owns the connection context (configuration plus the
//! live [`Transport`] handle) and advances [`ConnectionState`] strictly when
//! transport futures resolve. Transitions are serialized by an async mutex, so
//! at most one connect, reconnect or disconnect is in flight. `disconnect`
//! first cancels a pending connect, so shutdown never waits on an
//! unresponsive broker. Publishing does not take that mutex; it only checks
//! that the state is `Connected`.
//!
//! ```text
//! connect()     Disconnected -> Connecting -> Connected | Disconnected
//! reconnect()   Connected -> Reconnecting -> Connecting -> Connected | Disconnected
//! disconnect()  * -> Disconnecting -> Destroyed   (Connecting included)
//! ```
//!
//! After every successful connect the manager publishes
//! `{"event":"connected","eventhandler":"eventbee.eventhandler.mqtt"}` to
//! `<base_topic>/status`.
//!
//! Unexpected link loss is handled by the transport (automatic reconnect with
//! backoff); the manager only logs the notifications.
//!
//! # Examples
//!
//! ```ignore
//! let transport = Arc::new(MqttTransport::start(&config)?);
//! let manager = ConnectionManager::new(config, transport);
//!
//! manager.connect().await?;
//! manager.publish("/janus/events/handle", payload, 1, false).await?;
//! manager.disconnect().await?;
//! ```

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde_json::json;
use tokio::{
    sync::{broadcast::error::RecvError, watch},
    task::JoinHandle,
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::{qos_from_u8, Config},
    error::TransferError,
    state::ConnectionState,
    transport::{Transport, TransportEvent},
};

/// Identifier reported in the connection status message.
pub const PACKAGE: &str = "eventbee.eventhandler.mqtt";

/// Shared handle to the connection context. Cloning is cheap.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,

    /// Taken on disconnect; `None` means destroyed.
    transport: RwLock<Option<Arc<dyn Transport>>>,

    /// Serializes connect / reconnect / disconnect.
    transition: tokio::sync::Mutex<()>,

    /// Cancelled once `disconnect` is requested; aborts a pending connect.
    closing: CancellationToken,

    state_tx: watch::Sender<ConnectionState>,

    /// Task logging transport loss / restore notifications.
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Creates a manager in `Disconnected` state. No I/O happens here.
    pub fn new(config: Config, transport: Arc<dyn Transport>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                config,
                transport: RwLock::new(Some(transport)),
                transition: tokio::sync::Mutex::new(()),
                closing: CancellationToken::new(),
                state_tx,
                monitor: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Receiver that observes every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Disconnected -> Connecting -> Connected.
    ///
    /// On failure the state returns to `Disconnected`, the decoded reason is
    /// logged and no retry is attempted here.
    ///
    /// # Returns
    /// - `Ok(())`: broker acknowledged the session
    /// - `Err(TransferError::InvalidTransition)`: not `Disconnected`
    /// - `Err(TransferError::Transport)`: the broker refused or was unreachable
    pub async fn connect(&self) -> Result<(), TransferError> {
        let _transition = self.inner.transition.lock().await;

        match self.state() {
            ConnectionState::Disconnected => self.establish().await,
            state => Err(TransferError::InvalidTransition {
                operation: "connect",
                state,
            }),
        }
    }

    /// Connected -> Reconnecting -> Connecting -> Connected.
    ///
    /// Tears the link down and connects again. If the disconnect leg fails
    /// the link is still up, so the state goes back to `Connected`.
    pub async fn reconnect(&self) -> Result<(), TransferError> {
        let _transition = self.inner.transition.lock().await;

        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(TransferError::InvalidTransition {
                operation: "reconnect",
                state,
            });
        }

        let transport = self.transport()?;
        self.set_state(ConnectionState::Reconnecting);
        info!("Reconnecting to MQTT broker");

        let secs = self.inner.config.disconnect_timeout;
        match timeout(self.inner.config.disconnect_timeout(), transport.disconnect()).await {
            Ok(Ok(())) => {
                debug!("Disconnected from MQTT broker, connecting again");
                self.establish().await
            }
            Ok(Err(failure)) => {
                error!("Reconnect aborted, disconnect failed: {failure}");
                self.set_state(ConnectionState::Connected);
                Err(failure.into())
            }
            Err(_) => {
                error!("Reconnect aborted, disconnect did not complete within {secs}s");
                self.set_state(ConnectionState::Connected);
                Err(TransferError::DisconnectTimeout(secs))
            }
        }
    }

    /// Any live state -> Disconnecting -> Destroyed.
    ///
    /// A connect still waiting for the broker is aborted first and its
    /// caller gets `TransferError::ConnectAborted`. The transport handle is
    /// released whatever the outcome; a failed or timed-out disconnect is
    /// logged and returned but `Destroyed` is still reached.
    pub async fn disconnect(&self) -> Result<(), TransferError> {
        self.inner.closing.cancel();
        let _transition = self.inner.transition.lock().await;

        let state = self.state();
        if state.is_terminal() {
            return Err(TransferError::InvalidTransition {
                operation: "disconnect",
                state,
            });
        }

        self.set_state(ConnectionState::Disconnecting);
        let transport = self
            .inner
            .transport
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let result = match transport {
            Some(transport) => {
                let secs = self.inner.config.disconnect_timeout;
                match timeout(self.inner.config.disconnect_timeout(), transport.disconnect()).await
                {
                    Ok(Ok(())) => {
                        info!("Disconnected from MQTT broker");
                        Ok(())
                    }
                    Ok(Err(failure)) => {
                        error!("Error disconnecting from MQTT broker: {failure}");
                        Err(failure.into())
                    }
                    Err(_) => {
                        error!("Disconnect did not complete within {secs}s");
                        Err(TransferError::DisconnectTimeout(secs))
                    }
                }
            }
            None => Ok(()),
        };

        if let Some(monitor) = self
            .inner
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            monitor.abort();
        }

        self.set_state(ConnectionState::Destroyed);
        result
    }

    /// Publishes one message. Only valid while `Connected`.
    ///
    /// # Returns
    /// - `Err(TransferError::NotConnected)`: any other state
    /// - `Err(TransferError::InvalidMetadata)`: QoS outside 0..=2
    /// - `Err(TransferError::Transport)`: the client rejected the request
    pub async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: u8,
        retain: bool,
    ) -> Result<(), TransferError> {
        let state = self.state();
        if !state.is_connected() {
            return Err(TransferError::NotConnected(state));
        }

        let qos = qos_from_u8(qos)?;
        let transport = self.transport()?;
        transport.publish(topic, payload, qos, retain).await?;
        Ok(())
    }

    /// Connects with the transition lock held by the caller.
    ///
    /// Leaves the state at `Connecting` when aborted; the pending
    /// `disconnect` moves it on.
    async fn establish(&self) -> Result<(), TransferError> {
        if self.inner.closing.is_cancelled() {
            return Err(TransferError::ConnectAborted);
        }
        let transport = self.transport()?;
        self.ensure_monitor(transport.as_ref());

        self.set_state(ConnectionState::Connecting);
        info!(
            url = %self.inner.config.url,
            client_id = %self.inner.config.client_id,
            "Connecting to MQTT broker"
        );

        let options = self.inner.config.connect_options();
        let result = tokio::select! {
            biased;
            _ = self.inner.closing.cancelled() => {
                info!("Connect to MQTT broker aborted by disconnect");
                return Err(TransferError::ConnectAborted);
            }
            result = transport.connect(&options) => result,
        };

        match result {
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
                info!("Connected to MQTT broker");
                self.publish_status(transport.as_ref()).await;
                Ok(())
            }
            Err(failure) => {
                error!(
                    "Connection to MQTT broker failed, return code {}: {}",
                    failure.code,
                    failure.reason()
                );
                debug!("Transport reported: {}", failure.message);
                self.set_state(ConnectionState::Disconnected);
                Err(failure.into())
            }
        }
    }

    async fn publish_status(&self, transport: &dyn Transport) {
        let config = &self.inner.config;
        let topic = config.status_topic();

        let payload = match serde_json::to_vec(&json!({
            "event": "connected",
            "eventhandler": PACKAGE,
        })) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialize connection status: {e}");
                return;
            }
        };
        let qos = match config.qos() {
            Ok(qos) => qos,
            Err(e) => {
                warn!("Not publishing connection status: {e}");
                return;
            }
        };

        match transport.publish(&topic, payload, qos, config.retain).await {
            Ok(()) => debug!("Published connection status to {topic}"),
            Err(e) => warn!("Failed to publish connection status to {topic}: {e}"),
        }
    }

    fn ensure_monitor(&self, transport: &dyn Transport) {
        let mut monitor = self
            .inner
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if monitor.is_some() {
            return;
        }

        let mut events = transport.subscribe_events();
        *monitor = Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(TransportEvent::ConnectionLost(cause)) => {
                        warn!("Connection to MQTT broker lost: {cause}");
                    }
                    Ok(TransportEvent::Restored) => {
                        info!("Connection to MQTT broker restored");
                    }
                    Ok(TransportEvent::GaveUp(reason)) => {
                        error!("MQTT transport stopped reconnecting: {reason}");
                    }
                    Err(RecvError::Lagged(missed)) => {
                        debug!("Missed {missed} transport notifications");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
    }

    fn transport(&self) -> Result<Arc<dyn Transport>, TransferError> {
        self.inner
            .transport
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(TransferError::Destroyed)
    }

    /// Stores the state and notifies watchers only when it changed.
    fn set_state(&self, state: ConnectionState) {
        let changed = self.inner.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });

        if changed {
            info!("Connection state changed to: {}", state);
        }
    }
}
