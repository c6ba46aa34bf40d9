//! `rumqttc` implementation of the [`Transport`] seam.
//!
//! This module provides two types:
//! - `MqttTransport`: the handle owned by the connection manager
//! - `ConnectionKernel`: the background task that owns the `EventLoop`
//!
//! The handle talks to the kernel over a command channel; every command
//! carries a oneshot reply so `connect` and `disconnect` resolve exactly once.
//! Publishes bypass the kernel and go straight to the cloned `AsyncClient`.
//!
//! # Architecture
//!
//! ```text
//! ConnectionManager
//!     ↓ connect / disconnect            ↓ publish (try_publish)
//! MqttTransport ──Command──> ConnectionKernel <── AsyncClient
//!     ^                          ↓ poll()
//!     └──TransportEvent────  rumqttc EventLoop ──> broker
//! ```
//!
//! # Kernel behaviour
//!
//! The kernel is idle (not polling) until the first connect. A pending
//! connect resolves on CONNACK or on the first error; a failed connect puts
//! the kernel back to idle. Once connected, an unexpected error emits
//! [`TransportEvent::ConnectionLost`] and, if automatic reconnect is on and
//! the error is not fatal, polling resumes after a [`Backoff`] delay. The
//! next CONNACK emits [`TransportEvent::Restored`]. Exhausted or fatal
//! recovery emits [`TransportEvent::GaveUp`].

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Outgoing, Packet, QoS,
    StateError,
};
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::{
    backoff::Backoff,
    client::ClientBuilder,
    config::Config,
    error::TransferError,
    transport::{ConnectOptions, Transport, TransportEvent, TransportFailure},
};

type Reply = oneshot::Sender<Result<(), TransportFailure>>;

enum Command {
    Connect { options: ConnectOptions, reply: Reply },
    Disconnect { reply: Reply },
}

/// Broker link backed by a `rumqttc` event loop.
///
/// Dropping the handle stops the kernel task.
pub struct MqttTransport {
    client: AsyncClient,
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<TransportEvent>,
    cancel: CancellationToken,
}

impl MqttTransport {
    /// Builds the client from `config` and spawns the kernel task.
    ///
    /// Must be called from within a tokio runtime. No network traffic
    /// happens until [`Transport::connect`].
    ///
    /// # Returns
    /// - `Ok(Self)`: kernel running and idle
    /// - `Err(TransferError)`: bad URL, QoS or TLS material
    pub fn start(config: &Config) -> Result<Self, TransferError> {
        let broker = config.broker()?;
        let (client, event_loop) = ClientBuilder::from_config(config)?.build()?;

        let (command_tx, command_rx) = mpsc::channel(8);
        let (events, _) = broadcast::channel(16);
        let cancel = CancellationToken::new();

        let kernel = ConnectionKernel::new(
            client.clone(),
            event_loop,
            command_rx,
            events.clone(),
            Backoff::from_config(&config.reconnect),
            cancel.clone(),
        );
        tokio::spawn(kernel.run());

        debug!(broker = %broker, "MQTT transport started");

        Ok(Self {
            client,
            commands: command_tx,
            events,
            cancel,
        })
    }

    async fn request(&self, command: impl FnOnce(Reply) -> Command) -> Result<(), TransportFailure> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(command(reply_tx))
            .await
            .map_err(|_| TransportFailure::closed())?;
        reply_rx.await.map_err(|_| TransportFailure::closed())?
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self, options: &ConnectOptions) -> Result<(), TransportFailure> {
        let options = options.clone();
        self.request(|reply| Command::Connect { options, reply }).await
    }

    async fn disconnect(&self) -> Result<(), TransportFailure> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportFailure> {
        self.client
            .try_publish(topic, qos, retain, payload)
            .map_err(TransportFailure::from)
    }

    fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    /// Not polling the event loop.
    Idle,
    /// Polling: connecting, connected or disconnecting.
    Polling,
    /// Waiting for the next automatic reconnect attempt.
    Waiting(Instant),
}

impl Link {
    fn deadline(&self) -> Instant {
        match self {
            Link::Waiting(at) => *at,
            _ => Instant::now(),
        }
    }
}

/// Background task owning the `rumqttc` event loop.
struct ConnectionKernel {
    client: AsyncClient,
    event_loop: EventLoop,
    commands: mpsc::Receiver<Command>,
    events: broadcast::Sender<TransportEvent>,
    backoff: Backoff,
    cancel: CancellationToken,

    link: Link,
    connected: bool,
    auto_reconnect: bool,
    pending_connect: Option<Reply>,
    pending_disconnect: Option<Reply>,
}

impl ConnectionKernel {
    fn new(
        client: AsyncClient,
        event_loop: EventLoop,
        commands: mpsc::Receiver<Command>,
        events: broadcast::Sender<TransportEvent>,
        backoff: Backoff,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            event_loop,
            commands,
            events,
            backoff,
            cancel,
            link: Link::Idle,
            connected: false,
            auto_reconnect: true,
            pending_connect: None,
            pending_disconnect: None,
        }
    }

    async fn run(mut self) {
        debug!("Connection kernel started");

        loop {
            let link = self.link;
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },

                _ = tokio::time::sleep_until(link.deadline()), if matches!(link, Link::Waiting(_)) => {
                    debug!(attempt = self.backoff.attempt(), "Retrying broker connection");
                    self.link = Link::Polling;
                }

                result = self.event_loop.poll(), if link == Link::Polling => match result {
                    Ok(event) => self.handle_event(event),
                    Err(err) => self.handle_error(err),
                },
            }
        }

        self.shutdown();
        debug!("Connection kernel stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { options, reply } => {
                if self.connected {
                    let _ = reply.send(Ok(()));
                    return;
                }
                if let Some(previous) = self.pending_connect.replace(reply) {
                    let _ = previous.send(Err(TransportFailure::local(
                        "Superseded by a newer connect request",
                    )));
                }
                self.apply_options(&options);
                self.backoff.reset();
                self.link = Link::Polling;
                debug!("Opening broker connection");
            }
            Command::Disconnect { reply } => {
                if let Some(pending) = self.pending_connect.take() {
                    let _ = pending.send(Err(TransportFailure::local(
                        "Connect aborted by disconnect",
                    )));
                }

                if !self.connected {
                    self.go_idle();
                    let _ = reply.send(Ok(()));
                    return;
                }

                // queued publishes are flushed ahead of the DISCONNECT packet
                match self.client.try_disconnect() {
                    Ok(()) => {
                        if let Some(previous) = self.pending_disconnect.replace(reply) {
                            let _ = previous.send(Ok(()));
                        }
                    }
                    Err(e) => {
                        warn!("Error sending disconnect packet: {e}");
                        self.go_idle();
                        let _ = reply.send(Err(e.into()));
                    }
                }
            }
        }
    }

    fn apply_options(&mut self, options: &ConnectOptions) {
        let mqtt = &mut self.event_loop.mqtt_options;
        mqtt.set_keep_alive(options.keep_alive);
        mqtt.set_clean_session(options.clean_session);
        if let Some((username, password)) = &options.credentials {
            mqtt.set_credentials(username.clone(), password.clone());
        }
        self.auto_reconnect = options.auto_reconnect;
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) if ack.code == ConnectReturnCode::Success => {
                self.connected = true;
                self.backoff.reset();
                match self.pending_connect.take() {
                    Some(reply) => {
                        debug!(session_present = ack.session_present, "CONNACK received");
                        let _ = reply.send(Ok(()));
                    }
                    None => {
                        info!("Broker connection restored");
                        let _ = self.events.send(TransportEvent::Restored);
                    }
                }
            }
            Event::Incoming(Packet::PubAck(ack)) => {
                trace!(pkid = ack.pkid, "Publish acknowledged");
            }
            Event::Incoming(Packet::PubComp(comp)) => {
                trace!(pkid = comp.pkid, "Publish completed");
            }
            Event::Incoming(Packet::Disconnect) => {
                warn!("Disconnected by broker");
            }
            Event::Outgoing(Outgoing::Disconnect) => {
                if let Some(reply) = self.pending_disconnect.take() {
                    debug!("DISCONNECT flushed");
                    self.go_idle();
                    let _ = reply.send(Ok(()));
                }
            }
            other => trace!("MQTT event: {:?}", other),
        }
    }

    fn handle_error(&mut self, err: ConnectionError) {
        let cause = get_error_message(&err);

        if let Some(reply) = self.pending_disconnect.take() {
            debug!("Link closed while disconnecting: {cause}");
            self.go_idle();
            let _ = reply.send(Ok(()));
            return;
        }

        if let Some(reply) = self.pending_connect.take() {
            let failure = match &err {
                ConnectionError::ConnectionRefused(code) => TransportFailure::refused(*code),
                _ => TransportFailure::local(cause),
            };
            self.go_idle();
            let _ = reply.send(Err(failure));
            return;
        }

        if std::mem::take(&mut self.connected) {
            warn!("Broker connection lost: {cause}");
            let _ = self
                .events
                .send(TransportEvent::ConnectionLost(cause.clone()));
        }

        if !self.auto_reconnect {
            self.give_up(format!("automatic reconnect is disabled ({cause})"));
            return;
        }

        if is_fatal_error(&err) {
            self.give_up(format!("fatal connection error: {cause}"));
            return;
        }

        match self.backoff.next_sleep() {
            Ok(delay) => {
                warn!(
                    "Reconnecting in {:.2} seconds due to error: {}",
                    delay.as_secs_f64(),
                    cause
                );
                self.link = Link::Waiting(Instant::now() + delay);
            }
            Err(e) => self.give_up(e.to_string()),
        }
    }

    fn give_up(&mut self, reason: String) {
        error!("Broker link stays down: {reason}");
        self.go_idle();
        let _ = self.events.send(TransportEvent::GaveUp(reason));
    }

    /// Stops polling and drops the network connection.
    fn go_idle(&mut self) {
        self.link = Link::Idle;
        self.connected = false;
        self.event_loop.clean();
    }

    fn shutdown(&mut self) {
        for reply in [self.pending_connect.take(), self.pending_disconnect.take()]
            .into_iter()
            .flatten()
        {
            let _ = reply.send(Err(TransportFailure::closed()));
        }
        self.go_idle();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    // reconnecting cannot help
    Fatal,
    Reconnect,
}

fn classify_connection_error(err: &ConnectionError) -> Disposition {
    use Disposition::*;

    match err {
        // invalid certificates or incompatible crypto setup
        ConnectionError::Tls(_) => Fatal,

        // peer went away or stopped answering pings
        ConnectionError::MqttState(StateError::Io(_) | StateError::AwaitPingResp) => Reconnect,
        ConnectionError::MqttState(_) => Fatal,

        ConnectionError::NotConnAck(_) => Fatal,
        ConnectionError::RequestsDone => Fatal,

        ConnectionError::Io(e) => match e.kind() {
            std::io::ErrorKind::AddrInUse
            | std::io::ErrorKind::PermissionDenied
            | std::io::ErrorKind::InvalidInput
            | std::io::ErrorKind::InvalidData => Fatal,
            _ => Reconnect,
        },

        ConnectionError::NetworkTimeout | ConnectionError::FlushTimeout => Reconnect,

        ConnectionError::ConnectionRefused(code) => match code {
            ConnectReturnCode::RefusedProtocolVersion
            | ConnectReturnCode::BadClientId
            | ConnectReturnCode::BadUserNamePassword
            | ConnectReturnCode::NotAuthorized => Fatal,
            _ => Reconnect,
        },

        #[allow(unreachable_patterns)]
        _ => Reconnect,
    }
}

fn is_fatal_error(err: &ConnectionError) -> bool {
    matches!(classify_connection_error(err), Disposition::Fatal)
}

/// Innermost message of an error chain, without surrounding quotes.
fn get_error_message(e: &dyn std::error::Error) -> String {
    let mut current = e;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string().trim_matches('"').to_string()
}

#[cfg(test)]
mod tests {
    use std::{io, time::Duration};

    use super::*;

    fn unreachable_broker_config() -> Config {
        Config {
            // port 1 on loopback refuses immediately
            url: "tcp://127.0.0.1:1".into(),
            client_id: "eventbee-test".into(),
            connection_timeout: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_is_fatal_error_detection() {
        let refused = ConnectionError::Io(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert!(!is_fatal_error(&refused));

        let addr_in_use =
            ConnectionError::Io(io::Error::new(io::ErrorKind::AddrInUse, "address in use"));
        assert!(is_fatal_error(&addr_in_use));

        let reset = ConnectionError::MqttState(StateError::Io(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        )));
        assert!(!is_fatal_error(&reset));

        assert!(!is_fatal_error(&ConnectionError::NetworkTimeout));
    }

    #[test]
    fn test_refused_credentials_are_fatal() {
        let bad_credentials =
            ConnectionError::ConnectionRefused(ConnectReturnCode::BadUserNamePassword);
        assert!(is_fatal_error(&bad_credentials));

        let unavailable = ConnectionError::ConnectionRefused(ConnectReturnCode::ServiceUnavailable);
        assert!(!is_fatal_error(&unavailable));
    }

    #[test]
    fn test_get_error_message_uses_root_cause() {
        let err = ConnectionError::MqttState(StateError::Io(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "\"connection reset\"",
        )));
        assert_eq!(get_error_message(&err), "connection reset");
    }

    #[test]
    fn test_link_deadline() {
        let at = Instant::now() + Duration::from_secs(5);
        assert_eq!(Link::Waiting(at).deadline(), at);
        assert!(Link::Idle.deadline() <= Instant::now());
    }

    #[tokio::test]
    async fn test_start_rejects_bad_url() {
        let config = Config {
            url: "ws://broker".into(),
            ..Default::default()
        };
        assert!(MqttTransport::start(&config).is_err());
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_broker_fails() {
        let config = unreachable_broker_config();
        let transport = MqttTransport::start(&config).unwrap();
        let mut events = transport.subscribe_events();

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            transport.connect(&config.connect_options()),
        )
        .await
        .expect("connect must resolve");

        let failure = result.unwrap_err();
        assert_eq!(failure.code, crate::transport::LOCAL_FAILURE);
        // a failed first connect is not a loss of an established link
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_while_idle_succeeds() {
        let transport = MqttTransport::start(&unreachable_broker_config()).unwrap();
        assert!(transport.disconnect().await.is_ok());
    }

    #[tokio::test]
    async fn test_publish_does_not_wait_for_network() {
        let transport = MqttTransport::start(&unreachable_broker_config()).unwrap();
        let result = tokio::time::timeout(
            Duration::from_secs(1),
            transport.publish("/janus/events", b"{}".to_vec(), QoS::AtMostOnce, false),
        )
        .await;
        assert!(matches!(result, Ok(Ok(()))));
    }
}
