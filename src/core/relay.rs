//! Lifecycle of one event relay: `init` wires queue, dispatcher and broker
//! connection together, `destroy` drains and tears them down.
//!
//! ```ignore
//! let relay = Relay::init(&config).await?;
//! relay.submit(EventRecord::new(256).with("event", json!({"status": "started"})));
//! relay.destroy().await;
//! ```

use std::sync::Arc;

use eventbee_mqtt::{ConnectionManager, ConnectionState, MqttTransport, TransferError, Transport};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use validator::Validate;

use super::{
    dispatcher::{DispatchSettings, DispatchStats, Dispatcher},
    producer::{Lifecycle, Producer, SubmitOutcome},
    queue::EventQueue,
    record::EventRecord,
};
use crate::config::Config;

/// Errors returned by [`Relay::init`]. Nothing is left running when init
/// fails.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Event relay is disabled in the configuration")]
    Disabled,

    #[error("Invalid configuration: {0}")]
    Config(#[from] validator::ValidationErrors),

    #[error("MQTT transport setup failed: {0}")]
    Transport(#[from] TransferError),
}

pub struct Relay {
    manager: ConnectionManager,
    queue: Arc<EventQueue>,
    lifecycle: Arc<Lifecycle>,
    producer: Producer,
    stats: Arc<DispatchStats>,
    dispatcher: JoinHandle<()>,
}

impl Relay {
    /// Starts a relay backed by the `rumqttc` transport.
    ///
    /// Returns as soon as the dispatcher runs; the broker connection is
    /// established in the background.
    pub async fn init(config: &Config) -> Result<Self, RelayError> {
        Self::check(config)?;
        let transport = Arc::new(MqttTransport::start(&config.transport)?);
        Self::with_transport(config, transport).await
    }

    /// Starts a relay on top of any [`Transport`].
    pub async fn with_transport(
        config: &Config,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, RelayError> {
        Self::check(config)?;
        let mask = config.relay.event_mask();

        let manager = ConnectionManager::new(config.transport.clone(), transport);
        let queue = Arc::new(EventQueue::new(
            config.relay.queue.capacity,
            config.relay.queue.overflow,
        ));
        let lifecycle = Arc::new(Lifecycle::default());

        let dispatcher = Dispatcher::new(
            queue.clone(),
            Arc::new(manager.clone()),
            lifecycle.clone(),
            DispatchSettings::from_config(config),
        );
        let stats = dispatcher.stats();
        let dispatcher = dispatcher.spawn();

        let producer = Producer::new(queue.clone(), lifecycle.clone(), mask);
        lifecycle.mark_initialized();

        {
            let manager = manager.clone();
            tokio::spawn(async move {
                if let Err(e) = manager.connect().await {
                    debug!("Initial connect did not complete: {e}");
                }
            });
        }

        info!(
            url = %config.transport.url,
            base_topic = %config.transport.base_topic,
            events = %config.relay.events,
            json = %config.relay.json,
            "Event relay initialized"
        );

        Ok(Relay {
            manager,
            queue,
            lifecycle,
            producer,
            stats,
            dispatcher,
        })
    }

    fn check(config: &Config) -> Result<(), RelayError> {
        if !config.relay.enabled {
            warn!("Event relay disabled, not starting");
            return Err(RelayError::Disabled);
        }
        config.validate()?;
        Ok(())
    }

    pub fn submit(&self, record: EventRecord) -> SubmitOutcome {
        self.producer.submit(record)
    }

    /// Submission handle that can outlive borrows of the relay and be moved
    /// to other threads.
    pub fn producer(&self) -> Producer {
        self.producer.clone()
    }

    /// Drops the broker link and connects again.
    pub async fn reconnect(&self) -> Result<(), TransferError> {
        self.manager.reconnect().await
    }

    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        self.stats.clone()
    }

    /// Records waiting for the dispatcher.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Stops accepting events, lets the dispatcher drain the queue, then
    /// disconnects. The connection always ends up `Destroyed`.
    pub async fn destroy(self) {
        info!("Stopping event relay");
        self.lifecycle.begin_stop();
        self.queue.shutdown();

        if let Err(e) = self.dispatcher.await {
            error!("Event dispatcher task failed: {e}");
        }

        if let Err(e) = self.manager.disconnect().await {
            warn!("Disconnect from MQTT broker failed: {e}");
        }

        info!(
            processed = self.stats.processed(),
            published = self.stats.published(),
            dropped = self.queue.dropped(),
            "Event relay destroyed"
        );
    }
}
