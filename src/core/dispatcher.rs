//! Background task that drains the event queue into the broker.
//!
//! One dispatcher runs per relay. For every record it resolves the event
//! type, adds the `eventtype` name, picks the topic, serializes the record
//! in the configured style and publishes it once. Failures are logged and
//! the record is dropped; nothing is retried. The loop ends when it pops the
//! shutdown sentinel.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use async_trait::async_trait;
use eventbee_mqtt::{ConnectionManager, TransferError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::{
    producer::Lifecycle,
    queue::{EventQueue, QueueItem},
    record::{monotonic_micros, EventRecord, EventType},
    serializer::JsonStyle,
};
use crate::config::Config;

/// Destination for serialized events.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: u8,
        retain: bool,
    ) -> Result<(), TransferError>;
}

#[async_trait]
impl Publisher for ConnectionManager {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: u8,
        retain: bool,
    ) -> Result<(), TransferError> {
        ConnectionManager::publish(self, topic, payload, qos, retain).await
    }
}

/// Routing and formatting settings, fixed at init.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub base_topic: String,
    /// Append the event label to the base topic.
    pub per_event_topic: bool,
    pub style: JsonStyle,
    pub qos: u8,
    pub retain: bool,
}

impl DispatchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_topic: config.transport.base_topic.clone(),
            per_event_topic: config.relay.add_event_topic,
            style: config.relay.json,
            qos: config.transport.qos,
            retain: config.transport.retain,
        }
    }

    /// `base_topic/label`, or the bare base topic when the per-event policy
    /// is off or the type is unknown.
    pub fn topic_for(&self, kind: Option<EventType>) -> String {
        match kind {
            Some(kind) if self.per_event_topic => {
                format!("{}/{}", self.base_topic.trim_end_matches('/'), kind.label())
            }
            _ => self.base_topic.clone(),
        }
    }
}

/// Counters kept by the dispatcher.
#[derive(Debug, Default)]
pub struct DispatchStats {
    processed: AtomicU64,
    published: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

impl DispatchStats {
    /// Records taken off the queue.
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Records dropped because the relay was stopping.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Serialization or publish failures.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct Dispatcher {
    queue: Arc<EventQueue>,
    publisher: Arc<dyn Publisher>,
    lifecycle: Arc<Lifecycle>,
    settings: DispatchSettings,
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<EventQueue>,
        publisher: Arc<dyn Publisher>,
        lifecycle: Arc<Lifecycle>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            queue,
            publisher,
            lifecycle,
            settings,
            stats: Arc::default(),
        }
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        self.stats.clone()
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs until the shutdown sentinel is popped.
    pub async fn run(self) {
        info!("Event dispatcher started");

        loop {
            match self.queue.pop().await {
                QueueItem::Shutdown => break,
                QueueItem::Event(record) => {
                    DispatchStats::bump(&self.stats.processed);
                    self.handle(record).await;
                }
            }
        }

        info!(
            processed = self.stats.processed(),
            published = self.stats.published(),
            skipped = self.stats.skipped(),
            failed = self.stats.failed(),
            "Event dispatcher stopped"
        );
    }

    async fn handle(&self, mut record: EventRecord) {
        let kind = record.event_type().and_then(EventType::from_code);
        if let Some(kind) = kind {
            record.annotate(kind.name());
        }

        if let Some(created) = record.timestamp() {
            debug!(
                event_type = record.event_type(),
                latency_us = monotonic_micros().saturating_sub(created),
                "Handling event"
            );
        }

        if self.lifecycle.is_stopping() {
            trace!("Relay stopping, skipping event");
            DispatchStats::bump(&self.stats.skipped);
            return;
        }

        let topic = self.settings.topic_for(kind);
        let payload = match self.settings.style.to_vec(&record) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize event for {topic}: {e}");
                DispatchStats::bump(&self.stats.failed);
                return;
            }
        };

        trace!(topic = %topic, bytes = payload.len(), "Publishing event");
        match self
            .publisher
            .publish(&topic, payload, self.settings.qos, self.settings.retain)
            .await
        {
            Ok(()) => DispatchStats::bump(&self.stats.published),
            Err(e) => {
                warn!("Failed to publish event to {topic}: {e}");
                DispatchStats::bump(&self.stats.failed);
            }
        }
    }
}
