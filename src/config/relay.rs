//! `[relay]` section: what gets forwarded and how it is laid out.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::{queue::OverflowPolicy, record::EventMask, serializer::JsonStyle};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RelayConfig {
    /// Relay is skipped entirely when false.
    pub enabled: bool,

    /// `none`, `all` or a comma separated list such as `sessions, handles`.
    /// Unknown labels are skipped with a warning.
    pub events: String,

    /// Payload layout: `indented`, `plain` or `compact`.
    pub json: JsonStyle,

    /// Publish to `<base_topic>/<label>` instead of the base topic.
    pub add_event_topic: bool,

    #[validate(nested)]
    pub queue: QueueConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            enabled: true,
            events: "all".to_string(),
            json: JsonStyle::default(),
            add_event_topic: true,
            queue: QueueConfig::default(),
        }
    }
}

impl RelayConfig {
    pub fn event_mask(&self) -> EventMask {
        EventMask::parse(&self.events)
    }
}

/// Bound of the event queue. `capacity = 0` keeps it unbounded.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct QueueConfig {
    #[validate(range(max = 10_000_000, message = "Queue capacity must not exceed 10000000"))]
    pub capacity: usize,

    pub overflow: OverflowPolicy,
}
