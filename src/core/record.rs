//! Event records and the closed set of host event types.
//!
//! An [`EventRecord`] is an ordered JSON object. It always carries an integer
//! `type` and a `timestamp` (monotonic microseconds since the process started
//! relaying). The dispatcher may add a derived `eventtype` string before the
//! record is serialized; nothing else mutates a queued record.

use std::{fmt, sync::OnceLock, time::Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

pub const TYPE_KEY: &str = "type";
pub const TIMESTAMP_KEY: &str = "timestamp";
pub const EVENT_TYPE_KEY: &str = "eventtype";

#[derive(Debug, Error, PartialEq)]
pub enum RecordError {
    #[error("Event must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("Event has no integer `type` field")]
    MissingType,
}

/// Microseconds elapsed on a monotonic clock since the first call.
pub fn monotonic_micros() -> i64 {
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    let origin = ORIGIN.get_or_init(Instant::now);
    i64::try_from(origin.elapsed().as_micros()).unwrap_or(i64::MAX)
}

/// One host event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventRecord(Map<String, Value>);

impl EventRecord {
    /// Creates a record with `type` and a fresh `timestamp`.
    pub fn new(event_type: i64) -> Self {
        let mut map = Map::new();
        map.insert(TYPE_KEY.to_string(), Value::from(event_type));
        map.insert(TIMESTAMP_KEY.to_string(), Value::from(monotonic_micros()));
        EventRecord(map)
    }

    /// Appends a field. Keys keep insertion order.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Wraps a JSON document handed over by the host.
    ///
    /// The document must be an object with an integer `type`. A missing
    /// `timestamp` is filled in with the current monotonic time.
    pub fn from_value(value: Value) -> Result<Self, RecordError> {
        let mut map = match value {
            Value::Object(map) => map,
            Value::Null => return Err(RecordError::NotAnObject("null")),
            Value::Bool(_) => return Err(RecordError::NotAnObject("a boolean")),
            Value::Number(_) => return Err(RecordError::NotAnObject("a number")),
            Value::String(_) => return Err(RecordError::NotAnObject("a string")),
            Value::Array(_) => return Err(RecordError::NotAnObject("an array")),
        };

        if !map.get(TYPE_KEY).is_some_and(Value::is_i64) {
            return Err(RecordError::MissingType);
        }
        if !map.contains_key(TIMESTAMP_KEY) {
            map.insert(TIMESTAMP_KEY.to_string(), Value::from(monotonic_micros()));
        }

        Ok(EventRecord(map))
    }

    pub fn event_type(&self) -> Option<i64> {
        self.0.get(TYPE_KEY).and_then(Value::as_i64)
    }

    pub fn timestamp(&self) -> Option<i64> {
        self.0.get(TIMESTAMP_KEY).and_then(Value::as_i64)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub(crate) fn annotate(&mut self, name: &str) {
        self.0.insert(EVENT_TYPE_KEY.to_string(), Value::from(name));
    }
}

impl TryFrom<Value> for EventRecord {
    type Error = RecordError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        EventRecord::from_value(value)
    }
}

/// Host event kinds. Codes are bit flags so a set of them fits a mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Session,
    Handle,
    External,
    Jsep,
    WebRtc,
    Media,
    Plugin,
    Transport,
    Core,
}

impl EventType {
    pub const ALL: [EventType; 9] = [
        EventType::Session,
        EventType::Handle,
        EventType::External,
        EventType::Jsep,
        EventType::WebRtc,
        EventType::Media,
        EventType::Plugin,
        EventType::Transport,
        EventType::Core,
    ];

    pub fn code(self) -> u32 {
        match self {
            EventType::Session => 1,
            EventType::Handle => 2,
            EventType::External => 4,
            EventType::Jsep => 8,
            EventType::WebRtc => 16,
            EventType::Media => 32,
            EventType::Plugin => 64,
            EventType::Transport => 128,
            EventType::Core => 256,
        }
    }

    /// Lowercase label used in topics and in the event filter.
    pub fn label(self) -> &'static str {
        match self {
            EventType::Session => "session",
            EventType::Handle => "handle",
            EventType::External => "external",
            EventType::Jsep => "jsep",
            EventType::WebRtc => "webrtc",
            EventType::Media => "media",
            EventType::Plugin => "plugin",
            EventType::Transport => "transport",
            EventType::Core => "core",
        }
    }

    /// Display name written to `eventtype`.
    pub fn name(self) -> &'static str {
        match self {
            EventType::Session => "Session",
            EventType::Handle => "Handle",
            EventType::External => "External",
            EventType::Jsep => "JSEP",
            EventType::WebRtc => "WebRTC",
            EventType::Media => "Media",
            EventType::Plugin => "Plugin",
            EventType::Transport => "Transport",
            EventType::Core => "Core",
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| i64::from(kind.code()) == code)
    }

    /// Accepts the label in any case, singular or plural (`handles`).
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim().to_ascii_lowercase();
        let singular = label.strip_suffix('s').unwrap_or(&label);
        Self::ALL
            .into_iter()
            .find(|kind| kind.label() == label || kind.label() == singular)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of event types the relay forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMask(u32);

impl EventMask {
    pub const NONE: EventMask = EventMask(0);
    pub const ALL: EventMask = EventMask(u32::MAX);

    /// Parses `none`, `all` or a comma separated list of labels.
    ///
    /// Unknown labels are logged and skipped, so a filter made only of
    /// typos forwards nothing.
    pub fn parse(filter: &str) -> Self {
        let filter = filter.trim();
        if filter.eq_ignore_ascii_case("none") || filter.is_empty() {
            return Self::NONE;
        }
        if filter.eq_ignore_ascii_case("all") {
            return Self::ALL;
        }

        filter
            .split(',')
            .map(str::trim)
            .filter(|label| !label.is_empty())
            .fold(Self::NONE, |mask, label| match EventType::from_label(label) {
                Some(kind) => mask.with(kind),
                None => {
                    warn!("Ignoring unknown event type in filter: {label}");
                    mask
                }
            })
    }

    pub fn with(self, kind: EventType) -> Self {
        EventMask(self.0 | kind.code())
    }

    pub fn is_all(self) -> bool {
        self == Self::ALL
    }

    pub fn is_empty(self) -> bool {
        self == Self::NONE
    }

    /// Codes outside the known set only pass an `all` mask.
    pub fn allows(self, code: i64) -> bool {
        if self.is_all() {
            return true;
        }
        u32::try_from(code).is_ok_and(|code| self.0 & code != 0)
    }
}

impl Default for EventMask {
    fn default() -> Self {
        Self::ALL
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tracing_test::traced_test;

    use super::*;

    #[test]
    fn test_new_record_has_type_and_timestamp() {
        let record = EventRecord::new(2).with("session_id", 42);

        assert_eq!(record.event_type(), Some(2));
        assert!(record.timestamp().is_some());

        let keys: Vec<_> = record.as_map().keys().cloned().collect();
        assert_eq!(keys, vec!["type", "timestamp", "session_id"]);
    }

    #[test]
    fn test_from_value_fills_timestamp() {
        let record = EventRecord::from_value(json!({"type": 256, "event": {"status": "started"}}))
            .unwrap();

        assert_eq!(record.event_type(), Some(256));
        assert!(record.timestamp().is_some());
        assert_eq!(record.get("event").unwrap()["status"], "started");
    }

    #[test]
    fn test_from_value_keeps_host_timestamp() {
        let record = EventRecord::try_from(json!({"type": 1, "timestamp": 17})).unwrap();
        assert_eq!(record.timestamp(), Some(17));
    }

    #[test]
    fn test_from_value_rejects_bad_documents() {
        assert_eq!(
            EventRecord::from_value(json!([1, 2])),
            Err(RecordError::NotAnObject("an array"))
        );
        assert_eq!(
            EventRecord::from_value(json!({"type": "core"})),
            Err(RecordError::MissingType)
        );
        assert_eq!(
            EventRecord::from_value(json!({"event": {}})),
            Err(RecordError::MissingType)
        );
    }

    #[test]
    fn test_monotonic_micros_never_goes_back() {
        let first = monotonic_micros();
        let second = monotonic_micros();
        assert!(second >= first);
    }

    #[test]
    fn test_event_type_table() {
        assert_eq!(EventType::from_code(2), Some(EventType::Handle));
        assert_eq!(EventType::Handle.label(), "handle");
        assert_eq!(EventType::Jsep.name(), "JSEP");
        assert_eq!(EventType::WebRtc.to_string(), "WebRTC");
        assert_eq!(EventType::from_code(3), None);
        assert_eq!(EventType::from_code(512), None);

        let codes: u32 = EventType::ALL.iter().map(|kind| kind.code()).sum();
        assert_eq!(codes, 511);
    }

    #[test]
    fn test_from_label_accepts_plural_and_case() {
        assert_eq!(EventType::from_label("Handles"), Some(EventType::Handle));
        assert_eq!(EventType::from_label(" webrtc "), Some(EventType::WebRtc));
        assert_eq!(EventType::from_label("plugins"), Some(EventType::Plugin));
        assert_eq!(EventType::from_label("jsep"), Some(EventType::Jsep));
        assert_eq!(EventType::from_label("bogus"), None);
    }

    #[test]
    fn test_mask_parse() {
        assert!(EventMask::parse("all").is_all());
        assert!(EventMask::parse("NONE").is_empty());

        let mask = EventMask::parse("sessions, handles,core");
        assert!(mask.allows(1));
        assert!(mask.allows(2));
        assert!(mask.allows(256));
        assert!(!mask.allows(32));
        assert!(!mask.allows(1024));
        assert!(!mask.allows(-1));
    }

    #[test]
    #[traced_test]
    fn test_mask_parse_skips_unknown_labels() {
        let mask = EventMask::parse("media, nonsense");
        assert_eq!(mask, EventMask::NONE.with(EventType::Media));
        assert!(logs_contain("Ignoring unknown event type in filter: nonsense"));

        assert!(EventMask::parse("bogus").is_empty());
    }

    #[test]
    fn test_all_mask_allows_unknown_codes() {
        assert!(EventMask::ALL.allows(1024));
        assert!(EventMask::ALL.allows(0));
        assert!(!EventMask::NONE.allows(1));
    }
}
