//! The event relay pipeline.
//!
//! ```text
//! host ──submit──▶ Producer ──push──▶ EventQueue ──pop──▶ Dispatcher ──publish──▶ ConnectionManager
//! ```
//!
//! [`relay::Relay`] owns one of each and drives their lifecycle.

pub mod dispatcher;
pub mod producer;
pub mod queue;
pub mod record;
pub mod relay;
pub mod serializer;

pub use dispatcher::{DispatchSettings, DispatchStats, Dispatcher, Publisher};
pub use producer::{Lifecycle, Producer, SubmitOutcome};
pub use queue::{EventQueue, OverflowPolicy, PushOutcome, QueueItem};
pub use record::{EventMask, EventRecord, EventType, RecordError};
pub use relay::{Relay, RelayError};
pub use serializer::JsonStyle;
