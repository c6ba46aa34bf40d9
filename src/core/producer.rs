//! Host-facing entry point of the relay.
//!
//! [`Producer::submit`] runs on the caller's thread, never awaits and never
//! reports back pressure. Its [`SubmitOutcome`] only says what happened to
//! the record so callers and tests can observe it.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tracing::trace;

use super::{
    queue::{EventQueue, PushOutcome},
    record::{EventMask, EventRecord},
};

/// Running / stopping flags shared by the relay, its producers and the
/// dispatcher.
#[derive(Debug, Default)]
pub struct Lifecycle {
    initialized: AtomicBool,
    stopping: AtomicBool,
}

impl Lifecycle {
    pub fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    /// Stops accepting submissions. Irreversible.
    pub fn begin_stop(&self) {
        self.stopping.store(true, Ordering::Release);
        self.initialized.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.initialized.load(Ordering::Acquire) && !self.is_stopping()
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    /// The relay is not initialized or is shutting down.
    NotRunning,
    /// The event filter does not select this type.
    Filtered,
    /// A bounded queue rejected the record.
    Overflow,
}

/// Cheap, cloneable submission handle.
#[derive(Clone)]
pub struct Producer {
    queue: Arc<EventQueue>,
    lifecycle: Arc<Lifecycle>,
    mask: EventMask,
}

impl Producer {
    pub fn new(queue: Arc<EventQueue>, lifecycle: Arc<Lifecycle>, mask: EventMask) -> Self {
        Self {
            queue,
            lifecycle,
            mask,
        }
    }

    /// Hands a record over to the dispatcher.
    pub fn submit(&self, record: EventRecord) -> SubmitOutcome {
        if !self.lifecycle.is_running() {
            trace!("Relay not running, dropping event");
            return SubmitOutcome::NotRunning;
        }

        let code = record.event_type().unwrap_or_default();
        if !self.mask.allows(code) {
            trace!(event_type = code, "Event type not selected, dropping event");
            return SubmitOutcome::Filtered;
        }

        match self.queue.push(record) {
            PushOutcome::Queued | PushOutcome::Evicted => SubmitOutcome::Queued,
            PushOutcome::Rejected => SubmitOutcome::Overflow,
            PushOutcome::Closed => SubmitOutcome::NotRunning,
        }
    }
}
