//! FIFO hand-off between host threads and the dispatcher task.
//!
//! `push` is synchronous and never waits, so it can be called from threads
//! that are not part of the tokio runtime. `pop` is async and suspends until
//! an item is available. The queue is unbounded unless a capacity is
//! configured, in which case the overflow policy decides which record is
//! dropped. The shutdown sentinel is exempt from the bound.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::warn;

use super::record::EventRecord;

/// Item delivered by [`EventQueue::pop`].
#[derive(Debug)]
pub enum QueueItem {
    Event(EventRecord),
    /// Pushed once by [`EventQueue::shutdown`]; nothing follows it.
    Shutdown,
}

/// Which record to give up when a bounded queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Reject the incoming record.
    #[default]
    DropNewest,
    /// Evict the record at the head of the queue.
    DropOldest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// The incoming record was rejected.
    Rejected,
    /// The record was queued after evicting the oldest one.
    Evicted,
    /// The queue already holds the shutdown sentinel.
    Closed,
}

struct Slots {
    items: VecDeque<QueueItem>,
    /// Number of `QueueItem::Event` entries in `items`.
    records: usize,
    closed: bool,
}

pub struct EventQueue {
    slots: Mutex<Slots>,
    available: Notify,
    /// 0 means unbounded.
    capacity: usize,
    overflow: OverflowPolicy,
    dropped: AtomicU64,
}

impl EventQueue {
    pub fn new(capacity: usize, overflow: OverflowPolicy) -> Self {
        Self {
            slots: Mutex::new(Slots {
                items: VecDeque::new(),
                records: 0,
                closed: false,
            }),
            available: Notify::new(),
            capacity,
            overflow,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(0, OverflowPolicy::default())
    }

    /// Appends a record at the tail.
    pub fn push(&self, record: EventRecord) -> PushOutcome {
        let mut slots = self.lock();
        if slots.closed {
            return PushOutcome::Closed;
        }

        let mut outcome = PushOutcome::Queued;
        if self.capacity > 0 && slots.records >= self.capacity {
            match self.overflow {
                OverflowPolicy::DropNewest => {
                    drop(slots);
                    self.count_drop("incoming");
                    return PushOutcome::Rejected;
                }
                OverflowPolicy::DropOldest => {
                    // The sentinel is always last and the queue is open, so
                    // the head is a record.
                    slots.items.pop_front();
                    slots.records -= 1;
                    outcome = PushOutcome::Evicted;
                }
            }
        }

        slots.items.push_back(QueueItem::Event(record));
        slots.records += 1;
        drop(slots);

        if outcome == PushOutcome::Evicted {
            self.count_drop("oldest");
        }
        self.available.notify_one();
        outcome
    }

    /// Closes the queue by appending the sentinel after every queued record.
    ///
    /// Later pushes return [`PushOutcome::Closed`]. Calling this twice has no
    /// further effect.
    pub fn shutdown(&self) {
        let mut slots = self.lock();
        if slots.closed {
            return;
        }
        slots.closed = true;
        slots.items.push_back(QueueItem::Shutdown);
        drop(slots);
        self.available.notify_one();
    }

    /// Waits for the next item. Meant for a single consumer.
    pub async fn pop(&self) -> QueueItem {
        loop {
            if let Some(item) = self.try_pop() {
                return item;
            }
            self.available.notified().await;
        }
    }

    pub fn try_pop(&self) -> Option<QueueItem> {
        let mut slots = self.lock();
        let item = slots.items.pop_front()?;
        if matches!(item, QueueItem::Event(_)) {
            slots.records -= 1;
        }
        Some(item)
    }

    /// Records waiting to be dispatched. The sentinel is not counted.
    pub fn len(&self) -> usize {
        self.lock().records
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Records given up to the overflow policy so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn count_drop(&self, which: &str) {
        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            capacity = self.capacity,
            dropped = total,
            "Event queue full, dropped the {which} event"
        );
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use tracing_test::traced_test;

    use super::*;

    fn record(n: i64) -> EventRecord {
        EventRecord::new(1).with("n", n)
    }

    fn number(item: QueueItem) -> Option<i64> {
        match item {
            QueueItem::Event(record) => record.get("n").and_then(|v| v.as_i64()),
            QueueItem::Shutdown => None,
        }
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = EventQueue::unbounded();
        for n in 0..5 {
            assert_eq!(queue.push(record(n)), PushOutcome::Queued);
        }
        assert_eq!(queue.len(), 5);

        for n in 0..5 {
            assert_eq!(number(queue.pop().await), Some(n));
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_sentinel_comes_after_queued_records() {
        let queue = EventQueue::unbounded();
        queue.push(record(1));
        queue.push(record(2));
        queue.shutdown();

        assert_eq!(queue.push(record(3)), PushOutcome::Closed);
        assert_eq!(queue.len(), 2);

        assert_eq!(number(queue.pop().await), Some(1));
        assert_eq!(number(queue.pop().await), Some(2));
        assert!(matches!(queue.pop().await, QueueItem::Shutdown));
        assert!(queue.try_pop().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_twice_pushes_one_sentinel() {
        let queue = EventQueue::unbounded();
        queue.shutdown();
        queue.shutdown();

        assert!(matches!(queue.try_pop(), Some(QueueItem::Shutdown)));
        assert!(queue.try_pop().is_none());
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = Arc::new(EventQueue::unbounded());

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { number(queue.pop().await) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        queue.push(record(7));
        let popped = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("pop did not wake up")
            .unwrap();
        assert_eq!(popped, Some(7));
    }

    #[tokio::test]
    async fn test_concurrent_producers_lose_nothing() {
        let queue = Arc::new(EventQueue::unbounded());

        let producers: Vec<_> = (0..4)
            .map(|t| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for n in 0..250 {
                        queue.push(record(t * 1000 + n));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        queue.shutdown();

        let mut seen = Vec::new();
        while let Some(n) = number(queue.pop().await) {
            seen.push(n);
        }
        assert_eq!(seen.len(), 1000);

        // Per producer order is preserved.
        for t in 0..4 {
            let own: Vec<_> = seen.iter().filter(|n| **n / 1000 == t).collect();
            assert!(own.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_drop_newest_rejects_incoming() {
        let queue = EventQueue::new(2, OverflowPolicy::DropNewest);
        queue.push(record(1));
        queue.push(record(2));

        assert_eq!(queue.push(record(3)), PushOutcome::Rejected);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.len(), 2);
        assert!(logs_contain("dropped the incoming event"));

        assert_eq!(number(queue.pop().await), Some(1));
        assert_eq!(number(queue.pop().await), Some(2));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_drop_oldest_evicts_head() {
        let queue = EventQueue::new(2, OverflowPolicy::DropOldest);
        queue.push(record(1));
        queue.push(record(2));

        assert_eq!(queue.push(record(3)), PushOutcome::Evicted);
        assert_eq!(queue.dropped(), 1);
        assert!(logs_contain("dropped the oldest event"));

        assert_eq!(number(queue.pop().await), Some(2));
        assert_eq!(number(queue.pop().await), Some(3));
    }

    #[tokio::test]
    async fn test_sentinel_ignores_capacity() {
        let queue = EventQueue::new(1, OverflowPolicy::DropOldest);
        queue.push(record(1));
        queue.shutdown();

        assert_eq!(queue.len(), 1);
        assert_eq!(number(queue.pop().await), Some(1));
        assert!(matches!(queue.pop().await, QueueItem::Shutdown));
        assert_eq!(queue.dropped(), 0);
    }

    #[test]
    fn test_overflow_policy_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            overflow: OverflowPolicy,
        }

        let parsed: Wrapper = toml::from_str(r#"overflow = "drop_oldest""#).unwrap();
        assert_eq!(parsed.overflow, OverflowPolicy::DropOldest);
        assert_eq!(OverflowPolicy::default(), OverflowPolicy::DropNewest);
    }
}
