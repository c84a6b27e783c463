use crate::diagnostics::SELF_LOG_TARGET;
use crate::domain::LogEvent;
use clap::ValueEnum;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::warn;

// Prevent excessive memory allocation
const MAX_CAPACITY: usize = 100_000_000;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum BufferError {
    #[error("Invalid buffer capacity: {0}")]
    InvalidCapacity(usize),
    #[error("Invalid high-water mark {high_water_mark} for capacity {capacity}")]
    InvalidHighWaterMark { high_water_mark: usize, capacity: usize },
}

/// What `submit` does once the buffer holds `capacity` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Evict the oldest buffered event to make room for the new one.
    DropOldest,
    /// Keep the buffered events and discard the incoming one.
    #[default]
    RejectNewest,
}

/// Result of a `submit` call, for callers that care.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    AcceptedEvictedOldest,
    Rejected,
}

impl SubmitOutcome {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, SubmitOutcome::Rejected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferMetrics {
    pub capacity: usize,
    pub len: usize,
    pub submitted: u64,
    pub drained: u64,
    pub dropped: u64,
    pub peak_len: usize,
}

#[derive(Debug)]
struct QueueState {
    events: VecDeque<LogEvent>,
    closed: bool,
}

/// Bounded FIFO queue between producers and the batch scheduler.
///
/// `submit` holds the lock only for a push/pop on the deque, so it never
/// waits on anything slower than another `submit` or `drain`.
#[derive(Debug)]
pub struct EventBuffer {
    queue: Mutex<QueueState>,
    capacity: usize,
    high_water_mark: usize,
    policy: OverflowPolicy,
    notify: Notify,
    overflowing: AtomicBool,
    submitted: AtomicU64,
    drained: AtomicU64,
    dropped: AtomicU64,
    peak_len: AtomicUsize,
}

impl EventBuffer {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Result<Self, BufferError> {
        Self::with_high_water_mark(capacity, capacity, policy)
    }

    /// `high_water_mark` is the length at which the scheduler gets woken early.
    pub fn with_high_water_mark(
        capacity: usize,
        high_water_mark: usize,
        policy: OverflowPolicy,
    ) -> Result<Self, BufferError> {
        if capacity == 0 || capacity > MAX_CAPACITY {
            return Err(BufferError::InvalidCapacity(capacity));
        }
        if high_water_mark == 0 || high_water_mark > capacity {
            return Err(BufferError::InvalidHighWaterMark {
                high_water_mark,
                capacity,
            });
        }

        Ok(Self {
            queue: Mutex::new(QueueState {
                events: VecDeque::with_capacity(capacity.min(4096)),
                closed: false,
            }),
            capacity,
            high_water_mark,
            policy,
            notify: Notify::new(),
            overflowing: AtomicBool::new(false),
            submitted: AtomicU64::new(0),
            drained: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            peak_len: AtomicUsize::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.queue.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops intake. Every `submit` that returns after this call is
    /// `Rejected`, and every event accepted before it is still drainable.
    pub fn close(&self) {
        self.queue.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.queue.lock().closed
    }

    /// Enqueues an event. Never blocks on I/O and never fails; overflow is
    /// handled by the configured policy and reported on the self-log target.
    /// A closed buffer rejects without counting a drop.
    pub fn submit(&self, event: LogEvent) -> SubmitOutcome {
        let (outcome, len) = {
            let mut queue = self.queue.lock();
            if queue.closed {
                return SubmitOutcome::Rejected;
            }
            self.submitted.fetch_add(1, Ordering::Relaxed);

            let events = &mut queue.events;
            if events.len() < self.capacity {
                events.push_back(event);
                (SubmitOutcome::Accepted, events.len())
            } else {
                match self.policy {
                    OverflowPolicy::DropOldest => {
                        events.pop_front();
                        events.push_back(event);
                        (SubmitOutcome::AcceptedEvictedOldest, events.len())
                    }
                    OverflowPolicy::RejectNewest => (SubmitOutcome::Rejected, events.len()),
                }
            }
        };

        if outcome != SubmitOutcome::Accepted {
            self.record_drop();
        }
        self.update_peak_len(len);

        if len >= self.high_water_mark {
            self.notify.notify_one();
        }

        outcome
    }

    /// Removes and returns up to `max` events in FIFO order.
    pub fn drain(&self, max: usize) -> Vec<LogEvent> {
        let batch: Vec<LogEvent> = {
            let mut queue = self.queue.lock();
            let take = max.min(queue.events.len());
            queue.events.drain(..take).collect()
        };

        if !batch.is_empty() {
            self.drained.fetch_add(batch.len() as u64, Ordering::Relaxed);
            // Re-arm the overflow report
            self.overflowing.store(false, Ordering::Relaxed);
        }

        batch
    }

    /// Resolves once the buffer has reached its high-water mark.
    pub async fn high_water_reached(&self) {
        self.notify.notified().await;
    }

    pub fn metrics(&self) -> BufferMetrics {
        BufferMetrics {
            capacity: self.capacity,
            len: self.len(),
            submitted: self.submitted.load(Ordering::Relaxed),
            drained: self.drained.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            peak_len: self.peak_len.load(Ordering::Relaxed),
        }
    }

    fn record_drop(&self) {
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if !self.overflowing.swap(true, Ordering::Relaxed) {
            warn!(
                target: SELF_LOG_TARGET,
                capacity = self.capacity,
                policy = ?self.policy,
                dropped_total = dropped,
                "Event buffer full, dropping events until the next drain"
            );
        }
    }

    fn update_peak_len(&self, current: usize) {
        let mut peak = self.peak_len.load(Ordering::Relaxed);
        while current > peak {
            match self.peak_len.compare_exchange_weak(
                peak,
                current,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => peak = x,
            }
        }
    }
}

/// Shared handle type used by the sink and the scheduler.
pub type SharedBuffer = Arc<EventBuffer>;
