use crate::buffer::{Batch, SharedBuffer};
use crate::diagnostics::SELF_LOG_TARGET;
use crate::reliability::{RetryConfig, RetryManager};
use crate::sender::{BatchDelivery, DeliveryOutcome};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub shutdown_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval: Duration::from_secs(2),
            shutdown_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
        }
    }
}

/// Counters shared between the worker and whoever holds the sink.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    batches_delivered: AtomicU64,
    batches_dropped: AtomicU64,
    events_delivered: AtomicU64,
    events_dropped: AtomicU64,
    retries: AtomicU64,
    /// Size of the batch the worker currently holds outside the buffer.
    in_flight: AtomicUsize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerReport {
    pub batches_delivered: u64,
    pub batches_dropped: u64,
    pub events_delivered: u64,
    pub events_dropped: u64,
    pub retries: u64,
    /// Events still buffered when the shutdown flush gave up.
    pub events_abandoned: u64,
}

impl SchedulerStats {
    fn record_delivered(&self, events: usize) {
        self.batches_delivered.fetch_add(1, Ordering::Relaxed);
        self.events_delivered.fetch_add(events as u64, Ordering::Relaxed);
    }

    fn record_dropped(&self, events: usize) {
        self.batches_dropped.fetch_add(1, Ordering::Relaxed);
        self.events_dropped.fetch_add(events as u64, Ordering::Relaxed);
    }

    fn set_in_flight(&self, events: usize) {
        self.in_flight.store(events, Ordering::Relaxed);
    }

    /// Events taken from the buffer but not yet delivered or dropped.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> SchedulerReport {
        SchedulerReport {
            batches_delivered: self.batches_delivered.load(Ordering::Relaxed),
            batches_dropped: self.batches_dropped.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            events_abandoned: 0,
        }
    }
}

enum Attempt {
    Finished,
    Interrupted(Batch),
}

/// Background worker that drains the buffer and ships batches.
///
/// Wakes every `flush_interval` or when the buffer reaches its high-water
/// mark, whichever comes first, and keeps draining until the buffer is
/// empty. A failing batch is retried in place, so later batches wait behind
/// it and intake order is preserved.
pub struct BatchScheduler<D: BatchDelivery> {
    buffer: SharedBuffer,
    delivery: Arc<D>,
    retry: RetryManager,
    config: SchedulerConfig,
    cancel: CancellationToken,
    stats: Arc<SchedulerStats>,
}

impl<D: BatchDelivery> BatchScheduler<D> {
    pub fn new(
        buffer: SharedBuffer,
        delivery: Arc<D>,
        config: SchedulerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            buffer,
            delivery,
            retry: RetryManager::new(config.retry.clone()),
            config,
            cancel,
            stats: Arc::new(SchedulerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<SchedulerStats> {
        self.stats.clone()
    }

    pub fn spawn(self) -> JoinHandle<SchedulerReport> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) -> SchedulerReport {
        info!(
            "Starting batch scheduler (batch_size={}, flush_interval={:?})",
            self.config.batch_size, self.config.flush_interval
        );

        let mut ticker = tokio::time::interval(self.config.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut carried = None;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
                _ = self.buffer.high_water_reached() => {
                    debug!("Buffer reached high-water mark, flushing early");
                }
            }

            if let Some(batch) = self.flush_available().await {
                carried = Some(batch);
                break;
            }
        }

        info!("Batch scheduler stopping, flushing remaining events");
        let abandoned = self.final_flush(carried).await;

        let mut report = self.stats.snapshot();
        report.events_abandoned = abandoned as u64;
        info!(
            "Batch scheduler stopped: {} batches delivered, {} dropped, {} events abandoned",
            report.batches_delivered, report.batches_dropped, report.events_abandoned
        );
        report
    }

    /// Drains and delivers until the buffer is empty or shutdown begins.
    /// Returns a batch whose delivery was interrupted by shutdown.
    async fn flush_available(&self) -> Option<Batch> {
        while !self.cancel.is_cancelled() {
            let events = self.buffer.drain(self.config.batch_size);
            if events.is_empty() {
                return None;
            }

            if let Attempt::Interrupted(batch) = self.deliver_with_retry(Batch::new(events)).await
            {
                return Some(batch);
            }
        }
        None
    }

    async fn deliver_with_retry(&self, batch: Batch) -> Attempt {
        let mut attempts = 0;
        self.stats.set_in_flight(batch.size());

        loop {
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                outcome = self.delivery.deliver(&batch) => Some(outcome),
            };
            let Some(outcome) = outcome else {
                debug!("Delivery of batch {} interrupted by shutdown", batch.id());
                return Attempt::Interrupted(batch);
            };
            attempts += 1;

            let error = match outcome {
                DeliveryOutcome::Delivered(_) => {
                    self.stats.record_delivered(batch.size());
                    self.stats.set_in_flight(0);
                    return Attempt::Finished;
                }
                DeliveryOutcome::Failed(error) => error,
            };

            if !error.is_retryable() || self.retry.should_give_up(attempts) {
                self.stats.record_dropped(batch.size());
                self.stats.set_in_flight(0);
                error!(
                    target: SELF_LOG_TARGET,
                    batch_id = %batch.id(),
                    events = batch.size(),
                    attempts,
                    age_ms = batch.created_at().elapsed().as_millis() as u64,
                    error = %error,
                    "Dropping batch after failed delivery"
                );
                return Attempt::Finished;
            }

            let delay = self.retry.calculate_delay(attempts - 1);
            self.stats.retries.fetch_add(1, Ordering::Relaxed);
            info!(
                target: SELF_LOG_TARGET,
                batch_id = %batch.id(),
                attempt = attempts + 1,
                delay_ms = delay.as_millis() as u64,
                "Retrying batch"
            );

            let slept = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => false,
                _ = tokio::time::sleep(delay) => true,
            };
            if !slept {
                return Attempt::Interrupted(batch);
            }
        }
    }

    /// One attempt per batch, no backoff, bounded by `shutdown_timeout`.
    /// Returns how many events were left behind.
    async fn final_flush(&self, carried: Option<Batch>) -> usize {
        let flush = async {
            if let Some(batch) = carried {
                self.deliver_once(batch).await;
            }
            loop {
                let events = self.buffer.drain(self.config.batch_size);
                if events.is_empty() {
                    break;
                }
                self.deliver_once(Batch::new(events)).await;
            }
        };

        if tokio::time::timeout(self.config.shutdown_timeout, flush)
            .await
            .is_err()
        {
            let remaining = self.buffer.len() + self.stats.in_flight();
            warn!(
                target: SELF_LOG_TARGET,
                remaining,
                timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                "Shutdown flush timed out, abandoning buffered events"
            );
            return remaining;
        }
        0
    }

    async fn deliver_once(&self, batch: Batch) {
        self.stats.set_in_flight(batch.size());
        let outcome = self.delivery.deliver(&batch).await;
        self.stats.set_in_flight(0);
        match outcome {
            DeliveryOutcome::Delivered(_) => self.stats.record_delivered(batch.size()),
            DeliveryOutcome::Failed(error) => {
                self.stats.record_dropped(batch.size());
                error!(
                    target: SELF_LOG_TARGET,
                    batch_id = %batch.id(),
                    events = batch.size(),
                    error = %error,
                    "Dropping batch during shutdown flush"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{EventBuffer, OverflowPolicy};
    use crate::domain::{LogEvent, Severity};
    use crate::sender::{TransmissionError, TransmissionResult};
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Records every batch it sees and answers from a script.
    #[derive(Default)]
    struct ScriptedDelivery {
        script: Mutex<VecDeque<Result<(), u16>>>,
        seen: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedDelivery {
        fn with_script(script: Vec<Result<(), u16>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn seen(&self) -> Vec<Vec<String>> {
            self.seen.lock().clone()
        }
    }

    impl BatchDelivery for ScriptedDelivery {
        async fn deliver(&self, batch: &Batch) -> DeliveryOutcome {
            self.seen.lock().push(
                batch
                    .events()
                    .iter()
                    .map(|e| e.message_template().to_string())
                    .collect(),
            );
            let next = self.script.lock().pop_front().unwrap_or(Ok(()));
            match next {
                Ok(()) => DeliveryOutcome::Delivered(TransmissionResult {
                    status_code: 200,
                    latency: Duration::ZERO,
                    batch_id: batch.id().to_string(),
                    events: batch.size(),
                    bytes_sent: 0,
                }),
                Err(status) => DeliveryOutcome::Failed(TransmissionError::HttpError {
                    status,
                    message: "scripted".to_string(),
                }),
            }
        }
    }

    fn buffer_with(n: usize) -> SharedBuffer {
        let buffer = Arc::new(
            EventBuffer::with_high_water_mark(100, 50, OverflowPolicy::RejectNewest).unwrap(),
        );
        for i in 0..n {
            buffer.submit(LogEvent::new(Severity::Information, format!("e{i}")));
        }
        buffer
    }

    fn config(batch_size: usize, retry: RetryConfig) -> SchedulerConfig {
        SchedulerConfig {
            batch_size,
            flush_interval: Duration::from_millis(20),
            shutdown_timeout: Duration::from_secs(1),
            retry,
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter: false,
            ..RetryConfig::default()
        }
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_drains_into_fixed_size_batches_in_order() {
        let buffer = buffer_with(3);
        let delivery = Arc::new(ScriptedDelivery::default());
        let cancel = CancellationToken::new();
        let handle = BatchScheduler::new(
            buffer,
            delivery.clone(),
            config(2, fast_retry(1)),
            cancel.clone(),
        )
        .spawn();

        wait_for(|| delivery.seen().len() == 2).await;
        cancel.cancel();
        let report = handle.await.unwrap();

        assert_eq!(
            delivery.seen(),
            vec![vec!["e0".to_string(), "e1".to_string()], vec!["e2".to_string()]]
        );
        assert_eq!(report.batches_delivered, 2);
        assert_eq!(report.events_delivered, 3);
    }

    #[tokio::test]
    async fn test_retries_retryable_failures_then_succeeds() {
        let buffer = buffer_with(1);
        let delivery = Arc::new(ScriptedDelivery::with_script(vec![
            Err(503),
            Err(500),
            Ok(()),
        ]));
        let cancel = CancellationToken::new();
        let handle = BatchScheduler::new(
            buffer,
            delivery.clone(),
            config(10, fast_retry(5)),
            cancel.clone(),
        )
        .spawn();

        wait_for(|| delivery.seen().len() == 3).await;
        cancel.cancel();
        let report = handle.await.unwrap();

        assert_eq!(report.batches_delivered, 1);
        assert_eq!(report.retries, 2);
        assert_eq!(report.batches_dropped, 0);
    }

    #[tokio::test]
    async fn test_drops_after_max_attempts_and_keeps_running() {
        let buffer = buffer_with(1);
        let delivery = Arc::new(ScriptedDelivery::with_script(vec![Err(500), Err(500)]));
        let cancel = CancellationToken::new();
        let handle = BatchScheduler::new(
            buffer.clone(),
            delivery.clone(),
            config(10, fast_retry(2)),
            cancel.clone(),
        )
        .spawn();

        wait_for(|| delivery.seen().len() == 2).await;
        buffer.submit(LogEvent::new(Severity::Information, "later"));
        wait_for(|| delivery.seen().len() == 3).await;
        cancel.cancel();
        let report = handle.await.unwrap();

        assert_eq!(report.batches_dropped, 1);
        assert_eq!(report.events_dropped, 1);
        assert_eq!(report.batches_delivered, 1);
        assert_eq!(delivery.seen()[2], vec!["later".to_string()]);
    }

    #[tokio::test]
    async fn test_non_retryable_failure_drops_immediately() {
        let buffer = buffer_with(1);
        let delivery = Arc::new(ScriptedDelivery::with_script(vec![Err(403)]));
        let cancel = CancellationToken::new();
        let handle = BatchScheduler::new(
            buffer,
            delivery.clone(),
            config(10, fast_retry(5)),
            cancel.clone(),
        )
        .spawn();

        wait_for(|| delivery.seen().len() == 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let report = handle.await.unwrap();

        assert_eq!(delivery.seen().len(), 1);
        assert_eq!(report.batches_dropped, 1);
        assert_eq!(report.retries, 0);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_remaining_events() {
        let buffer = Arc::new(EventBuffer::new(100, OverflowPolicy::RejectNewest).unwrap());
        let delivery = Arc::new(ScriptedDelivery::default());
        let cancel = CancellationToken::new();
        let scheduler = BatchScheduler::new(
            buffer.clone(),
            delivery.clone(),
            SchedulerConfig {
                flush_interval: Duration::from_secs(3600),
                ..config(4, fast_retry(1))
            },
            cancel.clone(),
        );
        let handle = scheduler.spawn();

        // Let the immediate first tick pass with an empty buffer
        tokio::time::sleep(Duration::from_millis(20)).await;
        for i in 0..10 {
            buffer.submit(LogEvent::new(Severity::Information, format!("late{i}")));
        }
        cancel.cancel();
        let report = handle.await.unwrap();

        assert_eq!(report.events_delivered, 10);
        assert_eq!(report.events_abandoned, 0);
        assert!(buffer.is_empty());
        assert!(delivery.seen().iter().all(|batch| batch.len() <= 4));
    }

    #[tokio::test]
    async fn test_high_water_mark_triggers_flush_before_interval() {
        let buffer = Arc::new(
            EventBuffer::with_high_water_mark(100, 5, OverflowPolicy::RejectNewest).unwrap(),
        );
        let delivery = Arc::new(ScriptedDelivery::default());
        let cancel = CancellationToken::new();
        let handle = BatchScheduler::new(
            buffer.clone(),
            delivery.clone(),
            SchedulerConfig {
                flush_interval: Duration::from_secs(3600),
                ..config(5, fast_retry(1))
            },
            cancel.clone(),
        )
        .spawn();

        tokio::time::sleep(Duration::from_millis(20)).await;
        for i in 0..5 {
            buffer.submit(LogEvent::new(Severity::Information, format!("hw{i}")));
        }
        wait_for(|| delivery.seen().len() == 1).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(delivery.seen()[0].len(), 5);
    }
}
