use super::config::{ConfigError, SharedKey};
use super::pipeline::{BatchScheduler, SchedulerConfig, SchedulerReport, SchedulerStats};
use crate::buffer::{BufferMetrics, EventBuffer, OverflowPolicy, SharedBuffer, SubmitOutcome};
use crate::diagnostics::SELF_LOG_TARGET;
use crate::domain::{LogEvent, SinkError};
use crate::sender::{
    BatchDelivery, BatchTransmitter, ClientConfig, EndpointConfig, HttpClient, PayloadCodec,
    SharedKeySigner,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

// Extra time granted to the worker on top of the flush timeout before it is aborted
const SHUTDOWN_MARGIN: Duration = Duration::from_secs(1);

/// Everything a running sink needs.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub endpoint: EndpointConfig,
    pub shared_key: SharedKey,
    pub use_utc_timestamps: bool,
    pub time_generated_field: Option<String>,
    pub buffer_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    pub scheduler: SchedulerConfig,
    pub client: ClientConfig,
}

impl SinkConfig {
    pub fn new(
        workspace_id: impl Into<String>,
        shared_key: impl Into<String>,
        log_type: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: EndpointConfig::new(workspace_id, log_type),
            shared_key: SharedKey::new(shared_key),
            use_utc_timestamps: true,
            time_generated_field: None,
            buffer_capacity: 25_000,
            overflow_policy: OverflowPolicy::default(),
            scheduler: SchedulerConfig::default(),
            client: ClientConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.batch_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "Batch size must be greater than 0".to_string(),
            ));
        }
        if self.buffer_capacity < self.scheduler.batch_size {
            return Err(ConfigError::InvalidConfig(format!(
                "Buffer capacity ({}) must be at least as large as batch size ({})",
                self.buffer_capacity, self.scheduler.batch_size
            )));
        }
        if self.scheduler.flush_interval.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "Flush interval must be greater than 0".to_string(),
            ));
        }
        if self.client.timeout.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "Request timeout must be greater than 0".to_string(),
            ));
        }
        self.scheduler
            .retry
            .validate()
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkMetrics {
    pub buffer: BufferMetrics,
    pub delivery: SchedulerReport,
}

struct SinkInner {
    buffer: SharedBuffer,
    cancel: CancellationToken,
    stats: Arc<SchedulerStats>,
    worker: Mutex<Option<JoinHandle<SchedulerReport>>>,
    shutdown_timeout: Duration,
    rejected_after_shutdown: AtomicBool,
}

impl SinkInner {
    /// Closing the buffer before cancelling means every accepted event is
    /// visible to the worker's final drain.
    fn begin_shutdown(&self) {
        self.buffer.close();
        self.cancel.cancel();
    }
}

impl Drop for SinkInner {
    fn drop(&mut self) {
        // Lets a worker whose sink was never shut down flush and exit
        self.begin_shutdown();
    }
}

/// Batching sink for the Log Analytics Data Collector API.
///
/// Clones share the same buffer and worker. `submit` only touches the
/// in-memory buffer; a background task owns all network I/O.
#[derive(Clone)]
pub struct LogAnalyticsSink {
    inner: Arc<SinkInner>,
}

impl LogAnalyticsSink {
    /// Validates the configuration, decodes the shared key and spawns the
    /// delivery worker. Must be called from within a Tokio runtime.
    pub fn start(config: SinkConfig) -> Result<Self, SinkError> {
        config.validate()?;
        let signer = SharedKeySigner::new(config.shared_key.expose()).map_err(ConfigError::from)?;
        let client = HttpClient::new(config.endpoint.clone(), config.client.clone())?;

        let mut transmitter = BatchTransmitter::new(
            client,
            PayloadCodec::flat(config.use_utc_timestamps),
            signer,
        );
        if let Some(field) = &config.time_generated_field {
            transmitter = transmitter.with_time_generated_field(field.clone());
        }

        info!(
            "Starting Log Analytics sink (workspace={}, log_type={}, url={})",
            transmitter.client.workspace_id(),
            transmitter.client.log_type(),
            transmitter.client.ingestion_url
        );
        Self::start_with_delivery(&config, transmitter)
    }

    /// Like [`start`](Self::start) but with a caller-supplied delivery
    /// backend. The endpoint and key fields of `config` are not used.
    pub fn start_with_delivery<D: BatchDelivery>(
        config: &SinkConfig,
        delivery: D,
    ) -> Result<Self, SinkError> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SinkError::Worker(format!("No Tokio runtime available: {e}")))?;

        let buffer = Arc::new(
            EventBuffer::with_high_water_mark(
                config.buffer_capacity,
                config.scheduler.batch_size,
                config.overflow_policy,
            )
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?,
        );

        let cancel = CancellationToken::new();
        let scheduler = BatchScheduler::new(
            buffer.clone(),
            Arc::new(delivery),
            config.scheduler.clone(),
            cancel.clone(),
        );
        let stats = scheduler.stats();
        let worker = runtime.spawn(scheduler.run());

        Ok(Self {
            inner: Arc::new(SinkInner {
                buffer,
                cancel,
                stats,
                worker: Mutex::new(Some(worker)),
                shutdown_timeout: config.scheduler.shutdown_timeout,
                rejected_after_shutdown: AtomicBool::new(false),
            }),
        })
    }

    /// Hands an event to the buffer. Never blocks on the network and never
    /// fails; events arriving after shutdown began are rejected.
    pub fn submit(&self, event: LogEvent) -> SubmitOutcome {
        let outcome = self.inner.buffer.submit(event);
        if outcome == SubmitOutcome::Rejected
            && self.inner.buffer.is_closed()
            && !self.inner.rejected_after_shutdown.swap(true, Ordering::Relaxed)
        {
            warn!(
                target: SELF_LOG_TARGET,
                "Sink is shutting down, rejecting further events"
            );
        }
        outcome
    }

    pub fn metrics(&self) -> SinkMetrics {
        SinkMetrics {
            buffer: self.inner.buffer.metrics(),
            delivery: self.inner.stats.snapshot(),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.buffer.is_closed()
    }

    /// Stops scheduling, flushes what is left within the shutdown timeout
    /// and waits for the worker. Later calls, from this or any clone, just
    /// return the current counters.
    pub async fn shutdown(&self) -> Result<SchedulerReport, SinkError> {
        self.inner.begin_shutdown();
        let Some(mut worker) = self.inner.worker.lock().take() else {
            return Ok(self.inner.stats.snapshot());
        };

        info!("Shutting down Log Analytics sink");
        let grace = self.inner.shutdown_timeout + SHUTDOWN_MARGIN;

        match tokio::time::timeout(grace, &mut worker).await {
            Ok(Ok(report)) if report.events_abandoned > 0 => Err(SinkError::ShutdownTimeout {
                remaining: report.events_abandoned as usize,
            }),
            Ok(Ok(report)) => {
                info!(
                    "Log Analytics sink stopped: {} events delivered, {} dropped",
                    report.events_delivered, report.events_dropped
                );
                Ok(report)
            }
            Ok(Err(e)) => {
                error!("Sink worker failed: {}", e);
                Err(SinkError::Worker(e.to_string()))
            }
            Err(_) => {
                worker.abort();
                let remaining = self.inner.buffer.len() + self.inner.stats.in_flight();
                error!("Sink worker did not stop within {:?}, aborted", grace);
                Err(SinkError::ShutdownTimeout { remaining })
            }
        }
    }
}

impl std::fmt::Debug for LogAnalyticsSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogAnalyticsSink")
            .field("buffered", &self.inner.buffer.len())
            .field("shutting_down", &self.inner.buffer.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Batch;
    use crate::domain::Severity;
    use crate::sender::{DeliveryOutcome, TransmissionResult};

    const KEY: &str = "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=";

    struct AlwaysOk;

    impl BatchDelivery for AlwaysOk {
        async fn deliver(&self, batch: &Batch) -> DeliveryOutcome {
            DeliveryOutcome::Delivered(TransmissionResult {
                status_code: 200,
                latency: Duration::ZERO,
                batch_id: batch.id().to_string(),
                events: batch.size(),
                bytes_sent: 0,
            })
        }
    }

    struct Hangs;

    impl BatchDelivery for Hangs {
        async fn deliver(&self, _batch: &Batch) -> DeliveryOutcome {
            std::future::pending().await
        }
    }

    /// Blocks its worker thread, so the scheduler cannot honour its own
    /// flush timeout.
    struct BlocksThread;

    impl BatchDelivery for BlocksThread {
        async fn deliver(&self, batch: &Batch) -> DeliveryOutcome {
            std::thread::sleep(Duration::from_secs(2));
            DeliveryOutcome::Delivered(TransmissionResult {
                status_code: 200,
                latency: Duration::ZERO,
                batch_id: batch.id().to_string(),
                events: batch.size(),
                bytes_sent: 0,
            })
        }
    }

    fn config() -> SinkConfig {
        let mut config = SinkConfig::new("ws", KEY, "AppLogs");
        config.buffer_capacity = 10;
        config.scheduler.batch_size = 5;
        config.scheduler.flush_interval = Duration::from_secs(3600);
        config.scheduler.shutdown_timeout = Duration::from_millis(200);
        config
    }

    #[tokio::test]
    async fn test_start_rejects_malformed_key() {
        let config = SinkConfig::new("ws", "not base64!!", "AppLogs");
        assert!(matches!(
            LogAnalyticsSink::start(config),
            Err(SinkError::Config(ConfigError::InvalidSharedKey(_)))
        ));
    }

    #[tokio::test]
    async fn test_start_rejects_capacity_below_batch_size() {
        let mut config = config();
        config.buffer_capacity = 4;
        assert!(matches!(
            LogAnalyticsSink::start_with_delivery(&config, AlwaysOk),
            Err(SinkError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_start_rejects_zero_request_timeout() {
        let mut config = config();
        config.client.timeout = Duration::ZERO;
        assert!(matches!(
            LogAnalyticsSink::start_with_delivery(&config, AlwaysOk),
            Err(SinkError::Config(ConfigError::InvalidConfig(_)))
        ));
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        assert!(matches!(
            LogAnalyticsSink::start_with_delivery(&config(), AlwaysOk),
            Err(SinkError::Worker(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_flushes_and_rejects_late_events() {
        let sink = LogAnalyticsSink::start_with_delivery(&config(), AlwaysOk).unwrap();
        for i in 0..3 {
            assert!(
                sink.submit(LogEvent::new(Severity::Information, format!("e{i}")))
                    .is_accepted()
            );
        }

        let report = sink.shutdown().await.unwrap();
        assert_eq!(report.events_delivered, 3);
        assert_eq!(
            sink.submit(LogEvent::new(Severity::Information, "late")),
            SubmitOutcome::Rejected
        );

        // Second call is a no-op
        assert_eq!(sink.shutdown().await.unwrap().events_delivered, 3);
    }

    #[tokio::test]
    async fn test_shutdown_is_bounded_when_delivery_hangs() {
        let sink = LogAnalyticsSink::start_with_delivery(&config(), Hangs).unwrap();
        sink.submit(LogEvent::new(Severity::Error, "stuck"));

        let started = std::time::Instant::now();
        let result = sink.shutdown().await;
        assert!(matches!(result, Err(SinkError::ShutdownTimeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_aborted_worker_reports_in_flight_batch() {
        let sink = LogAnalyticsSink::start_with_delivery(&config(), BlocksThread).unwrap();
        sink.submit(LogEvent::new(Severity::Error, "held"));

        let result = sink.shutdown().await;
        assert!(matches!(
            result,
            Err(SinkError::ShutdownTimeout { remaining: 1 })
        ));
        assert!(sink.is_shutting_down());
    }
}
