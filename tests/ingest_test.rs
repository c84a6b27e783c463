use parking_lot::Mutex;
use rask_log_analytics_sink::app::{pump_channel, pump_lines};
use rask_log_analytics_sink::buffer::Batch;
use rask_log_analytics_sink::sender::{BatchDelivery, DeliveryOutcome, TransmissionResult};
use rask_log_analytics_sink::{LogAnalyticsSink, OverflowPolicy, Severity, SinkConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
struct Recorder {
    batches: Arc<Mutex<Vec<Vec<(Severity, String)>>>>,
}

impl BatchDelivery for Recorder {
    async fn deliver(&self, batch: &Batch) -> DeliveryOutcome {
        self.batches.lock().push(
            batch
                .events()
                .iter()
                .map(|e| (e.severity(), e.message_template().to_string()))
                .collect(),
        );
        DeliveryOutcome::Delivered(TransmissionResult {
            status_code: 200,
            latency: Duration::ZERO,
            batch_id: batch.id().to_string(),
            events: batch.size(),
            bytes_sent: 0,
        })
    }
}

fn config(capacity: usize, batch_size: usize, policy: OverflowPolicy) -> SinkConfig {
    let mut config = SinkConfig::new(
        "ws",
        "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=",
        "AppLogs",
    );
    config.buffer_capacity = capacity;
    config.overflow_policy = policy;
    config.scheduler.batch_size = batch_size;
    config.scheduler.flush_interval = Duration::from_secs(3600);
    config.scheduler.shutdown_timeout = Duration::from_secs(1);
    config
}

#[tokio::test]
async fn test_pump_mixed_input() {
    let recorder = Recorder::default();
    let sink = LogAnalyticsSink::start_with_delivery(
        &config(100, 10, OverflowPolicy::RejectNewest),
        recorder.clone(),
    )
    .unwrap();

    let input = concat!(
        r#"{"level":"Error","messageTemplate":"Failed {Op}","properties":{"Op":"save"}}"#,
        "\n",
        "\n",
        "not json at all\n",
        r#"{"level":"Debug","messageTemplate":"done"}"#,
        "\n",
    );
    let stats = pump_lines(input.as_bytes(), &sink, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(stats.lines, 4);
    assert_eq!(stats.accepted, 3);
    assert_eq!(stats.rejected, 0);

    sink.shutdown().await.unwrap();
    let delivered: Vec<_> = recorder.batches.lock().concat();
    assert_eq!(
        delivered,
        vec![
            (Severity::Error, "Failed {Op}".to_string()),
            (Severity::Information, "not json at all".to_string()),
            (Severity::Debug, "done".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_overflow_rejects_newest_when_worker_is_idle() {
    let recorder = Recorder::default();
    let sink = LogAnalyticsSink::start_with_delivery(
        &config(2, 2, OverflowPolicy::RejectNewest),
        recorder.clone(),
    )
    .unwrap();
    // Let the first, immediate tick pass with an empty buffer
    tokio::time::sleep(Duration::from_millis(20)).await;

    // No await between submits, so the worker cannot drain in between
    let outcomes: Vec<bool> = ["a", "b", "c"]
        .iter()
        .map(|m| {
            sink.submit(rask_log_analytics_sink::LogEvent::new(Severity::Information, *m))
                .is_accepted()
        })
        .collect();
    assert_eq!(outcomes, vec![true, true, false]);
    assert_eq!(sink.metrics().buffer.dropped, 1);

    sink.shutdown().await.unwrap();
    let delivered: Vec<String> = recorder
        .batches
        .lock()
        .concat()
        .into_iter()
        .map(|(_, m)| m)
        .collect();
    assert_eq!(delivered, vec!["a", "b"]);
}

#[tokio::test]
async fn test_overflow_drops_oldest_when_configured() {
    let recorder = Recorder::default();
    let sink = LogAnalyticsSink::start_with_delivery(
        &config(2, 2, OverflowPolicy::DropOldest),
        recorder.clone(),
    )
    .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    for m in ["a", "b", "c"] {
        assert!(
            sink.submit(rask_log_analytics_sink::LogEvent::new(Severity::Information, m))
                .is_accepted()
        );
    }

    sink.shutdown().await.unwrap();
    let delivered: Vec<String> = recorder
        .batches
        .lock()
        .concat()
        .into_iter()
        .map(|(_, m)| m)
        .collect();
    assert_eq!(delivered, vec!["b", "c"]);
}

#[tokio::test]
async fn test_pump_stops_on_cancellation() {
    let sink = LogAnalyticsSink::start_with_delivery(
        &config(100, 10, OverflowPolicy::RejectNewest),
        Recorder::default(),
    )
    .unwrap();

    // A reader that never yields a line
    let (reader, _writer) = tokio::io::duplex(64);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let stats = pump_lines(tokio::io::BufReader::new(reader), &sink, &cancel)
        .await
        .unwrap();
    assert_eq!(stats.lines, 0);
    sink.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_pump_channel_stops_on_cancellation_with_open_sender() {
    let recorder = Recorder::default();
    let sink = LogAnalyticsSink::start_with_delivery(
        &config(100, 10, OverflowPolicy::RejectNewest),
        recorder.clone(),
    )
    .unwrap();

    // The sender stays open, as with a terminal nobody types into
    let (tx, rx) = tokio::sync::mpsc::channel(8);
    tx.send(Ok(r#"{"level":"Warning","messageTemplate":"typed"}"#.to_string()))
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let pump = {
        let sink = sink.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { pump_channel(rx, &sink, &cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();

    let stats = tokio::time::timeout(Duration::from_secs(1), pump)
        .await
        .expect("pump should stop once cancelled")
        .unwrap()
        .unwrap();
    assert_eq!(stats.lines, 1);
    assert_eq!(stats.accepted, 1);

    sink.shutdown().await.unwrap();
    assert_eq!(
        recorder.batches.lock().concat(),
        vec![(Severity::Warning, "typed".to_string())]
    );
    drop(tx);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_events_accepted_during_shutdown_are_all_accounted_for() {
    for _ in 0..20 {
        let recorder = Recorder::default();
        let sink = LogAnalyticsSink::start_with_delivery(
            &config(100_000, 100, OverflowPolicy::RejectNewest),
            recorder.clone(),
        )
        .unwrap();

        let producers: Vec<_> = (0..3)
            .map(|p| {
                let sink = sink.clone();
                std::thread::spawn(move || {
                    let mut accepted = 0_u64;
                    let mut n = 0_u64;
                    while !sink.is_shutting_down() {
                        let event = rask_log_analytics_sink::LogEvent::new(
                            Severity::Information,
                            format!("p{p}-{n}"),
                        );
                        if sink.submit(event).is_accepted() {
                            accepted += 1;
                        }
                        n += 1;
                    }
                    accepted
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(2)).await;
        let report = sink.shutdown().await.unwrap();
        let accepted: u64 = producers.into_iter().map(|p| p.join().unwrap()).sum();

        assert_eq!(
            accepted,
            report.events_delivered + report.events_dropped + report.events_abandoned
        );
        assert_eq!(
            recorder.batches.lock().concat().len() as u64,
            report.events_delivered
        );
        assert!(sink.metrics().buffer.len == 0);
    }
}
