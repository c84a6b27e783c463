use super::service::LogAnalyticsSink;
use crate::domain::{LogEvent, Severity};
use chrono::{DateTime, Local};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::io::BufRead;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

// Lines read ahead of the sink by the reader thread
const LINE_CHANNEL_CAPACITY: usize = 1024;

/// One NDJSON input line. Every field is optional.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventLine {
    timestamp: Option<String>,
    level: Option<String>,
    message_template: Option<String>,
    exception: Option<String>,
    #[serde(default)]
    properties: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub lines: u64,
    pub accepted: u64,
    pub rejected: u64,
}

/// Turns one input line into an event; `None` for blank lines.
///
/// Lines that are not a JSON object become Information events whose
/// template is the raw line. Unknown levels fall back to Information and
/// unparsable timestamps to the current time.
pub fn parse_line(line: &str) -> Option<LogEvent> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return None;
    }

    let Ok(parsed) = serde_json::from_str::<EventLine>(line) else {
        return Some(LogEvent::new(Severity::Information, line));
    };

    let severity: Severity = parsed
        .level
        .as_deref()
        .and_then(|level| level.parse().ok())
        .unwrap_or_default();
    let timestamp = parsed
        .timestamp
        .as_deref()
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .unwrap_or_else(|| Local::now().fixed_offset());

    let mut event = LogEvent::at(
        timestamp,
        severity,
        parsed.message_template.unwrap_or_default(),
    )
    .with_properties(parsed.properties);
    if let Some(exception) = parsed.exception {
        event = event.with_exception(exception);
    }
    Some(event)
}

/// Feeds lines from `reader` into the sink until EOF or cancellation.
pub async fn pump_lines<R>(
    reader: R,
    sink: &LogAnalyticsSink,
    cancel: &CancellationToken,
) -> std::io::Result<IngestStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut stats = IngestStats::default();

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Input stopped by shutdown request");
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            debug!("Reached end of input");
            break;
        };

        stats.ingest(&line, sink);
    }

    Ok(stats)
}

/// Reads lines from a blocking reader on a dedicated OS thread.
///
/// The thread is detached: a read that never returns (an idle terminal)
/// does not hold up shutdown, and the thread ends when the receiver is
/// dropped or the reader hits EOF or an error.
pub fn spawn_line_reader<R>(reader: R) -> mpsc::Receiver<std::io::Result<String>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
    let spawned = std::thread::Builder::new()
        .name("line-reader".to_string())
        .spawn(move || {
            for line in reader.lines() {
                let failed = line.is_err();
                if tx.blocking_send(line).is_err() || failed {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        error!("Failed to spawn input reader thread: {}", e);
    }
    rx
}

/// Like [`pump_lines`], fed by a [`spawn_line_reader`] channel.
pub async fn pump_channel(
    mut lines: mpsc::Receiver<std::io::Result<String>>,
    sink: &LogAnalyticsSink,
    cancel: &CancellationToken,
) -> std::io::Result<IngestStats> {
    let mut stats = IngestStats::default();

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Input stopped by shutdown request");
                break;
            }
            line = lines.recv() => line,
        };
        let Some(line) = line else {
            debug!("Reached end of input");
            break;
        };

        stats.ingest(&line?, sink);
    }

    Ok(stats)
}

impl IngestStats {
    fn ingest(&mut self, line: &str, sink: &LogAnalyticsSink) {
        self.lines += 1;
        if let Some(event) = parse_line(line) {
            if sink.submit(event).is_accepted() {
                self.accepted += 1;
            } else {
                self.rejected += 1;
            }
        }
    }
}
