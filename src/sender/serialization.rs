use crate::domain::LogEvent;
use chrono::SecondsFormat;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// Escaped braces (`{{`, `}}`) or a property-name placeholder: `{Name}`,
/// `{@Name}`, `{$Name}`, optionally followed by an alignment or format
/// suffix. Escapes are listed first so `{{Name}}` never reads as a hole.
const TEMPLATE_TOKEN_PATTERN: &str = r"\{\{|\}\}|\{[@$]?([A-Za-z0-9_]+)(?:[,:][^}]*)?\}";

static TEMPLATE_TOKEN: OnceLock<Option<Regex>> = OnceLock::new();

fn template_token() -> Option<&'static Regex> {
    TEMPLATE_TOKEN
        .get_or_init(|| Regex::new(TEMPLATE_TOKEN_PATTERN).ok())
        .as_ref()
}

#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("JSON serialization failed: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Batch is empty")]
    EmptyBatch,
}

/// Shapes one event into the flat JSON record the ingestion endpoint stores.
pub trait RecordFormatter: Send + Sync {
    fn format(&self, event: &LogEvent) -> Map<String, Value>;
}

/// Default record shape.
///
/// Emits `Timestamp`, `Level`, `MessageTemplate`, `Message` and `Exception`,
/// plus every property flattened into `parent_child` keys. The core fields
/// win when a flattened property collides with one of them.
#[derive(Debug, Clone)]
pub struct FlatRecordFormatter {
    use_utc_timestamps: bool,
    separator: String,
}

impl FlatRecordFormatter {
    pub fn new(use_utc_timestamps: bool) -> Self {
        Self {
            use_utc_timestamps,
            separator: "_".to_string(),
        }
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    fn flatten_into(&self, prefix: &str, value: &Value, out: &mut Map<String, Value>) {
        match value {
            Value::Object(map) if !map.is_empty() => {
                for (key, child) in map {
                    let name = self.join(prefix, key);
                    self.flatten_into(&name, child, out);
                }
            }
            Value::Array(items) if !items.is_empty() => {
                for (index, child) in items.iter().enumerate() {
                    let name = self.join(prefix, &index.to_string());
                    self.flatten_into(&name, child, out);
                }
            }
            leaf => {
                out.insert(prefix.to_string(), leaf.clone());
            }
        }
    }

    fn join(&self, prefix: &str, key: &str) -> String {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}{}{key}", self.separator)
        }
    }

    fn timestamp(&self, event: &LogEvent) -> String {
        if self.use_utc_timestamps {
            event
                .timestamp_utc()
                .to_rfc3339_opts(SecondsFormat::Micros, true)
        } else {
            event.timestamp().to_rfc3339_opts(SecondsFormat::Micros, false)
        }
    }
}

impl Default for FlatRecordFormatter {
    fn default() -> Self {
        Self::new(true)
    }
}

impl RecordFormatter for FlatRecordFormatter {
    fn format(&self, event: &LogEvent) -> Map<String, Value> {
        let mut record = Map::new();

        for (name, value) in event.properties() {
            self.flatten_into(name, value, &mut record);
        }

        record.insert("Timestamp".to_string(), Value::String(self.timestamp(event)));
        record.insert(
            "Level".to_string(),
            Value::String(event.severity().as_str().to_string()),
        );
        record.insert(
            "MessageTemplate".to_string(),
            Value::String(event.message_template().to_string()),
        );
        record.insert("Message".to_string(), Value::String(render_message(event)));
        if let Some(exception) = event.exception() {
            record.insert("Exception".to_string(), Value::String(exception.to_string()));
        }

        record
    }
}

/// Substitutes property values into the event's message template.
///
/// Strings are inserted without quotes; other values use their JSON text.
/// Placeholders without a matching property are left untouched, and `{{` /
/// `}}` render as single literal braces.
pub fn render_message(event: &LogEvent) -> String {
    let template = event.message_template();
    let Some(token) = template_token() else {
        return template.to_string();
    };

    token
        .replace_all(template, |caps: &Captures<'_>| {
            let Some(name) = caps.get(1) else {
                // `{{` or `}}`
                return caps[0][..1].to_string();
            };
            match event.properties().get(name.as_str()) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// A serialized batch together with the byte length that gets signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    pub body: String,
    pub content_length: usize,
}

impl EncodedPayload {
    fn new(body: String) -> Self {
        // UTF-8 byte length of the exact string sent on the wire
        let content_length = body.len();
        Self {
            body,
            content_length,
        }
    }
}

/// Turns a batch of events into a single JSON document.
///
/// One event is emitted as a bare object, several as an array; the
/// ingestion schema depends on that distinction.
#[derive(Clone)]
pub struct PayloadCodec {
    formatter: Arc<dyn RecordFormatter>,
}

impl PayloadCodec {
    pub fn new(formatter: Arc<dyn RecordFormatter>) -> Self {
        Self { formatter }
    }

    pub fn flat(use_utc_timestamps: bool) -> Self {
        Self::new(Arc::new(FlatRecordFormatter::new(use_utc_timestamps)))
    }

    pub fn encode(&self, events: &[LogEvent]) -> Result<EncodedPayload, SerializationError> {
        let body = match events {
            [] => return Err(SerializationError::EmptyBatch),
            [single] => serde_json::to_string(&self.formatter.format(single))?,
            many => {
                let records: Vec<Map<String, Value>> =
                    many.iter().map(|event| self.formatter.format(event)).collect();
                serde_json::to_string(&records)?
            }
        };

        Ok(EncodedPayload::new(body))
    }
}

impl Default for PayloadCodec {
    fn default() -> Self {
        Self::flat(true)
    }
}

impl std::fmt::Debug for PayloadCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadCodec").finish_non_exhaustive()
    }
}
