use super::severity::Severity;
use chrono::{DateTime, FixedOffset, Local, Utc};
use serde_json::{Map, Value};

/// A structured log record handed to the sink by a producer.
///
/// Events are immutable once built; the sink only ever reads them.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    timestamp: DateTime<FixedOffset>,
    severity: Severity,
    message_template: String,
    exception: Option<String>,
    properties: Map<String, Value>,
}

impl LogEvent {
    /// Creates an event stamped with the current local time.
    pub fn new(severity: Severity, message_template: impl Into<String>) -> Self {
        Self::at(Local::now().fixed_offset(), severity, message_template)
    }

    pub fn at(
        timestamp: DateTime<FixedOffset>,
        severity: Severity,
        message_template: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            severity,
            message_template: message_template.into(),
            exception: None,
            properties: Map::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn with_properties(mut self, properties: Map<String, Value>) -> Self {
        self.properties.extend(properties);
        self
    }

    pub fn with_exception(mut self, exception: impl Into<String>) -> Self {
        self.exception = Some(exception.into());
        self
    }

    pub fn timestamp(&self) -> DateTime<FixedOffset> {
        self.timestamp
    }

    pub fn timestamp_utc(&self) -> DateTime<Utc> {
        self.timestamp.with_timezone(&Utc)
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn message_template(&self) -> &str {
        &self.message_template
    }

    pub fn exception(&self) -> Option<&str> {
        self.exception.as_deref()
    }

    pub fn properties(&self) -> &Map<String, Value> {
        &self.properties
    }
}
