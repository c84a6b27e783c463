//! Domain layer for rask-log-analytics-sink.
//!
//! Contains the canonical types shared across all modules:
//! - `LogEvent`: the record producers hand to the sink
//! - `Severity`: event severity (Verbose/Debug/Information/Warning/Error/Fatal)
//! - `SinkError`: top-level error type

pub mod error;
pub mod log_event;
pub mod severity;

pub use error::SinkError;
pub use log_event::LogEvent;
pub use severity::Severity;
