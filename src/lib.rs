#![deny(warnings, rust_2024_compatibility)]
// Specific pedantic lints enforced (not blanket allow):
#![deny(
    clippy::explicit_iter_loop,
    clippy::manual_let_else,
    clippy::semicolon_if_nothing_returned,
    clippy::inconsistent_struct_constructor
)]
// Noisy pedantic lints suppressed with justification:
#![allow(
    clippy::cast_lossless,            // Infallible casts are clear enough with `as`
    clippy::cast_possible_truncation, // Safe within realistic value bounds (durations, sizes)
    clippy::cast_precision_loss,      // Acceptable for metrics/display
    clippy::missing_errors_doc,       // Internal API
    clippy::missing_panics_doc,       // Internal API
    clippy::module_name_repetitions,  // e.g. BufferError in buffer module
    clippy::must_use_candidate,       // Annotated selectively on critical APIs
    clippy::doc_markdown              // Internal API
)]

//! Batching sink that ships structured log events to the Azure Log Analytics
//! HTTP Data Collector API.
//!
//! Producers call [`LogAnalyticsSink::submit`], which only touches an
//! in-memory buffer. A background worker drains the buffer into batches,
//! encodes them as JSON, signs each request with the workspace shared key
//! and posts it.

pub mod app;
pub mod buffer;
pub mod diagnostics;
pub mod domain;
pub mod reliability;
pub mod sender;

// Re-export main types for easy access
pub use app::{App, Config, LogAnalyticsSink, SinkConfig};
pub use buffer::{OverflowPolicy, SubmitOutcome};
pub use diagnostics::SELF_LOG_TARGET;
pub use domain::{LogEvent, Severity, SinkError};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
