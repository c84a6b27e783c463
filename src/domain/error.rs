use crate::app::config::ConfigError;
use crate::sender::ClientError;
use thiserror::Error;

/// Top-level error type for starting and stopping a sink.
///
/// Producers never see this type: `submit` cannot fail.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP client error: {0}")]
    Client(#[from] ClientError),

    #[error("Shutdown timed out with {remaining} events still buffered")]
    ShutdownTimeout { remaining: usize },

    #[error("Worker task failed: {0}")]
    Worker(String),
}
