pub mod config;
pub mod logging_system;
pub mod pipeline;
pub mod service;
pub mod shutdown;
pub mod source;

pub use config::{Config, ConfigError, LogFormat, LogLevel, SharedKey};
pub use logging_system::{LoggingSystem, setup_logging};
pub use pipeline::{BatchScheduler, SchedulerConfig, SchedulerReport};
pub use service::{LogAnalyticsSink, SinkConfig, SinkMetrics};
pub use source::{IngestStats, parse_line, pump_channel, pump_lines, spawn_line_reader};

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct App {
    config: Config,
}

impl App {
    pub fn from_args<I, T>(args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let config = Config::from_args_and_env(args).context("Invalid configuration")?;
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Reads events from stdin until EOF or a shutdown signal, then flushes.
    pub async fn run(self) -> anyhow::Result<()> {
        info!("Starting rask-log-analytics-sink v{}", crate::VERSION);
        info!(
            "Configuration: workspace={}, log_type={}, batch_size={}, buffer_capacity={}",
            self.config.workspace_id,
            self.config.log_type,
            self.config.batch_size,
            self.config.buffer_capacity
        );

        let sink = LogAnalyticsSink::start(self.config.sink_config())
            .context("Failed to start sink")?;

        let cancel = CancellationToken::new();
        let listener = shutdown::spawn_signal_listener(cancel.clone());

        // Blocking stdin reads stay off the runtime so a signal can end intake
        let stdin = spawn_line_reader(std::io::BufReader::new(std::io::stdin()));
        let ingest = pump_channel(stdin, &sink, &cancel).await;
        cancel.cancel();
        listener.abort();

        let ingest = match ingest {
            Ok(stats) => stats,
            Err(e) => {
                error!("Failed to read input: {}", e);
                IngestStats::default()
            }
        };

        let outcome = sink.shutdown().await;
        let metrics = sink.metrics();

        println!(
            "lines={} accepted={} rejected={} delivered={} dropped={} batches={} retries={} overflow_dropped={}",
            ingest.lines,
            ingest.accepted,
            ingest.rejected,
            metrics.delivery.events_delivered,
            metrics.delivery.events_dropped,
            metrics.delivery.batches_delivered,
            metrics.delivery.retries,
            metrics.buffer.dropped
        );

        outcome.context("Shutdown did not complete cleanly")?;
        info!("rask-log-analytics-sink stopped.");
        Ok(())
    }
}

pub async fn main() -> anyhow::Result<()> {
    let app = App::from_args(std::env::args_os())?;

    if let Err(e) = setup_logging(app.config().log_level, app.config().log_format) {
        eprintln!("Warning: failed to initialize logging: {e}");
    }

    app.run().await
}
