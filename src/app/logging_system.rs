use super::config::{LogFormat, LogLevel};
use crate::diagnostics::SELF_LOG_TARGET;
use parking_lot::RwLock;
use std::sync::Arc;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log directive '{0}'")]
    InvalidDirective(String),
    #[error("Failed to build log filter '{filter}': {details}")]
    Filter { filter: String, details: String },
    #[error("Failed to install global subscriber: {0}")]
    Install(String),
}

/// One `target=level` filter entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogDirective {
    pub target: String,
    pub level: LogLevel,
}

impl LogDirective {
    pub fn new(target: impl Into<String>, level: LogLevel) -> Self {
        Self {
            target: target.into(),
            level,
        }
    }

    pub fn parse(directive: &str) -> Result<Self, LoggingError> {
        let invalid = || LoggingError::InvalidDirective(directive.to_string());
        let (target, level) = directive.split_once('=').ok_or_else(invalid)?;
        let target = target.trim();
        if target.is_empty() {
            return Err(invalid());
        }
        let level = <LogLevel as clap::ValueEnum>::from_str(level.trim(), true)
            .map_err(|_| invalid())?;
        Ok(Self::new(target, level))
    }

    pub fn to_filter_string(&self) -> String {
        format!("{}={}", self.target, level_str(self.level))
    }
}

fn level_str(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}

pub struct LoggingSystem {
    directives: Arc<RwLock<Vec<LogDirective>>>,
}

impl LoggingSystem {
    pub fn new() -> Self {
        Self {
            directives: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn add_directive(&self, directive: &str) -> Result<(), LoggingError> {
        let directive = LogDirective::parse(directive)?;
        self.directives.write().push(directive);
        Ok(())
    }

    /// Quiets the HTTP stack; the sink's own diagnostics stay at info.
    pub fn add_default_directives(&self) {
        let defaults = [
            ("hyper", LogLevel::Warn),
            ("reqwest", LogLevel::Warn),
            ("h2", LogLevel::Warn),
            ("rustls", LogLevel::Warn),
            (SELF_LOG_TARGET, LogLevel::Info),
        ];

        let mut directives = self.directives.write();
        for (target, level) in defaults {
            directives.push(LogDirective::new(target, level));
        }
    }

    pub fn build_filter_string(&self, default_level: LogLevel) -> String {
        let directives = self.directives.read();

        let mut filter_parts = Vec::with_capacity(directives.len() + 1);
        filter_parts.push(level_str(default_level).to_string());
        filter_parts.extend(directives.iter().map(LogDirective::to_filter_string));
        filter_parts.join(",")
    }

    /// `RUST_LOG`, when set, replaces the built filter entirely.
    pub fn build_filter(&self, default_level: LogLevel) -> Result<EnvFilter, LoggingError> {
        let filter = std::env::var("RUST_LOG")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| self.build_filter_string(default_level));

        EnvFilter::try_new(&filter).map_err(|e| LoggingError::Filter {
            details: e.to_string(),
            filter,
        })
    }

    pub fn initialize_tracing(
        &self,
        default_level: LogLevel,
        format: LogFormat,
    ) -> Result<(), LoggingError> {
        let env_filter = self.build_filter(default_level)?;
        let registry = tracing_subscriber::registry().with(env_filter);

        let result = match format {
            LogFormat::Compact => registry
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_level(true)
                        .with_writer(std::io::stderr)
                        .compact(),
                )
                .try_init(),
            LogFormat::Json => registry
                .with(
                    fmt::layer()
                        .json()
                        .with_current_span(false)
                        .with_writer(std::io::stderr),
                )
                .try_init(),
        };

        result.map_err(|e| LoggingError::Install(e.to_string()))
    }

    pub fn directive_count(&self) -> usize {
        self.directives.read().len()
    }
}

impl Default for LoggingSystem {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the process-wide subscriber. Logs go to stderr so stdout stays
/// free for the final report.
pub fn setup_logging(level: LogLevel, format: LogFormat) -> Result<(), LoggingError> {
    let logging_system = LoggingSystem::new();
    logging_system.add_default_directives();
    logging_system.initialize_tracing(level, format)
}
