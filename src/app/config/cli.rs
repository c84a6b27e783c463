use super::serde_helpers::{
    load_env_enum, load_env_path_opt, load_env_string, load_env_string_opt, load_env_var,
};
use super::{ConfigError, LogFormat, LogLevel, SharedKey};
use crate::app::pipeline::SchedulerConfig;
use crate::app::service::SinkConfig;
use crate::buffer::OverflowPolicy;
use crate::reliability::RetryConfig;
use crate::sender::{AzureCloud, ClientConfig, EndpointConfig};
use clap::parser::ValueSource;
use clap::{ArgAction, CommandFactory, FromArgMatches, Parser};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(author, version, about, long_about = None)]
#[serde(default)]
pub struct Config {
    /// Log Analytics workspace (customer) id
    #[arg(long, env = "LOG_ANALYTICS_WORKSPACE_ID", default_value = "")]
    pub workspace_id: String,

    /// Base64 primary or secondary workspace key
    #[arg(
        long,
        env = "LOG_ANALYTICS_SHARED_KEY",
        default_value = "",
        hide_env_values = true,
        hide_default_value = true
    )]
    pub shared_key: SharedKey,

    /// Custom log type; records land in the `<log_type>_CL` table
    #[arg(long, env = "LOG_ANALYTICS_LOG_TYPE", default_value = "DiagnosticsLog")]
    pub log_type: String,

    /// Render timestamps in UTC instead of the event's own offset
    #[arg(
        long,
        env = "USE_UTC_TIMESTAMPS",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub use_utc_timestamps: bool,

    /// Record field the service should use as TimeGenerated
    #[arg(long, env = "TIME_GENERATED_FIELD")]
    pub time_generated_field: Option<String>,

    /// Maximum number of events held in memory
    #[arg(long, env = "BUFFER_CAPACITY", default_value = "25000")]
    pub buffer_capacity: usize,

    /// Number of events per request
    #[arg(long, env = "BATCH_SIZE", default_value = "100")]
    pub batch_size: usize,

    /// Flush interval in milliseconds
    #[arg(long, env = "FLUSH_INTERVAL_MS", default_value = "2000")]
    pub flush_interval_ms: u64,

    /// What to do when the buffer is full
    #[arg(long, env = "OVERFLOW_POLICY", default_value = "reject-newest")]
    pub overflow_policy: OverflowPolicy,

    /// Azure cloud hosting the workspace
    #[arg(long, env = "AZURE_CLOUD", default_value = "public")]
    pub cloud: AzureCloud,

    /// Per-request timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "30")]
    pub request_timeout_secs: u64,

    /// Upper bound on the final flush at shutdown, in seconds
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value = "10")]
    pub shutdown_timeout_secs: u64,

    /// Maximum idle HTTP connections kept per host
    #[arg(long, env = "MAX_CONNECTIONS", default_value = "10")]
    pub max_connections: usize,

    /// Base URL replacing the derived ingestion host
    #[arg(long, env = "LOG_ANALYTICS_ENDPOINT")]
    pub endpoint_override: Option<String>,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", default_value = "compact")]
    pub log_format: LogFormat,

    /// Configuration file path (optional)
    #[arg(long, env = "CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Derived fields (not CLI arguments)
    #[serde(skip)]
    #[arg(skip)]
    pub flush_interval: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub request_timeout: Duration,

    #[serde(skip)]
    #[arg(skip)]
    pub shutdown_timeout: Duration,

    /// Retry configuration (TOML only)
    #[arg(skip)]
    pub retry_config: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_id: String::new(),
            shared_key: SharedKey::default(),
            log_type: "DiagnosticsLog".to_string(),
            use_utc_timestamps: true,
            time_generated_field: None,
            buffer_capacity: 25_000,
            batch_size: 100,
            flush_interval_ms: 2000,
            overflow_policy: OverflowPolicy::RejectNewest,
            cloud: AzureCloud::Public,
            request_timeout_secs: 30,
            shutdown_timeout_secs: 10,
            max_connections: 10,
            endpoint_override: None,
            log_level: LogLevel::Info,
            log_format: LogFormat::Compact,
            config_file: None,
            flush_interval: Duration::from_millis(2000),
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(10),
            retry_config: RetryConfig::default(),
        }
    }
}

/// Copies `$field` from the file config unless the command line or the
/// environment set it.
macro_rules! merge_unless_given {
    ($matches:expr, $config:expr, $file:expr, [$($field:ident),* $(,)?]) => {
        $(
            if !matches!(
                $matches.value_source(stringify!($field)),
                Some(ValueSource::CommandLine | ValueSource::EnvVariable)
            ) {
                $config.$field = $file.$field.clone();
            }
        )*
    };
}

impl Config {
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut config = Config::parse_from(args);
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        load_env_string("LOG_ANALYTICS_WORKSPACE_ID", &mut config.workspace_id);
        if let Ok(key) = std::env::var("LOG_ANALYTICS_SHARED_KEY") {
            config.shared_key = SharedKey::new(key);
        }
        load_env_string("LOG_ANALYTICS_LOG_TYPE", &mut config.log_type);
        load_env_var("USE_UTC_TIMESTAMPS", &mut config.use_utc_timestamps)?;
        load_env_string_opt("TIME_GENERATED_FIELD", &mut config.time_generated_field);
        load_env_var("BUFFER_CAPACITY", &mut config.buffer_capacity)?;
        load_env_var("BATCH_SIZE", &mut config.batch_size)?;
        load_env_var("FLUSH_INTERVAL_MS", &mut config.flush_interval_ms)?;
        load_env_enum("OVERFLOW_POLICY", &mut config.overflow_policy)?;
        load_env_enum("AZURE_CLOUD", &mut config.cloud)?;
        load_env_var("REQUEST_TIMEOUT_SECS", &mut config.request_timeout_secs)?;
        load_env_var("SHUTDOWN_TIMEOUT_SECS", &mut config.shutdown_timeout_secs)?;
        load_env_var("MAX_CONNECTIONS", &mut config.max_connections)?;
        load_env_string_opt("LOG_ANALYTICS_ENDPOINT", &mut config.endpoint_override);
        load_env_enum("LOG_LEVEL", &mut config.log_level)?;
        load_env_enum("LOG_FORMAT", &mut config.log_format)?;
        load_env_path_opt("CONFIG_FILE", &mut config.config_file);

        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    /// CLI arguments and environment, layered over `--config-file` when one
    /// is given. Precedence: command line, then environment, then file, then
    /// built-in defaults.
    pub fn from_args_and_env<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let matches = Config::command().get_matches_from(args);
        let mut config = Config::from_arg_matches(&matches)
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;

        if let Some(path) = config.config_file.clone() {
            let content = std::fs::read_to_string(&path)?;
            let file: Config = toml::from_str(&content)?;

            merge_unless_given!(
                matches,
                config,
                file,
                [
                    workspace_id,
                    shared_key,
                    log_type,
                    use_utc_timestamps,
                    time_generated_field,
                    buffer_capacity,
                    batch_size,
                    flush_interval_ms,
                    overflow_policy,
                    cloud,
                    request_timeout_secs,
                    shutdown_timeout_secs,
                    max_connections,
                    endpoint_override,
                    log_level,
                    log_format,
                ]
            );
            config.retry_config = file.retry_config;
        }

        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(content)?;
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn post_process(&mut self) -> Result<(), ConfigError> {
        self.workspace_id = self.workspace_id.trim().to_string();
        self.time_generated_field = self
            .time_generated_field
            .take()
            .map(|field| field.trim().to_string())
            .filter(|field| !field.is_empty());
        self.endpoint_override = self
            .endpoint_override
            .take()
            .filter(|endpoint| !endpoint.trim().is_empty());

        self.flush_interval = Duration::from_millis(self.flush_interval_ms);
        self.request_timeout = Duration::from_secs(self.request_timeout_secs);
        self.shutdown_timeout = Duration::from_secs(self.shutdown_timeout_secs);

        Ok(())
    }

    pub fn endpoint_config(&self) -> EndpointConfig {
        EndpointConfig {
            cloud: self.cloud,
            endpoint_override: self.endpoint_override.clone(),
            ..EndpointConfig::new(self.workspace_id.clone(), self.log_type.clone())
        }
    }

    /// Runtime settings for [`crate::LogAnalyticsSink::start`].
    pub fn sink_config(&self) -> SinkConfig {
        SinkConfig {
            endpoint: self.endpoint_config(),
            shared_key: self.shared_key.clone(),
            use_utc_timestamps: self.use_utc_timestamps,
            time_generated_field: self.time_generated_field.clone(),
            buffer_capacity: self.buffer_capacity,
            overflow_policy: self.overflow_policy,
            scheduler: SchedulerConfig {
                batch_size: self.batch_size,
                flush_interval: self.flush_interval,
                shutdown_timeout: self.shutdown_timeout,
                retry: self.retry_config.clone(),
            },
            client: ClientConfig {
                timeout: self.request_timeout,
                max_connections: self.max_connections,
                ..ClientConfig::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=";

    #[test]
    fn test_from_args_defaults() {
        let config = Config::from_args([
            "rask-log-analytics-sink",
            "--workspace-id",
            "ws-1",
            "--shared-key",
            KEY,
        ])
        .unwrap();

        assert_eq!(config.workspace_id, "ws-1");
        assert_eq!(config.log_type, "DiagnosticsLog");
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.buffer_capacity, 25_000);
        assert_eq!(config.flush_interval, Duration::from_secs(2));
        assert_eq!(config.overflow_policy, OverflowPolicy::RejectNewest);
        assert!(config.use_utc_timestamps);
    }

    #[test]
    fn test_from_args_overrides() {
        let config = Config::from_args([
            "rask-log-analytics-sink",
            "--workspace-id",
            "ws-1",
            "--shared-key",
            KEY,
            "--use-utc-timestamps",
            "false",
            "--overflow-policy",
            "drop-oldest",
            "--cloud",
            "government",
            "--batch-size",
            "2",
            "--buffer-capacity",
            "2",
        ])
        .unwrap();

        assert!(!config.use_utc_timestamps);
        assert_eq!(config.overflow_policy, OverflowPolicy::DropOldest);
        assert_eq!(config.cloud, AzureCloud::Government);

        let sink = config.sink_config();
        assert_eq!(sink.scheduler.batch_size, 2);
        assert_eq!(sink.buffer_capacity, 2);
        assert_eq!(
            sink.endpoint.ingestion_url().unwrap().host_str(),
            Some("ws-1.ods.opinsights.azure.us")
        );
    }

    #[test]
    fn test_from_toml_with_retry_table() {
        let config = Config::from_toml(&format!(
            r#"
workspace_id = "ws-1"
shared_key = "{KEY}"
log_type = "AppLogs"
batch_size = 50

[retry_config]
max_attempts = 3
base_delay = 250
"#
        ))
        .unwrap();

        assert_eq!(config.log_type, "AppLogs");
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.retry_config.max_attempts, 3);
        assert_eq!(config.retry_config.base_delay, Duration::from_millis(250));
        assert_eq!(config.retry_config.max_delay, Duration::from_secs(60));
    }

    #[test]
    fn test_debug_hides_shared_key() {
        let config = Config {
            workspace_id: "ws-1".to_string(),
            shared_key: SharedKey::new(KEY),
            ..Config::default()
        };
        assert!(!format!("{config:?}").contains(KEY));
        assert!(!format!("{:?}", config.sink_config()).contains(KEY));
    }
}
