use clap::ValueEnum;
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const API_VERSION: &str = "2016-04-01";
const MAX_LOG_TYPE_LEN: usize = 100;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Azure cloud the workspace lives in; selects the ingestion host suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AzureCloud {
    #[default]
    Public,
    Government,
}

impl AzureCloud {
    pub fn domain(&self) -> &'static str {
        match self {
            AzureCloud::Public => "azure.com",
            AzureCloud::Government => "azure.us",
        }
    }
}

/// Where and as what the sink posts its records.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub workspace_id: String,
    pub log_type: String,
    pub cloud: AzureCloud,
    /// Replaces the derived `https://{workspace}.ods.opinsights...` base,
    /// e.g. to point at a local test server.
    pub endpoint_override: Option<String>,
}

impl EndpointConfig {
    pub fn new(workspace_id: impl Into<String>, log_type: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            log_type: log_type.into(),
            cloud: AzureCloud::Public,
            endpoint_override: None,
        }
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        let workspace = self.workspace_id.trim();
        if workspace.is_empty() {
            return Err(ClientError::InvalidConfiguration(
                "Workspace id must not be empty".to_string(),
            ));
        }
        if !workspace
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
            || workspace.starts_with('-')
            || workspace.ends_with('-')
        {
            return Err(ClientError::InvalidConfiguration(format!(
                "Workspace id '{workspace}' is not a valid host label"
            )));
        }

        if self.log_type.is_empty() || self.log_type.len() > MAX_LOG_TYPE_LEN {
            return Err(ClientError::InvalidConfiguration(format!(
                "Log type must be 1..={MAX_LOG_TYPE_LEN} characters, got {}",
                self.log_type.len()
            )));
        }
        if !self
            .log_type
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ClientError::InvalidConfiguration(format!(
                "Log type '{}' may only contain letters, digits and underscores",
                self.log_type
            )));
        }

        Ok(())
    }

    /// Full ingestion URL including the api-version query.
    pub fn ingestion_url(&self) -> Result<Url, ClientError> {
        let base = match &self.endpoint_override {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!(
                "https://{}.ods.opinsights.{}",
                self.workspace_id.trim(),
                self.cloud.domain()
            ),
        };

        let mut url: Url = format!("{base}/api/logs").parse().map_err(|e| {
            ClientError::InvalidConfiguration(format!("Invalid ingestion URL '{base}': {e}"))
        })?;
        url.query_pairs_mut().append_pair("api-version", API_VERSION);
        Ok(url)
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub timeout: Duration,
    pub connection_timeout: Duration,
    pub max_connections: usize,
    pub keep_alive_timeout: Duration,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
            max_connections: 10,
            keep_alive_timeout: Duration::from_secs(60),
            user_agent: format!("rask-log-analytics-sink/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStats {
    pub max_connections: usize,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub average_response_time: Duration,
}

#[derive(Debug, Default)]
pub struct ClientStats {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    total_response_time: AtomicU64,
}

impl ClientStats {
    pub fn record_request(&self, success: bool, response_time: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_response_time
            .fetch_add(response_time.as_millis() as u64, Ordering::Relaxed);

        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Connection-pooled HTTP client bound to one ingestion endpoint.
///
/// Cheap to clone; clones share the pool and the statistics.
#[derive(Debug, Clone)]
pub struct HttpClient {
    pub client: Client,
    pub config: ClientConfig,
    pub endpoint: Arc<EndpointConfig>,
    pub ingestion_url: Url,
    pub stats: Arc<ClientStats>,
}

impl HttpClient {
    pub fn new(endpoint: EndpointConfig, config: ClientConfig) -> Result<Self, ClientError> {
        endpoint.validate()?;
        let ingestion_url = endpoint.ingestion_url()?;

        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .connect_timeout(config.connection_timeout)
            .pool_max_idle_per_host(config.max_connections)
            .pool_idle_timeout(config.keep_alive_timeout)
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self {
            client,
            config,
            endpoint: Arc::new(endpoint),
            ingestion_url,
            stats: Arc::new(ClientStats::default()),
        })
    }

    pub fn workspace_id(&self) -> &str {
        self.endpoint.workspace_id.trim()
    }

    pub fn log_type(&self) -> &str {
        &self.endpoint.log_type
    }

    pub fn connection_stats(&self) -> ConnectionStats {
        let total_requests = self.stats.total_requests.load(Ordering::Relaxed);
        let successful_requests = self.stats.successful_requests.load(Ordering::Relaxed);
        let failed_requests = self.stats.failed_requests.load(Ordering::Relaxed);
        let total_response_time = self.stats.total_response_time.load(Ordering::Relaxed);

        let average_response_time = if total_requests > 0 {
            Duration::from_millis(total_response_time / total_requests)
        } else {
            Duration::ZERO
        };

        ConnectionStats {
            max_connections: self.config.max_connections,
            total_requests,
            successful_requests,
            failed_requests,
            average_response_time,
        }
    }
}
