use super::{Config, ConfigError};
use crate::sender::SharedKeySigner;
use url::Url;

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Workspace id and log type
        self.endpoint_config()
            .validate()
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;

        // Shared key must decode now rather than on the first request
        SharedKeySigner::new(self.shared_key.expose())?;

        if let Some(endpoint) = &self.endpoint_override {
            Url::parse(endpoint).map_err(|e| {
                ConfigError::InvalidConfig(format!("Invalid endpoint URL '{endpoint}': {e}"))
            })?;
        }

        // Validate batch size
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "Batch size must be greater than 0".to_string(),
            ));
        }

        // Validate buffer capacity
        if self.buffer_capacity < self.batch_size {
            return Err(ConfigError::InvalidConfig(format!(
                "Buffer capacity ({}) must be at least as large as batch size ({})",
                self.buffer_capacity, self.batch_size
            )));
        }

        if self.flush_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "Flush interval must be greater than 0".to_string(),
            ));
        }

        // Validate timeouts
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "Request timeout must be greater than 0".to_string(),
            ));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidConfig(
                "Max connections must be greater than 0".to_string(),
            ));
        }

        self.retry_config
            .validate()
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;

        Ok(())
    }
}
