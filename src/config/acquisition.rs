//! Upstream and acquisition configuration types.

use std::time::Duration;

use serde::Deserialize;

use super::ConfigError;

/// Upstream flow source configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FlowSourceConfig {
    /// Base URL of the settlement platform API.
    pub base_url: String,
    /// Sent as `Ocp-Apim-Subscription-Key` when set.
    pub subscription_key: Option<String>,
    pub timeout_secs: u64,
    /// Requested page size for listings.
    pub page_size: u32,
}

impl Default for FlowSourceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/fdr-org/service/v1".to_string(),
            subscription_key: None,
            timeout_secs: 30,
            page_size: 1000,
        }
    }
}

impl FlowSourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Acquisition stage tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Parallel workers in the header phase.
    pub header_workers: usize,
    /// Staging rows written per transaction.
    pub chunk_size: usize,
    /// Retries after the first attempt for a transient failure.
    pub retry_limit: u32,
    pub retry_backoff_ms: u64,
    /// Skips tolerated per stage before it fails.
    pub skip_limit: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            header_workers: 5,
            chunk_size: 100,
            retry_limit: 3,
            retry_backoff_ms: 1000,
            skip_limit: 100,
        }
    }
}

impl AcquisitionConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.header_workers == 0 {
            return Err(ConfigError::Invalid(
                "acquisition.header_workers must be at least 1".into(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "acquisition.chunk_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Execution coordinator configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// A run older than this is considered stuck.
    pub max_run_hours: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self { max_run_hours: 2 }
    }
}

impl CoordinatorConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.max_run_hours == 0 {
            return Err(ConfigError::Invalid(
                "coordinator.max_run_hours must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
