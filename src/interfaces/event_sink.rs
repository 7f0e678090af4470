//! Event sink for upstream call notifications.
//!
//! Notifications are fire-and-forget: a failing sink never affects the
//! outcome of the pipeline.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Errors that can occur when publishing notifications.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Sink is not reachable.
    #[error("Sink unavailable: {0}")]
    Unavailable(String),
}

/// Outcome of one call to the flow source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCallEvent {
    pub operation: String,
    pub domain: String,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Destination for [`ApiCallEvent`]s.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn notify(&self, event: ApiCallEvent) -> Result<(), SinkError>;

    /// Sink name for logging.
    fn name(&self) -> &str;
}
