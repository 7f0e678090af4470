//! HTTP webhook event sink.

use std::time::Duration;

use async_trait::async_trait;
use backon::Retryable;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::interfaces::{ApiCallEvent, EventSink, SinkError};
use crate::utils::retry::sink_backoff;

/// HTTP sink configuration.
#[derive(Debug, Clone)]
pub struct HttpEventSinkConfig {
    /// Webhook endpoint URL.
    pub endpoint: String,

    /// Request timeout.
    pub timeout: Duration,
}

impl Default for HttpEventSinkConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl HttpEventSinkConfig {
    /// Set the endpoint URL.
    pub fn with_endpoint(mut self, endpoint: String) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// POSTs each event as JSON, retrying transient failures.
pub struct HttpEventSink {
    client: Client,
    config: HttpEventSinkConfig,
}

impl HttpEventSink {
    pub fn new(config: HttpEventSinkConfig) -> Result<Self, SinkError> {
        if config.endpoint.is_empty() {
            return Err(SinkError::Config("HTTP endpoint not configured".to_string()));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(SinkError::Http)?;

        Ok(Self { client, config })
    }

    /// Determine if an HTTP error is retryable.
    fn is_retryable(err: &reqwest::Error) -> bool {
        err.is_timeout() || err.is_connect()
    }

    /// Determine if an HTTP status code is retryable.
    fn is_retryable_status(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    async fn post(&self, event: &ApiCallEvent) -> Result<(), SinkError> {
        let response = self
            .client
            .post(&self.config.endpoint)
            .json(event)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(endpoint = %self.config.endpoint, "Event posted");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let message = format!(
            "HTTP {} - {}",
            status,
            body.chars().take(200).collect::<String>()
        );
        if Self::is_retryable_status(status) {
            Err(SinkError::Unavailable(message))
        } else {
            Err(SinkError::Config(message))
        }
    }
}

#[async_trait]
impl EventSink for HttpEventSink {
    async fn notify(&self, event: ApiCallEvent) -> Result<(), SinkError> {
        (|| async { self.post(&event).await })
            .retry(sink_backoff())
            .when(|e| {
                matches!(e, SinkError::Http(err) if Self::is_retryable(err))
                    || matches!(e, SinkError::Unavailable(_))
            })
            .notify(|err: &SinkError, dur: Duration| {
                warn!(endpoint = %self.config.endpoint, error = %err, delay = ?dur, "Event POST failed, retrying");
            })
            .await
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = HttpEventSinkConfig::default()
            .with_endpoint("https://monitor.example.com/events".to_string())
            .with_timeout(Duration::from_secs(3));
        assert_eq!(config.endpoint, "https://monitor.example.com/events");
        assert_eq!(config.timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_empty_endpoint_fails() {
        assert!(HttpEventSink::new(HttpEventSinkConfig::default()).is_err());
    }

    #[test]
    fn test_retryable_status_codes() {
        assert!(HttpEventSink::is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(HttpEventSink::is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(!HttpEventSink::is_retryable_status(StatusCode::BAD_REQUEST));
        assert!(!HttpEventSink::is_retryable_status(StatusCode::NOT_FOUND));
    }
}
