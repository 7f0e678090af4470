//! Event sink implementations.
//!
//! - `NoopEventSink`: discards events (default)
//! - `TracingEventSink`: logs each event
//! - `HttpEventSink`: POSTs each event to a webhook

mod http;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

pub use http::{HttpEventSink, HttpEventSinkConfig};

use crate::config::{EventSinkKind, EventsConfig};
use crate::interfaces::{ApiCallEvent, EventSink, SinkError};

/// Sink that discards every event.
#[derive(Debug, Default)]
pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn notify(&self, _event: ApiCallEvent) -> Result<(), SinkError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "noop"
    }
}

/// Sink that writes each event to the log.
#[derive(Debug, Default)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn notify(&self, event: ApiCallEvent) -> Result<(), SinkError> {
        info!(
            target: "fdr_reconciler::events",
            operation = %event.operation,
            domain = %event.domain,
            success = event.success,
            duration_ms = event.duration_ms,
            error = event.error.as_deref().unwrap_or(""),
            "Upstream call"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "tracing"
    }
}

/// Build the configured sink, or `None` when notifications are disabled.
pub fn build_sink(config: &EventsConfig) -> Result<Option<Arc<dyn EventSink>>, SinkError> {
    if !config.enabled {
        return Ok(None);
    }

    let sink: Arc<dyn EventSink> = match config.kind {
        EventSinkKind::Tracing => Arc::new(TracingEventSink),
        EventSinkKind::Http => {
            let endpoint = config
                .endpoint
                .clone()
                .ok_or_else(|| SinkError::Config("events.endpoint not set".to_string()))?;
            Arc::new(HttpEventSink::new(
                HttpEventSinkConfig::default().with_endpoint(endpoint),
            )?)
        }
    };
    info!(sink = sink.name(), "Event notifications enabled");
    Ok(Some(sink))
}
