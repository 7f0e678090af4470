//! Flow source decorator that reports every call to an event sink.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::interfaces::flow_source::Result;
use crate::interfaces::{
    operation, ApiCallEvent, EventSink, FlowHeader, FlowMetadata, FlowSource, Page, PaymentItem,
};

/// Wraps a [`FlowSource`] and emits an [`ApiCallEvent`] per call.
///
/// Notification runs on a spawned task; its outcome never reaches the
/// caller.
pub struct InstrumentedFlowSource {
    inner: Arc<dyn FlowSource>,
    sink: Arc<dyn EventSink>,
}

impl InstrumentedFlowSource {
    pub fn new(inner: Arc<dyn FlowSource>, sink: Arc<dyn EventSink>) -> Self {
        Self { inner, sink }
    }

    fn emit<T>(&self, operation: &str, domain: &str, started: Instant, result: &Result<T>) {
        let event = ApiCallEvent {
            operation: operation.to_string(),
            domain: domain.to_string(),
            success: result.is_ok(),
            duration_ms: started.elapsed().as_millis() as u64,
            error: result.as_ref().err().map(ToString::to_string),
            occurred_at: Utc::now(),
        };

        let sink = self.sink.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.notify(event).await {
                warn!(sink = sink.name(), error = %e, "Event notification failed");
            }
        });
    }
}

#[async_trait]
impl FlowSource for InstrumentedFlowSource {
    async fn list_flows(
        &self,
        domain: &str,
        since: Option<DateTime<Utc>>,
        page: u32,
    ) -> Result<Page<FlowHeader>> {
        let started = Instant::now();
        let result = self.inner.list_flows(domain, since, page).await;
        self.emit(operation::LIST_FLOWS, domain, started, &result);
        result
    }

    async fn get_flow_details(
        &self,
        domain: &str,
        flow_code: &str,
        revision: i64,
        psp_id: &str,
    ) -> Result<FlowMetadata> {
        let started = Instant::now();
        let result = self
            .inner
            .get_flow_details(domain, flow_code, revision, psp_id)
            .await;
        self.emit(operation::GET_FLOW_DETAILS, domain, started, &result);
        result
    }

    async fn get_payments(
        &self,
        domain: &str,
        flow_code: &str,
        revision: i64,
        psp_id: &str,
        page: u32,
    ) -> Result<Page<PaymentItem>> {
        let started = Instant::now();
        let result = self
            .inner
            .get_payments(domain, flow_code, revision, psp_id, page)
            .await;
        self.emit(operation::GET_PAYMENTS, domain, started, &result);
        result
    }
}
