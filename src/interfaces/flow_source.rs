//! Upstream settlement platform interface.
//!
//! The platform publishes flows per creditor domain. Listing and payment
//! retrieval are paginated; callers walk pages with
//! [`crate::acquisition::paging::collect_pages`].

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::model::{FlowDetails, PaymentOutcome};

/// Operation names used for logging and event notifications.
pub mod operation {
    pub const LIST_FLOWS: &str = "listFlows";
    pub const GET_FLOW_DETAILS: &str = "getFlowDetails";
    pub const GET_PAYMENTS: &str = "getPayments";
}

/// Errors raised by a flow source, tagged by retryability.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowSourceError {
    /// Network or server-side failure; may succeed on retry.
    #[error("Transient failure in {operation}: {message}")]
    Transient { operation: String, message: String },

    /// Request or data problem; will not succeed on retry.
    #[error("Permanent failure in {operation}: {message}")]
    Permanent { operation: String, message: String },

    /// The server closed the connection without sending a response.
    #[error("Connection closed with no data in {operation}")]
    EmptyReply { operation: String },
}

impl FlowSourceError {
    pub fn transient(operation: &str, message: impl Into<String>) -> Self {
        Self::Transient {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    pub fn permanent(operation: &str, message: impl Into<String>) -> Self {
        Self::Permanent {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    pub fn empty_reply(operation: &str) -> Self {
        Self::EmptyReply {
            operation: operation.to_string(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn is_empty_reply(&self) -> bool {
        matches!(self, Self::EmptyReply { .. })
    }

    pub fn operation(&self) -> &str {
        match self {
            Self::Transient { operation, .. }
            | Self::Permanent { operation, .. }
            | Self::EmptyReply { operation } => operation,
        }
    }
}

pub type Result<T> = std::result::Result<T, FlowSourceError>;

/// One page of a paginated listing. Pages are numbered from 1.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub total_pages: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, page: u32, total_pages: u32) -> Self {
        Self {
            items,
            page,
            total_pages,
        }
    }

    /// A single, final page.
    pub fn single(items: Vec<T>) -> Self {
        Self::new(items, 1, 1)
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages
    }
}

/// A published flow as returned by the listing operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowHeader {
    #[serde(rename = "fdr")]
    pub flow_code: String,
    pub psp_id: String,
    pub revision: i64,
    pub published: DateTime<Utc>,
}

/// Sending PSP as described in flow metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowSender {
    pub psp_name: Option<String>,
}

/// Receiving creditor as described in flow metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowReceiver {
    pub organization_name: Option<String>,
}

/// Full metadata of a single flow revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowMetadata {
    #[serde(rename = "fdr")]
    pub flow_code: String,
    pub psp_id: String,
    pub revision: i64,
    #[serde(rename = "fdrDate", default)]
    pub flow_date: Option<DateTime<Utc>>,
    #[serde(rename = "regulation", default)]
    pub settlement_id: Option<String>,
    #[serde(rename = "regulationDate", default)]
    pub settlement_date: Option<NaiveDate>,
    #[serde(default)]
    pub sender: Option<FlowSender>,
    #[serde(default)]
    pub receiver: Option<FlowReceiver>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub tot_payments: Option<i64>,
    #[serde(default)]
    pub sum_payments: Option<Decimal>,
}

impl From<FlowMetadata> for FlowDetails {
    fn from(meta: FlowMetadata) -> Self {
        Self {
            settlement_id: meta.settlement_id,
            flow_date: meta.flow_date,
            settlement_date: meta.settlement_date,
            declared_count: meta.tot_payments,
            declared_sum: meta.sum_payments,
            sender_name: meta.sender.and_then(|s| s.psp_name),
            receiver_name: meta.receiver.and_then(|r| r.organization_name),
            status: meta.status,
        }
    }
}

/// A payment reported inside a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentItem {
    pub iuv: String,
    pub iur: String,
    #[serde(default)]
    pub index: Option<i64>,
    #[serde(rename = "pay")]
    pub amount: Decimal,
    #[serde(rename = "payStatus")]
    pub outcome: PaymentOutcome,
    #[serde(rename = "payDate", default)]
    pub paid_at: Option<DateTime<Utc>>,
}

/// Source of published flows.
///
/// Implementations:
/// - `HttpFlowSource`: upstream REST API
/// - `InstrumentedFlowSource`: decorator reporting each call to an event sink
/// - `MockFlowSource`: scripted responses for tests
#[async_trait]
pub trait FlowSource: Send + Sync {
    /// List flows published for `domain`, optionally only those published
    /// after `since`.
    async fn list_flows(
        &self,
        domain: &str,
        since: Option<DateTime<Utc>>,
        page: u32,
    ) -> Result<Page<FlowHeader>>;

    /// Fetch the metadata of one flow revision.
    async fn get_flow_details(
        &self,
        domain: &str,
        flow_code: &str,
        revision: i64,
        psp_id: &str,
    ) -> Result<FlowMetadata>;

    /// Fetch one page of the payments reported in a flow revision.
    async fn get_payments(
        &self,
        domain: &str,
        flow_code: &str,
        revision: i64,
        psp_id: &str,
        page: u32,
    ) -> Result<Page<PaymentItem>>;
}
