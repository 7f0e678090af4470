//! Flow records: staged headers, reconciled flows and their items.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Natural key of a flow as published upstream.
///
/// Staging rows are unique on all four parts; reconciled flows are unique
/// on `(flow_code, psp_id, revision)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowKey {
    pub domain_code: String,
    pub flow_code: String,
    pub psp_id: String,
    pub revision: i64,
}

impl FlowKey {
    pub fn new(
        domain_code: impl Into<String>,
        flow_code: impl Into<String>,
        psp_id: impl Into<String>,
        revision: i64,
    ) -> Self {
        Self {
            domain_code: domain_code.into(),
            flow_code: flow_code.into(),
            psp_id: psp_id.into(),
            revision,
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}#{}",
            self.domain_code, self.flow_code, self.psp_id, self.revision
        )
    }
}

/// Per-flow metadata fetched during enrichment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowDetails {
    /// Settlement (regulation) identifier.
    pub settlement_id: Option<String>,
    pub flow_date: Option<DateTime<Utc>>,
    pub settlement_date: Option<NaiveDate>,
    /// Number of payments declared by the PSP.
    pub declared_count: Option<i64>,
    /// Sum of payments declared by the PSP.
    pub declared_sum: Option<Decimal>,
    pub sender_name: Option<String>,
    pub receiver_name: Option<String>,
    /// Upstream publication status of the flow.
    pub status: Option<String>,
}

/// A discovered flow awaiting reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingFlow {
    pub key: FlowKey,
    pub published_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Filled in place by metadata enrichment.
    pub details: Option<FlowDetails>,
}

impl StagingFlow {
    pub fn new(key: FlowKey, published_at: DateTime<Utc>) -> Self {
        Self {
            key,
            published_at,
            created_at: Utc::now(),
            details: None,
        }
    }
}

/// Outcome reported by the PSP for a single payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentOutcome {
    Executed,
    Revoked,
    StandIn,
    #[serde(alias = "STAND_IN_NO_RPT")]
    StandInNoReceipt,
    #[serde(alias = "NO_RPT")]
    NoReceipt,
}

impl PaymentOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Executed => "EXECUTED",
            Self::Revoked => "REVOKED",
            Self::StandIn => "STAND_IN",
            Self::StandInNoReceipt => "STAND_IN_NO_RECEIPT",
            Self::NoReceipt => "NO_RECEIPT",
        }
    }

    /// True for outcomes that carry no receipt.
    pub fn is_without_receipt(&self) -> bool {
        matches!(self, Self::NoReceipt | Self::StandInNoReceipt)
    }
}

impl FromStr for PaymentOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EXECUTED" => Ok(Self::Executed),
            "REVOKED" => Ok(Self::Revoked),
            "STAND_IN" => Ok(Self::StandIn),
            "STAND_IN_NO_RECEIPT" => Ok(Self::StandInNoReceipt),
            "NO_RECEIPT" => Ok(Self::NoReceipt),
            other => Err(format!("unknown payment outcome: {other}")),
        }
    }
}

/// Final verdict on a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowStatus {
    Accepted,
    Anomalous,
}

impl FlowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "ACCEPTED",
            Self::Anomalous => "ANOMALOUS",
        }
    }
}

impl FromStr for FlowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACCEPTED" => Ok(Self::Accepted),
            "ANOMALOUS" => Ok(Self::Anomalous),
            other => Err(format!("unknown flow status: {other}")),
        }
    }
}

/// Verdict on a single reported payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    Ok,
    Anomalous,
    /// The IUV was minted by another intermediary.
    OtherIntermediary,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Anomalous => "ANOMALOUS",
            Self::OtherIntermediary => "OTHER_INTERMEDIARY",
        }
    }
}

impl FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OK" => Ok(Self::Ok),
            "ANOMALOUS" => Ok(Self::Anomalous),
            "OTHER_INTERMEDIARY" => Ok(Self::OtherIntermediary),
            other => Err(format!("unknown item status: {other}")),
        }
    }
}

/// One reported payment inside a reconciled flow. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationItem {
    pub iuv: String,
    pub iur: String,
    pub item_index: Option<i64>,
    pub amount: Decimal,
    pub outcome: PaymentOutcome,
    pub paid_at: Option<DateTime<Utc>>,
    pub status: ItemStatus,
    /// Pipe-joined anomaly codes.
    pub anomaly: Option<String>,
    /// Matched local payment, if any.
    pub payment_id: Option<i64>,
    /// Matched position item, if any.
    pub position_item_id: Option<i64>,
}

/// A finalized flow. Created exactly once per `(flow_code, psp_id, revision)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledFlow {
    pub key: FlowKey,
    pub published_at: DateTime<Utc>,
    pub details: FlowDetails,
    pub status: FlowStatus,
    /// Pipe-joined flow-level anomaly codes.
    pub anomaly: Option<String>,
    pub reconciled_at: DateTime<Utc>,
    /// Items in the order the upstream returned them.
    pub items: Vec<ReconciliationItem>,
}

impl ReconciledFlow {
    /// Sum of the reported item amounts.
    pub fn reported_sum(&self) -> Decimal {
        self.items.iter().map(|item| item.amount).sum()
    }

    pub fn items_with_status(&self, status: ItemStatus) -> impl Iterator<Item = &ReconciliationItem> {
        self.items.iter().filter(move |item| item.status == status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_strings() {
        for status in [ItemStatus::Ok, ItemStatus::Anomalous, ItemStatus::OtherIntermediary] {
            assert_eq!(status.as_str().parse::<ItemStatus>(), Ok(status));
        }
        assert_eq!("ANOMALOUS".parse::<FlowStatus>(), Ok(FlowStatus::Anomalous));
        assert!("BOGUS".parse::<FlowStatus>().is_err());
    }

    #[test]
    fn test_outcome_without_receipt() {
        assert!(PaymentOutcome::NoReceipt.is_without_receipt());
        assert!(PaymentOutcome::StandInNoReceipt.is_without_receipt());
        assert!(!PaymentOutcome::Executed.is_without_receipt());
        assert!(!PaymentOutcome::Revoked.is_without_receipt());
    }

    #[test]
    fn test_outcome_serde_names() {
        let json = serde_json::to_string(&PaymentOutcome::StandInNoReceipt).unwrap();
        assert_eq!(json, "\"STAND_IN_NO_RECEIPT\"");

        let legacy: PaymentOutcome = serde_json::from_str("\"NO_RPT\"").unwrap();
        assert_eq!(legacy, PaymentOutcome::NoReceipt);
    }

    #[test]
    fn test_flow_key_display() {
        let key = FlowKey::new("77777777777", "2024-01-01PSP-0001", "PSP01", 2);
        assert_eq!(key.to_string(), "77777777777/2024-01-01PSP-0001/PSP01#2");
    }
}
