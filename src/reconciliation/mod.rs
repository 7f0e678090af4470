//! Reconciliation of reported payments against the local ledger.
//!
//! Each reported item is matched to local payments, classified, and checked
//! for duplicates among the items of the same flow already processed. The
//! flow itself is then checked against its declared totals.
//!
//! Only three conditions make a flow ANOMALOUS: a declared sum mismatch, a
//! declared count mismatch, and an ambiguous item match. Every other item
//! anomaly stays on the item.

pub mod anomaly;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, warn};

pub use anomaly::AnomalyCode;

use crate::interfaces::PaymentItem;
use crate::iuv;
use crate::model::{
    CreditorDomain, FlowDetails, FlowStatus, ItemStatus, Payment, PaymentLookup, PaymentOutcome,
    ReconciledFlow, ReconciliationItem, StagingFlow,
};
use crate::storage::{LedgerStore, StorageError};

/// Reconciliation errors.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("Ledger lookup failed: {0}")]
    Storage(#[from] StorageError),
}

/// Identity used for duplicate detection; a missing index only equals a
/// missing index.
type ItemIdentity = (String, String, Option<i64>);

/// Result of classifying one item, before duplicate detection.
struct ItemVerdict {
    status: ItemStatus,
    anomalies: Vec<AnomalyCode>,
    payment_id: Option<i64>,
    position_item_id: Option<i64>,
}

impl ItemVerdict {
    fn new(status: ItemStatus) -> Self {
        Self {
            status,
            anomalies: Vec::new(),
            payment_id: None,
            position_item_id: None,
        }
    }
}

/// Matches reported payments to local records and assigns verdicts.
pub struct ReconciliationEngine {
    ledger: Arc<dyn LedgerStore>,
}

impl ReconciliationEngine {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }

    /// Reconcile one fully fetched flow.
    ///
    /// `payments` must be in the order the upstream returned them: the first
    /// occurrence of a repeated item is never itself flagged as a duplicate.
    #[tracing::instrument(name = "reconcile.flow", skip_all, fields(flow = %staged.key, items = payments.len()))]
    pub async fn reconcile(
        &self,
        domain: Option<&CreditorDomain>,
        staged: &StagingFlow,
        details: FlowDetails,
        payments: Vec<PaymentItem>,
    ) -> Result<ReconciledFlow, ReconcileError> {
        let domain_code = staged.key.domain_code.as_str();
        let mut flow_anomalies: Vec<AnomalyCode> = Vec::new();
        let mut seen: HashSet<ItemIdentity> = HashSet::with_capacity(payments.len());
        let mut items = Vec::with_capacity(payments.len());

        for payment in payments {
            let mut verdict = self.classify(domain, domain_code, &payment).await?;

            if verdict
                .anomalies
                .iter()
                .any(AnomalyCode::escalates_to_flow)
                && !flow_anomalies.contains(&AnomalyCode::AmbiguousMatch)
            {
                flow_anomalies.push(AnomalyCode::AmbiguousMatch);
            }

            let identity = (payment.iuv.clone(), payment.iur.clone(), payment.index);
            let duplicate = !seen.insert(identity);
            if duplicate {
                verdict.anomalies.push(AnomalyCode::DuplicateInFlow);
                verdict.status = ItemStatus::Anomalous;
            } else if !verdict.anomalies.is_empty() && verdict.status != ItemStatus::OtherIntermediary {
                verdict.status = ItemStatus::Anomalous;
            }

            items.push(ReconciliationItem {
                iuv: payment.iuv,
                iur: payment.iur,
                item_index: payment.index,
                amount: payment.amount,
                outcome: payment.outcome,
                paid_at: payment.paid_at,
                status: verdict.status,
                anomaly: anomaly::describe(&verdict.anomalies),
                payment_id: verdict.payment_id,
                position_item_id: verdict.position_item_id,
            });
        }

        let reported_sum: Decimal = items.iter().map(|item| item.amount).sum();
        if let Some(declared) = details.declared_sum {
            if reported_sum != declared {
                debug!(%declared, %reported_sum, "Declared sum mismatch");
                flow_anomalies.push(AnomalyCode::DeclaredSumMismatch);
            }
        }
        if let Some(declared) = details.declared_count {
            if items.len() as i64 != declared {
                debug!(declared, reported = items.len(), "Declared count mismatch");
                flow_anomalies.push(AnomalyCode::DeclaredCountMismatch);
            }
        }

        let status = if flow_anomalies.is_empty() {
            FlowStatus::Accepted
        } else {
            FlowStatus::Anomalous
        };

        Ok(ReconciledFlow {
            key: staged.key.clone(),
            published_at: staged.published_at,
            details,
            status,
            anomaly: anomaly::describe(&flow_anomalies),
            reconciled_at: Utc::now(),
            items,
        })
    }

    async fn classify(
        &self,
        domain: Option<&CreditorDomain>,
        domain_code: &str,
        payment: &PaymentItem,
    ) -> Result<ItemVerdict, ReconcileError> {
        let lookup = PaymentLookup::new(domain_code, payment.iuv.as_str())
            .with_iur(Some(payment.iur.clone()))
            .with_index(payment.index);
        let matches = self.ledger.find_payments(&lookup).await?;

        match matches.as_slice() {
            [matched] => Ok(verify_amount(matched, payment)),
            [] => self.classify_unmatched(domain, domain_code, payment).await,
            _ => {
                debug!(iuv = %payment.iuv, candidates = matches.len(), "Ambiguous payment match");
                let mut verdict = ItemVerdict::new(ItemStatus::Anomalous);
                verdict.anomalies.push(AnomalyCode::AmbiguousMatch);
                Ok(verdict)
            }
        }
    }

    async fn classify_unmatched(
        &self,
        domain: Option<&CreditorDomain>,
        domain_code: &str,
        payment: &PaymentItem,
    ) -> Result<ItemVerdict, ReconcileError> {
        if !iuv::is_internal(domain, &payment.iuv) {
            return Ok(ItemVerdict::new(ItemStatus::OtherIntermediary));
        }

        let mut verdict = ItemVerdict::new(ItemStatus::Ok);
        let position = self.ledger.find_position(domain_code, &payment.iuv).await?;
        if let Some(position) = &position {
            verdict.position_item_id = position
                .item_at(payment.index.unwrap_or(1))
                .map(|item| item.id);
        }

        if payment.outcome.is_without_receipt() {
            match &position {
                None => verdict.anomalies.push(AnomalyCode::PositionNotFound),
                Some(position) if position.items.len() != 1 => {
                    verdict.anomalies.push(AnomalyCode::PositionItemCountMismatch)
                }
                Some(_) => {}
            }
        } else {
            verdict.anomalies.push(AnomalyCode::PaymentNotFound);
        }

        Ok(verdict)
    }
}

fn verify_amount(matched: &Payment, payment: &PaymentItem) -> ItemVerdict {
    let mut verdict = ItemVerdict::new(ItemStatus::Ok);
    verdict.payment_id = Some(matched.id);
    verdict.position_item_id = matched.position_item_id;

    let (expected, reported, code) = if payment.outcome == PaymentOutcome::Revoked {
        (
            matched.revoked_amount,
            payment.amount.abs(),
            AnomalyCode::RevokedAmountMismatch,
        )
    } else {
        (
            matched.paid_amount,
            payment.amount,
            AnomalyCode::PaidAmountMismatch,
        )
    };

    match expected {
        Some(expected) if expected != reported => {
            verdict.anomalies.push(code);
        }
        Some(_) => {}
        None => warn!(
            iuv = %payment.iuv,
            payment_id = matched.id,
            outcome = payment.outcome.as_str(),
            "Local payment has no amount to compare, skipping amount check"
        ),
    }

    verdict
}
