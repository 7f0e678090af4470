//! Local ledger records consumed by reconciliation.
//!
//! These rows are owned by the operator's payment system and are never
//! mutated by the pipeline.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A payment known locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub domain_code: String,
    pub iuv: String,
    pub iur: Option<String>,
    /// Index of the paid item within its position.
    pub position_index: Option<i64>,
    pub paid_amount: Option<Decimal>,
    pub revoked_amount: Option<Decimal>,
    pub position_item_id: Option<i64>,
}

/// An installment (or single amount) within a payment position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentPositionItem {
    pub id: i64,
    pub position_id: i64,
    pub position_index: i64,
    pub amount_due: Decimal,
}

/// A debt position identified by `(domain_code, iuv)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentPosition {
    pub id: i64,
    pub domain_code: String,
    pub iuv: String,
    pub items: Vec<PaymentPositionItem>,
}

impl PaymentPosition {
    pub fn item_at(&self, index: i64) -> Option<&PaymentPositionItem> {
        self.items.iter().find(|item| item.position_index == index)
    }
}

/// Which optional narrowing keys a payment lookup carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupVariant {
    IurAndIndex,
    IurOnly,
    IndexOnly,
    IuvOnly,
}

/// Lookup of local payments by IUV, narrowed by IUR and index when present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentLookup {
    pub domain_code: String,
    pub iuv: String,
    pub iur: Option<String>,
    pub index: Option<i64>,
}

impl PaymentLookup {
    pub fn new(domain_code: impl Into<String>, iuv: impl Into<String>) -> Self {
        Self {
            domain_code: domain_code.into(),
            iuv: iuv.into(),
            iur: None,
            index: None,
        }
    }

    pub fn with_iur(mut self, iur: Option<String>) -> Self {
        self.iur = iur.filter(|value| !value.is_empty());
        self
    }

    pub fn with_index(mut self, index: Option<i64>) -> Self {
        self.index = index;
        self
    }

    pub fn variant(&self) -> LookupVariant {
        match (&self.iur, self.index) {
            (Some(_), Some(_)) => LookupVariant::IurAndIndex,
            (Some(_), None) => LookupVariant::IurOnly,
            (None, Some(_)) => LookupVariant::IndexOnly,
            (None, None) => LookupVariant::IuvOnly,
        }
    }

    /// In-memory equivalent of the store query.
    pub fn matches(&self, payment: &Payment) -> bool {
        if payment.domain_code != self.domain_code || payment.iuv != self.iuv {
            return false;
        }
        let iur_ok = match &self.iur {
            Some(iur) => payment.iur.as_deref() == Some(iur.as_str()),
            None => true,
        };
        let index_ok = match self.index {
            Some(index) => payment.position_index == Some(index),
            None => true,
        };
        iur_ok && index_ok
    }
}
