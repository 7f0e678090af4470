//! Anomaly codes assigned during reconciliation.

use std::fmt;

/// Separator between codes in a persisted anomaly description.
pub const SEPARATOR: &str = "|";

/// Reconciliation anomaly catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnomalyCode {
    /// Receipted payment with no local record.
    PaymentNotFound,
    /// Several local payments match the reported item.
    AmbiguousMatch,
    /// Reported amount differs from the locally paid amount.
    PaidAmountMismatch,
    /// Sum of reported amounts differs from the declared total.
    DeclaredSumMismatch,
    /// Number of reported items differs from the declared count.
    DeclaredCountMismatch,
    /// No-receipt payment with no local position.
    PositionNotFound,
    /// Reported revoked amount differs from the locally revoked amount.
    RevokedAmountMismatch,
    /// No-receipt payment whose position does not hold exactly one item.
    PositionItemCountMismatch,
    /// Same `(iuv, iur, index)` reported more than once in a flow.
    DuplicateInFlow,
}

impl AnomalyCode {
    pub fn code(&self) -> &'static str {
        match self {
            Self::PaymentNotFound => "007101",
            Self::AmbiguousMatch => "007102",
            Self::PaidAmountMismatch => "007104",
            Self::DeclaredSumMismatch => "007106",
            Self::DeclaredCountMismatch => "007107",
            Self::PositionNotFound => "007111",
            Self::RevokedAmountMismatch => "007112",
            Self::PositionItemCountMismatch => "007114",
            Self::DuplicateInFlow => "007115",
        }
    }

    /// Only an ambiguous match is carried up to the flow.
    pub fn escalates_to_flow(&self) -> bool {
        matches!(self, Self::AmbiguousMatch)
    }
}

impl fmt::Display for AnomalyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Render codes as a persisted description, or `None` if there are none.
pub fn describe(codes: &[AnomalyCode]) -> Option<String> {
    if codes.is_empty() {
        return None;
    }
    Some(
        codes
            .iter()
            .map(AnomalyCode::code)
            .collect::<Vec<_>>()
            .join(SEPARATOR),
    )
}
