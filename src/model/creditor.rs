//! Creditor domain reference data.

use serde::{Deserialize, Serialize};

/// Identifier-format scheme used by a creditor domain.
///
/// Determines which IUV shapes the domain mints itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuxDigit {
    /// Single intermediary, legacy 15-digit scheme.
    Legacy,
    /// Single intermediary, 17-digit scheme.
    Single,
    /// Several intermediaries share the domain, multiplexed by segregation code.
    Segregated,
    /// Any scheme value this pipeline does not mint identifiers for.
    Unsupported(i64),
}

impl AuxDigit {
    /// Parse the numeric scheme value stored in reference data.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Legacy,
            1 => Self::Single,
            3 => Self::Segregated,
            other => Self::Unsupported(other),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Self::Legacy => 0,
            Self::Single => 1,
            Self::Segregated => 3,
            Self::Unsupported(code) => *code,
        }
    }
}

/// A creditor institution configured to receive flows.
///
/// Owned externally; read-only for the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditorDomain {
    /// Unique domain code (fiscal code of the creditor).
    pub domain_code: String,
    /// Whether flows should be acquired for this domain.
    pub downloads_flows: bool,
    pub aux_digit: AuxDigit,
    /// Required when `aux_digit` is [`AuxDigit::Segregated`].
    pub segregation_code: Option<u32>,
}

impl CreditorDomain {
    pub fn new(domain_code: impl Into<String>, aux_digit: AuxDigit) -> Self {
        Self {
            domain_code: domain_code.into(),
            downloads_flows: true,
            aux_digit,
            segregation_code: None,
        }
    }

    pub fn with_segregation_code(mut self, code: u32) -> Self {
        self.segregation_code = Some(code);
        self
    }

    pub fn with_downloads_flows(mut self, downloads: bool) -> Self {
        self.downloads_flows = downloads;
        self
    }

    /// Segregation code rendered the way it appears inside an IUV.
    pub fn padded_segregation_code(&self) -> Option<String> {
        self.segregation_code.map(|code| format!("{:02}", code))
    }
}
