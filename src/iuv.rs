//! IUV ownership classification.
//!
//! Decides whether a payment identifier was minted by this operator for a
//! creditor domain, based on the domain's aux digit scheme and, for
//! segregated domains, its segregation code.

use crate::model::{AuxDigit, CreditorDomain};

/// Prefix of the structured creditor reference shape.
pub const TAGGED_PREFIX: &str = "RF";

const LEGACY_LENGTH: usize = 15;
const NUMERIC_LENGTH: usize = 17;
const TAGGED_HEADER_LENGTH: usize = 6;
const TAGGED_MAX_SUFFIX: usize = 19;

fn is_numeric(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

fn is_tagged_for(iuv: &str, segregation: &str) -> bool {
    if iuv.len() < TAGGED_HEADER_LENGTH || !iuv.starts_with(TAGGED_PREFIX) {
        return false;
    }
    let suffix_len = iuv.len() - TAGGED_HEADER_LENGTH;
    suffix_len <= TAGGED_MAX_SUFFIX && iuv.get(4..6) == Some(segregation)
}

/// True if `iuv` belongs to this operator for `domain`.
///
/// Never fails: unknown domains and malformed identifiers are simply not
/// internal.
pub fn is_internal(domain: Option<&CreditorDomain>, iuv: &str) -> bool {
    let Some(domain) = domain else {
        return false;
    };

    match domain.aux_digit {
        AuxDigit::Legacy => is_numeric(iuv) && iuv.len() == LEGACY_LENGTH,
        AuxDigit::Single => is_numeric(iuv) && iuv.len() == NUMERIC_LENGTH,
        AuxDigit::Segregated => {
            let Some(segregation) = domain.padded_segregation_code() else {
                return false;
            };
            is_tagged_for(iuv, &segregation)
                || (is_numeric(iuv)
                    && iuv.len() == NUMERIC_LENGTH
                    && iuv.starts_with(segregation.as_str()))
        }
        AuxDigit::Unsupported(_) => false,
    }
}
