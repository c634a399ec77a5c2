use std::fmt;

use super::error::DomainError;

const MAX_TENDER_CODE_LEN: usize = 32;

/// Primary tender code as published by the issuing authority.
///
/// Codes are opaque digit strings; they are compared by exact or prefix
/// match and never case-folded or converted to integers, so leading zeros
/// survive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TenderCode(String);

impl TenderCode {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("tender code must not be empty"));
        }
        if trimmed.len() > MAX_TENDER_CODE_LEN {
            return Err(DomainError::validation(format!(
                "tender code exceeds {MAX_TENDER_CODE_LEN} characters"
            )));
        }
        if !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::validation(format!(
                "tender code `{trimmed}` must contain digits only"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenderCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
