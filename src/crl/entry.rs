//! Revocation list entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of an issued certificate.
///
/// Only `Issued -> Revoked` and `Issued -> Expired` are legal; `Revoked`
/// is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrlStatus {
    Issued,
    Revoked,
    Expired,
}

impl CrlStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Issued => "issued",
            Self::Revoked => "revoked",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for CrlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RFC 5280 CRLReason. Code 7 is not assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RevocationReason {
    Unspecified,
    KeyCompromise,
    CaCompromise,
    AffiliationChanged,
    Superseded,
    CessationOfOperation,
    CertificateHold,
    RemoveFromCrl,
    PrivilegeWithdrawn,
    AaCompromise,
}

impl RevocationReason {
    /// Numeric reason code.
    pub fn code(self) -> u8 {
        match self {
            Self::Unspecified => 0,
            Self::KeyCompromise => 1,
            Self::CaCompromise => 2,
            Self::AffiliationChanged => 3,
            Self::Superseded => 4,
            Self::CessationOfOperation => 5,
            Self::CertificateHold => 6,
            Self::RemoveFromCrl => 8,
            Self::PrivilegeWithdrawn => 9,
            Self::AaCompromise => 10,
        }
    }

    /// Reason for a numeric code; `None` for 7 and anything above 10.
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Unspecified,
            1 => Self::KeyCompromise,
            2 => Self::CaCompromise,
            3 => Self::AffiliationChanged,
            4 => Self::Superseded,
            5 => Self::CessationOfOperation,
            6 => Self::CertificateHold,
            8 => Self::RemoveFromCrl,
            9 => Self::PrivilegeWithdrawn,
            10 => Self::AaCompromise,
            _ => return None,
        })
    }
}

/// One issued certificate serial and its revocation state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrlEntry {
    pub serial_number: u64,
    pub owner: String,
    pub revoked_by: Option<String>,
    pub reason_code: Option<RevocationReason>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub invalidity_date: Option<DateTime<Utc>>,
    pub issued_at: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub status: CrlStatus,
    /// Assigned on revocation only
    pub crl_number: Option<u64>,
}

impl CrlEntry {
    /// A freshly issued entry.
    pub fn issued(
        serial_number: u64,
        owner: impl Into<String>,
        issued_at: DateTime<Utc>,
        valid_to: DateTime<Utc>,
    ) -> Self {
        Self {
            serial_number,
            owner: owner.into(),
            revoked_by: None,
            reason_code: None,
            revoked_at: None,
            invalidity_date: None,
            issued_at,
            valid_to,
            status: CrlStatus::Issued,
            crl_number: None,
        }
    }

    pub fn is_revoked(&self) -> bool {
        self.status == CrlStatus::Revoked
    }
}

/// Minimal DER INTEGER content for a positive serial.
pub fn serial_to_der_bytes(serial: u64) -> Vec<u8> {
    let bytes = serial.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    let mut out = Vec::with_capacity(9);
    if bytes[first] & 0x80 != 0 {
        out.push(0);
    }
    out.extend_from_slice(&bytes[first..]);
    out
}

/// Inverse of [`serial_to_der_bytes`]; `None` when the value does not fit
/// in 64 bits.
pub fn serial_from_der_bytes(raw: &[u8]) -> Option<u64> {
    let trimmed: &[u8] = match raw.iter().position(|b| *b != 0) {
        Some(p) => &raw[p..],
        None => return Some(0),
    };
    if trimmed.len() > 8 {
        return None;
    }
    Some(trimmed.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}
