//! Emitted revocation list.

use super::entry::{CrlEntry, RevocationReason};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One revoked serial as published in a [`CrlDocument`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokedCertificate {
    pub serial_number: u64,
    pub revoked_at: Option<DateTime<Utc>>,
    pub reason_code: Option<RevocationReason>,
    pub invalidity_date: Option<DateTime<Utc>>,
    pub crl_number: Option<u64>,
}

impl From<&CrlEntry> for RevokedCertificate {
    fn from(entry: &CrlEntry) -> Self {
        Self {
            serial_number: entry.serial_number,
            revoked_at: entry.revoked_at,
            reason_code: entry.reason_code,
            invalidity_date: entry.invalidity_date,
            crl_number: entry.crl_number,
        }
    }
}

/// A point-in-time revocation list. Entries are sorted by serial number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrlDocument {
    pub crl_number: u64,
    pub this_update: DateTime<Utc>,
    pub next_update: DateTime<Utc>,
    pub entries: Vec<RevokedCertificate>,
}

impl CrlDocument {
    /// Whether `serial` is listed.
    pub fn contains(&self, serial: u64) -> bool {
        self.entries
            .binary_search_by_key(&serial, |e| e.serial_number)
            .is_ok()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_json_and_lookup() {
        let now = Utc::now();
        let listed = |serial| RevokedCertificate {
            serial_number: serial,
            revoked_at: Some(now),
            reason_code: Some(RevocationReason::KeyCompromise),
            invalidity_date: None,
            crl_number: Some(serial),
        };
        let doc = CrlDocument {
            crl_number: 3,
            this_update: now,
            next_update: now + Duration::hours(1),
            entries: vec![listed(1), listed(3)],
        };
        assert!(doc.contains(3));
        assert!(!doc.contains(2));
        let json = doc.to_json().unwrap();
        assert!(json.contains("\"crlNumber\": 3"));
        assert!(json.contains("keyCompromise"));
        assert_eq!(CrlDocument::from_json(&json).unwrap(), doc);
    }
}
