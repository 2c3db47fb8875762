//! Certificate revocation tracking.
//!
//! Every certificate the CA issues is registered here by serial number.
//! Revocation assigns a strictly increasing `crlNumber` taken from the
//! persisted [`CRL_NUMBER_COUNTER`] with compare-and-swap; losing that race
//! surfaces as [`Conflict::ConcurrentUpdate`] and the caller decides
//! whether to retry. Nothing here retries on its own.

pub mod document;
pub mod entry;

pub use document::{CrlDocument, RevokedCertificate};
pub use entry::{CrlEntry, CrlStatus, RevocationReason};

use crate::config::CrlConfig;
use crate::error::{Conflict, Error, Result};
use crate::store::{Counter, CrlRepository, CRL_NUMBER_COUNTER};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Revocation lookup used by signature verification.
pub trait RevocationCheck {
    /// Whether `serial` is revoked. Unknown serials are not revoked.
    fn is_revoked(&self, serial: u64) -> Result<bool>;
}

impl RevocationCheck for CrlDocument {
    fn is_revoked(&self, serial: u64) -> Result<bool> {
        Ok(self.contains(serial))
    }
}

/// Entry counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CrlStatistics {
    pub issued: usize,
    pub revoked: usize,
    pub expired: usize,
}

impl CrlStatistics {
    pub fn total(&self) -> usize {
        self.issued + self.revoked + self.expired
    }
}

/// Manager for issued serials and their revocation state.
pub struct CrlManager<S> {
    store: Arc<S>,
    config: CrlConfig,
}

impl<S> CrlManager<S>
where
    S: CrlRepository + Counter,
{
    pub fn new(store: Arc<S>, config: CrlConfig) -> Self {
        Self { store, config }
    }

    /// Register a newly issued certificate.
    pub fn issue(
        &self,
        serial_number: u64,
        owner: &str,
        valid_to: DateTime<Utc>,
    ) -> Result<CrlEntry> {
        let entry = CrlEntry::issued(serial_number, owner, Utc::now(), valid_to);
        self.store.insert_crl_entry(entry.clone())?;
        log::debug!("Registered certificate {} for {}", serial_number, owner);
        Ok(entry)
    }

    /// Revoke an issued certificate.
    pub fn revoke(
        &self,
        serial_number: u64,
        revoked_by: &str,
        reason: RevocationReason,
        invalidity_date: Option<DateTime<Utc>>,
    ) -> Result<CrlEntry> {
        let entry = self
            .store
            .get_crl_entry(serial_number)?
            .ok_or_else(|| Error::not_found("certificate", serial_number))?;
        match entry.status {
            CrlStatus::Revoked => return Err(Error::StateConflict(Conflict::AlreadyRevoked)),
            CrlStatus::Expired => return Err(Error::StateConflict(Conflict::NotRevocable)),
            CrlStatus::Issued => {},
        }

        let crl_number = self.next_crl_number()?;
        let now = Utc::now();
        let revoked = CrlEntry {
            revoked_by: Some(revoked_by.to_string()),
            reason_code: Some(reason),
            revoked_at: Some(now),
            invalidity_date,
            status: CrlStatus::Revoked,
            crl_number: Some(crl_number),
            ..entry
        };
        if !self.store.update_crl_entry(&revoked, CrlStatus::Issued)? {
            // Someone else revoked or expired it in between; the number stays burned
            return match self.store.get_crl_entry(serial_number)?.map(|e| e.status) {
                Some(CrlStatus::Revoked) => Err(Error::StateConflict(Conflict::AlreadyRevoked)),
                _ => Err(Error::StateConflict(Conflict::NotRevocable)),
            };
        }
        log::info!(
            "Revoked certificate {} by {} ({:?}), crlNumber {}",
            serial_number,
            revoked_by,
            reason,
            crl_number
        );
        Ok(revoked)
    }

    /// Revoke every issued certificate of `owner`, each with its own
    /// `crlNumber`.
    pub fn revoke_owner(
        &self,
        owner: &str,
        revoked_by: &str,
        reason: RevocationReason,
    ) -> Result<Vec<CrlEntry>> {
        let serials: Vec<u64> = self
            .store
            .crl_entries()?
            .into_iter()
            .filter(|e| e.owner == owner && e.status == CrlStatus::Issued)
            .map(|e| e.serial_number)
            .collect();
        let mut out = Vec::with_capacity(serials.len());
        for serial in serials {
            out.push(self.revoke(serial, revoked_by, reason, None)?);
        }
        Ok(out)
    }

    /// Whether `serial_number` is revoked; unknown serials are not.
    pub fn is_revoked(&self, serial_number: u64) -> Result<bool> {
        Ok(self
            .store
            .get_crl_entry(serial_number)?
            .is_some_and(|e| e.is_revoked()))
    }

    /// Status of a registered serial.
    pub fn status(&self, serial_number: u64) -> Result<CrlStatus> {
        self.store
            .get_crl_entry(serial_number)?
            .map(|e| e.status)
            .ok_or_else(|| Error::not_found("certificate", serial_number))
    }

    /// Mark every issued entry with `valid_to < now` as expired. Revoked
    /// entries and crl numbers are left alone. Returns the number changed.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut changed = 0;
        for entry in self.store.crl_entries()? {
            if entry.status != CrlStatus::Issued || entry.valid_to >= now {
                continue;
            }
            let expired = CrlEntry {
                status: CrlStatus::Expired,
                ..entry
            };
            if self.store.update_crl_entry(&expired, CrlStatus::Issued)? {
                changed += 1;
            }
        }
        if changed > 0 {
            log::info!("Expired {} certificate(s)", changed);
        }
        Ok(changed)
    }

    /// Current revocation list.
    pub fn emit(&self) -> Result<CrlDocument> {
        self.emit_at(Utc::now())
    }

    /// Revocation list as of `now`.
    pub fn emit_at(&self, now: DateTime<Utc>) -> Result<CrlDocument> {
        let mut entries: Vec<RevokedCertificate> = self
            .store
            .crl_entries()?
            .iter()
            .filter(|e| e.is_revoked())
            .map(RevokedCertificate::from)
            .collect();
        entries.sort_by_key(|e| e.serial_number);
        Ok(CrlDocument {
            crl_number: self.store.current(CRL_NUMBER_COUNTER)?,
            this_update: now,
            next_update: now + Duration::hours(i64::from(self.config.validity_hours)),
            entries,
        })
    }

    pub fn statistics(&self) -> Result<CrlStatistics> {
        let mut stats = CrlStatistics::default();
        for entry in self.store.crl_entries()? {
            match entry.status {
                CrlStatus::Issued => stats.issued += 1,
                CrlStatus::Revoked => stats.revoked += 1,
                CrlStatus::Expired => stats.expired += 1,
            }
        }
        Ok(stats)
    }

    /// `max(counter, highest assigned) + 1`, claimed with compare-and-swap.
    fn next_crl_number(&self) -> Result<u64> {
        let current = self.store.current(CRL_NUMBER_COUNTER)?;
        let highest = self
            .store
            .crl_entries()?
            .iter()
            .filter_map(|e| e.crl_number)
            .max()
            .unwrap_or(0);
        let next = current.max(highest) + 1;
        if !self.store.compare_and_swap(CRL_NUMBER_COUNTER, current, next)? {
            return Err(Error::StateConflict(Conflict::ConcurrentUpdate(
                CRL_NUMBER_COUNTER.to_string(),
            )));
        }
        Ok(next)
    }
}

impl<S> RevocationCheck for CrlManager<S>
where
    S: CrlRepository + Counter,
{
    fn is_revoked(&self, serial: u64) -> Result<bool> {
        CrlManager::is_revoked(self, serial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn manager() -> CrlManager<InMemoryStore> {
        CrlManager::new(Arc::new(InMemoryStore::new()), CrlConfig::default())
    }

    #[test]
    fn test_revoke_twice_conflicts() {
        let crl = manager();
        crl.issue(10, "alice", Utc::now() + Duration::days(1)).unwrap();
        let first = crl.revoke(10, "admin", RevocationReason::KeyCompromise, None).unwrap();
        assert_eq!(first.crl_number, Some(1));
        let err = crl.revoke(10, "admin", RevocationReason::KeyCompromise, None).unwrap_err();
        assert_eq!(err.conflict(), Some(&Conflict::AlreadyRevoked));
    }

    #[test]
    fn test_revoke_unknown_is_not_found() {
        let err = manager().revoke(99, "admin", RevocationReason::Unspecified, None).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn test_issue_duplicate_serial() {
        let crl = manager();
        crl.issue(1, "a", Utc::now()).unwrap();
        assert!(matches!(
            crl.issue(1, "b", Utc::now()),
            Err(Error::StateConflict(Conflict::Duplicate(_)))
        ));
    }

    #[test]
    fn test_crl_numbers_strictly_increase() {
        let crl = manager();
        let later = Utc::now() + Duration::days(1);
        for serial in [3, 1, 2] {
            crl.issue(serial, "bob", later).unwrap();
        }
        let numbers: Vec<u64> = [2, 3, 1]
            .iter()
            .map(|s| crl.revoke(*s, "admin", RevocationReason::Superseded, None).unwrap())
            .filter_map(|e| e.crl_number)
            .collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        let doc = crl.emit().unwrap();
        assert_eq!(doc.crl_number, 3);
        let serials: Vec<u64> = doc.entries.iter().map(|e| e.serial_number).collect();
        assert_eq!(serials, vec![1, 2, 3]);
    }

    #[test]
    fn test_sweep_expired_leaves_revoked_alone() {
        let crl = manager();
        let past = Utc::now() - Duration::days(1);
        crl.issue(1, "a", past).unwrap();
        crl.issue(2, "a", past).unwrap();
        crl.issue(3, "a", Utc::now() + Duration::days(1)).unwrap();
        crl.revoke(2, "admin", RevocationReason::Unspecified, None).unwrap();

        assert_eq!(crl.sweep_expired(Utc::now()).unwrap(), 1);
        assert_eq!(crl.status(1).unwrap(), CrlStatus::Expired);
        assert_eq!(crl.status(2).unwrap(), CrlStatus::Revoked);
        assert_eq!(crl.status(3).unwrap(), CrlStatus::Issued);
        assert_eq!(crl.emit().unwrap().crl_number, 1);

        let err = crl.revoke(1, "admin", RevocationReason::Unspecified, None).unwrap_err();
        assert_eq!(err.conflict(), Some(&Conflict::NotRevocable));
    }

    #[test]
    fn test_is_revoked_unknown_false() {
        let crl = manager();
        assert!(!crl.is_revoked(12345).unwrap());
        let check: &dyn RevocationCheck = &crl;
        assert!(!check.is_revoked(12345).unwrap());
    }

    #[test]
    fn test_revoke_owner_and_statistics() {
        let crl = manager();
        let later = Utc::now() + Duration::days(1);
        crl.issue(1, "carol", later).unwrap();
        crl.issue(2, "carol", later).unwrap();
        crl.issue(3, "dave", later).unwrap();
        let revoked = crl
            .revoke_owner("carol", "admin", RevocationReason::AffiliationChanged)
            .unwrap();
        assert_eq!(revoked.len(), 2);
        let stats = crl.statistics().unwrap();
        assert_eq!((stats.issued, stats.revoked, stats.expired), (1, 2, 0));
        assert_eq!(stats.total(), 3);
    }

    #[test]
    fn test_next_update_from_config() {
        let crl = CrlManager::new(Arc::new(InMemoryStore::new()), CrlConfig { validity_hours: 2 });
        let now = Utc::now();
        let doc = crl.emit_at(now).unwrap();
        assert_eq!(doc.next_update - doc.this_update, Duration::hours(2));
        assert!(doc.entries.is_empty());
    }
}
