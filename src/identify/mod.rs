//! Signer identification.
//!
//! A signer proves who they are through one or more identify methods.
//! Passive methods (`account`, `email`) are confirmed by the host;
//! interactive channels, whose keys end in `Token`, deliver a one-time code
//! that the signer types back. Only the SHA-256 digest of a code is stored.

use crate::config::IdentifyConfig;
use crate::error::{Conflict, Error, Result};
use crate::signatures::sha256_hex;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Known identify method keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IdentifyMethodKind {
    Account,
    Email,
    SmsToken,
    WhatsappToken,
    SignalToken,
    TelegramToken,
    XmppToken,
}

impl IdentifyMethodKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::Email => "email",
            Self::SmsToken => "smsToken",
            Self::WhatsappToken => "whatsappToken",
            Self::SignalToken => "signalToken",
            Self::TelegramToken => "telegramToken",
            Self::XmppToken => "xmppToken",
        }
    }

    /// Interactive one-time-code channel.
    pub fn is_token(self) -> bool {
        self.as_str().ends_with("Token")
    }
}

impl fmt::Display for IdentifyMethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdentifyMethodKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        [
            Self::Account,
            Self::Email,
            Self::SmsToken,
            Self::WhatsappToken,
            Self::SignalToken,
            Self::TelegramToken,
            Self::XmppToken,
        ]
        .into_iter()
        .find(|k| k.as_str() == s)
        .ok_or_else(|| Error::Validation(format!("unknown identify method: {}", s)))
    }
}

/// One identify method of one signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyMethod {
    pub id: u64,
    pub sign_request_id: u64,
    pub identifier_key: String,
    pub identifier_value: String,
    pub mandatory: bool,
    /// SHA-256 hex of the outstanding one-time code
    pub code: Option<String>,
    pub attempts: u32,
    pub identified_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub code_sent_at: Option<DateTime<Utc>>,
}

impl IdentifyMethod {
    pub fn new(sign_request_id: u64, kind: IdentifyMethodKind, value: impl Into<String>) -> Self {
        Self {
            id: 0,
            sign_request_id,
            identifier_key: kind.as_str().to_string(),
            identifier_value: value.into(),
            mandatory: true,
            code: None,
            attempts: 0,
            identified_at: None,
            last_attempt_at: None,
            code_sent_at: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.mandatory = false;
        self
    }

    pub fn kind(&self) -> Result<IdentifyMethodKind> {
        self.identifier_key.parse()
    }

    pub fn is_identified(&self) -> bool {
        self.identified_at.is_some()
    }
}

/// A signer is identified when every mandatory method is; a signer with no
/// mandatory method is identified.
pub fn is_identified(methods: &[IdentifyMethod]) -> bool {
    methods.iter().filter(|m| m.mandatory).all(IdentifyMethod::is_identified)
}

/// Result of checking a submitted code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Identified,
    /// Wrong code; the attempt was counted
    Rejected { remaining_attempts: u32 },
}

/// One-time-code issuer and checker.
#[derive(Debug, Clone, Default)]
pub struct IdentifyVerifier {
    config: IdentifyConfig,
}

impl IdentifyVerifier {
    pub fn new(config: IdentifyConfig) -> Self {
        Self { config }
    }

    /// Generate a code for a token method. The digest is stored on
    /// `method`; the plaintext is returned for delivery.
    pub fn issue_code(&self, method: &mut IdentifyMethod, now: DateTime<Utc>) -> Result<String> {
        let kind = method.kind()?;
        if !kind.is_token() {
            return Err(Error::Validation(format!("{} does not use one-time codes", kind)));
        }
        let mut rng = OsRng;
        let code: String = (0..self.config.code_length)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect();
        method.code = Some(sha256_hex(code.as_bytes()));
        method.code_sent_at = Some(now);
        method.attempts = 0;
        method.last_attempt_at = None;
        log::debug!("Issued {} code for sign request {}", kind, method.sign_request_id);
        Ok(code)
    }

    /// Check `submitted` against the outstanding code.
    ///
    /// A match sets `identified_at` and resets the attempt counter; a
    /// mismatch counts the attempt and stamps `last_attempt_at`. Mutations
    /// are made on `method` and must be persisted by the caller, including
    /// on rejection.
    pub fn verify(
        &self,
        method: &mut IdentifyMethod,
        submitted: &str,
        now: DateTime<Utc>,
    ) -> Result<VerifyOutcome> {
        if method.attempts >= self.config.max_attempts {
            return Err(Error::StateConflict(Conflict::TooManyAttempts));
        }
        let expected = method
            .code
            .clone()
            .ok_or_else(|| {
                Error::Validation(format!("no code issued for {}", method.identifier_key))
            })?;
        let issued = method.code_sent_at.or(method.last_attempt_at);
        let ttl_seconds = i64::try_from(self.config.code_ttl_seconds).unwrap_or(i64::MAX);
        let ttl = Duration::seconds(ttl_seconds.min(i64::MAX / 1_000));
        if issued.is_some_and(|at| now - at > ttl) {
            return Err(Error::StateConflict(Conflict::ExpiredCode));
        }

        let submitted = sha256_hex(submitted.trim().as_bytes());
        if constant_time_eq(submitted.as_bytes(), expected.as_bytes()) {
            method.identified_at = Some(now);
            method.attempts = 0;
            method.code = None;
            log::info!(
                "Sign request {} identified by {}",
                method.sign_request_id,
                method.identifier_key
            );
            return Ok(VerifyOutcome::Identified);
        }

        method.attempts += 1;
        method.last_attempt_at = Some(now);
        let remaining_attempts = self.config.max_attempts.saturating_sub(method.attempts);
        log::warn!(
            "Wrong code for sign request {} via {} ({} attempt(s) left)",
            method.sign_request_id,
            method.identifier_key,
            remaining_attempts
        );
        Ok(VerifyOutcome::Rejected { remaining_attempts })
    }

    /// Confirm a passive method (account, email).
    pub fn mark_identified(&self, method: &mut IdentifyMethod, now: DateTime<Utc>) -> Result<()> {
        let kind = method.kind()?;
        if kind.is_token() {
            return Err(Error::Validation(format!("{} requires a one-time code", kind)));
        }
        method.identified_at = Some(now);
        Ok(())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sms() -> IdentifyMethod {
        IdentifyMethod::new(1, IdentifyMethodKind::SmsToken, "+15550100")
    }

    #[test]
    fn test_kind_names() {
        assert!(IdentifyMethodKind::TelegramToken.is_token());
        assert!(!IdentifyMethodKind::Email.is_token());
        assert_eq!(
            "whatsappToken".parse::<IdentifyMethodKind>().unwrap(),
            IdentifyMethodKind::WhatsappToken
        );
        assert!("fax".parse::<IdentifyMethodKind>().is_err());
    }

    #[test]
    fn test_issue_and_verify() {
        let verifier = IdentifyVerifier::default();
        let mut method = sms();
        let now = Utc::now();
        let code = verifier.issue_code(&mut method, now).unwrap();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
        assert_ne!(method.code.as_deref(), Some(code.as_str()));

        assert_eq!(
            verifier.verify(&mut method, "not-it", now).unwrap(),
            VerifyOutcome::Rejected { remaining_attempts: 4 }
        );
        assert_eq!(method.attempts, 1);
        assert_eq!(verifier.verify(&mut method, &code, now).unwrap(), VerifyOutcome::Identified);
        assert_eq!(method.attempts, 0);
        assert!(method.is_identified());
    }

    #[test]
    fn test_too_many_attempts() {
        let verifier = IdentifyVerifier::new(IdentifyConfig::default().with_max_attempts(2));
        let mut method = sms();
        let now = Utc::now();
        let code = verifier.issue_code(&mut method, now).unwrap();
        verifier.verify(&mut method, "x", now).unwrap();
        verifier.verify(&mut method, "x", now).unwrap();
        let err = verifier.verify(&mut method, &code, now).unwrap_err();
        assert_eq!(err.conflict(), Some(&Conflict::TooManyAttempts));
    }

    #[test]
    fn test_expired_code() {
        let verifier = IdentifyVerifier::new(IdentifyConfig::default().with_code_ttl_seconds(60));
        let mut method = sms();
        let sent = Utc::now();
        let code = verifier.issue_code(&mut method, sent).unwrap();
        let err = verifier
            .verify(&mut method, &code, sent + Duration::seconds(61))
            .unwrap_err();
        assert_eq!(err.conflict(), Some(&Conflict::ExpiredCode));
    }

    #[test]
    fn test_passive_methods() {
        let verifier = IdentifyVerifier::default();
        let mut account = IdentifyMethod::new(1, IdentifyMethodKind::Account, "alice");
        assert!(verifier.issue_code(&mut account, Utc::now()).is_err());
        verifier.mark_identified(&mut account, Utc::now()).unwrap();
        assert!(account.is_identified());
        assert!(verifier.mark_identified(&mut sms(), Utc::now()).is_err());
    }

    #[test]
    fn test_is_identified_only_counts_mandatory() {
        let mut email = IdentifyMethod::new(1, IdentifyMethodKind::Email, "a@example.com");
        let optional = sms().optional();
        assert!(is_identified(&[]));
        assert!(!is_identified(&[email.clone(), optional.clone()]));
        email.identified_at = Some(Utc::now());
        assert!(is_identified(&[email, optional]));
    }
}
