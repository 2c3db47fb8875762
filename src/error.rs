//! Error types for the signing core.
//!
//! Every fallible operation in the crate returns [`Result`]. The top-level
//! variants follow the workflow error taxonomy (validation, not-found, state
//! conflict, integrity, retryable infrastructure); the remaining variants
//! describe failures of the PDF and cryptographic layers underneath.

/// Result type alias for signing-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in the signing core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Caller input is structurally wrong (malformed identifier, OID, UUID...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced entity does not exist
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of entity (serial, signer, document...)
        entity: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// Operation is not allowed in the entity's current state
    #[error("State conflict: {0}")]
    StateConflict(Conflict),

    /// Document integrity check failed (DocMDP violation, hash mismatch)
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Storage or filesystem failure that is safe to retry
    #[error("Retryable infrastructure error: {0}")]
    RetryableInfra(String),

    /// Parse error at specific byte offset
    #[error("Failed to parse object at byte {offset}: {reason}")]
    ParseError {
        /// Byte offset where error occurred
        offset: usize,
        /// Reason for parse failure
        reason: String,
    },

    /// Invalid cross-reference section
    #[error("Invalid cross-reference table")]
    InvalidXref,

    /// Referenced object not found in cross-reference table
    #[error("Object not found: {0} {1} R")]
    ObjectNotFound(u32, u16),

    /// Invalid PDF structure
    #[error("Invalid PDF: {0}")]
    InvalidPdf(String),

    /// Stream decoding error
    #[error("Stream decoding error: {0}")]
    Decode(String),

    /// Recursion depth limit exceeded
    #[error("Recursion depth limit exceeded (max: {0})")]
    RecursionLimitExceeded(u32),

    /// Certificate, key or CMS failure
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reason attached to [`Error::StateConflict`].
///
/// The `Display` form is the stable reason name hosts match on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    /// Certificate serial is already revoked
    AlreadyRevoked,
    /// Certificate is expired and can no longer be revoked
    NotRevocable,
    /// Signer already signed; the row is frozen
    AlreadySigned,
    /// A signer with a lower signing order has not signed yet
    SigningOrder {
        /// Signing order of the first signer still pending
        waiting_on: u32,
    },
    /// Signer or document is not in a signable state
    NotAbleToSign(String),
    /// Too many failed identification attempts
    TooManyAttempts,
    /// One-time code is past its time-to-live
    ExpiredCode,
    /// Unique constraint violated
    Duplicate(String),
    /// Compare-and-swap on a persisted counter lost the race
    ConcurrentUpdate(String),
}

impl std::fmt::Display for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Conflict::AlreadyRevoked => write!(f, "AlreadyRevoked"),
            Conflict::NotRevocable => write!(f, "NotRevocable"),
            Conflict::AlreadySigned => write!(f, "AlreadySigned"),
            Conflict::SigningOrder { waiting_on } => {
                write!(f, "SigningOrder (waiting on order {})", waiting_on)
            },
            Conflict::NotAbleToSign(why) => write!(f, "NotAbleToSign ({})", why),
            Conflict::TooManyAttempts => write!(f, "TooManyAttempts"),
            Conflict::ExpiredCode => write!(f, "ExpiredCode"),
            Conflict::Duplicate(what) => write!(f, "Duplicate ({})", what),
            Conflict::ConcurrentUpdate(what) => write!(f, "ConcurrentUpdate ({})", what),
        }
    }
}

impl Error {
    /// Shorthand for [`Error::NotFound`].
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Error::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether the caller may retry the whole operation.
    ///
    /// Revocation and signing never retry on their own; this only tells the
    /// host that retrying is safe.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::RetryableInfra(_) | Error::StateConflict(Conflict::ConcurrentUpdate(_))
        )
    }

    /// The conflict reason, if this is a state conflict.
    pub fn conflict(&self) -> Option<&Conflict> {
        match self {
            Error::StateConflict(c) => Some(c),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_error() {
        let err = Error::not_found("serial", 42);
        let msg = format!("{}", err);
        assert!(msg.contains("serial"));
        assert!(msg.contains("42"));
    }

    #[test]
    fn test_conflict_reason_names() {
        let err = Error::StateConflict(Conflict::TooManyAttempts);
        assert!(format!("{}", err).contains("TooManyAttempts"));
        assert_eq!(Conflict::ExpiredCode.to_string(), "ExpiredCode");
        assert_eq!(Conflict::AlreadyRevoked.to_string(), "AlreadyRevoked");
    }

    #[test]
    fn test_parse_error() {
        let err = Error::ParseError {
            offset: 1234,
            reason: "invalid token".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("1234"));
        assert!(msg.contains("invalid token"));
    }

    #[test]
    fn test_object_not_found_error() {
        let err = Error::ObjectNotFound(10, 0);
        assert!(format!("{}", err).contains("10 0 R"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::RetryableInfra("copy failed".into()).is_retryable());
        assert!(Error::StateConflict(Conflict::ConcurrentUpdate("crl_number".into()))
            .is_retryable());
        assert!(!Error::StateConflict(Conflict::AlreadyRevoked).is_retryable());
        assert!(!Error::Integrity("docmdp".into()).is_retryable());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
