//! Configuration for the signing core.
//!
//! All sections deserialize with defaults, so a host can supply only the
//! values it cares about:
//!
//! ```
//! use sign_oxide::config::SignOxideConfig;
//!
//! let config = SignOxideConfig::from_json(r#"{ "identify": { "max_attempts": 3 } }"#).unwrap();
//! assert_eq!(config.identify.max_attempts, 3);
//! assert_eq!(config.crl.validity_hours, 168);
//! ```

use crate::ca::CaEngineKind;
use crate::error::{Error, Result};
use crate::parser_config::ParserOptions;
use crate::signatures::DigestAlgorithm;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignOxideConfig {
    /// Revocation list settings
    pub crl: CrlConfig,
    /// Signer identification settings
    pub identify: IdentifyConfig,
    /// Certificate authority settings
    pub pki: PkiConfig,
    /// Signature defaults
    pub signing: SigningDefaults,
    /// PDF inspection limits
    pub parser: ParserOptions,
}

impl SignOxideConfig {
    /// Create configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<()> {
        if self.crl.validity_hours == 0 {
            return Err(Error::Validation("crl.validity_hours must be positive".into()));
        }
        if self.identify.max_attempts == 0 {
            return Err(Error::Validation("identify.max_attempts must be positive".into()));
        }
        if !(4..=12).contains(&self.identify.code_length) {
            return Err(Error::Validation("identify.code_length must be within 4..=12".into()));
        }
        if self.pki.key_bits < 1024 {
            return Err(Error::Validation("pki.key_bits must be at least 1024".into()));
        }
        Ok(())
    }

    /// Replace the CRL section.
    pub fn with_crl(mut self, crl: CrlConfig) -> Self {
        self.crl = crl;
        self
    }

    /// Replace the identification section.
    pub fn with_identify(mut self, identify: IdentifyConfig) -> Self {
        self.identify = identify;
        self
    }

    /// Replace the PKI section.
    pub fn with_pki(mut self, pki: PkiConfig) -> Self {
        self.pki = pki;
        self
    }

    /// Replace the parser limits.
    pub fn with_parser(mut self, parser: ParserOptions) -> Self {
        self.parser = parser;
        self
    }
}

/// Revocation list settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrlConfig {
    /// Hours between `thisUpdate` and `nextUpdate` of an emitted list
    pub validity_hours: u32,
}

impl Default for CrlConfig {
    fn default() -> Self {
        Self { validity_hours: 168 }
    }
}

/// One-time-code identification settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentifyConfig {
    /// Failed attempts tolerated before the code is locked
    pub max_attempts: u32,
    /// Seconds a code stays valid after issuance
    pub code_ttl_seconds: u64,
    /// Number of digits in a generated code
    pub code_length: usize,
}

impl Default for IdentifyConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            code_ttl_seconds: 600,
            code_length: 6,
        }
    }
}

impl IdentifyConfig {
    /// Set the attempt limit.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the code time-to-live.
    pub fn with_code_ttl_seconds(mut self, seconds: u64) -> Self {
        self.code_ttl_seconds = seconds;
        self
    }
}

/// Certificate authority settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PkiConfig {
    /// Installation instance identifier
    pub instance_id: String,
    /// Engine that manages the CA material
    pub engine: CaEngineKind,
    /// Application data directory holding PKI material
    pub root_path: PathBuf,
    /// RSA modulus size for generated keys
    pub key_bits: usize,
    /// Validity of a generated root certificate
    pub root_validity_days: u32,
    /// Validity of an end-entity certificate
    pub leaf_validity_days: u32,
}

impl Default for PkiConfig {
    fn default() -> Self {
        Self {
            instance_id: "signoxide".to_string(),
            engine: CaEngineKind::OpenSsl,
            root_path: PathBuf::from("appdata"),
            key_bits: 2048,
            root_validity_days: 3650,
            leaf_validity_days: 365,
        }
    }
}

impl PkiConfig {
    /// Set the instance identifier.
    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    /// Set the root path.
    pub fn with_root_path(mut self, root_path: impl Into<PathBuf>) -> Self {
        self.root_path = root_path.into();
        self
    }

    /// Set the RSA key size.
    pub fn with_key_bits(mut self, key_bits: usize) -> Self {
        self.key_bits = key_bits;
        self
    }
}

/// Defaults applied to every signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningDefaults {
    /// Digest algorithm for the signed byte ranges
    pub digest_algorithm: DigestAlgorithm,
    /// Bytes reserved for the DER-encoded CMS structure
    pub estimated_signature_size: usize,
    /// Default `/Reason` entry
    pub reason: Option<String>,
    /// Default `/Location` entry
    pub location: Option<String>,
}

impl Default for SigningDefaults {
    fn default() -> Self {
        Self {
            digest_algorithm: DigestAlgorithm::Sha256,
            estimated_signature_size: 8192,
            reason: None,
            location: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SignOxideConfig::new();
        assert_eq!(config.crl.validity_hours, 168);
        assert_eq!(config.identify.max_attempts, 5);
        assert_eq!(config.identify.code_ttl_seconds, 600);
        assert_eq!(config.pki.engine, CaEngineKind::OpenSsl);
        assert_eq!(config.signing.digest_algorithm, DigestAlgorithm::Sha256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let json = r#"{
            "crl": { "validity_hours": 24 },
            "pki": { "instance_id": "oc123abc", "engine": "cfssl" }
        }"#;
        let config = SignOxideConfig::from_json(json).unwrap();
        assert_eq!(config.crl.validity_hours, 24);
        assert_eq!(config.pki.instance_id, "oc123abc");
        assert_eq!(config.pki.engine, CaEngineKind::Cfssl);
        assert_eq!(config.pki.key_bits, 2048);
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let config = SignOxideConfig::new()
            .with_identify(IdentifyConfig::default().with_max_attempts(0));
        assert!(matches!(config.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(SignOxideConfig::from_json("{ nope"), Err(Error::Json(_))));
    }

    #[test]
    fn test_builders() {
        let pki = PkiConfig::default()
            .with_instance_id("abc")
            .with_root_path("/tmp/x")
            .with_key_bits(1024);
        assert_eq!(pki.instance_id, "abc");
        assert_eq!(pki.root_path, PathBuf::from("/tmp/x"));
        assert_eq!(pki.key_bits, 1024);
    }
}
