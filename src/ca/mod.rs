//! Certificate authority lifecycle.
//!
//! - [`identifier`]: the persisted `libresign-ca-id:` identifier
//! - [`layout`]: the single function mapping identifiers to PKI directories
//! - [`rotation`]: generation allocation through the persisted counter
//! - [`repair`]: crash-safe migration of legacy flat-directory material
//! - [`engine`]: the certificate issuing boundary and its RSA implementation
//! - [`authority`]: root installation and end-entity issuance

pub mod authority;
pub mod engine;
pub mod identifier;
pub mod layout;
pub mod repair;
pub mod rotation;

pub use authority::{CertificateAuthority, RootMaterial};
pub use engine::{
    CertificateEngine, EndEntityRequest, IssuedCertificate, RootCertificateOptions,
    RsaToolkitEngine,
};
pub use identifier::CaIdentifier;
pub use layout::{pki_directory, PkiDirectory, ROOT_CERT_FILE, ROOT_KEY_FILE};
pub use repair::{CaRepair, RepairPhase, RepairReport, REPAIR_PHASE_KEY};
pub use rotation::rotate;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// App config key holding the active CA identifier.
pub const CA_ID_CONFIG_KEY: &str = "ca_id";

/// App config key holding the PKI directory of the active identifier.
pub const CONFIG_PATH_KEY: &str = "config_path";

/// Backend that manages the CA material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaEngineKind {
    /// General-purpose crypto toolkit driven by OpenSSL-style configuration
    #[default]
    OpenSsl,
    /// Dedicated CA server
    Cfssl,
}

impl CaEngineKind {
    /// One-letter code used in identifiers.
    pub fn code(self) -> char {
        match self {
            CaEngineKind::OpenSsl => 'o',
            CaEngineKind::Cfssl => 'c',
        }
    }

    pub fn from_code(code: char) -> Result<Self> {
        match code {
            'o' => Ok(CaEngineKind::OpenSsl),
            'c' => Ok(CaEngineKind::Cfssl),
            other => Err(Error::Validation(format!("unknown CA engine code '{}'", other))),
        }
    }

    /// Directory name fragment.
    pub fn dir_name(self) -> &'static str {
        match self {
            CaEngineKind::OpenSsl => "openssl",
            CaEngineKind::Cfssl => "cfssl",
        }
    }
}

impl fmt::Display for CaEngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}
