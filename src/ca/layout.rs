//! PKI directory resolution.
//!
//! [`pki_directory`] is the only place that knows where CA material lives;
//! callers never build these paths themselves.

use super::{CaEngineKind, CaIdentifier};
use std::path::{Path, PathBuf};

/// Root certificate file name.
pub const ROOT_CERT_FILE: &str = "ca.pem";

/// Root private key file name.
pub const ROOT_KEY_FILE: &str = "ca-key.pem";

/// Where a set of CA material lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PkiDirectory {
    /// Versioned directory of one identifier generation
    Generation(CaIdentifier),
    /// Flat pre-versioning directory of an engine
    Legacy(CaEngineKind),
}

/// Resolve a PKI directory under the application root.
///
/// - `Generation(id)` -> `{root}/pki/{instanceId}_{generation}_{engine}`
/// - `Legacy(engine)` -> `{root}/{engine}_config`
pub fn pki_directory(root: &Path, dir: &PkiDirectory) -> PathBuf {
    match dir {
        PkiDirectory::Generation(id) => root.join("pki").join(format!(
            "{}_{}_{}",
            id.instance_id(),
            id.generation(),
            id.engine().dir_name()
        )),
        PkiDirectory::Legacy(engine) => root.join(format!("{}_config", engine.dir_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_directory() {
        let id = CaIdentifier::new("abc123", 2, CaEngineKind::OpenSsl).unwrap();
        assert_eq!(
            pki_directory(Path::new("/data"), &PkiDirectory::Generation(id)),
            PathBuf::from("/data/pki/abc123_2_openssl")
        );
    }

    #[test]
    fn test_legacy_directory() {
        assert_eq!(
            pki_directory(Path::new("/data"), &PkiDirectory::Legacy(CaEngineKind::Cfssl)),
            PathBuf::from("/data/cfssl_config")
        );
    }
}
