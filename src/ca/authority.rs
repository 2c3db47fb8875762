//! Root installation and end-entity issuance.

use super::engine::{CertificateEngine, EndEntityRequest, IssuedCertificate, RootCertificateOptions};
use super::layout::{pki_directory, PkiDirectory, ROOT_CERT_FILE, ROOT_KEY_FILE};
use super::rotation::rotate;
use super::{CaIdentifier, CA_ID_CONFIG_KEY, CONFIG_PATH_KEY};
use crate::config::{CrlConfig, PkiConfig};
use crate::crl::CrlManager;
use crate::error::{Conflict, Error, Result};
use crate::signatures::{pem_blocks, SigningCredentials};
use crate::store::{AppConfigStore, Counter, CrlRepository};
use rand::Rng;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

/// Attempts at drawing an unused random serial.
const SERIAL_ATTEMPTS: usize = 5;

/// Root certificate and key of the active generation, DER-encoded.
#[derive(Clone)]
pub struct RootMaterial {
    pub identifier: CaIdentifier,
    pub certificate: Vec<u8>,
    pub private_key: Vec<u8>,
}

/// A certificate engine bound to the persisted CA state and the CRL.
pub struct CertificateAuthority<S, E> {
    store: Arc<S>,
    engine: E,
    config: PkiConfig,
    crl: CrlManager<S>,
}

impl<S, E> CertificateAuthority<S, E>
where
    S: AppConfigStore + Counter + CrlRepository,
    E: CertificateEngine,
{
    pub fn new(store: Arc<S>, engine: E, config: PkiConfig, crl_config: CrlConfig) -> Self {
        let crl = CrlManager::new(Arc::clone(&store), crl_config);
        Self {
            store,
            engine,
            config,
            crl,
        }
    }

    pub fn crl(&self) -> &CrlManager<S> {
        &self.crl
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// The persisted active identifier, if any.
    pub fn active_identifier(&self) -> Result<Option<CaIdentifier>> {
        self.store
            .get(CA_ID_CONFIG_KEY)?
            .map(|encoded| CaIdentifier::decode(&encoded))
            .transpose()
    }

    /// Issue a root certificate without persisting anything.
    pub fn issue_root(&self, options: &RootCertificateOptions) -> Result<IssuedCertificate> {
        self.engine.issue_root_certificate(options)
    }

    /// Rotate to a new generation, write a fresh root into its PKI
    /// directory and make it active. Earlier generations stay on disk.
    pub fn install_root(&self, common_name: &str) -> Result<CaIdentifier> {
        let (identifier, directory) = rotate(
            self.store.as_ref(),
            &self.config.root_path,
            &self.config.instance_id,
            self.engine.kind(),
        )?;
        let options = RootCertificateOptions::new(common_name, self.config.root_validity_days);
        let root = self.issue_root(&options)?;

        fs::create_dir_all(&directory)?;
        fs::write(directory.join(ROOT_CERT_FILE), root.certificate_pem()?)?;
        fs::write(directory.join(ROOT_KEY_FILE), root.private_key_pem()?)?;

        self.store.set(CA_ID_CONFIG_KEY, &identifier.encode())?;
        self.store.set(CONFIG_PATH_KEY, &directory.to_string_lossy())?;
        log::info!("Installed root for {} in {}", identifier, directory.display());
        Ok(identifier)
    }

    /// Directory holding the active generation's material.
    pub fn active_directory(&self) -> Result<PathBuf> {
        let identifier = self
            .active_identifier()?
            .ok_or_else(|| Error::not_found("CA identifier", CA_ID_CONFIG_KEY))?;
        Ok(pki_directory(&self.config.root_path, &PkiDirectory::Generation(identifier)))
    }

    /// Load the active root certificate and key.
    pub fn load_root(&self) -> Result<RootMaterial> {
        let identifier = self
            .active_identifier()?
            .ok_or_else(|| Error::not_found("CA identifier", CA_ID_CONFIG_KEY))?;
        let generation = PkiDirectory::Generation(identifier.clone());
        let directory = pki_directory(&self.config.root_path, &generation);
        let read = |name: &str, label: &str| -> Result<Vec<u8>> {
            let path = directory.join(name);
            let pem = fs::read_to_string(&path).map_err(|e| {
                Error::RetryableInfra(format!("cannot read {}: {}", path.display(), e))
            })?;
            pem_blocks(&pem, label)?
                .into_iter()
                .next()
                .ok_or_else(|| {
                    Error::Validation(format!("no {} block in {}", label, path.display()))
                })
        };
        Ok(RootMaterial {
            certificate: read(ROOT_CERT_FILE, "CERTIFICATE")?,
            private_key: read(ROOT_KEY_FILE, "PRIVATE KEY")?,
            identifier,
        })
    }

    /// Issue a signer certificate under the active root and register its
    /// serial with the CRL.
    pub fn issue_end_entity(&self, common_name: &str, owner: &str) -> Result<IssuedCertificate> {
        let root = self.load_root()?;
        let mut rng = rand::thread_rng();
        for _ in 0..SERIAL_ATTEMPTS {
            let serial_number = rng.gen_range(2..=i64::MAX as u64);
            let request = EndEntityRequest {
                common_name: common_name.to_string(),
                organization: None,
                validity_days: self.config.leaf_validity_days,
                serial_number,
                issuer_certificate: root.certificate.clone(),
                issuer_private_key: root.private_key.clone(),
            };
            let issued = self.engine.issue_end_entity_certificate(&request)?;
            match self.crl.issue(serial_number, owner, issued.not_after) {
                Ok(_) => return Ok(issued),
                Err(Error::StateConflict(Conflict::Duplicate(_))) => {
                    log::warn!("Serial {} already registered, drawing another", serial_number);
                },
                Err(e) => return Err(e),
            }
        }
        Err(Error::StateConflict(Conflict::Duplicate(
            "no unused certificate serial found".to_string(),
        )))
    }

    /// Signing credentials for `issued`, chained to the active root.
    pub fn credentials_for(&self, issued: &IssuedCertificate) -> Result<SigningCredentials> {
        let root = self.load_root()?;
        Ok(issued.to_credentials(vec![root.certificate]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::RsaToolkitEngine;
    use crate::crl::CrlStatus;
    use crate::store::InMemoryStore;

    fn authority(root: &std::path::Path) -> CertificateAuthority<InMemoryStore, RsaToolkitEngine> {
        let config = PkiConfig::default()
            .with_instance_id("test1")
            .with_root_path(root)
            .with_key_bits(1024);
        CertificateAuthority::new(
            Arc::new(InMemoryStore::new()),
            RsaToolkitEngine::new(1024),
            config,
            CrlConfig::default(),
        )
    }

    #[test]
    fn test_load_root_without_install() {
        let dir = tempfile::tempdir().unwrap();
        let ca = authority(dir.path());
        assert!(matches!(ca.load_root(), Err(Error::NotFound { .. })));
        assert_eq!(ca.active_identifier().unwrap(), None);
    }

    #[test]
    fn test_install_and_issue() {
        let dir = tempfile::tempdir().unwrap();
        let ca = authority(dir.path());
        let id = ca.install_root("Test Root").unwrap();
        assert_eq!(id.generation(), 1);
        assert!(dir.path().join("pki/test1_1_openssl").join(ROOT_CERT_FILE).exists());

        let issued = ca.issue_end_entity("Alice", "alice").unwrap();
        assert_eq!(ca.crl().status(issued.serial_number).unwrap(), CrlStatus::Issued);
        let creds = ca.credentials_for(&issued).unwrap();
        assert_eq!(creds.chain.len(), 1);
    }

    #[test]
    fn test_reinstall_keeps_previous_generation() {
        let dir = tempfile::tempdir().unwrap();
        let ca = authority(dir.path());
        ca.install_root("Root A").unwrap();
        let second = ca.install_root("Root B").unwrap();
        assert_eq!(second.generation(), 2);
        assert_eq!(ca.active_identifier().unwrap(), Some(second));
        assert!(dir.path().join("pki/test1_1_openssl").join(ROOT_KEY_FILE).exists());
    }
}
