//! Certificate issuing boundary.
//!
//! [`CertificateEngine`] is the only contract the rest of the crate depends
//! on. [`RsaToolkitEngine`] implements it in-process with `rsa` and the
//! `x509-cert` builder; a CA-server backend plugs in behind the same trait.

use super::CaEngineKind;
use crate::crl::entry::serial_to_der_bytes;
use crate::error::{Error, Result};
use crate::signatures::SigningCredentials;
use chrono::{DateTime, TimeZone, Utc};
use const_oid::db::rfc4519::{COMMON_NAME, COUNTRY_NAME, ORGANIZATION_NAME};
use const_oid::ObjectIdentifier;
use der::asn1::{Any, SetOfVec};
use der::{Decode, Encode, Tag};
use pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rand::rngs::OsRng;
use rsa::pkcs1v15::SigningKey;
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use std::time::Duration;
use x509_cert::attr::AttributeTypeAndValue;
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::name::{Name, RdnSequence, RelativeDistinguishedName};
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::time::Validity;
use x509_cert::Certificate;

/// Subject and lifetime of a root certificate.
#[derive(Debug, Clone)]
pub struct RootCertificateOptions {
    pub common_name: String,
    pub organization: Option<String>,
    /// Two-letter country code
    pub country: Option<String>,
    pub validity_days: u32,
    pub serial_number: u64,
}

impl RootCertificateOptions {
    pub fn new(common_name: impl Into<String>, validity_days: u32) -> Self {
        Self {
            common_name: common_name.into(),
            organization: None,
            country: None,
            validity_days,
            serial_number: 1,
        }
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }
}

/// Request for a signer certificate issued by a root.
#[derive(Clone)]
pub struct EndEntityRequest {
    pub common_name: String,
    pub organization: Option<String>,
    pub validity_days: u32,
    pub serial_number: u64,
    /// DER certificate of the issuer
    pub issuer_certificate: Vec<u8>,
    /// PKCS#8 DER key of the issuer
    pub issuer_private_key: Vec<u8>,
}

impl std::fmt::Debug for EndEntityRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndEntityRequest")
            .field("common_name", &self.common_name)
            .field("organization", &self.organization)
            .field("validity_days", &self.validity_days)
            .field("serial_number", &self.serial_number)
            .field("issuer_private_key", &"[REDACTED]")
            .finish()
    }
}

/// A certificate together with its freshly generated key.
#[derive(Clone)]
pub struct IssuedCertificate {
    /// DER X.509 certificate
    pub certificate: Vec<u8>,
    /// PKCS#8 DER private key
    pub private_key: Vec<u8>,
    pub serial_number: u64,
    pub not_after: DateTime<Utc>,
}

impl IssuedCertificate {
    pub fn certificate_pem(&self) -> Result<String> {
        to_pem("CERTIFICATE", &self.certificate)
    }

    pub fn private_key_pem(&self) -> Result<String> {
        to_pem("PRIVATE KEY", &self.private_key)
    }

    /// Signing credentials with `chain` as the issuing certificates.
    pub fn to_credentials(&self, chain: Vec<Vec<u8>>) -> SigningCredentials {
        SigningCredentials::new(self.certificate.clone(), self.private_key.clone())
            .with_chain(chain)
    }
}

impl std::fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("certificate", &format!("{} bytes", self.certificate.len()))
            .field("private_key", &"[REDACTED]")
            .field("serial_number", &self.serial_number)
            .field("not_after", &self.not_after)
            .finish()
    }
}

/// Certificate issuing and low-level signing.
pub trait CertificateEngine: Send + Sync {
    /// Backend kind, recorded in the CA identifier.
    fn kind(&self) -> CaEngineKind;

    /// Issue a self-signed root certificate.
    fn issue_root_certificate(&self, options: &RootCertificateOptions) -> Result<IssuedCertificate>;

    /// Issue a signer certificate under the issuer in `request`.
    fn issue_end_entity_certificate(&self, request: &EndEntityRequest) -> Result<IssuedCertificate>;

    /// PKCS#1 v1.5 signature over a precomputed digest.
    fn sign(&self, digest: &[u8], private_key: &[u8]) -> Result<Vec<u8>>;
}

/// In-process RSA engine.
#[derive(Debug, Clone)]
pub struct RsaToolkitEngine {
    key_bits: usize,
}

impl Default for RsaToolkitEngine {
    fn default() -> Self {
        Self::new(2048)
    }
}

impl RsaToolkitEngine {
    pub fn new(key_bits: usize) -> Self {
        Self { key_bits }
    }

    pub fn key_bits(&self) -> usize {
        self.key_bits
    }

    fn generate_key(&self) -> Result<RsaPrivateKey> {
        log::debug!("Generating {}-bit RSA key", self.key_bits);
        RsaPrivateKey::new(&mut OsRng, self.key_bits)
            .map_err(|e| Error::Crypto(format!("key generation failed: {}", e)))
    }

    fn build(
        &self,
        profile: Profile,
        serial_number: u64,
        validity_days: u32,
        subject: Name,
        subject_key: &RsaPrivateKey,
        issuer_key: RsaPrivateKey,
    ) -> Result<IssuedCertificate> {
        if validity_days == 0 {
            return Err(Error::Validation(
                "certificate validity must be at least one day".to_string(),
            ));
        }
        let crypto = |e: &dyn std::fmt::Display| Error::Crypto(e.to_string());
        let serial =
            SerialNumber::new(&serial_to_der_bytes(serial_number)).map_err(|e| crypto(&e))?;
        let validity = Validity::from_now(Duration::from_secs(u64::from(validity_days) * 86_400))
            .map_err(|e| crypto(&e))?;
        let public_key = RsaPublicKey::from(subject_key);
        let spki = SubjectPublicKeyInfoOwned::from_key(public_key).map_err(|e| crypto(&e))?;

        let signer = SigningKey::<sha2::Sha256>::new(issuer_key);
        let builder = CertificateBuilder::new(profile, serial, validity, subject, spki, &signer)
            .map_err(|e| crypto(&e))?;
        let certificate = builder
            .build::<rsa::pkcs1v15::Signature>()
            .map_err(|e| crypto(&e))?;

        let not_after = certificate.tbs_certificate.validity.not_after.to_unix_duration();
        let not_after = Utc
            .timestamp_opt(not_after.as_secs() as i64, 0)
            .single()
            .ok_or_else(|| Error::Crypto("certificate expiry out of range".to_string()))?;
        let private_key = subject_key
            .to_pkcs8_der()
            .map_err(|e| crypto(&e))?
            .as_bytes()
            .to_vec();

        Ok(IssuedCertificate {
            certificate: certificate.to_der().map_err(|e| crypto(&e))?,
            private_key,
            serial_number,
            not_after,
        })
    }
}

impl CertificateEngine for RsaToolkitEngine {
    fn kind(&self) -> CaEngineKind {
        CaEngineKind::OpenSsl
    }

    fn issue_root_certificate(
        &self,
        options: &RootCertificateOptions,
    ) -> Result<IssuedCertificate> {
        let subject = distinguished_name(
            &options.common_name,
            options.organization.as_deref(),
            options.country.as_deref(),
        )?;
        let key = self.generate_key()?;
        let issued = self.build(
            Profile::Root,
            options.serial_number,
            options.validity_days,
            subject,
            &key,
            key.clone(),
        )?;
        log::info!("Issued root certificate for {}", options.common_name);
        Ok(issued)
    }

    fn issue_end_entity_certificate(
        &self,
        request: &EndEntityRequest,
    ) -> Result<IssuedCertificate> {
        let issuer = Certificate::from_der(&request.issuer_certificate)
            .map_err(|e| Error::Crypto(format!("invalid issuer certificate: {}", e)))?;
        let issuer_key = RsaPrivateKey::from_pkcs8_der(&request.issuer_private_key)
            .map_err(|e| Error::Crypto(format!("invalid issuer key: {}", e)))?;
        let subject =
            distinguished_name(&request.common_name, request.organization.as_deref(), None)?;
        let key = self.generate_key()?;
        let profile = Profile::Leaf {
            issuer: issuer.tbs_certificate.subject.clone(),
            enable_key_agreement: false,
            enable_key_encipherment: false,
        };
        let issued = self.build(
            profile,
            request.serial_number,
            request.validity_days,
            subject,
            &key,
            issuer_key,
        )?;
        log::info!(
            "Issued end-entity certificate {} for {}",
            request.serial_number,
            request.common_name
        );
        Ok(issued)
    }

    fn sign(&self, digest: &[u8], private_key: &[u8]) -> Result<Vec<u8>> {
        let key = RsaPrivateKey::from_pkcs8_der(private_key)
            .map_err(|e| Error::Crypto(format!("invalid private key: {}", e)))?;
        let scheme = match digest.len() {
            32 => Pkcs1v15Sign::new::<sha2::Sha256>(),
            48 => Pkcs1v15Sign::new::<sha2::Sha384>(),
            64 => Pkcs1v15Sign::new::<sha2::Sha512>(),
            other => {
                return Err(Error::Validation(format!(
                    "unsupported digest length {} (expected SHA-256/384/512)",
                    other
                )))
            },
        };
        key.sign(scheme, digest)
            .map_err(|e| Error::Crypto(format!("signing failed: {}", e)))
    }
}

fn distinguished_name(
    common_name: &str,
    organization: Option<&str>,
    country: Option<&str>,
) -> Result<Name> {
    if common_name.trim().is_empty() {
        return Err(Error::Validation("certificate common name is empty".to_string()));
    }
    let mut rdns = Vec::new();
    if let Some(country) = country {
        if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(Error::Validation(format!(
                "country must be a two-letter code, got {:?}",
                country
            )));
        }
        rdns.push(rdn(COUNTRY_NAME, Tag::PrintableString, country)?);
    }
    if let Some(organization) = organization {
        rdns.push(rdn(ORGANIZATION_NAME, Tag::Utf8String, organization)?);
    }
    rdns.push(rdn(COMMON_NAME, Tag::Utf8String, common_name)?);
    Ok(RdnSequence(rdns))
}

fn rdn(oid: ObjectIdentifier, tag: Tag, value: &str) -> Result<RelativeDistinguishedName> {
    let crypto = |e: der::Error| Error::Crypto(e.to_string());
    let atv = AttributeTypeAndValue {
        oid,
        value: Any::new(tag, value.as_bytes().to_vec()).map_err(crypto)?,
    };
    Ok(RelativeDistinguishedName(SetOfVec::try_from(vec![atv]).map_err(crypto)?))
}

fn to_pem(label: &'static str, der: &[u8]) -> Result<String> {
    der::pem::encode_string(label, der::pem::LineEnding::LF, der)
        .map_err(|e| Error::Crypto(format!("PEM encoding failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signatures::describe_certificate;
    use rsa::pkcs8::DecodePublicKey;

    fn engine() -> RsaToolkitEngine {
        RsaToolkitEngine::new(1024)
    }

    #[test]
    fn test_root_certificate_is_self_signed_ca() {
        let root = engine()
            .issue_root_certificate(
                &RootCertificateOptions::new("Test Root", 30).with_country("PT"),
            )
            .unwrap();
        let details = describe_certificate(&root.certificate, None).unwrap();
        assert!(details.is_ca);
        assert_eq!(details.subject, details.issuer);
        assert_eq!(details.common_name.as_deref(), Some("Test Root"));
        assert_eq!(details.serial, Some(1));
        assert!(root.certificate_pem().unwrap().starts_with("-----BEGIN CERTIFICATE-----"));
    }

    #[test]
    fn test_end_entity_is_issued_by_root() {
        let engine = engine();
        let root = engine
            .issue_root_certificate(&RootCertificateOptions::new("Test Root", 30))
            .unwrap();
        let leaf = engine
            .issue_end_entity_certificate(&EndEntityRequest {
                common_name: "Alice".to_string(),
                organization: Some("Example".to_string()),
                validity_days: 10,
                serial_number: 0x8000_0001,
                issuer_certificate: root.certificate.clone(),
                issuer_private_key: root.private_key.clone(),
            })
            .unwrap();
        let details = describe_certificate(&leaf.certificate, None).unwrap();
        assert!(!details.is_ca);
        assert_eq!(details.issuer, describe_certificate(&root.certificate, None).unwrap().subject);
        assert_eq!(details.serial, Some(0x8000_0001));
        assert!(leaf.not_after > Utc::now());
    }

    #[test]
    fn test_sign_digest_verifies() {
        use sha2::Digest;
        let engine = engine();
        let root = engine
            .issue_root_certificate(&RootCertificateOptions::new("Signer", 1))
            .unwrap();
        let digest = sha2::Sha256::digest(b"payload");
        let signature = engine.sign(&digest, &root.private_key).unwrap();

        let cert = Certificate::from_der(&root.certificate).unwrap();
        let spki_der = cert.tbs_certificate.subject_public_key_info.to_der().unwrap();
        let public = RsaPublicKey::from_public_key_der(&spki_der).unwrap();
        public
            .verify(Pkcs1v15Sign::new::<sha2::Sha256>(), &digest, &signature)
            .unwrap();

        assert!(matches!(engine.sign(&[0u8; 20], &root.private_key), Err(Error::Validation(_))));
    }

    #[test]
    fn test_rejects_bad_subject() {
        let engine = engine();
        assert!(engine
            .issue_root_certificate(&RootCertificateOptions::new("  ", 30))
            .is_err());
        assert!(engine
            .issue_root_certificate(&RootCertificateOptions::new("Root", 30).with_country("PRT"))
            .is_err());
    }
}
