//! Digital signature types and data structures.

use crate::config::SigningDefaults;
use crate::docmdp::DocMdpLevel;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use const_oid::ObjectIdentifier;
use der::{Decode, Encode};
use pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use sha2::Digest;
use spki::EncodePublicKey;
use x509_cert::Certificate;

/// Digest algorithm used for signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// SHA-1 (verification of legacy signatures only)
    Sha1,
    /// SHA-256
    #[default]
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
}

impl DigestAlgorithm {
    /// Algorithm OID.
    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            DigestAlgorithm::Sha1 => const_oid::db::rfc5912::ID_SHA_1,
            DigestAlgorithm::Sha256 => const_oid::db::rfc5912::ID_SHA_256,
            DigestAlgorithm::Sha384 => const_oid::db::rfc5912::ID_SHA_384,
            DigestAlgorithm::Sha512 => const_oid::db::rfc5912::ID_SHA_512,
        }
    }

    /// Look up an algorithm by OID.
    pub fn from_oid(oid: &ObjectIdentifier) -> Option<Self> {
        [Self::Sha1, Self::Sha256, Self::Sha384, Self::Sha512]
            .into_iter()
            .find(|alg| alg.oid() == *oid)
    }

    /// Display name.
    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "SHA-1",
            DigestAlgorithm::Sha256 => "SHA-256",
            DigestAlgorithm::Sha384 => "SHA-384",
            DigestAlgorithm::Sha512 => "SHA-512",
        }
    }

    /// Hash `data`.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            DigestAlgorithm::Sha1 => sha1::Sha1::digest(data).to_vec(),
            DigestAlgorithm::Sha256 => sha2::Sha256::digest(data).to_vec(),
            DigestAlgorithm::Sha384 => sha2::Sha384::digest(data).to_vec(),
            DigestAlgorithm::Sha512 => sha2::Sha512::digest(data).to_vec(),
        }
    }
}

/// Lowercase hex SHA-256 of `data`, the format of `Document::signed_hash`.
pub fn sha256_hex(data: &[u8]) -> String {
    DigestAlgorithm::Sha256
        .digest(data)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Signature sub-filter (signature format).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureSubFilter {
    /// adbe.pkcs7.detached
    #[default]
    Pkcs7Detached,
    /// ETSI.CAdES.detached
    CadesDetached,
}

impl SignatureSubFilter {
    /// PDF name for this sub-filter.
    pub fn as_pdf_name(&self) -> &'static str {
        match self {
            SignatureSubFilter::Pkcs7Detached => "adbe.pkcs7.detached",
            SignatureSubFilter::CadesDetached => "ETSI.CAdES.detached",
        }
    }

    /// Parse a PDF name.
    pub fn from_pdf_name(name: &str) -> Option<Self> {
        match name {
            "adbe.pkcs7.detached" => Some(SignatureSubFilter::Pkcs7Detached),
            "ETSI.CAdES.detached" => Some(SignatureSubFilter::CadesDetached),
            _ => None,
        }
    }
}

/// Signing credentials: certificate, private key and issuing chain.
#[derive(Clone)]
pub struct SigningCredentials {
    /// DER-encoded X.509 certificate
    pub certificate: Vec<u8>,
    /// DER-encoded PKCS#8 private key
    pub private_key: Vec<u8>,
    /// Issuing certificates, DER-encoded, nearest first
    pub chain: Vec<Vec<u8>>,
}

impl SigningCredentials {
    /// Create credentials from DER parts.
    pub fn new(certificate: Vec<u8>, private_key: Vec<u8>) -> Self {
        Self {
            certificate,
            private_key,
            chain: Vec::new(),
        }
    }

    /// Attach the issuing chain.
    pub fn with_chain(mut self, chain: Vec<Vec<u8>>) -> Self {
        self.chain = chain;
        self
    }

    /// Load credentials from PEM.
    ///
    /// `cert_pem` may hold several `CERTIFICATE` blocks; the first is the
    /// signer, the rest become the chain. `key_pem` must be a PKCS#8
    /// `PRIVATE KEY` block.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        let mut certs = pem_blocks(cert_pem, "CERTIFICATE")?;
        if certs.is_empty() {
            return Err(Error::Validation("no CERTIFICATE block in PEM input".to_string()));
        }
        let certificate = certs.remove(0);
        let key = pem_blocks(key_pem, "PRIVATE KEY")?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Validation("no PRIVATE KEY block in PEM input".to_string()))?;
        Ok(Self::new(certificate, key).with_chain(certs))
    }

    /// Load credentials from a PKCS#12 (.p12/.pfx) bundle.
    ///
    /// The certificate whose public key matches the bundled private key is
    /// the signer; any other certificates become the chain.
    pub fn from_pkcs12(data: &[u8], password: &str) -> Result<Self> {
        let pfx = p12::PFX::parse(data)
            .map_err(|e| Error::Validation(format!("invalid PKCS#12 bundle: {:?}", e)))?;
        if !pfx.verify_mac(password) {
            return Err(Error::Validation("wrong PKCS#12 password".to_string()));
        }
        let private_key = pfx
            .key_bags(password)
            .map_err(|e| Error::Crypto(format!("cannot decrypt PKCS#12 key: {:?}", e)))?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Validation("PKCS#12 bundle holds no private key".to_string()))?;
        let mut certs = pfx
            .cert_x509_bags(password)
            .map_err(|e| Error::Crypto(format!("cannot decrypt PKCS#12 certificates: {:?}", e)))?;

        let public_key = RsaPrivateKey::from_pkcs8_der(&private_key)
            .map_err(|e| Error::Crypto(format!("invalid private key: {}", e)))?
            .to_public_key()
            .to_public_key_der()
            .map_err(|e| Error::Crypto(format!("cannot encode public key: {}", e)))?;
        let signer = certs
            .iter()
            .position(|der| subject_public_key(der).as_deref() == Some(public_key.as_bytes()))
            .ok_or_else(|| {
                Error::Validation("no PKCS#12 certificate matches the bundled key".to_string())
            })?;
        let certificate = certs.remove(signer);
        log::debug!("Loaded PKCS#12 credentials with {} chain certificate(s)", certs.len());
        Ok(Self::new(certificate, private_key).with_chain(certs))
    }
}

fn subject_public_key(certificate: &[u8]) -> Option<Vec<u8>> {
    let cert = Certificate::from_der(certificate).ok()?;
    cert.tbs_certificate.subject_public_key_info.to_der().ok()
}

/// Decode every PEM block labelled `label`.
pub(crate) fn pem_blocks(pem: &str, label: &str) -> Result<Vec<Vec<u8>>> {
    let begin = format!("-----BEGIN {}-----", label);
    let end = format!("-----END {}-----", label);
    let mut out = Vec::new();
    let mut rest = pem;
    while let Some(start) = rest.find(&begin) {
        let stop = rest[start..]
            .find(&end)
            .map(|p| start + p + end.len())
            .ok_or_else(|| Error::Validation(format!("unterminated {} block", label)))?;
        let (found, der) = der::pem::decode_vec(rest[start..stop].as_bytes())
            .map_err(|e| Error::Validation(format!("invalid PEM: {}", e)))?;
        if found == label {
            out.push(der);
        }
        rest = &rest[stop..];
    }
    Ok(out)
}

impl std::fmt::Debug for SigningCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningCredentials")
            .field("certificate", &format!("{} bytes", self.certificate.len()))
            .field("private_key", &"[REDACTED]")
            .field("chain", &format!("{} certificates", self.chain.len()))
            .finish()
    }
}

/// Options for signing a PDF.
#[derive(Debug, Clone)]
pub struct SignOptions {
    /// Digest algorithm
    pub digest_algorithm: DigestAlgorithm,
    /// Signature format
    pub sub_filter: SignatureSubFilter,
    /// Reason for signing
    pub reason: Option<String>,
    /// Signing location
    pub location: Option<String>,
    /// Contact information
    pub contact_info: Option<String>,
    /// Signer name written to `/Name`
    pub name: Option<String>,
    /// Signature field name; generated when absent
    pub field_name: Option<String>,
    /// Certify the document with this DocMDP level
    pub certify: Option<DocMdpLevel>,
    /// Signing time; now when absent
    pub signing_time: Option<DateTime<Utc>>,
    /// Bytes reserved for the DER-encoded CMS structure
    pub estimated_size: usize,
}

impl Default for SignOptions {
    fn default() -> Self {
        Self::from_defaults(&SigningDefaults::default())
    }
}

impl SignOptions {
    /// Options seeded from configuration.
    pub fn from_defaults(defaults: &SigningDefaults) -> Self {
        Self {
            digest_algorithm: defaults.digest_algorithm,
            sub_filter: SignatureSubFilter::Pkcs7Detached,
            reason: defaults.reason.clone(),
            location: defaults.location.clone(),
            contact_info: None,
            name: None,
            field_name: None,
            certify: None,
            signing_time: None,
            estimated_size: defaults.estimated_signature_size,
        }
    }

    /// Set the reason for signing.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Set the signing location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Set the signer name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Certify the document. Level 0 means no certification.
    pub fn with_certification(mut self, level: DocMdpLevel) -> Self {
        self.certify = (level != DocMdpLevel::None).then_some(level);
        self
    }
}

/// Metadata read from a signature dictionary.
#[derive(Debug, Clone, Default)]
pub struct SignatureInfo {
    /// `/Name`
    pub signer_name: Option<String>,
    /// `/M`
    pub signing_time: Option<String>,
    /// `/Reason`
    pub reason: Option<String>,
    /// `/Location`
    pub location: Option<String>,
    /// `/ContactInfo`
    pub contact_info: Option<String>,
    /// `/SubFilter`
    pub sub_filter: Option<SignatureSubFilter>,
    /// `/ByteRange`
    pub byte_range: Option<[i64; 4]>,
}

/// One certificate of a signature's chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateDetails {
    /// Subject distinguished name
    pub subject: String,
    /// Subject common name
    pub common_name: Option<String>,
    /// Issuer distinguished name
    pub issuer: String,
    /// Serial number, uppercase hex
    pub serial_hex: String,
    /// Serial as an integer when it fits in 64 bits
    pub serial: Option<u64>,
    /// Start of validity
    pub valid_from: DateTime<Utc>,
    /// End of validity
    pub valid_to: DateTime<Utc>,
    /// Basic constraints CA flag
    pub is_ca: bool,
    /// Whether the revocation list marks this serial revoked
    pub revoked: bool,
}

/// Verification status of a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    /// Digest and signature check out, no certificate revoked or expired
    Valid,
    /// Digest or signature mismatch, or unreadable CMS
    Invalid,
    /// Cryptographically valid but a certificate is revoked or expired
    ValidWithWarnings,
}

impl VerificationStatus {
    /// Valid without warnings.
    pub fn is_valid(&self) -> bool {
        matches!(self, VerificationStatus::Valid)
    }

    /// Valid, possibly with warnings.
    pub fn is_ok(&self) -> bool {
        matches!(self, VerificationStatus::Valid | VerificationStatus::ValidWithWarnings)
    }
}

/// Audit view of one embedded signature.
#[derive(Debug, Clone)]
pub struct SignatureReport {
    /// Fully qualified field name
    pub field_name: String,
    /// Signature dictionary metadata
    pub info: SignatureInfo,
    /// Digest algorithm of the signer
    pub digest_algorithm: Option<DigestAlgorithm>,
    /// Signer certificate first, then its issuers
    pub chain: Vec<CertificateDetails>,
    /// Whether the signature covers the whole file
    pub covers_whole_document: bool,
    /// Overall status
    pub status: VerificationStatus,
    /// Problems found
    pub messages: Vec<String>,
}

impl SignatureReport {
    /// The signer certificate.
    pub fn signer(&self) -> Option<&CertificateDetails> {
        self.chain.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_algorithm_names_and_oids() {
        assert_eq!(DigestAlgorithm::Sha256.name(), "SHA-256");
        let oid = DigestAlgorithm::Sha384.oid();
        assert_eq!(DigestAlgorithm::from_oid(&oid), Some(DigestAlgorithm::Sha384));
        assert_eq!(DigestAlgorithm::Sha512.digest(b"x").len(), 64);
    }

    #[test]
    fn test_digest_algorithm_serde() {
        let json = serde_json::to_string(&DigestAlgorithm::Sha256).unwrap();
        assert_eq!(json, "\"sha256\"");
        let alg: DigestAlgorithm = serde_json::from_str("\"sha512\"").unwrap();
        assert_eq!(alg, DigestAlgorithm::Sha512);
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_sub_filter_names() {
        assert_eq!(SignatureSubFilter::Pkcs7Detached.as_pdf_name(), "adbe.pkcs7.detached");
        assert_eq!(
            SignatureSubFilter::from_pdf_name("ETSI.CAdES.detached"),
            Some(SignatureSubFilter::CadesDetached)
        );
        assert_eq!(SignatureSubFilter::from_pdf_name("adbe.x509.rsa_sha1"), None);
    }

    #[test]
    fn test_sign_options_builder() {
        let opts = SignOptions::default()
            .with_reason("Approval")
            .with_location("Lisbon")
            .with_certification(DocMdpLevel::FormFill);
        assert_eq!(opts.reason.as_deref(), Some("Approval"));
        assert_eq!(opts.certify, Some(DocMdpLevel::FormFill));
        assert_eq!(opts.estimated_size, 8192);

        let uncertified = SignOptions::default().with_certification(DocMdpLevel::None);
        assert_eq!(uncertified.certify, None);
    }

    #[test]
    fn test_signing_credentials_debug() {
        let creds = SigningCredentials::new(vec![1, 2, 3], vec![4, 5, 6]);
        let debug = format!("{:?}", creds);
        assert!(debug.contains("[REDACTED]"));
        assert!(debug.contains("3 bytes"));
    }

    #[test]
    fn test_from_pkcs12_splits_signer_and_chain() {
        use crate::ca::{
            CertificateEngine, EndEntityRequest, RootCertificateOptions, RsaToolkitEngine,
        };

        let engine = RsaToolkitEngine::new(1024);
        let root = engine
            .issue_root_certificate(&RootCertificateOptions::new("Bundle Root", 30))
            .unwrap();
        let signer = engine
            .issue_end_entity_certificate(&EndEntityRequest {
                common_name: "Bundle Signer".to_string(),
                organization: None,
                validity_days: 5,
                serial_number: 9,
                issuer_certificate: root.certificate.clone(),
                issuer_private_key: root.private_key.clone(),
            })
            .unwrap();
        let bundle = p12::PFX::new(
            &signer.certificate,
            &signer.private_key,
            Some(&root.certificate),
            "s3cret",
            "signer",
        )
        .unwrap()
        .to_der();

        let creds = SigningCredentials::from_pkcs12(&bundle, "s3cret").unwrap();
        assert_eq!(creds.certificate, signer.certificate);
        assert_eq!(creds.private_key, signer.private_key);
        assert_eq!(creds.chain, vec![root.certificate.clone()]);

        let err = SigningCredentials::from_pkcs12(&bundle, "wrong").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(SigningCredentials::from_pkcs12(b"not a bundle", "s3cret").is_err());
    }

    #[test]
    fn test_pem_blocks() {
        let pem =
            der::pem::encode_string("CERTIFICATE", der::pem::LineEnding::LF, &[1, 2, 3]).unwrap();
        let two = format!("{}{}", pem, pem);
        assert_eq!(pem_blocks(&two, "CERTIFICATE").unwrap(), vec![vec![1, 2, 3], vec![1, 2, 3]]);
        assert!(pem_blocks(&two, "PRIVATE KEY").unwrap().is_empty());
        assert!(SigningCredentials::from_pem(&pem, "").is_err());
    }
}
