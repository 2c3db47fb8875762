//! PDF signature verification.
//!
//! Walks every signed signature field, re-hashes its `/ByteRange`, checks
//! the CMS `messageDigest` attribute and the RSA signature over the signed
//! attributes, and describes the embedded certificate chain.

use super::byterange::ByteRangeCalculator;
use super::fields::{extract_signature_info, signature_fields, SignatureField};
use super::types::{CertificateDetails, DigestAlgorithm, SignatureReport, VerificationStatus};
use crate::crl::entry::serial_from_der_bytes;
use crate::crl::RevocationCheck;
use crate::error::{Error, Result};
use crate::parser_config::ParserOptions;
use crate::pdf::PdfFile;
use chrono::{DateTime, TimeZone, Utc};
use cms::cert::CertificateChoices;
use cms::content_info::ContentInfo;
use cms::signed_data::{SignedData, SignerIdentifier, SignerInfo};
use der::asn1::OctetString;
use der::{Decode, Encode};
use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use signature::Verifier;
use x509_cert::Certificate;

/// Verifier for PDF digital signatures.
#[derive(Debug, Clone, Default)]
pub struct SignatureVerifier {
    options: ParserOptions,
    now: Option<DateTime<Utc>>,
}

/// Outcome of the cryptographic checks on one CMS structure.
struct CmsCheck {
    digest_algorithm: Option<DigestAlgorithm>,
    certificates: Vec<Vec<u8>>,
    signer: Option<Vec<u8>>,
    messages: Vec<String>,
}

impl SignatureVerifier {
    /// Create a verifier with default parser limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use custom parser limits.
    pub fn with_parser_options(mut self, options: ParserOptions) -> Self {
        self.options = options;
        self
    }

    /// Evaluate certificate validity at a fixed instant instead of now.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    /// Report every signature of `pdf`: signer metadata, chain, digest
    /// algorithm and status. Certificates are checked against `revocation`
    /// when given.
    ///
    /// A malformed signature yields an `Invalid` report; only an unreadable
    /// document is an error.
    pub fn get_certificate_chain(
        &self,
        pdf: &[u8],
        revocation: Option<&dyn RevocationCheck>,
    ) -> Result<Vec<SignatureReport>> {
        let file = PdfFile::parse(pdf.to_vec(), self.options)?;
        let mut reports = Vec::new();
        for field in signature_fields(&file)?.iter().filter(|f| f.is_signed()) {
            reports.push(self.verify_field(&file, field, revocation)?);
        }
        log::debug!("Verified {} signature(s)", reports.len());
        Ok(reports)
    }

    /// Verify one signed field.
    pub fn verify_field(
        &self,
        file: &PdfFile,
        field: &SignatureField,
        revocation: Option<&dyn RevocationCheck>,
    ) -> Result<SignatureReport> {
        let sig = field
            .signature
            .as_ref()
            .ok_or_else(|| Error::Validation(format!("field {} is not signed", field.name)))?;
        let info = extract_signature_info(sig)?;
        let data = file.data();

        let mut messages = Vec::new();
        let byte_range = match field.byte_range() {
            Ok(Some(br)) => Some(br),
            Ok(None) => None,
            Err(e) => {
                messages.push(e.to_string());
                None
            },
        };
        let covers_whole_document = byte_range.is_some_and(|br| br[2] + br[3] == data.len() as i64);

        let check = match (byte_range, field.contents()) {
            (Some(br), Some(contents)) => {
                match ByteRangeCalculator::validate_byte_range(&br, (br[2] + br[3]).max(0) as usize)
                    .and_then(|_| ByteRangeCalculator::extract_signed_bytes(data, &br))
                {
                    Ok(signed) => check_cms(contents, &signed),
                    Err(e) => Err(e),
                }
            },
            (None, _) => Err(Error::InvalidPdf("missing or malformed /ByteRange".to_string())),
            (_, None) => Err(Error::InvalidPdf("missing /Contents".to_string())),
        };

        let (digest_algorithm, chain, crypto_ok) = match check {
            Ok(check) => {
                let crypto_ok = check.messages.is_empty();
                messages.extend(check.messages);
                let ordered = match &check.signer {
                    Some(signer) => order_chain(signer, &check.certificates),
                    None => check.certificates.clone(),
                };
                let mut chain = Vec::with_capacity(ordered.len());
                for der in &ordered {
                    chain.push(describe_certificate(der, revocation)?);
                }
                (check.digest_algorithm, chain, crypto_ok && check.signer.is_some())
            },
            Err(e) => {
                messages.push(e.to_string());
                (None, Vec::new(), false)
            },
        };

        let now = self.now.unwrap_or_else(Utc::now);
        let mut warnings = false;
        for cert in &chain {
            if cert.revoked {
                warnings = true;
                messages.push(format!("certificate {} is revoked", cert.serial_hex));
            }
            if now < cert.valid_from || now > cert.valid_to {
                warnings = true;
                messages.push(format!(
                    "certificate {} is outside its validity window",
                    cert.serial_hex
                ));
            }
        }

        let status = if !crypto_ok {
            VerificationStatus::Invalid
        } else if warnings {
            VerificationStatus::ValidWithWarnings
        } else {
            VerificationStatus::Valid
        };
        if status != VerificationStatus::Valid {
            log::warn!("Signature {}: {:?} ({})", field.name, status, messages.join("; "));
        }

        Ok(SignatureReport {
            field_name: field.name.clone(),
            info,
            digest_algorithm,
            chain,
            covers_whole_document,
            status,
            messages,
        })
    }
}

/// Decode a (possibly zero-padded) CMS `ContentInfo` and verify its first
/// signer against `signed_bytes`.
fn check_cms(contents: &[u8], signed_bytes: &[u8]) -> Result<CmsCheck> {
    let crypto = |e: der::Error| Error::Crypto(format!("malformed CMS: {}", e));
    let mut reader = der::SliceReader::new(contents).map_err(crypto)?;
    let content_info = ContentInfo::decode(&mut reader).map_err(crypto)?;
    if content_info.content_type != const_oid::db::rfc5911::ID_SIGNED_DATA {
        return Err(Error::Crypto(format!(
            "unexpected CMS content type {}",
            content_info.content_type
        )));
    }
    let signed_data =
        SignedData::from_der(&content_info.content.to_der().map_err(crypto)?).map_err(crypto)?;

    let mut certificates = Vec::new();
    let mut parsed = Vec::new();
    if let Some(set) = &signed_data.certificates {
        for choice in set.0.iter() {
            if let CertificateChoices::Certificate(cert) = choice {
                certificates.push(cert.to_der().map_err(crypto)?);
                parsed.push(cert.clone());
            }
        }
    }

    let signer_info = signed_data
        .signer_infos
        .0
        .iter()
        .next()
        .ok_or_else(|| Error::Crypto("CMS has no signer".to_string()))?;
    let digest_algorithm = DigestAlgorithm::from_oid(&signer_info.digest_alg.oid);

    let mut messages = Vec::new();
    let signer = find_signer(signer_info, &parsed);
    if signer.is_none() {
        messages.push("signer certificate not embedded".to_string());
    }

    match digest_algorithm {
        None => messages.push(format!(
            "unsupported digest algorithm {}",
            signer_info.digest_alg.oid
        )),
        Some(alg) => {
            let computed = alg.digest(signed_bytes);
            match message_digest(signer_info)? {
                Some(claimed) if claimed == computed => {},
                Some(_) => {
                    messages.push("document digest does not match the signature".to_string())
                },
                None => messages.push("signed attributes carry no messageDigest".to_string()),
            }
            if let Some(cert) = &signer {
                if let Err(e) = verify_rsa(alg, cert, signer_info) {
                    messages.push(e.to_string());
                }
            }
        },
    }

    Ok(CmsCheck {
        digest_algorithm,
        certificates,
        signer: signer.map(|c| c.to_der()).transpose().map_err(crypto)?,
        messages,
    })
}

fn find_signer(signer_info: &SignerInfo, certs: &[Certificate]) -> Option<Certificate> {
    match &signer_info.sid {
        SignerIdentifier::IssuerAndSerialNumber(ias) => certs
            .iter()
            .find(|c| {
                c.tbs_certificate.serial_number == ias.serial_number
                    && c.tbs_certificate.issuer == ias.issuer
            })
            .cloned(),
        SignerIdentifier::SubjectKeyIdentifier(_) => certs.first().cloned(),
    }
}

fn message_digest(signer_info: &SignerInfo) -> Result<Option<Vec<u8>>> {
    let Some(attrs) = &signer_info.signed_attrs else {
        return Ok(None);
    };
    for attr in attrs.iter() {
        if attr.oid != const_oid::db::rfc5911::ID_MESSAGE_DIGEST {
            continue;
        }
        let Some(value) = attr.values.iter().next() else {
            return Ok(None);
        };
        let der = value.to_der().map_err(|e| Error::Crypto(e.to_string()))?;
        let octets = OctetString::from_der(&der).map_err(|e| Error::Crypto(e.to_string()))?;
        return Ok(Some(octets.as_bytes().to_vec()));
    }
    Ok(None)
}

fn verify_rsa(alg: DigestAlgorithm, cert: &Certificate, signer_info: &SignerInfo) -> Result<()> {
    let crypto = |e: &dyn std::fmt::Display| Error::Crypto(e.to_string());
    let spki = cert
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| crypto(&e))?;
    let public_key = RsaPublicKey::from_public_key_der(&spki).map_err(|e| crypto(&e))?;
    let message = match &signer_info.signed_attrs {
        Some(attrs) => attrs.to_der().map_err(|e| crypto(&e))?,
        None => return Err(Error::Crypto("signature without signed attributes".to_string())),
    };
    let signature = rsa::pkcs1v15::Signature::try_from(signer_info.signature.as_bytes())
        .map_err(|e| crypto(&e))?;
    let result = match alg {
        DigestAlgorithm::Sha1 => {
            rsa::pkcs1v15::VerifyingKey::<sha1::Sha1>::new(public_key).verify(&message, &signature)
        },
        DigestAlgorithm::Sha256 => {
            let key = rsa::pkcs1v15::VerifyingKey::<sha2::Sha256>::new(public_key);
            key.verify(&message, &signature)
        },
        DigestAlgorithm::Sha384 => {
            let key = rsa::pkcs1v15::VerifyingKey::<sha2::Sha384>::new(public_key);
            key.verify(&message, &signature)
        },
        DigestAlgorithm::Sha512 => {
            let key = rsa::pkcs1v15::VerifyingKey::<sha2::Sha512>::new(public_key);
            key.verify(&message, &signature)
        },
    };
    result.map_err(|_| Error::Crypto("RSA signature does not verify".to_string()))
}

/// Signer first, then each issuer found among `certs`.
fn order_chain(signer: &[u8], certs: &[Vec<u8>]) -> Vec<Vec<u8>> {
    let names = |der: &[u8]| {
        x509_parser::parse_x509_certificate(der)
            .ok()
            .map(|(_, c)| (c.subject().to_string(), c.issuer().to_string()))
    };
    let mut chain = vec![signer.to_vec()];
    let mut used = vec![false; certs.len()];
    while chain.len() <= certs.len() {
        let Some((subject, issuer)) = chain.last().and_then(|c| names(c)) else {
            break;
        };
        if subject == issuer {
            break;
        }
        let next = certs.iter().enumerate().find(|(i, der)| {
            !used[*i] && der.as_slice() != signer && names(der).is_some_and(|(s, _)| s == issuer)
        });
        match next {
            Some((i, der)) => {
                used[i] = true;
                chain.push(der.clone());
            },
            None => break,
        }
    }
    chain
}

/// Describe a DER certificate and look its serial up in `revocation`.
pub fn describe_certificate(
    der: &[u8],
    revocation: Option<&dyn RevocationCheck>,
) -> Result<CertificateDetails> {
    let (_, cert) = x509_parser::parse_x509_certificate(der)
        .map_err(|e| Error::Crypto(format!("invalid certificate: {}", e)))?;
    let raw_serial = cert.raw_serial();
    let serial = serial_from_der_bytes(raw_serial);
    let serial_hex = raw_serial
        .iter()
        .skip_while(|b| **b == 0)
        .map(|b| format!("{:02X}", b))
        .collect::<String>();
    let timestamp = |ts: i64| {
        Utc.timestamp_opt(ts, 0)
            .single()
            .ok_or_else(|| Error::Crypto(format!("certificate time out of range: {}", ts)))
    };
    let revoked = match (revocation, serial) {
        (Some(check), Some(serial)) => check.is_revoked(serial)?,
        _ => false,
    };
    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string);
    let details = CertificateDetails {
        subject: cert.subject().to_string(),
        common_name,
        issuer: cert.issuer().to_string(),
        serial_hex: if serial_hex.is_empty() { "00".to_string() } else { serial_hex },
        serial,
        valid_from: timestamp(cert.validity().not_before.timestamp())?,
        valid_to: timestamp(cert.validity().not_after.timestamp())?,
        is_ca: cert.is_ca(),
        revoked,
    };
    Ok(details)
}
