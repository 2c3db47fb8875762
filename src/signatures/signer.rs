//! PDF signing implementation.
//!
//! Signing appends one incremental update holding the signature
//! dictionary, a merged signature field/widget, the updated page `/Annots`
//! and AcroForm, and (when certifying) the catalog `/Perms` entry. The
//! bytes of the input document are copied unchanged.

use super::byterange::ByteRangeCalculator;
use super::fields::{signature_fields, SignatureField};
use super::types::{DigestAlgorithm, SignOptions, SigningCredentials};
use crate::error::{Error, Result};
use crate::pdf::object::{dict, name, Dictionary, Object, ObjectRef};
use crate::pdf::{IncrementalUpdate, ObjectSerializer, PdfFile};
use chrono::{DateTime, Utc};
use cms::builder::{create_signing_time_attribute, SignedDataBuilder, SignerInfoBuilder};
use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::signed_data::{EncapsulatedContentInfo, SignerIdentifier};
use der::{Decode, Encode};
use pkcs8::DecodePrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::RsaPrivateKey;
use signature::Keypair;
use spki::{AlgorithmIdentifierOwned, DynSignatureAlgorithmIdentifier, EncodePublicKey};
use x509_cert::Certificate;

/// Widget flags: Print (4) + Locked (128).
const WIDGET_FLAGS: i64 = 132;

/// AcroForm `/SigFlags`: SignaturesExist (1) + AppendOnly (2).
const SIG_FLAGS: i64 = 3;

/// PDF signer that creates PKCS#7 detached signatures.
pub struct PdfSigner {
    credentials: SigningCredentials,
    options: SignOptions,
    byte_range_calc: ByteRangeCalculator,
}

impl PdfSigner {
    /// Create a signer.
    pub fn new(credentials: SigningCredentials, options: SignOptions) -> Self {
        let byte_range_calc = ByteRangeCalculator::new(options.estimated_size);
        Self {
            credentials,
            options,
            byte_range_calc,
        }
    }

    /// Signing options.
    pub fn options(&self) -> &SignOptions {
        &self.options
    }

    /// Sign `pdf` and return the complete signed document.
    ///
    /// `ca_chain` certificates (DER) are embedded after the credential's
    /// own chain. Either the full signed document is returned or an error;
    /// `pdf` itself is never modified.
    pub fn sign_document(&self, pdf: &[u8], ca_chain: &[Vec<u8>]) -> Result<Vec<u8>> {
        let file = PdfFile::from_bytes(pdf.to_vec())?;
        let existing = signature_fields(&file)?;
        if self.options.certify.is_some() && existing.iter().any(|f| f.value_ref.is_some()) {
            return Err(Error::Validation(
                "a certifying signature must be the first signature".to_string(),
            ));
        }

        let root = file.root_ref()?;
        let mut catalog = file.catalog()?;
        let page = *file
            .page_refs()?
            .first()
            .ok_or_else(|| Error::InvalidPdf("document has no pages".to_string()))?;

        let mut update = IncrementalUpdate::new(&file);
        let sig_ref = update.allocate();
        let field_ref = update.allocate();

        let field_name = self
            .options
            .field_name
            .clone()
            .unwrap_or_else(|| next_field_name(&existing));
        if existing.iter().any(|f| f.name == field_name) {
            return Err(Error::Validation(format!("signature field {} already exists", field_name)));
        }

        // Merged field + widget
        let widget = dict([
            ("Type", name("Annot")),
            ("Subtype", name("Widget")),
            ("FT", name("Sig")),
            ("T", Object::String(field_name.clone().into_bytes())),
            ("V", Object::Reference(sig_ref)),
            ("F", Object::Integer(WIDGET_FLAGS)),
            ("Rect", Object::Array(vec![Object::Integer(0); 4])),
            ("P", Object::Reference(page)),
        ]);
        update.put(field_ref, &Object::Dictionary(widget));

        self.add_widget_to_page(&file, &mut update, page, field_ref)?;
        let mut catalog_changed =
            self.add_field_to_acroform(&file, &mut update, &mut catalog, field_ref)?;
        if self.options.certify.is_some() {
            catalog.insert(
                "Perms".to_string(),
                Object::Dictionary(dict([("DocMDP", Object::Reference(sig_ref))])),
            );
            catalog_changed = true;
        }
        if catalog_changed {
            update.put(root, &Object::Dictionary(catalog));
        }

        // Signature dictionary with fixed-width placeholders
        let mut body = b"<<".to_vec();
        let entries = ObjectSerializer::serialize_entries(&self.build_signature_dictionary());
        body.extend_from_slice(&entries);
        body.extend_from_slice(b"/ByteRange ");
        let byte_range_rel = body.len();
        body.extend_from_slice(ByteRangeCalculator::byte_range_placeholder().as_bytes());
        body.extend_from_slice(b" /Contents ");
        let contents_rel = body.len();
        body.extend_from_slice(self.byte_range_calc.generate_placeholder().as_bytes());
        body.extend_from_slice(b">>");
        update.put_raw(sig_ref, body);

        let output = update.finish()?;
        let sig_body = *output
            .body_offsets
            .get(&sig_ref.id)
            .ok_or(Error::ObjectNotFound(sig_ref.id, sig_ref.gen))?;
        let mut bytes = output.bytes;

        let contents_offset = sig_body + contents_rel;
        let byte_range = self
            .byte_range_calc
            .calculate_byte_range(bytes.len(), contents_offset);
        let byte_range_text = ByteRangeCalculator::format_byte_range_padded(&byte_range);
        let br_offset = sig_body + byte_range_rel;
        let br_end = br_offset + byte_range_text.len();
        bytes[br_offset..br_end].copy_from_slice(byte_range_text.as_bytes());

        let signed_bytes = ByteRangeCalculator::extract_signed_bytes(&bytes, &byte_range)?;
        let cms = self.sign(&signed_bytes, ca_chain)?;
        self.byte_range_calc
            .insert_signature(&mut bytes, contents_offset, &bytes_to_hex(&cms))?;

        log::info!(
            "Signed document as field {} ({} bytes, {}, certify={:?})",
            field_name,
            bytes.len(),
            self.options.digest_algorithm.name(),
            self.options.certify
        );
        Ok(bytes)
    }

    fn add_widget_to_page(
        &self,
        file: &PdfFile,
        update: &mut IncrementalUpdate,
        page: ObjectRef,
        widget: ObjectRef,
    ) -> Result<()> {
        let mut page_obj = file.get_object(page)?;
        let page_dict = page_obj
            .as_dict_mut()
            .ok_or_else(|| Error::InvalidPdf("page is not a dictionary".to_string()))?;
        let mut annots = match page_dict.get("Annots") {
            Some(a) => match file.resolve(a)? {
                Object::Array(items) => items,
                _ => Vec::new(),
            },
            None => Vec::new(),
        };
        annots.push(Object::Reference(widget));
        page_dict.insert("Annots".to_string(), Object::Array(annots));
        update.put(page, &page_obj);
        Ok(())
    }

    /// Returns whether the catalog itself has to be rewritten.
    fn add_field_to_acroform(
        &self,
        file: &PdfFile,
        update: &mut IncrementalUpdate,
        catalog: &mut Dictionary,
        field: ObjectRef,
    ) -> Result<bool> {
        let indirect = catalog.get("AcroForm").and_then(Object::as_reference);
        let mut acroform = match file.resolve_key(catalog, "AcroForm")? {
            Some(Object::Dictionary(d)) => d,
            _ => Dictionary::new(),
        };
        let mut fields = match file.resolve_key(&acroform, "Fields")? {
            Some(Object::Array(items)) => items,
            _ => Vec::new(),
        };
        fields.push(Object::Reference(field));
        acroform.insert("Fields".to_string(), Object::Array(fields));
        acroform.insert("SigFlags".to_string(), Object::Integer(SIG_FLAGS));

        match indirect {
            Some(r) => {
                update.put(r, &Object::Dictionary(acroform));
                Ok(false)
            },
            None => {
                catalog.insert("AcroForm".to_string(), Object::Dictionary(acroform));
                Ok(true)
            },
        }
    }

    /// Signature dictionary entries other than `/ByteRange` and `/Contents`.
    pub fn build_signature_dictionary(&self) -> Dictionary {
        let mut d = dict([
            ("Type", name("Sig")),
            ("Filter", name("Adobe.PPKLite")),
            ("SubFilter", name(self.options.sub_filter.as_pdf_name())),
        ]);
        let text = |s: &String| Object::String(s.clone().into_bytes());
        if let Some(n) = &self.options.name {
            d.insert("Name".to_string(), text(n));
        }
        if let Some(r) = &self.options.reason {
            d.insert("Reason".to_string(), text(r));
        }
        if let Some(l) = &self.options.location {
            d.insert("Location".to_string(), text(l));
        }
        if let Some(c) = &self.options.contact_info {
            d.insert("ContactInfo".to_string(), text(c));
        }
        let when = self.options.signing_time.unwrap_or_else(Utc::now);
        d.insert("M".to_string(), Object::String(format_pdf_date(&when).into_bytes()));

        if let Some(level) = self.options.certify {
            let params = dict([
                ("Type", name("TransformParams")),
                ("P", Object::Integer(i64::from(level.as_u8()))),
                ("V", name("1.2")),
            ]);
            let reference = dict([
                ("Type", name("SigRef")),
                ("TransformMethod", name("DocMDP")),
                ("TransformParams", Object::Dictionary(params)),
            ]);
            d.insert("Reference".to_string(), Object::Array(vec![Object::Dictionary(reference)]));
        }
        d
    }

    /// Build the DER-encoded CMS `SignedData` over `signed_bytes`.
    pub fn sign(&self, signed_bytes: &[u8], ca_chain: &[Vec<u8>]) -> Result<Vec<u8>> {
        let digest = self.options.digest_algorithm.digest(signed_bytes);
        let key = RsaPrivateKey::from_pkcs8_der(&self.credentials.private_key)
            .map_err(|e| Error::Crypto(format!("invalid private key: {}", e)))?;
        match self.options.digest_algorithm {
            DigestAlgorithm::Sha256 => {
                self.build_cms(&SigningKey::<sha2::Sha256>::new(key), &digest, ca_chain)
            },
            DigestAlgorithm::Sha384 => {
                self.build_cms(&SigningKey::<sha2::Sha384>::new(key), &digest, ca_chain)
            },
            DigestAlgorithm::Sha512 => {
                self.build_cms(&SigningKey::<sha2::Sha512>::new(key), &digest, ca_chain)
            },
            DigestAlgorithm::Sha1 => {
                Err(Error::Validation("SHA-1 is not accepted for new signatures".to_string()))
            },
        }
    }

    fn build_cms<S>(&self, signer: &S, digest: &[u8], ca_chain: &[Vec<u8>]) -> Result<Vec<u8>>
    where
        S: Keypair + DynSignatureAlgorithmIdentifier + signature::Signer<rsa::pkcs1v15::Signature>,
        S::VerifyingKey: EncodePublicKey,
    {
        let crypto = |e: &dyn std::fmt::Display| Error::Crypto(e.to_string());
        let cert = Certificate::from_der(&self.credentials.certificate).map_err(|e| crypto(&e))?;
        let sid = SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
            issuer: cert.tbs_certificate.issuer.clone(),
            serial_number: cert.tbs_certificate.serial_number.clone(),
        });
        let digest_alg = AlgorithmIdentifierOwned {
            oid: self.options.digest_algorithm.oid(),
            parameters: None,
        };
        let content = EncapsulatedContentInfo {
            econtent_type: const_oid::db::rfc5911::ID_DATA,
            econtent: None,
        };

        let mut signer_info =
            SignerInfoBuilder::new(signer, sid, digest_alg.clone(), &content, Some(digest))
                .map_err(|e| crypto(&e))?;
        signer_info
            .add_signed_attribute(create_signing_time_attribute().map_err(|e| crypto(&e))?)
            .map_err(|e| crypto(&e))?;

        let mut builder = SignedDataBuilder::new(&content);
        builder
            .add_digest_algorithm(digest_alg)
            .map_err(|e| crypto(&e))?
            .add_certificate(CertificateChoices::Certificate(cert))
            .map_err(|e| crypto(&e))?;
        for der_cert in self.credentials.chain.iter().chain(ca_chain) {
            let extra = Certificate::from_der(der_cert).map_err(|e| crypto(&e))?;
            builder
                .add_certificate(CertificateChoices::Certificate(extra))
                .map_err(|e| crypto(&e))?;
        }
        let signed = builder
            .add_signer_info::<S, rsa::pkcs1v15::Signature>(signer_info)
            .map_err(|e| crypto(&e))?
            .build()
            .map_err(|e| crypto(&e))?;

        let der = signed.to_der().map_err(|e| crypto(&e))?;
        if der.len() * 2 + 2 > self.byte_range_calc.placeholder_size() {
            return Err(Error::Crypto(format!(
                "CMS structure ({} bytes) does not fit the reserved {} bytes",
                der.len(),
                self.options.estimated_size
            )));
        }
        Ok(der)
    }
}

/// Uppercase hex.
fn bytes_to_hex(bytes: &[u8]) -> String {
    const HEX_CHARS: &[u8] = b"0123456789ABCDEF";
    let mut hex = String::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        hex.push(HEX_CHARS[(byte >> 4) as usize] as char);
        hex.push(HEX_CHARS[(byte & 0x0F) as usize] as char);
    }
    hex
}

/// `D:YYYYMMDDHHmmSS+00'00'`
pub(crate) fn format_pdf_date(when: &DateTime<Utc>) -> String {
    format!("D:{}+00'00'", when.format("%Y%m%d%H%M%S"))
}

/// First free `SignatureN`, counting from one past the existing fields.
fn next_field_name(existing: &[SignatureField]) -> String {
    (existing.len() + 1..)
        .map(|n| format!("Signature{}", n))
        .find(|candidate| existing.iter().all(|f| &f.name != candidate))
        .unwrap_or_else(|| "Signature".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docmdp::DocMdpLevel;
    use chrono::TimeZone;

    fn signer(options: SignOptions) -> PdfSigner {
        PdfSigner::new(SigningCredentials::new(vec![], vec![]), options)
    }

    fn field(id: u32, name: &str) -> SignatureField {
        SignatureField {
            field_ref: ObjectRef::new(id, 0),
            name: name.to_string(),
            value_ref: None,
            signature: None,
        }
    }

    #[test]
    fn test_next_field_name_skips_taken_names() {
        assert_eq!(next_field_name(&[]), "Signature1");
        assert_eq!(next_field_name(&[field(7, "Approval")]), "Signature2");
        assert_eq!(next_field_name(&[field(7, "Signature2")]), "Signature3");
        let taken = [field(7, "Signature2"), field(8, "Signature3")];
        assert_eq!(next_field_name(&taken), "Signature4");
        let taken = [field(7, "Signature1"), field(8, "Other")];
        assert_eq!(next_field_name(&taken), "Signature3");
    }

    #[test]
    fn test_format_pdf_date() {
        let when = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(format_pdf_date(&when), "D:20240309070501+00'00'");
    }

    #[test]
    fn test_bytes_to_hex() {
        assert_eq!(bytes_to_hex(&[0x00, 0xAB, 0x7F]), "00AB7F");
    }

    #[test]
    fn test_build_signature_dictionary() {
        let options = SignOptions::default()
            .with_reason("Test signing")
            .with_location("Test City");
        let d = signer(options).build_signature_dictionary();
        assert_eq!(d.get("Type"), Some(&name("Sig")));
        assert_eq!(d.get("SubFilter"), Some(&name("adbe.pkcs7.detached")));
        assert_eq!(d.get("Reason"), Some(&Object::String(b"Test signing".to_vec())));
        assert!(d.get("M").is_some());
        assert!(d.get("Reference").is_none());
    }

    #[test]
    fn test_certifying_dictionary_carries_docmdp_reference() {
        let d = signer(SignOptions::default().with_certification(DocMdpLevel::NoChanges))
            .build_signature_dictionary();
        let reference = d.get("Reference").and_then(Object::as_array).unwrap();
        let params = reference[0].get("TransformParams").unwrap();
        assert_eq!(params.get("P"), Some(&Object::Integer(1)));
        assert_eq!(reference[0].get("TransformMethod"), Some(&name("DocMDP")));
    }

    #[test]
    fn test_invalid_key_is_crypto_error() {
        let result = signer(SignOptions::default()).sign(b"data", &[]);
        assert!(matches!(result, Err(Error::Crypto(_))));
    }
}
