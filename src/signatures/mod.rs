//! PDF digital signatures.
//!
//! Creation and verification of detached PKCS#7 signatures embedded in PDF
//! documents through incremental updates.
//!
//! ## Features
//!
//! - **Signature Creation**: append a signature field and a CMS `SignedData`
//!   structure, optionally certifying the document with a DocMDP level
//! - **Signature Verification**: re-hash every `/ByteRange`, check the signer
//!   and describe the embedded certificate chain
//! - **ByteRange Calculation**: fixed-width placeholders patched in place
//!
//! ## Example
//!
//! ```ignore
//! use sign_oxide::signatures::{PdfSigner, SignOptions, SigningCredentials, SignatureVerifier};
//!
//! let credentials = SigningCredentials::from_pem(&cert_pem, &key_pem)?;
//! let signer = PdfSigner::new(credentials, SignOptions::default().with_reason("Approved"));
//! let signed = signer.sign_document(&pdf_bytes, &[ca_der])?;
//!
//! for report in SignatureVerifier::new().get_certificate_chain(&signed, Some(&crl))? {
//!     println!("{}: {:?}", report.field_name, report.status);
//! }
//! ```
//!
//! ## PDF Specification Reference
//!
//! - ISO 32000-1:2008 Section 12.8 - Digital Signatures
//! - RFC 5652 - Cryptographic Message Syntax

mod byterange;
mod fields;
mod signer;
mod types;
mod verifier;

pub use byterange::ByteRangeCalculator;
pub use fields::{extract_signature_info, signature_fields, SignatureField};
pub use signer::PdfSigner;
pub(crate) use types::pem_blocks;
pub use types::{
    sha256_hex, CertificateDetails, DigestAlgorithm, SignOptions, SignatureInfo, SignatureReport,
    SignatureSubFilter, SigningCredentials, VerificationStatus,
};
pub use verifier::{describe_certificate, SignatureVerifier};
