//! Shared fixtures for integration tests.

#![allow(dead_code)]

use sign_oxide::ca::{
    CertificateEngine, EndEntityRequest, IssuedCertificate, RootCertificateOptions,
    RsaToolkitEngine,
};
use sign_oxide::pdf::object::{dict, name, Object, ObjectRef};
use sign_oxide::pdf::{IncrementalUpdate, PdfFile};
use sign_oxide::signatures::SigningCredentials;
use std::sync::OnceLock;

pub const PAGE: ObjectRef = ObjectRef { id: 3, gen: 0 };
pub const CONTENT: ObjectRef = ObjectRef { id: 4, gen: 0 };
pub const TEXT_FIELD: ObjectRef = ObjectRef { id: 5, gen: 0 };

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// One page with a content stream and a text field `name` whose widget
/// sits on the page.
pub fn form_pdf() -> Vec<u8> {
    let mut update = IncrementalUpdate::from_header(b"%PDF-1.7\n");
    let catalog = update.allocate();
    let pages = update.allocate();
    let page = update.allocate();
    let content = update.allocate();
    let field = update.allocate();
    let acroform = update.allocate();
    assert_eq!((page, content, field), (PAGE, CONTENT, TEXT_FIELD));

    update.put(
        catalog,
        &Object::Dictionary(dict([
            ("Type", name("Catalog")),
            ("Pages", Object::Reference(pages)),
            ("AcroForm", Object::Reference(acroform)),
        ])),
    );
    update.put(
        pages,
        &Object::Dictionary(dict([
            ("Type", name("Pages")),
            ("Kids", Object::Array(vec![Object::Reference(page)])),
            ("Count", Object::Integer(1)),
        ])),
    );
    update.put(
        page,
        &Object::Dictionary(dict([
            ("Type", name("Page")),
            ("Parent", Object::Reference(pages)),
            ("MediaBox", rect([0, 0, 612, 792])),
            ("Contents", Object::Reference(content)),
            ("Annots", Object::Array(vec![Object::Reference(field)])),
        ])),
    );
    update.put(content, &content_stream("Hello"));
    update.put(
        field,
        &Object::Dictionary(dict([
            ("FT", name("Tx")),
            ("T", Object::String(b"name".to_vec())),
            ("V", Object::String(Vec::new())),
            ("Type", name("Annot")),
            ("Subtype", name("Widget")),
            ("Rect", rect([72, 600, 300, 620])),
            ("P", Object::Reference(page)),
        ])),
    );
    update.put(
        acroform,
        &Object::Dictionary(dict([("Fields", Object::Array(vec![Object::Reference(field)]))])),
    );
    update.set_root(catalog);
    update.finish().expect("base document").bytes
}

fn rect(values: [i64; 4]) -> Object {
    Object::Array(values.iter().map(|v| Object::Integer(*v)).collect())
}

fn content_stream(text: &str) -> Object {
    Object::Stream {
        dict: Default::default(),
        data: bytes::Bytes::from(format!("BT /F1 12 Tf 72 720 Td ({}) Tj ET", text)),
    }
}

/// Append an update that fills the text field.
pub fn fill_field(pdf: &[u8], value: &str) -> Vec<u8> {
    let file = PdfFile::from_bytes(pdf.to_vec()).expect("parse");
    let mut field = file.get_object(TEXT_FIELD).expect("field");
    if let Some(d) = field.as_dict_mut() {
        d.insert("V".to_string(), Object::String(value.as_bytes().to_vec()));
    }
    let mut update = IncrementalUpdate::new(&file);
    update.put(TEXT_FIELD, &field);
    update.finish().expect("update").bytes
}

/// Append an update that rewrites the page text.
pub fn change_content(pdf: &[u8], text: &str) -> Vec<u8> {
    let file = PdfFile::from_bytes(pdf.to_vec()).expect("parse");
    let mut update = IncrementalUpdate::new(&file);
    update.put(CONTENT, &content_stream(text));
    update.finish().expect("update").bytes
}

/// Append an update that redefines `target` as `object`.
pub fn replace_object(pdf: &[u8], target: ObjectRef, object: &Object) -> Vec<u8> {
    let file = PdfFile::from_bytes(pdf.to_vec()).expect("parse");
    let mut update = IncrementalUpdate::new(&file);
    update.put(target, object);
    update.finish().expect("update").bytes
}

/// Append an update that adds a sticky note to the page.
pub fn add_note(pdf: &[u8]) -> Vec<u8> {
    let file = PdfFile::from_bytes(pdf.to_vec()).expect("parse");
    let mut page = file.get_object(PAGE).expect("page");
    let mut update = IncrementalUpdate::new(&file);
    let note = update.allocate();
    update.put(
        note,
        &Object::Dictionary(dict([
            ("Type", name("Annot")),
            ("Subtype", name("Text")),
            ("Rect", rect([400, 700, 420, 720])),
            ("Contents", Object::String(b"Looks good".to_vec())),
        ])),
    );
    if let Some(Object::Array(annots)) = page.as_dict_mut().and_then(|d| d.get_mut("Annots")) {
        annots.push(Object::Reference(note));
    }
    update.put(PAGE, &page);
    update.finish().expect("update").bytes
}

/// A root and one signer certificate, generated once per test binary.
pub struct Pki {
    pub root: IssuedCertificate,
    pub signer: IssuedCertificate,
}

impl Pki {
    pub fn credentials(&self) -> SigningCredentials {
        self.signer.to_credentials(Vec::new())
    }

    pub fn ca_chain(&self) -> Vec<Vec<u8>> {
        vec![self.root.certificate.clone()]
    }
}

pub fn pki() -> &'static Pki {
    static PKI: OnceLock<Pki> = OnceLock::new();
    PKI.get_or_init(|| {
        let engine = RsaToolkitEngine::new(1024);
        let root = engine
            .issue_root_certificate(
                &RootCertificateOptions::new("Test Root CA", 30).with_organization("Sign Oxide"),
            )
            .expect("root");
        let signer = engine
            .issue_end_entity_certificate(&EndEntityRequest {
                common_name: "Alice Signer".to_string(),
                organization: None,
                validity_days: 10,
                serial_number: 4242,
                issuer_certificate: root.certificate.clone(),
                issuer_private_key: root.private_key.clone(),
            })
            .expect("signer");
        Pki { root, signer }
    })
}
