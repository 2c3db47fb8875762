//! Per-signer progress across envelope children.

mod common;

use common::*;
use sign_oxide::identify::IdentifyMethodKind;
use sign_oxide::store::InMemoryStore;
use sign_oxide::workflow::{
    Document, EnvelopeProgress, SignRequest, SignerIdentity, SigningWorkflow,
};
use sign_oxide::{Error, SignOxideConfig};
use std::sync::Arc;

struct Envelope {
    wf: SigningWorkflow<InMemoryStore>,
    id: u64,
    children: Vec<u64>,
}

impl Envelope {
    fn new(children: usize) -> Self {
        init_logging();
        let wf = SigningWorkflow::new(Arc::new(InMemoryStore::new()), &SignOxideConfig::default());
        let id = wf.create_document(Document::envelope("bundle")).unwrap().id;
        let children = (0..children)
            .map(|i| {
                let node = wf.store().put_blob(form_pdf());
                wf.create_document(Document::child_of(id, format!("part-{}.pdf", i), node))
                    .unwrap()
                    .id
            })
            .collect();
        Self { wf, id, children }
    }

    fn add(&self, child: usize, name: &str, email: &str) -> SignRequest {
        let request = self.wf.add_signer(self.children[child], name).unwrap();
        self.wf
            .add_identify_method(request.id, IdentifyMethodKind::Email, email, true)
            .unwrap();
        request
    }

    fn progress(&self, email: &str) -> EnvelopeProgress {
        self.wf
            .envelope_progress(self.id, &SignerIdentity::new("email", email))
            .unwrap()
    }
}

const ALICE: &str = "alice@example.com";
const BOB: &str = "bob@example.com";

#[test]
fn test_empty_envelope() {
    let envelope = Envelope::new(0);
    let progress = envelope.progress(ALICE);
    assert_eq!(progress, EnvelopeProgress::default());
    assert!(progress.is_complete());
}

#[test]
fn test_progress_follows_the_physical_signer() {
    let envelope = Envelope::new(3);
    let alice_a = envelope.add(0, "Alice", ALICE);
    envelope.add(1, "Alice", ALICE);
    envelope.add(0, "Bob", BOB);
    envelope.add(1, "Bob", BOB);
    envelope.add(2, "Bob", BOB);
    envelope.wf.request_signatures(envelope.id).unwrap();

    assert_eq!(
        envelope.progress(ALICE),
        EnvelopeProgress {
            total_documents: 2,
            documents_signed_count: 0
        }
    );

    envelope.wf.confirm_identity(alice_a.id, "email").unwrap();
    let pki = pki();
    envelope
        .wf
        .sign(alice_a.id, pki.credentials(), &pki.ca_chain())
        .unwrap();

    let alice = envelope.progress(ALICE);
    assert_eq!((alice.total_documents, alice.documents_signed_count), (2, 1));
    assert!(!alice.is_complete());
    let bob = envelope.progress(BOB);
    assert_eq!((bob.total_documents, bob.documents_signed_count), (3, 0));
    assert_eq!(envelope.progress("carol@example.com"), EnvelopeProgress::default());

    let json = serde_json::to_value(alice).unwrap();
    assert_eq!(json, serde_json::json!({ "totalDocuments": 2, "documentsSignedCount": 1 }));
}

#[test]
fn test_same_value_under_another_key_does_not_match() {
    let envelope = Envelope::new(1);
    let request = envelope.wf.add_signer(envelope.children[0], "Alice").unwrap();
    envelope
        .wf
        .add_identify_method(request.id, IdentifyMethodKind::Account, ALICE, false)
        .unwrap();

    assert_eq!(envelope.progress(ALICE).total_documents, 0);
    let by_account = envelope
        .wf
        .envelope_progress(envelope.id, &SignerIdentity::new("account", ALICE))
        .unwrap();
    assert_eq!(by_account.total_documents, 1);
}

#[test]
fn test_progress_requires_an_envelope() {
    let envelope = Envelope::new(1);
    let err = envelope
        .wf
        .envelope_progress(envelope.children[0], &SignerIdentity::new("email", ALICE))
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}
