//! Identification through the workflow: codes are persisted on every
//! attempt and gate signing.

mod common;

use chrono::{Duration, Utc};
use common::*;
use sign_oxide::config::IdentifyConfig;
use sign_oxide::identify::{IdentifyMethodKind, VerifyOutcome};
use sign_oxide::store::{IdentifyMethodRepository, InMemoryStore};
use sign_oxide::workflow::{Document, SignRequest, SigningWorkflow};
use sign_oxide::{Conflict, Error, SignOxideConfig};
use std::sync::Arc;

const SMS: &str = "smsToken";

fn setup(config: IdentifyConfig) -> (SigningWorkflow<InMemoryStore>, SignRequest) {
    init_logging();
    let store = Arc::new(InMemoryStore::new());
    let wf = SigningWorkflow::new(store, &SignOxideConfig::default().with_identify(config));
    let node = wf.store().put_blob(form_pdf());
    let doc = wf.create_document(Document::file("nda.pdf", node)).unwrap();
    let signer = wf.add_signer(doc.id, "Alice").unwrap();
    wf.add_identify_method(signer.id, IdentifyMethodKind::SmsToken, "+15550100", true)
        .unwrap();
    wf.request_signatures(doc.id).unwrap();
    (wf, signer)
}

fn sms_row(
    wf: &SigningWorkflow<InMemoryStore>,
    sign_request_id: u64,
) -> sign_oxide::identify::IdentifyMethod {
    wf.store()
        .identify_methods_for(sign_request_id)
        .unwrap()
        .into_iter()
        .find(|m| m.identifier_key == SMS)
        .unwrap()
}

#[test]
fn test_code_unlocks_signing() {
    let (wf, signer) = setup(IdentifyConfig::default());
    assert!(!wf.can_sign(signer.id).unwrap());

    let code = wf.send_code(signer.id, SMS).unwrap();
    let stored = sms_row(&wf, signer.id);
    assert!(stored.code.is_some());
    assert_ne!(stored.code.as_deref(), Some(code.as_str()));
    assert!(stored.code_sent_at.is_some());

    assert_eq!(wf.identify(signer.id, SMS, &code).unwrap(), VerifyOutcome::Identified);
    let stored = sms_row(&wf, signer.id);
    assert!(stored.identified_at.is_some());
    assert_eq!(stored.code, None);
    assert!(wf.can_sign(signer.id).unwrap());

    let pki = pki();
    wf.sign(signer.id, pki.credentials(), &pki.ca_chain()).unwrap();
}

#[test]
fn test_wrong_codes_are_counted_and_persisted() {
    let (wf, signer) = setup(IdentifyConfig::default().with_max_attempts(2));
    let code = wf.send_code(signer.id, SMS).unwrap();
    let wrong = if code == "000000" { "111111" } else { "000000" };

    assert_eq!(
        wf.identify(signer.id, SMS, wrong).unwrap(),
        VerifyOutcome::Rejected { remaining_attempts: 1 }
    );
    let stored = sms_row(&wf, signer.id);
    assert_eq!(stored.attempts, 1);
    assert!(stored.last_attempt_at.is_some());

    wf.identify(signer.id, SMS, wrong).unwrap();
    let err = wf.identify(signer.id, SMS, &code).unwrap_err();
    assert_eq!(err.conflict(), Some(&Conflict::TooManyAttempts));
    assert!(!wf.can_sign(signer.id).unwrap());

    // A fresh code resets the counter.
    let code = wf.send_code(signer.id, SMS).unwrap();
    assert_eq!(sms_row(&wf, signer.id).attempts, 0);
    assert_eq!(wf.identify(signer.id, SMS, &code).unwrap(), VerifyOutcome::Identified);
}

#[test]
fn test_expired_code_is_rejected() {
    let (wf, signer) = setup(IdentifyConfig::default().with_code_ttl_seconds(60));
    let code = wf.send_code(signer.id, SMS).unwrap();

    let mut stored = sms_row(&wf, signer.id);
    stored.code_sent_at = Some(Utc::now() - Duration::minutes(5));
    wf.store().update_identify_method(&stored).unwrap();

    let err = wf.identify(signer.id, SMS, &code).unwrap_err();
    assert_eq!(err.conflict(), Some(&Conflict::ExpiredCode));
    assert!(sms_row(&wf, signer.id).identified_at.is_none());
}

#[test]
fn test_passive_methods_are_confirmed_by_the_host() {
    let (wf, signer) = setup(IdentifyConfig::default());
    wf.add_identify_method(signer.id, IdentifyMethodKind::Account, "alice", false)
        .unwrap();

    assert!(matches!(wf.send_code(signer.id, "account"), Err(Error::Validation(_))));
    assert!(matches!(wf.confirm_identity(signer.id, SMS), Err(Error::Validation(_))));
    wf.confirm_identity(signer.id, "account").unwrap();
    // The optional account does not stand in for the mandatory SMS method.
    assert!(!wf.can_sign(signer.id).unwrap());

    assert!(matches!(
        wf.identify(signer.id, "email", "123456"),
        Err(Error::NotFound { .. })
    ));
}
