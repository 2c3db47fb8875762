//! Envelope progress for one physical signer.
//!
//! Each envelope child has its own sign request rows, so a signer is
//! matched across children by identify method key and value, never by row
//! id.

use super::model::{SignRequest, SignerIdentity};
use crate::identify::IdentifyMethod;
use serde::Serialize;

/// Signer rows of one envelope child.
#[derive(Debug, Clone, Default)]
pub struct ChildSigners {
    pub document_id: u64,
    pub sign_requests: Vec<SignRequest>,
    pub identify_methods: Vec<IdentifyMethod>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeProgress {
    /// Children on which the signer has a sign request
    pub total_documents: usize,
    /// Of those, children the signer has signed
    pub documents_signed_count: usize,
}

impl EnvelopeProgress {
    pub fn is_complete(&self) -> bool {
        self.documents_signed_count == self.total_documents
    }
}

/// Count the children `identity` signs and has signed. Children without a
/// matching sign request contribute nothing.
pub fn compute_progress(identity: &SignerIdentity, children: &[ChildSigners]) -> EnvelopeProgress {
    let mut progress = EnvelopeProgress::default();
    for child in children {
        let matched: Vec<&SignRequest> = child
            .sign_requests
            .iter()
            .filter(|request| {
                child.identify_methods.iter().any(|m| {
                    m.sign_request_id == request.id
                        && m.identifier_key == identity.key
                        && m.identifier_value == identity.value
                })
            })
            .collect();
        if matched.is_empty() {
            continue;
        }
        progress.total_documents += 1;
        if matched.iter().any(|request| request.is_signed()) {
            progress.documents_signed_count += 1;
        }
    }
    progress
}
