//! Signer and document transitions.
//!
//! Signer rows move `draft -> able_to_sign -> signed` and never back.
//! Document status is always derived from the signer rows (and, for an
//! envelope, from its children) at read time; it is never stored.

use super::model::{
    Document, DocumentStatus, SignRequest, SignRequestStatus, SignatureFlow, SignerIdentity,
};
use super::progress::{compute_progress, ChildSigners, EnvelopeProgress};
use crate::config::{SignOxideConfig, SigningDefaults};
use crate::docmdp::{DocMdpHandler, DocMdpLevel, ModificationStatus};
use crate::error::{Conflict, Error, Result};
use crate::identify::{
    is_identified, IdentifyMethod, IdentifyMethodKind, IdentifyVerifier, VerifyOutcome,
};
use crate::signatures::{sha256_hex, PdfSigner, SignOptions, SigningCredentials};
use crate::store::{
    BlobStorage, DocumentRepository, IdentifyMethodRepository, SignRequestRepository,
};
use chrono::Utc;
use std::sync::Arc;

/// Status of a document derived from its signers.
pub fn document_status(signers: &[SignRequest]) -> DocumentStatus {
    if signers.is_empty() {
        return DocumentStatus::Draft;
    }
    if signers.iter().all(SignRequest::is_signed) {
        DocumentStatus::Signed
    } else if signers.iter().any(SignRequest::is_signed) {
        DocumentStatus::PartialSigned
    } else if signers.iter().any(|s| s.status == SignRequestStatus::AbleToSign) {
        DocumentStatus::AbleToSign
    } else {
        DocumentStatus::Draft
    }
}

/// Status of an envelope derived from its children's statuses.
pub fn envelope_status(children: &[DocumentStatus]) -> DocumentStatus {
    if children.is_empty() {
        return DocumentStatus::Draft;
    }
    if children.iter().all(|s| *s == DocumentStatus::Signed) {
        DocumentStatus::Signed
    } else if children
        .iter()
        .any(|s| matches!(s, DocumentStatus::PartialSigned | DocumentStatus::Signed))
    {
        DocumentStatus::PartialSigned
    } else {
        children.iter().copied().max().unwrap_or(DocumentStatus::Draft)
    }
}

/// Ordered-flow gate: every other signer with a lower order must have
/// signed. Other flows impose no order.
pub fn check_signing_order(
    flow: SignatureFlow,
    request: &SignRequest,
    signers: &[SignRequest],
) -> Result<()> {
    if flow != SignatureFlow::OrderedNumeric {
        return Ok(());
    }
    let waiting_on = signers
        .iter()
        .filter(|s| s.id != request.id && s.signing_order < request.signing_order && !s.is_signed())
        .map(|s| s.signing_order)
        .min();
    match waiting_on {
        Some(waiting_on) => Err(Error::StateConflict(Conflict::SigningOrder { waiting_on })),
        None => Ok(()),
    }
}

/// Orchestrates signers, identification and signing over the store.
pub struct SigningWorkflow<S> {
    store: Arc<S>,
    verifier: IdentifyVerifier,
    docmdp: DocMdpHandler,
    signing: SigningDefaults,
}

impl<S> SigningWorkflow<S>
where
    S: DocumentRepository + SignRequestRepository + IdentifyMethodRepository + BlobStorage,
{
    pub fn new(store: Arc<S>, config: &SignOxideConfig) -> Self {
        Self {
            store,
            verifier: IdentifyVerifier::new(config.identify.clone()),
            docmdp: DocMdpHandler::new().with_parser_options(config.parser),
            signing: config.signing.clone(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Register a document. Envelopes carry no bytes and children must
    /// point at an envelope.
    pub fn create_document(&self, document: Document) -> Result<Document> {
        if document.is_envelope() {
            if document.node_id.is_some() || document.parent_id.is_some() {
                return Err(Error::Validation("an envelope has no bytes and no parent".to_string()));
            }
        } else if document.node_id.is_none() {
            return Err(Error::Validation(format!("file {} has no blob", document.name)));
        }
        if let Some(parent_id) = document.parent_id {
            if !self.store.get_document(parent_id)?.is_envelope() {
                return Err(Error::Validation(format!("document {} is not an envelope", parent_id)));
            }
        }
        self.store.insert_document(document)
    }

    /// Add a signer to a file. Under ordered flow it goes after the current
    /// last signer.
    pub fn add_signer(&self, document_id: u64, display_name: &str) -> Result<SignRequest> {
        let document = self.store.get_document(document_id)?;
        if document.is_envelope() {
            return Err(Error::Validation(
                "signers are added to envelope children, not the envelope".to_string(),
            ));
        }
        let mut request = SignRequest::new(document_id, display_name);
        if document.signature_flow == SignatureFlow::OrderedNumeric {
            request.signing_order = self
                .store
                .sign_requests_for_document(document_id)?
                .iter()
                .map(|s| s.signing_order)
                .max()
                .unwrap_or(0)
                + 1;
        }
        let request = self.store.insert_sign_request(request)?;
        log::debug!(
            "Added signer {} to document {} at order {}",
            request.id,
            document_id,
            request.signing_order
        );
        Ok(request)
    }

    /// Attach an identify method to a signer.
    pub fn add_identify_method(
        &self,
        sign_request_id: u64,
        kind: IdentifyMethodKind,
        value: &str,
        mandatory: bool,
    ) -> Result<IdentifyMethod> {
        self.store.get_sign_request(sign_request_id)?;
        let mut method = IdentifyMethod::new(sign_request_id, kind, value);
        method.mandatory = mandatory;
        self.store.insert_identify_method(method)
    }

    /// Remove an unsigned signer and close the gap it leaves in the order.
    pub fn delete_signer(&self, sign_request_id: u64) -> Result<()> {
        let request = self.store.get_sign_request(sign_request_id)?;
        if request.is_signed() {
            return Err(Error::StateConflict(Conflict::AlreadySigned));
        }
        let document = self.store.get_document(request.document_id)?;
        self.store.delete_identify_methods_for(sign_request_id)?;
        self.store.delete_sign_request(sign_request_id)?;

        if document.signature_flow == SignatureFlow::OrderedNumeric {
            let remaining = self.store.sign_requests_for_document(document.id)?;
            for (position, mut signer) in remaining.into_iter().enumerate() {
                let order = position as u32 + 1;
                if signer.signing_order != order {
                    signer.signing_order = order;
                    self.store.update_sign_request(&signer)?;
                }
            }
        }
        log::debug!("Deleted signer {} from document {}", sign_request_id, document.id);
        Ok(())
    }

    /// Move every draft signer to `able_to_sign`; on an envelope, every
    /// child's signers. Returns how many signers moved.
    pub fn request_signatures(&self, document_id: u64) -> Result<usize> {
        let document = self.store.get_document(document_id)?;
        let documents = if document.is_envelope() {
            self.store.children(document.id)?
        } else {
            vec![document]
        };
        let mut moved = 0;
        for document in &documents {
            for mut signer in self.store.sign_requests_for_document(document.id)? {
                if signer.status == SignRequestStatus::Draft {
                    signer.status = SignRequestStatus::AbleToSign;
                    self.store.update_sign_request(&signer)?;
                    moved += 1;
                }
            }
        }
        log::info!("Requested signatures on document {} ({} signers)", document_id, moved);
        Ok(moved)
    }

    /// Derived status of a file or an envelope.
    pub fn document_status(&self, document_id: u64) -> Result<DocumentStatus> {
        let document = self.store.get_document(document_id)?;
        if document.is_envelope() {
            let children = self
                .store
                .children(document.id)?
                .iter()
                .map(|child| Ok(document_status(&self.store.sign_requests_for_document(child.id)?)))
                .collect::<Result<Vec<_>>>()?;
            return Ok(envelope_status(&children));
        }
        Ok(document_status(&self.store.sign_requests_for_document(document.id)?))
    }

    /// Progress of one physical signer across an envelope's children.
    pub fn envelope_progress(
        &self,
        envelope_id: u64,
        identity: &SignerIdentity,
    ) -> Result<EnvelopeProgress> {
        let envelope = self.store.get_document(envelope_id)?;
        if !envelope.is_envelope() {
            return Err(Error::Validation(format!("document {} is not an envelope", envelope_id)));
        }
        let mut children = Vec::new();
        for child in self.store.children(envelope.id)? {
            let sign_requests = self.store.sign_requests_for_document(child.id)?;
            let mut identify_methods = Vec::new();
            for request in &sign_requests {
                identify_methods.extend(self.store.identify_methods_for(request.id)?);
            }
            children.push(ChildSigners {
                document_id: child.id,
                sign_requests,
                identify_methods,
            });
        }
        Ok(compute_progress(identity, &children))
    }

    /// Why `sign_request_id` cannot sign right now, if anything.
    pub fn check_can_sign(&self, sign_request_id: u64) -> Result<()> {
        let request = self.store.get_sign_request(sign_request_id)?;
        let document = self.store.get_document(request.document_id)?;
        let signers = self.store.sign_requests_for_document(document.id)?;
        self.check_signer(&document, &request, &signers)
    }

    /// Whether `sign_request_id` may sign right now.
    pub fn can_sign(&self, sign_request_id: u64) -> Result<bool> {
        match self.check_can_sign(sign_request_id) {
            Ok(()) => Ok(true),
            Err(Error::StateConflict(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn check_signer(
        &self,
        document: &Document,
        request: &SignRequest,
        signers: &[SignRequest],
    ) -> Result<()> {
        match request.status {
            SignRequestStatus::Signed => return Err(Error::StateConflict(Conflict::AlreadySigned)),
            SignRequestStatus::Draft => {
                return Err(Error::StateConflict(Conflict::NotAbleToSign(
                    "signatures were not requested from this signer".to_string(),
                )))
            },
            SignRequestStatus::AbleToSign => {},
        }
        let status = document_status(signers);
        if !matches!(status, DocumentStatus::AbleToSign | DocumentStatus::PartialSigned) {
            return Err(Error::StateConflict(Conflict::NotAbleToSign(format!(
                "document is {:?}",
                status
            ))));
        }
        if !is_identified(&self.store.identify_methods_for(request.id)?) {
            return Err(Error::StateConflict(Conflict::NotAbleToSign(
                "signer is not identified".to_string(),
            )));
        }
        check_signing_order(document.signature_flow, request, signers)
    }

    fn identify_method(
        &self,
        sign_request_id: u64,
        identifier_key: &str,
    ) -> Result<IdentifyMethod> {
        self.store
            .identify_methods_for(sign_request_id)?
            .into_iter()
            .find(|m| m.identifier_key == identifier_key)
            .ok_or_else(|| {
                Error::not_found(
                    "identify method",
                    format!("{}:{}", sign_request_id, identifier_key),
                )
            })
    }

    /// Issue a one-time code for a signer's token method. The plaintext is
    /// returned for delivery; only its digest is stored.
    pub fn send_code(&self, sign_request_id: u64, identifier_key: &str) -> Result<String> {
        let mut method = self.identify_method(sign_request_id, identifier_key)?;
        let code = self.verifier.issue_code(&mut method, Utc::now())?;
        self.store.update_identify_method(&method)?;
        Ok(code)
    }

    /// Check a submitted code. The method row is persisted whatever the
    /// outcome, so failed attempts are counted.
    pub fn identify(
        &self,
        sign_request_id: u64,
        identifier_key: &str,
        code: &str,
    ) -> Result<VerifyOutcome> {
        let mut method = self.identify_method(sign_request_id, identifier_key)?;
        let outcome = self.verifier.verify(&mut method, code, Utc::now());
        self.store.update_identify_method(&method)?;
        outcome
    }

    /// Confirm a passive identify method (account, email).
    pub fn confirm_identity(&self, sign_request_id: u64, identifier_key: &str) -> Result<()> {
        let mut method = self.identify_method(sign_request_id, identifier_key)?;
        self.verifier.mark_identified(&mut method, Utc::now())?;
        self.store.update_identify_method(&method)
    }

    /// Embed a signature for `sign_request_id` and persist the result.
    ///
    /// The first signature certifies the document when its DocMDP level
    /// is non-zero; later ones must be allowed by the certification.
    /// Everything that can fail on the signed bytes runs before the first
    /// write. The document row is then claimed against the `signed_hash`
    /// read at the start, so a signer racing on the same base gets
    /// [`Conflict::ConcurrentUpdate`] instead of overwriting the other
    /// signature. A failed blob or signer write undoes the claim.
    pub fn sign(
        &self,
        sign_request_id: u64,
        credentials: SigningCredentials,
        ca_chain: &[Vec<u8>],
    ) -> Result<Document> {
        let mut request = self.store.get_sign_request(sign_request_id)?;
        let mut document = self.store.get_document(request.document_id)?;
        let signers = self.store.sign_requests_for_document(document.id)?;
        self.check_signer(&document, &request, &signers)?;

        let node_id = document
            .node_id
            .ok_or_else(|| Error::Validation(format!("document {} has no bytes", document.id)))?;
        let bytes = self.store.read(node_id)?;
        if let Some(expected) = &document.signed_hash {
            let actual = sha256_hex(&bytes);
            if &actual != expected {
                return Err(Error::Integrity(format!(
                    "document {} changed since its last signature (hash {} != {})",
                    document.id, actual, expected
                )));
            }
        }

        let first = !signers.iter().any(SignRequest::is_signed);
        let certify = first && document.docmdp_level != DocMdpLevel::None;
        if !certify && !self.docmdp.allows_additional_signatures(&bytes)? {
            document.modification_status = ModificationStatus::Violation;
            self.store.update_document(&document)?;
            return Err(Error::Integrity(format!(
                "DocMDP certification of document {} forbids another signature",
                document.id
            )));
        }

        let mut options =
            SignOptions::from_defaults(&self.signing).with_name(request.display_name.clone());
        if certify {
            options = options.with_certification(document.docmdp_level);
        }
        let signed = PdfSigner::new(credentials, options).sign_document(&bytes, ca_chain)?;

        let previous = document.clone();
        if let Some(cert) = self.docmdp.certification(&signed)? {
            let certified = signed.get(..cert.certified_len).ok_or_else(|| {
                Error::InvalidPdf("certified revision extends past the end of the file".to_string())
            })?;
            document.modification_status = self
                .docmdp
                .compute_modification_status(certified, &signed, cert.level)?;
        }
        document.signed_hash = Some(sha256_hex(&signed));

        let claimed = self
            .store
            .compare_and_update_document(&document, previous.signed_hash.as_deref())?;
        if !claimed {
            return Err(Error::StateConflict(Conflict::ConcurrentUpdate(format!(
                "document {} was signed by someone else meanwhile",
                document.id
            ))));
        }
        request.status = SignRequestStatus::Signed;
        request.signed_at = Some(Utc::now());
        let persisted = self
            .store
            .write(node_id, &signed)
            .and_then(|()| self.store.update_sign_request(&request));
        if let Err(e) = persisted {
            self.roll_back_signature(&previous, &document, node_id, &bytes);
            return Err(e);
        }
        log::info!(
            "Signer {} signed document {}{}",
            request.id,
            document.id,
            if certify { " (certified)" } else { "" }
        );
        Ok(document)
    }

    /// Restore the bytes and the document row a failed [`sign`](Self::sign)
    /// had claimed. Errors are logged; the caller reports the original one.
    fn roll_back_signature(
        &self,
        previous: &Document,
        claimed: &Document,
        node_id: u64,
        original: &[u8],
    ) {
        if let Err(e) = self.store.write(node_id, original) {
            log::error!("Could not restore blob {} of document {}: {}", node_id, previous.id, e);
        }
        match self
            .store
            .compare_and_update_document(previous, claimed.signed_hash.as_deref())
        {
            Ok(true) => log::debug!("Rolled back signature claim on document {}", previous.id),
            Ok(false) => log::warn!(
                "Document {} changed before its signature claim was rolled back",
                previous.id
            ),
            Err(e) => log::error!("Could not roll back document {}: {}", previous.id, e),
        }
    }
}
