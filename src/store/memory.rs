//! In-memory adapter for every store trait.

use super::{
    AppConfigStore, BlobStorage, Counter, CrlRepository, DocumentRepository,
    IdentifyMethodRepository, SignRequestRepository,
};
use crate::crl::{CrlEntry, CrlStatus};
use crate::error::{Conflict, Error, Result};
use crate::identify::IdentifyMethod;
use crate::workflow::{Document, SignRequest};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    blobs: HashMap<u64, Vec<u8>>,
    counters: HashMap<String, u64>,
    config: BTreeMap<String, String>,
    documents: BTreeMap<u64, Document>,
    sign_requests: BTreeMap<u64, SignRequest>,
    identify_methods: BTreeMap<u64, IdentifyMethod>,
    crl: BTreeMap<u64, CrlEntry>,
}

impl State {
    fn allocate_id(&mut self) -> u64 {
        self.next_id = self.next_id.saturating_add(1);
        self.next_id
    }
}

/// Thread-safe store used by tests and embedders without a database.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
    fail_blob_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Optional failure-injection mode for tests.
    pub fn with_fail_blob_writes(self, fail: bool) -> Self {
        self.set_fail_blob_writes(fail);
        self
    }

    pub fn set_fail_blob_writes(&self, fail: bool) {
        self.fail_blob_writes.store(fail, Ordering::SeqCst);
    }

    /// Store a blob under a fresh node id.
    pub fn put_blob(&self, bytes: Vec<u8>) -> u64 {
        let mut state = self.state.write();
        let id = state.allocate_id();
        state.blobs.insert(id, bytes);
        id
    }
}

impl BlobStorage for InMemoryStore {
    fn read(&self, node_id: u64) -> Result<Vec<u8>> {
        self.state
            .read()
            .blobs
            .get(&node_id)
            .cloned()
            .ok_or_else(|| Error::not_found("blob", node_id))
    }

    fn write(&self, node_id: u64, bytes: &[u8]) -> Result<()> {
        if self.fail_blob_writes.load(Ordering::SeqCst) {
            return Err(Error::RetryableInfra(format!("blob {} is not writable", node_id)));
        }
        self.state.write().blobs.insert(node_id, bytes.to_vec());
        Ok(())
    }
}

impl Counter for InMemoryStore {
    fn current(&self, name: &str) -> Result<u64> {
        Ok(self.state.read().counters.get(name).copied().unwrap_or(0))
    }

    fn compare_and_swap(&self, name: &str, expected: u64, new: u64) -> Result<bool> {
        let mut state = self.state.write();
        let slot = state.counters.entry(name.to_string()).or_insert(0);
        if *slot != expected {
            return Ok(false);
        }
        *slot = new;
        Ok(true)
    }
}

impl AppConfigStore for InMemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.state.read().config.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.state.write().config.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.state.write().config.remove(key);
        Ok(())
    }
}

impl DocumentRepository for InMemoryStore {
    fn insert_document(&self, mut document: Document) -> Result<Document> {
        let mut state = self.state.write();
        if state.documents.values().any(|d| d.uuid == document.uuid) {
            return Err(Error::StateConflict(Conflict::Duplicate(format!(
                "document uuid {}",
                document.uuid
            ))));
        }
        document.id = state.allocate_id();
        state.documents.insert(document.id, document.clone());
        Ok(document)
    }

    fn get_document(&self, id: u64) -> Result<Document> {
        self.state
            .read()
            .documents
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("document", id))
    }

    fn find_document_by_uuid(&self, uuid: Uuid) -> Result<Option<Document>> {
        Ok(self.state.read().documents.values().find(|d| d.uuid == uuid).cloned())
    }

    fn update_document(&self, document: &Document) -> Result<()> {
        let mut state = self.state.write();
        let slot = state
            .documents
            .get_mut(&document.id)
            .ok_or_else(|| Error::not_found("document", document.id))?;
        *slot = document.clone();
        Ok(())
    }

    fn compare_and_update_document(
        &self,
        document: &Document,
        expected_signed_hash: Option<&str>,
    ) -> Result<bool> {
        let mut state = self.state.write();
        let slot = state
            .documents
            .get_mut(&document.id)
            .ok_or_else(|| Error::not_found("document", document.id))?;
        if slot.signed_hash.as_deref() != expected_signed_hash {
            return Ok(false);
        }
        *slot = document.clone();
        Ok(true)
    }

    fn children(&self, parent_id: u64) -> Result<Vec<Document>> {
        Ok(self
            .state
            .read()
            .documents
            .values()
            .filter(|d| d.parent_id == Some(parent_id))
            .cloned()
            .collect())
    }
}

impl SignRequestRepository for InMemoryStore {
    fn insert_sign_request(&self, mut request: SignRequest) -> Result<SignRequest> {
        let mut state = self.state.write();
        request.id = state.allocate_id();
        state.sign_requests.insert(request.id, request.clone());
        Ok(request)
    }

    fn get_sign_request(&self, id: u64) -> Result<SignRequest> {
        self.state
            .read()
            .sign_requests
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("sign request", id))
    }

    fn update_sign_request(&self, request: &SignRequest) -> Result<()> {
        let mut state = self.state.write();
        let slot = state
            .sign_requests
            .get_mut(&request.id)
            .ok_or_else(|| Error::not_found("sign request", request.id))?;
        *slot = request.clone();
        Ok(())
    }

    fn delete_sign_request(&self, id: u64) -> Result<()> {
        self.state
            .write()
            .sign_requests
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("sign request", id))
    }

    fn sign_requests_for_document(&self, document_id: u64) -> Result<Vec<SignRequest>> {
        let mut out: Vec<SignRequest> = self
            .state
            .read()
            .sign_requests
            .values()
            .filter(|r| r.document_id == document_id)
            .cloned()
            .collect();
        out.sort_by_key(|r| (r.signing_order, r.id));
        Ok(out)
    }
}

impl IdentifyMethodRepository for InMemoryStore {
    fn insert_identify_method(&self, mut method: IdentifyMethod) -> Result<IdentifyMethod> {
        let mut state = self.state.write();
        let duplicate = state.identify_methods.values().any(|m| {
            m.sign_request_id == method.sign_request_id
                && m.identifier_key == method.identifier_key
                && m.identifier_value == method.identifier_value
        });
        if duplicate {
            return Err(Error::StateConflict(Conflict::Duplicate(format!(
                "identify method {}:{} on sign request {}",
                method.identifier_key, method.identifier_value, method.sign_request_id
            ))));
        }
        method.id = state.allocate_id();
        state.identify_methods.insert(method.id, method.clone());
        Ok(method)
    }

    fn update_identify_method(&self, method: &IdentifyMethod) -> Result<()> {
        let mut state = self.state.write();
        let slot = state
            .identify_methods
            .get_mut(&method.id)
            .ok_or_else(|| Error::not_found("identify method", method.id))?;
        *slot = method.clone();
        Ok(())
    }

    fn identify_methods_for(&self, sign_request_id: u64) -> Result<Vec<IdentifyMethod>> {
        Ok(self
            .state
            .read()
            .identify_methods
            .values()
            .filter(|m| m.sign_request_id == sign_request_id)
            .cloned()
            .collect())
    }

    fn delete_identify_methods_for(&self, sign_request_id: u64) -> Result<()> {
        self.state
            .write()
            .identify_methods
            .retain(|_, m| m.sign_request_id != sign_request_id);
        Ok(())
    }
}

impl CrlRepository for InMemoryStore {
    fn insert_crl_entry(&self, entry: CrlEntry) -> Result<()> {
        let mut state = self.state.write();
        if state.crl.contains_key(&entry.serial_number) {
            return Err(Error::StateConflict(Conflict::Duplicate(format!(
                "serial number {}",
                entry.serial_number
            ))));
        }
        state.crl.insert(entry.serial_number, entry);
        Ok(())
    }

    fn get_crl_entry(&self, serial_number: u64) -> Result<Option<CrlEntry>> {
        Ok(self.state.read().crl.get(&serial_number).cloned())
    }

    fn update_crl_entry(&self, entry: &CrlEntry, expected: CrlStatus) -> Result<bool> {
        let mut state = self.state.write();
        match state.crl.get_mut(&entry.serial_number) {
            Some(slot) if slot.status == expected => {
                *slot = entry.clone();
                Ok(true)
            },
            Some(_) => Ok(false),
            None => Err(Error::not_found("certificate", entry.serial_number)),
        }
    }

    fn crl_entries(&self) -> Result<Vec<CrlEntry>> {
        Ok(self.state.read().crl.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_counter_compare_and_swap() {
        let store = InMemoryStore::new();
        assert_eq!(store.current("c").unwrap(), 0);
        assert!(store.compare_and_swap("c", 0, 1).unwrap());
        assert!(!store.compare_and_swap("c", 0, 2).unwrap());
        assert_eq!(store.current("c").unwrap(), 1);
    }

    #[test]
    fn test_blob_fail_injection() {
        let store = InMemoryStore::new();
        let id = store.put_blob(b"abc".to_vec());
        store.set_fail_blob_writes(true);
        let err = store.write(id, b"xyz").unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.read(id).unwrap(), b"abc");
        assert!(matches!(store.read(999), Err(Error::NotFound { .. })));
    }

    #[test]
    fn test_duplicate_serial_is_conflict() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.insert_crl_entry(CrlEntry::issued(5, "a", now, now)).unwrap();
        let err = store.insert_crl_entry(CrlEntry::issued(5, "b", now, now)).unwrap_err();
        assert!(matches!(err, Error::StateConflict(Conflict::Duplicate(_))));
    }

    #[test]
    fn test_document_uuid_is_unique() {
        let store = InMemoryStore::new();
        let doc = store.insert_document(Document::file("a.pdf", 1)).unwrap();
        let mut copy = Document::file("b.pdf", 2);
        copy.uuid = doc.uuid;
        assert!(store.insert_document(copy).is_err());
        assert_eq!(store.find_document_by_uuid(doc.uuid).unwrap().unwrap().id, doc.id);
    }

    #[test]
    fn test_document_update_guarded_by_signed_hash() {
        let store = InMemoryStore::new();
        let mut doc = store.insert_document(Document::file("a.pdf", 1)).unwrap();
        doc.signed_hash = Some("h1".to_string());
        assert!(store.compare_and_update_document(&doc, None).unwrap());

        let mut rival = doc.clone();
        rival.signed_hash = Some("h2".to_string());
        assert!(!store.compare_and_update_document(&rival, None).unwrap());
        assert_eq!(store.get_document(doc.id).unwrap().signed_hash.as_deref(), Some("h1"));
        assert!(store.compare_and_update_document(&rival, Some("h1")).unwrap());

        let mut missing = Document::file("b.pdf", 2);
        missing.id = 99;
        assert!(matches!(
            store.compare_and_update_document(&missing, None),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_sign_requests_sorted_by_order() {
        let store = InMemoryStore::new();
        let mut second = SignRequest::new(1, "b");
        second.signing_order = 2;
        store.insert_sign_request(second).unwrap();
        store.insert_sign_request(SignRequest::new(1, "a")).unwrap();
        let names: Vec<_> = store
            .sign_requests_for_document(1)
            .unwrap()
            .into_iter()
            .map(|r| r.display_name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
