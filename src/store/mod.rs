//! Persistence boundary.
//!
//! The host application owns the database and the file storage; the core
//! talks to them only through these traits. Every trait takes `&self` and
//! is `Send + Sync` so one adapter can be shared across requests.
//!
//! Uniqueness constraints (`serialNumber`, document `uuid`, and
//! `(signRequestId, identifierKey, identifierValue)`) are enforced by the
//! repositories and reported as [`Conflict::Duplicate`](crate::error::Conflict::Duplicate).

pub mod memory;

use crate::crl::{CrlEntry, CrlStatus};
use crate::error::Result;
use crate::identify::IdentifyMethod;
use crate::workflow::{Document, SignRequest};
use uuid::Uuid;

pub use memory::InMemoryStore;

/// Counter holding the latest CA generation.
pub const CA_GENERATION_COUNTER: &str = "ca_generation";

/// Counter holding the latest CRL number.
pub const CRL_NUMBER_COUNTER: &str = "crl_number";

/// Opaque blob storage addressed by node id.
pub trait BlobStorage: Send + Sync {
    fn read(&self, node_id: u64) -> Result<Vec<u8>>;
    fn write(&self, node_id: u64, bytes: &[u8]) -> Result<()>;
}

/// Persisted monotonic counters with compare-and-swap updates.
pub trait Counter: Send + Sync {
    /// Current value; 0 for a counter that was never written.
    fn current(&self, name: &str) -> Result<u64>;

    /// Set `name` to `new` if it still holds `expected`. Returns whether the
    /// swap happened.
    fn compare_and_swap(&self, name: &str, expected: u64, new: u64) -> Result<bool>;
}

/// Application configuration key/value store.
pub trait AppConfigStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

pub trait DocumentRepository: Send + Sync {
    /// Store a new document and return it with its assigned id.
    fn insert_document(&self, document: Document) -> Result<Document>;
    fn get_document(&self, id: u64) -> Result<Document>;
    fn find_document_by_uuid(&self, uuid: Uuid) -> Result<Option<Document>>;
    fn update_document(&self, document: &Document) -> Result<()>;
    /// Replace the row only if its stored `signed_hash` still equals
    /// `expected_signed_hash`. Returns whether the update happened.
    fn compare_and_update_document(
        &self,
        document: &Document,
        expected_signed_hash: Option<&str>,
    ) -> Result<bool>;
    /// Children of an envelope, by id.
    fn children(&self, parent_id: u64) -> Result<Vec<Document>>;
}

pub trait SignRequestRepository: Send + Sync {
    fn insert_sign_request(&self, request: SignRequest) -> Result<SignRequest>;
    fn get_sign_request(&self, id: u64) -> Result<SignRequest>;
    fn update_sign_request(&self, request: &SignRequest) -> Result<()>;
    fn delete_sign_request(&self, id: u64) -> Result<()>;
    /// Signers of a document ordered by `signing_order`, then id.
    fn sign_requests_for_document(&self, document_id: u64) -> Result<Vec<SignRequest>>;
}

pub trait IdentifyMethodRepository: Send + Sync {
    fn insert_identify_method(&self, method: IdentifyMethod) -> Result<IdentifyMethod>;
    fn update_identify_method(&self, method: &IdentifyMethod) -> Result<()>;
    fn identify_methods_for(&self, sign_request_id: u64) -> Result<Vec<IdentifyMethod>>;
    fn delete_identify_methods_for(&self, sign_request_id: u64) -> Result<()>;
}

pub trait CrlRepository: Send + Sync {
    fn insert_crl_entry(&self, entry: CrlEntry) -> Result<()>;
    fn get_crl_entry(&self, serial_number: u64) -> Result<Option<CrlEntry>>;

    /// Replace the stored entry if its status is still `expected`. Returns
    /// whether the row was written.
    fn update_crl_entry(&self, entry: &CrlEntry, expected: CrlStatus) -> Result<bool>;

    /// All entries ordered by serial number.
    fn crl_entries(&self) -> Result<Vec<CrlEntry>>;
}
