//! Sign request and envelope workflow.
//!
//! - [`model`]: documents, signers and their statuses
//! - [`state_machine`]: transitions, the signing-order gate and signing
//! - [`progress`]: cross-document progress of one signer in an envelope

pub mod model;
pub mod progress;
pub mod state_machine;

pub use model::{
    Document, DocumentStatus, NodeType, SignRequest, SignRequestStatus, SignatureFlow,
    SignerIdentity,
};
pub use progress::{compute_progress, ChildSigners, EnvelopeProgress};
pub use state_machine::{check_signing_order, document_status, envelope_status, SigningWorkflow};
