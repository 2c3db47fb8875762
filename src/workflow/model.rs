//! Documents and signers.

use crate::docmdp::{DocMdpLevel, ModificationStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    File,
    Envelope,
}

/// How signers on one document are sequenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureFlow {
    #[default]
    None,
    Parallel,
    OrderedNumeric,
}

/// Per-signer status. `Signed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignRequestStatus {
    #[default]
    Draft = 0,
    AbleToSign = 1,
    Signed = 2,
}

impl SignRequestStatus {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Aggregate document status, always derived from the signers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    AbleToSign,
    PartialSigned,
    Signed,
}

/// A standalone file, an envelope, or an envelope child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: u64,
    pub uuid: Uuid,
    pub name: String,
    pub node_type: NodeType,
    /// Set only for envelope children
    pub parent_id: Option<u64>,
    /// Blob holding the bytes; envelopes have none
    pub node_id: Option<u64>,
    pub docmdp_level: DocMdpLevel,
    pub modification_status: ModificationStatus,
    pub signature_flow: SignatureFlow,
    /// SHA-256 hex of the last finalized bytes
    pub signed_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Document {
    /// A standalone signable file stored at blob `node_id`.
    pub fn file(name: impl Into<String>, node_id: u64) -> Self {
        Self {
            id: 0,
            uuid: Uuid::new_v4(),
            name: name.into(),
            node_type: NodeType::File,
            parent_id: None,
            node_id: Some(node_id),
            docmdp_level: DocMdpLevel::None,
            modification_status: ModificationStatus::Unchecked,
            signature_flow: SignatureFlow::None,
            signed_hash: None,
            created_at: Utc::now(),
        }
    }

    /// An envelope; it never carries bytes of its own.
    pub fn envelope(name: impl Into<String>) -> Self {
        Self {
            node_type: NodeType::Envelope,
            node_id: None,
            ..Self::file(name, 0)
        }
    }

    /// A child of envelope `parent_id`.
    pub fn child_of(parent_id: u64, name: impl Into<String>, node_id: u64) -> Self {
        Self {
            parent_id: Some(parent_id),
            ..Self::file(name, node_id)
        }
    }

    pub fn with_flow(mut self, flow: SignatureFlow) -> Self {
        self.signature_flow = flow;
        self
    }

    pub fn with_docmdp_level(mut self, level: DocMdpLevel) -> Self {
        self.docmdp_level = level;
        self
    }

    pub fn is_envelope(&self) -> bool {
        self.node_type == NodeType::Envelope
    }
}

/// A signer on one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignRequest {
    pub id: u64,
    pub uuid: Uuid,
    pub document_id: u64,
    pub display_name: String,
    /// Meaningful only under [`SignatureFlow::OrderedNumeric`]
    pub signing_order: u32,
    pub status: SignRequestStatus,
    pub signed_at: Option<DateTime<Utc>>,
}

impl SignRequest {
    pub fn new(document_id: u64, display_name: impl Into<String>) -> Self {
        Self {
            id: 0,
            uuid: Uuid::new_v4(),
            document_id,
            display_name: display_name.into(),
            signing_order: 1,
            status: SignRequestStatus::Draft,
            signed_at: None,
        }
    }

    pub fn is_signed(&self) -> bool {
        self.status == SignRequestStatus::Signed
    }
}

/// `(identifierKey, identifierValue)` naming one physical signer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignerIdentity {
    pub key: String,
    pub value: String,
}

impl SignerIdentity {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_has_no_bytes() {
        let envelope = Document::envelope("bundle");
        assert!(envelope.is_envelope());
        assert_eq!(envelope.node_id, None);
        let child = Document::child_of(7, "a.pdf", 3);
        assert_eq!(child.parent_id, Some(7));
        assert_eq!(child.node_type, NodeType::File);
    }

    #[test]
    fn test_status_codes_and_order() {
        assert_eq!(SignRequestStatus::Draft.code(), 0);
        assert_eq!(SignRequestStatus::Signed.code(), 2);
        assert!(SignRequestStatus::AbleToSign < SignRequestStatus::Signed);
        assert!(DocumentStatus::PartialSigned > DocumentStatus::AbleToSign);
    }

    #[test]
    fn test_flow_serde() {
        let json = serde_json::to_string(&SignatureFlow::OrderedNumeric).unwrap();
        assert_eq!(json, "\"ordered_numeric\"");
    }
}
