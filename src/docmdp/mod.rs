//! DocMDP (modification detection and prevention) enforcement.
//!
//! A certifying signature declares, through `/Perms /DocMDP` and the
//! `/TransformParams /P` entry of its signature reference, which later
//! incremental updates are acceptable. [`DocMdpHandler`] reads that
//! declaration and audits every revision appended after the certified one.
//!
//! ## PDF Specification Reference
//!
//! - ISO 32000-1:2008 Section 12.8.2.2 - DocMDP

pub mod diff;

pub use diff::{changes_after, Change, ChangeClass};

use crate::error::{Error, Result};
use crate::parser_config::ParserOptions;
use crate::pdf::object::Object;
use crate::pdf::PdfFile;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Certification permission level (`/P` of the DocMDP transform).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DocMdpLevel {
    /// Not certified
    #[default]
    None = 0,
    /// No changes except adding the certification itself
    NoChanges = 1,
    /// Form filling and signing
    FormFill = 2,
    /// Form filling, signing and annotations
    FormFillAndAnnotations = 3,
}

impl DocMdpLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether a change of `class` is acceptable under this level.
    pub fn tolerates(self, class: ChangeClass) -> bool {
        let most_severe = match self {
            DocMdpLevel::None => ChangeClass::Content,
            DocMdpLevel::NoChanges => ChangeClass::Signature,
            DocMdpLevel::FormFill => ChangeClass::FormFill,
            DocMdpLevel::FormFillAndAnnotations => ChangeClass::Annotation,
        };
        class <= most_severe
    }
}

impl TryFrom<u8> for DocMdpLevel {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(DocMdpLevel::None),
            1 => Ok(DocMdpLevel::NoChanges),
            2 => Ok(DocMdpLevel::FormFill),
            3 => Ok(DocMdpLevel::FormFillAndAnnotations),
            other => Err(Error::Validation(format!("DocMDP level must be 0..=3, got {}", other))),
        }
    }
}

impl From<DocMdpLevel> for u8 {
    fn from(level: DocMdpLevel) -> Self {
        level.as_u8()
    }
}

impl fmt::Display for DocMdpLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DocMdpLevel::None => "none",
            DocMdpLevel::NoChanges => "no_changes_allowed",
            DocMdpLevel::FormFill => "form_fill_allowed",
            DocMdpLevel::FormFillAndAnnotations => "form_fill_and_annotations_allowed",
        })
    }
}

/// Outcome of auditing a document against its certification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModificationStatus {
    /// No comparison has run yet
    #[default]
    Unchecked,
    Unmodified,
    Allowed,
    Violation,
}

/// The certifying signature of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certification {
    pub level: DocMdpLevel,
    /// Length of the certified revision: where the certification's
    /// `/ByteRange` ends
    pub certified_len: usize,
}

/// Reader and auditor for DocMDP certification.
#[derive(Debug, Clone, Default)]
pub struct DocMdpHandler {
    options: ParserOptions,
}

impl DocMdpHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parser_options(mut self, options: ParserOptions) -> Self {
        self.options = options;
        self
    }

    /// The certification declared by `pdf`, if any.
    pub fn certification(&self, pdf: &[u8]) -> Result<Option<Certification>> {
        let file = PdfFile::parse(pdf.to_vec(), self.options)?;
        certification_of(&file)
    }

    /// Whether a new signature may be appended to `pdf`.
    ///
    /// Uncertified documents always accept one. Level 1 never does, since
    /// a new signature needs a new field. Levels 2 and 3 accept one unless
    /// the updates after the certified revision already break the level.
    pub fn allows_additional_signatures(&self, pdf: &[u8]) -> Result<bool> {
        let file = PdfFile::parse(pdf.to_vec(), self.options)?;
        let Some(cert) = certification_of(&file)? else {
            return Ok(true);
        };
        match cert.level {
            DocMdpLevel::None => Ok(true),
            DocMdpLevel::NoChanges => {
                log::debug!("Document is certified with no changes allowed");
                Ok(false)
            },
            level => {
                let changes = changes_after(&file, cert.certified_len)?;
                let status = status_for(&changes, level);
                log::debug!("Changes after certification at level {}: {:?}", level, status);
                Ok(status != ModificationStatus::Violation)
            },
        }
    }

    /// Classify the revisions `current` appends to `original` against
    /// `declared_level`.
    pub fn compute_modification_status(
        &self,
        original: &[u8],
        current: &[u8],
        declared_level: DocMdpLevel,
    ) -> Result<ModificationStatus> {
        let changes = match self.changes(original, current)? {
            Some(changes) => changes,
            None => {
                log::warn!("Current document does not extend the original; history was rewritten");
                return Ok(ModificationStatus::Violation);
            },
        };
        let status = status_for(&changes, declared_level);
        if status == ModificationStatus::Violation {
            for change in changes.iter().filter(|c| !declared_level.tolerates(c.class)) {
                log::warn!(
                    "DocMDP level {} forbids {:?} change of {} ({})",
                    declared_level,
                    change.class,
                    change.object,
                    change.detail
                );
            }
        }
        Ok(status)
    }

    /// Object changes `current` makes on top of `original`; `None` when
    /// `current` does not start with `original`.
    pub fn changes(&self, original: &[u8], current: &[u8]) -> Result<Option<Vec<Change>>> {
        if original.is_empty() {
            return Err(Error::Validation("original document is empty".to_string()));
        }
        if !current.starts_with(original) {
            return Ok(None);
        }
        if current.len() == original.len() {
            return Ok(Some(Vec::new()));
        }
        let file = PdfFile::parse(current.to_vec(), self.options)?;
        Ok(Some(changes_after(&file, original.len())?))
    }
}

fn status_for(changes: &[Change], level: DocMdpLevel) -> ModificationStatus {
    if changes.iter().all(|c| c.class == ChangeClass::Structural) {
        ModificationStatus::Unmodified
    } else if changes.iter().all(|c| level.tolerates(c.class)) {
        ModificationStatus::Allowed
    } else {
        ModificationStatus::Violation
    }
}

fn certification_of(file: &PdfFile) -> Result<Option<Certification>> {
    let catalog = file.catalog()?;
    let perms = match file.resolve_key(&catalog, "Perms")? {
        Some(Object::Dictionary(d)) => d,
        _ => return Ok(None),
    };
    let sig = match file.resolve_key(&perms, "DocMDP")? {
        Some(Object::Dictionary(d)) => d,
        _ => return Ok(None),
    };

    let mut level = DocMdpLevel::FormFill;
    if let Some(Object::Array(references)) = file.resolve_key(&sig, "Reference")? {
        for reference in references {
            let reference = file.resolve(&reference)?;
            if reference.get("TransformMethod").and_then(Object::as_name) != Some("DocMDP") {
                continue;
            }
            let p = match reference.get("TransformParams") {
                Some(params) => file.resolve(params)?.get("P").and_then(Object::as_integer),
                None => None,
            };
            // Out-of-range values fall back to the default, as readers do
            level = p
                .and_then(|p| u8::try_from(p).ok())
                .and_then(|p| DocMdpLevel::try_from(p).ok())
                .filter(|l| *l != DocMdpLevel::None)
                .unwrap_or(DocMdpLevel::FormFill);
        }
    }

    let byte_range = sig
        .get("ByteRange")
        .and_then(Object::as_array)
        .filter(|a| a.len() == 4)
        .ok_or_else(|| Error::InvalidPdf("certification signature has no /ByteRange".to_string()))?;
    let end = byte_range[2].as_integer().unwrap_or(0) + byte_range[3].as_integer().unwrap_or(0);
    let certified_len = usize::try_from(end)
        .map_err(|_| Error::InvalidPdf(format!("invalid certification /ByteRange end {}", end)))?;

    Ok(Some(Certification { level, certified_len }))
}
