//! Limits applied while inspecting PDF bytes.
//!
//! Signed documents come from untrusted uploads, so every walk over the
//! revision chain, object graph and decompressed streams is bounded.
//!
//! # Example
//!
//! ```
//! use sign_oxide::parser_config::ParserOptions;
//!
//! let strict = ParserOptions::strict();
//! assert!(strict.strict);
//!
//! let custom = ParserOptions {
//!     max_revisions: 32,
//!     ..ParserOptions::lenient()
//! };
//! assert_eq!(custom.max_revisions, 32);
//! ```

use serde::{Deserialize, Serialize};

/// Parser options for bounding PDF inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserOptions {
    /// Fail on structural irregularities (true) or tolerate them (false)
    ///
    /// Lenient mode accepts a missing EOL after `stream`, a `/Length` that
    /// is an indirect reference, and xref rows with trailing garbage.
    pub strict: bool,

    /// Maximum object nesting depth
    ///
    /// PDF Spec: ISO 32000-1:2008, Section H.1 - Implementation Limits
    pub max_nesting: usize,

    /// Maximum number of incremental-update sections followed via `/Prev`
    pub max_revisions: usize,

    /// Maximum decompressed stream size in bytes (0 = unlimited)
    pub max_decompressed_size: usize,

    /// Maximum PDF file size in bytes (0 = unlimited)
    pub max_file_size: usize,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self::lenient()
    }
}

impl ParserOptions {
    /// Strict mode: reject anything the PDF specification does not allow.
    pub fn strict() -> Self {
        Self {
            strict: true,
            max_nesting: 100,
            max_revisions: 100,
            max_decompressed_size: 100 * 1024 * 1024,
            max_file_size: 500 * 1024 * 1024,
        }
    }

    /// Lenient mode: tolerate the irregularities real signing tools produce.
    pub fn lenient() -> Self {
        Self {
            strict: false,
            max_nesting: 100,
            max_revisions: 100,
            max_decompressed_size: 100 * 1024 * 1024,
            max_file_size: 500 * 1024 * 1024,
        }
    }

    /// Check a file size against `max_file_size`.
    pub(crate) fn accepts_file_size(&self, len: usize) -> bool {
        self.max_file_size == 0 || len <= self.max_file_size
    }
}
