//! Structural PDF layer.
//!
//! Just enough of ISO 32000 to sign and audit documents: objects, the
//! cross-reference chain of incremental updates, object streams, and an
//! append-only writer. Content streams are never interpreted.

pub mod file;
pub mod filters;
pub mod lexer;
pub mod object;
pub mod parser;
pub mod writer;
pub mod xref;

pub use file::{PdfFile, Revision};
pub use object::{Dictionary, Object, ObjectRef};
pub use writer::{IncrementalUpdate, ObjectSerializer, UpdateOutput};
