//! # Core Type Definitions
//!
//! This module contains the identity and error types shared by every
//! component of the engine:
//! - Record identities (`RecordId`, `RecordHandle`)
//! - The per-record merge status machine (`RecordStatus`)
//! - Error types (`CorpusError`)
//!
//! ## Determinism Guarantees
//!
//! All types implement `Ord` so they can key `BTreeMap`/`BTreeSet`
//! deterministically. No floating-point anywhere.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// RECORD IDENTITIES
// =============================================================================

/// The stable identity of a record: its owning module and module-local name.
///
/// Within one module, names are pairwise distinct; the identifier registry
/// is the single source of truth for that invariant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId {
    /// The module that owns this record.
    pub module: String,
    /// The module-local name, unique within `module`.
    pub name: String,
}

impl RecordId {
    /// Create a record identity from its parts.
    #[must_use]
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
        }
    }

    /// Parse a reference string into an identity.
    ///
    /// A qualified reference is `module.name`; an unqualified one belongs
    /// to `default_module`.
    #[must_use]
    pub fn parse(reference: &str, default_module: &str) -> Self {
        match reference.split_once('.') {
            Some((module, name)) => Self::new(module, name),
            None => Self::new(default_module, reference),
        }
    }

}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.name)
    }
}

/// The pre-registration identity of a record in the external store:
/// a model name plus the store's numeric handle.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordHandle {
    /// The model this record instantiates.
    pub model: String,
    /// The store-assigned numeric id.
    pub id: u64,
}

impl RecordHandle {
    /// Create a handle from its parts.
    #[must_use]
    pub fn new(model: impl Into<String>, id: u64) -> Self {
        Self {
            model: model.into(),
            id,
        }
    }
}

impl fmt::Display for RecordHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.model, self.id)
    }
}

// =============================================================================
// RECORD STATUS
// =============================================================================

/// The per-record state machine driven by the merge engine.
///
/// Legal transitions:
///
/// ```text
/// Unseen -> Matched -> GraphInserted -> { Noop | New | Changed }
/// ```
///
/// The three classification states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum RecordStatus {
    /// Not yet encountered by this run.
    #[default]
    Unseen,
    /// Discovered in a loaded file or resolved against the registry.
    Matched,
    /// Edges inserted into the dependency graph.
    GraphInserted,
    /// Canonically identical to the tracked element; nothing to do.
    Noop,
    /// Not previously tracked; appended to a dispatched file.
    New,
    /// Tracked element replaced in place.
    Changed,
}

impl RecordStatus {
    /// Whether `next` is a legal successor of `self`.
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Unseen, Self::Matched)
                | (Self::Matched, Self::GraphInserted)
                | (
                    Self::GraphInserted,
                    Self::Noop | Self::New | Self::Changed
                )
        )
    }

    /// Whether this is one of the terminal classification states.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Noop | Self::New | Self::Changed)
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Fatal errors of the engine.
///
/// Per the error design, everything here stops processing before any file
/// is written. Recoverable findings (unresolved references, cycles) are
/// warnings accumulated in a [`crate::report::RunReport`] instead.
#[derive(Debug, Error)]
pub enum CorpusError {
    /// A corpus document is malformed and cannot be parsed.
    #[error("parse error in {file}: {message}")]
    Parse {
        /// Path of the offending file, relative to the module root.
        file: String,
        /// Parser diagnostic.
        message: String,
    },

    /// A declared record lacks its mandatory `id` attribute.
    #[error("record #{index} in {file} has no id attribute")]
    MissingIdentifierAttribute {
        /// Path of the offending file, relative to the module root.
        file: String,
        /// Zero-based position of the record in its container.
        index: usize,
    },

    /// An `eval` expression could not be parsed.
    ///
    /// This is a hard failure, not a skip: an expression the extractor
    /// cannot parse could hide references.
    #[error("invalid expression at offset {offset}: {message}")]
    ExprSyntax {
        /// Byte offset into the expression source.
        offset: usize,
        /// Parser diagnostic.
        message: String,
    },

    /// The record store collaborator failed.
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),

    /// The requested model does not exist in the record store.
    #[error("model {0:?} not found")]
    UnknownModel(String),

    /// An I/O error occurred.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path being read or written.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl CorpusError {
    /// Helper for wrapping I/O errors with their path.
    #[must_use]
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_qualified_reference() {
        let id = RecordId::parse("base.main_partner", "local");
        assert_eq!(id.module, "base");
        assert_eq!(id.name, "main_partner");
    }

    #[test]
    fn parse_unqualified_reference_uses_default_module() {
        let id = RecordId::parse("my_record", "local");
        assert_eq!(id.module, "local");
        assert_eq!(id.name, "my_record");
    }

    #[test]
    fn status_machine_accepts_legal_path() {
        let mut status = RecordStatus::Unseen;
        for next in [
            RecordStatus::Matched,
            RecordStatus::GraphInserted,
            RecordStatus::Changed,
        ] {
            assert!(status.can_advance_to(next));
            status = next;
        }
        assert!(status.is_terminal());
    }

    #[test]
    fn status_machine_rejects_skips_and_regressions() {
        assert!(!RecordStatus::Unseen.can_advance_to(RecordStatus::Noop));
        assert!(!RecordStatus::Changed.can_advance_to(RecordStatus::Matched));
        assert!(!RecordStatus::Noop.can_advance_to(RecordStatus::New));
    }
}
