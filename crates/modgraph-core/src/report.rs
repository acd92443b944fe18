//! # Run Report
//!
//! Per-run accumulator for recoverable findings. Warnings never abort the
//! run; they are collected here and reported once, with counts, when the
//! run finishes. The report is an explicit object owned by the run, not
//! ambient global state.

use crate::{RecordHandle, RecordId};
use std::fmt;

// =============================================================================
// WARNINGS
// =============================================================================

/// A recoverable finding accumulated during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// A reference target is not declared in the current corpus.
    UnresolvedReference {
        /// File containing the referencing record.
        file: String,
        /// The referencing record.
        record: RecordId,
        /// The missing target.
        target: RecordId,
    },
    /// A record introduces a cyclic reference chain.
    CyclicDependency {
        /// File containing the record closing the cycle.
        file: String,
        /// The record closing the cycle.
        record: RecordId,
        /// The chain, starting and ending at `record`.
        chain: Vec<RecordId>,
    },
    /// A record references a module the manifest does not depend on.
    UndeclaredModuleDependency {
        /// File containing the referencing record.
        file: String,
        /// The referencing record.
        record: RecordId,
        /// The module that had to be added to the manifest.
        module: String,
    },
    /// The file-level graph is cyclic; the load order is best-effort.
    FileCycle {
        /// The file whose placement broke the cycle.
        file: String,
    },
    /// A file listed in the manifest does not exist.
    MissingFile {
        /// The listed path.
        file: String,
    },
    /// The store rejected a single record's write-back.
    StoreRejected {
        /// The record whose write was refused.
        handle: RecordHandle,
        /// Store-side diagnostic.
        message: String,
    },
}

impl Warning {
    /// Short label used in counts.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnresolvedReference { .. } => "unresolved reference",
            Self::CyclicDependency { .. } => "cyclic dependency",
            Self::UndeclaredModuleDependency { .. } => "undeclared module dependency",
            Self::FileCycle { .. } => "file cycle",
            Self::MissingFile { .. } => "missing file",
            Self::StoreRejected { .. } => "store rejection",
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnresolvedReference {
                file,
                record,
                target,
            } => write!(
                f,
                "{file}: {record} references {target} which is not defined (yet?)"
            ),
            Self::CyclicDependency {
                file,
                record,
                chain,
            } => {
                write!(f, "{file}: {record} introduces a cyclic reference: ")?;
                for (i, link) in chain.iter().enumerate() {
                    if i > 0 {
                        write!(f, " -> ")?;
                    }
                    write!(f, "{link}")?;
                }
                Ok(())
            }
            Self::UndeclaredModuleDependency {
                file,
                record,
                module,
            } => write!(
                f,
                "{file}: {record} depends on module {module} which was not declared"
            ),
            Self::FileCycle { file } => {
                write!(f, "file dependency cycle broken at {file}; order is best-effort")
            }
            Self::MissingFile { file } => {
                write!(f, "file {file} listed in the manifest does not exist")
            }
            Self::StoreRejected { handle, message } => {
                write!(f, "store rejected writing back to {handle}: {message}")
            }
        }
    }
}

// =============================================================================
// REPORT
// =============================================================================

/// Ordered collection of the warnings of one run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    warnings: Vec<Warning>,
}

impl RunReport {
    /// Create an empty report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a warning.
    pub fn warn(&mut self, warning: Warning) {
        tracing::warn!("{warning}");
        self.warnings.push(warning);
    }

    /// All warnings, in the order they were recorded.
    #[must_use]
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Whether the run produced any warnings.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Warnings of one kind.
    #[must_use]
    pub fn count_of(&self, kind: &str) -> usize {
        self.warnings.iter().filter(|w| w.kind() == kind).count()
    }

    /// The end-of-run summary: one line per warning kind with its count.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.warnings.is_empty() {
            return "no warnings".to_string();
        }
        // Kinds keep first-appearance order.
        let mut kinds: Vec<&'static str> = Vec::new();
        for warning in &self.warnings {
            if !kinds.contains(&warning.kind()) {
                kinds.push(warning.kind());
            }
        }
        let mut out = format!("{} warning(s):", self.warnings.len());
        for kind in kinds {
            out.push_str(&format!("\n  {}: {}", kind, self.count_of(kind)));
        }
        out
    }
}

// =============================================================================
// TESTS
// =============================================================================
