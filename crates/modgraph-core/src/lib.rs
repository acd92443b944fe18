//! # modgraph-core
//!
//! The deterministic record-graph engine for modgraph - THE LOGIC.
//!
//! This crate implements the full corpus pipeline: load a module's
//! declarative record files, extract references (including the embedded
//! expression sub-language), allocate stable identifiers, build the
//! record and file dependency graphs, reorder the manifest, and merge
//! store records back into the files in place.
//!
//! ## Architectural Constraints
//!
//! The core:
//! - Is deterministic: same corpus and store state, same output,
//!   byte for byte
//! - Only touches files it changed; untouched files are never rewritten
//! - Reaches the outside world exclusively through the [`RecordStore`]
//!   trait
//! - Has NO async, NO network dependencies (pure Rust)

// =============================================================================
// MODULES
// =============================================================================

pub mod dispatch;
pub mod document;
pub mod extract;
pub mod field_spec;
pub mod graph;
pub mod loader;
pub mod manifest;
pub mod merge;
pub mod order;
pub mod primitives;
pub mod registry;
pub mod report;
pub mod store;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{CorpusError, RecordHandle, RecordId, RecordStatus};

// =============================================================================
// RE-EXPORTS: Corpus Pipeline
// =============================================================================

pub use dispatch::DispatchSpec;
pub use document::{Document, canonical_form};
pub use extract::{extract_refs, parse_expression};
pub use field_spec::FieldSpec;
pub use graph::{CycleReport, DepGraph, build_graph, check_cycles};
pub use loader::{Corpus, TrackedRecord};
pub use manifest::{MANIFEST_FILE, Manifest};
pub use merge::{MergePlan, MergeRequest, build_element, merge};
pub use order::reorder;
pub use registry::IdentifierRegistry;
pub use report::{RunReport, Warning};

// =============================================================================
// RE-EXPORTS: Store Seam
// =============================================================================

pub use store::{
    JsonStore, MemoryStore, RecordFilter, RecordStore, ReserveOutcome, StoreError, StoreRecord,
};
