//! # Record Store Seam
//!
//! The external record store is a collaborator, not part of the engine:
//! connectivity and authentication live behind the [`RecordStore`] trait.
//! Everything the engine needs from it is synchronous and blocking.
//!
//! Two implementations ship here: [`MemoryStore`] for in-process use and
//! tests, and [`JsonStore`] for snapshot files on disk.

mod json_store;

pub use json_store::JsonStore;

use crate::{RecordHandle, RecordId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

// =============================================================================
// ERRORS & OUTCOMES
// =============================================================================

/// Failures of the record store collaborator.
///
/// Connection-class failures abort the run; validation failures from a
/// write are reported per record and do not abort the batch.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store is unreachable or answered out of protocol.
    #[error("store connection failed: {0}")]
    Connection(String),

    /// The store rejected a single record's data.
    #[error("store rejected {model},{handle}: {message}")]
    Validation {
        /// Model of the rejected record.
        model: String,
        /// Numeric handle of the rejected record.
        handle: u64,
        /// Store-side diagnostic.
        message: String,
    },

    /// The requested record does not exist.
    #[error("no record {model},{handle}")]
    NotFound {
        /// Model of the missing record.
        model: String,
        /// Numeric handle of the missing record.
        handle: u64,
    },
}

impl StoreError {
    /// Whether this failure must abort the whole run.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

/// Result of an identifier reservation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// The name is now bound to the handle.
    Reserved,
    /// Another party bound the name first; the caller must retry with the
    /// next candidate.
    Conflict,
}

/// One record as listed by the store: its handle and field values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreRecord {
    /// The store identity of the record.
    pub handle: RecordHandle,
    /// Field values, keyed by field name.
    pub fields: BTreeMap<String, Value>,
}

/// Filter for [`RecordStore::list_matching`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    /// Case-insensitive substring match on the `name` field.
    pub name: Option<String>,
    /// Exact numeric handle.
    pub id: Option<u64>,
    /// Lower bound (inclusive) on the `write_date` field.
    pub since: Option<String>,
    /// Records whose `name` field starts with the `{tag}` marker.
    pub tag: Option<String>,
}

impl RecordFilter {
    /// Whether a record's fields pass this filter.
    #[must_use]
    pub fn matches(&self, handle: u64, fields: &BTreeMap<String, Value>) -> bool {
        if let Some(id) = self.id
            && handle != id
        {
            return false;
        }
        if let Some(name) = &self.name {
            let record_name = fields.get("name").and_then(Value::as_str).unwrap_or("");
            if !record_name.to_lowercase().contains(&name.to_lowercase()) {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            let record_name = fields.get("name").and_then(Value::as_str).unwrap_or("");
            if !record_name.starts_with(&format!("{{{tag}}}")) {
                return false;
            }
        }
        if let Some(since) = &self.since {
            let write_date = fields
                .get("write_date")
                .and_then(Value::as_str)
                .unwrap_or("");
            // ISO-8601 timestamps compare correctly as strings.
            if write_date < since.as_str() {
                return false;
            }
        }
        true
    }
}

// =============================================================================
// TRAIT
// =============================================================================

/// The record store collaborator consumed by the engine.
pub trait RecordStore {
    /// Whether the store knows the given model.
    fn exists(&self, model: &str) -> Result<bool, StoreError>;

    /// List records of a model passing a filter, in handle order.
    fn list_matching(
        &self,
        model: &str,
        filter: &RecordFilter,
    ) -> Result<Vec<StoreRecord>, StoreError>;

    /// The identifier already bound to a handle, if any.
    fn get_identifier(&self, model: &str, handle: u64) -> Result<Option<RecordId>, StoreError>;

    /// Bind a name to a handle. A concurrent binding of the same name
    /// yields [`ReserveOutcome::Conflict`].
    fn reserve_identifier(
        &mut self,
        module: &str,
        model: &str,
        handle: u64,
        name: &str,
    ) -> Result<ReserveOutcome, StoreError>;

    /// All names already reserved for a module and model.
    fn list_identifier_names(&self, module: &str, model: &str)
    -> Result<Vec<String>, StoreError>;

    /// Read selected fields of one record. An empty field list reads all.
    fn read(
        &self,
        model: &str,
        handle: u64,
        fields: &[String],
    ) -> Result<BTreeMap<String, Value>, StoreError>;

    /// Write field values to one record.
    fn write(
        &mut self,
        model: &str,
        handle: u64,
        fields: &BTreeMap<String, Value>,
    ) -> Result<(), StoreError>;
}

// =============================================================================
// IN-MEMORY STORE
// =============================================================================

/// Identifier binding rows kept by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierRow {
    /// Owning module.
    pub module: String,
    /// Model of the bound record.
    pub model: String,
    /// Numeric handle of the bound record.
    pub id: u64,
    /// Module-local name.
    pub name: String,
}

/// In-memory record store, used by tests and as the backing state of
/// [`JsonStore`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStore {
    /// model -> handle -> field values
    models: BTreeMap<String, BTreeMap<u64, BTreeMap<String, Value>>>,
    /// Identifier bindings, append-order preserved.
    identifiers: Vec<IdentifierRow>,
    /// Names that will answer `Conflict` exactly once, to exercise the
    /// reservation race path.
    #[serde(skip)]
    conflicts_once: BTreeSet<String>,
    /// Records whose writes answer `Validation`, keyed by model and handle.
    #[serde(skip)]
    write_rejections: BTreeMap<(String, u64), String>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, creating the model on first use.
    pub fn insert_record(
        &mut self,
        model: &str,
        handle: u64,
        fields: BTreeMap<String, Value>,
    ) {
        self.models
            .entry(model.to_string())
            .or_default()
            .insert(handle, fields);
    }

    /// Declare a model with no records.
    pub fn declare_model(&mut self, model: &str) {
        self.models.entry(model.to_string()).or_default();
    }

    /// Pre-bind an identifier, as if another session had reserved it.
    pub fn bind_identifier(&mut self, module: &str, model: &str, handle: u64, name: &str) {
        self.identifiers.push(IdentifierRow {
            module: module.to_string(),
            model: model.to_string(),
            id: handle,
            name: name.to_string(),
        });
    }

    /// Make the next reservation of `name` race and lose.
    pub fn inject_conflict_once(&mut self, name: &str) {
        self.conflicts_once.insert(name.to_string());
    }

    /// Make every write to one record fail with a validation error.
    pub fn reject_writes(&mut self, model: &str, handle: u64, message: &str) {
        self.write_rejections
            .insert((model.to_string(), handle), message.to_string());
    }

    fn find_identifier(&self, model: &str, handle: u64) -> Option<&IdentifierRow> {
        self.identifiers
            .iter()
            .find(|row| row.model == model && row.id == handle)
    }

    fn name_taken(&self, module: &str, name: &str) -> bool {
        self.identifiers
            .iter()
            .any(|row| row.module == module && row.name == name)
    }
}

impl RecordStore for MemoryStore {
    fn exists(&self, model: &str) -> Result<bool, StoreError> {
        Ok(self.models.contains_key(model))
    }

    fn list_matching(
        &self,
        model: &str,
        filter: &RecordFilter,
    ) -> Result<Vec<StoreRecord>, StoreError> {
        let Some(records) = self.models.get(model) else {
            return Ok(Vec::new());
        };
        Ok(records
            .iter()
            .filter(|(handle, fields)| filter.matches(**handle, fields))
            .map(|(handle, fields)| StoreRecord {
                handle: RecordHandle::new(model, *handle),
                fields: fields.clone(),
            })
            .collect())
    }

    fn get_identifier(&self, model: &str, handle: u64) -> Result<Option<RecordId>, StoreError> {
        Ok(self
            .find_identifier(model, handle)
            .map(|row| RecordId::new(row.module.clone(), row.name.clone())))
    }

    fn reserve_identifier(
        &mut self,
        module: &str,
        model: &str,
        handle: u64,
        name: &str,
    ) -> Result<ReserveOutcome, StoreError> {
        if self.conflicts_once.remove(name) || self.name_taken(module, name) {
            return Ok(ReserveOutcome::Conflict);
        }
        self.bind_identifier(module, model, handle, name);
        Ok(ReserveOutcome::Reserved)
    }

    fn list_identifier_names(
        &self,
        module: &str,
        model: &str,
    ) -> Result<Vec<String>, StoreError> {
        Ok(self
            .identifiers
            .iter()
            .filter(|row| row.module == module && row.model == model)
            .map(|row| row.name.clone())
            .collect())
    }

    fn read(
        &self,
        model: &str,
        handle: u64,
        fields: &[String],
    ) -> Result<BTreeMap<String, Value>, StoreError> {
        let record = self
            .models
            .get(model)
            .and_then(|records| records.get(&handle))
            .ok_or_else(|| StoreError::NotFound {
                model: model.to_string(),
                handle,
            })?;
        if fields.is_empty() {
            return Ok(record.clone());
        }
        Ok(record
            .iter()
            .filter(|(name, _)| fields.iter().any(|f| f == *name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect())
    }

    fn write(
        &mut self,
        model: &str,
        handle: u64,
        fields: &BTreeMap<String, Value>,
    ) -> Result<(), StoreError> {
        if let Some(message) = self.write_rejections.get(&(model.to_string(), handle)) {
            return Err(StoreError::Validation {
                model: model.to_string(),
                handle,
                message: message.clone(),
            });
        }
        let record = self
            .models
            .get_mut(model)
            .and_then(|records| records.get_mut(&handle))
            .ok_or_else(|| StoreError::NotFound {
                model: model.to_string(),
                handle,
            })?;
        for (name, value) in fields {
            record.insert(name.clone(), value.clone());
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
