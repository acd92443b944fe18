//! # Corpus Documents
//!
//! One corpus file is a tree-structured document: a single top-level data
//! container holding an ordered sequence of record elements. On disk the
//! tree is JSON (with key order preserved); in memory each record element
//! is a `serde_json::Value`.
//!
//! A record element carries a mandatory module-local `id` attribute, a
//! `model` attribute, and a `fields` object. A field value may be a
//! scalar, a `{"ref": "module.name"}` literal reference, or an
//! `{"eval": "..."}` expression string.
//!
//! The loader owns the trees for the duration of a run; only the merge
//! engine calls the mutating operations here.

use crate::CorpusError;
use serde_json::Value;

// =============================================================================
// DOCUMENT
// =============================================================================

/// A parsed corpus file: the ordered list of record elements it declares.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Document {
    records: Vec<Value>,
}

impl Document {
    /// Create a minimal empty container document.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a document from source text.
    ///
    /// The top level must be an object with a `records` array of objects;
    /// anything else is a [`CorpusError::Parse`].
    pub fn parse(source: &str, file: &str) -> Result<Self, CorpusError> {
        let parse_err = |message: String| CorpusError::Parse {
            file: file.to_string(),
            message,
        };

        let root: Value =
            serde_json::from_str(source).map_err(|e| parse_err(e.to_string()))?;

        let Some(container) = root.as_object() else {
            return Err(parse_err("top level is not an object".to_string()));
        };
        let Some(records) = container.get("records") else {
            return Err(parse_err("missing \"records\" container".to_string()));
        };
        let Some(records) = records.as_array() else {
            return Err(parse_err("\"records\" is not an array".to_string()));
        };
        for (index, element) in records.iter().enumerate() {
            if !element.is_object() {
                return Err(parse_err(format!("record #{index} is not an object")));
            }
        }

        Ok(Self {
            records: records.clone(),
        })
    }

    /// Serialize the document back to its on-disk form.
    pub fn to_source(&self) -> Result<String, CorpusError> {
        let root = serde_json::json!({ "records": self.records });
        let mut source = serde_json::to_string_pretty(&root)
            .map_err(|e| CorpusError::Serialization(e.to_string()))?;
        source.push('\n');
        Ok(source)
    }

    /// The record elements, in document order.
    #[must_use]
    pub fn records(&self) -> &[Value] {
        &self.records
    }

    /// Number of record elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the document declares no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Replace the child at `index` with a new element, leaving every
    /// sibling and its position untouched.
    ///
    /// Returns the superseded element, or `None` if `index` is out of
    /// bounds.
    pub fn replace_child(&mut self, index: usize, element: Value) -> Option<Value> {
        let slot = self.records.get_mut(index)?;
        Some(std::mem::replace(slot, element))
    }

    /// Append a new element as the last child of the record container.
    pub fn append_child(&mut self, element: Value) {
        self.records.push(element);
    }
}

// =============================================================================
// RECORD ELEMENT ACCESS
// =============================================================================

/// The `id` attribute of a record element, if present.
#[must_use]
pub fn element_id(element: &Value) -> Option<&str> {
    element.get("id").and_then(Value::as_str)
}

/// The `model` attribute of a record element, if present.
#[must_use]
pub fn element_model(element: &Value) -> Option<&str> {
    element.get("model").and_then(Value::as_str)
}

/// The field-value children of a record element, in document order.
#[must_use]
pub fn element_fields(element: &Value) -> Option<&serde_json::Map<String, Value>> {
    element.get("fields").and_then(Value::as_object)
}

// =============================================================================
// CANONICAL FORM
// =============================================================================

/// Canonical normalization of an element for content comparison.
///
/// Attribute order and formatting whitespace carry no meaning, so objects
/// are rewritten with sorted keys and the result is serialized compactly.
/// Two elements are the same record content iff their canonical forms are
/// byte-equal.
#[must_use]
pub fn canonical_form(element: &Value) -> String {
    // Compact serialization of the normalized tree is stable by
    // construction, so failure is unreachable; fall back to Null's form
    // rather than panicking.
    serde_json::to_string(&normalize(element)).unwrap_or_else(|_| "null".to_string())
}

fn normalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<(&String, &Value)> = map.iter().collect();
            sorted.sort_by_key(|(key, _)| key.as_str());
            let mut out = serde_json::Map::new();
            for (key, inner) in sorted {
                out.insert(key.clone(), normalize(inner));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        other => other.clone(),
    }
}

// =============================================================================
// TESTS
// =============================================================================
