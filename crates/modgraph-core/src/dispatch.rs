//! # Record Dispatch Policy
//!
//! Decides which corpus file a newly created record is written into.
//!
//! The spec syntax mirrors field selection:
//!
//! ```text
//! [MODEL:]PATH[;[MODEL:]PATH]...
//! ```
//!
//! A path without a model is the wildcard template. Templates may contain
//! `{placeholder}` markers substituted from record attributes; the derived
//! `{model_underscore}` (model name with separators replaced by
//! underscores) is always available.

use serde_json::Value;
use std::collections::BTreeMap;

/// Template used when neither a model nor a wildcard rule matches.
const DEFAULT_TEMPLATE: &str = "{model_underscore}_records.json";

/// Parsed dispatch policy: model (or `*`) -> destination path template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSpec {
    templates: BTreeMap<String, String>,
}

impl DispatchSpec {
    /// Parse a spec string. The empty string is the empty spec.
    ///
    /// A later rule for the same model replaces the earlier one.
    #[must_use]
    pub fn parse(spec: &str) -> Self {
        let mut templates = BTreeMap::new();
        for model_spec in spec.split(';') {
            if model_spec.is_empty() {
                continue;
            }
            let (model, template) = match model_spec.split_once(':') {
                Some((model, template)) => (model, template),
                None => ("*", model_spec),
            };
            templates.insert(model.to_string(), template.to_string());
        }
        Self { templates }
    }

    /// Resolve the destination path for a record.
    ///
    /// `model` selects the template (falling back to `*`, then to the
    /// built-in default); `attributes` supplies placeholder values.
    #[must_use]
    pub fn route(&self, model: &str, attributes: &BTreeMap<String, Value>) -> String {
        let template = self
            .templates
            .get(model)
            .or_else(|| self.templates.get("*"))
            .map_or(DEFAULT_TEMPLATE, String::as_str);
        substitute(template, model, attributes)
    }
}

/// Substitute `{placeholder}` markers from record attributes.
///
/// Unknown placeholders are left in place so a misrouted file is visible
/// in the output rather than silently collapsed.
fn substitute(template: &str, model: &str, attributes: &BTreeMap<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };
        let key = &after[..close];
        if key == "model_underscore" {
            out.push_str(&model.replace(['.', ' '], "_"));
        } else if let Some(value) = attributes.get(key) {
            match value {
                Value::String(text) => out.push_str(text),
                other => out.push_str(&other.to_string()),
            }
        } else {
            out.push('{');
            out.push_str(key);
            out.push('}');
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}

// =============================================================================
// TESTS
// =============================================================================
