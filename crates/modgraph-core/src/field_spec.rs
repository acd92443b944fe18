//! # Field Selection Policy
//!
//! Decides which fields of a model are exported, from a compact
//! command-line syntax:
//!
//! ```text
//! MODEL:FIELD[,FIELD][;MODEL:FIELD[,FIELD]]...
//! ```
//!
//! A field may be prefixed with `+` (include, the default) or `-`
//! (exclude). `*` as a model targets every model; `*` as a field sets the
//! layer's default. A spec without a model applies to the current model.
//!
//! The parsed [`FieldSpec`] is the explicit per-run cache of the policy;
//! evaluation itself is pure.

use std::collections::BTreeMap;

/// Rule set for one model layer: field name -> include.
type Layer = BTreeMap<String, bool>;

/// Parsed two-layer field selection policy.
///
/// Evaluation overlays the model-specific layer on top of the
/// wildcard-model layer; model-specific entries always win, regardless of
/// the order they were specified in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSpec {
    layers: BTreeMap<String, Layer>,
}

impl FieldSpec {
    /// Parse a spec string. The empty string is the empty spec.
    ///
    /// Within one layer the last specification of a field wins; multiple
    /// specs for the same model concatenate.
    #[must_use]
    pub fn parse(spec: &str, current_model: &str) -> Self {
        let mut layers: BTreeMap<String, Layer> = BTreeMap::new();
        for model_spec in spec.split(';') {
            if model_spec.is_empty() {
                continue;
            }
            let (model, fields_spec) = match model_spec.split_once(':') {
                Some((model, fields)) => (model, fields),
                None => (current_model, model_spec),
            };
            let layer = layers.entry(model.to_string()).or_default();
            for label in fields_spec.split(',') {
                if label.is_empty() {
                    continue;
                }
                let (field, include) = if let Some(rest) = label.strip_prefix('-') {
                    (rest, false)
                } else if let Some(rest) = label.strip_prefix('+') {
                    (rest, true)
                } else {
                    (label, true)
                };
                // BTreeMap insert: last specification wins.
                layer.insert(field.to_string(), include);
            }
        }
        Self { layers }
    }

    /// Whether `model.field` is selected for export.
    ///
    /// Resolution: wildcard-model layer, overlaid by the model layer, then
    /// the merged layer's `*` default, then include.
    #[must_use]
    pub fn is_selected(&self, model: &str, field: &str) -> bool {
        let mut merged: Layer = self.layers.get("*").cloned().unwrap_or_default();
        if let Some(layer) = self.layers.get(model) {
            for (name, include) in layer {
                merged.insert(name.clone(), *include);
            }
        }
        let default = merged.get("*").copied().unwrap_or(true);
        merged.get(field).copied().unwrap_or(default)
    }

    /// Whether any rule was specified at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(s: &str) -> FieldSpec {
        FieldSpec::parse(s, "current")
    }

    #[test]
    fn explicit_selection() {
        assert!(spec("bar:f1").is_selected("bar", "f1"));
        assert!(!spec("bar:-f1").is_selected("bar", "f1"));
    }

    #[test]
    fn default_is_include() {
        assert!(spec("").is_selected("bar", "f1"));
        assert!(spec("foo:-f1").is_selected("bar", "f1"));
        assert!(spec("bar:-f2").is_selected("bar", "f1"));
    }

    #[test]
    fn missing_model_targets_current_model() {
        let s = spec("-f1,f2");
        assert!(!s.is_selected("current", "f1"));
        assert!(s.is_selected("current", "f2"));
        assert!(s.is_selected("other", "f1"));
    }

    #[test]
    fn wildcard_model_hits_all_models() {
        assert!(!spec("*:-f1").is_selected("bar", "f1"));
        assert!(!spec("*:-f1").is_selected("other", "f1"));
    }

    #[test]
    fn wildcard_field_sets_layer_default() {
        let s = spec("bar:-*");
        assert!(!s.is_selected("bar", "f1"));
        assert!(s.is_selected("other", "f1"));
    }

    #[test]
    fn last_specification_wins_within_a_layer() {
        assert!(spec("foo:f1,-f1,+f1").is_selected("foo", "f1"));
        assert!(!spec("foo:f1,+f1,-f1").is_selected("foo", "f1"));
    }

    #[test]
    fn repeated_model_specs_concatenate() {
        assert!(!spec("foo:f1;foo:-f1").is_selected("foo", "f1"));
        assert!(spec("foo:-f1;foo:+f1").is_selected("foo", "f1"));
    }

    #[test]
    fn specific_model_beats_wildcard_regardless_of_order() {
        let s = spec("*:-f1;bar:f1");
        assert!(s.is_selected("bar", "f1"));
        assert!(!s.is_selected("other", "f1"));

        let reversed = spec("bar:f1;*:-f1");
        assert!(reversed.is_selected("bar", "f1"));
        assert!(!reversed.is_selected("other", "f1"));
    }

    #[test]
    fn multibyte_labels_parse_without_truncation() {
        let s = spec("émodel_field,-véto");
        assert!(s.is_selected("current", "émodel_field"));
        assert!(!s.is_selected("current", "véto"));
    }

    #[test]
    fn specific_field_beats_wildcard_default() {
        assert!(spec("*:-*;bar:f1").is_selected("bar", "f1"));
        assert!(spec("bar:-*;bar:-*,f1").is_selected("bar", "f1"));
        assert!(!spec("bar:-*;bar:f1").is_selected("bar", "f2"));
    }
}
