//! # Merge Engine
//!
//! Pulls records out of a store and merges them into the corpus in
//! place. For each candidate: resolve or allocate its identifier, build
//! the element it should serialize to, then either leave the tracked
//! record alone (content already equivalent), replace it in its file, or
//! append it to a destination picked by the dispatch table.

use crate::dispatch::DispatchSpec;
use crate::document::{self, canonical_form};
use crate::extract::extract_refs;
use crate::field_spec::FieldSpec;
use crate::loader::Corpus;
use crate::primitives::EXCLUDED_BOOKKEEPING_FIELDS;
use crate::registry::{IdentifierRegistry, natural_sort_key};
use crate::report::{RunReport, Warning};
use crate::store::{RecordStore, StoreRecord};
use crate::types::{CorpusError, RecordId, RecordStatus};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

// =============================================================================
// TYPES
// =============================================================================

/// Outcome of one merge run, in processing order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergePlan {
    /// Already present with equivalent content. Untouched.
    pub noop: Vec<RecordId>,
    /// Present with diverging content. Replaced in place.
    pub changed: Vec<RecordId>,
    /// Not in the corpus. Appended to a destination file.
    pub new: Vec<RecordId>,
}

impl MergePlan {
    /// Total records processed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.noop.len() + self.changed.len() + self.new.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Merge parameters beyond the corpus and store themselves.
#[derive(Debug)]
pub struct MergeRequest<'a> {
    pub model: &'a str,
    pub field_spec: &'a FieldSpec,
    pub dispatch: &'a DispatchSpec,
    /// Destination for new records, overriding the dispatch table.
    pub outfile: Option<&'a str>,
    /// Selection marker stripped from record names and renamed away in
    /// the store.
    pub tag: Option<&'a str>,
}

// =============================================================================
// MERGE
// =============================================================================

/// Merge `candidates` into the corpus.
///
/// Candidates with an already-bound identifier go first so their names
/// never collide with the ones allocated in this run, each group in
/// natural key order. The plan records every decision; files are only
/// marked dirty, writing stays with [`Corpus::write_dirty`].
pub fn merge(
    corpus: &mut Corpus,
    registry: &mut IdentifierRegistry,
    store: &mut dyn RecordStore,
    candidates: Vec<StoreRecord>,
    request: &MergeRequest<'_>,
    report: &mut RunReport,
) -> Result<MergePlan, CorpusError> {
    let module = corpus.module().to_string();
    let mut plan = MergePlan::default();

    for mut record in sort_candidates(registry, store, request.model, candidates)? {
        if let Some(tag) = request.tag {
            strip_name_tag(&mut record, tag, store, report)?;
        }
        let seed = seed_of(&record.fields, record.handle.id);
        let id = registry.create(store, &module, request.model, record.handle.id, &seed)?;
        let element = build_element(&id.name, request.model, &record, request.field_spec);

        if corpus.is_tracked(&id) {
            // Tracked records were graph-ready at load time; walk them
            // through the status machine before classification.
            corpus.advance_status(&id, RecordStatus::GraphInserted);
            let unchanged = corpus
                .record(&id)
                .is_some_and(|tracked| canonical_form(&tracked.element) == canonical_form(&element));
            if unchanged {
                corpus.advance_status(&id, RecordStatus::Noop);
                plan.noop.push(id);
            } else {
                corpus.replace_element(&id, element)?;
                plan.changed.push(id);
            }
        } else {
            let attributes = element_attributes(&element);
            let file = request
                .outfile
                .map_or_else(|| request.dispatch.route(request.model, &attributes), String::from);
            let deps = extract_refs(&element, &module)?.into_iter().collect();
            corpus.append_element(&file, id.clone(), request.model, element, deps);
            plan.new.push(id);
        }
    }

    tracing::info!(
        noop = plan.noop.len(),
        changed = plan.changed.len(),
        new = plan.new.len(),
        identifiers = registry.session_len(),
        "merge of {} complete",
        request.model
    );
    Ok(plan)
}

/// Strip the `{tag}` selection marker from a record's name and persist
/// the rename in the store.
///
/// The marker is a selection device and must not leak into the exported
/// element or the identifier seed. A connection-class failure aborts the
/// run; a per-record rejection is reported and the store keeps its marked
/// name, while the exported element still uses the clean one.
fn strip_name_tag(
    record: &mut StoreRecord,
    tag: &str,
    store: &mut dyn RecordStore,
    report: &mut RunReport,
) -> Result<(), CorpusError> {
    let Some(Value::String(name)) = record.fields.get("name") else {
        return Ok(());
    };
    let Some(stripped) = name.strip_prefix(&format!("{{{tag}}}")) else {
        return Ok(());
    };
    let clean = stripped.trim_start().to_string();

    let mut rename = BTreeMap::new();
    rename.insert("name".to_string(), Value::String(clean.clone()));
    if let Err(e) = store.write(&record.handle.model, record.handle.id, &rename) {
        if e.is_fatal() {
            return Err(e.into());
        }
        report.warn(Warning::StoreRejected {
            handle: record.handle.clone(),
            message: e.to_string(),
        });
    }
    record.fields.insert("name".to_string(), Value::String(clean));
    Ok(())
}

/// Stable processing order: records whose handle already has an
/// identifier first, then unnamed ones, each group by the natural key of
/// its future name seed.
fn sort_candidates(
    registry: &IdentifierRegistry,
    store: &dyn RecordStore,
    model: &str,
    candidates: Vec<StoreRecord>,
) -> Result<Vec<StoreRecord>, CorpusError> {
    let mut keyed: Vec<(bool, Vec<crate::registry::NaturalPart>, u64, StoreRecord)> =
        Vec::with_capacity(candidates.len());
    for record in candidates {
        let bound = registry.lookup(store, model, record.handle.id)?;
        let seed = match &bound {
            Some(id) => id.name.clone(),
            None => seed_of(&record.fields, record.handle.id),
        };
        keyed.push((
            bound.is_none(),
            natural_sort_key(&seed),
            record.handle.id,
            record,
        ));
    }
    keyed.sort_by(|a, b| (&a.0, &a.1, a.2).cmp(&(&b.0, &b.1, b.2)));
    Ok(keyed.into_iter().map(|(_, _, _, record)| record).collect())
}

/// The naming seed of a store record: its `name` field when it is a
/// string, otherwise the handle rendered as text.
fn seed_of(fields: &BTreeMap<String, Value>, handle: u64) -> String {
    match fields.get("name") {
        Some(Value::String(name)) if !name.is_empty() => name.clone(),
        _ => handle.to_string(),
    }
}

// =============================================================================
// ELEMENT CONSTRUCTION
// =============================================================================

/// Build the serialized element for a store record: identity and model
/// first, then the selected fields with `name` and `sequence` leading
/// and the rest in store order, bookkeeping fields excluded.
#[must_use]
pub fn build_element(name: &str, model: &str, record: &StoreRecord, spec: &FieldSpec) -> Value {
    let mut fields = Map::new();
    for leading in ["name", "sequence"] {
        if let Some(value) = record.fields.get(leading) {
            if spec.is_selected(model, leading) {
                fields.insert(leading.to_string(), value.clone());
            }
        }
    }
    for (field, value) in &record.fields {
        if fields.contains_key(field)
            || EXCLUDED_BOOKKEEPING_FIELDS.contains(&field.as_str())
            || !spec.is_selected(model, field)
        {
            continue;
        }
        fields.insert(field.clone(), value.clone());
    }
    json!({ "id": name, "model": model, "fields": Value::Object(fields) })
}

/// Flatten an element into the attribute map the dispatch table
/// substitutes from: its fields plus the `id` name.
fn element_attributes(element: &Value) -> BTreeMap<String, Value> {
    let mut attributes = BTreeMap::new();
    if let Some(fields) = document::element_fields(element) {
        for (field, value) in fields {
            attributes.insert(field.clone(), value.clone());
        }
    }
    if let Some(name) = document::element_id(element) {
        attributes.insert("id".to_string(), Value::String(name.to_string()));
    }
    attributes
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Manifest;
    use crate::store::MemoryStore;
    use crate::types::RecordHandle;
    use serde_json::json;

    fn store_with(records: &[(u64, &str)]) -> MemoryStore {
        let mut store = MemoryStore::new();
        for (handle, name) in records {
            let mut fields = BTreeMap::new();
            fields.insert("name".to_string(), json!(name));
            fields.insert("active".to_string(), json!(true));
            fields.insert("write_uid".to_string(), json!(7));
            store.insert_record("res.thing", *handle, fields);
        }
        store
    }

    fn candidates(store: &MemoryStore, handles: &[u64]) -> Vec<StoreRecord> {
        handles
            .iter()
            .map(|h| StoreRecord {
                handle: RecordHandle::new("res.thing", *h),
                fields: crate::store::RecordStore::read(store, "res.thing", *h, &[])
                    .expect("read"),
            })
            .collect()
    }

    fn empty_corpus() -> (tempfile::TempDir, Corpus) {
        let dir = tempfile::tempdir().expect("tempdir");
        let manifest = Manifest {
            name: "local".to_string(),
            ..Manifest::default()
        };
        manifest.save(dir.path()).expect("manifest");
        let mut report = RunReport::new();
        let corpus = Corpus::load(dir.path(), manifest, &mut report).expect("load");
        (dir, corpus)
    }

    fn request<'a>(spec: &'a FieldSpec, dispatch: &'a DispatchSpec) -> MergeRequest<'a> {
        MergeRequest {
            model: "res.thing",
            field_spec: spec,
            dispatch,
            outfile: None,
            tag: None,
        }
    }

    #[test]
    fn new_records_are_appended_and_routed() {
        let (_dir, mut corpus) = empty_corpus();
        let mut store = store_with(&[(1, "Alpha"), (2, "Beta")]);
        let mut registry = IdentifierRegistry::new(corpus.declared_names());
        let spec = FieldSpec::parse("", "res.thing");
        let dispatch = DispatchSpec::parse("");
        let mut report = RunReport::new();

        let batch = candidates(&store, &[1, 2]);
        let plan = merge(
            &mut corpus,
            &mut registry,
            &mut store,
            batch,
            &request(&spec, &dispatch),
            &mut report,
        )
        .expect("merge");

        assert_eq!(plan.new.len(), 2);
        assert!(plan.noop.is_empty() && plan.changed.is_empty());
        assert!(corpus.is_tracked(&RecordId::new("local", "res_thing_alpha_r0")));
        assert!(corpus.is_tracked(&RecordId::new("local", "res_thing_beta_r0")));
        assert_eq!(corpus.files(), ["res_thing_records.json"]);
        assert!(
            corpus
                .manifest()
                .data
                .contains(&"res_thing_records.json".to_string())
        );
    }

    #[test]
    fn equivalent_record_is_a_noop() {
        let (_dir, mut corpus) = empty_corpus();
        let mut store = store_with(&[(1, "Alpha")]);
        let mut registry = IdentifierRegistry::new(corpus.declared_names());
        let spec = FieldSpec::parse("", "res.thing");
        let dispatch = DispatchSpec::parse("");
        let mut report = RunReport::new();

        let batch = candidates(&store, &[1]);
        let first = merge(
            &mut corpus,
            &mut registry,
            &mut store,
            batch,
            &request(&spec, &dispatch),
            &mut report,
        )
        .expect("merge");
        assert_eq!(first.new.len(), 1);
        corpus.write_dirty().expect("write");

        let batch = candidates(&store, &[1]);
        let second = merge(
            &mut corpus,
            &mut registry,
            &mut store,
            batch,
            &request(&spec, &dispatch),
            &mut report,
        )
        .expect("merge");
        assert_eq!(second.noop.len(), 1);
        assert!(!corpus.has_pending_writes());
    }

    #[test]
    fn diverged_record_is_replaced_in_place() {
        let (_dir, mut corpus) = empty_corpus();
        let mut store = store_with(&[(1, "Alpha")]);
        let mut registry = IdentifierRegistry::new(corpus.declared_names());
        let spec = FieldSpec::parse("", "res.thing");
        let dispatch = DispatchSpec::parse("");
        let mut report = RunReport::new();

        let batch = candidates(&store, &[1]);
        merge(
            &mut corpus,
            &mut registry,
            &mut store,
            batch,
            &request(&spec, &dispatch),
            &mut report,
        )
        .expect("merge");
        corpus.write_dirty().expect("write");

        let mut amended = BTreeMap::new();
        amended.insert("active".to_string(), json!(false));
        crate::store::RecordStore::write(&mut store, "res.thing", 1, &amended).expect("write");

        let batch = candidates(&store, &[1]);
        let plan = merge(
            &mut corpus,
            &mut registry,
            &mut store,
            batch,
            &request(&spec, &dispatch),
            &mut report,
        )
        .expect("merge");
        assert_eq!(plan.changed.len(), 1);

        let id = RecordId::new("local", "res_thing_alpha_r0");
        let tracked = corpus.record(&id).expect("tracked");
        assert_eq!(tracked.revision, 1);
        assert_eq!(
            document::element_fields(&tracked.element)
                .and_then(|f| f.get("active"))
                .cloned(),
            Some(json!(false))
        );
    }

    #[test]
    fn outfile_overrides_dispatch() {
        let (_dir, mut corpus) = empty_corpus();
        let mut store = store_with(&[(1, "Alpha")]);
        let mut registry = IdentifierRegistry::new(corpus.declared_names());
        let spec = FieldSpec::parse("", "res.thing");
        let dispatch = DispatchSpec::parse("");
        let request = MergeRequest {
            outfile: Some("custom.json"),
            ..request(&spec, &dispatch)
        };
        let mut report = RunReport::new();

        let batch = candidates(&store, &[1]);
        merge(
            &mut corpus,
            &mut registry,
            &mut store,
            batch,
            &request,
            &mut report,
        )
        .expect("merge");
        assert_eq!(corpus.files(), ["custom.json"]);
    }

    #[test]
    fn tag_is_stripped_and_renamed_in_the_store() {
        let (_dir, mut corpus) = empty_corpus();
        let mut store = MemoryStore::new();
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), json!("{IMP} Alpha"));
        store.insert_record("res.thing", 1, fields);
        let mut registry = IdentifierRegistry::new(corpus.declared_names());
        let spec = FieldSpec::parse("", "res.thing");
        let dispatch = DispatchSpec::parse("");
        let request = MergeRequest {
            tag: Some("IMP"),
            ..request(&spec, &dispatch)
        };
        let mut report = RunReport::new();

        let batch = candidates(&store, &[1]);
        let plan = merge(
            &mut corpus,
            &mut registry,
            &mut store,
            batch,
            &request,
            &mut report,
        )
        .expect("merge");

        // The marker never reaches the identifier or the element.
        assert_eq!(plan.new, vec![RecordId::new("local", "res_thing_alpha_r0")]);
        let tracked = corpus
            .record(&RecordId::new("local", "res_thing_alpha_r0"))
            .expect("tracked");
        assert_eq!(
            document::element_fields(&tracked.element)
                .and_then(|f| f.get("name"))
                .cloned(),
            Some(json!("Alpha"))
        );

        let renamed = crate::store::RecordStore::read(&store, "res.thing", 1, &[])
            .expect("read");
        assert_eq!(renamed.get("name"), Some(&json!("Alpha")));
        assert!(report.is_clean());
    }

    #[test]
    fn rejected_rename_does_not_abort_the_batch() {
        let (_dir, mut corpus) = empty_corpus();
        let mut store = MemoryStore::new();
        for (handle, name) in [(1u64, "{IMP} Alpha"), (2, "{IMP} Beta")] {
            let mut fields = BTreeMap::new();
            fields.insert("name".to_string(), json!(name));
            store.insert_record("res.thing", handle, fields);
        }
        store.reject_writes("res.thing", 2, "constraint violated");
        let mut registry = IdentifierRegistry::new(corpus.declared_names());
        let spec = FieldSpec::parse("", "res.thing");
        let dispatch = DispatchSpec::parse("");
        let request = MergeRequest {
            tag: Some("IMP"),
            ..request(&spec, &dispatch)
        };
        let mut report = RunReport::new();

        let batch = candidates(&store, &[1, 2]);
        let plan = merge(
            &mut corpus,
            &mut registry,
            &mut store,
            batch,
            &request,
            &mut report,
        )
        .expect("merge");

        // Both records land in the corpus with clean names.
        assert_eq!(plan.len(), 2);
        assert!(corpus.is_tracked(&RecordId::new("local", "res_thing_alpha_r0")));
        assert!(corpus.is_tracked(&RecordId::new("local", "res_thing_beta_r0")));
        assert_eq!(report.count_of("store rejection"), 1);

        // The store keeps the marked name it refused to change.
        let refused = crate::store::RecordStore::read(&store, "res.thing", 2, &[])
            .expect("read");
        assert_eq!(refused.get("name"), Some(&json!("{IMP} Beta")));
    }

    #[test]
    fn field_spec_filters_the_element() {
        let store = store_with(&[(1, "Alpha")]);
        let spec = FieldSpec::parse("res.thing:-active", "res.thing");
        let record = &candidates(&store, &[1])[0];
        let element = build_element("res_thing_alpha_r0", "res.thing", record, &spec);
        let fields = document::element_fields(&element).expect("fields");
        assert!(fields.contains_key("name"));
        assert!(!fields.contains_key("active"));
        assert!(!fields.contains_key("write_uid"));
    }

    #[test]
    fn name_and_sequence_lead_the_field_order() {
        let mut store = MemoryStore::new();
        let mut fields = BTreeMap::new();
        fields.insert("active".to_string(), json!(true));
        fields.insert("sequence".to_string(), json!(5));
        fields.insert("name".to_string(), json!("Alpha"));
        store.insert_record("res.thing", 1, fields);

        let spec = FieldSpec::parse("", "res.thing");
        let record = &candidates(&store, &[1])[0];
        let element = build_element("x", "res.thing", record, &spec);
        let keys: Vec<&String> = document::element_fields(&element)
            .expect("fields")
            .keys()
            .collect();
        assert_eq!(keys, ["name", "sequence", "active"]);
    }

    #[test]
    fn bound_handles_sort_before_unbound() {
        let mut store = store_with(&[(1, "Zeta"), (2, "Alpha")]);
        store.bind_identifier("local", "res.thing", 1, "res_thing_zeta_r0");
        let registry = IdentifierRegistry::new(Vec::new());

        let batch = candidates(&store, &[1, 2]);
        let ordered = sort_candidates(&registry, &store, "res.thing", batch).expect("sort");
        assert_eq!(ordered[0].handle.id, 1);
        assert_eq!(ordered[1].handle.id, 2);
    }
}
