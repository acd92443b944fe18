//! # Corpus Loader
//!
//! Loads the module's corpus: parses every data file listed in the
//! manifest, indexes the declared records, and derives each record's
//! dependency set through the reference extractor.
//!
//! The loader exclusively owns the in-memory trees for the duration of a
//! run. The merge engine is the only component allowed to mutate them,
//! through the narrow mutation API at the bottom of this file; every
//! mutation marks its file dirty, and only dirty files are rewritten by
//! the final write phase.

use crate::document::{self, Document};
use crate::extract::extract_refs;
use crate::manifest::Manifest;
use crate::report::{RunReport, Warning};
use crate::{CorpusError, RecordId, RecordStatus};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

// =============================================================================
// TRACKED RECORDS
// =============================================================================

/// One record declared in a loaded corpus file.
#[derive(Debug, Clone)]
pub struct TrackedRecord {
    /// The record's stable identity.
    pub id: RecordId,
    /// The model it instantiates.
    pub model: String,
    /// Declaring file, relative to the module root.
    pub file: String,
    /// Position within the file's record container.
    pub index: usize,
    /// The serialized tree element.
    pub element: Value,
    /// Identities this record depends on.
    pub deps: BTreeSet<RecordId>,
    /// Merge status. Records are never deleted, only superseded in place.
    pub status: RecordStatus,
    /// How many times this run replaced the element.
    pub revision: u64,
}

// =============================================================================
// CORPUS
// =============================================================================

/// The full set of loaded files and the records they declare.
#[derive(Debug)]
pub struct Corpus {
    root: PathBuf,
    manifest: Manifest,
    manifest_dirty: bool,
    /// Parsed documents, keyed by manifest-relative path.
    documents: BTreeMap<String, Document>,
    /// Files in manifest order that actually loaded.
    file_order: Vec<String>,
    records: BTreeMap<RecordId, TrackedRecord>,
    dirty: BTreeSet<String>,
}

impl Corpus {
    /// Load the corpus of the module rooted at `root`.
    ///
    /// Fatal conditions (malformed document, record without an `id`)
    /// abort the load; recoverable findings (missing files, unresolved
    /// references, undeclared module dependencies) go to `report` and the
    /// load continues. Undeclared module dependencies are also appended
    /// to the manifest's `depends` list.
    pub fn load(root: &Path, manifest: Manifest, report: &mut RunReport) -> Result<Self, CorpusError> {
        let mut corpus = Self {
            root: root.to_path_buf(),
            manifest,
            manifest_dirty: false,
            documents: BTreeMap::new(),
            file_order: Vec::new(),
            records: BTreeMap::new(),
            dirty: BTreeSet::new(),
        };

        let files: Vec<String> = corpus.manifest.data.clone();
        for file in files {
            let path = corpus.root.join(&file);
            if !path.is_file() {
                report.warn(Warning::MissingFile { file: file.clone() });
                continue;
            }
            let source = std::fs::read_to_string(&path)
                .map_err(|e| CorpusError::io(path.display().to_string(), e))?;
            let doc = Document::parse(&source, &file)?;
            corpus.index_document(&file, &doc)?;
            corpus.documents.insert(file.clone(), doc);
            corpus.file_order.push(file);
        }

        corpus.check_references(report);
        tracing::info!(
            files = corpus.file_order.len(),
            records = corpus.records.len(),
            "loaded corpus for module {}",
            corpus.module()
        );
        Ok(corpus)
    }

    fn index_document(&mut self, file: &str, doc: &Document) -> Result<(), CorpusError> {
        let module = self.manifest.name.clone();
        for (index, element) in doc.records().iter().enumerate() {
            let Some(name) = document::element_id(element) else {
                return Err(CorpusError::MissingIdentifierAttribute {
                    file: file.to_string(),
                    index,
                });
            };
            let Some(model) = document::element_model(element) else {
                return Err(CorpusError::Parse {
                    file: file.to_string(),
                    message: format!("record {name:?} has no model attribute"),
                });
            };
            let id = RecordId::new(module.clone(), name);
            if let Some(previous) = self.records.get(&id) {
                return Err(CorpusError::Parse {
                    file: file.to_string(),
                    message: format!(
                        "record {name:?} already declared in {}",
                        previous.file
                    ),
                });
            }
            let deps = extract_refs(element, &module)?.into_iter().collect();
            self.records.insert(id.clone(), TrackedRecord {
                id,
                model: model.to_string(),
                file: file.to_string(),
                index,
                element: element.clone(),
                deps,
                status: RecordStatus::Matched,
                revision: 0,
            });
        }
        Ok(())
    }

    /// Resolution pass over every dependency edge, once all files are
    /// indexed. References to artifacts of model declarations
    /// (`model_*` names) are exempt, as the store materializes those.
    fn check_references(&mut self, report: &mut RunReport) {
        let module = self.manifest.name.clone();
        let mut inferred: Vec<(String, RecordId, String)> = Vec::new();

        for record in self.records.values() {
            for dep in &record.deps {
                if dep.module == module {
                    if !self.records.contains_key(dep) && !dep.name.starts_with("model_") {
                        report.warn(Warning::UnresolvedReference {
                            file: record.file.clone(),
                            record: record.id.clone(),
                            target: dep.clone(),
                        });
                    }
                } else if !self.manifest.depends.iter().any(|m| *m == dep.module)
                    && !inferred.iter().any(|(m, _, _)| *m == dep.module)
                {
                    inferred.push((dep.module.clone(), record.id.clone(), record.file.clone()));
                }
            }
        }

        for (module, record, file) in inferred {
            if self.manifest.add_dependency(&module) {
                self.manifest_dirty = true;
            }
            report.warn(Warning::UndeclaredModuleDependency {
                file,
                record,
                module,
            });
        }
    }

    // -------------------------------------------------------------------------
    // read access
    // -------------------------------------------------------------------------

    /// The module name this corpus belongs to.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.manifest.name
    }

    /// The manifest as currently amended.
    #[must_use]
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Loaded files, in manifest order.
    #[must_use]
    pub fn files(&self) -> &[String] {
        &self.file_order
    }

    /// All tracked records, in identity order.
    pub fn records(&self) -> impl Iterator<Item = &TrackedRecord> {
        self.records.values()
    }

    /// One tracked record.
    #[must_use]
    pub fn record(&self, id: &RecordId) -> Option<&TrackedRecord> {
        self.records.get(id)
    }

    /// Whether an identity is declared in the loaded corpus.
    #[must_use]
    pub fn is_tracked(&self, id: &RecordId) -> bool {
        self.records.contains_key(id)
    }

    /// Record identities declared by one file, in document order.
    #[must_use]
    pub fn records_in_file(&self, file: &str) -> Vec<RecordId> {
        let mut ids: Vec<(usize, RecordId)> = self
            .records
            .values()
            .filter(|r| r.file == file)
            .map(|r| (r.index, r.id.clone()))
            .collect();
        ids.sort_by_key(|(index, _)| *index);
        ids.into_iter().map(|(_, id)| id).collect()
    }

    /// Names declared in loaded files, for seeding the identifier
    /// registry.
    #[must_use]
    pub fn declared_names(&self) -> Vec<String> {
        self.records.keys().map(|id| id.name.clone()).collect()
    }

    // -------------------------------------------------------------------------
    // mutation API (merge engine only)
    // -------------------------------------------------------------------------

    /// Replace a tracked record's element in place, preserving siblings
    /// and position, and bump its revision counter.
    pub fn replace_element(&mut self, id: &RecordId, element: Value) -> Result<(), CorpusError> {
        let Some(record) = self.records.get_mut(id) else {
            return Err(CorpusError::Serialization(format!(
                "cannot replace untracked record {id}"
            )));
        };
        let Some(doc) = self.documents.get_mut(&record.file) else {
            return Err(CorpusError::Serialization(format!(
                "no document for {}",
                record.file
            )));
        };
        if doc.replace_child(record.index, element.clone()).is_none() {
            return Err(CorpusError::Serialization(format!(
                "record container of {} is shorter than expected",
                record.file
            )));
        }
        record.element = element;
        record.revision += 1;
        record.status = RecordStatus::Changed;
        self.dirty.insert(record.file.clone());
        Ok(())
    }

    /// Append a freshly created record to a destination file, creating a
    /// minimal empty container (and manifest entry) if the file is new to
    /// the corpus.
    pub fn append_element(
        &mut self,
        file: &str,
        id: RecordId,
        model: &str,
        element: Value,
        deps: BTreeSet<RecordId>,
    ) {
        if !self.documents.contains_key(file) {
            self.documents.insert(file.to_string(), Document::empty());
            self.file_order.push(file.to_string());
            if self.manifest.add_data_file(file) {
                self.manifest_dirty = true;
            }
        }
        // contains_key checked just above
        let Some(doc) = self.documents.get_mut(file) else {
            return;
        };
        let index = doc.len();
        doc.append_child(element.clone());
        self.records.insert(id.clone(), TrackedRecord {
            id,
            model: model.to_string(),
            file: file.to_string(),
            index,
            element,
            deps,
            status: RecordStatus::New,
            revision: 0,
        });
        self.dirty.insert(file.to_string());
    }

    /// Advance a record along the status machine. Transitions the
    /// machine does not allow are ignored.
    pub fn advance_status(&mut self, id: &RecordId, status: RecordStatus) {
        if let Some(record) = self.records.get_mut(id) {
            if record.status.can_advance_to(status) {
                record.status = status;
            }
        }
    }

    /// Replace the manifest's data list with a corrected order.
    pub fn apply_file_order(&mut self, order: Vec<String>) {
        if self.manifest.data != order {
            self.manifest.data = order;
            self.manifest_dirty = true;
        }
    }

    // -------------------------------------------------------------------------
    // write phase
    // -------------------------------------------------------------------------

    /// Whether any file or the manifest has pending changes.
    #[must_use]
    pub fn has_pending_writes(&self) -> bool {
        !self.dirty.is_empty() || self.manifest_dirty
    }

    /// Write every dirty file (and the manifest, if amended) back to
    /// disk. Returns the files written, manifest excluded. Each write is
    /// atomic only with respect to that single file.
    pub fn write_dirty(&mut self) -> Result<Vec<String>, CorpusError> {
        let mut written = Vec::new();
        for file in std::mem::take(&mut self.dirty) {
            let Some(doc) = self.documents.get(&file) else {
                continue;
            };
            let path = self.root.join(&file);
            std::fs::write(&path, doc.to_source()?)
                .map_err(|e| CorpusError::io(path.display().to_string(), e))?;
            tracing::info!("wrote {file}");
            written.push(file);
        }
        if self.manifest_dirty {
            self.manifest.save(&self.root)?;
            self.manifest_dirty = false;
            tracing::info!("wrote manifest");
        }
        Ok(written)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_module(files: &[(&str, Value)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        let data: Vec<String> = files.iter().map(|(name, _)| (*name).to_string()).collect();
        let manifest = Manifest {
            name: "local".to_string(),
            data,
            depends: vec!["base".to_string()],
            ..Manifest::default()
        };
        manifest.save(dir.path()).expect("manifest");
        for (name, content) in files {
            std::fs::write(
                dir.path().join(name),
                serde_json::to_string_pretty(content).expect("json"),
            )
            .expect("write file");
        }
        dir
    }

    fn record(id: &str, model: &str, fields: Value) -> Value {
        json!({ "id": id, "model": model, "fields": fields })
    }

    #[test]
    fn load_indexes_records_and_deps() {
        let dir = write_module(&[(
            "things.json",
            json!({ "records": [
                record("a", "res.thing", json!({ "name": "A" })),
                record("b", "res.thing", json!({ "parent_id": { "ref": "a" } })),
            ]}),
        )]);

        let mut report = RunReport::new();
        let manifest = Manifest::load(dir.path()).expect("manifest");
        let corpus = Corpus::load(dir.path(), manifest, &mut report).expect("load");

        assert!(report.is_clean());
        assert_eq!(corpus.records().count(), 2);
        let b = corpus
            .record(&RecordId::new("local", "b"))
            .expect("tracked");
        assert!(b.deps.contains(&RecordId::new("local", "a")));
        assert_eq!(corpus.records_in_file("things.json"), vec![
            RecordId::new("local", "a"),
            RecordId::new("local", "b"),
        ]);
    }

    #[test]
    fn missing_id_is_fatal_for_the_file() {
        let dir = write_module(&[(
            "things.json",
            json!({ "records": [ { "model": "res.thing", "fields": {} } ] }),
        )]);

        let mut report = RunReport::new();
        let manifest = Manifest::load(dir.path()).expect("manifest");
        let err = Corpus::load(dir.path(), manifest, &mut report);
        assert!(matches!(
            err,
            Err(CorpusError::MissingIdentifierAttribute { index: 0, .. })
        ));
    }

    #[test]
    fn missing_file_is_a_warning() {
        let dir = write_module(&[]);
        let mut manifest = Manifest::load(dir.path()).expect("manifest");
        manifest.data.push("ghost.json".to_string());

        let mut report = RunReport::new();
        let corpus = Corpus::load(dir.path(), manifest, &mut report).expect("load");
        assert_eq!(report.count_of("missing file"), 1);
        assert!(corpus.files().is_empty());
    }

    #[test]
    fn unresolved_reference_is_a_warning() {
        let dir = write_module(&[(
            "things.json",
            json!({ "records": [
                record("a", "res.thing", json!({ "parent_id": { "ref": "ghost" } })),
            ]}),
        )]);

        let mut report = RunReport::new();
        let manifest = Manifest::load(dir.path()).expect("manifest");
        Corpus::load(dir.path(), manifest, &mut report).expect("load");
        assert_eq!(report.count_of("unresolved reference"), 1);
    }

    #[test]
    fn undeclared_module_dependency_is_inferred() {
        let dir = write_module(&[(
            "things.json",
            json!({ "records": [
                record("a", "res.thing", json!({ "user_id": { "ref": "mail.root_user" } })),
            ]}),
        )]);

        let mut report = RunReport::new();
        let manifest = Manifest::load(dir.path()).expect("manifest");
        let corpus = Corpus::load(dir.path(), manifest, &mut report).expect("load");

        assert_eq!(report.count_of("undeclared module dependency"), 1);
        assert_eq!(corpus.manifest().depends, vec!["base", "mail"]);
        assert!(corpus.has_pending_writes());
    }

    #[test]
    fn duplicate_identifier_is_a_parse_error() {
        let dir = write_module(&[
            (
                "one.json",
                json!({ "records": [ record("a", "res.thing", json!({})) ] }),
            ),
            (
                "two.json",
                json!({ "records": [ record("a", "res.thing", json!({})) ] }),
            ),
        ]);

        let mut report = RunReport::new();
        let manifest = Manifest::load(dir.path()).expect("manifest");
        assert!(matches!(
            Corpus::load(dir.path(), manifest, &mut report),
            Err(CorpusError::Parse { .. })
        ));
    }

    #[test]
    fn write_dirty_rewrites_only_touched_files() {
        let dir = write_module(&[
            (
                "one.json",
                json!({ "records": [ record("a", "res.thing", json!({ "name": "A" })) ] }),
            ),
            (
                "two.json",
                json!({ "records": [ record("b", "res.thing", json!({ "name": "B" })) ] }),
            ),
        ]);

        let mut report = RunReport::new();
        let manifest = Manifest::load(dir.path()).expect("manifest");
        let mut corpus = Corpus::load(dir.path(), manifest, &mut report).expect("load");

        corpus
            .replace_element(
                &RecordId::new("local", "a"),
                record("a", "res.thing", json!({ "name": "A2" })),
            )
            .expect("replace");

        let written = corpus.write_dirty().expect("write");
        assert_eq!(written, vec!["one.json"]);

        let source = std::fs::read_to_string(dir.path().join("one.json")).expect("read");
        assert!(source.contains("A2"));
        let untouched = std::fs::read_to_string(dir.path().join("two.json")).expect("read");
        assert!(untouched.contains("\"B\""));
    }

    #[test]
    fn append_element_creates_container_and_manifest_entry() {
        let dir = write_module(&[]);
        let mut report = RunReport::new();
        let manifest = Manifest::load(dir.path()).expect("manifest");
        let mut corpus = Corpus::load(dir.path(), manifest, &mut report).expect("load");

        corpus.append_element(
            "fresh.json",
            RecordId::new("local", "new_one"),
            "res.thing",
            record("new_one", "res.thing", json!({})),
            BTreeSet::new(),
        );

        assert!(corpus.is_tracked(&RecordId::new("local", "new_one")));
        assert!(corpus.manifest().data.contains(&"fresh.json".to_string()));

        let written = corpus.write_dirty().expect("write");
        assert_eq!(written, vec!["fresh.json"]);
        assert!(dir.path().join("fresh.json").is_file());
    }
}
