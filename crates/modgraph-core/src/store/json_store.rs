//! Snapshot-file record store.
//!
//! A JSON file holding models, records and identifier bindings stands in
//! for the remote record store: good enough for local runs, test fixtures
//! and offline work. Mutations are buffered in memory and flushed by
//! [`JsonStore::save`].

use super::{MemoryStore, RecordFilter, RecordStore, ReserveOutcome, StoreError, StoreRecord};
use crate::{CorpusError, RecordId};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A record store backed by a JSON snapshot file.
#[derive(Debug)]
pub struct JsonStore {
    path: PathBuf,
    inner: MemoryStore,
    dirty: bool,
}

impl JsonStore {
    /// Open a snapshot file.
    ///
    /// A missing file is a connection-class failure: the run cannot tell
    /// an absent store from an unreachable one.
    pub fn open(path: &Path) -> Result<Self, CorpusError> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Connection(format!("{}: {e}", path.display())))?;
        let inner: MemoryStore = serde_json::from_str(&source)
            .map_err(|e| StoreError::Connection(format!("{}: {e}", path.display())))?;
        Ok(Self {
            path: path.to_path_buf(),
            inner,
            dirty: false,
        })
    }

    /// Write the snapshot back to disk if anything changed.
    pub fn save(&mut self) -> Result<(), CorpusError> {
        if !self.dirty {
            return Ok(());
        }
        let source = serde_json::to_string_pretty(&self.inner)
            .map_err(|e| CorpusError::Serialization(e.to_string()))?;
        std::fs::write(&self.path, source)
            .map_err(|e| CorpusError::io(self.path.display().to_string(), e))?;
        self.dirty = false;
        Ok(())
    }
}

impl RecordStore for JsonStore {
    fn exists(&self, model: &str) -> Result<bool, StoreError> {
        self.inner.exists(model)
    }

    fn list_matching(
        &self,
        model: &str,
        filter: &RecordFilter,
    ) -> Result<Vec<StoreRecord>, StoreError> {
        self.inner.list_matching(model, filter)
    }

    fn get_identifier(&self, model: &str, handle: u64) -> Result<Option<RecordId>, StoreError> {
        self.inner.get_identifier(model, handle)
    }

    fn reserve_identifier(
        &mut self,
        module: &str,
        model: &str,
        handle: u64,
        name: &str,
    ) -> Result<ReserveOutcome, StoreError> {
        let outcome = self.inner.reserve_identifier(module, model, handle, name)?;
        if outcome == ReserveOutcome::Reserved {
            self.dirty = true;
        }
        Ok(outcome)
    }

    fn list_identifier_names(
        &self,
        module: &str,
        model: &str,
    ) -> Result<Vec<String>, StoreError> {
        self.inner.list_identifier_names(module, model)
    }

    fn read(
        &self,
        model: &str,
        handle: u64,
        fields: &[String],
    ) -> Result<BTreeMap<String, Value>, StoreError> {
        self.inner.read(model, handle, fields)
    }

    fn write(
        &mut self,
        model: &str,
        handle: u64,
        fields: &BTreeMap<String, Value>,
    ) -> Result<(), StoreError> {
        self.inner.write(model, handle, fields)?;
        self.dirty = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot() -> String {
        serde_json::to_string(&json!({
            "models": {
                "res.partner": {
                    "1": { "name": "Acme" }
                }
            },
            "identifiers": [
                { "module": "base", "model": "res.partner", "id": 1, "name": "main_partner" }
            ]
        }))
        .expect("snapshot json")
    }

    #[test]
    fn open_reads_snapshot() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.json");
        std::fs::write(&path, snapshot()).expect("write snapshot");

        let store = JsonStore::open(&path).expect("open");
        assert!(store.exists("res.partner").expect("exists"));
        assert_eq!(
            store.get_identifier("res.partner", 1).expect("get"),
            Some(RecordId::new("base", "main_partner"))
        );
    }

    #[test]
    fn missing_snapshot_is_a_connection_failure() {
        let err = JsonStore::open(Path::new("/nonexistent/store.json"));
        assert!(matches!(
            err,
            Err(CorpusError::Store(StoreError::Connection(_)))
        ));
    }

    #[test]
    fn save_persists_reservations() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.json");
        std::fs::write(&path, snapshot()).expect("write snapshot");

        let mut store = JsonStore::open(&path).expect("open");
        let outcome = store
            .reserve_identifier("local", "res.partner", 1, "res_partner_acme_r0")
            .expect("reserve");
        assert_eq!(outcome, ReserveOutcome::Reserved);
        store.save().expect("save");

        let reopened = JsonStore::open(&path).expect("reopen");
        let names = reopened
            .list_identifier_names("local", "res.partner")
            .expect("list");
        assert_eq!(names, vec!["res_partner_acme_r0"]);
    }
}
