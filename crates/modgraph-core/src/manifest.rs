//! # Module Manifest
//!
//! `module.toml` at the module root declares the module name, the ordered
//! list of corpus data files, and the external modules it depends on.
//!
//! Two components rewrite it: the topological orderer replaces the `data`
//! list in place, and the graph builder appends inferred entries to
//! `depends`.

use crate::CorpusError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of the manifest at the module root.
pub const MANIFEST_FILE: &str = "module.toml";

/// Parsed module manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// The module name; also the namespace of its record identifiers.
    pub name: String,
    /// Optional human-readable version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Optional author line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Ordered list of corpus data files, relative to the module root.
    /// The order is the load order.
    #[serde(default)]
    pub data: Vec<String>,
    /// External modules this module's records reference.
    #[serde(default)]
    pub depends: Vec<String>,
}

impl Manifest {
    /// Load the manifest from a module root directory.
    pub fn load(root: &Path) -> Result<Self, CorpusError> {
        let path = root.join(MANIFEST_FILE);
        let source = std::fs::read_to_string(&path)
            .map_err(|e| CorpusError::io(path.display().to_string(), e))?;
        toml::from_str(&source).map_err(|e| CorpusError::Parse {
            file: MANIFEST_FILE.to_string(),
            message: e.to_string(),
        })
    }

    /// Write the manifest back to a module root directory.
    pub fn save(&self, root: &Path) -> Result<(), CorpusError> {
        let path = root.join(MANIFEST_FILE);
        let source =
            toml::to_string_pretty(self).map_err(|e| CorpusError::Serialization(e.to_string()))?;
        std::fs::write(&path, source).map_err(|e| CorpusError::io(path.display().to_string(), e))
    }

    /// Append a data file unless already listed. Returns whether the
    /// manifest changed.
    pub fn add_data_file(&mut self, file: &str) -> bool {
        if self.data.iter().any(|f| f == file) {
            return false;
        }
        self.data.push(file.to_string());
        true
    }

    /// Append a module dependency unless already declared. Returns whether
    /// the manifest changed.
    pub fn add_dependency(&mut self, module: &str) -> bool {
        if self.depends.iter().any(|m| m == module) {
            return false;
        }
        self.depends.push(module.to_string());
        true
    }

    /// Walk up from `start` to the closest directory containing a
    /// manifest.
    #[must_use]
    pub fn find_root(start: &Path) -> Option<PathBuf> {
        let mut dir = start;
        loop {
            if dir.join(MANIFEST_FILE).is_file() {
                return Some(dir.to_path_buf());
            }
            dir = dir.parent()?;
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
name = "my_module"
data = ["partners.json", "views.json"]
depends = ["base"]
"#;

    #[test]
    fn load_and_save_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(MANIFEST_FILE), SAMPLE).expect("write");

        let manifest = Manifest::load(dir.path()).expect("load");
        assert_eq!(manifest.name, "my_module");
        assert_eq!(manifest.data, vec!["partners.json", "views.json"]);
        assert_eq!(manifest.depends, vec!["base"]);

        manifest.save(dir.path()).expect("save");
        let back = Manifest::load(dir.path()).expect("reload");
        assert_eq!(manifest, back);
    }

    #[test]
    fn malformed_manifest_is_a_parse_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(MANIFEST_FILE), "name = [broken").expect("write");
        assert!(matches!(
            Manifest::load(dir.path()),
            Err(CorpusError::Parse { .. })
        ));
    }

    #[test]
    fn add_data_file_is_idempotent() {
        let mut manifest = Manifest::default();
        assert!(manifest.add_data_file("a.json"));
        assert!(!manifest.add_data_file("a.json"));
        assert_eq!(manifest.data, vec!["a.json"]);
    }

    #[test]
    fn add_dependency_is_idempotent() {
        let mut manifest = Manifest::default();
        assert!(manifest.add_dependency("base"));
        assert!(!manifest.add_dependency("base"));
        assert_eq!(manifest.depends, vec!["base"]);
    }

    #[test]
    fn find_root_walks_up() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(MANIFEST_FILE), SAMPLE).expect("write");
        let nested = dir.path().join("sub/dir");
        std::fs::create_dir_all(&nested).expect("mkdir");

        let root = Manifest::find_root(&nested).expect("found");
        assert_eq!(root, dir.path());

        assert!(Manifest::find_root(Path::new("/nonexistent/nowhere")).is_none());
    }
}
