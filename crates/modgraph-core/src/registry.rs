//! # Identifier Registry
//!
//! Allocates and looks up the stable `(module, name)` identifier bound to
//! a `(model, handle)` pair.
//!
//! The registry is the single source of truth for name uniqueness within
//! a run. Entries are append-only: once a name is reserved it is never
//! overwritten. Names are probed as `{model}_{seed}_r{N}` for N = 0, 1, …
//! against three namespaces at once — this session's entries, the names
//! the external store already holds for the module and model, and the
//! names declared in currently loaded files. A reservation that races and
//! loses at commit time re-enters generation at the next candidate; the
//! collision never surfaces to the caller.

use crate::primitives::{IDENTIFIER_SUFFIX_RESERVE, MAX_IDENTIFIER_LENGTH};
use crate::store::{RecordStore, ReserveOutcome};
use crate::{CorpusError, RecordHandle, RecordId};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// NAME NORMALIZATION
// =============================================================================

/// Normalize a name fragment into the identifier alphabet
/// (lowercase letters, digits, underscore), truncated to `max_len`.
#[must_use]
pub fn normalize_token(name: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(name.len().min(max_len));
    for ch in name.chars() {
        let mapped = match ch {
            '.' | ' ' => '_',
            c if c.is_ascii_alphanumeric() || c == '_' => c.to_ascii_lowercase(),
            _ => continue,
        };
        if out.len() >= max_len {
            break;
        }
        out.push(mapped);
    }
    out
}

/// Natural sort key: digit runs compare numerically, the rest as text.
///
/// Used to keep `thing_r2` before `thing_r10` when ordering records by
/// identifier.
#[must_use]
pub fn natural_sort_key(name: &str) -> Vec<NaturalPart> {
    let mut parts = Vec::new();
    let mut text = String::new();
    let mut digits = String::new();
    for ch in name.chars() {
        if ch.is_ascii_digit() {
            if !text.is_empty() {
                parts.push(NaturalPart::Text(std::mem::take(&mut text)));
            }
            digits.push(ch);
        } else {
            if !digits.is_empty() {
                let run = std::mem::take(&mut digits);
                parts.push(NaturalPart::Number(run.parse().unwrap_or(u64::MAX)));
            }
            text.push(ch);
        }
    }
    if !text.is_empty() {
        parts.push(NaturalPart::Text(text));
    }
    if !digits.is_empty() {
        parts.push(NaturalPart::Number(digits.parse().unwrap_or(u64::MAX)));
    }
    parts
}

/// One segment of a natural sort key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum NaturalPart {
    /// A numeric run, compared by value. Ordered before text so that
    /// `a1` < `ab`.
    Number(u64),
    /// A non-numeric run, compared lexicographically.
    Text(String),
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Session-scoped identifier registry.
///
/// The external store is passed into each operation rather than owned, so
/// the registry itself stays a plain deterministic map.
#[derive(Debug, Default)]
pub struct IdentifierRegistry {
    /// Session entries: handle -> identifier. Append-only.
    session: BTreeMap<RecordHandle, RecordId>,
    /// Names declared in currently loaded corpus files.
    file_names: BTreeSet<String>,
}

impl IdentifierRegistry {
    /// Create a registry seeded with the names declared in loaded files.
    #[must_use]
    pub fn new(file_names: impl IntoIterator<Item = String>) -> Self {
        Self {
            session: BTreeMap::new(),
            file_names: file_names.into_iter().collect(),
        }
    }

    /// Look up the identifier bound to `(model, handle)`.
    ///
    /// Session entries are consulted first, then the external store.
    pub fn lookup(
        &self,
        store: &dyn RecordStore,
        model: &str,
        handle: u64,
    ) -> Result<Option<RecordId>, CorpusError> {
        let key = RecordHandle::new(model, handle);
        if let Some(id) = self.session.get(&key) {
            return Ok(Some(id.clone()));
        }
        Ok(store.get_identifier(model, handle)?)
    }

    /// Allocate (or return) the identifier for `(model, handle)`.
    ///
    /// Idempotent: an already-registered pair returns its existing
    /// identifier. Otherwise candidate names are generated from the
    /// normalized model and seed and the first free one is reserved
    /// against the store before being returned.
    pub fn create(
        &mut self,
        store: &mut dyn RecordStore,
        module: &str,
        model: &str,
        handle: u64,
        seed: &str,
    ) -> Result<RecordId, CorpusError> {
        if let Some(existing) = self.lookup(store, model, handle)? {
            return Ok(existing);
        }

        let mut taken: BTreeSet<String> = self
            .session
            .values()
            .filter(|id| id.module == module)
            .map(|id| id.name.clone())
            .collect();
        taken.extend(store.list_identifier_names(module, model)?);
        taken.extend(self.file_names.iter().cloned());

        let model_token = normalize_token(model, MAX_IDENTIFIER_LENGTH);
        let seed_budget = MAX_IDENTIFIER_LENGTH
            .saturating_sub(IDENTIFIER_SUFFIX_RESERVE)
            .saturating_sub(model_token.len());
        let seed_token = normalize_token(seed, seed_budget);

        let mut counter: u64 = 0;
        loop {
            let name = format!("{model_token}_{seed_token}_r{counter}");
            if taken.contains(&name) {
                counter += 1;
                continue;
            }
            match store.reserve_identifier(module, model, handle, &name)? {
                ReserveOutcome::Reserved => {
                    tracing::debug!(model, handle, name = %name, "generated identifier");
                    let id = RecordId::new(module, name);
                    self.session
                        .insert(RecordHandle::new(model, handle), id.clone());
                    return Ok(id);
                }
                ReserveOutcome::Conflict => {
                    // Lost a reservation race; the name is taken after all.
                    taken.insert(name);
                    counter += 1;
                }
            }
        }
    }

    /// Number of identifiers allocated or resolved this session.
    #[must_use]
    pub fn session_len(&self) -> usize {
        self.session.len()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn normalize_maps_into_safe_alphabet() {
        assert_eq!(normalize_token("res.partner", 128), "res_partner");
        assert_eq!(normalize_token("Acme & Co. (HQ)", 128), "acme__co__hq");
        assert_eq!(normalize_token("éléphant", 128), "lphant");
    }

    #[test]
    fn normalize_truncates_to_budget() {
        assert_eq!(normalize_token("abcdefgh", 4), "abcd");
    }

    #[test]
    fn create_generates_expected_name() {
        let mut store = MemoryStore::new();
        let mut registry = IdentifierRegistry::default();

        let id = registry
            .create(&mut store, "local", "res.partner", 7, "Acme Corp")
            .expect("create");

        assert_eq!(id, RecordId::new("local", "res_partner_acme_corp_r0"));
    }

    #[test]
    fn create_is_idempotent() {
        let mut store = MemoryStore::new();
        let mut registry = IdentifierRegistry::default();

        let first = registry
            .create(&mut store, "local", "res.partner", 7, "Acme")
            .expect("create");
        let second = registry
            .create(&mut store, "local", "res.partner", 7, "Acme")
            .expect("create");

        assert_eq!(first, second);
        assert_eq!(registry.session_len(), 1);
    }

    #[test]
    fn create_skips_names_taken_in_session() {
        let mut store = MemoryStore::new();
        let mut registry = IdentifierRegistry::default();

        let a = registry
            .create(&mut store, "local", "res.partner", 1, "Acme")
            .expect("create");
        let b = registry
            .create(&mut store, "local", "res.partner", 2, "Acme")
            .expect("create");

        assert_eq!(a.name, "res_partner_acme_r0");
        assert_eq!(b.name, "res_partner_acme_r1");
    }

    #[test]
    fn create_skips_names_declared_in_files() {
        let mut store = MemoryStore::new();
        let mut registry =
            IdentifierRegistry::new(["res_partner_acme_r0".to_string()]);

        let id = registry
            .create(&mut store, "local", "res.partner", 1, "Acme")
            .expect("create");
        assert_eq!(id.name, "res_partner_acme_r1");
    }

    #[test]
    fn create_skips_names_reserved_in_store() {
        let mut store = MemoryStore::new();
        store.bind_identifier("local", "res.partner", 99, "res_partner_acme_r0");
        let mut registry = IdentifierRegistry::default();

        let id = registry
            .create(&mut store, "local", "res.partner", 1, "Acme")
            .expect("create");
        assert_eq!(id.name, "res_partner_acme_r1");
    }

    #[test]
    fn lookup_falls_back_to_store() {
        let mut store = MemoryStore::new();
        store.bind_identifier("base", "res.partner", 1, "main_partner");
        let registry = IdentifierRegistry::default();

        let id = registry
            .lookup(&store, "res.partner", 1)
            .expect("lookup");
        assert_eq!(id, Some(RecordId::new("base", "main_partner")));
    }

    #[test]
    fn reservation_race_retries_next_candidate() {
        let mut store = MemoryStore::new();
        store.inject_conflict_once("res_partner_acme_r0");
        let mut registry = IdentifierRegistry::default();

        let id = registry
            .create(&mut store, "local", "res.partner", 1, "Acme")
            .expect("create");
        assert_eq!(id.name, "res_partner_acme_r1");
    }

    #[test]
    fn generated_names_respect_the_length_bound() {
        let mut store = MemoryStore::new();
        let mut registry = IdentifierRegistry::default();
        let long_seed = "x".repeat(500);

        let id = registry
            .create(&mut store, "local", "res.partner", 1, &long_seed)
            .expect("create");
        assert!(id.name.len() <= MAX_IDENTIFIER_LENGTH);
        assert!(id.name.starts_with("res_partner_xxx"));
        assert!(id.name.ends_with("_r0"));
    }

    #[test]
    fn natural_sort_orders_numeric_runs_by_value() {
        let mut names = vec!["thing_r10", "thing_r2", "thing_r1"];
        names.sort_by_key(|n| natural_sort_key(n));
        assert_eq!(names, vec!["thing_r1", "thing_r2", "thing_r10"]);
    }
}
