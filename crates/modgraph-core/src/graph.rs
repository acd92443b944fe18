//! # Dependency Graph
//!
//! Projects the corpus into two graphs: record-level dependency edges
//! (restricted to identities the corpus itself declares) and the
//! file-level graph they induce. Cycle detection runs at both levels;
//! record cycles are reported with the offending chain, file cycles feed
//! the reordering pass.

use crate::loader::Corpus;
use crate::report::{RunReport, Warning};
use crate::types::{RecordId, RecordStatus};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// TYPES
// =============================================================================

/// Record and file dependency edges for one corpus.
#[derive(Debug, Default)]
pub struct DepGraph {
    /// Record → records it depends on. Edges only between tracked records.
    record_deps: BTreeMap<RecordId, BTreeSet<RecordId>>,
    /// Record → declaring file.
    declaring_file: BTreeMap<RecordId, String>,
    /// File → files it depends on (cross-file record edges; self-edges
    /// are dropped, an intra-file forward reference is not an ordering
    /// problem).
    file_deps: BTreeMap<String, BTreeSet<String>>,
}

/// One record-level cycle, anchored at its lexically-first member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub record: RecordId,
    pub file: String,
    /// The cycle's members in traversal order, ending back at `record`.
    pub chain: Vec<RecordId>,
}

impl DepGraph {
    /// Dependencies of one record, empty set if it has none.
    #[must_use]
    pub fn deps_of(&self, id: &RecordId) -> BTreeSet<RecordId> {
        self.record_deps.get(id).cloned().unwrap_or_default()
    }

    /// File-level dependency edges.
    #[must_use]
    pub fn file_deps(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.file_deps
    }

    /// Whether `from` depends on `to` at file level.
    #[must_use]
    pub fn file_depends_on(&self, from: &str, to: &str) -> bool {
        self.file_deps.get(from).is_some_and(|deps| deps.contains(to))
    }
}

// =============================================================================
// CONSTRUCTION
// =============================================================================

/// Build the dependency graph of a loaded corpus and advance every
/// inserted record to [`RecordStatus::GraphInserted`].
///
/// Edges to identities outside the corpus (other modules, unresolved
/// names) are excluded; the loader already reported those. Insertion is
/// incremental in identity order, and each insertion is followed by a
/// cycle probe from the new record so that the first edge closing a
/// cycle is the one attributed in the warning.
#[must_use]
pub fn build_graph(corpus: &mut Corpus, report: &mut RunReport) -> DepGraph {
    let mut graph = DepGraph::default();

    for record in corpus.records() {
        let deps: BTreeSet<RecordId> = record
            .deps
            .iter()
            .filter(|dep| corpus.is_tracked(dep))
            .cloned()
            .collect();

        for dep in &deps {
            if let Some(dep_record) = corpus.record(dep) {
                if dep_record.file != record.file {
                    graph
                        .file_deps
                        .entry(record.file.clone())
                        .or_default()
                        .insert(dep_record.file.clone());
                }
            }
        }

        graph.declaring_file.insert(record.id.clone(), record.file.clone());
        graph.record_deps.insert(record.id.clone(), deps);

        if let Some(chain) = probe_cycle(&graph.record_deps, &record.id) {
            report.warn(Warning::CyclicDependency {
                file: record.file.clone(),
                record: record.id.clone(),
                chain,
            });
        }
    }

    let inserted: Vec<RecordId> = graph.record_deps.keys().cloned().collect();
    for id in &inserted {
        corpus.advance_status(id, RecordStatus::GraphInserted);
    }

    tracing::debug!(
        records = graph.record_deps.len(),
        files = graph.file_deps.len(),
        "dependency graph built"
    );
    graph
}

/// Depth-first probe for a path from `start` back to itself. Only edges
/// present so far participate, so a cycle is reported exactly once, when
/// its last record is inserted.
fn probe_cycle(
    deps: &BTreeMap<RecordId, BTreeSet<RecordId>>,
    start: &RecordId,
) -> Option<Vec<RecordId>> {
    fn dfs(
        deps: &BTreeMap<RecordId, BTreeSet<RecordId>>,
        node: &RecordId,
        start: &RecordId,
        path: &mut Vec<RecordId>,
        visited: &mut BTreeSet<RecordId>,
    ) -> bool {
        path.push(node.clone());
        if let Some(children) = deps.get(node) {
            for child in children {
                if child == start {
                    path.push(child.clone());
                    return true;
                }
                if visited.insert(child.clone())
                    && dfs(deps, child, start, path, visited)
                {
                    return true;
                }
            }
        }
        path.pop();
        false
    }

    let mut path: Vec<RecordId> = Vec::new();
    let mut visited: BTreeSet<RecordId> = BTreeSet::new();
    visited.insert(start.clone());
    if dfs(deps, start, start, &mut path, &mut visited) {
        Some(path)
    } else {
        None
    }
}

// =============================================================================
// CYCLE ENUMERATION
// =============================================================================

/// Enumerate record cycles in a completed graph, one report per distinct
/// cycle (membership-deduplicated).
#[must_use]
pub fn check_cycles(graph: &DepGraph) -> Vec<CycleReport> {
    let mut seen: BTreeSet<Vec<RecordId>> = BTreeSet::new();
    let mut reports = Vec::new();

    for id in graph.record_deps.keys() {
        let Some(chain) = probe_cycle(&graph.record_deps, id) else {
            continue;
        };
        let mut membership: Vec<RecordId> = chain[..chain.len() - 1].to_vec();
        membership.sort();
        if !seen.insert(membership) {
            continue;
        }
        let file = graph
            .declaring_file
            .get(id)
            .cloned()
            .unwrap_or_default();
        reports.push(CycleReport {
            record: id.clone(),
            file,
            chain,
        });
    }
    reports
}

// =============================================================================
// TESTS
// =============================================================================
