//! # File Ordering
//!
//! Topological correction of the manifest's data file list. Files load
//! in manifest order, so a file must come after every file it depends
//! on. The pass is stable: among eligible files the original relative
//! order is preserved, and an already-valid list passes through
//! unchanged.

use crate::graph::DepGraph;
use crate::report::{RunReport, Warning};
use std::collections::BTreeSet;

/// Reorder `files` so that every file follows its dependencies.
///
/// Greedy stable selection: repeatedly place the first not-yet-placed
/// file whose dependencies are all placed. When no file is eligible the
/// remaining files form a cycle; the first of them is placed anyway and
/// flagged, which guarantees termination.
#[must_use]
pub fn reorder(files: &[String], graph: &DepGraph, report: &mut RunReport) -> Vec<String> {
    let known: BTreeSet<&String> = files.iter().collect();
    let mut placed: BTreeSet<&String> = BTreeSet::new();
    let mut order: Vec<String> = Vec::with_capacity(files.len());

    while order.len() < files.len() {
        let eligible = files.iter().find(|file| {
            !placed.contains(file)
                && graph
                    .file_deps()
                    .get(*file)
                    .is_none_or(|deps| {
                        deps.iter()
                            .all(|d| placed.contains(d) || !known.contains(d))
                    })
        });

        let next = match eligible {
            Some(file) => file,
            None => {
                // Every unplaced file is waiting on another unplaced
                // file. Break the deadlock at the first one in original
                // order.
                let Some(stuck) = files.iter().find(|f| !placed.contains(f)) else {
                    break;
                };
                report.warn(Warning::FileCycle {
                    file: stuck.clone(),
                });
                stuck
            }
        };
        placed.insert(next);
        order.push(next.clone());
    }

    if order != files {
        tracing::info!(?order, "data files reordered");
    }
    order
}

// =============================================================================
// TESTS
// =============================================================================
