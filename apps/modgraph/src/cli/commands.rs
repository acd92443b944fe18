//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use super::Selection;
use modgraph_core::{
    Corpus, CorpusError, DispatchSpec, FieldSpec, IdentifierRegistry, JsonStore, Manifest,
    RecordStore, RunReport, build_graph, check_cycles, merge, MergeRequest,
    primitives::DIGEST_WIDTH, reorder,
};
use std::path::Path;

// =============================================================================
// SHARED HELPERS
// =============================================================================

/// Resolve the module root from the given directory and load its corpus.
fn load_corpus(module_dir: &Path, report: &mut RunReport) -> Result<Corpus, CorpusError> {
    let root = Manifest::find_root(module_dir).ok_or_else(|| CorpusError::Parse {
        file: module_dir.display().to_string(),
        message: "no module manifest found here or in any parent directory".to_string(),
    })?;
    let manifest = Manifest::load(&root)?;
    Corpus::load(&root, manifest, report)
}

/// Render field values as a single-line digest, truncated for terminals.
fn digest(fields: &std::collections::BTreeMap<String, serde_json::Value>) -> String {
    let rendered = serde_json::to_string(fields).unwrap_or_default();
    if rendered.len() <= DIGEST_WIDTH {
        return rendered;
    }
    let mut cut = DIGEST_WIDTH;
    while !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &rendered[..cut])
}

fn print_warnings(report: &RunReport, quiet: bool) {
    if quiet {
        return;
    }
    for warning in report.warnings() {
        println!("warning: {warning}");
    }
}

// =============================================================================
// LINT COMMAND
// =============================================================================

/// Diagnose the corpus and optionally fix the manifest's file order.
pub fn cmd_lint(
    module_dir: &Path,
    json_mode: bool,
    quiet: bool,
    fix: bool,
) -> Result<(), CorpusError> {
    let mut report = RunReport::new();
    let mut corpus = load_corpus(module_dir, &mut report)?;

    let graph = build_graph(&mut corpus, &mut report);
    let cycles = check_cycles(&graph);
    let order = reorder(corpus.files(), &graph, &mut report);
    let reordered = order != corpus.files();

    let mut written = Vec::new();
    if fix {
        corpus.apply_file_order(order.clone());
        // write_dirty reports data files only; the amended manifest is
        // written alongside.
        written = corpus.write_dirty()?;
    }

    if json_mode {
        let output = serde_json::json!({
            "module": corpus.module(),
            "files": corpus.files(),
            "records": corpus.records().count(),
            "warnings": report.warnings().iter().map(|w| serde_json::json!({
                "kind": w.kind(),
                "message": w.to_string(),
            })).collect::<Vec<_>>(),
            "record_cycles": cycles.len(),
            "file_order": order,
            "reordered": reordered,
            "fixed": fix,
            "written": written,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    print_warnings(&report, quiet);
    if !quiet {
        println!("Module:  {}", corpus.module());
        println!("Files:   {}", corpus.files().len());
        println!("Records: {}", corpus.records().count());
        println!("Summary: {}", report.summary());
        if reordered {
            if fix {
                println!("File order fixed: {}", order.join(", "));
            } else {
                println!("File order needs fixing (run with --fix): {}", order.join(", "));
            }
        }
    }
    Ok(())
}

// =============================================================================
// IMPORT COMMAND
// =============================================================================

/// Parameters of one import run.
#[derive(Debug)]
pub struct ImportOptions {
    pub model: String,
    pub selection: Selection,
    pub fields: String,
    pub dispatch: String,
    pub outfile: Option<String>,
    pub dry_run: bool,
}

/// Merge store records of one model into the corpus files.
pub fn cmd_import(
    module_dir: &Path,
    store_path: &Path,
    json_mode: bool,
    quiet: bool,
    options: &ImportOptions,
) -> Result<(), CorpusError> {
    let mut store = JsonStore::open(store_path)?;
    if !store.exists(&options.model).map_err(CorpusError::from)? {
        return Err(CorpusError::UnknownModel(options.model.clone()));
    }

    let mut report = RunReport::new();
    let mut corpus = load_corpus(module_dir, &mut report)?;

    let candidates = store
        .list_matching(&options.model, &options.selection.to_filter())
        .map_err(CorpusError::from)?;
    let field_spec = FieldSpec::parse(&options.fields, &options.model);
    let dispatch = DispatchSpec::parse(&options.dispatch);
    let mut registry = IdentifierRegistry::new(corpus.declared_names());

    let request = MergeRequest {
        model: &options.model,
        field_spec: &field_spec,
        dispatch: &dispatch,
        outfile: options.outfile.as_deref(),
        tag: options.selection.tag.as_deref(),
    };
    let plan = merge(
        &mut corpus,
        &mut registry,
        &mut store,
        candidates,
        &request,
        &mut report,
    )?;

    let mut written = Vec::new();
    if !options.dry_run {
        written = corpus.write_dirty()?;
        store.save()?;
    }

    if json_mode {
        let output = serde_json::json!({
            "model": options.model,
            "noop": plan.noop,
            "changed": plan.changed,
            "new": plan.new,
            "dry_run": options.dry_run,
            "written": written,
            "warnings": report.warnings().iter().map(|w| serde_json::json!({
                "kind": w.kind(),
                "message": w.to_string(),
            })).collect::<Vec<_>>(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    print_warnings(&report, quiet);
    if !quiet {
        if options.dry_run {
            println!("Dry run - no file was written");
        }
        if plan.is_empty() {
            println!("{}: no matching record", options.model);
            return Ok(());
        }
        println!(
            "{}: {} record(s): {} unchanged, {} updated, {} added",
            options.model,
            plan.len(),
            plan.noop.len(),
            plan.changed.len(),
            plan.new.len()
        );
        for id in &plan.changed {
            println!("  updated  {id}");
        }
        for id in &plan.new {
            println!("  added    {id}");
        }
        for file in &written {
            println!("  wrote    {file}");
        }
    }
    Ok(())
}

// =============================================================================
// LIST COMMAND
// =============================================================================

/// List store records of one model with their identifiers.
pub fn cmd_list(
    store_path: &Path,
    json_mode: bool,
    model: &str,
    selection: &Selection,
) -> Result<(), CorpusError> {
    let store = JsonStore::open(store_path)?;
    if !store.exists(model).map_err(CorpusError::from)? {
        return Err(CorpusError::UnknownModel(model.to_string()));
    }
    let records = store
        .list_matching(model, &selection.to_filter())
        .map_err(CorpusError::from)?;

    if json_mode {
        let rows: Vec<serde_json::Value> = records
            .iter()
            .map(|record| {
                let identifier = store
                    .get_identifier(model, record.handle.id)
                    .ok()
                    .flatten()
                    .map(|id| id.to_string());
                serde_json::json!({
                    "handle": record.handle.id,
                    "identifier": identifier,
                    "fields": record.fields,
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&rows).unwrap_or_default()
        );
        return Ok(());
    }

    println!("{model}: {} record(s)", records.len());
    for record in &records {
        let identifier = store
            .get_identifier(model, record.handle.id)
            .map_err(CorpusError::from)?
            .map_or_else(|| "-".to_string(), |id| id.to_string());
        println!(
            "  {:>6}  {:<40}  {}",
            record.handle.id,
            identifier,
            digest(&record.fields)
        );
    }
    Ok(())
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show a corpus overview.
pub fn cmd_status(module_dir: &Path, json_mode: bool) -> Result<(), CorpusError> {
    let mut report = RunReport::new();
    let corpus = load_corpus(module_dir, &mut report)?;

    if json_mode {
        let files: Vec<serde_json::Value> = corpus
            .files()
            .iter()
            .map(|file| {
                serde_json::json!({
                    "file": file,
                    "records": corpus.records_in_file(file).len(),
                })
            })
            .collect();
        let output = serde_json::json!({
            "module": corpus.module(),
            "version": corpus.manifest().version,
            "depends": corpus.manifest().depends,
            "files": files,
            "records": corpus.records().count(),
            "warnings": report.warnings().len(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    println!("Module Status");
    println!("=============");
    println!("Module:  {}", corpus.module());
    if let Some(version) = &corpus.manifest().version {
        println!("Version: {version}");
    }
    println!("Depends: {}", corpus.manifest().depends.join(", "));
    println!();
    for file in corpus.files() {
        println!(
            "  {:<40} {:>5} record(s)",
            file,
            corpus.records_in_file(file).len()
        );
    }
    println!();
    println!("Records:  {}", corpus.records().count());
    println!("Warnings: {}", report.warnings().len());
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
