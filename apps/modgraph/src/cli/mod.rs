//! # modgraph CLI Module
//!
//! This module implements the CLI interface for modgraph.
//!
//! ## Available Commands
//!
//! - `lint` - Diagnose a module corpus and optionally fix its file order
//! - `import` - Merge store records into the corpus files
//! - `list` - Inspect store records and their identifiers
//! - `status` - Show a corpus overview

mod commands;

use clap::{Args, Parser, Subcommand};
use modgraph_core::CorpusError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// modgraph - Record Graph & Identity Resolution Tool
///
/// Keeps a module's declarative record files, the identifiers they
/// declare, and the record store they describe in agreement.
#[derive(Parser, Debug)]
#[command(name = "modgraph")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress informational output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Module directory (searched upward for the manifest)
    #[arg(short = 'C', long, global = true, default_value = ".")]
    pub module_dir: PathBuf,

    /// Path to the record store snapshot
    #[arg(short = 'S', long, global = true, default_value = "store.json")]
    pub store: PathBuf,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Record selection filters. At least one must be given.
#[derive(Args, Debug, Default)]
#[group(required = true, multiple = true)]
pub struct Selection {
    /// Case-insensitive substring match on the name field
    #[arg(short, long)]
    pub name: Option<String>,

    /// Exact store handle
    #[arg(short, long)]
    pub id: Option<u64>,

    /// Only records written on or after this timestamp
    #[arg(long)]
    pub since: Option<String>,

    /// Only records whose name carries the "{TAG}" marker; import strips
    /// it and renames the store record
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Select every record of the model
    #[arg(short, long)]
    pub all: bool,
}

impl Selection {
    /// The store filter this selection describes. `--all` clears the
    /// name, id and since criteria; a tag marker stays in force.
    #[must_use]
    pub fn to_filter(&self) -> modgraph_core::RecordFilter {
        if self.all {
            return modgraph_core::RecordFilter {
                tag: self.tag.clone(),
                ..modgraph_core::RecordFilter::default()
            };
        }
        modgraph_core::RecordFilter {
            name: self.name.clone(),
            id: self.id,
            since: self.since.clone(),
            tag: self.tag.clone(),
        }
    }
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Diagnose the corpus: unresolved references, cycles, file order
    Lint {
        /// Rewrite the manifest's file order and inferred dependencies
        #[arg(short, long)]
        fix: bool,
    },

    /// Merge store records of one model into the corpus files
    Import {
        /// Model to import from the store
        model: String,

        #[command(flatten)]
        selection: Selection,

        /// Field selection spec, e.g. "-user_id;res.partner:name"
        #[arg(short = 'F', long, default_value = "")]
        fields: String,

        /// Destination file templates, e.g. "ui.view:views.json"
        #[arg(short = 'd', long, default_value = "")]
        dispatch: String,

        /// Single destination file, overriding the dispatch templates
        #[arg(short, long)]
        outfile: Option<String>,

        /// Compute the merge plan without writing any file
        #[arg(long)]
        dry_run: bool,
    },

    /// List store records of one model with their identifiers
    List {
        /// Model to list from the store
        model: String,

        #[command(flatten)]
        selection: Selection,
    },

    /// Show a corpus overview
    Status,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), CorpusError> {
    let json_mode = cli.json_mode;
    let quiet = cli.quiet;

    match cli.command {
        Some(Commands::Lint { fix }) => cmd_lint(&cli.module_dir, json_mode, quiet, fix),
        Some(Commands::Import {
            model,
            selection,
            fields,
            dispatch,
            outfile,
            dry_run,
        }) => cmd_import(
            &cli.module_dir,
            &cli.store,
            json_mode,
            quiet,
            &ImportOptions {
                model,
                selection,
                fields,
                dispatch,
                outfile,
                dry_run,
            },
        ),
        Some(Commands::List { model, selection }) => {
            cmd_list(&cli.store, json_mode, &model, &selection)
        }
        Some(Commands::Status) | None => cmd_status(&cli.module_dir, json_mode),
    }
}

// =============================================================================
// TESTS
// =============================================================================
