//! # modgraph - Record Graph Tool
//!
//! The main binary for the modgraph record-graph engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────┐
//! │               apps/modgraph (THE BINARY)           │
//! │                                                    │
//! │  ┌──────────────┐          ┌───────────────────┐  │
//! │  │     CLI      │          │   Store snapshot  │  │
//! │  │   (clap)     │          │   (JSON file)     │  │
//! │  └──────┬───────┘          └─────────┬─────────┘  │
//! │         │                            │            │
//! │         └──────────────┬─────────────┘            │
//! │                        ▼                           │
//! │               ┌────────────────┐                   │
//! │               │ modgraph-core  │                   │
//! │               │  (THE LOGIC)   │                   │
//! │               └────────────────┘                   │
//! └────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Diagnose a module and fix its file order
//! modgraph lint --fix
//!
//! # Merge store records into the corpus files
//! modgraph import res.partner --all
//!
//! # Inspect store records
//! modgraph list res.partner -n acme
//! ```

mod cli;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    // Parse CLI arguments
    let cli = cli::Cli::parse();

    // Initialize tracing — MODGRAPH_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("MODGRAPH_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let default_filter = if cli.verbose {
        "modgraph=debug"
    } else {
        "modgraph=warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    // Execute command
    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
