//! # docqa CLI
//!
//! The `docqa` binary serves the HTTP API and offers a few maintenance
//! commands against the same storage root.
//!
//! ## Usage
//!
//! ```bash
//! docqa --config ./docqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa serve` | Start the HTTP server |
//! | `docqa ingest <path>` | Upload one document from disk through the full pipeline |
//! | `docqa files` | List stored documents |
//! | `docqa fix-groups` | Repair sweep over chunk group fields |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use docqa::config::{self, Config};
use docqa::pipeline::Pipeline;
use docqa::server;

/// docqa — a document question-answering service with retrieval-augmented
/// generation.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file; a missing file falls back to built-in defaults.
#[derive(Parser)]
#[command(
    name = "docqa",
    about = "Document question-answering with retrieval-augmented generation",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./docqa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    ///
    /// Binds to the address configured in `[server].bind` and serves the
    /// upload, ask, file-management and credential endpoints.
    Serve,

    /// Ingest one document from disk.
    ///
    /// Runs the file through the same pipeline an HTTP upload takes:
    /// extension check, collision-free storage, extraction, chunking,
    /// embedding, indexing.
    Ingest {
        /// Path to a docx, xlsx or pdf file.
        path: PathBuf,
    },

    /// List stored documents, newest first.
    Files,

    /// Repair chunk group fields.
    ///
    /// Scans every indexed chunk and patches missing or empty group fields
    /// to the default group. Idempotent.
    FixGroups,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = if cli.config.exists() {
        config::load_config(&cli.config)?
    } else {
        tracing::info!(
            "config file {} not found, using defaults",
            cli.config.display()
        );
        Config::default()
    };

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Ingest { path } => {
            let pipeline = Pipeline::from_config(&cfg).await?;
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| anyhow::anyhow!("invalid path: {}", path.display()))?;
            let bytes = std::fs::read(&path)?;
            let outcome = pipeline.upload(name, &bytes).await?;
            println!("ingested {}", outcome.stored_name);
            println!("  original name: {}", outcome.original_name);
            println!("  extracted chars: {}", outcome.text.chars().count());
            println!("  chunks indexed: {}", outcome.chunk_count);
        }
        Commands::Files => {
            let pipeline = Pipeline::from_config(&cfg).await?;
            let files = pipeline.list_files()?;
            if files.is_empty() {
                println!("no files stored");
            }
            for file in files {
                println!(
                    "{}  {}  {} bytes  group={}  (original: {})",
                    file.upload_time, file.filename, file.size, file.group, file.original_filename
                );
            }
        }
        Commands::FixGroups => {
            let pipeline = Pipeline::from_config(&cfg).await?;
            let fixed = pipeline.fix_groups().await?;
            println!("repaired group field on {} chunks", fixed);
        }
    }

    Ok(())
}
