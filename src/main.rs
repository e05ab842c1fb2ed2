//! # offerforge CLI (`oforge`)
//!
//! The `oforge` binary drives the offer pipeline. It provides commands for
//! database initialization, fragment ingestion, product retrieval, export,
//! and database statistics.
//!
//! ## Usage
//!
//! ```bash
//! oforge --config ./config/oforge.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `oforge init` | Create the SQLite database and run schema migrations |
//! | `oforge ingest <file>` | Merge an NDJSON fragment file and index the results |
//! | `oforge get <id>` | Print one product by barcode |
//! | `oforge get-many <id>...` | Print several products as NDJSON |
//! | `oforge export` | Dump products matching filters as NDJSON |
//! | `oforge stats` | Database overview |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use offerforge::{config, export, get, ingest, migrate, stats};

#[derive(Parser)]
#[command(
    name = "oforge",
    about = "offerforge — an aggregation and indexation pipeline for product offers",
    version,
    long_about = "offerforge folds raw product fragments from commercial datasources into \
    canonical product records keyed by validated barcode, consolidates their offers and \
    attributes, and indexes them into SQLite for filtering and export."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/oforge.toml`. Database, pricing, indexation,
    /// attribute, and vertical settings are read from this file.
    #[arg(long, global = true, default_value = "./config/oforge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the products table with its
    /// filter indexes. Idempotent; running it multiple times is safe.
    Init,

    /// Ingest an NDJSON fragment file.
    ///
    /// Each line is one fragment. Fragments with an invalid or missing
    /// barcode are rejected and counted; everything else is merged into
    /// its product and queued for indexation.
    Ingest {
        /// Path to the NDJSON fragment file.
        file: PathBuf,

        /// Merge without writing anything to the database.
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of fragments to process.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print one product by its barcode.
    Get {
        /// Canonical barcode (GTIN or ISBN-13).
        id: String,
    },

    /// Print several products as NDJSON, one document per line.
    GetMany {
        /// Canonical barcodes. Unknown ids are skipped.
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Export products as NDJSON.
    Export {
        /// Only products of this vertical.
        #[arg(long)]
        vertical: Option<String>,

        /// Only products mapped to this taxonomy node.
        #[arg(long)]
        taxonomy: Option<u32>,

        /// Only products for which some datasource reported this exact
        /// category string.
        #[arg(long)]
        category: Option<String>,

        /// Only sellable products (a recent cheapest offer and at least
        /// one live offer).
        #[arg(long)]
        sellable: bool,

        /// Output file; stdout when omitted.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Show database statistics.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            file,
            dry_run,
            limit,
        } => {
            ingest::run_ingest(&cfg, &file, dry_run, limit).await?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, &id).await?;
        }
        Commands::GetMany { ids } => {
            get::run_get_many(&cfg, &ids).await?;
        }
        Commands::Export {
            vertical,
            taxonomy,
            category,
            sellable,
            output,
        } => {
            export::run_export(&cfg, vertical, taxonomy, category, sellable, output.as_deref())
                .await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
