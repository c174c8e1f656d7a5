//! # labour-kb CLI (`lkb`)
//!
//! The `lkb` binary is the primary interface for the labour knowledge base.
//! It provides commands for database initialization, harvesting web and file
//! sources, search, document retrieval, embedding management, JSON export,
//! and starting the HTTP retrieval server.
//!
//! ## Usage
//!
//! ```bash
//! lkb --config ./config/lkb.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lkb init` | Create the SQLite database and run schema migrations |
//! | `lkb sources` | List configured harvest sources and document counts |
//! | `lkb harvest <selector>` | Harvest one or more sources into the database |
//! | `lkb search "<query>"` | Search harvested documents |
//! | `lkb get <id>` | Retrieve a full document by ID |
//! | `lkb embed pending` | Backfill missing or stale embeddings |
//! | `lkb embed rebuild` | Delete and regenerate all embeddings |
//! | `lkb export` | Dump documents and chunks as JSON |
//! | `lkb serve` | Start the HTTP retrieval server |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! lkb init --config ./config/lkb.toml
//!
//! # Harvest every configured source
//! lkb harvest all --config ./config/lkb.toml
//!
//! # Harvest one statute source
//! lkb harvest statute:clc --config ./config/lkb.toml
//!
//! # Keyword search
//! lkb search "hours of work" --mode keyword --config ./config/lkb.toml
//!
//! # Hybrid search (keyword + semantic)
//! lkb search "unjust dismissal" --mode hybrid --config ./config/lkb.toml
//!
//! # Start the HTTP server
//! lkb serve --config ./config/lkb.toml
//! ```

mod chunk;
mod config;
mod db;
mod embed_cmd;
mod embedding;
mod export;
mod fetch;
mod get;
mod harvest;
mod harvest_file;
mod harvest_guide;
mod harvest_ipg;
mod harvest_statute;
mod html;
mod migrate;
mod models;
mod search;
mod server;
mod sources;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// labour-kb CLI: a harvester and retrieval store for Canadian federal
/// labour-law sources.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/lkb.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "lkb",
    about = "labour-kb — harvest Canadian federal labour-law sources into a searchable knowledge base",
    version,
    long_about = "labour-kb harvests Canadian federal labour-law web sources (guidance page trees, \
    consolidated statutes, IPG index tables) and local document drops, normalizes them into \
    tabular records, chunks and optionally embeds them, and exposes hybrid search \
    (keyword + semantic) via a CLI and a small HTTP API."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/lkb.toml`. All source, database, embedding,
    /// and server settings are read from this file.
    #[arg(long, global = true, default_value = "./config/lkb.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Commands understood by `lkb`.
#[derive(Subcommand)]
enum Commands {
    /// Create the database file and schema.
    ///
    /// Sets up the documents, chunks, chunks_fts, embeddings, and
    /// chunk_vectors tables. Safe to run repeatedly.
    Init,

    /// List configured harvest sources and their document counts.
    ///
    /// Shows every source from the config with its kind, root URL or
    /// path, and how many documents it currently has in the database.
    Sources,

    /// Harvest one or more sources into the database.
    ///
    /// Fetches and parses the selected sources, replaces their stored
    /// records, chunks the bodies, and embeds the chunks inline when an
    /// embedding provider is configured.
    ///
    /// Selector format: `all`, a kind (`guide`, `statute`, `ipg`, `file`),
    /// `<kind>:<name>`, or a bare source name.
    Harvest {
        /// Source selector: `all`, a kind, `kind:name`, or a source name.
        selector: String,

        /// Dry run: show record and chunk counts without writing to the database.
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of records to store per source.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Search harvested documents.
    ///
    /// Queries the SQLite database using the specified search mode and
    /// returns ranked results with scores and snippets.
    Search {
        /// The search query string.
        query: String,

        /// Search mode: `keyword` (FTS5), `semantic` (vector), or `hybrid`
        /// (weighted merge). Defaults to `hybrid` when an embedding provider
        /// is configured, `keyword` otherwise.
        #[arg(long)]
        mode: Option<String>,

        /// Filter results to a specific source name (e.g., `clc`, `labour-standards`).
        #[arg(long)]
        source: Option<String>,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Retrieve a document by its ID.
    ///
    /// Prints the document's metadata, full body text, and all chunks.
    Get {
        /// Document ID (e.g., `CLC-241`, `IPG-054`, `LABOUR-3`).
        id: String,
    },

    /// Manage embedding vectors.
    ///
    /// Subcommands for backfilling and rebuilding embeddings. Requires an
    /// embedding provider to be configured.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Dump documents and chunks as JSON.
    ///
    /// Writes the full corpus to a file or stdout for downstream use.
    Export {
        /// Output file path. Writes to stdout when omitted.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Start the HTTP retrieval server.
    ///
    /// Exposes search and document retrieval via a JSON API on the
    /// address configured in `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Generate vectors for chunks with no embedding or changed text.
    Pending {
        /// Cap on how many chunks to embed this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Texts per provider call, overriding `embedding.batch_size`.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Report how many chunks would be embedded, without embedding.
        #[arg(long)]
        dry_run: bool,
    },

    /// Clear every stored vector and re-embed the whole corpus.
    ///
    /// Required after changing `embedding.model` or `embedding.dims`.
    Rebuild {
        /// Texts per provider call, overriding `embedding.batch_size`.
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sources => {
            sources::list_sources(&cfg).await?;
        }
        Commands::Harvest {
            selector,
            dry_run,
            limit,
        } => {
            harvest::run_harvest(&cfg, &selector, dry_run, limit).await?;
        }
        Commands::Search {
            query,
            mode,
            source,
            limit,
        } => {
            let mode = mode.unwrap_or_else(|| {
                if cfg.embedding.is_enabled() {
                    "hybrid".to_string()
                } else {
                    "keyword".to_string()
                }
            });
            search::run_search(&cfg, &query, &mode, source, limit).await?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, &id).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending {
                limit,
                batch_size,
                dry_run,
            } => {
                embed_cmd::run_embed_pending(&cfg, limit, batch_size, dry_run).await?;
            }
            EmbedAction::Rebuild { batch_size } => {
                embed_cmd::run_embed_rebuild(&cfg, batch_size).await?;
            }
        },
        Commands::Export { output } => {
            export::run_export(&cfg, output.as_deref()).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
