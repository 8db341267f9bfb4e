//! # ETF Assistant CLI (`etfa`)
//!
//! ## Usage
//!
//! ```bash
//! etfa --config ./config/etfa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `etfa init` | Create the document and index databases |
//! | `etfa docs add <file>` | Store, index and register a PDF |
//! | `etfa docs list` | List documents with their ETF assignments |
//! | `etfa docs delete <id>` | Remove a document everywhere |
//! | `etfa docs assign <id> <isin>` | Assign a document to an ETF |
//! | `etfa docs unassign <id> <isin>` | Remove an assignment |
//! | `etfa docs for-etf <isin>` | List (or download) the documents of an ETF |
//! | `etfa search` | Interactive catalog search chat |
//! | `etfa ask <id>` | Interactive chat over one document |
//! | `etfa catalog sync` | Rebuild the correction catalog if it drifted |
//! | `etfa serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! etfa docs add factsheet.pdf --name "MSCI World factsheet" \
//!     --strategy by-layout --multimodal --etf IE00B4L5Y983
//! etfa ask 1
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use etf_assistant::app::Services;
use etf_assistant::commands;
use etf_assistant::config;
use etf_assistant::docs_db::DocsDatabase;
use etf_assistant::logging::init_logging;
use etf_assistant::migrate;
use etf_assistant::server;
use etf_assistant::splitter::SplitStrategy;
use etf_assistant::storage::NewDocument;

/// Conversational search and document question answering over an ETF
/// catalog.
#[derive(Parser)]
#[command(name = "etfa", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/etfa.toml")]
    config: PathBuf,

    /// Debug logging for this crate (ignored when `RUST_LOG` is set).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the document metadata and vector index databases.
    ///
    /// Idempotent. The ETF catalog database is never modified.
    Init,

    /// Manage uploaded documents.
    Docs {
        #[command(subcommand)]
        action: DocsAction,
    },

    /// Interactive search chat over the ETF catalog.
    Search,

    /// Interactive question answering over one document.
    Ask {
        /// Document id.
        doc_id: i64,
    },

    /// Correction catalog maintenance.
    Catalog {
        #[command(subcommand)]
        action: CatalogAction,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum DocsAction {
    /// Store, index and register a PDF.
    Add {
        /// PDF file to upload.
        file: PathBuf,

        /// Display name (defaults to the file name).
        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        description: Option<String>,

        /// `by-page` or `by-layout`.
        #[arg(long, default_value = "by-page")]
        strategy: SplitStrategy,

        /// Extract and caption images.
        #[arg(long)]
        multimodal: bool,

        /// Chunks retrieved per question (defaults to `docqa.default_top_k`).
        #[arg(long)]
        top_k: Option<usize>,

        /// Drop sources the model judges irrelevant to the answer.
        #[arg(long)]
        filter_sources: bool,

        /// ISIN to assign the document to. Repeatable.
        #[arg(long = "etf")]
        etfs: Vec<String>,
    },

    /// List documents.
    List,

    /// Delete a document, its index entries and its stored file.
    Delete { doc_id: i64 },

    /// Assign a document to an ETF.
    Assign { doc_id: i64, isin: String },

    /// Remove a document assignment.
    Unassign { doc_id: i64, isin: String },

    /// Documents assigned to an ETF.
    ForEtf {
        isin: String,

        /// Download the PDFs into this directory.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum CatalogAction {
    /// Rebuild the correction catalog if the catalog table changed.
    Sync,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Databases initialized successfully.");
        }
        Commands::Docs { action } => match action {
            DocsAction::Add {
                file,
                name,
                description,
                strategy,
                multimodal,
                top_k,
                filter_sources,
                etfs,
            } => {
                let name = name.unwrap_or_else(|| {
                    file.file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| file.display().to_string())
                });
                let doc = NewDocument {
                    name,
                    description,
                    split_strategy: strategy,
                    multimodal,
                    top_k: top_k.unwrap_or(cfg.docqa.default_top_k),
                    filter_sources,
                    etf_isins: etfs,
                };
                let services = Services::open(&cfg).await?;
                commands::run_docs_add(&services, &file, doc).await?;
            }
            DocsAction::List => {
                let docs = DocsDatabase::open(&cfg.paths.docs_db).await?;
                commands::run_docs_list(&docs).await?;
            }
            DocsAction::Delete { doc_id } => {
                let services = Services::open(&cfg).await?;
                commands::run_docs_delete(&services, doc_id).await?;
            }
            DocsAction::Assign { doc_id, isin } => {
                let docs = DocsDatabase::open(&cfg.paths.docs_db).await?;
                commands::run_docs_assign(&docs, doc_id, &isin).await?;
            }
            DocsAction::Unassign { doc_id, isin } => {
                let docs = DocsDatabase::open(&cfg.paths.docs_db).await?;
                commands::run_docs_unassign(&docs, doc_id, &isin).await?;
            }
            DocsAction::ForEtf { isin, out } => match out {
                Some(out) => {
                    let services = Services::open(&cfg).await?;
                    commands::run_docs_download(&services, &isin, &out).await?;
                }
                None => {
                    let docs = DocsDatabase::open(&cfg.paths.docs_db).await?;
                    commands::run_docs_for_etf(&docs, &isin).await?;
                }
            },
        },
        Commands::Search => {
            let services = Services::open(&cfg).await?;
            commands::run_search(&services).await?;
        }
        Commands::Ask { doc_id } => {
            let services = Services::open(&cfg).await?;
            commands::run_ask(&services, doc_id).await?;
        }
        Commands::Catalog { action } => match action {
            CatalogAction::Sync => {
                let services = Services::open(&cfg).await?;
                commands::run_catalog_sync(&services).await?;
            }
        },
        Commands::Serve => {
            let services = Services::open(&cfg).await?;
            services.sync_catalog().await?;
            server::run_server(services).await?;
        }
    }

    Ok(())
}
