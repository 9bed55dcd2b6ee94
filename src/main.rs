//! # Astro Bot CLI (`astrobot`)
//!
//! The `astrobot` binary builds the document index and runs the chat loop.
//!
//! ## Usage
//!
//! ```bash
//! astrobot --config ./config/astrobot.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `astrobot ingest [PATH]` | Load, chunk, and embed documents into the index |
//! | `astrobot chat` | Start the interactive chat loop |
//! | `astrobot search "<query>"` | Print the chunks retrieval would use |
//! | `astrobot stats` | Summarize the index |
//!
//! Logs go to stderr and are filtered by `RUST_LOG` (default `warn`).

use astrobot::{chat, config, ingest, search, stats};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Astro Bot, a local retrieval-augmented chat bot over your documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/astrobot.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "astrobot",
    about = "Astro Bot: chat with a local model about a folder of documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/astrobot.toml`. When the default file does not
    /// exist the built-in defaults are used.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

const DEFAULT_CONFIG: &str = "./config/astrobot.toml";

#[derive(Subcommand)]
enum Commands {
    /// Ingest documents into the index.
    ///
    /// Walks `[documents].root` (or PATH), extracts text from txt, md, pdf,
    /// docx and similar files, chunks and embeds it, and persists the index.
    /// Unchanged chunks keep their stored embeddings.
    Ingest {
        /// File or folder to ingest instead of `[documents].root`.
        path: Option<PathBuf>,

        /// Discard the existing index and rebuild from scratch.
        #[arg(long)]
        full: bool,
    },

    /// Start the interactive chat loop.
    ///
    /// Builds the index first if none exists. Type `quit` to leave or
    /// `add a document` to ingest another file mid-conversation.
    Chat,

    /// Print the chunks retrieved for a query, with distances.
    Search {
        /// The query text.
        query: String,

        /// Maximum number of chunks to return (default `[retrieval].top_k`).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show index statistics.
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

    // The default config file is optional; an explicit one is not.
    let cfg = if cli.config == PathBuf::from(DEFAULT_CONFIG) && !cli.config.exists() {
        let cfg = config::Config::default();
        cfg.validate()?;
        cfg
    } else {
        config::load_config(&cli.config)?
    };

    match cli.command {
        Commands::Ingest { path, full } => {
            ingest::run_ingest(&cfg, path.as_deref(), full).await?;
        }
        Commands::Chat => {
            chat::run_chat(cfg).await?;
        }
        Commands::Search { query, limit } => {
            search::run_search(&cfg, &query, limit).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg)?;
        }
    }

    Ok(())
}
