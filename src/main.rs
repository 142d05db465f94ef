use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use engram::brain::MemoryEngine;
use engram::config::EngramConfig;
use engram::embedding::create_embedder;
use engram::store::sqlite::SqliteVectorStore;
use engram::{cli, config};

#[derive(Parser)]
#[command(name = "engram", version, about = "Local memory layer for AI agents")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the interactive memory shell
    Shell,
    /// Retrieve context for a query
    Recall {
        query: String,
        /// Number of references to return
        #[arg(short = 'n', long)]
        results: Option<usize>,
    },
    /// Store a piece of text directly in long-term memory
    Remember { text: String },
    /// Scrape a URL into long-term memory
    Learn {
        url: String,
        /// Also crawl same-domain links found on the page
        #[arg(long)]
        follow_links: bool,
        /// Page limit when following links
        #[arg(long, default_value_t = 10)]
        max_pages: usize,
    },
    /// Ingest a local file or folder
    Read {
        path: PathBuf,
        /// Only ingest segments tagged with this page number
        #[arg(long)]
        page: Option<u32>,
    },
    /// Show memory stats
    Status,
    /// Delete everything learned from a source (URL or file path)
    Forget { source: String },
    /// Manage the embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the embedding model to ~/.engram/models/
    Download,
}

fn build_engine(config: &EngramConfig) -> Result<MemoryEngine> {
    let embedder = create_embedder(&config.embedding)?;
    let store = SqliteVectorStore::open(config.resolved_db_path(), embedder)?;
    Ok(MemoryEngine::new(Box::new(store), config))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::EngramConfig::load()?;

    // Log to stderr so stdout stays clean for recalled context
    let filter = EnvFilter::try_new(&config.general.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Shell => {
            let mut engine = build_engine(&config)?;
            cli::run_shell(&mut engine).await?;
        }
        Command::Recall { query, results } => {
            let mut engine = build_engine(&config)?;
            let n = results.unwrap_or(config.retrieval.default_results);
            println!("{}", engine.recall(&query, n, true)?);
        }
        Command::Remember { text } => {
            let mut engine = build_engine(&config)?;
            engine.add_memory(&text)?;
            println!("Remembered.");
        }
        Command::Learn {
            url,
            follow_links,
            max_pages,
        } => {
            let mut engine = build_engine(&config)?;
            let count = engine.learn_url(&url, follow_links, max_pages).await?;
            println!("Stored {count} chunks from {url}");
        }
        Command::Read { path, page } => {
            let mut engine = build_engine(&config)?;
            let count = if path.is_dir() {
                engine.learn_folder(&path)?
            } else {
                engine.learn_doc(&path, page)?
            };
            println!("Stored {count} chunks from {}", path.display());
        }
        Command::Status => {
            let engine = build_engine(&config)?;
            let status = engine.status()?;
            println!("long-term chunks:  {}", status.long_term_count);
            println!("short-term buffer: {}", status.short_term_count);
            println!("cache:             {}/{}", status.cache_size, status.cache_max);
        }
        Command::Forget { source } => {
            let mut engine = build_engine(&config)?;
            engine.forget_source(&source)?;
            println!("Forgot everything from {source}");
        }
        Command::Model { action } => match action {
            ModelAction::Download => {
                cli::model_download(&config.embedding).await?;
            }
        },
    }

    Ok(())
}
