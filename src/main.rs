//! # MarketMuse CLI (`mm`)
//!
//! ## Usage
//!
//! ```bash
//! mm --config ./config/mm.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mm init` | Create the SQLite database and run schema migrations |
//! | `mm ingest <paths>...` | Load, chunk, embed and store documents |
//! | `mm ask "<question>"` | Answer a question with citations |
//! | `mm search "<query>"` | Show the retrieved passages only |
//! | `mm documents` | List ingested documents |
//! | `mm get <id>` | Print a document and its passages |
//! | `mm delete <id>` | Delete a document |
//! | `mm reset --yes` | Empty the corpus |
//! | `mm stats` | Corpus statistics |
//! | `mm reindex` | Re-embed every passage with the configured model |
//! | `mm serve` | Start the HTTP server |
//! | `mm completions <shell>` | Print shell completions |

use anyhow::{bail, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use marketmuse::config;
use marketmuse::engine::Engine;
use marketmuse::progress::ProgressMode;
use marketmuse::{documents, ingest, migrate, query, server, stats};

/// MarketMuse: ask questions of your marketing documents and get cited
/// answers.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/mm.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "mm", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mm.toml")]
    config: PathBuf,

    /// More log output (-v debug, -vv trace). `MARKETMUSE_LOG` overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Ingest files or directories.
    ///
    /// Directories are walked recursively and filtered by
    /// `ingest.include_globs` / `ingest.exclude_globs`. Re-ingesting a file
    /// with the same name replaces the previous version unless the bytes
    /// are identical.
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Override format detection (pdf, txt, md, docx, pptx, html).
        #[arg(long)]
        format: Option<String>,

        /// Print the ingest report as JSON.
        #[arg(long)]
        json: bool,

        /// Progress on stderr. Defaults to `human` on a TTY, else `off`.
        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,
    },

    /// Answer a question from the ingested documents.
    Ask {
        question: String,

        /// Number of passages to ground the answer on.
        #[arg(long)]
        k: Option<usize>,

        /// Restrict retrieval to these document IDs (repeatable).
        #[arg(long = "doc")]
        docs: Vec<String>,

        #[arg(long)]
        json: bool,
    },

    /// Retrieve passages without generating an answer.
    Search {
        query: String,

        #[arg(long)]
        k: Option<usize>,

        #[arg(long = "doc")]
        docs: Vec<String>,

        #[arg(long)]
        json: bool,
    },

    /// List ingested documents.
    Documents {
        #[arg(long)]
        json: bool,
    },

    /// Print a document and its passages.
    Get {
        id: String,

        #[arg(long)]
        json: bool,
    },

    /// Delete a document and its passages.
    Delete { id: String },

    /// Remove every document, passage and vector.
    Reset {
        /// Confirm the reset.
        #[arg(long)]
        yes: bool,
    },

    /// Show corpus statistics.
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Re-embed every passage with the configured embedding model.
    ///
    /// Required after changing `[embedding]` model or dimensions.
    Reindex,

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Print shell completions to stdout.
    Completions { shell: clap_complete::Shell },
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("MARKETMUSE_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("warn,marketmuse=info,marketmuse_core=info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "mm", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
            return Ok(());
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
            return Ok(());
        }
        _ => {}
    }

    let engine = Engine::open(&cfg).await?;
    let result = run(&engine, cli.command).await;
    engine.close().await;
    result
}

async fn run(engine: &Engine, command: Commands) -> Result<()> {
    match command {
        Commands::Ingest {
            paths,
            format,
            json,
            progress,
        } => {
            let mode = progress
                .map(ProgressMode::from)
                .unwrap_or_else(ProgressMode::default_for_tty);
            ingest::run_ingest(engine, &paths, format, json, mode).await?;
        }
        Commands::Ask {
            question,
            k,
            docs,
            json,
        } => {
            query::run_ask(engine, &question, k, &docs, json).await?;
        }
        Commands::Search {
            query: q,
            k,
            docs,
            json,
        } => {
            query::run_search(engine, &q, k, &docs, json).await?;
        }
        Commands::Documents { json } => documents::run_documents(engine, json).await?,
        Commands::Get { id, json } => documents::run_get(engine, &id, json).await?,
        Commands::Delete { id } => documents::run_delete(engine, &id).await?,
        Commands::Reset { yes } => {
            if !yes {
                bail!("`mm reset` deletes every document; pass --yes to confirm");
            }
            engine.reset().await?;
            println!("Corpus reset.");
        }
        Commands::Stats { json } => stats::run_stats(engine, json).await?,
        Commands::Reindex => {
            let n = engine.reindex().await?;
            println!(
                "Reindexed {} passages with {}.",
                n,
                engine.embedder().model_name()
            );
        }
        Commands::Init | Commands::Serve | Commands::Completions { .. } => {}
    }
    Ok(())
}
