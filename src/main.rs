//! # Hybrid RAG CLI (`hrag`)
//!
//! ## Usage
//!
//! ```bash
//! hrag --config ./config/hrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `hrag init` | Create the SQLite database and run schema migrations |
//! | `hrag load <file.jsonl>` | Store passages and entity-resolved triples |
//! | `hrag reconcile` | Merge entity variants already in the graph |
//! | `hrag resolve <name>...` | Show canonical forms for entity names |
//! | `hrag search "<query>"` | One retrieval attempt, printed with scores |
//! | `hrag query "<query>"` | Full self-correcting retrieval and answer |
//! | `hrag stats` | Database summary |
//!
//! ## Examples
//!
//! ```bash
//! hrag init
//! hrag load ./data/corpus.jsonl
//! hrag search "project phoenix" --strategy keyword_only
//! hrag query "Who leads Project Phoenix?" --json
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use hybrid_rag::config;
use hybrid_rag::logging;
use hybrid_rag::orchestrator::QueryRequest;
use hybrid_rag::{load, migrate, query, stats};
use hybrid_rag_core::models::RetrievalStrategy;

/// Hybrid RAG CLI: fused vector, graph, and keyword retrieval with a
/// self-correcting answer loop.
#[derive(Parser)]
#[command(
    name = "hrag",
    about = "Hybrid RAG — self-correcting hybrid retrieval with entity resolution",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/hrag.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Load passages and triples from a JSONL file.
    ///
    /// Each line: `{"id"?, "text", "metadata"?, "triples"?: [[s, r, o], ...]}`.
    Load {
        /// Path to the JSONL file.
        file: PathBuf,
    },

    /// Re-resolve every stored triple and merge entity variants.
    Reconcile,

    /// Print the canonical form of entity names against the stored graph.
    Resolve {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Run a single retrieval attempt without judging or synthesis.
    Search {
        query: String,

        /// hybrid, vector_only, keyword_only, or graph_only.
        #[arg(long, default_value = "hybrid")]
        strategy: RetrievalStrategy,

        /// Number of passages (defaults to `retrieval.top_k`).
        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        json: bool,
    },

    /// Answer a question with the self-correcting retrieval loop.
    Query {
        query: String,

        /// Strategy for the first iteration; retries still rotate.
        #[arg(long)]
        strategy: Option<RetrievalStrategy>,

        /// Override `orchestrator.max_iterations`.
        #[arg(long)]
        max_iterations: Option<usize>,

        /// Ask the planner for the first strategy.
        #[arg(long)]
        plan: bool,

        /// Print the full outcome, including every iteration, as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show database statistics.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.log_json);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Load { file } => {
            load::run_load(&cfg, &file).await?;
        }
        Commands::Reconcile => {
            load::run_reconcile(&cfg).await?;
        }
        Commands::Resolve { names } => {
            load::run_resolve(&cfg, &names).await?;
        }
        Commands::Search {
            query: text,
            strategy,
            limit,
            json,
        } => {
            query::run_search(&cfg, &text, strategy, limit, json).await?;
        }
        Commands::Query {
            query: text,
            strategy,
            max_iterations,
            plan,
            json,
        } => {
            let request = QueryRequest {
                strategy_override: strategy,
                max_iterations,
                skip_planning: if plan { Some(false) } else { None },
                ..QueryRequest::new(text)
            };
            query::run_query(&cfg, request, json).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
