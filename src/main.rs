use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vectordb_chat_lib::rag::format_hits_with_citations;
use vectordb_chat_lib::{App, Config, Conversation, RagError, RagResult, StreamingReply, NO_CONTEXT_REPLY};

#[derive(Parser)]
#[command(name = "vectordb-chat")]
#[command(about = "Chat with your documents through a local vector database and Ollama", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.vectordb-chat/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty collection
    Create { title: String },

    /// Delete a collection and its files
    Delete { title: String },

    /// List collections
    List,

    /// Show a collection's metadata and check its files
    Info { title: String },

    /// Add files or folders to a collection
    Ingest {
        title: String,

        /// Files or folders to ingest
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Show the chunks closest to a query
    Search {
        title: String,
        query: String,

        /// Number of results (default: retrieval.top_k)
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Ask a question answered from one or more collections
    Ask {
        query: String,

        /// Collections to search (repeatable)
        #[arg(short, long = "title", required = true)]
        titles: Vec<String>,

        /// Print the retrieved context before the answer
        #[arg(long)]
        show_context: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vectordb_chat=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            // 75 = EX_TEMPFAIL
            ExitCode::from(if e.is_retryable() { 75 } else { 1 })
        }
    }
}

async fn run(cli: Cli) -> RagResult<()> {
    let config = Config::load(cli.config.as_deref())?;
    let app = App::init(config).await?;

    match cli.command {
        Commands::Create { title } => {
            if app.store.create(&title).await? {
                println!("Created '{title}'");
            } else {
                return Err(RagError::AlreadyExists(title));
            }
        }
        Commands::Delete { title } => {
            if app.store.delete(&title).await? {
                println!("Deleted '{title}'");
            } else {
                return Err(RagError::NotFound(title));
            }
        }
        Commands::List => {
            for name in app.store.list() {
                let chunks = app.store.info(&name).map(|m| m.chunk_count).unwrap_or(0);
                println!("{name}\t{chunks} chunks");
            }
        }
        Commands::Info { title } => {
            let meta = app.store.info(&title).ok_or_else(|| RagError::NotFound(title.clone()))?;
            let report = app.store.verify(&title).await?;
            println!("{}", serde_json::to_string_pretty(&meta)?);
            println!(
                "vectors: {}, chunks: {}, consistent: {}",
                report.vectors, report.chunks, report.consistent
            );
        }
        Commands::Ingest { title, paths } => {
            let reports = app.ingest_paths(&title, &paths).await?;
            let total: usize = reports.iter().map(|r| r.chunks).sum();
            for report in &reports {
                println!("{}\t{} chunks", report.file, report.chunks);
            }
            println!("Added {total} chunks to '{title}'");
        }
        Commands::Search { title, query, k } => {
            let k = k.unwrap_or(app.config.retrieval.top_k);
            let vector = app.store.embedder().embed_query(&query).await?;
            for (rank, hit) in app.store.search(&title, &vector, k).await?.iter().enumerate() {
                println!("{}. [{:.3}] {}", rank + 1, hit.score, hit.text);
            }
        }
        Commands::Ask { query, titles, show_context } => {
            let conversation = Conversation::new();
            match app.chat.ask_streaming(&query, &titles, &conversation).await? {
                StreamingReply::NoContext { retrieval } => {
                    report_warnings(&retrieval.warnings);
                    println!("{NO_CONTEXT_REPLY}");
                }
                StreamingReply::Unavailable { reason, retrieval } => {
                    report_warnings(&retrieval.warnings);
                    return Err(RagError::CollaboratorUnavailable(reason));
                }
                StreamingReply::Streaming { mut tokens, retrieval } => {
                    report_warnings(&retrieval.warnings);
                    if show_context {
                        println!("{}", format_hits_with_citations(&retrieval.hits));
                    }
                    let mut stdout = std::io::stdout();
                    while let Some(token) = tokens.next().await {
                        write!(stdout, "{}", token?)?;
                        stdout.flush()?;
                    }
                    println!();
                }
            }
        }
    }
    Ok(())
}

fn report_warnings(warnings: &[vectordb_chat_lib::rag::CollectionWarning]) {
    for warning in warnings {
        eprintln!("Could not search '{}': {}", warning.collection, warning.message);
    }
}
