use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use lexichat_core::{
    ChatEngine, ChatMessage, ChatSession, Embedder, HashingEmbedder, IngestionOptions,
    IngestionOrchestrator, OpenAiClient, OpenAiEmbedder, RetrievalOptions, RetryPolicy,
    SqliteStore, VectorIndexConfig, DEFAULT_BASE_URL, DEFAULT_EMBEDDING_DIMENSIONS,
    DEFAULT_EMBEDDING_MODEL,
};
use lexichat_core::models::{
    DEFAULT_CHAT_MODEL, DEFAULT_CHUNK_LENGTH, DEFAULT_EXTRACTION_MODEL, DEFAULT_TOP_K,
};
use lexichat_core::retry::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY};
use lexichat_core::stores::vector::DEFAULT_QUERY_RESCORE;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EmbedderKind {
    /// Provider embedding endpoint.
    Openai,
    /// Offline character-trigram hashing; no network.
    Hashing,
}

#[derive(Parser)]
#[command(name = "lexichat", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// SQLite database file
    #[arg(long, env = "LEXICHAT_DATABASE", default_value = "lexichat.db")]
    database: PathBuf,

    /// API key for the OpenAI-compatible endpoint
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// Base URL of the OpenAI-compatible endpoint
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_BASE_URL)]
    openai_base_url: String,

    /// Model used to answer chat questions
    #[arg(long, env = "LEXICHAT_CHAT_MODEL", default_value = DEFAULT_CHAT_MODEL)]
    chat_model: String,

    /// Model used for fact extraction and tag matching
    #[arg(long, env = "LEXICHAT_EXTRACTION_MODEL", default_value = DEFAULT_EXTRACTION_MODEL)]
    extraction_model: String,

    /// Embedding model
    #[arg(long, env = "LEXICHAT_EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,

    /// Embedding backend
    #[arg(long, env = "LEXICHAT_EMBEDDER", value_enum, default_value_t = EmbedderKind::Openai)]
    embedder: EmbedderKind,

    /// Embedding dimensionality; fixed once the database is created
    #[arg(long, env = "LEXICHAT_DIMENSIONS", default_value_t = DEFAULT_EMBEDDING_DIMENSIONS)]
    dimensions: usize,

    /// Characters per chunk sent to fact extraction
    #[arg(long, env = "LEXICHAT_CHUNK_LENGTH", default_value_t = DEFAULT_CHUNK_LENGTH)]
    chunk_length: usize,

    /// Number of facts retrieved per question
    #[arg(long, env = "LEXICHAT_TOP_K", default_value_t = DEFAULT_TOP_K)]
    top_k: usize,

    /// Coarse candidates rescored at full precision per query
    #[arg(long, env = "LEXICHAT_QUERY_RESCORE", default_value_t = DEFAULT_QUERY_RESCORE)]
    query_rescore: usize,

    /// Retries after a failed fact extraction or tag matching attempt
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
    max_retries: u32,

    /// Seconds to wait before each retry
    #[arg(long, default_value_t = DEFAULT_RETRY_DELAY.as_secs())]
    retry_delay_secs: u64,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database schema.
    Init,
    /// Manage the tag vocabulary.
    Tags {
        #[command(subcommand)]
        command: TagCommand,
    },
    /// Upload, list and delete documents.
    Documents {
        #[command(subcommand)]
        command: DocumentCommand,
    },
    /// Ask a single question.
    Ask {
        question: String,
    },
    /// Start an interactive chat; `/clear` resets it, `/quit` exits.
    Chat,
}

#[derive(Subcommand)]
enum TagCommand {
    Add { name: String },
    List,
    Delete { id: i64 },
}

#[derive(Subcommand)]
enum DocumentCommand {
    /// Upload a PDF, or every PDF under a folder.
    Upload {
        path: PathBuf,
        /// Display name (single files only); defaults to the file name.
        #[arg(long)]
        name: Option<String>,
        /// Accept a file whose exact bytes were already uploaded.
        #[arg(long, default_value_t = false)]
        allow_duplicates: bool,
    },
    List,
    /// Print the facts extracted from a document.
    Facts { id: i64 },
    Delete { id: i64 },
}

type Orchestrator = IngestionOrchestrator<OpenAiClient, Arc<dyn Embedder>, SqliteStore>;
type Engine = ChatEngine<OpenAiClient, Arc<dyn Embedder>, SqliteStore>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "lexichat boot"
    );

    let store = SqliteStore::open(
        &cli.database,
        VectorIndexConfig {
            dimensions: cli.dimensions,
            query_rescore: cli.query_rescore,
        },
    )
    .await
    .with_context(|| format!("failed to open store at {}", cli.database.display()))?;

    match &cli.command {
        Command::Init => {
            println!("database ready at {}", cli.database.display());
        }
        Command::Tags { command } => run_tags(&store, command).await?,
        Command::Documents { command } => run_documents(&cli, &store, command).await?,
        Command::Ask { question } => {
            let engine = chat_engine(&cli, store)?;
            let mut session = ChatSession::new();
            let reply = engine
                .send_message(&mut session, question)
                .await
                .context("chat turn failed")?;
            print_turn(&session, &reply);
        }
        Command::Chat => {
            let engine = chat_engine(&cli, store)?;
            run_chat(&engine).await?;
        }
    }

    Ok(())
}

fn model_client(cli: &Cli) -> anyhow::Result<OpenAiClient> {
    OpenAiClient::new(&cli.openai_base_url, cli.openai_api_key.clone())
        .context("invalid model endpoint")
}

fn embedder(
    cli: &Cli,
    client: &OpenAiClient,
    store: &SqliteStore,
) -> anyhow::Result<Arc<dyn Embedder>> {
    let embedder: Arc<dyn Embedder> = match cli.embedder {
        EmbedderKind::Openai => Arc::new(OpenAiEmbedder::new(
            client.clone(),
            cli.embedding_model.clone(),
            cli.dimensions,
        )),
        EmbedderKind::Hashing => Arc::new(HashingEmbedder {
            dimensions: cli.dimensions,
        }),
    };

    anyhow::ensure!(
        embedder.dimensions() == store.dimensions(),
        "embedder produces {} dimensions but the store indexes {}",
        embedder.dimensions(),
        store.dimensions()
    );
    Ok(embedder)
}

fn retry_policy(cli: &Cli) -> RetryPolicy {
    RetryPolicy {
        max_retries: cli.max_retries,
        delay: Duration::from_secs(cli.retry_delay_secs),
    }
}

fn orchestrator(
    cli: &Cli,
    store: SqliteStore,
    allow_duplicates: bool,
) -> anyhow::Result<Orchestrator> {
    let client = model_client(cli)?;
    let embedder = embedder(cli, &client, &store)?;
    let options = IngestionOptions {
        chunk_length: cli.chunk_length,
        extraction_model: cli.extraction_model.clone(),
        retry: retry_policy(cli),
        allow_duplicates,
        ..IngestionOptions::default()
    };
    Ok(IngestionOrchestrator::new(client, embedder, store, options))
}

fn chat_engine(cli: &Cli, store: SqliteStore) -> anyhow::Result<Engine> {
    let client = model_client(cli)?;
    let embedder = embedder(cli, &client, &store)?;
    let options = RetrievalOptions {
        top_k: cli.top_k,
        chat_model: cli.chat_model.clone(),
        ..RetrievalOptions::default()
    };
    Ok(ChatEngine::new(client, embedder, store, options))
}

async fn run_tags(store: &SqliteStore, command: &TagCommand) -> anyhow::Result<()> {
    match command {
        TagCommand::Add { name } => {
            let tag = store.create_tag(name).await.context("failed to add tag")?;
            println!("added tag {} ({})", tag.name, tag.id);
        }
        TagCommand::List => {
            let tags = store.list_tags().await.context("failed to list tags")?;
            if tags.is_empty() {
                println!("no tags yet; add one with `lexichat tags add <name>`");
            }
            for tag in tags {
                println!("{:>5}  {}", tag.id, tag.name);
            }
        }
        TagCommand::Delete { id } => {
            store.delete_tag(*id).await.context("failed to delete tag")?;
            println!("deleted tag {id}");
        }
    }
    Ok(())
}

async fn run_documents(
    cli: &Cli,
    store: &SqliteStore,
    command: &DocumentCommand,
) -> anyhow::Result<()> {
    match command {
        DocumentCommand::Upload {
            path,
            name,
            allow_duplicates,
        } => {
            check_upload_target(path, name.as_deref())?;
            let orchestrator = orchestrator(cli, store.clone(), *allow_duplicates)?;
            if path.is_dir() {
                let report = orchestrator
                    .ingest_folder_best_effort(path)
                    .await
                    .context("folder upload failed")?;

                for ingested in &report.ingested {
                    println!(
                        "uploaded {} as document {} ({} facts from {} chunks)",
                        ingested.name,
                        ingested.document_id,
                        ingested.fact_count,
                        ingested.chunk_count
                    );
                }
                if !report.skipped.is_empty() {
                    warn!(
                        skipped = report.skipped.len(),
                        folder = %path.display(),
                        "some pdfs were skipped"
                    );
                    for skipped in &report.skipped {
                        println!("skipped {}: {}", skipped.path.display(), skipped.reason);
                    }
                }
            } else {
                let report = match name {
                    Some(name) => {
                        let pdf = tokio::fs::read(path)
                            .await
                            .with_context(|| format!("failed to read {}", path.display()))?;
                        orchestrator.ingest(name, &pdf).await
                    }
                    None => orchestrator.ingest_file(path).await,
                }
                .with_context(|| format!("upload of {} failed", path.display()))?;

                println!(
                    "uploaded {} as document {} ({} facts from {} chunks, {} tags)",
                    report.name,
                    report.document_id,
                    report.fact_count,
                    report.chunk_count,
                    report.tag_ids.len()
                );
            }
        }
        DocumentCommand::List => {
            let documents = store.list_documents().await.context("failed to list documents")?;
            if documents.is_empty() {
                println!("no documents found; upload one with `lexichat documents upload <pdf>`");
            }
            for summary in documents {
                println!(
                    "{:>5}  {}  ({} facts, uploaded {})",
                    summary.document.id,
                    summary.document.name,
                    summary.fact_count,
                    summary.document.created_at.to_rfc3339()
                );
                if !summary.tags.is_empty() {
                    println!("       tags: {}", summary.tags.join(", "));
                }
            }
        }
        DocumentCommand::Facts { id } => {
            let document = store
                .get_document(*id)
                .await?
                .with_context(|| format!("document {id} not found"))?;
            println!("{}", document.name);
            for fact in store.document_facts(*id).await? {
                println!("  - {}", fact.chunk);
            }
        }
        DocumentCommand::Delete { id } => {
            store
                .delete_document(*id)
                .await
                .context("failed to delete document")?;
            println!("deleted document {id}");
        }
    }
    Ok(())
}

/// `--name` only makes sense for a single file.
fn check_upload_target(path: &Path, name: Option<&str>) -> anyhow::Result<()> {
    anyhow::ensure!(
        name.is_none() || !path.is_dir(),
        "--name cannot be used when uploading the folder {}",
        path.display()
    );
    Ok(())
}

async fn run_chat(engine: &Engine) -> anyhow::Result<()> {
    let mut session = ChatSession::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        match question {
            "" => continue,
            "/quit" => break,
            "/clear" => {
                session.clear();
                println!("(conversation cleared)");
                continue;
            }
            _ => {}
        }

        match engine.send_message(&mut session, question).await {
            Ok(reply) => print_turn(&session, &reply),
            Err(error) => eprintln!("error: {error}"),
        }
    }

    Ok(())
}

fn print_turn(session: &ChatSession, reply: &ChatMessage) {
    let references = session
        .messages()
        .iter()
        .rev()
        .find_map(|message| message.references.as_ref());

    println!("{}", reply.content);
    if let Some(references) = references.filter(|references| !references.is_empty()) {
        println!("references:");
        for reference in references {
            println!("  - {reference}");
        }
    }
}
