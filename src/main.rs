//! # Doc Chat CLI (`docchat`)
//!
//! Runs the HTTP server, or the same pipeline one-shot from the terminal.
//!
//! ## Usage
//!
//! ```bash
//! docchat --config ./config/docchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docchat serve` | Start the HTTP server |
//! | `docchat extract <file>` | Print the text extracted from a file |
//! | `docchat chunks <file>` | Print the chunks a file is split into |
//! | `docchat ask <file> "<question>"` | Answer a question from a file |
//! | `docchat summarize <file>` | Summarize the start of a file |
//! | `docchat chat "<message>" --api-key <key>` | Chat with the model directly |
//!
//! Without `--config` the built-in defaults are used.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use doc_chat::chunk::chunk_document;
use doc_chat::config::{self, Config};
use doc_chat::credential::CredentialSource;
use doc_chat::direct_chat::{DirectChat, DirectOutcome};
use doc_chat::embedding::{create_embedder, Embedder};
use doc_chat::error::DocChatError;
use doc_chat::extract::extract_file;
use doc_chat::llm::{ChatModel, OpenAiChatFactory, OpenAiChatModel};
use doc_chat::respond::GroundedResponder;
use doc_chat::retrieve::Retriever;
use doc_chat::server;
use doc_chat::summarize::Summarizer;
use doc_chat::upload::{load_document, LoadedDocument};

/// Doc Chat: ask questions about a document, or chat with a model directly.
#[derive(Parser)]
#[command(name = "docchat", version, about)]
struct Cli {
    /// Path to configuration file (TOML). Defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Print the plain text extracted from a .pdf, .docx or .txt file.
    Extract { file: PathBuf },

    /// Print the chunks a file is split into.
    Chunks { file: PathBuf },

    /// Answer a question using only the file's content.
    ///
    /// Reads the model key from the variable named in `llm.api_key_env`.
    Ask { file: PathBuf, question: String },

    /// Summarize the first `summary.max_chars` characters of a file.
    Summarize { file: PathBuf },

    /// Send one message to the model with your own API key.
    ///
    /// The key is never read from the environment.
    Chat {
        message: String,

        #[arg(long)]
        api_key: Option<String>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => config::load_config(path),
        None => Ok(Config::default()),
    }
}

/// Reads and indexes `file` through the same path as an upload.
async fn load_file(
    file: &Path,
    cfg: &Config,
    embedder: &dyn Embedder,
) -> anyhow::Result<LoadedDocument> {
    let bytes = std::fs::read(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    load_document(&filename, bytes, cfg, embedder)
        .await
        .map_err(user_error)
}

fn document_model(cfg: &Config) -> anyhow::Result<Arc<dyn ChatModel>> {
    let model = OpenAiChatModel::new(
        &cfg.llm,
        CredentialSource::environment(&cfg.llm.api_key_env),
    )?;
    Ok(Arc::new(model))
}

fn user_error(err: DocChatError) -> anyhow::Error {
    anyhow::anyhow!("{} ({})", err.user_message(), err)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let cfg = load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Extract { file } => {
            let text = extract_file(&file).map_err(|e| user_error(e.into()))?;
            println!("{}", text);
        }
        Commands::Chunks { file } => {
            let text = extract_file(&file).map_err(|e| user_error(e.into()))?;
            let chunks = chunk_document(&text, &cfg.chunking);
            for chunk in &chunks {
                println!(
                    "--- chunk {} [{}..{}] {} chars",
                    chunk.index,
                    chunk.start,
                    chunk.end,
                    chunk.char_len()
                );
                println!("{}", chunk.text);
            }
            println!("{} chunks", chunks.len());
        }
        Commands::Ask { file, question } => {
            if question.trim().is_empty() {
                bail!("question must not be empty");
            }
            let embedder = create_embedder(&cfg.embedding)?;
            let loaded = load_file(&file, &cfg, embedder.as_ref()).await?;
            let responder = GroundedResponder::new(
                Retriever::new(embedder, cfg.retrieval.top_k),
                document_model(&cfg)?,
            );
            let reply = responder
                .answer(&question, Some(&loaded.index))
                .await
                .map_err(|e| user_error(e.into()))?;
            println!("{}", reply);
        }
        Commands::Summarize { file } => {
            let text = extract_file(&file).map_err(|e| user_error(e.into()))?;
            let summarizer = Summarizer::new(document_model(&cfg)?, cfg.summary.max_chars);
            let reply = summarizer
                .summarize(Some(&text))
                .await
                .map_err(|e| user_error(e.into()))?;
            println!("{}", reply);
        }
        Commands::Chat { message, api_key } => {
            let chat = DirectChat::new(Arc::new(OpenAiChatFactory::new(cfg.llm.clone())));
            let reply = chat.respond(&message, &[], api_key.as_deref()).await;
            println!("{}", reply.text);
            if reply.outcome != DirectOutcome::Answered {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
