//! # Multi-KB RAG CLI (`mkb`)
//!
//! ## Usage
//!
//! ```bash
//! mkb --config ./config/mkb.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mkb serve` | Start the HTTP server (MCP at `/mcp`, REST at `/tools`) |
//! | `mkb create <kb>` | Create an empty knowledge base |
//! | `mkb list` | List knowledge bases |
//! | `mkb info <kb>` | Show counts and metadata of one knowledge base |
//! | `mkb upload <kb> <path>` | Upload a file, or every supported file in a directory |
//! | `mkb chat --kb <kb> "<query>"` | Ask one knowledge base |
//! | `mkb chat --global "<query>"` | Ask whichever knowledge base the router picks |
//! | `mkb route "<query>"` | Show which knowledge base a query routes to |
//! | `mkb delete <kb>` | Delete a knowledge base |
//!
//! Every command except `serve` prints the JSON result on stdout and exits
//! non-zero when the operation failed. Logs go to stderr.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use multi_kb_rag::config::load_config;
use multi_kb_rag::engine::{Engine, OpResult};
use multi_kb_rag::extract::content_type_for_path;
use multi_kb_rag::ingest::UploadRequest;
use multi_kb_rag::server::run_server;
use multi_kb_rag_core::models::Payload;

#[derive(Parser)]
#[command(
    name = "mkb",
    about = "Multi knowledge-base RAG with a semantic router",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mkb.toml")]
    config: PathBuf,

    /// Debug logging for this crate and HTTP tracing.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    Serve,

    /// Create an empty knowledge base.
    Create {
        kb_name: String,

        /// What the KB contains. A meaningful description registers the KB
        /// with the semantic router.
        #[arg(long)]
        description: Option<String>,
    },

    /// List knowledge bases.
    List,

    /// Show counts and metadata of one knowledge base.
    Info { kb_name: String },

    /// Upload a document, or every .pdf/.txt/.md/.docx file under a directory.
    Upload {
        kb_name: String,

        path: PathBuf,

        /// Fail instead of creating a missing KB.
        #[arg(long)]
        no_auto_create: bool,

        /// Metadata override, repeatable (`--meta department=legal`).
        #[arg(long = "meta", value_parser = parse_meta)]
        meta: Vec<(String, String)>,
    },

    /// Ask a question.
    Chat {
        query: String,

        /// Knowledge base to ask.
        #[arg(long, required_unless_present = "global", conflicts_with = "global")]
        kb: Option<String>,

        /// Let the semantic router pick the knowledge base.
        #[arg(long)]
        global: bool,

        #[arg(long, default_value = "cli")]
        session: String,

        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Show which knowledge base a query routes to.
    Route { query: String },

    /// Delete a knowledge base and everything in it.
    Delete { kb_name: String },
}

fn parse_meta(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "multi_kb_rag=debug,tower_http=debug"
    } else {
        "multi_kb_rag=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print the result and turn failure into a non-zero exit.
fn finish(result: OpResult) -> Result<()> {
    print_json(&result.to_json())?;
    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}

async fn upload_file(
    engine: &Engine,
    kb_name: &str,
    path: &Path,
    auto_create: bool,
    metadata: &Payload,
) -> Result<Option<OpResult>> {
    let Some(content_type) = content_type_for_path(path) else {
        return Ok(None);
    };
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    Ok(Some(
        engine
            .upload_document(UploadRequest {
                kb_name: kb_name.to_string(),
                filename,
                content_type: content_type.to_string(),
                bytes,
                auto_create,
                metadata: metadata.clone(),
            })
            .await,
    ))
}

async fn upload_directory(
    engine: &Engine,
    kb_name: &str,
    dir: &Path,
    auto_create: bool,
    metadata: &Payload,
) -> Result<()> {
    let mut uploaded = Vec::new();
    let mut skipped = Vec::new();
    let mut failed = Vec::new();

    for entry in walkdir::WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        match upload_file(engine, kb_name, path, auto_create, metadata).await? {
            None => skipped.push(path.display().to_string()),
            Some(r) if r.success => {
                eprintln!("uploaded {}", path.display());
                uploaded.push(r.to_json());
            }
            Some(r) => {
                eprintln!(
                    "failed {}: {}",
                    path.display(),
                    r.message().unwrap_or("unknown error")
                );
                failed.push(json!({ "file": path.display().to_string(), "result": r.to_json() }));
            }
        }
    }

    let ok = failed.is_empty() && !uploaded.is_empty();
    print_json(&json!({
        "success": ok,
        "uploaded": uploaded.len(),
        "skipped": skipped.len(),
        "failed": failed.len(),
        "results": uploaded,
        "failures": failed,
        "skipped_files": skipped,
    }))?;
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = load_config(&cli.config)?;
    let engine = Arc::new(Engine::from_config(&cfg)?);

    match cli.command {
        Commands::Serve => {
            run_server(engine, &cfg.server.bind).await?;
        }
        Commands::Create {
            kb_name,
            description,
        } => {
            finish(
                engine
                    .create_collection(&kb_name, description.as_deref())
                    .await,
            )?;
        }
        Commands::List => finish(engine.list_collections().await)?,
        Commands::Info { kb_name } => finish(engine.get_collection_info(&kb_name).await)?,
        Commands::Upload {
            kb_name,
            path,
            no_auto_create,
            meta,
        } => {
            let metadata: Payload = meta
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect();
            if path.is_dir() {
                upload_directory(&engine, &kb_name, &path, !no_auto_create, &metadata).await?;
            } else {
                match upload_file(&engine, &kb_name, &path, !no_auto_create, &metadata).await? {
                    Some(result) => finish(result)?,
                    None => bail!(
                        "Unsupported file type: {} (expected .pdf, .txt, .md or .docx)",
                        path.display()
                    ),
                }
            }
        }
        Commands::Chat {
            query,
            kb,
            global,
            session,
            top_k,
        } => {
            let top_k = Some(top_k.unwrap_or(engine.default_top_k()));
            let result = match kb {
                Some(kb) if !global => engine.chat_with_kb(&kb, &query, &session, top_k).await,
                _ => engine.chat_global(&query, &session, top_k).await,
            };
            finish(result)?;
        }
        Commands::Route { query } => finish(engine.route(&query).await)?,
        Commands::Delete { kb_name } => finish(engine.delete_collection(&kb_name).await)?,
    }

    Ok(())
}
