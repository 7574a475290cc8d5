//! # Docport CLI (`docport`)
//!
//! The `docport` binary drives the document pipeline: ingest files into a
//! session, ask questions against a session's index, analyze or compare
//! PDFs, prune old sessions, and start the HTTP API server.
//!
//! ## Usage
//!
//! ```bash
//! docport --config ./config/docport.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docport ingest <files>...` | Upload documents into a session and build its index |
//! | `docport ask "<question>" [--session <id>]` | Ask a question against a session (default: the shared session) |
//! | `docport analyze <pdf>` | Extract structured metadata from one PDF |
//! | `docport compare <reference> <actual>` | Page-wise comparison of two PDFs |
//! | `docport purge` | Delete all but the most recent sessions |
//! | `docport serve api` | Start the JSON HTTP API server |
//!
//! ## Examples
//!
//! ```bash
//! # Ingest two documents into a fresh session
//! docport ingest report.pdf notes.docx
//!
//! # Add another file to the same session
//! docport ingest appendix.pdf --session session_20260830_101500_ab12cd34 --mode append
//!
//! # Ask against the session
//! docport ask "What changed in Q3?" --session session_20260830_101500_ab12cd34
//!
//! # Single-document mode: ingest into the reserved shared session and
//! # ask without naming a session
//! docport ingest manual.pdf --session shared
//! docport ask "What does chapter two cover?"
//!
//! # Compare two versions of a contract
//! docport compare contract_v1.pdf contract_v2.pdf
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use docport::analyze::analyze_pdf;
use docport::chat::ChatEngine;
use docport::compare::compare_pdfs;
use docport::config::{load_config, Config};
use docport::embedding::create_provider;
use docport::index::IngestMode;
use docport::ingest::{ingest_files, ChunkingOverride};
use docport::llm::create_model;
use docport::models::{FileOutcome, UploadedFile};
use docport::server::run_server;
use docport::session::{SessionStore, SHARED_SESSION_ID};

/// Docport — session-scoped document ingestion, retrieval-augmented
/// question answering, and PDF analysis/comparison.
#[derive(Parser)]
#[command(
    name = "docport",
    about = "Docport — document ingestion, retrieval-augmented Q&A, and PDF analysis",
    version,
    long_about = "Docport ingests PDF, DOCX, and text documents into per-session vector \
    indexes, answers questions against them with retrieval-augmented generation, and runs \
    LLM-backed single-document analysis and two-document page-wise comparison. All settings \
    are read from a TOML configuration file."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docport.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Ingest documents into a session and (re)build its vector index.
    ///
    /// Unsupported or unreadable files are skipped with a warning; the
    /// command fails only when no file produces any text.
    Ingest {
        /// Paths of the documents to ingest (PDF, DOCX, TXT, MD).
        files: Vec<PathBuf>,

        /// Ingest into this existing session instead of creating a new one.
        #[arg(long)]
        session: Option<String>,

        /// `replace` rebuilds the session's index from this batch only;
        /// `append` adds to the existing index.
        #[arg(long, default_value = "replace")]
        mode: String,

        /// Chunk size in characters for this batch
        /// (defaults to `[chunking].chunk_size`).
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Overlap in characters between consecutive chunks
        /// (defaults to `[chunking].overlap`).
        #[arg(long)]
        overlap: Option<usize>,
    },

    /// Ask a question against a session's indexed documents.
    Ask {
        /// The question to answer.
        question: String,

        /// Session id returned by a previous `ingest`. Omitted means the
        /// reserved `shared` session.
        #[arg(long)]
        session: Option<String>,

        /// Number of chunks to retrieve (defaults to `[retrieval].top_k`).
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Extract structured metadata from a single PDF.
    Analyze {
        /// Path of the PDF to analyze.
        file: PathBuf,
    },

    /// Compare two PDFs page by page.
    ///
    /// Prints one row per page; unchanged pages show `NO CHANGE`.
    Compare {
        /// The reference (older) version.
        reference: PathBuf,

        /// The updated version to compare against the reference.
        actual: PathBuf,
    },

    /// Delete all but the most recent sessions.
    Purge {
        /// How many of the most recent sessions to keep
        /// (defaults to `[storage].keep_latest`).
        #[arg(long)]
        keep: Option<usize>,
    },

    /// Start the HTTP API server.
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },
}

/// Server subcommands.
#[derive(Subcommand)]
enum ServeService {
    /// Serve the JSON API on `[server].bind`.
    Api,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.command {
        Commands::Ingest {
            files,
            session,
            mode,
            chunk_size,
            overlap,
        } => {
            let chunking = ChunkingOverride {
                chunk_size,
                overlap,
            };
            run_ingest(&cfg, &files, session.as_deref(), mode.parse()?, chunking).await?;
        }
        Commands::Ask {
            question,
            session,
            top_k,
        } => {
            let session = session.as_deref().unwrap_or(SHARED_SESSION_ID);
            run_ask(&cfg, &question, session, top_k).await?;
        }
        Commands::Analyze { file } => {
            run_analyze(&cfg, &file).await?;
        }
        Commands::Compare { reference, actual } => {
            run_compare(&cfg, &reference, &actual).await?;
        }
        Commands::Purge { keep } => {
            let store = SessionStore::new(cfg.storage.root.clone())?;
            let keep = keep.unwrap_or(cfg.storage.keep_latest);
            let removed = store.purge(keep)?;
            println!("Removed {} session(s), kept the {} most recent.", removed, keep);
        }
        Commands::Serve { service } => match service {
            ServeService::Api => {
                run_server(&cfg).await?;
            }
        },
    }

    Ok(())
}

async fn run_ingest(
    cfg: &Config,
    paths: &[PathBuf],
    session: Option<&str>,
    mode: IngestMode,
    chunking: ChunkingOverride,
) -> Result<()> {
    if paths.is_empty() {
        anyhow::bail!("no files given; pass at least one document to ingest");
    }

    let uploads: Vec<UploadedFile> = paths
        .iter()
        .map(read_upload)
        .collect::<Result<_>>()?;

    let store = SessionStore::new(cfg.storage.root.clone())?;
    let provider = create_provider(&cfg.embedding)?;
    let report = ingest_files(
        &store,
        cfg,
        provider.as_ref(),
        session,
        &uploads,
        mode,
        chunking,
    )
    .await?;

    println!("Session: {}", report.session_id);
    for outcome in &report.files {
        match outcome {
            FileOutcome::Ingested { name, chunks } => {
                println!("  ingested {} ({} chunks)", name, chunks);
            }
            FileOutcome::Skipped { name, reason } => {
                println!("  skipped  {} ({})", name, reason);
            }
            FileOutcome::Failed { name, error } => {
                println!("  failed   {} ({})", name, error);
            }
        }
    }
    println!(
        "{} of {} file(s) ingested: {} chunks indexed, {} embeddings written.",
        report.ingested_count(),
        report.files.len(),
        report.chunks_written,
        report.embeddings_written
    );

    Ok(())
}

async fn run_ask(cfg: &Config, question: &str, session_id: &str, top_k: Option<usize>) -> Result<()> {
    let store = SessionStore::new(cfg.storage.root.clone())?;
    let session = store.lookup(session_id)?;
    let engine = ChatEngine::new(cfg.clone())?;

    let outcome = engine.ask(&session, question, top_k).await?;

    println!("{}", outcome.answer);
    if !outcome.sources.is_empty() {
        println!("\nSources:");
        for source in &outcome.sources {
            match source.chunk.page {
                Some(page) => println!(
                    "  {} (page {}, score {:.3})",
                    source.chunk.source, page, source.score
                ),
                None => println!("  {} (score {:.3})", source.chunk.source, source.score),
            }
        }
    }

    Ok(())
}

async fn run_analyze(cfg: &Config, path: &Path) -> Result<()> {
    let upload = read_upload(&path.to_path_buf())?;
    let model = create_model(&cfg.llm)?;

    let metadata = analyze_pdf(model.as_ref(), &upload.name, &upload.bytes).await?;
    println!("{}", serde_json::to_string_pretty(&metadata)?);

    Ok(())
}

async fn run_compare(cfg: &Config, reference: &Path, actual: &Path) -> Result<()> {
    let reference = read_upload(&reference.to_path_buf())?;
    let actual = read_upload(&actual.to_path_buf())?;
    let model = create_model(&cfg.llm)?;

    let rows = compare_pdfs(
        model.as_ref(),
        &reference.name,
        &reference.bytes,
        &actual.name,
        &actual.bytes,
    )
    .await?;

    for row in &rows {
        println!("Page {}: {}", row.page, row.change);
    }

    Ok(())
}

fn read_upload(path: &PathBuf) -> Result<UploadedFile> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(UploadedFile { name, bytes })
}
