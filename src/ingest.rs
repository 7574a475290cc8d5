//! Ingestion pipeline: persist uploads, extract text, chunk, embed, index.
//!
//! One call processes a whole batch of uploads into a single session.
//! Per-file problems (unsupported extension, unreadable content) are
//! recorded in the report rather than aborting the batch; the batch fails
//! only when not a single chunk could be produced. The session's ingest
//! lock is held across embedding and persistence, so concurrent ingests
//! into the same session serialize instead of racing on the index file.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

use crate::chunk::split_text;
use crate::config::{ChunkingConfig, Config};
use crate::embedding::EmbeddingProvider;
use crate::extract::extract_text;
use crate::index::{IngestMode, VectorIndex};
use crate::models::{Chunk, DocKind, FileOutcome, IngestReport, UploadedFile};
use crate::session::SessionStore;

/// The whole batch produced nothing indexable.
#[derive(Debug)]
pub struct NoValidDocuments;

impl std::fmt::Display for NoValidDocuments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no valid documents in upload batch")
    }
}

impl std::error::Error for NoValidDocuments {}

/// Per-call chunking parameters; unset fields fall back to the configured
/// defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkingOverride {
    pub chunk_size: Option<usize>,
    pub overlap: Option<usize>,
}

impl ChunkingOverride {
    fn resolve(&self, defaults: &ChunkingConfig) -> Result<(usize, usize)> {
        let chunk_size = self.chunk_size.unwrap_or(defaults.chunk_size);
        let overlap = self.overlap.unwrap_or(defaults.overlap);
        if chunk_size == 0 {
            bail!("chunk_size must be > 0");
        }
        if overlap >= chunk_size {
            bail!(
                "overlap ({}) must be strictly less than chunk_size ({})",
                overlap,
                chunk_size
            );
        }
        Ok((chunk_size, overlap))
    }
}

/// Ingest `files` into the session named by `session_id` (a fresh session
/// when `None`). Returns the per-file outcomes and totals.
pub async fn ingest_files(
    store: &SessionStore,
    config: &Config,
    provider: &dyn EmbeddingProvider,
    session_id: Option<&str>,
    files: &[UploadedFile],
    mode: IngestMode,
    chunking: ChunkingOverride,
) -> Result<IngestReport> {
    // Reject bad parameters before any session directory is created.
    let (chunk_size, overlap) = chunking.resolve(&config.chunking)?;

    let session = store.resolve(session_id)?;
    let lock = store.ingest_lock(&session.id).await;
    let _guard = lock.lock().await;

    let mut outcomes: Vec<FileOutcome> = Vec::with_capacity(files.len());
    let mut chunks: Vec<Chunk> = Vec::new();

    for file in files {
        if DocKind::from_name(&file.name).is_none() {
            eprintln!("Warning: skipping unsupported file '{}'", file.name);
            outcomes.push(FileOutcome::Skipped {
                name: file.name.clone(),
                reason: "unsupported file type".to_string(),
            });
            continue;
        }

        let raw_path = save_raw(&session.raw_dir, file)?;
        let saved_name = raw_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.name.clone());

        let text = match extract_text(&file.name, &file.bytes) {
            Ok(text) => text,
            Err(e) => {
                eprintln!("Warning: could not read '{}': {}", file.name, e);
                outcomes.push(FileOutcome::Failed {
                    name: file.name.clone(),
                    error: e.to_string(),
                });
                continue;
            }
        };

        let file_chunks = split_text(&saved_name, &text, chunk_size, overlap)?;

        outcomes.push(FileOutcome::Ingested {
            name: saved_name,
            chunks: file_chunks.len(),
        });
        chunks.extend(file_chunks);
    }

    if chunks.is_empty() {
        return Err(anyhow::Error::new(NoValidDocuments).context(format!(
            "none of the {} uploaded file(s) produced any text",
            files.len()
        )));
    }

    let chunk_count = chunks.len();
    let index = VectorIndex::build(
        &session.index_dir,
        &chunks,
        provider,
        &config.embedding,
        mode,
    )
    .await?;
    index.close().await;

    Ok(IngestReport {
        session_id: session.id,
        files: outcomes,
        chunks_written: chunk_count,
        embeddings_written: chunk_count,
    })
}

/// Write the upload's bytes under the session's raw directory, keeping the
/// original filename but never overwriting an earlier upload of the same
/// name. Any path components in the client-supplied name are discarded.
fn save_raw(raw_dir: &Path, file: &UploadedFile) -> Result<PathBuf> {
    let base = Path::new(&file.name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "upload".to_string());

    let path = unique_path(raw_dir, &base);
    std::fs::write(&path, &file.bytes)?;
    Ok(path)
}

fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }

    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{ext}")),
        _ => (name.to_string(), String::new()),
    };
    for n in 1.. {
        let candidate = dir.join(format!("{stem}-{n}{ext}"));
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!()
}
