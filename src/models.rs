//! Core data models used throughout docport.
//!
//! These types represent the uploads, chunks, chat turns, and reports that
//! flow through the ingestion and retrieval pipeline.

use serde::{Deserialize, Serialize};

/// A single uploaded file: original name plus raw bytes.
///
/// Produced by the API/CLI boundary before any validation. Whether the file
/// is actually ingestible is decided by [`DocKind::from_name`].
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Supported document formats, detected from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocKind {
    Pdf,
    Docx,
    Txt,
    Markdown,
}

impl DocKind {
    /// Detect the document kind from a filename's extension (case-insensitive).
    /// Returns `None` for anything outside the supported set.
    pub fn from_name(name: &str) -> Option<Self> {
        let ext = name.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase())?;
        match ext.as_str() {
            "pdf" => Some(DocKind::Pdf),
            "docx" => Some(DocKind::Docx),
            "txt" => Some(DocKind::Txt),
            "md" => Some(DocKind::Markdown),
            _ => None,
        }
    }
}

/// A bounded text segment derived from one uploaded document.
///
/// Consecutive chunks from the same document overlap by the configured
/// number of characters. `page` is recovered from the extractor's page
/// markers and is `None` for formats without pages.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    /// Original filename of the source document.
    pub source: String,
    /// 1-based page number, when the source format has pages.
    pub page: Option<i64>,
    /// Position of this chunk within its document, starting at 0.
    pub chunk_index: i64,
    pub text: String,
    /// SHA-256 of `text`, hex-encoded.
    pub hash: String,
}

/// A chunk returned from a similarity query, with its cosine score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Speaker role for one conversational turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One (role, message) turn in a session's chat history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Per-file result of an ingestion batch. Skips and failures are recorded,
/// not thrown; the batch fails only when no file survives.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    Ingested { name: String, chunks: usize },
    Skipped { name: String, reason: String },
    Failed { name: String, error: String },
}

impl FileOutcome {
    pub fn name(&self) -> &str {
        match self {
            FileOutcome::Ingested { name, .. }
            | FileOutcome::Skipped { name, .. }
            | FileOutcome::Failed { name, .. } => name,
        }
    }
}

/// Summary of one ingestion call.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub session_id: String,
    pub files: Vec<FileOutcome>,
    pub chunks_written: usize,
    pub embeddings_written: usize,
}

impl IngestReport {
    pub fn ingested_count(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(f, FileOutcome::Ingested { .. }))
            .count()
    }
}

/// Structured metadata extracted from a single document by the analysis flow.
///
/// The LLM is constrained to return exactly this schema as JSON; missing
/// optional fields degrade to their defaults rather than failing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    /// Multi-paragraph summary, one entry per paragraph.
    pub summary: Vec<String>,
    #[serde(default)]
    pub document_type: Option<String>,
    #[serde(default)]
    pub key_topics: Vec<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub page_count: Option<u32>,
}

/// Marker used for pages with no differences in a comparison result.
pub const NO_CHANGE: &str = "NO CHANGE";

/// One row of a page-wise document comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub page: u32,
    /// Description of the difference, or [`NO_CHANGE`] verbatim.
    pub change: String,
}

impl ComparisonRow {
    pub fn is_unchanged(&self) -> bool {
        self.change.trim() == NO_CHANGE
    }
}
