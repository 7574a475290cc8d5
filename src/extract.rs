//! Multi-format text extraction for uploaded documents.
//!
//! Dispatch is keyed on the file extension ([`DocKind`]): PDF via
//! `pdf-extract`, DOCX via ZIP + `word/document.xml`, TXT/MD as UTF-8.
//! PDF text is emitted page by page with explicit `--- Page N ---` markers
//! so downstream consumers can recover page numbers from text position.
//! Extraction is a pure transform; callers decide whether a failure skips
//! the file or aborts the batch.

use std::io::Read;

use crate::models::DocKind;

/// Page-boundary marker prefix written between PDF pages.
pub const PAGE_MARKER_PREFIX: &str = "--- Page ";

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extraction error. Variants are distinguishable so the ingestion layer
/// can report skips precisely and the API can map encrypted documents to
/// their own error code.
#[derive(Debug)]
pub enum ExtractError {
    /// File extension outside the supported set.
    Unsupported(String),
    /// Encrypted PDF; the document cannot be read.
    Encrypted(String),
    Pdf { name: String, cause: String },
    Docx { name: String, cause: String },
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::Unsupported(name) => {
                write!(f, "unsupported file type: {}", name)
            }
            ExtractError::Encrypted(name) => {
                write!(f, "document is encrypted and cannot be read: {}", name)
            }
            ExtractError::Pdf { name, cause } => {
                write!(f, "PDF extraction failed for {}: {}", name, cause)
            }
            ExtractError::Docx { name, cause } => {
                write!(f, "DOCX extraction failed for {}: {}", name, cause)
            }
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extracts plain text from an uploaded document, dispatching on extension.
pub fn extract_text(name: &str, bytes: &[u8]) -> Result<String, ExtractError> {
    let kind = DocKind::from_name(name).ok_or_else(|| ExtractError::Unsupported(name.to_string()))?;
    extract_text_as(kind, name, bytes)
}

/// Extracts plain text when the document kind is already known.
pub fn extract_text_as(kind: DocKind, name: &str, bytes: &[u8]) -> Result<String, ExtractError> {
    match kind {
        DocKind::Pdf => extract_pdf(name, bytes),
        DocKind::Docx => extract_docx(name, bytes),
        DocKind::Txt | DocKind::Markdown => Ok(String::from_utf8_lossy(bytes).into_owned()),
    }
}

/// Per-page PDF extraction. Pages are joined as:
///
/// ```text
/// --- Page 1 ---
/// <page text>
/// --- Page 2 ---
/// ...
/// ```
fn extract_pdf(name: &str, bytes: &[u8]) -> Result<String, ExtractError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| {
        let cause = e.to_string();
        if cause.to_ascii_lowercase().contains("encrypt") {
            ExtractError::Encrypted(name.to_string())
        } else {
            ExtractError::Pdf {
                name: name.to_string(),
                cause,
            }
        }
    })?;

    let mut out = String::new();
    for (i, page) in pages.iter().enumerate() {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!("{}{} ---\n", PAGE_MARKER_PREFIX, i + 1));
        out.push_str(page.trim());
        out.push('\n');
    }
    Ok(out)
}

fn extract_docx(name: &str, bytes: &[u8]) -> Result<String, ExtractError> {
    let docx_err = |cause: String| ExtractError::Docx {
        name: name.to_string(),
        cause,
    };

    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| docx_err(e.to_string()))?;
    let mut doc_xml = Vec::new();
    {
        let entry = archive
            .by_name("word/document.xml")
            .map_err(|_| docx_err("word/document.xml not found".to_string()))?;
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut doc_xml)
            .map_err(|e| docx_err(e.to_string()))?;
        if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
            return Err(docx_err("word/document.xml exceeds size limit".to_string()));
        }
    }
    extract_docx_runs(name, &doc_xml)
}

/// Collect `<w:t>` text runs; `<w:p>` paragraph ends become newlines so the
/// chunker still sees paragraph boundaries.
fn extract_docx_runs(name: &str, xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_text_run = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text_run = true;
                }
            }
            Ok(quick_xml::events::Event::Text(te)) if in_text_run => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text_run = false,
                b"p" => {
                    if !out.ends_with('\n') && !out.is_empty() {
                        out.push('\n');
                    }
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => {
                return Err(ExtractError::Docx {
                    name: name.to_string(),
                    cause: e.to_string(),
                })
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}
