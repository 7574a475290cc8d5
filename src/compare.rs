//! Page-wise comparison of two PDFs.
//!
//! Both documents are extracted with page markers intact, combined under
//! per-document headers, and handed to the chat model, which reports one
//! row per page. Pages without differences come back as the literal
//! `NO CHANGE` marker. Rows are returned sorted by page number.

use anyhow::{bail, Context, Result};

use crate::analyze::complete_structured;
use crate::extract::extract_text;
use crate::llm::ChatModel;
use crate::models::{ComparisonRow, DocKind};
use crate::prompts;

const COMPARISON_FORMAT: &str = "Return a JSON array. Each element is an object with exactly \
these keys:\n\
  \"page\": integer (1-based page number),\n\
  \"change\": string describing the difference on that page, or exactly \
\"NO CHANGE\" when the page is identical in both documents";

/// Compare two uploaded PDFs page by page. The first document is treated
/// as the reference version, the second as the updated one.
pub async fn compare_pdfs(
    model: &dyn ChatModel,
    reference_name: &str,
    reference_bytes: &[u8],
    actual_name: &str,
    actual_bytes: &[u8],
) -> Result<Vec<ComparisonRow>> {
    for name in [reference_name, actual_name] {
        if DocKind::from_name(name) != Some(DocKind::Pdf) {
            bail!("comparison accepts PDF files only, got '{}'", name);
        }
    }

    let reference = extract_text(reference_name, reference_bytes)
        .with_context(|| format!("could not read '{}'", reference_name))?;
    let actual = extract_text(actual_name, actual_bytes)
        .with_context(|| format!("could not read '{}'", actual_name))?;

    compare_texts(model, reference_name, &reference, actual_name, &actual).await
}

/// The prompt-and-parse half of comparison, separated from PDF extraction.
pub async fn compare_texts(
    model: &dyn ChatModel,
    reference_name: &str,
    reference_text: &str,
    actual_name: &str,
    actual_text: &str,
) -> Result<Vec<ComparisonRow>> {
    let combined = format!(
        "Document: {}\n{}\n\nDocument: {}\n{}",
        reference_name, reference_text, actual_name, actual_text
    );

    let messages = prompts::compare_documents(COMPARISON_FORMAT, &combined);
    let mut rows: Vec<ComparisonRow> = complete_structured(model, messages)
        .await
        .context("document comparison failed")?;

    rows.sort_by_key(|row| row.page);
    Ok(rows)
}
