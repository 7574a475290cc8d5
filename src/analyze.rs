//! Single-document analysis: extract a PDF's text and have the chat model
//! return structured [`DocumentMetadata`].
//!
//! The model is instructed to emit JSON only. Output is parsed strictly;
//! one repair round-trip is attempted when the first response does not
//! parse, after which the failure propagates.

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;

use crate::extract::extract_text;
use crate::llm::{ChatMessage, ChatModel};
use crate::models::{DocKind, DocumentMetadata};
use crate::prompts;

const METADATA_FORMAT: &str = "Return a single JSON object with exactly these keys:\n\
  \"title\": string,\n\
  \"author\": string or null,\n\
  \"summary\": array of strings (one per paragraph of the summary),\n\
  \"document_type\": string or null,\n\
  \"key_topics\": array of strings,\n\
  \"language\": string or null,\n\
  \"page_count\": integer or null";

/// Analyze a single uploaded PDF.
pub async fn analyze_pdf(
    model: &dyn ChatModel,
    name: &str,
    bytes: &[u8],
) -> Result<DocumentMetadata> {
    if DocKind::from_name(name) != Some(DocKind::Pdf) {
        bail!("analysis accepts PDF files only, got '{}'", name);
    }
    let text = extract_text(name, bytes).with_context(|| format!("could not read '{}'", name))?;
    analyze_text(model, &text).await
}

/// The prompt-and-parse half of analysis, separated from PDF extraction so
/// it can run against any text.
pub async fn analyze_text(model: &dyn ChatModel, text: &str) -> Result<DocumentMetadata> {
    let messages = prompts::analyze_document(METADATA_FORMAT, text);
    complete_structured(model, messages)
        .await
        .context("document analysis failed")
}

/// Run the completion and parse its output as `T`, allowing one repair
/// round-trip on malformed JSON.
pub(crate) async fn complete_structured<T: DeserializeOwned>(
    model: &dyn ChatModel,
    mut messages: Vec<ChatMessage>,
) -> Result<T> {
    let raw = model.complete(&messages).await?;
    match parse_structured(&raw) {
        Ok(parsed) => Ok(parsed),
        Err(first_err) => {
            messages.push(ChatMessage::assistant(&raw));
            messages.push(prompts::repair_json(&raw, &first_err.to_string()));
            let retried = model.complete(&messages).await?;
            parse_structured(&retried)
                .with_context(|| format!("output still malformed after repair: {}", first_err))
        }
    }
}

/// Strict JSON parse, tolerating a fenced ```json block around the payload.
pub(crate) fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let stripped = strip_code_fence(raw.trim());
    serde_json::from_str(stripped).map_err(Into::into)
}

fn strip_code_fence(raw: &str) -> &str {
    let Some(rest) = raw.strip_prefix("```") else {
        return raw;
    };
    // Drop the info string ("json") on the opening fence line.
    let rest = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedModel;
    use std::sync::Arc;

    const VALID: &str = r#"{
        "title": "Quarterly Report",
        "author": "Finance Team",
        "summary": ["Revenue grew.", "Costs held flat."],
        "document_type": "report",
        "key_topics": ["revenue", "costs"],
        "language": "en",
        "page_count": 12
    }"#;

    #[tokio::test]
    async fn valid_json_parses_without_repair() {
        let model = Arc::new(ScriptedModel::new(vec![VALID]));
        let meta = analyze_text(model.as_ref(), "some document text")
            .await
            .unwrap();
        assert_eq!(meta.title, "Quarterly Report");
        assert_eq!(meta.summary.len(), 2);
        assert_eq!(meta.page_count, Some(12));
        assert_eq!(model.calls().len(), 1);
    }

    #[tokio::test]
    async fn fenced_json_is_accepted() {
        let fenced = format!("```json\n{VALID}\n```");
        let model = ScriptedModel::new(vec![&fenced]);
        let meta = analyze_text(&model, "text").await.unwrap();
        assert_eq!(meta.title, "Quarterly Report");
    }

    #[tokio::test]
    async fn malformed_then_repaired() {
        let model = Arc::new(ScriptedModel::new(vec!["not json at all", VALID]));
        let meta = analyze_text(model.as_ref(), "text").await.unwrap();
        assert_eq!(meta.title, "Quarterly Report");

        let calls = model.calls();
        assert_eq!(calls.len(), 2);
        // The repair call carries the bad output back to the model.
        assert!(calls[1]
            .last()
            .unwrap()
            .content
            .contains("not json at all"));
    }

    #[tokio::test]
    async fn malformed_twice_fails() {
        let model = ScriptedModel::new(vec!["nope", "still nope"]);
        let err = analyze_text(&model, "text").await.unwrap_err();
        assert!(err.to_string().contains("analysis failed"));
    }

    #[tokio::test]
    async fn non_pdf_rejected() {
        let model = ScriptedModel::new(vec![VALID]);
        let err = analyze_pdf(&model, "notes.txt", b"plain text")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("PDF"));
    }

    #[test]
    fn strip_code_fence_variants() {
        assert_eq!(strip_code_fence("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }
}
