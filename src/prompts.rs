//! Prompt builders for the four LLM-backed flows: question rewriting,
//! grounded question answering, document analysis, and document comparison.
//!
//! Each builder returns the full message list for one chat-completion call.
//! Structured flows (analysis, comparison) embed their JSON schema in the
//! prompt and demand JSON-only output; the callers parse strictly and
//! re-prompt once on malformed output.

use crate::llm::ChatMessage;
use crate::models::{ChatTurn, Role};

/// System prompt for rewriting a follow-up question into standalone form.
const REWRITE_SYSTEM: &str = "Given a conversation history and the most recent user query, \
rewrite the query as a standalone question that makes sense without relying on the previous \
context. Do not provide an answer. Only reformulate the question if necessary; otherwise, \
return it unchanged.";

/// System prompt template for context-grounded answering.
const QA_SYSTEM: &str = "You are an assistant designed to answer questions using the provided \
context below. Rely only on the retrieved information to form your response. If the answer is \
not found in the context, say you don't know.";

/// Builds the rewrite request: history as proper turns, then the new question.
pub fn rewrite_question(history: &[ChatTurn], question: &str) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(REWRITE_SYSTEM)];
    for turn in history {
        messages.push(turn_to_message(turn));
    }
    messages.push(ChatMessage::user(question));
    messages
}

/// Builds the grounded QA request: system prompt carrying the retrieved
/// context, conversation so far, then the (standalone) question.
pub fn grounded_answer(context: &str, history: &[ChatTurn], question: &str) -> Vec<ChatMessage> {
    let system = format!("{}\n\nContext:\n{}", QA_SYSTEM, context);
    let mut messages = vec![ChatMessage::system(system)];
    for turn in history {
        messages.push(turn_to_message(turn));
    }
    messages.push(ChatMessage::user(question));
    messages
}

/// Builds the single-document analysis request. `format_instructions`
/// describes the exact JSON schema the caller will parse.
pub fn analyze_document(format_instructions: &str, document_text: &str) -> Vec<ChatMessage> {
    let prompt = format!(
        "You are a highly capable document analysis assistant.\n\
         \n\
         Read the document carefully and produce a detailed, comprehensive summary. \
         The summary must capture all major themes, ideas, and arguments, explain key \
         concepts clearly, preserve important context and intent, and be useful to \
         someone who has not read the document. Avoid vague or generic statements.\n\
         \n\
         Return ONLY valid JSON that strictly follows the schema below. \
         Do NOT add explanations, markdown fences, or extra text. \
         Write the summary as multiple readable paragraphs, one array entry each.\n\
         \n\
         {format_instructions}\n\
         \n\
         Document to analyze:\n\
         {document_text}"
    );
    vec![ChatMessage::user(prompt)]
}

/// Builds the two-document comparison request over page-marked text.
pub fn compare_documents(format_instructions: &str, combined_docs: &str) -> Vec<ChatMessage> {
    let prompt = format!(
        "You will be provided with content from two PDFs. Your tasks are as follows:\n\
         \n\
         1. Compare the content of the two PDFs page by page.\n\
         2. Note the page number for every difference you identify.\n\
         3. Produce one entry per page, covering every page of the longer document.\n\
         4. If a page has no changes, report its change as exactly 'NO CHANGE'.\n\
         \n\
         Input documents:\n\
         \n\
         {combined_docs}\n\
         \n\
         Return ONLY valid JSON following this format, with no extra text:\n\
         \n\
         {format_instructions}"
    );
    vec![ChatMessage::user(prompt)]
}

/// Follow-up prompt after a malformed structured response.
pub fn repair_json(previous_output: &str, parse_error: &str) -> ChatMessage {
    ChatMessage::user(format!(
        "Your previous response was not valid JSON matching the required schema \
         (error: {parse_error}). Respond again with ONLY the corrected JSON.\n\
         Previous response:\n{previous_output}"
    ))
}

fn turn_to_message(turn: &ChatTurn) -> ChatMessage {
    match turn.role {
        Role::User => ChatMessage::user(turn.content.clone()),
        Role::Assistant => ChatMessage::assistant(turn.content.clone()),
    }
}
