//! # Docport
//!
//! Session-scoped document ingestion, retrieval-augmented question
//! answering, and LLM-backed PDF analysis and comparison.
//!
//! Docport accepts PDF, DOCX, and text uploads, extracts and chunks their
//! text, embeds the chunks, and persists one vector index per session. A
//! conversational retrieval loop answers questions against a session's
//! index, rewriting follow-up questions into standalone form using the
//! chat history. Two further flows run directly over PDFs: structured
//! metadata analysis of a single document, and page-wise comparison of
//! two documents.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────────┐
//! │   Uploads    │──▶│   Pipeline    │──▶│ Session store  │
//! │ PDF/DOCX/TXT │   │ Extract+Chunk │   │ raw + SQLite   │
//! └──────────────┘   │    +Embed     │   │ vector index   │
//!                    └──────────────┘   └──────┬────────┘
//!                                              │
//!                            ┌─────────────────┤
//!                            ▼                 ▼
//!                      ┌──────────┐      ┌──────────┐
//!                      │   CLI    │      │   HTTP   │
//!                      │(docport) │      │  (JSON)  │
//!                      └──────────┘      └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docport ingest report.pdf notes.docx     # new session, build index
//! docport ask "What changed?" --session session_20260830_101500_ab12cd34
//! docport analyze report.pdf               # structured metadata as JSON
//! docport compare v1.pdf v2.pdf            # page-wise differences
//! docport serve api                        # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | PDF/DOCX/text extraction |
//! | [`chunk`] | Overlapping text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`llm`] | Chat model abstraction |
//! | [`prompts`] | Prompt builders for the LLM flows |
//! | [`session`] | Session directories and lifecycle |
//! | [`index`] | Per-session SQLite vector index |
//! | [`ingest`] | Upload-to-index pipeline |
//! | [`chat`] | Conversational retrieval |
//! | [`analyze`] | Single-PDF metadata analysis |
//! | [`compare`] | Two-PDF page-wise comparison |
//! | [`server`] | JSON HTTP server |

pub mod analyze;
pub mod chat;
pub mod chunk;
pub mod compare;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod prompts;
pub mod server;
pub mod session;
