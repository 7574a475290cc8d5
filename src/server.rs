//! JSON HTTP API over the document pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ingest` | Upload documents into a session and (re)build its index |
//! | `POST` | `/ask` | Ask a question against a session's indexed documents |
//! | `POST` | `/analyze` | Extract structured metadata from one PDF |
//! | `POST` | `/compare` | Page-wise comparison of two PDFs |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! File content travels as base64 in JSON bodies. `/ingest` accepts
//! optional per-request `chunk_size` and `overlap` values; `/ask` accepts
//! an optional `top_k`. An `/ask` without a `session_id` queries the
//! reserved shared index (single-document mode); ingest into it by naming
//! the `shared` session explicitly.
//!
//! # Error Contract
//!
//! All error responses share one schema:
//!
//! ```json
//! { "error": { "code": "index_not_found", "message": "..." } }
//! ```
//!
//! Error codes: `bad_request` (400), `index_not_found` (404),
//! `document_unreadable` (400), `no_valid_documents` (422), `timeout` (408),
//! `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::analyze::analyze_pdf;
use crate::chat::ChatEngine;
use crate::compare::compare_pdfs;
use crate::config::Config;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::extract::ExtractError;
use crate::index::{IndexError, IngestMode};
use crate::ingest::{ingest_files, ChunkingOverride, NoValidDocuments};
use crate::llm::{create_model, ChatModel};
use crate::models::{ComparisonRow, DocumentMetadata, IngestReport, UploadedFile};
use crate::session::{SessionStore, SHARED_SESSION_ID};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    store: Arc<SessionStore>,
    provider: Arc<dyn EmbeddingProvider>,
    model: Arc<dyn ChatModel>,
    engine: Arc<ChatEngine>,
}

/// Starts the HTTP server on `[server].bind` and serves until the process
/// is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let config = Arc::new(config.clone());

    let store = Arc::new(SessionStore::new(config.storage.root.clone())?);
    let provider: Arc<dyn EmbeddingProvider> = Arc::from(create_provider(&config.embedding)?);
    let model: Arc<dyn ChatModel> = Arc::from(create_model(&config.llm)?);
    let engine = Arc::new(ChatEngine::with_components(
        (*config).clone(),
        Box::new(provider.clone()),
        Box::new(model.clone()),
    ));

    let state = AppState {
        config,
        store,
        provider,
        model,
        engine,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/ingest", post(handle_ingest))
        .route("/ask", post(handle_ask))
        .route("/analyze", post(handle_analyze))
        .route("/compare", post(handle_compare))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    println!("API server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g. `"bad_request"`, `"index_not_found"`).
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

/// Maps pipeline errors onto the API error contract by inspecting the
/// error chain, so handlers stay free of per-error-type plumbing.
fn classify_error(err: anyhow::Error) -> AppError {
    if let Some(index_err) = err.downcast_ref::<IndexError>() {
        return match index_err {
            IndexError::NotFound(_) => AppError::new(
                StatusCode::NOT_FOUND,
                "index_not_found",
                "no index for this session; ingest documents first",
            ),
            IndexError::Corrupt { .. } | IndexError::Incompatible { .. } => AppError::new(
                StatusCode::CONFLICT,
                "index_not_found",
                format!("{}; re-ingest this session", index_err),
            ),
        };
    }
    if err.downcast_ref::<NoValidDocuments>().is_some() {
        return AppError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "no_valid_documents",
            format!("{:#}", err),
        );
    }
    if let Some(extract_err) = err.downcast_ref::<ExtractError>() {
        return AppError::new(
            StatusCode::BAD_REQUEST,
            "document_unreadable",
            extract_err.to_string(),
        );
    }

    let msg = format!("{:#}", err);
    if msg.contains("timed out") {
        AppError::new(StatusCode::REQUEST_TIMEOUT, "timeout", msg)
    } else if msg.contains("invalid session id")
        || msg.contains("must not be empty")
        || msg.contains("strictly less")
        || msg.contains("chunk_size must be")
    {
        bad_request(msg)
    } else if msg.contains("not found") {
        AppError::new(StatusCode::NOT_FOUND, "index_not_found", msg)
    } else {
        AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", msg)
    }
}

// ============ Shared payloads ============

/// One uploaded file in a JSON body.
#[derive(Deserialize)]
struct FilePayload {
    name: String,
    content_base64: String,
}

impl FilePayload {
    fn decode(&self) -> Result<UploadedFile, AppError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&self.content_base64)
            .map_err(|e| bad_request(format!("invalid base64 for '{}': {}", self.name, e)))?;
        Ok(UploadedFile {
            name: self.name.clone(),
            bytes,
        })
    }
}

// ============ POST /ingest ============

#[derive(Deserialize)]
struct IngestRequest {
    /// Existing session to ingest into; omitted means a fresh session.
    session_id: Option<String>,
    /// `"replace"` (default) or `"append"`.
    mode: Option<String>,
    /// Per-request chunking parameters; omitted fields use the configured
    /// defaults.
    chunk_size: Option<usize>,
    overlap: Option<usize>,
    files: Vec<FilePayload>,
}

async fn handle_ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestReport>, AppError> {
    if req.files.is_empty() {
        return Err(bad_request("files must not be empty"));
    }
    let mode = match req.mode.as_deref() {
        None => IngestMode::default(),
        Some(raw) => raw.parse().map_err(|e| bad_request(format!("{e}")))?,
    };

    let files: Vec<UploadedFile> = req
        .files
        .iter()
        .map(FilePayload::decode)
        .collect::<Result<_, _>>()?;

    let report = ingest_files(
        &state.store,
        &state.config,
        state.provider.as_ref(),
        req.session_id.as_deref(),
        &files,
        mode,
        ChunkingOverride {
            chunk_size: req.chunk_size,
            overlap: req.overlap,
        },
    )
    .await
    .map_err(classify_error)?;

    // A rebuilt index invalidates any conversation grounded in the old
    // documents.
    if mode == IngestMode::Replace {
        state.engine.forget(&report.session_id).await;
    }

    Ok(Json(report))
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    /// Omitted means the reserved shared index (single-document mode).
    session_id: Option<String>,
    question: String,
    /// Override of the configured retrieval depth.
    top_k: Option<usize>,
}

#[derive(Serialize)]
struct AskResponse {
    session_id: String,
    answer: String,
    rewritten_question: String,
    sources: Vec<SourceChunk>,
}

/// Retrieval evidence returned alongside an answer.
#[derive(Serialize)]
struct SourceChunk {
    source: String,
    page: Option<i64>,
    score: f32,
    text: String,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    if req.top_k == Some(0) {
        return Err(bad_request("top_k must be >= 1"));
    }

    let session_id = req.session_id.as_deref().unwrap_or(SHARED_SESSION_ID);
    let session = state.store.lookup(session_id).map_err(classify_error)?;

    let outcome = state
        .engine
        .ask(&session, &req.question, req.top_k)
        .await
        .map_err(classify_error)?;

    let sources = outcome
        .sources
        .into_iter()
        .map(|s| SourceChunk {
            source: s.chunk.source,
            page: s.chunk.page,
            score: s.score,
            text: s.chunk.text,
        })
        .collect();

    Ok(Json(AskResponse {
        session_id: session.id,
        answer: outcome.answer,
        rewritten_question: outcome.rewritten_question,
        sources,
    }))
}

// ============ POST /analyze ============

async fn handle_analyze(
    State(state): State<AppState>,
    Json(req): Json<FilePayload>,
) -> Result<Json<DocumentMetadata>, AppError> {
    let file = req.decode()?;
    let metadata = analyze_pdf(state.model.as_ref(), &file.name, &file.bytes)
        .await
        .map_err(classify_error)?;
    Ok(Json(metadata))
}

// ============ POST /compare ============

#[derive(Deserialize)]
struct CompareRequest {
    reference: FilePayload,
    actual: FilePayload,
}

#[derive(Serialize)]
struct CompareResponse {
    rows: Vec<ComparisonRow>,
}

async fn handle_compare(
    State(state): State<AppState>,
    Json(req): Json<CompareRequest>,
) -> Result<Json<CompareResponse>, AppError> {
    let reference = req.reference.decode()?;
    let actual = req.actual.decode()?;

    let rows = compare_pdfs(
        state.model.as_ref(),
        &reference.name,
        &reference.bytes,
        &actual.name,
        &actual.bytes,
    )
    .await
    .map_err(classify_error)?;

    Ok(Json(CompareResponse { rows }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ChatConfig, ChunkingConfig, EmbeddingConfig, LlmConfig, RetrievalConfig, ServerConfig,
        StorageConfig,
    };
    use crate::llm::ScriptedModel;
    use std::path::Path;
    use tempfile::TempDir;

    fn test_config(root: &Path) -> Config {
        Config {
            storage: StorageConfig {
                root: root.to_path_buf(),
                keep_latest: 10,
            },
            chunking: ChunkingConfig {
                chunk_size: 200,
                overlap: 20,
            },
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig {
                provider: "hash".to_string(),
                dims: Some(32),
                ..EmbeddingConfig::default()
            },
            llm: LlmConfig::default(),
            chat: ChatConfig::default(),
            server: ServerConfig::default(),
        }
    }

    fn test_state(root: &Path, model: Arc<ScriptedModel>) -> AppState {
        let config = Arc::new(test_config(root));
        let store = Arc::new(SessionStore::new(config.storage.root.clone()).unwrap());
        let provider: Arc<dyn EmbeddingProvider> =
            Arc::from(create_provider(&config.embedding).unwrap());
        let model: Arc<dyn ChatModel> = model;
        let engine = Arc::new(ChatEngine::with_components(
            (*config).clone(),
            Box::new(provider.clone()),
            Box::new(model.clone()),
        ));
        AppState {
            config,
            store,
            provider,
            model,
            engine,
        }
    }

    fn payload(name: &str, content: &str) -> FilePayload {
        FilePayload {
            name: name.to_string(),
            content_base64: base64::engine::general_purpose::STANDARD.encode(content),
        }
    }

    #[tokio::test]
    async fn ask_without_session_uses_shared_index() {
        let tmp = TempDir::new().unwrap();
        let model = Arc::new(ScriptedModel::new(vec!["It ships in March."]));
        let state = test_state(tmp.path(), model);

        let report = handle_ingest(
            State(state.clone()),
            Json(IngestRequest {
                session_id: Some(SHARED_SESSION_ID.to_string()),
                mode: None,
                chunk_size: None,
                overlap: None,
                files: vec![payload("notes.txt", "The product ships in March.")],
            }),
        )
        .await
        .unwrap();
        assert_eq!(report.0.session_id, SHARED_SESSION_ID);

        let response = handle_ask(
            State(state),
            Json(AskRequest {
                session_id: None,
                question: "When does it ship?".to_string(),
                top_k: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(response.0.session_id, SHARED_SESSION_ID);
        assert_eq!(response.0.answer, "It ships in March.");
    }

    #[tokio::test]
    async fn ingest_honors_per_request_chunking() {
        let tmp = TempDir::new().unwrap();
        let model = Arc::new(ScriptedModel::new(vec!["unused"]));
        let state = test_state(tmp.path(), model);

        let body = "word ".repeat(60);
        let report = handle_ingest(
            State(state.clone()),
            Json(IngestRequest {
                session_id: None,
                mode: None,
                chunk_size: Some(40),
                overlap: Some(0),
                files: vec![payload("long.txt", &body)],
            }),
        )
        .await
        .unwrap();
        assert!(report.0.chunks_written > 2);

        let err = handle_ingest(
            State(state),
            Json(IngestRequest {
                session_id: None,
                mode: None,
                chunk_size: Some(50),
                overlap: Some(50),
                files: vec![payload("a.txt", "alpha")],
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "bad_request");
        assert!(err.message.contains("strictly less"));
    }

    #[tokio::test]
    async fn replace_ingest_clears_session_history() {
        let tmp = TempDir::new().unwrap();
        let model = Arc::new(ScriptedModel::new(vec!["first answer", "second answer"]));
        let state = test_state(tmp.path(), model.clone());

        let ingest = |state: AppState, files: Vec<FilePayload>| async move {
            handle_ingest(
                State(state),
                Json(IngestRequest {
                    session_id: Some("session_20260101_000000_aaaaaaaa".to_string()),
                    mode: None,
                    chunk_size: None,
                    overlap: None,
                    files,
                }),
            )
            .await
        };
        let ask = |state: AppState| async move {
            handle_ask(
                State(state),
                Json(AskRequest {
                    session_id: Some("session_20260101_000000_aaaaaaaa".to_string()),
                    question: "What changed?".to_string(),
                    top_k: None,
                }),
            )
            .await
        };

        ingest(state.clone(), vec![payload("v1.txt", "Version one notes.")])
            .await
            .unwrap();
        ask(state.clone()).await.unwrap();

        ingest(state.clone(), vec![payload("v2.txt", "Version two notes.")])
            .await
            .unwrap();
        ask(state).await.unwrap();

        // With history cleared by the replace, the second ask starts a
        // fresh conversation: no rewrite call is made for either ask.
        let calls = model.calls();
        assert_eq!(calls.len(), 2);
        for call in &calls {
            assert!(!call[0].content.contains("standalone"));
        }
    }

    #[test]
    fn index_errors_map_to_api_codes() {
        let err = anyhow::Error::new(IndexError::NotFound("x".into()));
        let mapped = classify_error(err);
        assert_eq!(mapped.status, StatusCode::NOT_FOUND);
        assert_eq!(mapped.code, "index_not_found");

        let err = anyhow::Error::new(NoValidDocuments);
        let mapped = classify_error(err);
        assert_eq!(mapped.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(mapped.code, "no_valid_documents");

        let err = anyhow::anyhow!("request timed out after 30s");
        assert_eq!(classify_error(err).code, "timeout");

        let err = anyhow::anyhow!("something exploded");
        assert_eq!(
            classify_error(err).status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn file_payload_decode_rejects_bad_base64() {
        let payload = FilePayload {
            name: "a.txt".to_string(),
            content_base64: "!!!not base64!!!".to_string(),
        };
        assert!(payload.decode().is_err());

        let good = FilePayload {
            name: "a.txt".to_string(),
            content_base64: base64::engine::general_purpose::STANDARD.encode(b"hello"),
        };
        assert_eq!(good.decode().unwrap().bytes, b"hello");
    }
}
