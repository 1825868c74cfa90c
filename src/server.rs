//! JSON HTTP API.
//!
//! Exposes ingestion, question answering and corpus management over HTTP.
//! One [`Engine`] is shared by every handler.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ingest` | Ingest base64-encoded uploads |
//! | `POST` | `/ask` | Answer a question with citations |
//! | `POST` | `/search` | Retrieval only |
//! | `GET`  | `/documents` | List documents |
//! | `GET`  | `/documents/{id}` | One document with its passages |
//! | `DELETE` | `/documents/{id}` | Delete a document and its passages |
//! | `POST` | `/reset` | Empty the corpus |
//! | `GET`  | `/stats` | Corpus statistics |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404),
//! `dimension_mismatch` (409), `embedding_service` / `generation_service`
//! (502), `index_io` / `internal` (500). A `generation_service` failure on
//! `/ask` also carries the `citations` of the passages that were retrieved.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use marketmuse_core::models::{Citation, ConversationTurn, DocumentSummary, RetrievalResult};
use marketmuse_core::Error;

use crate::config::Config;
use crate::documents::{self, DocumentResponse};
use crate::engine::{AskError, Engine, EngineStats};
use crate::ingest::{IngestReport, Upload};
use crate::progress::NoProgress;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    engine: Arc<Engine>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

/// Starts the HTTP server on `[server].bind` and runs until terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let engine = Arc::new(Engine::open(config).await?);
    let bind_addr = config.server.bind.clone();

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(bind = %bind_addr, "server listening");
    println!("MarketMuse listening on http://{}", bind_addr);
    axum::serve(listener, router(AppState::new(engine))).await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ingest", post(handle_ingest))
        .route("/ask", post(handle_ask))
        .route("/search", post(handle_search))
        .route("/documents", get(handle_list_documents))
        .route(
            "/documents/{id}",
            get(handle_get_document).delete(handle_delete_document),
        )
        .route("/reset", post(handle_reset))
        .route("/stats", get(handle_stats))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
    #[serde(skip_serializing_if = "Option::is_none")]
    citations: Option<Vec<Citation>>,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    citations: Option<Vec<Citation>>,
}

impl AppError {
    fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            citations: None,
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
            citations: self.citations,
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::NOT_FOUND, "not_found", message)
}

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        let status = match &e {
            Error::UnsupportedFormat(_) | Error::CorruptInput { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Error::InvalidChunkConfig(_) => StatusCode::BAD_REQUEST,
            Error::DimensionMismatch { .. } => StatusCode::CONFLICT,
            Error::EmbeddingService(_) | Error::GenerationService(_) => StatusCode::BAD_GATEWAY,
            Error::IndexIo(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError::new(status, e.code(), e.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast::<Error>() {
            Ok(core) => core.into(),
            Err(other) => AppError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                format!("{:#}", other),
            ),
        }
    }
}

impl From<AskError> for AppError {
    fn from(e: AskError) -> Self {
        match e {
            AskError::Retrieval(e) => e.into(),
            AskError::Generation(failure) => {
                let mut err: AppError = failure.error.into();
                err.citations = Some(failure.citations);
                err
            }
        }
    }
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

// ============ POST /ingest ============

#[derive(Deserialize)]
struct IngestRequest {
    documents: Vec<UploadBody>,
}

#[derive(Deserialize)]
struct UploadBody {
    filename: String,
    /// File bytes, standard base64.
    content_base64: String,
    /// Overrides format detection from the filename extension.
    #[serde(default)]
    format: Option<String>,
}

async fn handle_ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestReport>, AppError> {
    if req.documents.is_empty() {
        return Err(bad_request("documents must not be empty"));
    }
    let mut uploads = Vec::with_capacity(req.documents.len());
    for doc in req.documents {
        if doc.filename.trim().is_empty() {
            return Err(bad_request("filename must not be empty"));
        }
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(doc.content_base64.as_bytes())
            .map_err(|e| bad_request(format!("{}: invalid base64: {}", doc.filename, e)))?;
        uploads.push(Upload::bytes(doc.filename, bytes).with_format(doc.format));
    }
    let report = state.engine.ingest(uploads, &NoProgress).await?;
    Ok(Json(report))
}

// ============ POST /ask, POST /search ============

#[derive(Deserialize)]
struct QueryRequest {
    #[serde(alias = "query")]
    question: String,
    #[serde(default)]
    k: Option<usize>,
    #[serde(default)]
    document_ids: Option<Vec<String>>,
}

impl QueryRequest {
    fn validate(&self) -> Result<(), AppError> {
        if self.question.trim().is_empty() {
            return Err(bad_request("question must not be empty"));
        }
        if self.k == Some(0) {
            return Err(bad_request("k must be at least 1"));
        }
        Ok(())
    }
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<ConversationTurn>, AppError> {
    req.validate()?;
    let turn = state
        .engine
        .ask(&req.question, req.k, req.document_ids.as_deref())
        .await?;
    Ok(Json(turn))
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<RetrievalResult>, AppError> {
    req.validate()?;
    let result = state
        .engine
        .retrieve(&req.question, req.k, req.document_ids.as_deref())
        .await?;
    Ok(Json(result))
}

// ============ /documents ============

#[derive(Serialize)]
struct DocumentListResponse {
    documents: Vec<DocumentSummary>,
}

async fn handle_list_documents(
    State(state): State<AppState>,
) -> Result<Json<DocumentListResponse>, AppError> {
    let documents = documents::list_documents(&state.engine).await?;
    Ok(Json(DocumentListResponse { documents }))
}

async fn handle_get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DocumentResponse>, AppError> {
    documents::get_document(&state.engine, &id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(format!("document not found: {}", id)))
}

async fn handle_delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    use marketmuse_core::store::Store;

    if !state.engine.store().delete_document(&id).await? {
        return Err(not_found(format!("document not found: {}", id)));
    }
    Ok(Json(serde_json::json!({ "deleted": id })))
}

// ============ POST /reset, GET /stats ============

async fn handle_reset(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    state.engine.reset().await?;
    Ok(Json(serde_json::json!({ "reset": true })))
}

async fn handle_stats(State(state): State<AppState>) -> Result<Json<EngineStats>, AppError> {
    Ok(Json(state.engine.stats().await?))
}
