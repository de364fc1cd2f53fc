//! Local interactive HTTP server.
//!
//! Exposes both chat modes over a small JSON API. State is per session:
//! create one, upload a document into it, then ask questions.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `POST`   | `/sessions` | Create a session |
//! | `GET`    | `/sessions/{id}` | Session status |
//! | `DELETE` | `/sessions/{id}` | Drop a session and everything in it |
//! | `POST`   | `/sessions/{id}/upload?filename=…` | Upload a file (raw body) |
//! | `POST`   | `/sessions/{id}/rag` | Ask about the uploaded document |
//! | `POST`   | `/sessions/{id}/summarize` | Summarize the uploaded document |
//! | `POST`   | `/sessions/{id}/chat` | Direct chat with a caller-supplied key |
//! | `GET`    | `/sessions/{id}/history?mode=rag\|direct` | Conversation history |
//! | `DELETE` | `/sessions/{id}/history?mode=rag\|direct` | Clear a history |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "oversize_input", "message": "File too large. Maximum allowed size is 2 MB." } }
//! ```
//!
//! Codes: `bad_request` (400), `empty_or_missing_input` (400),
//! `not_found` (404), `oversize_input` (413), `unsupported_format` (415),
//! `upstream_model_failure` (502).
//!
//! A question asked before any upload is not an error: it gets a normal
//! reply asking for a document. Direct-chat failures are likewise returned
//! as replies.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::credential::CredentialSource;
use crate::direct_chat::{DirectChat, DirectOutcome};
use crate::embedding::{create_embedder, Embedder};
use crate::error::{DocChatError, PLEASE_UPLOAD_DOCUMENT};
use crate::llm::{ChatModel, ChatModelFactory, OpenAiChatFactory, OpenAiChatModel};
use crate::models::Turn;
use crate::respond::GroundedResponder;
use crate::retrieve::Retriever;
use crate::session::{ChatMode, SessionStore};
use crate::summarize::Summarizer;
use crate::upload::{load_document, FILE_LOADED};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    sessions: Arc<SessionStore>,
    embedder: Arc<dyn Embedder>,
    responder: Arc<GroundedResponder>,
    summarizer: Arc<Summarizer>,
    direct: Arc<DirectChat>,
}

impl AppState {
    /// Wires the responders from explicit collaborators.
    ///
    /// `model` serves the document path (grounded answers and summaries);
    /// `chat_factory` builds one client per direct-chat request.
    pub fn new(
        config: Config,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn ChatModel>,
        chat_factory: Arc<dyn ChatModelFactory>,
    ) -> Self {
        let retriever = Retriever::new(embedder.clone(), config.retrieval.top_k);
        let responder = GroundedResponder::new(retriever, model.clone());
        let summarizer = Summarizer::new(model, config.summary.max_chars);

        Self {
            config: Arc::new(config),
            sessions: Arc::new(SessionStore::new()),
            embedder,
            responder: Arc::new(responder),
            summarizer: Arc::new(summarizer),
            direct: Arc::new(DirectChat::new(chat_factory)),
        }
    }

    /// Production wiring: embedder from `[embedding]`, OpenAI-compatible
    /// models from `[llm]`. The document path reads its key from the
    /// environment variable named in `llm.api_key_env`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let model = OpenAiChatModel::new(
            &config.llm,
            CredentialSource::environment(&config.llm.api_key_env),
        )?;
        let factory = OpenAiChatFactory::new(config.llm.clone());
        Ok(Self::new(
            config.clone(),
            embedder,
            Arc::new(model),
            Arc::new(factory),
        ))
    }
}

/// Builds the router with permissive CORS.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Bodies between the guard and this limit are rejected by `load_document`;
    // larger ones by the extractor, which `handle_upload` maps to the same
    // error.
    let body_limit = state.config.upload.max_bytes.saturating_mul(4);

    Router::new()
        .route("/health", get(handle_health))
        .route("/sessions", post(handle_create_session))
        .route(
            "/sessions/{id}",
            get(handle_get_session).delete(handle_delete_session),
        )
        .route("/sessions/{id}/upload", post(handle_upload))
        .route("/sessions/{id}/rag", post(handle_rag))
        .route("/sessions/{id}/summarize", post(handle_summarize))
        .route("/sessions/{id}/chat", post(handle_chat))
        .route(
            "/sessions/{id}/history",
            get(handle_get_history).delete(handle_clear_history),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

/// Starts the server on `[server].bind` and runs until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config)?;
    let listener = TcpListener::bind(&config.server.bind).await?;
    serve(listener, state).await
}

/// Serves `state` on an already-bound listener.
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    info!(
        addr = %listener.local_addr()?,
        embedder = %state.embedder.model_name(),
        "docchat server listening"
    );
    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
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
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn session_not_found(id: &Uuid) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: format!("no session with id {}", id),
    }
}

impl From<DocChatError> for AppError {
    fn from(err: DocChatError) -> Self {
        let status = match &err {
            DocChatError::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            DocChatError::EmptyOrMissingInput(_) => StatusCode::BAD_REQUEST,
            DocChatError::OversizeInput { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            DocChatError::UpstreamModelFailure(_) => StatusCode::BAD_GATEWAY,
        };
        if status.is_server_error() {
            error!(error = %err, "request failed");
        } else {
            info!(error = %err, "request rejected");
        }
        AppError {
            status,
            code: err.code().to_string(),
            message: err.user_message(),
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

// ============ Sessions ============

#[derive(Serialize)]
struct CreateSessionResponse {
    session_id: Uuid,
}

async fn handle_create_session(State(state): State<AppState>) -> impl IntoResponse {
    let session_id = state.sessions.create();
    info!(%session_id, "session created");
    (
        StatusCode::CREATED,
        Json(CreateSessionResponse { session_id }),
    )
}

#[derive(Serialize)]
struct DocumentStatus {
    filename: String,
    characters: usize,
    chunks: usize,
    loaded_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct SessionStatus {
    session_id: Uuid,
    created_at: DateTime<Utc>,
    document: Option<DocumentStatus>,
    summary: Option<String>,
    rag_turns: usize,
    direct_turns: usize,
}

async fn handle_get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionStatus>, AppError> {
    let status = state
        .sessions
        .with_session(&id, |s| SessionStatus {
            session_id: s.id,
            created_at: s.created_at,
            document: s.loaded.as_ref().map(|l| DocumentStatus {
                filename: l.document.filename.clone(),
                characters: l.document.char_count(),
                chunks: l.index.len(),
                loaded_at: l.document.loaded_at,
            }),
            summary: s.summary.clone(),
            rag_turns: s.history(ChatMode::Rag).len(),
            direct_turns: s.history(ChatMode::Direct).len(),
        })
        .ok_or_else(|| session_not_found(&id))?;
    Ok(Json(status))
}

async fn handle_delete_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if state.sessions.remove(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(session_not_found(&id))
    }
}

// ============ POST /sessions/{id}/upload ============

#[derive(Deserialize)]
struct UploadParams {
    filename: Option<String>,
}

#[derive(Serialize)]
struct UploadResponse {
    message: String,
    filename: String,
    characters: usize,
    chunks: usize,
}

async fn handle_upload(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<UploadResponse>, AppError> {
    if state.sessions.loaded(&id).is_none() {
        return Err(session_not_found(&id));
    }

    let body = match body {
        Ok(body) => body,
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            let limit = state.config.upload.max_bytes;
            let size = content_length(&headers).unwrap_or(limit.saturating_add(1));
            return Err(DocChatError::OversizeInput { size, limit }.into());
        }
        Err(rejection) => return Err(bad_request(rejection.body_text())),
    };

    let filename = params.filename.unwrap_or_default();
    let loaded = load_document(
        &filename,
        body.to_vec(),
        &state.config,
        state.embedder.as_ref(),
    )
    .await?;

    let response = UploadResponse {
        message: FILE_LOADED.to_string(),
        filename: loaded.document.filename.clone(),
        characters: loaded.document.char_count(),
        chunks: loaded.index.len(),
    };

    state
        .sessions
        .with_session(&id, |s| s.install_document(loaded))
        .ok_or_else(|| session_not_found(&id))?;

    Ok(Json(response))
}

fn content_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

// ============ Chat endpoints ============

#[derive(Deserialize)]
struct MessageRequest {
    message: String,
}

#[derive(Serialize)]
struct ReplyResponse {
    reply: String,
}

async fn handle_rag(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<MessageRequest>,
) -> Result<Json<ReplyResponse>, AppError> {
    if req.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }
    let loaded = state
        .sessions
        .loaded(&id)
        .ok_or_else(|| session_not_found(&id))?;

    let Some(loaded) = loaded else {
        return Ok(Json(ReplyResponse {
            reply: PLEASE_UPLOAD_DOCUMENT.to_string(),
        }));
    };

    let reply = state
        .responder
        .answer(&req.message, Some(&loaded.index))
        .await
        .map_err(DocChatError::from)?;

    let recorded = state
        .sessions
        .with_session(&id, |s| s.record_answer_for(&loaded, &req.message, &reply))
        .unwrap_or(false);
    if !recorded {
        info!(session_id = %id, "document replaced during answer; exchange not recorded");
    }

    Ok(Json(ReplyResponse { reply }))
}

async fn handle_summarize(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReplyResponse>, AppError> {
    let loaded = state
        .sessions
        .loaded(&id)
        .ok_or_else(|| session_not_found(&id))?;

    let text = loaded.as_ref().map(|l| l.document.text.as_str());
    let reply = state
        .summarizer
        .summarize(text)
        .await
        .map_err(DocChatError::from)?;

    if let Some(loaded) = loaded {
        state
            .sessions
            .with_session(&id, |s| s.store_summary_for(&loaded, &reply));
    }

    Ok(Json(ReplyResponse { reply }))
}

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default)]
    api_key: Option<String>,
}

#[derive(Serialize)]
struct ChatResponse {
    reply: String,
    #[serde(flatten)]
    outcome: DirectOutcome,
}

async fn handle_chat(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    if req.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }
    let history: Vec<Turn> = state
        .sessions
        .with_session(&id, |s| s.history(ChatMode::Direct).to_vec())
        .ok_or_else(|| session_not_found(&id))?;

    let reply = state
        .direct
        .respond(&req.message, &history, req.api_key.as_deref())
        .await;

    if reply.outcome == DirectOutcome::Answered {
        state.sessions.with_session(&id, |s| {
            s.record_exchange(ChatMode::Direct, &req.message, &reply.text)
        });
    }

    Ok(Json(ChatResponse {
        reply: reply.text,
        outcome: reply.outcome,
    }))
}

// ============ History ============

#[derive(Deserialize)]
struct HistoryParams {
    mode: ChatMode,
}

#[derive(Serialize)]
struct HistoryResponse {
    mode: ChatMode,
    turns: Vec<Turn>,
}

async fn handle_get_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, AppError> {
    let turns = state
        .sessions
        .with_session(&id, |s| s.history(params.mode).to_vec())
        .ok_or_else(|| session_not_found(&id))?;
    Ok(Json(HistoryResponse {
        mode: params.mode,
        turns,
    }))
}

async fn handle_clear_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<HistoryParams>,
) -> Result<StatusCode, AppError> {
    state
        .sessions
        .with_session(&id, |s| s.clear_history(params.mode))
        .ok_or_else(|| session_not_found(&id))?;
    Ok(StatusCode::NO_CONTENT)
}
