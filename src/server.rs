//! HTTP API for the corpus console.
//!
//! Serves the same operations as the CLI to browser or script clients.
//! Each client works in a session that holds its model credential and
//! its last retrieval result, so analysis can run against what the user
//! last looked at.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/sessions` | Create a session, optionally with an `api_key` |
//! | `DELETE` | `/sessions/{id}` | End a session |
//! | `PUT`  | `/sessions/{id}/credential` | Replace the session's API key |
//! | `GET`  | `/sessions/{id}/models` | Models usable with the session's key |
//! | `POST` | `/sessions/{id}/query` | Targeted corpus retrieval for a query |
//! | `POST` | `/sessions/{id}/analyze` | Model analysis of the last query |
//! | `GET`  | `/corpus/dump` | Full corpus context as plain text |
//! | `GET` / `POST` / `PUT` | `/vocabulary` | List / add one / save grid |
//! | `GET` / `POST` / `PUT` | `/sentences` | List / add one / save grid |
//! | `GET` / `POST` | `/tags` | List / add |
//! | `POST` | `/tags/rename` | Rename a tag and every entry using it |
//! | `POST` | `/backup` | Upload the database to GitHub now |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "amis must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `not_found` (404),
//! `rate_limited` (429), `internal` (500), `upstream` (502).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::backup::{backup_database, backup_if_enabled, BackupError, BackupOutcome};
use crate::config::Config;
use crate::context::{build_expert_context, build_full_corpus_context, ExpertContext};
use crate::corpus::{
    add_sentence, add_vocabulary, list_sentences, list_vocabulary, save_sentence_grid,
    save_vocabulary_grid, GridSummary, SentenceAdded, SentenceDraft, VocabularyDraft,
};
use crate::generate::{
    analysis_prompt, generate_with_retry, GeminiClient, GenerateError, Generator, RetryPolicy,
};
use crate::models::{
    Direction, NewSentence, NewVocabulary, PartOfSpeechTag, SentencePair, VocabularyEntry,
};
use crate::relevance::SubstringRelevance;
use crate::session::{SessionStore, SessionSummary};
use crate::store::SqliteStore;
use crate::tags::{add_tag, list_tags, rename_tag};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    store: Arc<SqliteStore>,
    filter: Arc<SubstringRelevance>,
    generator: Arc<dyn Generator>,
    sessions: SessionStore,
}

impl AppState {
    pub fn new(config: Config, store: SqliteStore, generator: Arc<dyn Generator>) -> Self {
        let filter = SubstringRelevance::from_config(&config.retrieval);
        let sessions = SessionStore::from_config(&config.server);
        Self {
            config: Arc::new(config),
            store: Arc::new(store),
            filter: Arc::new(filter),
            generator,
            sessions,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/sessions", post(handle_create_session))
        .route("/sessions/{id}", delete(handle_delete_session))
        .route("/sessions/{id}/credential", put(handle_set_credential))
        .route("/sessions/{id}/models", get(handle_models))
        .route("/sessions/{id}/query", post(handle_query))
        .route("/sessions/{id}/analyze", post(handle_analyze))
        .route("/corpus/dump", get(handle_dump))
        .route(
            "/vocabulary",
            get(handle_list_vocabulary)
                .post(handle_add_vocabulary)
                .put(handle_save_vocabulary),
        )
        .route(
            "/sentences",
            get(handle_list_sentences)
                .post(handle_add_sentence)
                .put(handle_save_sentences),
        )
        .route("/tags", get(handle_list_tags).post(handle_add_tag))
        .route("/tags/rename", post(handle_rename_tag))
        .route("/backup", post(handle_backup))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` and runs until the process
/// is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let store = SqliteStore::open(config).await?;
    let generator = Arc::new(GeminiClient::new(&config.generative)?);
    let app = router(AppState::new(config.clone(), store, generator));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(bind = %bind_addr, "corpus server listening");
    println!("Corpus server listening on http://{}", bind_addr);

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
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn error(status: StatusCode, code: &'static str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code,
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    error(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    error(StatusCode::NOT_FOUND, "not_found", message)
}

fn session_not_found(id: Uuid) -> AppError {
    not_found(format!("no session with id {}", id))
}

/// Corpus operations report validation failures as plain errors; map the
/// known ones to 400/404 and everything else to 500.
fn classify_error(err: anyhow::Error) -> AppError {
    let msg = err.to_string();
    if msg.starts_with("no such") {
        not_found(msg)
    } else if msg.contains("must not be empty")
        || msg.contains("must both be non-empty")
        || msg.starts_with("unknown")
        || msg.contains("appears more than once")
    {
        bad_request(msg)
    } else {
        tracing::error!(error = %msg, "request failed");
        error(StatusCode::INTERNAL_SERVER_ERROR, "internal", msg)
    }
}

impl From<GenerateError> for AppError {
    fn from(e: GenerateError) -> Self {
        let msg = e.to_string();
        match e {
            GenerateError::RateLimited(_) => error(StatusCode::TOO_MANY_REQUESTS, "rate_limited", msg),
            GenerateError::InvalidCredential(_) | GenerateError::MissingApiKey => {
                error(StatusCode::UNAUTHORIZED, "unauthorized", msg)
            }
            GenerateError::Network(_) | GenerateError::Api { .. } | GenerateError::EmptyResponse => {
                error(StatusCode::BAD_GATEWAY, "upstream", msg)
            }
        }
    }
}

impl From<BackupError> for AppError {
    fn from(e: BackupError) -> Self {
        let msg = e.to_string();
        match e {
            BackupError::MissingToken(_) | BackupError::NotConfigured => bad_request(msg),
            BackupError::Api { .. } | BackupError::Http(_) => {
                error(StatusCode::BAD_GATEWAY, "upstream", msg)
            }
            BackupError::Io(_) | BackupError::Database(_) => {
                error(StatusCode::INTERNAL_SERVER_ERROR, "internal", msg)
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

// ============ Sessions ============

#[derive(Deserialize)]
struct CredentialRequest {
    #[serde(default)]
    api_key: Option<String>,
}

/// Without an explicit key the session falls back to the key in the
/// server's environment, if any.
async fn handle_create_session(
    State(state): State<AppState>,
    Json(req): Json<CredentialRequest>,
) -> Json<SessionSummary> {
    let api_key = req
        .api_key
        .or_else(|| state.config.generative.api_key_from_env());
    Json(state.sessions.create(api_key).await)
}

async fn handle_delete_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if state.sessions.remove(id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(session_not_found(id))
    }
}

async fn handle_set_credential(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CredentialRequest>,
) -> Result<Json<SessionSummary>, AppError> {
    state
        .sessions
        .update(id, |s| {
            s.set_api_key(req.api_key);
            s.summary()
        })
        .await
        .map(Json)
        .ok_or_else(|| session_not_found(id))
}

#[derive(Serialize)]
struct ModelsResponse {
    models: Vec<String>,
}

async fn handle_models(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ModelsResponse>, AppError> {
    let session = state
        .sessions
        .get(id)
        .await
        .ok_or_else(|| session_not_found(id))?;

    if let Some(models) = session.cached_models() {
        return Ok(Json(ModelsResponse {
            models: models.to_vec(),
        }));
    }

    let models = state
        .generator
        .list_models(session.api_key().unwrap_or(""))
        .await;
    let cached = models.clone();
    state.sessions.update(id, |s| s.cache_models(cached)).await;
    Ok(Json(ModelsResponse { models }))
}

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(default)]
    direction: Direction,
}

async fn handle_query(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<ExpertContext>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    if state.sessions.get(id).await.is_none() {
        return Err(session_not_found(id));
    }

    let result = build_expert_context(
        state.store.as_ref(),
        state.filter.as_ref(),
        &state.config.retrieval,
        &req.query,
        req.direction,
    )
    .await;

    let response = result.clone();
    state
        .sessions
        .update(id, |s| s.record_query(&req.query, req.direction, result))
        .await
        .ok_or_else(|| session_not_found(id))?;
    Ok(Json(response))
}

#[derive(Deserialize)]
struct AnalyzeRequest {
    #[serde(default)]
    model: Option<String>,
}

#[derive(Serialize)]
struct AnalyzeResponse {
    model: String,
    analysis: String,
}

async fn handle_analyze(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, AppError> {
    let session = state
        .sessions
        .get(id)
        .await
        .ok_or_else(|| session_not_found(id))?;

    let (Some(query), Some(result)) = (session.last_query.as_deref(), session.last_result.as_ref())
    else {
        return Err(bad_request("run a query in this session before analysis"));
    };
    let api_key = session.api_key().ok_or(GenerateError::MissingApiKey)?;

    let model = req
        .model
        .or_else(|| session.cached_models().and_then(|m| m.first().cloned()))
        .unwrap_or_else(|| state.config.generative.model.clone());

    let prompt = analysis_prompt(&result.prompt_text(), query);
    let analysis = generate_with_retry(
        state.generator.as_ref(),
        RetryPolicy::from_config(&state.config.generative),
        api_key,
        &model,
        &prompt,
    )
    .await?;

    Ok(Json(AnalyzeResponse { model, analysis }))
}

// ============ Corpus ============

async fn handle_dump(State(state): State<AppState>) -> Result<String, AppError> {
    build_full_corpus_context(state.store.as_ref())
        .await
        .map_err(classify_error)
}

#[derive(Deserialize)]
struct ListParams {
    limit: Option<i64>,
}

async fn handle_list_vocabulary(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<VocabularyEntry>>, AppError> {
    list_vocabulary(state.store.pool(), params.limit)
        .await
        .map(Json)
        .map_err(classify_error)
}

#[derive(Serialize)]
struct Created {
    id: i64,
}

async fn handle_add_vocabulary(
    State(state): State<AppState>,
    Json(entry): Json<NewVocabulary>,
) -> Result<Json<Created>, AppError> {
    let id = add_vocabulary(state.store.pool(), &entry)
        .await
        .map_err(classify_error)?;
    backup_if_enabled(state.store.pool(), &state.config).await;
    Ok(Json(Created { id }))
}

async fn handle_save_vocabulary(
    State(state): State<AppState>,
    Json(rows): Json<Vec<VocabularyDraft>>,
) -> Result<Json<GridSummary>, AppError> {
    let summary = save_vocabulary_grid(state.store.pool(), rows)
        .await
        .map_err(classify_error)?;
    backup_if_enabled(state.store.pool(), &state.config).await;
    Ok(Json(summary))
}

async fn handle_list_sentences(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<SentencePair>>, AppError> {
    list_sentences(state.store.pool(), params.limit)
        .await
        .map(Json)
        .map_err(classify_error)
}

async fn handle_add_sentence(
    State(state): State<AppState>,
    Json(sentence): Json<NewSentence>,
) -> Result<Json<SentenceAdded>, AppError> {
    let added = add_sentence(&state.store, &sentence)
        .await
        .map_err(classify_error)?;
    backup_if_enabled(state.store.pool(), &state.config).await;
    Ok(Json(added))
}

async fn handle_save_sentences(
    State(state): State<AppState>,
    Json(rows): Json<Vec<SentenceDraft>>,
) -> Result<Json<GridSummary>, AppError> {
    let summary = save_sentence_grid(state.store.pool(), rows)
        .await
        .map_err(classify_error)?;
    backup_if_enabled(state.store.pool(), &state.config).await;
    Ok(Json(summary))
}

// ============ Tags ============

async fn handle_list_tags(
    State(state): State<AppState>,
) -> Result<Json<Vec<PartOfSpeechTag>>, AppError> {
    list_tags(state.store.pool())
        .await
        .map(Json)
        .map_err(classify_error)
}

#[derive(Serialize)]
struct TagAdded {
    created: bool,
}

async fn handle_add_tag(
    State(state): State<AppState>,
    Json(tag): Json<PartOfSpeechTag>,
) -> Result<Json<TagAdded>, AppError> {
    let created = add_tag(
        state.store.pool(),
        &tag.tag_name,
        &tag.description,
        tag.sort_order,
    )
    .await
    .map_err(classify_error)?;
    if created {
        backup_if_enabled(state.store.pool(), &state.config).await;
    }
    Ok(Json(TagAdded { created }))
}

#[derive(Deserialize)]
struct RenameRequest {
    old: String,
    new: String,
}

#[derive(Serialize)]
struct RenameResponse {
    entries_updated: u64,
}

async fn handle_rename_tag(
    State(state): State<AppState>,
    Json(req): Json<RenameRequest>,
) -> Result<Json<RenameResponse>, AppError> {
    let entries_updated = rename_tag(state.store.pool(), &req.old, &req.new)
        .await
        .map_err(classify_error)?;
    backup_if_enabled(state.store.pool(), &state.config).await;
    Ok(Json(RenameResponse { entries_updated }))
}

// ============ POST /backup ============

#[derive(Serialize)]
struct BackupResponse {
    outcome: BackupOutcome,
}

async fn handle_backup(State(state): State<AppState>) -> Result<Json<BackupResponse>, AppError> {
    let outcome = backup_database(state.store.pool(), &state.config).await?;
    Ok(Json(BackupResponse { outcome }))
}
