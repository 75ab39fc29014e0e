//! HTTP surface.
//!
//! A thin axum layer over the pipeline and the retrieval assembler. Every
//! error response uses the JSON envelope from [`crate::error`]:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/upload/` | Multipart upload, field `file`; ingests the document |
//! | `POST` | `/ask/` | `{question, group?}` → `{answer, source_files}` |
//! | `GET`  | `/files/` | List stored documents, newest first |
//! | `POST` | `/delete/` | `?filename=` — remove file, chunks, record |
//! | `POST` | `/rename/` | `?old_name=&new_name=` |
//! | `POST` | `/group/` | `?filename=&group=` — reassign and re-tag chunks |
//! | `GET`  | `/groups/` | Group → stored names aggregation |
//! | `POST` | `/fix_group_metadata/` | Repair sweep over chunk group fields |
//! | `POST` | `/set_api_key/` | Form `key=` — persist the chat API credential |
//! | `POST` | `/test_api_key/` | Form `key=` — live validation call |
//! | `GET`  | `/health` | Liveness check with version |
//!
//! All origins, methods and headers are permitted (browser clients).

use axum::extract::{Multipart, Query, State};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::answer::{Answer, Assembler};
use crate::config::{Config, LlmConfig};
use crate::error::{Error, Result};
use crate::llm::{self, CredentialStore, HttpChatModel};
use crate::pipeline::{Pipeline, StoredFile};

#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
    assembler: Arc<Assembler>,
    credentials: Arc<CredentialStore>,
    llm: LlmConfig,
}

/// Build all services from the configuration and serve until terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pipeline = Arc::new(Pipeline::from_config(config).await?);
    let credentials = Arc::new(CredentialStore::new(&config.storage.root));
    let chat = Arc::new(HttpChatModel::new(&config.llm, Arc::clone(&credentials))?);
    let assembler = Arc::new(Assembler::new(
        pipeline.index(),
        pipeline.embedder(),
        chat,
        config.retrieval.top_k,
        config.retrieval.max_context_chars,
    ));

    let state = AppState {
        pipeline,
        assembler,
        credentials,
        llm: config.llm.clone(),
    };

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!("listening on http://{}", config.server.bind);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/upload/", post(handle_upload))
        .route("/ask/", post(handle_ask))
        .route("/files/", get(handle_files))
        .route("/delete/", post(handle_delete))
        .route("/rename/", post(handle_rename))
        .route("/group/", post(handle_group))
        .route("/groups/", get(handle_groups))
        .route("/fix_group_metadata/", post(handle_fix_groups))
        .route("/set_api_key/", post(handle_set_key))
        .route("/test_api_key/", post(handle_test_key))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

fn require(value: Option<String>, name: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(Error::Validation(format!(
            "missing required parameter: {name}"
        ))),
    }
}

#[derive(Serialize)]
struct OkResponse {
    success: bool,
}

// ============ POST /upload/ ============

#[derive(Serialize)]
struct UploadResponse {
    filename: String,
    original_filename: String,
    text: String,
}

async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    let mut upload: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Validation(format!("malformed multipart body: {e}")))?
    {
        if field.name() == Some("file") {
            let name = field
                .file_name()
                .ok_or_else(|| Error::Validation("file field has no filename".to_string()))?
                .to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| Error::Validation(format!("failed to read upload: {e}")))?;
            upload = Some((name, bytes.to_vec()));
            break;
        }
    }
    let (name, bytes) =
        upload.ok_or_else(|| Error::Validation("missing multipart field 'file'".to_string()))?;

    let outcome = state.pipeline.upload(&name, &bytes).await?;
    Ok(Json(UploadResponse {
        filename: outcome.stored_name,
        original_filename: outcome.original_name,
        text: outcome.text,
    }))
}

// ============ POST /ask/ ============

#[derive(Deserialize)]
struct AskRequest {
    question: Option<String>,
    group: Option<String>,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<Answer>> {
    let question = request.question.unwrap_or_default();
    let answer = state
        .assembler
        .answer(&question, request.group.as_deref())
        .await?;
    Ok(Json(answer))
}

// ============ GET /files/ ============

#[derive(Serialize)]
struct FilesResponse {
    files: Vec<StoredFile>,
}

async fn handle_files(State(state): State<AppState>) -> Result<Json<FilesResponse>> {
    Ok(Json(FilesResponse {
        files: state.pipeline.list_files()?,
    }))
}

// ============ POST /delete/ ============

#[derive(Deserialize)]
struct DeleteParams {
    filename: Option<String>,
}

async fn handle_delete(
    State(state): State<AppState>,
    Query(params): Query<DeleteParams>,
) -> Result<Json<OkResponse>> {
    let filename = require(params.filename, "filename")?;
    state.pipeline.delete(&filename).await?;
    Ok(Json(OkResponse { success: true }))
}

// ============ POST /rename/ ============

#[derive(Deserialize)]
struct RenameParams {
    old_name: Option<String>,
    new_name: Option<String>,
}

async fn handle_rename(
    State(state): State<AppState>,
    Query(params): Query<RenameParams>,
) -> Result<Json<OkResponse>> {
    let old_name = require(params.old_name, "old_name")?;
    let new_name = require(params.new_name, "new_name")?;
    state.pipeline.rename(&old_name, &new_name)?;
    Ok(Json(OkResponse { success: true }))
}

// ============ POST /group/ ============

#[derive(Deserialize)]
struct GroupParams {
    filename: Option<String>,
    group: Option<String>,
}

async fn handle_group(
    State(state): State<AppState>,
    Query(params): Query<GroupParams>,
) -> Result<Json<OkResponse>> {
    let filename = require(params.filename, "filename")?;
    let group = require(params.group, "group")?;
    state.pipeline.set_group(&filename, &group).await?;
    Ok(Json(OkResponse { success: true }))
}

// ============ GET /groups/ ============

#[derive(Serialize)]
struct GroupsResponse {
    groups: BTreeMap<String, Vec<String>>,
}

async fn handle_groups(State(state): State<AppState>) -> Result<Json<GroupsResponse>> {
    Ok(Json(GroupsResponse {
        groups: state.pipeline.groups()?,
    }))
}

// ============ POST /fix_group_metadata/ ============

#[derive(Serialize)]
struct FixGroupsResponse {
    success: bool,
    fixed: u64,
}

async fn handle_fix_groups(State(state): State<AppState>) -> Result<Json<FixGroupsResponse>> {
    let fixed = state.pipeline.fix_groups().await?;
    Ok(Json(FixGroupsResponse {
        success: true,
        fixed,
    }))
}

// ============ credential endpoints ============

#[derive(Deserialize)]
struct KeyForm {
    key: Option<String>,
}

async fn handle_set_key(
    State(state): State<AppState>,
    Form(form): Form<KeyForm>,
) -> Result<Json<OkResponse>> {
    let key = require(form.key, "key")?;
    state.credentials.save(&key)?;
    Ok(Json(OkResponse { success: true }))
}

async fn handle_test_key(
    State(state): State<AppState>,
    Form(form): Form<KeyForm>,
) -> Result<Json<OkResponse>> {
    let key = require(form.key, "key")?;
    llm::probe_key(&state.llm, &key).await?;
    Ok(Json(OkResponse { success: true }))
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
