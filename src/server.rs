//! HTTP API for the desktop client.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | API info |
//! | `GET`  | `/health` | Index readability and store statistics |
//! | `POST` | `/session` | Create a session |
//! | `GET`  | `/sessions` | Active sessions, formatted for the sidebar |
//! | `PATCH` | `/session/{id}` | Rename a session |
//! | `POST` | `/generate` | Run one conversational turn |
//! | `GET`  | `/conversation/{id}` | Message history |
//! | `DELETE` | `/conversation/{id}` | Clear a conversation (soft delete) |
//! | `GET`  | `/admin/sessions` | List sessions (`active_only`, `limit`) |
//! | `GET`  | `/admin/sessions/{id}` | Session info |
//! | `DELETE` | `/admin/sessions/{id}` | Permanently delete a session |
//! | `GET`  | `/admin/stats` | Store statistics |
//! | `POST` `GET` `DELETE` | `/checklist/{session_id}/{message_id}` | Save, read, or delete a checklist |
//! | `PATCH` | `/checklist/items/{item_id}` | Toggle one checklist item |
//!
//! # Error Contract
//!
//! Reads fail with:
//!
//! ```json
//! { "error": { "code": "not_found", "message": "not found: session abc" } }
//! ```
//!
//! Turns and mutations always answer with a `success` flag, and on failure
//! carry `error` as a string:
//!
//! ```json
//! { "success": false, "error": "validation error: message is required", "session_id": "" }
//! ```
//!
//! Status codes follow the error kind: `validation` (400), `not_found` (404),
//! `retrieval` and `generation` (502), `persistence` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted for the desktop client.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::activity::ActivityEvent;
use crate::config::Config;
use crate::error::TetherError;
use crate::models::{DetectiveMode, Mode, NewChecklistItem};
use crate::orchestrator::{Orchestrator, TurnRequest, TurnResponse};
use crate::store::SessionStore;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    orchestrator: Orchestrator,
}

impl AppState {
    fn store(&self) -> &Arc<dyn SessionStore> {
        self.orchestrator.store()
    }
}

/// Starts the HTTP server.
///
/// Opens the conversation store and the retrieval index, builds the chat
/// model client, and binds to `[server].bind`. Runs until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::from_config(config).await?;
    let app = router(orchestrator);

    println!("Tether server listening on http://{}", config.server.bind);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// All routes with permissive CORS.
pub fn router(orchestrator: Orchestrator) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_info))
        .route("/health", get(handle_health))
        .route("/session", post(handle_create_session))
        .route("/sessions", get(handle_list_sessions))
        .route("/session/{id}", patch(handle_rename_session))
        .route("/generate", post(handle_generate))
        .route(
            "/conversation/{id}",
            get(handle_get_conversation).delete(handle_clear_conversation),
        )
        .route("/admin/sessions", get(handle_admin_list_sessions))
        .route(
            "/admin/sessions/{id}",
            get(handle_admin_get_session).delete(handle_admin_delete_session),
        )
        .route("/admin/stats", get(handle_admin_stats))
        .route(
            "/checklist/{session_id}/{message_id}",
            post(handle_save_checklist)
                .get(handle_get_checklist)
                .delete(handle_delete_checklist),
        )
        .route("/checklist/items/{item_id}", patch(handle_update_item))
        .layer(cors)
        .with_state(AppState { orchestrator })
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

/// Inner error detail with a machine-readable code and human-readable message.
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

impl From<TetherError> for AppError {
    fn from(err: TetherError) -> Self {
        AppError {
            status: status_for_code(err.code()),
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

fn status_for_code(code: &str) -> StatusCode {
    match code {
        "validation" => StatusCode::BAD_REQUEST,
        "not_found" => StatusCode::NOT_FOUND,
        "retrieval" | "generation" => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Mutation outcome as `{success, ...}`. Failures are logged, not raised.
fn mutation_result(action: &str, result: Result<Value, TetherError>) -> Response {
    match result {
        Ok(mut body) => {
            body["success"] = json!(true);
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => {
            tracing::warn!(action, error = %e, "mutation failed");
            (
                status_for_code(e.code()),
                Json(json!({ "success": false, "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// Parse an optional JSON body; an empty body yields `T::default()`.
fn parse_body<T: serde::de::DeserializeOwned + Default>(body: &Bytes) -> Result<T, TetherError> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| TetherError::validation(format!("invalid JSON body: {}", e)))
}

// ============ GET / ============

/// Service name, version and route listing.
async fn handle_info() -> Json<Value> {
    Json(json!({
        "message": "Tether API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "GET /health - Check service health",
            "create_session": "POST /session - Create new conversation session",
            "list_sessions": "GET /sessions - List active sessions",
            "rename_session": "PATCH /session/{id} - Rename a session",
            "generate": "POST /generate - Generate response (requires message and session_id)",
            "get_history": "GET /conversation/{id} - Get conversation history",
            "clear_session": "DELETE /conversation/{id} - Clear conversation history",
            "checklist": "POST|GET|DELETE /checklist/{session_id}/{message_id} - Planner checklists"
        }
    }))
}

// ============ GET /health ============

/// Index and store health. `500` when either is unreadable.
async fn handle_health(State(state): State<AppState>) -> Response {
    let index = state.orchestrator.index().health_check().await;
    let stats = state.store().get_stats().await;

    match (index, stats) {
        (Ok(passages), Ok(stats)) => Json(json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "index_loaded": true,
            "documents_indexed": passages > 0,
            "passages": passages,
            "database_stats": stats,
        }))
        .into_response(),
        (Err(e), _) | (_, Err(e)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "status": "error", "error": e.to_string(), "index_loaded": false })),
        )
            .into_response(),
    }
}

// ============ Sessions ============

#[derive(Debug, Default, Deserialize)]
struct CreateSessionBody {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    metadata: Option<Value>,
    #[serde(default)]
    context: Option<String>,
}

/// Create or reactivate a session. The body is optional.
async fn handle_create_session(State(state): State<AppState>, body: Bytes) -> Response {
    mutation_result("create_session", create_session(&state, &body).await)
}

/// Validate the body and create the session.
async fn create_session(state: &AppState, body: &Bytes) -> Result<Value, TetherError> {
    let body: CreateSessionBody = parse_body(body)?;
    let context = body.context.unwrap_or_else(|| "general".to_string());

    let mut metadata = match body.metadata {
        Some(Value::Object(map)) => Value::Object(map),
        Some(Value::Null) | None => json!({}),
        Some(_) => return Err(TetherError::validation("metadata must be a JSON object")),
    };
    if context != "general" {
        metadata["context"] = json!(context);
    }

    let id = state
        .store()
        .create_session(body.session_id.as_deref(), body.name.as_deref(), Some(&metadata))
        .await?;
    Ok(json!({ "session_id": id, "context": context }))
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    #[serde(default = "default_sessions_limit")]
    limit: i64,
}

fn default_sessions_limit() -> i64 {
    50
}

/// Sessions shaped for the client sidebar.
async fn handle_list_sessions(
    State(state): State<AppState>,
    Query(q): Query<LimitQuery>,
) -> Result<Json<Value>, AppError> {
    let sessions = state.store().list_sessions(true, q.limit).await?;
    let data: Vec<Value> = sessions
        .iter()
        .map(|s| {
            let title = s
                .name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| format!("Chat - {}", s.created_at.format("%Y-%m-%d")));
            json!({
                "id": s.id,
                "title": title,
                "context": s.metadata.get("context").cloned().unwrap_or(json!("general")),
                "messages": [],
                "createdAt": s.created_at,
                "updatedAt": s.updated_at,
            })
        })
        .collect();
    Ok(Json(json!({ "success": true, "data": data })))
}

#[derive(Debug, Default, Deserialize)]
struct RenameBody {
    #[serde(default)]
    name: Option<String>,
}

/// Rename an active session.
async fn handle_rename_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    mutation_result("rename_session", rename_session(&state, &id, &body).await)
}

/// Requires a non-empty `name` in the body.
async fn rename_session(state: &AppState, id: &str, body: &Bytes) -> Result<Value, TetherError> {
    let body: RenameBody = parse_body(body)?;
    let name = body
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| TetherError::validation("name is required"))?;
    state.store().rename_session(id, &name).await?;
    Ok(json!({ "session_id": id, "name": name }))
}

// ============ POST /generate ============

/// Wire form of a turn. Mode strings are parsed here so that unknown values
/// come back as validation errors rather than extractor rejections.
#[derive(Debug, Default, Deserialize)]
struct GenerateBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    activity_context: Option<Vec<ActivityEvent>>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    detective_mode: Option<String>,
}

impl GenerateBody {
    fn into_request(self) -> Result<TurnRequest, TetherError> {
        let mode = match self.mode.as_deref() {
            Some(m) if !m.trim().is_empty() => m.parse::<Mode>()?,
            _ => Mode::default(),
        };
        let detective_mode = match self.detective_mode.as_deref() {
            Some(m) if !m.trim().is_empty() => m.parse::<DetectiveMode>()?,
            _ => DetectiveMode::default(),
        };
        Ok(TurnRequest {
            message: self.message.unwrap_or_default(),
            session_id: self.session_id.unwrap_or_default(),
            activity_context: self.activity_context.unwrap_or_default(),
            mode,
            detective_mode,
        })
    }
}

/// Run one conversation turn. Errors map to status codes by error code.
async fn handle_generate(State(state): State<AppState>, body: Bytes) -> Response {
    let (session_id, request) = match parse_body::<GenerateBody>(&body) {
        Ok(b) => (b.session_id.clone().unwrap_or_default(), b.into_request()),
        Err(e) => (String::new(), Err(e)),
    };

    let response = match request {
        Ok(request) => state.orchestrator.generate_response(&request).await,
        Err(e) => {
            tracing::warn!(error = %e, "rejected generate request");
            TurnResponse::failure(session_id, &e)
        }
    };

    let status = match response.code {
        None => StatusCode::OK,
        Some(code) => status_for_code(code),
    };
    (status, Json(response)).into_response()
}

// ============ Conversation ============

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    limit: i64,
}

fn default_history_limit() -> i64 {
    100
}

/// Stored history of a session, oldest first.
async fn handle_get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<Value>, AppError> {
    let history = state.store().get_history(&id, q.limit).await?;
    Ok(Json(json!({
        "success": true,
        "session_id": id,
        "count": history.len(),
        "history": history,
    })))
}

/// Deactivate a session and drop its messages.
async fn handle_clear_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    let result = state
        .store()
        .deactivate_session(&id)
        .await
        .map(|()| json!({ "message": format!("Session {} cleared", id) }));
    mutation_result("clear_conversation", result)
}

// ============ Admin ============

#[derive(Debug, Deserialize)]
struct AdminListQuery {
    #[serde(default = "default_active_only")]
    active_only: bool,
    #[serde(default = "default_history_limit")]
    limit: i64,
}

fn default_active_only() -> bool {
    true
}

/// Sessions with raw fields, optionally including inactive ones.
async fn handle_admin_list_sessions(
    State(state): State<AppState>,
    Query(q): Query<AdminListQuery>,
) -> Result<Json<Value>, AppError> {
    let sessions = state.store().list_sessions(q.active_only, q.limit).await?;
    Ok(Json(json!({
        "success": true,
        "count": sessions.len(),
        "sessions": sessions,
    })))
}

/// One active session.
async fn handle_admin_get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let session = state
        .store()
        .get_session(&id)
        .await?
        .ok_or_else(|| TetherError::not_found(format!("session {}", id)))?;
    Ok(Json(json!({ "success": true, "session": session })))
}

/// Hard delete a session and everything under it.
async fn handle_admin_delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    let result = state
        .store()
        .delete_session(&id)
        .await
        .map(|()| json!({ "message": format!("Session {} permanently deleted", id) }));
    mutation_result("delete_session", result)
}

/// Aggregate store counts.
async fn handle_admin_stats(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let stats = state.store().get_stats().await?;
    Ok(Json(json!({ "success": true, "stats": stats })))
}

// ============ Checklists ============

/// Accepts either a bare item array or `{"items": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChecklistPayload {
    Bare(Vec<NewChecklistItem>),
    Wrapped { items: Vec<NewChecklistItem> },
}

impl Default for ChecklistPayload {
    fn default() -> Self {
        ChecklistPayload::Bare(Vec::new())
    }
}

impl ChecklistPayload {
    fn into_items(self) -> Vec<NewChecklistItem> {
        match self {
            ChecklistPayload::Bare(items) | ChecklistPayload::Wrapped { items } => items,
        }
    }
}

/// Replace the checklist attached to an assistant message.
async fn handle_save_checklist(
    State(state): State<AppState>,
    Path((session_id, message_id)): Path<(String, i64)>,
    body: Bytes,
) -> Response {
    let result = match parse_body::<ChecklistPayload>(&body) {
        Ok(payload) => state
            .store()
            .save_checklist(&session_id, message_id, &payload.into_items())
            .await
            .map(|saved| json!({ "items": saved })),
        Err(e) => Err(e),
    };
    mutation_result("save_checklist", result)
}

/// Checklist items of a message in position order.
async fn handle_get_checklist(
    State(state): State<AppState>,
    Path((session_id, message_id)): Path<(String, i64)>,
) -> Result<Json<Value>, AppError> {
    let items = state.store().get_checklist(&session_id, message_id).await?;
    Ok(Json(json!({ "success": true, "items": items })))
}

/// Delete every item of a message's checklist.
async fn handle_delete_checklist(
    State(state): State<AppState>,
    Path((session_id, message_id)): Path<(String, i64)>,
) -> Response {
    let result = state
        .store()
        .delete_checklist(&session_id, message_id)
        .await
        .map(|deleted| json!({ "deleted": deleted }));
    mutation_result("delete_checklist", result)
}

#[derive(Debug, Default, Deserialize)]
struct UpdateItemBody {
    #[serde(default, alias = "isCompleted")]
    is_completed: Option<bool>,
}

/// Set the completion flag of one checklist item.
async fn handle_update_item(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
    body: Bytes,
) -> Response {
    mutation_result("update_checklist_item", update_item(&state, item_id, &body).await)
}

/// Accepts `isCompleted` or `is_completed`.
async fn update_item(state: &AppState, item_id: i64, body: &Bytes) -> Result<Value, TetherError> {
    let body: UpdateItemBody = parse_body(body)?;
    let completed = body
        .is_completed
        .ok_or_else(|| TetherError::validation("is_completed is required"))?;
    if !state.store().update_item_completion(item_id, completed).await? {
        return Err(TetherError::not_found(format!("checklist item {}", item_id)));
    }
    Ok(json!({ "id": item_id, "isCompleted": completed }))
}
