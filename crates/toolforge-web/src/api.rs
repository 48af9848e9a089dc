//! REST API route handlers.
//!
//! The catalog surface (CRUD, search, execution, bug state), the
//! non-streaming `POST /ask`, and the `/health` and `/config`
//! introspection endpoints.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;

use toolforge_agent::{AgentOutcome, AskOptions, HistoryTurn};
use toolforge_sandbox::ExecErrorKind;
use toolforge_store::{ListOptions, NewTool, StoreError, ToolPatch};

use crate::state::AppState;

/// Map a store error onto an HTTP response.
fn store_error(err: StoreError) -> (StatusCode, Json<Value>) {
    let status = match &err {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::NameConflict(_) => StatusCode::CONFLICT,
        StoreError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({"error": err.to_string()})))
}

// ---------------------------------------------------------------------------
// POST /ask
// ---------------------------------------------------------------------------

/// Request body for the non-streaming ask endpoint.
#[derive(Deserialize)]
pub struct AskBody {
    pub question: String,
    #[serde(default)]
    pub history: Vec<HistoryTurn>,
    #[serde(default)]
    pub options: AskOverrides,
}

/// Per-question budget overrides.
#[derive(Deserialize, Default)]
pub struct AskOverrides {
    pub iter_max: Option<u32>,
    pub t_max_secs: Option<u64>,
}

impl AskBody {
    fn into_options(self) -> (String, AskOptions) {
        let options = AskOptions {
            iter_max: self.options.iter_max,
            t_max: self.options.t_max_secs.map(Duration::from_secs),
            history: self.history,
        };
        (self.question, options)
    }
}

/// Run the full agent loop and return only the terminal payload. The
/// intermediate event stream is collected and discarded.
pub async fn ask(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AskBody>,
) -> (StatusCode, Json<Value>) {
    let (question, options) = body.into_options();
    let agent = state.agent.clone();

    let (tx, mut rx) = mpsc::channel(64);
    let handle = tokio::spawn(async move { agent.run(&question, options, tx).await });

    // Drain the stream so the agent never blocks on a full buffer.
    while rx.recv().await.is_some() {}

    let outcome = match handle.await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(error = %e, "agent task panicked");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "agent task failed"})),
            );
        }
    };

    let status = match &outcome {
        AgentOutcome::Error { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::OK,
    };
    let payload = serde_json::to_value(&outcome).unwrap_or_else(|_| json!({"error": "unserializable"}));
    (status, Json(payload))
}

// ---------------------------------------------------------------------------
// Catalog CRUD
// ---------------------------------------------------------------------------

/// Query parameters for `GET /tools`.
#[derive(Deserialize)]
pub struct ListParams {
    #[serde(default = "default_true")]
    pub active_only: bool,
    #[serde(default = "default_true")]
    pub exclude_bugged: bool,
    #[serde(default)]
    pub category: Option<String>,
}

fn default_true() -> bool {
    true
}

/// GET /tools — list the catalog.
pub async fn list_tools(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    let opts = ListOptions {
        active_only: params.active_only,
        exclude_bugged: params.exclude_bugged,
        category: params.category,
    };
    match state.store.list(opts).await {
        Ok(tools) => (StatusCode::OK, Json(json!(tools))),
        Err(e) => store_error(e),
    }
}

/// GET /tools/{id} — fetch by id.
pub async fn get_tool(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.get_by_id(&id).await {
        Ok(tool) => (StatusCode::OK, Json(json!(tool))),
        Err(e) => store_error(e),
    }
}

/// GET /tools/name/{name} — fetch by name.
pub async fn get_tool_by_name(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.store.get_by_name(&name).await {
        Ok(tool) => (StatusCode::OK, Json(json!(tool))),
        Err(e) => store_error(e),
    }
}

/// POST /tools — register a new tool.
pub async fn create_tool(
    State(state): State<Arc<AppState>>,
    Json(spec): Json<NewTool>,
) -> impl IntoResponse {
    match state.store.create(spec).await {
        Ok(tool) => (StatusCode::CREATED, Json(json!(tool))),
        Err(e) => store_error(e),
    }
}

/// PUT /tools/{id} — partial update.
pub async fn update_tool(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(patch): Json<ToolPatch>,
) -> impl IntoResponse {
    match state.store.update(&id, patch).await {
        Ok(tool) => (StatusCode::OK, Json(json!(tool))),
        Err(e) => store_error(e),
    }
}

/// DELETE /tools/{id} — idempotent hard delete.
pub async fn delete_tool(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.delete(&id).await {
        Ok(()) => (StatusCode::OK, Json(json!({"deleted": id}))),
        Err(e) => store_error(e),
    }
}

/// POST /tools/{id}/deactivate — mark inactive.
pub async fn deactivate_tool(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.deactivate(&id).await {
        Ok(tool) => (StatusCode::OK, Json(json!(tool))),
        Err(e) => store_error(e),
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Request body for `POST /tools/{id}/execute`.
#[derive(Deserialize)]
pub struct ExecuteBody {
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// POST /tools/{id}/execute — accounted execution.
///
/// Refusals map to 4xx; execution outcomes (success or failure) return 200
/// with a `success` flag, the way a tool-run report reads.
pub async fn execute_tool(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ExecuteBody>,
) -> (StatusCode, Json<Value>) {
    match state.executor.execute_accounted(&id, body.args).await {
        Ok(success) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "result": success.value,
                "stdout": success.stdout,
                "duration_ms": success.duration_ms,
            })),
        ),
        Err(e) => {
            let status = match e.kind {
                ExecErrorKind::NotFound => StatusCode::NOT_FOUND,
                ExecErrorKind::ToolBugged | ExecErrorKind::Inactive | ExecErrorKind::BadArguments => {
                    StatusCode::BAD_REQUEST
                }
                _ => StatusCode::OK,
            };
            (
                status,
                Json(json!({
                    "success": false,
                    "error": {"kind": e.kind.as_str(), "message": e.message},
                })),
            )
        }
    }
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// Query parameters for the search endpoints.
#[derive(Deserialize)]
pub struct SearchParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default = "default_true")]
    pub exclude_bugged: bool,
}

fn default_limit() -> usize {
    10
}

/// GET /tools/search/{query} — ranked search.
pub async fn search_tools(
    State(state): State<Arc<AppState>>,
    Path(query): Path<String>,
    Query(params): Query<SearchParams>,
) -> impl IntoResponse {
    match state
        .store
        .search(&query, params.limit, params.threshold, params.exclude_bugged)
        .await
    {
        Ok(hits) => {
            let results: Vec<Value> = hits
                .iter()
                .map(|h| json!({"tool": h.tool, "score": h.score}))
                .collect();
            (StatusCode::OK, Json(json!(results)))
        }
        Err(e) => store_error(e),
    }
}

/// GET /tools/search-debug/{query} — search with per-signal score
/// breakdowns, for offline weight tuning.
pub async fn search_tools_debug(
    State(state): State<Arc<AppState>>,
    Path(query): Path<String>,
    Query(params): Query<SearchParams>,
) -> impl IntoResponse {
    match state
        .store
        .search(&query, params.limit, params.threshold, params.exclude_bugged)
        .await
    {
        Ok(hits) => {
            let results: Vec<Value> = hits
                .iter()
                .map(|h| {
                    json!({
                        "name": h.tool.name,
                        "description": h.tool.description,
                        "score": h.score,
                        "breakdown": h.breakdown,
                    })
                })
                .collect();
            (StatusCode::OK, Json(json!({"query": query, "results": results})))
        }
        Err(e) => store_error(e),
    }
}

// ---------------------------------------------------------------------------
// Bug management
// ---------------------------------------------------------------------------

/// POST /tools/{id}/clear-bugs — reset bug state.
pub async fn clear_bugs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.clear_bugs(&id).await {
        Ok(tool) => (StatusCode::OK, Json(json!(tool))),
        Err(e) => store_error(e),
    }
}

/// GET /tools/bugged/list — all tools currently flagged bugged.
pub async fn list_bugged(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.store.list_bugged().await {
        Ok(tools) => (StatusCode::OK, Json(json!(tools))),
        Err(e) => store_error(e),
    }
}

// ---------------------------------------------------------------------------
// Introspection
// ---------------------------------------------------------------------------

/// GET /health — liveness plus per-component detail.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let database_ok = state
        .store
        .list(ListOptions {
            active_only: true,
            exclude_bugged: true,
            category: None,
        })
        .await
        .is_ok();

    let status = if database_ok { "ok" } else { "degraded" };
    Json(json!({
        "status": status,
        "components": {
            "database": if database_ok { "connected" } else { "unavailable" },
            "oracle": if state.has_credentials { "configured" } else { "not configured" },
        },
    }))
}

/// GET /config — effective non-secret configuration.
pub async fn config(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "bind_addr": state.config.bind_addr,
        "port": state.config.port,
        "search_threshold": state.store.search_threshold(),
        "oracle_configured": state.has_credentials,
    }))
}
