//! HTTP route handlers for the synthesis API.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use leanflow_storage::{EdgeChanges, FutureStateStatus, NodeChanges, SynthesisStorage};
use leanflow_synthesis::{FlowInput, SynthesisError};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::json_error;
use super::state::AppState;

/// Header carrying the caller identity used for agent quotas.
const USER_ID_HEADER: &str = "x-user-id";

/// Map a synthesis error onto its HTTP status and JSON body.
fn error_response(err: SynthesisError) -> Response {
    let status = match &err {
        SynthesisError::Validation(_) => StatusCode::BAD_REQUEST,
        SynthesisError::NotFound(_) => StatusCode::NOT_FOUND,
        SynthesisError::Conflict(_) => StatusCode::CONFLICT,
        SynthesisError::Upstream(_) => StatusCode::BAD_GATEWAY,
        SynthesisError::RateLimited { retry_after_secs } => {
            let body = serde_json::json!({
                "error": "rate limit exceeded",
                "kind": err.kind(),
                "retry_after": retry_after_secs,
            });
            return (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        }
        SynthesisError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(error = %err, "request failed");
    }
    let body = serde_json::json!({
        "error": err.to_string(),
        "kind": err.kind(),
    });
    (status, Json(body)).into_response()
}

fn respond<T: serde::Serialize>(status: StatusCode, result: Result<T, SynthesisError>) -> Response {
    match result {
        Ok(value) => (status, Json(value)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Decode a request body into `T`, answering 400 on a shape mismatch.
fn parse_body<T: DeserializeOwned>(body: serde_json::Value) -> Result<T, Response> {
    serde_json::from_value(body).map_err(|e| {
        json_error(StatusCode::BAD_REQUEST, &format!("invalid request body: {}", e))
            .into_response()
    })
}

fn user_id(headers: &HeaderMap) -> Result<String, Response> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            json_error(StatusCode::BAD_REQUEST, "X-User-Id header is required").into_response()
        })
}

/// Fallback handler for unmatched routes.
pub(crate) async fn handle_not_found() -> impl IntoResponse {
    json_error(StatusCode::NOT_FOUND, "not found")
}

/// GET /health
pub(crate) async fn handle_health() -> impl IntoResponse {
    let response = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, Json(response))
}

// ── Agent runs ───────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RunParams {
    #[serde(default)]
    force_rerun: bool,
}

/// POST /sessions/{id}/design
pub(crate) async fn handle_run_design<S: SynthesisStorage>(
    State(state): State<Arc<AppState<S>>>,
    Path(session_id): Path<String>,
    Query(params): Query<RunParams>,
    headers: HeaderMap,
) -> Response {
    let user = match user_id(&headers) {
        Ok(u) => u,
        Err(r) => return r,
    };
    if let Err(e) = state.quota.check(&user).await {
        return error_response(e);
    }
    let result = state
        .pipeline
        .run_design_agent(&session_id, params.force_rerun)
        .await;
    respond(StatusCode::OK, result)
}

/// POST /sessions/{id}/sequencing
pub(crate) async fn handle_run_sequencing<S: SynthesisStorage>(
    State(state): State<Arc<AppState<S>>>,
    Path(session_id): Path<String>,
    Query(params): Query<RunParams>,
    headers: HeaderMap,
) -> Response {
    let user = match user_id(&headers) {
        Ok(u) => u,
        Err(r) => return r,
    };
    if let Err(e) = state.quota.check(&user).await {
        return error_response(e);
    }
    let result = state
        .pipeline
        .run_sequencing_agent(&session_id, params.force_rerun)
        .await;
    respond(StatusCode::OK, result)
}

// ── Implementation plan ──────────────────────────────────────────────────────

/// GET /sessions/{id}/plan
pub(crate) async fn handle_get_plan<S: SynthesisStorage>(
    State(state): State<Arc<AppState<S>>>,
    Path(session_id): Path<String>,
) -> Response {
    let result = state.pipeline.list_implementation_plan(&session_id).await;
    respond(StatusCode::OK, result)
}

#[derive(Debug, Deserialize)]
struct MoveItemRequest {
    wave_id: String,
    order_index: i64,
}

/// PATCH /items/{id}
pub(crate) async fn handle_move_item<S: SynthesisStorage>(
    State(state): State<Arc<AppState<S>>>,
    Path(item_id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let request: MoveItemRequest = match parse_body(body) {
        Ok(r) => r,
        Err(r) => return r,
    };
    let result = state
        .pipeline
        .move_implementation_item(&item_id, &request.wave_id, request.order_index)
        .await;
    respond(StatusCode::OK, result)
}

// ── Future states ────────────────────────────────────────────────────────────

/// GET /sessions/{id}/future-states
pub(crate) async fn handle_list_future_states<S: SynthesisStorage>(
    State(state): State<Arc<AppState<S>>>,
    Path(session_id): Path<String>,
) -> Response {
    let result = state
        .pipeline
        .list_future_states(&session_id)
        .await
        .map(|future_states| serde_json::json!({ "future_states": future_states }));
    respond(StatusCode::OK, result)
}

/// GET /future-states/{id}
pub(crate) async fn handle_get_future_state<S: SynthesisStorage>(
    State(state): State<Arc<AppState<S>>>,
    Path(future_state_id): Path<String>,
) -> Response {
    let result = state.pipeline.get_future_state_graph(&future_state_id).await;
    respond(StatusCode::OK, result)
}

#[derive(Debug, Deserialize)]
struct StatusRequest {
    status: FutureStateStatus,
}

/// POST /future-states/{id}/status
pub(crate) async fn handle_set_status<S: SynthesisStorage>(
    State(state): State<Arc<AppState<S>>>,
    Path(future_state_id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let request: StatusRequest = match parse_body(body) {
        Ok(r) => r,
        Err(r) => return r,
    };
    let result = state
        .pipeline
        .set_future_state_status(&future_state_id, request.status)
        .await;
    respond(StatusCode::OK, result)
}

#[derive(Debug, Deserialize)]
struct NodeUpdateRequest {
    /// Revision the client last read; omitted means "whatever is current".
    #[serde(default)]
    expected_revision: Option<i64>,
    #[serde(flatten)]
    changes: NodeChanges,
}

/// PATCH /nodes/{id}
pub(crate) async fn handle_update_node<S: SynthesisStorage>(
    State(state): State<Arc<AppState<S>>>,
    Path(node_id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let request: NodeUpdateRequest = match parse_body(body) {
        Ok(r) => r,
        Err(r) => return r,
    };
    let result = state
        .pipeline
        .update_future_state_node(&node_id, &request.changes, request.expected_revision)
        .await;
    respond(StatusCode::OK, result)
}

#[derive(Debug, Deserialize)]
struct CreateEdgeRequest {
    source_node_id: String,
    target_node_id: String,
    #[serde(default)]
    label: Option<String>,
}

/// POST /future-states/{id}/edges
pub(crate) async fn handle_create_edge<S: SynthesisStorage>(
    State(state): State<Arc<AppState<S>>>,
    Path(future_state_id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let request: CreateEdgeRequest = match parse_body(body) {
        Ok(r) => r,
        Err(r) => return r,
    };
    let result = state
        .pipeline
        .create_edge(
            &future_state_id,
            &request.source_node_id,
            &request.target_node_id,
            request.label,
        )
        .await;
    respond(StatusCode::CREATED, result)
}

/// PATCH /edges/{id}
pub(crate) async fn handle_update_edge<S: SynthesisStorage>(
    State(state): State<Arc<AppState<S>>>,
    Path(edge_id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let changes: EdgeChanges = match parse_body(body) {
        Ok(c) => c,
        Err(r) => return r,
    };
    let result = state.pipeline.update_edge(&edge_id, &changes).await;
    respond(StatusCode::OK, result)
}

/// DELETE /edges/{id}
pub(crate) async fn handle_delete_edge<S: SynthesisStorage>(
    State(state): State<Arc<AppState<S>>>,
    Path(edge_id): Path<String>,
) -> Response {
    match state.pipeline.delete_edge(&edge_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

// ── Information flows and comparisons ────────────────────────────────────────

/// POST /sessions/{id}/flows
pub(crate) async fn handle_record_flow<S: SynthesisStorage>(
    State(state): State<Arc<AppState<S>>>,
    Path(session_id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let input: FlowInput = match parse_body(body) {
        Ok(i) => i,
        Err(r) => return r,
    };
    let result = state
        .pipeline
        .record_information_flow(&session_id, input)
        .await;
    respond(StatusCode::CREATED, result)
}

/// POST /sessions/{id}/future-states/{fs}/comparison
pub(crate) async fn handle_generate_comparison<S: SynthesisStorage>(
    State(state): State<Arc<AppState<S>>>,
    Path((session_id, future_state_id)): Path<(String, String)>,
) -> Response {
    let result = state
        .pipeline
        .generate_flow_comparison(&session_id, &future_state_id)
        .await;
    respond(StatusCode::OK, result)
}

/// GET /sessions/{id}/future-states/{fs}/comparison
pub(crate) async fn handle_get_comparison<S: SynthesisStorage>(
    State(state): State<Arc<AppState<S>>>,
    Path((session_id, future_state_id)): Path<(String, String)>,
) -> Response {
    let result = state
        .pipeline
        .get_flow_comparison(&session_id, &future_state_id)
        .await;
    respond(StatusCode::OK, result)
}
