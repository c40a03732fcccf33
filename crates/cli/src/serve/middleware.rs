//! HTTP middleware: API key authentication.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use leanflow_storage::SynthesisStorage;

use super::state::AppState;

/// API key authentication middleware.
///
/// If `LEANFLOW_API_KEY` is set, all requests (except /health) must include
/// either `Authorization: Bearer <key>` or `X-API-Key: <key>`.
pub(crate) async fn auth_middleware<S: SynthesisStorage>(
    State(state): State<Arc<AppState<S>>>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let expected_key = match &state.api_key {
        Some(k) => k,
        None => return next.run(request).await,
    };

    if request.uri().path() == "/health" {
        return next.run(request).await;
    }

    let presented = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer "))
        .or_else(|| {
            request
                .headers()
                .get("x-api-key")
                .and_then(|v| v.to_str().ok())
        });

    let rejection = match presented {
        Some(key) if key == expected_key => None,
        Some(_) => {
            tracing::warn!(path = %request.uri().path(), "rejected request with invalid API key");
            Some((StatusCode::FORBIDDEN, "invalid API key"))
        }
        None => Some((StatusCode::UNAUTHORIZED, "authentication required")),
    };

    match rejection {
        None => next.run(request).await,
        Some((status, message)) => super::json_error(status, message).into_response(),
    }
}
