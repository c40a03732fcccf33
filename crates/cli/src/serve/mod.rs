//! `leanflow serve` -- HTTP JSON API over the synthesis pipeline.
//!
//! Security features:
//! - CORS headers on all responses (permissive for local dev)
//! - Per-user quota on agent endpoints, keyed by the `X-User-Id` header
//! - Optional API key authentication via LEANFLOW_API_KEY env var
//!
//! Endpoints:
//! - GET    /health                                        - Server status (exempt from auth)
//! - POST   /sessions/{id}/design                          - Run the designer, persist a version
//! - POST   /sessions/{id}/sequencing                      - Run the sequencer, rebuild the plan
//! - GET    /sessions/{id}/plan                            - Waves, items and dependencies
//! - GET    /sessions/{id}/future-states                   - Versions of a session
//! - POST   /sessions/{id}/flows                           - Record an information flow
//! - POST   /sessions/{id}/future-states/{fs}/comparison   - Regenerate a comparison
//! - GET    /sessions/{id}/future-states/{fs}/comparison   - Stored comparison
//! - GET    /future-states/{id}                            - Graph with nodes and edges
//! - POST   /future-states/{id}/status                     - Lock or unlock a version
//! - POST   /future-states/{id}/edges                      - Create an edge
//! - PATCH  /nodes/{id}                                    - Revision-checked node update
//! - PATCH  /edges/{id}                                    - Relabel or reorder an edge
//! - DELETE /edges/{id}                                    - Delete an edge
//! - PATCH  /items/{id}                                    - Move an item between waves
//!
//! All responses use Content-Type: application/json.

mod handlers;
mod middleware;
mod seed;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{middleware as axum_middleware, Json, Router};
use leanflow_storage::{InMemoryStorage, SynthesisStorage};
use leanflow_storage_sqlite::SqliteStorage;
use leanflow_synthesis::agent::UnavailableClient;
use leanflow_synthesis::{AgentClient, Pipeline, SynthesisConfig};
use tower_http::cors::{Any, CorsLayer};

use self::handlers::{
    handle_create_edge, handle_delete_edge, handle_generate_comparison, handle_get_comparison,
    handle_get_future_state, handle_get_plan, handle_health, handle_list_future_states,
    handle_move_item, handle_not_found, handle_record_flow, handle_run_design,
    handle_run_sequencing, handle_set_status, handle_update_edge, handle_update_node,
};
use self::middleware::auth_middleware;
use self::state::AppState;

/// Maximum request body size: 2 MB.
const MAX_BODY_SIZE: usize = 2 * 1024 * 1024;

/// Options resolved from flags, the config file and the environment.
pub(crate) struct ServeOptions {
    pub(crate) port: u16,
    pub(crate) database: Option<PathBuf>,
    pub(crate) seed: Option<PathBuf>,
    pub(crate) config: SynthesisConfig,
}

/// Construct a JSON error response with the given status code and message.
fn json_error(status: StatusCode, message: &str) -> impl IntoResponse {
    (status, Json(serde_json::json!({"error": message})))
}

/// Start the HTTP server on the configured port.
///
/// Storage is SQLite when a database path is given, otherwise in-memory.
/// If `LEANFLOW_API_KEY` is set, all endpoints except /health require auth.
pub(crate) async fn start_server(options: ServeOptions) -> Result<(), Box<dyn std::error::Error>> {
    match &options.database {
        Some(path) => {
            let storage = SqliteStorage::open(path)?;
            tracing::info!(database = %path.display(), "using SQLite storage");
            run(Arc::new(storage), options).await
        }
        None => {
            tracing::info!("using in-memory storage");
            run(Arc::new(InMemoryStorage::new()), options).await
        }
    }
}

async fn run<S: SynthesisStorage>(
    storage: Arc<S>,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(path) = &options.seed {
        let data = seed::read_seed(path)?;
        let summary = seed::load_seed(storage.as_ref(), data).await?;
        tracing::info!(
            seed = %path.display(),
            sessions = summary.sessions,
            future_states = summary.future_states,
            information_flows = summary.information_flows,
            "loaded seed data"
        );
    }

    let api_key = std::env::var("LEANFLOW_API_KEY")
        .ok()
        .filter(|k| !k.is_empty());
    if api_key.is_some() {
        tracing::info!("API key authentication enabled");
    }
    tracing::info!(
        model = %options.config.model,
        rate_limit = options.config.rate_limit,
        window_secs = options.config.rate_limit_window.as_secs(),
        "agent quota per user"
    );

    let client = agent_client(&options.config);
    let pipeline = Pipeline::new(storage, client, options.config);
    let state = Arc::new(AppState::new(pipeline, api_key));
    let app = router(state);

    let addr = format!("0.0.0.0:{}", options.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("leanflow listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shut down");
    Ok(())
}

/// The external generation client. Without one, agent endpoints answer 502.
#[cfg(feature = "anthropic")]
fn agent_client(config: &SynthesisConfig) -> Arc<dyn AgentClient> {
    use leanflow_synthesis::agent::anthropic::AnthropicClient;

    match AnthropicClient::from_env(config.model.clone()) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::warn!(error = %e, "agent endpoints disabled");
            Arc::new(UnavailableClient::new(e.to_string()))
        }
    }
}

#[cfg(not(feature = "anthropic"))]
fn agent_client(_config: &SynthesisConfig) -> Arc<dyn AgentClient> {
    tracing::warn!("built without the anthropic feature; agent endpoints disabled");
    Arc::new(UnavailableClient::new(
        "no agent client configured (build with --features anthropic)",
    ))
}

fn router<S: SynthesisStorage>(state: Arc<AppState<S>>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/sessions/{id}/design", post(handle_run_design::<S>))
        .route("/sessions/{id}/sequencing", post(handle_run_sequencing::<S>))
        .route("/sessions/{id}/plan", get(handle_get_plan::<S>))
        .route(
            "/sessions/{id}/future-states",
            get(handle_list_future_states::<S>),
        )
        .route("/sessions/{id}/flows", post(handle_record_flow::<S>))
        .route(
            "/sessions/{id}/future-states/{fs}/comparison",
            post(handle_generate_comparison::<S>).get(handle_get_comparison::<S>),
        )
        .route("/future-states/{id}", get(handle_get_future_state::<S>))
        .route("/future-states/{id}/status", post(handle_set_status::<S>))
        .route("/future-states/{id}/edges", post(handle_create_edge::<S>))
        .route("/nodes/{id}", patch(handle_update_node::<S>))
        .route(
            "/edges/{id}",
            patch(handle_update_edge::<S>).delete(handle_delete_edge::<S>),
        )
        .route("/items/{id}", patch(handle_move_item::<S>))
        .fallback(handle_not_found)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware::<S>,
        ))
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state)
}

/// Wait for a shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("received shutdown signal");
}
