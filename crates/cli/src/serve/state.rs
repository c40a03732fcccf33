//! Application state.

use leanflow_storage::SynthesisStorage;
use leanflow_synthesis::{Pipeline, QuotaLimiter};

/// Application state shared across request handlers.
pub(crate) struct AppState<S: SynthesisStorage> {
    /// Synthesis core bound to the selected storage backend.
    pub(crate) pipeline: Pipeline<S>,
    /// Per-user agent invocation quota.
    pub(crate) quota: QuotaLimiter,
    /// Optional API key for authentication. None = no auth required.
    pub(crate) api_key: Option<String>,
}

impl<S: SynthesisStorage> AppState<S> {
    pub(crate) fn new(pipeline: Pipeline<S>, api_key: Option<String>) -> Self {
        let config = pipeline.config();
        let quota = QuotaLimiter::new(config.rate_limit, config.rate_limit_window);
        Self {
            pipeline,
            quota,
            api_key,
        }
    }
}
