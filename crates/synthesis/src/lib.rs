//! Future-state synthesis pipeline.
//!
//! Turns accepted solutions and a current-state process into AI-assisted
//! artifacts: versioned future-state graphs, a wave-based implementation
//! plan, and current-vs-future information-flow comparisons. Every
//! component takes the storage handle explicitly; nothing here holds a
//! process-wide client.

pub mod agent;
pub mod comparison;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod graph;
pub mod pipeline;
pub mod quota;
pub mod sequencing;

#[cfg(test)]
mod testing;

pub use agent::{AgentClient, AgentRequest, AgentRunOutcome, AgentType, ClientError, Orchestrator};
pub use comparison::{compare_flows, FlowComparison, FlowInput};
pub use config::{ConfigError, SynthesisConfig};
pub use error::SynthesisError;
pub use fingerprint::{compute_fingerprint, FingerprintCache};
pub use pipeline::{DesignRunResult, Pipeline, SequencingRunResult};
pub use quota::QuotaLimiter;

/// New random record ID.
pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Current UTC time as an RFC 3339 string.
pub(crate) fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}
