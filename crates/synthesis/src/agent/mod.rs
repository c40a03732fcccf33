//! Agent invocation: the client trait, output schemas, prompts and the
//! caching orchestrator.

pub mod orchestrator;
pub mod prompt;
pub mod schema;

#[cfg(feature = "anthropic")]
pub mod anthropic;

#[cfg(test)]
pub(crate) mod scripted;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use orchestrator::{AgentRunOutcome, Orchestrator};
pub use prompt::Prompt;

/// The kinds of generative work the pipeline delegates to an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Synthesis,
    Solutions,
    Sequencing,
    Design,
}

impl AgentType {
    pub const ALL: [AgentType; 4] = [
        AgentType::Synthesis,
        AgentType::Solutions,
        AgentType::Sequencing,
        AgentType::Design,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Synthesis => "synthesis",
            AgentType::Solutions => "solutions",
            AgentType::Sequencing => "sequencing",
            AgentType::Design => "design",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One prompt-in, text-out call to the generation capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
}

/// Error type for agent client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Network or transport failure.
    #[error("agent network error: {0}")]
    Network(String),
    /// The provider answered with an error response.
    #[error("agent API error ({status}): {message}")]
    Api { status: u16, message: String },
    /// The provider answered but the body could not be read.
    #[error("agent response error: {0}")]
    Response(String),
    /// No generation capability is configured for this process.
    #[error("agent client unavailable: {0}")]
    Unavailable(String),
}

/// Trait for calling an external generation capability.
///
/// Implementations handle transport and provider specifics. Prompt
/// construction, output validation and caching live in the orchestrator.
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Send the request and return the raw text of the response.
    async fn complete(&self, request: AgentRequest) -> Result<String, ClientError>;

    /// Provider name recorded on each agent run.
    fn provider(&self) -> &str;

    /// Model identifier recorded on each agent run.
    fn model(&self) -> &str;
}

/// Client used when no provider is configured. Every call fails, which the
/// orchestrator records as a failed run.
pub struct UnavailableClient {
    reason: String,
}

impl UnavailableClient {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl AgentClient for UnavailableClient {
    async fn complete(&self, _request: AgentRequest) -> Result<String, ClientError> {
        Err(ClientError::Unavailable(self.reason.clone()))
    }

    fn provider(&self) -> &str {
        "none"
    }

    fn model(&self) -> &str {
        "none"
    }
}

/// Strip a surrounding Markdown code fence (```json ... ``` or ``` ... ```).
pub(crate) fn strip_code_fences(s: &str) -> &str {
    let trimmed = s.trim();
    if let Some(stripped) = trimmed.strip_prefix("```json") {
        if let Some(inner) = stripped.strip_suffix("```") {
            return inner.trim();
        }
    }
    if let Some(stripped) = trimmed.strip_prefix("```") {
        if let Some(inner) = stripped.strip_suffix("```") {
            return inner.trim();
        }
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_type_round_trips_through_name() {
        for t in AgentType::ALL {
            assert_eq!(AgentType::parse(t.as_str()), Some(t));
        }
        assert_eq!(AgentType::parse("planner"), None);
    }

    #[test]
    fn strips_json_fence() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fences("  {\"a\":1}  "), "{\"a\":1}");
    }

    #[tokio::test]
    async fn unavailable_client_always_fails() {
        let client = UnavailableClient::new("no provider");
        let err = client
            .complete(AgentRequest {
                system: String::new(),
                user: String::new(),
                max_tokens: 16,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no provider"));
    }
}
