//! Agent client for the Anthropic Messages API.

use async_trait::async_trait;

use super::{AgentClient, AgentRequest, ClientError};

/// Calls the Anthropic Messages API over `ureq`.
///
/// Reads the API key from the `ANTHROPIC_API_KEY` environment variable.
pub struct AnthropicClient {
    /// API key for authentication.
    pub api_key: String,
    /// Base URL (default: https://api.anthropic.com).
    pub base_url: String,
    pub model: String,
}

impl AnthropicClient {
    /// Create a client from the ANTHROPIC_API_KEY environment variable.
    pub fn from_env(model: impl Into<String>) -> Result<Self, ClientError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| {
            ClientError::Unavailable("ANTHROPIC_API_KEY environment variable not set".to_string())
        })?;
        Ok(Self::new(api_key, model))
    }

    pub fn new(api_key: String, model: impl Into<String>) -> Self {
        Self {
            api_key,
            base_url: "https://api.anthropic.com".to_string(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl AgentClient for AnthropicClient {
    async fn complete(&self, request: AgentRequest) -> Result<String, ClientError> {
        let api_key = self.api_key.clone();
        let url = format!("{}/v1/messages", self.base_url);

        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "system": request.system,
            "messages": [{"role": "user", "content": request.user}],
        });

        // ureq is blocking
        tokio::task::spawn_blocking(move || {
            let agent = ureq::Agent::new_with_defaults();
            let response = agent
                .post(&url)
                .header("x-api-key", &api_key)
                .header("anthropic-version", "2023-06-01")
                .header("content-type", "application/json")
                .send_json(body);

            match response {
                Ok(resp) => {
                    let json: serde_json::Value = resp.into_body().read_json().map_err(|e| {
                        ClientError::Response(format!("failed to parse Anthropic response: {}", e))
                    })?;
                    json["content"]
                        .as_array()
                        .and_then(|arr| arr.first())
                        .and_then(|c| c["text"].as_str())
                        .map(|s| s.to_string())
                        .ok_or_else(|| {
                            ClientError::Response("no text content in Anthropic response".to_string())
                        })
                }
                Err(ureq::Error::StatusCode(status)) => Err(ClientError::Api {
                    status,
                    message: "Anthropic API returned an error status".to_string(),
                }),
                Err(e) => Err(ClientError::Network(e.to_string())),
            }
        })
        .await
        .map_err(|e| ClientError::Network(format!("task join error: {}", e)))?
    }

    fn provider(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
