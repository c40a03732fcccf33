use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{AgentClient, AgentRequest, ClientError};

/// Test client that pops responses from a queue and counts calls.
pub(crate) struct ScriptedClient {
    responses: Mutex<Vec<Result<String, ClientError>>>,
    pub(crate) requests: Mutex<Vec<AgentRequest>>,
    delay: Option<Duration>,
}

impl ScriptedClient {
    /// Responses are returned in the given order.
    pub(crate) fn new(mut responses: Vec<Result<String, ClientError>>) -> Self {
        responses.reverse();
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub(crate) fn ok(bodies: &[&str]) -> Self {
        Self::new(bodies.iter().map(|b| Ok(b.to_string())).collect())
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl AgentClient for ScriptedClient {
    async fn complete(&self, request: AgentRequest) -> Result<String, ClientError> {
        self.requests.lock().unwrap().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Err(ClientError::Network("script exhausted".to_string())))
    }

    fn provider(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-model"
    }
}
