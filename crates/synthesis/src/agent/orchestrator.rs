//! Cached, validated invocation of one agent call.

use std::sync::Arc;
use std::time::Duration;

use leanflow_storage::{AgentRunRecord, AgentRunStatus, SynthesisStorage};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::prompt::Prompt;
use super::schema::validate_output;
use super::{strip_code_fences, AgentClient, AgentRequest, AgentType};
use crate::config::SynthesisConfig;
use crate::error::SynthesisError;
use crate::fingerprint::{compute_fingerprint, FingerprintCache};
use crate::{graph, new_id, now_rfc3339, sequencing};

/// Result of one orchestrated agent invocation.
///
/// Upstream failures are reported here with `success = false` rather than as
/// an `Err`; the failed run has already been recorded when this is returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRunOutcome {
    pub success: bool,
    /// True when served from a prior succeeded run without calling the agent.
    pub cached: bool,
    pub run_id: String,
    pub data: Option<Value>,
    pub error: Option<String>,
}

pub struct Orchestrator {
    client: Arc<dyn AgentClient>,
    max_tokens: u32,
    timeout: Duration,
}

impl Orchestrator {
    pub fn new(client: Arc<dyn AgentClient>, config: &SynthesisConfig) -> Self {
        Self {
            client,
            max_tokens: config.max_tokens,
            timeout: config.agent_timeout,
        }
    }

    /// Serve `agent_type` for `inputs` from cache or by calling the agent.
    ///
    /// Without `force_rerun`, a succeeded run with the same fingerprint is
    /// replayed and no new run is written. Otherwise the agent is called
    /// once (no automatic retry) and exactly one run row is written,
    /// `succeeded` with the validated output or `failed` with the error.
    pub async fn run<S, F>(
        &self,
        storage: &S,
        session_id: &str,
        agent_type: AgentType,
        inputs: &Value,
        build_prompt: F,
        force_rerun: bool,
    ) -> Result<AgentRunOutcome, SynthesisError>
    where
        S: SynthesisStorage,
        F: FnOnce(&Value) -> Prompt,
    {
        storage.get_session(session_id).await?;
        let fingerprint = compute_fingerprint(agent_type, inputs);

        if !force_rerun {
            if let Some(hit) =
                FingerprintCache::lookup(storage, session_id, agent_type, &fingerprint).await?
            {
                tracing::debug!(
                    session_id,
                    agent_type = agent_type.as_str(),
                    run_id = %hit.id,
                    "agent cache hit"
                );
                return Ok(AgentRunOutcome {
                    success: true,
                    cached: true,
                    run_id: hit.id,
                    data: hit.output,
                    error: None,
                });
            }
        }

        let prompt = build_prompt(inputs);
        let request = AgentRequest {
            system: prompt.system,
            user: prompt.user,
            max_tokens: self.max_tokens,
        };

        let started_at = now_rfc3339();
        let result = self.call(agent_type, request).await;
        let completed_at = now_rfc3339();

        let (status, output, error) = match result {
            Ok(value) => (AgentRunStatus::Succeeded, Some(value), None),
            Err(message) => {
                tracing::warn!(
                    session_id,
                    agent_type = agent_type.as_str(),
                    error = %message,
                    "agent run failed"
                );
                (AgentRunStatus::Failed, None, Some(message))
            }
        };

        let record = AgentRunRecord {
            id: new_id(),
            session_id: session_id.to_string(),
            agent_type: agent_type.as_str().to_string(),
            input_fingerprint: fingerprint,
            status,
            provider: self.client.provider().to_string(),
            model: self.client.model().to_string(),
            output: output.clone(),
            error: error.clone(),
            started_at,
            completed_at,
        };
        let run_id = record.id.clone();

        let mut snapshot = storage.begin_snapshot().await?;
        storage.insert_agent_run(&mut snapshot, record).await?;
        storage.commit_snapshot(snapshot).await?;

        Ok(AgentRunOutcome {
            success: status == AgentRunStatus::Succeeded,
            cached: false,
            run_id,
            data: output,
            error,
        })
    }

    /// Call the agent under the configured timeout and validate the reply.
    async fn call(&self, agent_type: AgentType, request: AgentRequest) -> Result<Value, String> {
        let text = match tokio::time::timeout(self.timeout, self.client.complete(request)).await {
            Err(_) => {
                return Err(format!(
                    "agent call timed out after {}s",
                    self.timeout.as_secs_f64()
                ))
            }
            Ok(Err(e)) => return Err(e.to_string()),
            Ok(Ok(text)) => text,
        };

        let value: Value = serde_json::from_str(strip_code_fences(&text))
            .map_err(|e| format!("agent returned invalid JSON: {}", e))?;
        validate_output(agent_type, &value).map_err(|errors| {
            format!(
                "agent output failed {} schema validation: {}",
                agent_type,
                errors.join("; ")
            )
        })?;
        // Replies the pipeline cannot read count as failures, never cache hits.
        match agent_type {
            AgentType::Sequencing => {
                sequencing::parse_output(&value)?;
            }
            AgentType::Design => {
                graph::parse_design_output(&value)?;
            }
            AgentType::Synthesis | AgentType::Solutions => {}
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::prompt::build_prompt;
    use crate::agent::scripted::ScriptedClient;
    use crate::agent::ClientError;
    use leanflow_storage::{InMemoryStorage, SessionRecord};
    use serde_json::json;

    const THEMES: &str = r#"[{"title": "Approval delays", "waste_types": ["Waiting"]}]"#;

    async fn storage_with_session() -> InMemoryStorage {
        let storage = InMemoryStorage::new();
        let mut snap = storage.begin_snapshot().await.unwrap();
        storage
            .insert_session(
                &mut snap,
                SessionRecord {
                    id: "s1".into(),
                    name: "AP waste walk".into(),
                    process_id: None,
                    created_at: "2026-01-01T00:00:00Z".into(),
                },
            )
            .await
            .unwrap();
        storage.commit_snapshot(snap).await.unwrap();
        storage
    }

    fn orchestrator(client: ScriptedClient) -> (Orchestrator, Arc<ScriptedClient>) {
        let client = Arc::new(client);
        let orch = Orchestrator::new(client.clone(), &SynthesisConfig::default());
        (orch, client)
    }

    fn inputs() -> Value {
        json!({"observation_ids": ["o1", "o2"], "step_ids": ["a"]})
    }

    async fn run(
        orch: &Orchestrator,
        storage: &InMemoryStorage,
        inputs: &Value,
        force: bool,
    ) -> AgentRunOutcome {
        orch.run(
            storage,
            "s1",
            AgentType::Synthesis,
            inputs,
            |i| build_prompt(AgentType::Synthesis, i),
            force,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn second_identical_call_is_cached() {
        let storage = storage_with_session().await;
        let (orch, client) = orchestrator(ScriptedClient::ok(&[THEMES]));

        let first = run(&orch, &storage, &inputs(), false).await;
        assert!(first.success && !first.cached);

        let reordered = json!({"step_ids": ["a"], "observation_ids": ["o2", "o1"]});
        let second = run(&orch, &storage, &reordered, false).await;
        assert!(second.success && second.cached);
        assert_eq!(second.run_id, first.run_id);
        assert_eq!(second.data, first.data);

        assert_eq!(client.calls(), 1);
        let runs = storage.list_agent_runs("s1").await.unwrap();
        assert_eq!(runs.len(), 1);
    }

    #[tokio::test]
    async fn force_rerun_bypasses_cache() {
        let storage = storage_with_session().await;
        let (orch, client) = orchestrator(ScriptedClient::ok(&[THEMES, THEMES]));

        run(&orch, &storage, &inputs(), false).await;
        let forced = run(&orch, &storage, &inputs(), true).await;
        assert!(!forced.cached);
        assert_eq!(client.calls(), 2);
        assert_eq!(storage.list_agent_runs("s1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn upstream_failure_is_recorded_and_not_cached() {
        let storage = storage_with_session().await;
        let (orch, client) = orchestrator(ScriptedClient::new(vec![
            Err(ClientError::Api {
                status: 529,
                message: "overloaded".into(),
            }),
            Ok(THEMES.to_string()),
        ]));

        let failed = run(&orch, &storage, &inputs(), false).await;
        assert!(!failed.success);
        assert!(failed.error.as_deref().unwrap().contains("overloaded"));

        let retried = run(&orch, &storage, &inputs(), false).await;
        assert!(retried.success && !retried.cached);
        assert_eq!(client.calls(), 2);

        let runs = storage.list_agent_runs("s1").await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].status, AgentRunStatus::Failed);
        assert_eq!(runs[0].output, None);
        assert_eq!(runs[1].status, AgentRunStatus::Succeeded);
        assert_eq!(runs[1].provider, "scripted");
    }

    #[tokio::test]
    async fn schema_violation_fails_run() {
        let storage = storage_with_session().await;
        let (orch, _) = orchestrator(ScriptedClient::ok(&[r#"{"themes": []}"#]));
        let outcome = run(&orch, &storage, &inputs(), false).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("schema validation"));
    }

    #[tokio::test]
    async fn fenced_output_is_accepted() {
        let storage = storage_with_session().await;
        let fenced = format!("```json\n{}\n```", THEMES);
        let (orch, _) = orchestrator(ScriptedClient::ok(&[fenced.as_str()]));
        let outcome = run(&orch, &storage, &inputs(), false).await;
        assert!(outcome.success);
        assert_eq!(outcome.data.unwrap()[0]["title"], "Approval delays");
    }

    #[tokio::test]
    async fn timeout_is_a_failed_run() {
        let storage = storage_with_session().await;
        let client = Arc::new(ScriptedClient::ok(&[THEMES]).with_delay(Duration::from_secs(5)));
        let config = SynthesisConfig {
            agent_timeout: Duration::from_millis(20),
            ..SynthesisConfig::default()
        };
        let orch = Orchestrator::new(client, &config);
        let outcome = run(&orch, &storage, &inputs(), false).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("timed out"));
        let runs = storage.list_agent_runs("s1").await.unwrap();
        assert_eq!(runs[0].status, AgentRunStatus::Failed);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let storage = InMemoryStorage::new();
        let (orch, client) = orchestrator(ScriptedClient::ok(&[THEMES]));
        let err = orch
            .run(
                &storage,
                "missing",
                AgentType::Synthesis,
                &inputs(),
                |i| build_prompt(AgentType::Synthesis, i),
                false,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn max_tokens_comes_from_config() {
        let storage = storage_with_session().await;
        let client = Arc::new(ScriptedClient::ok(&[THEMES]));
        let config = SynthesisConfig {
            max_tokens: 777,
            ..SynthesisConfig::default()
        };
        let orch = Orchestrator::new(client.clone(), &config);
        run(&orch, &storage, &inputs(), false).await;
        assert_eq!(client.requests.lock().unwrap()[0].max_tokens, 777);
    }
}
