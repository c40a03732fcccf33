//! Entry points used by the HTTP boundary.

use std::collections::BTreeSet;
use std::sync::Arc;

use leanflow_storage::{
    EdgeChanges, FlowComparisonRecord, FutureStateEdgeRecord, FutureStateNodeRecord,
    FutureStateRecord, FutureStateStatus, ImplementationItemRecord, InformationFlowRecord,
    NodeChanges, SolutionStatus, SynthesisStorage,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::agent::prompt::build_prompt;
use crate::agent::{AgentClient, AgentType, Orchestrator};
use crate::comparison::{self, FlowInput};
use crate::config::SynthesisConfig;
use crate::error::SynthesisError;
use crate::graph::{self, CreatedEdge, FutureStateGraph, PersistedFutureState};
use crate::sequencing::{self, ImplementationPlan, RebuildSummary};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignRunResult {
    /// The version produced by this run, or for a cached run the version
    /// its original run produced.
    pub future_state_id: Option<String>,
    pub run_id: String,
    pub cached: bool,
    pub data: Option<Value>,
    /// Present only when this call persisted a new version.
    pub persisted: Option<PersistedFutureState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencingRunResult {
    pub run_id: String,
    pub cached: bool,
    pub data: Option<Value>,
    pub rebuild: RebuildSummary,
}

/// The synthesis core bound to one storage backend and one agent client.
pub struct Pipeline<S: SynthesisStorage> {
    storage: Arc<S>,
    orchestrator: Orchestrator,
    config: SynthesisConfig,
}

impl<S: SynthesisStorage> Pipeline<S> {
    pub fn new(storage: Arc<S>, client: Arc<dyn AgentClient>, config: SynthesisConfig) -> Self {
        let orchestrator = Orchestrator::new(client, &config);
        Self {
            storage,
            orchestrator,
            config,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn config(&self) -> &SynthesisConfig {
        &self.config
    }

    async fn design_inputs(&self, session_id: &str) -> Result<Value, SynthesisError> {
        let storage = self.storage.as_ref();
        storage.get_session(session_id).await?;
        let steps = storage.list_process_steps(session_id).await?;
        if steps.is_empty() {
            return Err(SynthesisError::Validation(format!(
                "session {} has no process steps to redesign",
                session_id
            )));
        }
        let connections = storage.list_process_connections(session_id).await?;
        let accepted = storage
            .list_solutions(session_id, Some(SolutionStatus::Accepted))
            .await?;
        let lanes: BTreeSet<&str> = steps.iter().map(|s| s.lane.as_str()).collect();

        Ok(json!({
            "lanes": lanes,
            "accepted_solution_ids": accepted.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            "step_ids": steps.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            "steps": steps,
            "connections": connections,
            "solutions": accepted
                .iter()
                .map(|s| json!({
                    "id": s.id,
                    "title": s.title,
                    "bucket": s.bucket,
                    "description": s.description,
                    "affected_step_ids": s.affected_step_ids,
                }))
                .collect::<Vec<_>>(),
        }))
    }

    /// Run the designer and persist its output as a new future-state
    /// version. A cached run persists nothing unless its output never made
    /// it into a future state.
    pub async fn run_design_agent(
        &self,
        session_id: &str,
        force_rerun: bool,
    ) -> Result<DesignRunResult, SynthesisError> {
        let storage = self.storage.as_ref();
        let inputs = self.design_inputs(session_id).await?;
        let outcome = self
            .orchestrator
            .run(
                storage,
                session_id,
                AgentType::Design,
                &inputs,
                |i| build_prompt(AgentType::Design, i),
                force_rerun,
            )
            .await?;

        if !outcome.success {
            return Err(SynthesisError::Upstream(
                outcome
                    .error
                    .unwrap_or_else(|| "design agent failed".to_string()),
            ));
        }
        let data = outcome.data.unwrap_or(Value::Null);

        if outcome.cached {
            let existing = storage
                .list_future_states(session_id)
                .await?
                .into_iter()
                .find(|fs| fs.agent_run_id.as_deref() == Some(outcome.run_id.as_str()));
            if let Some(fs) = existing {
                return Ok(DesignRunResult {
                    future_state_id: Some(fs.id),
                    run_id: outcome.run_id,
                    cached: true,
                    data: Some(data),
                    persisted: None,
                });
            }
            tracing::info!(
                run_id = %outcome.run_id,
                "cached design run has no future state, persisting it"
            );
        }

        let persisted =
            graph::persist_design_output(storage, session_id, Some(&outcome.run_id), &data)
                .await?;
        Ok(DesignRunResult {
            future_state_id: Some(persisted.future_state_id.clone()),
            run_id: outcome.run_id,
            cached: outcome.cached,
            data: Some(data),
            persisted: Some(persisted),
        })
    }

    /// Run the sequencing agent and rebuild the implementation plan, also
    /// when the outcome came from cache.
    pub async fn run_sequencing_agent(
        &self,
        session_id: &str,
        force_rerun: bool,
    ) -> Result<SequencingRunResult, SynthesisError> {
        let storage = self.storage.as_ref();
        let (inputs, accepted) = sequencing::sequencing_inputs(storage, session_id).await?;
        let outcome = self
            .orchestrator
            .run(
                storage,
                session_id,
                AgentType::Sequencing,
                &inputs,
                |i| build_prompt(AgentType::Sequencing, i),
                force_rerun,
            )
            .await?;

        if !outcome.success {
            return Err(SynthesisError::Upstream(
                outcome
                    .error
                    .unwrap_or_else(|| "sequencing agent failed".to_string()),
            ));
        }
        let data = outcome.data.unwrap_or(Value::Null);
        let rebuild = sequencing::rebuild_plan(storage, session_id, &data, &accepted).await?;

        Ok(SequencingRunResult {
            run_id: outcome.run_id,
            cached: outcome.cached,
            data: Some(data),
            rebuild,
        })
    }

    pub async fn update_future_state_node(
        &self,
        node_id: &str,
        changes: &NodeChanges,
        expected_revision: Option<i64>,
    ) -> Result<FutureStateNodeRecord, SynthesisError> {
        graph::update_node(self.storage.as_ref(), node_id, changes, expected_revision).await
    }

    pub async fn create_edge(
        &self,
        future_state_id: &str,
        source_node_id: &str,
        target_node_id: &str,
        label: Option<String>,
    ) -> Result<CreatedEdge, SynthesisError> {
        graph::create_edge(
            self.storage.as_ref(),
            future_state_id,
            source_node_id,
            target_node_id,
            label,
        )
        .await
    }

    pub async fn update_edge(
        &self,
        edge_id: &str,
        changes: &EdgeChanges,
    ) -> Result<FutureStateEdgeRecord, SynthesisError> {
        graph::update_edge(self.storage.as_ref(), edge_id, changes).await
    }

    pub async fn delete_edge(&self, edge_id: &str) -> Result<(), SynthesisError> {
        graph::delete_edge(self.storage.as_ref(), edge_id).await
    }

    pub async fn set_future_state_status(
        &self,
        future_state_id: &str,
        status: FutureStateStatus,
    ) -> Result<FutureStateRecord, SynthesisError> {
        graph::set_future_state_status(self.storage.as_ref(), future_state_id, status).await
    }

    pub async fn get_future_state_graph(
        &self,
        future_state_id: &str,
    ) -> Result<FutureStateGraph, SynthesisError> {
        graph::get_future_state_graph(self.storage.as_ref(), future_state_id).await
    }

    pub async fn list_future_states(
        &self,
        session_id: &str,
    ) -> Result<Vec<FutureStateRecord>, SynthesisError> {
        graph::list_future_states(self.storage.as_ref(), session_id).await
    }

    pub async fn generate_flow_comparison(
        &self,
        session_id: &str,
        future_state_id: &str,
    ) -> Result<FlowComparisonRecord, SynthesisError> {
        comparison::generate_flow_comparison(self.storage.as_ref(), session_id, future_state_id)
            .await
    }

    pub async fn get_flow_comparison(
        &self,
        session_id: &str,
        future_state_id: &str,
    ) -> Result<FlowComparisonRecord, SynthesisError> {
        comparison::get_flow_comparison(self.storage.as_ref(), session_id, future_state_id).await
    }

    pub async fn record_information_flow(
        &self,
        session_id: &str,
        input: FlowInput,
    ) -> Result<InformationFlowRecord, SynthesisError> {
        comparison::record_information_flow(self.storage.as_ref(), session_id, input).await
    }

    pub async fn move_implementation_item(
        &self,
        item_id: &str,
        wave_id: &str,
        order_index: i64,
    ) -> Result<ImplementationItemRecord, SynthesisError> {
        sequencing::move_item(self.storage.as_ref(), item_id, wave_id, order_index).await
    }

    pub async fn list_implementation_plan(
        &self,
        session_id: &str,
    ) -> Result<ImplementationPlan, SynthesisError> {
        sequencing::list_plan(self.storage.as_ref(), session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::scripted::ScriptedClient;
    use crate::agent::ClientError;
    use crate::fingerprint::compute_fingerprint;
    use crate::testing::{seeded_storage, SESSION};
    use leanflow_storage::{AgentRunRecord, AgentRunStatus, InMemoryStorage};
    use leanflow_storage_sqlite::SqliteStorage;

    const DESIGN: &str = r#"{
        "future_state": {
            "name": "Touchless AP",
            "nodes": [
                {"name": "Receive invoice", "lane": "AP", "action": "unchanged", "step_id": "step-1"},
                {"name": "Auto-match", "lane": "AP", "action": "create", "solution_id": "sol-1"},
                {"name": "Approve", "lane": "Finance", "action": "modify", "step_id": "step-3"}
            ],
            "edges": [
                {"source_node_index": 0, "target_node_index": 1},
                {"source_node_index": 1, "target_node_index": 2}
            ]
        }
    }"#;

    const PLAN: &str = r#"{
        "waves": [
            {"name": "0-3 months", "solution_ids": ["sol-1"]},
            {"name": "3-6 months", "solution_ids": ["sol-2"]}
        ],
        "dependencies": [{"solution_id": "sol-2", "depends_on_solution_id": "sol-1"}]
    }"#;

    fn pipeline(
        storage: InMemoryStorage,
        client: ScriptedClient,
    ) -> (Pipeline<InMemoryStorage>, Arc<ScriptedClient>) {
        let client = Arc::new(client);
        let pipeline = Pipeline::new(
            Arc::new(storage),
            client.clone(),
            SynthesisConfig::default(),
        );
        (pipeline, client)
    }

    #[tokio::test]
    async fn design_run_persists_version_and_cache_replays_it() {
        let (pipeline, client) = pipeline(seeded_storage().await, ScriptedClient::ok(&[DESIGN]));

        let first = pipeline.run_design_agent(SESSION, false).await.unwrap();
        assert!(!first.cached);
        let persisted = first.persisted.unwrap();
        assert_eq!((persisted.version, persisted.node_count, persisted.edge_count), (1, 3, 2));

        let second = pipeline.run_design_agent(SESSION, false).await.unwrap();
        assert!(second.cached);
        assert!(second.persisted.is_none());
        assert_eq!(second.future_state_id, first.future_state_id);
        assert_eq!(client.calls(), 1);

        let states = pipeline.list_future_states(SESSION).await.unwrap();
        assert_eq!(states.len(), 1);
        let succeeded = pipeline
            .storage()
            .list_agent_runs(SESSION)
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.status == AgentRunStatus::Succeeded)
            .count();
        assert_eq!(succeeded, 1);
    }

    #[tokio::test]
    async fn forced_design_reruns_create_new_versions() {
        let (pipeline, _) =
            pipeline(seeded_storage().await, ScriptedClient::ok(&[DESIGN, DESIGN, DESIGN]));
        let mut versions = Vec::new();
        for _ in 0..3 {
            let run = pipeline.run_design_agent(SESSION, true).await.unwrap();
            versions.push(run.persisted.unwrap().version);
        }
        assert_eq!(versions, vec![1, 2, 3]);

        let names: Vec<String> = pipeline
            .list_future_states(SESSION)
            .await
            .unwrap()
            .into_iter()
            .map(|fs| fs.name)
            .collect();
        assert_eq!(names, vec!["Touchless AP v1", "Touchless AP v2", "Touchless AP v3"]);
    }

    #[tokio::test]
    async fn failed_design_run_is_upstream_error() {
        let (pipeline, _) = pipeline(
            seeded_storage().await,
            ScriptedClient::new(vec![Err(ClientError::Network("connection reset".into()))]),
        );
        let err = pipeline.run_design_agent(SESSION, false).await.unwrap_err();
        assert_eq!(err.kind(), "upstream");
        assert!(pipeline.list_future_states(SESSION).await.unwrap().is_empty());
        let runs = pipeline.storage().list_agent_runs(SESSION).await.unwrap();
        assert_eq!(runs[0].status, AgentRunStatus::Failed);
    }

    #[tokio::test]
    async fn cached_design_run_without_version_is_persisted() {
        let (pipeline, client) = pipeline(seeded_storage().await, ScriptedClient::ok(&[]));
        let inputs = pipeline.design_inputs(SESSION).await.unwrap();
        let storage = pipeline.storage();
        let mut snap = storage.begin_snapshot().await.unwrap();
        storage
            .insert_agent_run(
                &mut snap,
                AgentRunRecord {
                    id: "run-orphan".into(),
                    session_id: SESSION.into(),
                    agent_type: "design".into(),
                    input_fingerprint: compute_fingerprint(AgentType::Design, &inputs),
                    status: AgentRunStatus::Succeeded,
                    provider: "scripted".into(),
                    model: "scripted".into(),
                    output: Some(serde_json::from_str(DESIGN).unwrap()),
                    error: None,
                    started_at: "2026-01-01T00:00:00Z".into(),
                    completed_at: "2026-01-01T00:00:01Z".into(),
                },
            )
            .await
            .unwrap();
        storage.commit_snapshot(snap).await.unwrap();

        let run = pipeline.run_design_agent(SESSION, false).await.unwrap();
        assert!(run.cached);
        assert_eq!(run.run_id, "run-orphan");
        assert_eq!(run.persisted.unwrap().node_count, 3);
        assert_eq!(client.calls(), 0);

        let states = pipeline.list_future_states(SESSION).await.unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].agent_run_id.as_deref(), Some("run-orphan"));
        assert_eq!(run.future_state_id.as_deref(), Some(states[0].id.as_str()));

        let again = pipeline.run_design_agent(SESSION, false).await.unwrap();
        assert!(again.persisted.is_none());
        assert_eq!(again.future_state_id, run.future_state_id);
    }

    #[tokio::test]
    async fn unreadable_sequencing_reply_is_failed_run_not_cache_entry() {
        // 1.0 passes the schema's integer check but not the typed plan.
        let float_index = r#"{
            "waves": [{"name": "0-3 months", "order_index": 1.0, "solution_ids": ["sol-1"]}],
            "dependencies": []
        }"#;
        let (pipeline, client) =
            pipeline(seeded_storage().await, ScriptedClient::ok(&[float_index, PLAN]));

        let err = pipeline.run_sequencing_agent(SESSION, false).await.unwrap_err();
        assert_eq!(err.kind(), "upstream");
        assert!(err.to_string().contains("malformed sequencing output"));
        let runs = pipeline.storage().list_agent_runs(SESSION).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, AgentRunStatus::Failed);

        let retry = pipeline.run_sequencing_agent(SESSION, false).await.unwrap();
        assert!(!retry.cached);
        assert_eq!(retry.rebuild.items, 2);
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn design_inputs_collect_lanes_and_accepted_solutions() {
        let (pipeline, _) = pipeline(seeded_storage().await, ScriptedClient::ok(&[]));
        let inputs = pipeline.design_inputs(SESSION).await.unwrap();
        assert_eq!(inputs["lanes"], json!(["AP", "Finance"]));
        assert_eq!(inputs["accepted_solution_ids"], json!(["sol-1", "sol-2"]));
    }

    #[tokio::test]
    async fn sequencing_rerun_restores_agent_plan() {
        let (pipeline, client) = pipeline(seeded_storage().await, ScriptedClient::ok(&[PLAN]));

        let first = pipeline.run_sequencing_agent(SESSION, false).await.unwrap();
        assert!(!first.cached);
        assert_eq!(first.rebuild.items, 2);

        let plan = pipeline.list_implementation_plan(SESSION).await.unwrap();
        let item = plan.waves[1].items[0].id.clone();
        let wave = plan.waves[0].wave.id.clone();
        pipeline.move_implementation_item(&item, &wave, 1).await.unwrap();

        let second = pipeline.run_sequencing_agent(SESSION, false).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.rebuild.cleared.items, 2);
        assert_eq!(client.calls(), 1);

        let rebuilt = pipeline.list_implementation_plan(SESSION).await.unwrap();
        assert_eq!(rebuilt.waves[0].items.len(), 1);
        assert_eq!(rebuilt.waves[0].items[0].solution_id, "sol-1");
        assert_eq!(rebuilt.waves[1].items[0].solution_id, "sol-2");
    }

    #[tokio::test]
    async fn edits_flow_through_to_graph() {
        let (pipeline, _) = pipeline(seeded_storage().await, ScriptedClient::ok(&[DESIGN]));
        let fs = pipeline
            .run_design_agent(SESSION, false)
            .await
            .unwrap()
            .future_state_id
            .unwrap();

        let graph = pipeline.get_future_state_graph(&fs).await.unwrap();
        let node = &graph.nodes[0];
        let changes = NodeChanges {
            position_x: Some(120.0),
            ..NodeChanges::default()
        };
        let updated = pipeline
            .update_future_state_node(&node.id, &changes, Some(node.revision))
            .await
            .unwrap();
        assert_eq!(updated.revision, node.revision + 1);

        let created = pipeline
            .create_edge(&fs, &graph.nodes[0].id, &graph.nodes[2].id, Some("exception".into()))
            .await
            .unwrap();
        assert_eq!(created.edge.order_index, 1);

        pipeline
            .set_future_state_status(&fs, FutureStateStatus::Locked)
            .await
            .unwrap();
        let err = pipeline.delete_edge(&created.edge.id).await.unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[tokio::test]
    async fn sqlite_backend_runs_the_pipeline() {
        let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
        {
            let mut snap = storage.begin_snapshot().await.unwrap();
            let seeded = seeded_storage().await;
            storage
                .insert_session(&mut snap, seeded.get_session(SESSION).await.unwrap())
                .await
                .unwrap();
            for step in seeded.list_process_steps(SESSION).await.unwrap() {
                storage.insert_process_step(&mut snap, step).await.unwrap();
            }
            for sol in seeded.list_solutions(SESSION, None).await.unwrap() {
                storage.upsert_solution(&mut snap, sol).await.unwrap();
            }
            storage.commit_snapshot(snap).await.unwrap();
        }

        let pipeline = Pipeline::new(
            storage,
            Arc::new(ScriptedClient::ok(&[DESIGN, PLAN])),
            SynthesisConfig::default(),
        );
        let design = pipeline.run_design_agent(SESSION, false).await.unwrap();
        let graph = pipeline
            .get_future_state_graph(design.future_state_id.as_deref().unwrap())
            .await
            .unwrap();
        assert_eq!(graph.edges[0].source_node_id, graph.nodes[0].id);
        assert_eq!(graph.edges[1].target_node_id, graph.nodes[2].id);

        let seq = pipeline.run_sequencing_agent(SESSION, false).await.unwrap();
        assert_eq!(seq.rebuild.implementation_dependencies, 1);
    }
}
