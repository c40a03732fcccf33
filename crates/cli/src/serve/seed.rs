//! Startup seed file: sessions and their inputs, written in one snapshot.
//!
//! ```json
//! {
//!   "sessions": [{"id": "s1", "name": "AP walk", "created_at": "2026-01-05T09:00:00Z"}],
//!   "process_steps": [...],
//!   "process_connections": [...],
//!   "solutions": [...],
//!   "future_states": [{"id": "fs1", ..., "nodes": [...], "edges": [...]}],
//!   "information_flows": [...]
//! }
//! ```

use std::path::Path;

use leanflow_storage::{
    FutureStateEdgeRecord, FutureStateNodeRecord, FutureStateRecord, InformationFlowRecord,
    ProcessConnectionRecord, ProcessStepRecord, SessionRecord, SolutionCardRecord,
    SynthesisStorage,
};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct SeedData {
    #[serde(default)]
    sessions: Vec<SessionRecord>,
    #[serde(default)]
    process_steps: Vec<ProcessStepRecord>,
    #[serde(default)]
    process_connections: Vec<ProcessConnectionRecord>,
    #[serde(default)]
    solutions: Vec<SolutionCardRecord>,
    #[serde(default)]
    future_states: Vec<SeedFutureState>,
    #[serde(default)]
    information_flows: Vec<InformationFlowRecord>,
}

#[derive(Debug, Deserialize)]
struct SeedFutureState {
    #[serde(flatten)]
    future_state: FutureStateRecord,
    #[serde(default)]
    nodes: Vec<FutureStateNodeRecord>,
    #[serde(default)]
    edges: Vec<FutureStateEdgeRecord>,
}

/// Counts of seeded records, for the startup log line.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct SeedSummary {
    pub(crate) sessions: usize,
    pub(crate) future_states: usize,
    pub(crate) information_flows: usize,
}

pub(crate) fn read_seed(path: &Path) -> Result<SeedData, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("could not read '{}': {}", path.display(), e))?;

    serde_json::from_str(&content)
        .map_err(|e| format!("could not parse '{}': {}", path.display(), e))
}

/// Write every seeded record. Any failure aborts the whole seed.
pub(crate) async fn load_seed<S: SynthesisStorage>(
    storage: &S,
    seed: SeedData,
) -> Result<SeedSummary, String> {
    let summary = SeedSummary {
        sessions: seed.sessions.len(),
        future_states: seed.future_states.len(),
        information_flows: seed.information_flows.len(),
    };

    let mut snapshot = storage.begin_snapshot().await.map_err(|e| e.to_string())?;
    if let Err(e) = write_seed(storage, &mut snapshot, seed).await {
        storage
            .abort_snapshot(snapshot)
            .await
            .map_err(|e| e.to_string())?;
        return Err(e);
    }
    storage
        .commit_snapshot(snapshot)
        .await
        .map_err(|e| e.to_string())?;
    Ok(summary)
}

async fn write_seed<S: SynthesisStorage>(
    storage: &S,
    snapshot: &mut S::Snapshot,
    seed: SeedData,
) -> Result<(), String> {
    for session in seed.sessions {
        let id = session.id.clone();
        storage
            .insert_session(snapshot, session)
            .await
            .map_err(|e| format!("session {}: {}", id, e))?;
    }
    for step in seed.process_steps {
        let id = step.id.clone();
        storage
            .insert_process_step(snapshot, step)
            .await
            .map_err(|e| format!("process step {}: {}", id, e))?;
    }
    for connection in seed.process_connections {
        let id = connection.id.clone();
        storage
            .insert_process_connection(snapshot, connection)
            .await
            .map_err(|e| format!("process connection {}: {}", id, e))?;
    }
    for solution in seed.solutions {
        let id = solution.id.clone();
        storage
            .upsert_solution(snapshot, solution)
            .await
            .map_err(|e| format!("solution {}: {}", id, e))?;
    }
    for entry in seed.future_states {
        let id = entry.future_state.id.clone();
        storage
            .insert_future_state(snapshot, entry.future_state)
            .await
            .map_err(|e| format!("future state {}: {}", id, e))?;
        for node in entry.nodes {
            let node_id = node.id.clone();
            storage
                .insert_future_state_node(snapshot, node)
                .await
                .map_err(|e| format!("future state {} node {}: {}", id, node_id, e))?;
        }
        for edge in entry.edges {
            let edge_id = edge.id.clone();
            storage
                .insert_future_state_edge(snapshot, edge)
                .await
                .map_err(|e| format!("future state {} edge {}: {}", id, edge_id, e))?;
        }
    }
    for flow in seed.information_flows {
        let id = flow.id.clone();
        storage
            .insert_information_flow(snapshot, flow)
            .await
            .map_err(|e| format!("information flow {}: {}", id, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use leanflow_storage::InMemoryStorage;

    const SEED: &str = r#"{
        "sessions": [{"id": "s1", "name": "AP walk", "created_at": "2026-01-05T09:00:00Z"}],
        "process_steps": [
            {"id": "st1", "session_id": "s1", "name": "Receive invoice", "lane": "AP"}
        ],
        "future_states": [{
            "id": "fs1", "session_id": "s1", "name": "Lean AP v1", "version": 1,
            "status": "draft", "created_at": "2026-01-05T10:00:00Z",
            "nodes": [
                {"id": "n1", "future_state_id": "fs1", "name": "Scan", "action": "create", "lane": "AP"},
                {"id": "n2", "future_state_id": "fs1", "name": "Match", "action": "modify", "lane": "AP"}
            ],
            "edges": [
                {"id": "e1", "future_state_id": "fs1", "source_node_id": "n1",
                 "target_node_id": "n2", "order_index": 0}
            ]
        }]
    }"#;

    #[tokio::test]
    async fn seed_writes_nested_graph() {
        let storage = InMemoryStorage::new();
        let seed: SeedData = serde_json::from_str(SEED).unwrap();
        let summary = load_seed(&storage, seed).await.unwrap();
        assert_eq!(summary.sessions, 1);
        assert_eq!(summary.future_states, 1);

        assert_eq!(storage.list_process_steps("s1").await.unwrap().len(), 1);
        assert_eq!(storage.list_future_state_nodes("fs1").await.unwrap().len(), 2);
        assert_eq!(storage.list_future_state_edges("fs1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_seed_writes_nothing() {
        let storage = InMemoryStorage::new();
        let seed: SeedData = serde_json::from_str(
            r#"{"sessions": [
                {"id": "s1", "name": "a", "created_at": "2026-01-05T09:00:00Z"},
                {"id": "s1", "name": "b", "created_at": "2026-01-05T09:00:00Z"}
            ]}"#,
        )
        .unwrap();
        let err = load_seed(&storage, seed).await.unwrap_err();
        assert!(err.contains("session s1"), "{}", err);
        assert!(storage.get_session("s1").await.is_err());
    }

    #[test]
    fn unknown_sections_are_rejected() {
        let result: Result<SeedData, _> = serde_json::from_str(r#"{"personas": []}"#);
        assert!(result.is_err());
    }
}
