//! Versioned future-state graphs.
//!
//! Designer output addresses nodes by their position in the response, so a
//! persist runs in two passes: nodes first, recording which persisted ID
//! each response index received, then edges resolved through that map.
//! After persisting, nodes are edited under per-node revision checks.

use std::collections::{HashMap, HashSet};

use leanflow_storage::{
    EdgeChanges, FutureStateEdgeRecord, FutureStateNodeRecord, FutureStateRecord,
    FutureStateStatus, NodeAction, NodeChanges, StorageError, SynthesisStorage,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SynthesisError;
use crate::{new_id, now_rfc3339};

#[derive(Debug, Deserialize)]
pub(crate) struct DesignOutput {
    future_state: DesignedFutureState,
}

#[derive(Debug, Deserialize)]
struct DesignedFutureState {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    nodes: Vec<Value>,
    #[serde(default)]
    edges: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct DesignedNode {
    name: String,
    lane: String,
    action: NodeAction,
    #[serde(default)]
    step_id: Option<String>,
    #[serde(default)]
    solution_id: Option<String>,
    #[serde(default)]
    cycle_time_minutes: Option<f64>,
    #[serde(default)]
    wait_time_minutes: Option<f64>,
    #[serde(default)]
    position_x: Option<f64>,
    #[serde(default)]
    position_y: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DesignedEdge {
    source_node_index: i64,
    target_node_index: i64,
    #[serde(default)]
    label: Option<String>,
}

/// Read a designer reply into its typed shape. Individual nodes and edges
/// are checked later, one at a time.
pub(crate) fn parse_design_output(output: &Value) -> Result<DesignOutput, String> {
    serde_json::from_value(output.clone()).map_err(|e| format!("malformed design output: {}", e))
}

/// Summary of a persisted designer output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedFutureState {
    pub future_state_id: String,
    pub version: i64,
    pub node_count: usize,
    pub edge_count: usize,
    pub skipped_nodes: usize,
    pub skipped_edges: usize,
}

/// A future state with all of its nodes and edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FutureStateGraph {
    pub future_state: FutureStateRecord,
    pub nodes: Vec<FutureStateNodeRecord>,
    /// Grouped by source node (in node order), then by `order_index`.
    pub edges: Vec<FutureStateEdgeRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedEdge {
    pub edge: FutureStateEdgeRecord,
    /// Non-fatal findings, such as an existing edge in the opposite direction.
    pub warnings: Vec<String>,
}

fn convert_node(value: &Value, future_state_id: &str) -> Result<FutureStateNodeRecord, String> {
    let node: DesignedNode = serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
    if node.name.trim().is_empty() {
        return Err("node name is blank".to_string());
    }
    if node.lane.trim().is_empty() {
        return Err("node lane is blank".to_string());
    }
    Ok(FutureStateNodeRecord {
        id: new_id(),
        future_state_id: future_state_id.to_string(),
        source_step_id: node.step_id,
        name: node.name,
        action: node.action,
        lane: node.lane,
        cycle_time_minutes: node.cycle_time_minutes,
        wait_time_minutes: node.wait_time_minutes,
        position_x: node.position_x.unwrap_or(0.0),
        position_y: node.position_y.unwrap_or(0.0),
        solution_id: node.solution_id,
        revision: 0,
    })
}

/// Persist a validated designer output as a new future-state version.
///
/// Runs in one snapshot: the version is `max + 1` for the session and the
/// state is named `"<name> v<version>"` with status draft. Nodes that cannot
/// be converted or inserted are skipped, and edges whose endpoints did not
/// persist, that loop on one node, or that repeat a pair are skipped too.
pub async fn persist_design_output<S: SynthesisStorage>(
    storage: &S,
    session_id: &str,
    agent_run_id: Option<&str>,
    output: &Value,
) -> Result<PersistedFutureState, SynthesisError> {
    let design = parse_design_output(output).map_err(SynthesisError::Validation)?;
    let designed = design.future_state;

    let mut snapshot = storage.begin_snapshot().await?;
    let version = storage
        .next_future_state_version(&mut snapshot, session_id)
        .await?;

    let future_state = FutureStateRecord {
        id: new_id(),
        session_id: session_id.to_string(),
        name: format!("{} v{}", designed.name.trim(), version),
        description: designed.description,
        version,
        status: FutureStateStatus::Draft,
        agent_run_id: agent_run_id.map(str::to_string),
        created_at: now_rfc3339(),
    };
    let future_state_id = future_state.id.clone();
    storage
        .insert_future_state(&mut snapshot, future_state)
        .await?;

    // Pass 1: nodes, recording response index -> persisted ID.
    let mut index_to_id: HashMap<usize, String> = HashMap::new();
    let mut skipped_nodes = 0;
    for (index, raw) in designed.nodes.iter().enumerate() {
        let record = match convert_node(raw, &future_state_id) {
            Ok(record) => record,
            Err(reason) => {
                tracing::warn!(future_state_id = %future_state_id, index, %reason, "skipping designer node");
                skipped_nodes += 1;
                continue;
            }
        };
        let node_id = record.id.clone();
        match storage.insert_future_state_node(&mut snapshot, record).await {
            Ok(()) => {
                index_to_id.insert(index, node_id);
            }
            Err(e) => {
                tracing::warn!(future_state_id = %future_state_id, index, error = %e, "skipping designer node");
                skipped_nodes += 1;
            }
        }
    }

    // Pass 2: edges, resolved through the index map.
    let mut seen_pairs: HashSet<(String, String)> = HashSet::new();
    let mut next_order: HashMap<String, i64> = HashMap::new();
    let mut edge_count = 0;
    let mut skipped_edges = 0;
    for (position, raw) in designed.edges.iter().enumerate() {
        let edge: DesignedEdge = match serde_json::from_value(raw.clone()) {
            Ok(edge) => edge,
            Err(e) => {
                tracing::warn!(future_state_id = %future_state_id, position, error = %e, "skipping malformed designer edge");
                skipped_edges += 1;
                continue;
            }
        };
        let resolve = |index: i64| {
            usize::try_from(index)
                .ok()
                .and_then(|i| index_to_id.get(&i).cloned())
        };
        let (source, target) = match (
            resolve(edge.source_node_index),
            resolve(edge.target_node_index),
        ) {
            (Some(source), Some(target)) => (source, target),
            _ => {
                tracing::warn!(
                    future_state_id = %future_state_id,
                    source_node_index = edge.source_node_index,
                    target_node_index = edge.target_node_index,
                    "skipping designer edge with unresolved endpoint"
                );
                skipped_edges += 1;
                continue;
            }
        };
        if source == target {
            tracing::warn!(future_state_id = %future_state_id, node_index = edge.source_node_index, "skipping designer self-loop");
            skipped_edges += 1;
            continue;
        }
        if !seen_pairs.insert((source.clone(), target.clone())) {
            tracing::warn!(
                future_state_id = %future_state_id,
                source_node_index = edge.source_node_index,
                target_node_index = edge.target_node_index,
                "skipping duplicate designer edge"
            );
            skipped_edges += 1;
            continue;
        }

        let order = next_order.entry(source.clone()).or_insert(0);
        let record = FutureStateEdgeRecord {
            id: new_id(),
            future_state_id: future_state_id.clone(),
            source_node_id: source,
            target_node_id: target,
            label: edge.label,
            order_index: *order,
        };
        match storage.insert_future_state_edge(&mut snapshot, record).await {
            Ok(()) => {
                *order += 1;
                edge_count += 1;
            }
            Err(e) => {
                tracing::warn!(future_state_id = %future_state_id, position, error = %e, "skipping designer edge");
                skipped_edges += 1;
            }
        }
    }

    storage.commit_snapshot(snapshot).await?;

    let persisted = PersistedFutureState {
        future_state_id,
        version,
        node_count: index_to_id.len(),
        edge_count,
        skipped_nodes,
        skipped_edges,
    };
    tracing::info!(
        session_id,
        future_state_id = %persisted.future_state_id,
        version,
        nodes = persisted.node_count,
        edges = persisted.edge_count,
        skipped_nodes,
        skipped_edges,
        "persisted future state"
    );
    Ok(persisted)
}

fn ensure_editable(future_state: &FutureStateRecord) -> Result<(), SynthesisError> {
    if future_state.status == FutureStateStatus::Locked {
        return Err(SynthesisError::Conflict(format!(
            "future state {} is locked",
            future_state.id
        )));
    }
    Ok(())
}

fn validate_node_changes(changes: &NodeChanges) -> Result<(), SynthesisError> {
    if changes.is_empty() {
        return Err(SynthesisError::Validation(
            "node update has no changes".to_string(),
        ));
    }
    if changes.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        return Err(SynthesisError::Validation("node name must not be blank".to_string()));
    }
    if changes.lane.as_deref().is_some_and(|l| l.trim().is_empty()) {
        return Err(SynthesisError::Validation("node lane must not be blank".to_string()));
    }
    for (field, value) in [
        ("cycle_time_minutes", changes.cycle_time_minutes.flatten()),
        ("wait_time_minutes", changes.wait_time_minutes.flatten()),
    ] {
        if value.is_some_and(|v| v < 0.0) {
            return Err(SynthesisError::Validation(format!(
                "{} must not be negative",
                field
            )));
        }
    }
    Ok(())
}

/// Update one node under optimistic concurrency.
///
/// With `expected_revision = None` the current stored revision is used, which
/// makes the write last-writer-wins. A stale revision is a `Conflict` and
/// leaves the node untouched.
pub async fn update_node<S: SynthesisStorage>(
    storage: &S,
    node_id: &str,
    changes: &NodeChanges,
    expected_revision: Option<i64>,
) -> Result<FutureStateNodeRecord, SynthesisError> {
    validate_node_changes(changes)?;

    let mut snapshot = storage.begin_snapshot().await?;
    let node = storage
        .get_future_state_node_for_update(&mut snapshot, node_id)
        .await?;
    let future_state = storage
        .get_future_state_for_update(&mut snapshot, &node.future_state_id)
        .await?;
    ensure_editable(&future_state)?;

    let expected = expected_revision.unwrap_or(node.revision);
    let updated = storage
        .update_future_state_node(&mut snapshot, node_id, expected, changes)
        .await?;
    storage.commit_snapshot(snapshot).await?;

    tracing::debug!(node_id, revision = updated.revision, "updated future state node");
    Ok(updated)
}

/// Create an edge between two nodes of one future state.
///
/// The edge goes after the existing edges of its source. An edge in the
/// opposite direction is reported as a warning only; cycles are allowed.
pub async fn create_edge<S: SynthesisStorage>(
    storage: &S,
    future_state_id: &str,
    source_node_id: &str,
    target_node_id: &str,
    label: Option<String>,
) -> Result<CreatedEdge, SynthesisError> {
    if source_node_id == target_node_id {
        return Err(StorageError::SelfLoop {
            node_id: source_node_id.to_string(),
        }
        .into());
    }

    let mut snapshot = storage.begin_snapshot().await?;
    let future_state = storage
        .get_future_state_for_update(&mut snapshot, future_state_id)
        .await?;
    ensure_editable(&future_state)?;

    for node_id in [source_node_id, target_node_id] {
        let node = storage
            .get_future_state_node_for_update(&mut snapshot, node_id)
            .await?;
        if node.future_state_id != future_state_id {
            return Err(SynthesisError::Validation(format!(
                "node {} does not belong to future state {}",
                node_id, future_state_id
            )));
        }
    }

    if storage
        .find_future_state_edge(&mut snapshot, future_state_id, source_node_id, target_node_id)
        .await?
        .is_some()
    {
        return Err(StorageError::DuplicateEdge {
            future_state_id: future_state_id.to_string(),
            source_node_id: source_node_id.to_string(),
            target_node_id: target_node_id.to_string(),
        }
        .into());
    }

    let mut warnings = Vec::new();
    if storage
        .find_future_state_edge(&mut snapshot, future_state_id, target_node_id, source_node_id)
        .await?
        .is_some()
    {
        tracing::warn!(
            future_state_id,
            source_node_id,
            target_node_id,
            "reverse edge already exists, creating a cycle"
        );
        warnings.push(format!(
            "edge {} -> {} already exists; this edge creates a cycle",
            target_node_id, source_node_id
        ));
    }

    let order_index = storage
        .max_edge_order_index(&mut snapshot, future_state_id, source_node_id)
        .await?
        .map_or(0, |max| max + 1);

    let edge = FutureStateEdgeRecord {
        id: new_id(),
        future_state_id: future_state_id.to_string(),
        source_node_id: source_node_id.to_string(),
        target_node_id: target_node_id.to_string(),
        label,
        order_index,
    };
    storage
        .insert_future_state_edge(&mut snapshot, edge.clone())
        .await?;
    storage.commit_snapshot(snapshot).await?;

    tracing::info!(future_state_id, edge_id = %edge.id, order_index, "created edge");
    Ok(CreatedEdge { edge, warnings })
}

pub async fn update_edge<S: SynthesisStorage>(
    storage: &S,
    edge_id: &str,
    changes: &EdgeChanges,
) -> Result<FutureStateEdgeRecord, SynthesisError> {
    if changes.label.is_none() && changes.order_index.is_none() {
        return Err(SynthesisError::Validation(
            "edge update has no changes".to_string(),
        ));
    }
    if changes.order_index.is_some_and(|i| i < 0) {
        return Err(SynthesisError::Validation(
            "order_index must not be negative".to_string(),
        ));
    }

    let mut snapshot = storage.begin_snapshot().await?;
    let edge = storage
        .get_future_state_edge_for_update(&mut snapshot, edge_id)
        .await?;
    let future_state = storage
        .get_future_state_for_update(&mut snapshot, &edge.future_state_id)
        .await?;
    ensure_editable(&future_state)?;

    let updated = storage
        .update_future_state_edge(&mut snapshot, edge_id, changes)
        .await?;
    storage.commit_snapshot(snapshot).await?;
    Ok(updated)
}

pub async fn delete_edge<S: SynthesisStorage>(
    storage: &S,
    edge_id: &str,
) -> Result<(), SynthesisError> {
    let mut snapshot = storage.begin_snapshot().await?;
    let edge = storage
        .get_future_state_edge_for_update(&mut snapshot, edge_id)
        .await?;
    let future_state = storage
        .get_future_state_for_update(&mut snapshot, &edge.future_state_id)
        .await?;
    ensure_editable(&future_state)?;

    storage.delete_future_state_edge(&mut snapshot, edge_id).await?;
    storage.commit_snapshot(snapshot).await?;
    tracing::info!(edge_id, future_state_id = %edge.future_state_id, "deleted edge");
    Ok(())
}

pub async fn get_future_state_graph<S: SynthesisStorage>(
    storage: &S,
    future_state_id: &str,
) -> Result<FutureStateGraph, SynthesisError> {
    let future_state = storage.get_future_state(future_state_id).await?;
    let nodes = storage.list_future_state_nodes(future_state_id).await?;
    let mut edges = storage.list_future_state_edges(future_state_id).await?;

    let position: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();
    edges.sort_by_key(|e| {
        (
            position
                .get(e.source_node_id.as_str())
                .copied()
                .unwrap_or(usize::MAX),
            e.order_index,
        )
    });

    Ok(FutureStateGraph {
        future_state,
        nodes,
        edges,
    })
}

/// Versions of the session's future states, oldest first.
pub async fn list_future_states<S: SynthesisStorage>(
    storage: &S,
    session_id: &str,
) -> Result<Vec<FutureStateRecord>, SynthesisError> {
    storage.get_session(session_id).await?;
    Ok(storage.list_future_states(session_id).await?)
}

/// Promote or unlock a future state. Locking freezes its nodes and edges.
pub async fn set_future_state_status<S: SynthesisStorage>(
    storage: &S,
    future_state_id: &str,
    status: FutureStateStatus,
) -> Result<FutureStateRecord, SynthesisError> {
    let mut snapshot = storage.begin_snapshot().await?;
    let updated = storage
        .set_future_state_status(&mut snapshot, future_state_id, status)
        .await?;
    storage.commit_snapshot(snapshot).await?;
    tracing::info!(future_state_id, status = status.as_str(), "future state status changed");
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{seeded_storage, SESSION};
    use leanflow_storage::InMemoryStorage;
    use serde_json::json;
    use std::sync::Arc;

    fn three_node_design() -> Value {
        json!({
            "future_state": {
                "name": "Touchless AP",
                "description": "Auto-match invoices",
                "nodes": [
                    {"name": "Receive invoice", "lane": "AP", "action": "unchanged", "step_id": "step-1"},
                    {"name": "Manual keying", "lane": "AP", "action": "eliminate", "step_id": "step-2"},
                    {"name": "Auto-match", "lane": "AP", "action": "create", "solution_id": "sol-1"}
                ],
                "edges": [{"source_node_index": 0, "target_node_index": 2, "label": "scan"}]
            }
        })
    }

    async fn persist(storage: &InMemoryStorage, output: &Value) -> PersistedFutureState {
        persist_design_output(storage, SESSION, Some("run-1"), output)
            .await
            .unwrap()
    }

    async fn node_ids(storage: &InMemoryStorage, fs: &str) -> Vec<String> {
        storage
            .list_future_state_nodes(fs)
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.id)
            .collect()
    }

    #[tokio::test]
    async fn edge_indices_resolve_to_persisted_ids() {
        let storage = seeded_storage().await;
        let persisted = persist(&storage, &three_node_design()).await;
        assert_eq!(persisted.node_count, 3);
        assert_eq!(persisted.edge_count, 1);

        let ids = node_ids(&storage, &persisted.future_state_id).await;
        let edges = storage
            .list_future_state_edges(&persisted.future_state_id)
            .await
            .unwrap();
        assert_eq!(edges[0].source_node_id, ids[0]);
        assert_eq!(edges[0].target_node_id, ids[2]);
        assert_eq!(edges[0].label.as_deref(), Some("scan"));
    }

    #[tokio::test]
    async fn versions_increase_and_names_carry_version() {
        let storage = seeded_storage().await;
        let first = persist(&storage, &three_node_design()).await;
        let second = persist(&storage, &three_node_design()).await;
        assert_eq!((first.version, second.version), (1, 2));

        let states = list_future_states(&storage, SESSION).await.unwrap();
        assert_eq!(states[0].name, "Touchless AP v1");
        assert_eq!(states[1].name, "Touchless AP v2");
        assert_eq!(states[1].status, FutureStateStatus::Draft);
        assert_eq!(states[1].agent_run_id.as_deref(), Some("run-1"));
    }

    #[tokio::test]
    async fn concurrent_persists_get_distinct_versions() {
        let storage = Arc::new(seeded_storage().await);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let storage = storage.clone();
            handles.push(tokio::spawn(async move {
                persist_design_output(storage.as_ref(), SESSION, None, &three_node_design())
                    .await
                    .unwrap()
                    .version
            }));
        }
        let mut versions = Vec::new();
        for h in handles {
            versions.push(h.await.unwrap());
        }
        versions.sort();
        assert_eq!(versions, (1..=8).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn bad_nodes_and_edges_are_skipped() {
        let storage = seeded_storage().await;
        let output = json!({
            "future_state": {
                "name": "Partial",
                "nodes": [
                    {"name": "A", "lane": "AP", "action": "unchanged"},
                    {"name": "  ", "lane": "AP", "action": "modify"},
                    {"name": "C", "lane": "AP", "action": "create"}
                ],
                "edges": [
                    {"source_node_index": 0, "target_node_index": 1},
                    {"source_node_index": 0, "target_node_index": 7},
                    {"source_node_index": 2, "target_node_index": 2},
                    {"source_node_index": 0, "target_node_index": 2},
                    {"source_node_index": 0, "target_node_index": 2},
                    {"source_node_index": 2, "target_node_index": 0}
                ]
            }
        });
        let persisted = persist(&storage, &output).await;
        assert_eq!(persisted.node_count, 2);
        assert_eq!(persisted.skipped_nodes, 1);
        assert_eq!(persisted.edge_count, 2);
        assert_eq!(persisted.skipped_edges, 4);
    }

    #[tokio::test]
    async fn bulk_order_index_counts_per_source() {
        let storage = seeded_storage().await;
        let output = json!({
            "future_state": {
                "name": "Fan out",
                "nodes": [
                    {"name": "A", "lane": "AP", "action": "unchanged"},
                    {"name": "B", "lane": "AP", "action": "unchanged"},
                    {"name": "C", "lane": "AP", "action": "unchanged"}
                ],
                "edges": [
                    {"source_node_index": 0, "target_node_index": 1},
                    {"source_node_index": 1, "target_node_index": 2},
                    {"source_node_index": 0, "target_node_index": 2}
                ]
            }
        });
        let persisted = persist(&storage, &output).await;
        let graph = get_future_state_graph(&storage, &persisted.future_state_id)
            .await
            .unwrap();
        let orders: Vec<(String, i64)> = graph
            .edges
            .iter()
            .map(|e| (e.source_node_id.clone(), e.order_index))
            .collect();
        assert_eq!(
            orders,
            vec![
                (graph.nodes[0].id.clone(), 0),
                (graph.nodes[0].id.clone(), 1),
                (graph.nodes[1].id.clone(), 0),
            ]
        );
    }

    #[tokio::test]
    async fn unknown_session_persists_nothing() {
        let storage = InMemoryStorage::new();
        let err = persist_design_output(&storage, "ghost", None, &three_node_design())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn create_edge_enforces_invariants() {
        let storage = seeded_storage().await;
        let output = json!({
            "future_state": {
                "name": "Manual",
                "nodes": [
                    {"name": "A", "lane": "AP", "action": "unchanged"},
                    {"name": "B", "lane": "AP", "action": "unchanged"},
                    {"name": "C", "lane": "AP", "action": "unchanged"},
                    {"name": "D", "lane": "AP", "action": "unchanged"}
                ],
                "edges": []
            }
        });
        let fs = persist(&storage, &output).await.future_state_id;
        let ids = node_ids(&storage, &fs).await;

        let err = create_edge(&storage, &fs, &ids[0], &ids[0], None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");

        let first = create_edge(&storage, &fs, &ids[0], &ids[1], None).await.unwrap();
        let second = create_edge(&storage, &fs, &ids[0], &ids[2], None).await.unwrap();
        assert_eq!((first.edge.order_index, second.edge.order_index), (0, 1));

        let dup = create_edge(&storage, &fs, &ids[0], &ids[1], None)
            .await
            .unwrap_err();
        assert_eq!(dup.kind(), "conflict");

        let third = create_edge(&storage, &fs, &ids[0], &ids[3], Some("fallback".into()))
            .await
            .unwrap();
        assert_eq!(third.edge.order_index, 2);
        assert!(third.warnings.is_empty());
    }

    #[tokio::test]
    async fn reverse_edge_is_allowed_with_warning() {
        let storage = seeded_storage().await;
        let fs = persist(&storage, &three_node_design()).await.future_state_id;
        let ids = node_ids(&storage, &fs).await;
        let created = create_edge(&storage, &fs, &ids[2], &ids[0], Some("rework".into()))
            .await
            .unwrap();
        assert_eq!(created.warnings.len(), 1);
        assert_eq!(storage.list_future_state_edges(&fs).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn edge_endpoints_must_share_future_state() {
        let storage = seeded_storage().await;
        let fs1 = persist(&storage, &three_node_design()).await.future_state_id;
        let fs2 = persist(&storage, &three_node_design()).await.future_state_id;
        let a = node_ids(&storage, &fs1).await;
        let b = node_ids(&storage, &fs2).await;
        let err = create_edge(&storage, &fs1, &a[0], &b[1], None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    async fn node_at_revision(storage: &InMemoryStorage, revision: i64) -> String {
        let fs = persist(storage, &three_node_design()).await.future_state_id;
        let id = node_ids(storage, &fs).await.remove(0);
        for r in 0..revision {
            let changes = NodeChanges {
                position_x: Some(r as f64 * 10.0),
                ..NodeChanges::default()
            };
            update_node(storage, &id, &changes, Some(r)).await.unwrap();
        }
        id
    }

    #[tokio::test]
    async fn stale_revision_conflicts_without_writing() {
        let storage = seeded_storage().await;
        let id = node_at_revision(&storage, 3).await;

        let rename = NodeChanges {
            name: Some("Receive e-invoice".into()),
            ..NodeChanges::default()
        };
        let updated = update_node(&storage, &id, &rename, Some(3)).await.unwrap();
        assert_eq!(updated.revision, 4);

        let stale = NodeChanges {
            name: Some("Lost update".into()),
            ..NodeChanges::default()
        };
        let err = update_node(&storage, &id, &stale, Some(3)).await.unwrap_err();
        assert_eq!(err.kind(), "conflict");

        let node = storage.get_future_state_node(&id).await.unwrap();
        assert_eq!(node.revision, 4);
        assert_eq!(node.name, "Receive e-invoice");
    }

    #[tokio::test]
    async fn missing_revision_uses_current() {
        let storage = seeded_storage().await;
        let id = node_at_revision(&storage, 2).await;
        let changes = NodeChanges {
            lane: Some("Shared services".into()),
            ..NodeChanges::default()
        };
        let updated = update_node(&storage, &id, &changes, None).await.unwrap();
        assert_eq!(updated.revision, 3);
        assert_eq!(updated.lane, "Shared services");
    }

    #[tokio::test]
    async fn null_times_clear_and_absent_times_keep() {
        let storage = seeded_storage().await;
        let id = node_at_revision(&storage, 0).await;

        let set: NodeChanges =
            serde_json::from_value(json!({"cycle_time_minutes": 12.5, "wait_time_minutes": 30}))
                .unwrap();
        let node = update_node(&storage, &id, &set, None).await.unwrap();
        assert_eq!(node.cycle_time_minutes, Some(12.5));
        assert_eq!(node.wait_time_minutes, Some(30.0));

        let clear: NodeChanges =
            serde_json::from_value(json!({"cycle_time_minutes": null})).unwrap();
        assert_eq!(clear.cycle_time_minutes, Some(None));
        assert_eq!(clear.wait_time_minutes, None);
        let node = update_node(&storage, &id, &clear, None).await.unwrap();
        assert_eq!(node.cycle_time_minutes, None);
        assert_eq!(node.wait_time_minutes, Some(30.0));

        let negative: NodeChanges =
            serde_json::from_value(json!({"wait_time_minutes": -1.0})).unwrap();
        assert_eq!(
            update_node(&storage, &id, &negative, None).await.unwrap_err().kind(),
            "validation"
        );
    }

    #[tokio::test]
    async fn empty_or_blank_updates_rejected() {
        let storage = seeded_storage().await;
        let id = node_at_revision(&storage, 0).await;
        let err = update_node(&storage, &id, &NodeChanges::default(), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");

        let blank = NodeChanges {
            name: Some(" ".into()),
            ..NodeChanges::default()
        };
        assert_eq!(
            update_node(&storage, &id, &blank, None).await.unwrap_err().kind(),
            "validation"
        );
    }

    #[tokio::test]
    async fn missing_node_is_not_found() {
        let storage = seeded_storage().await;
        let changes = NodeChanges {
            name: Some("x".into()),
            ..NodeChanges::default()
        };
        let err = update_node(&storage, "ghost", &changes, Some(0))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn locked_future_state_rejects_edits() {
        let storage = seeded_storage().await;
        let fs = persist(&storage, &three_node_design()).await.future_state_id;
        let ids = node_ids(&storage, &fs).await;
        let edge_id = storage.list_future_state_edges(&fs).await.unwrap()[0].id.clone();

        set_future_state_status(&storage, &fs, FutureStateStatus::Locked)
            .await
            .unwrap();

        let changes = NodeChanges {
            name: Some("x".into()),
            ..NodeChanges::default()
        };
        assert_eq!(
            update_node(&storage, &ids[0], &changes, None).await.unwrap_err().kind(),
            "conflict"
        );
        assert_eq!(
            create_edge(&storage, &fs, &ids[0], &ids[1], None)
                .await
                .unwrap_err()
                .kind(),
            "conflict"
        );
        assert_eq!(
            delete_edge(&storage, &edge_id).await.unwrap_err().kind(),
            "conflict"
        );

        set_future_state_status(&storage, &fs, FutureStateStatus::Draft)
            .await
            .unwrap();
        delete_edge(&storage, &edge_id).await.unwrap();
        assert!(storage.list_future_state_edges(&fs).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_edge_changes_label_and_order() {
        let storage = seeded_storage().await;
        let fs = persist(&storage, &three_node_design()).await.future_state_id;
        let edge_id = storage.list_future_state_edges(&fs).await.unwrap()[0].id.clone();

        let changes = EdgeChanges {
            label: Some(None),
            order_index: Some(5),
        };
        let updated = update_edge(&storage, &edge_id, &changes).await.unwrap();
        assert_eq!(updated.label, None);
        assert_eq!(updated.order_index, 5);

        let negative = EdgeChanges {
            label: None,
            order_index: Some(-1),
        };
        assert_eq!(
            update_edge(&storage, &edge_id, &negative).await.unwrap_err().kind(),
            "validation"
        );
        assert_eq!(
            delete_edge(&storage, "ghost").await.unwrap_err().kind(),
            "not_found"
        );
    }
}
