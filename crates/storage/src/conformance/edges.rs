use std::future::Future;

use super::{make_edge, seed_graph, TestResult};
use crate::{EdgeChanges, FutureStateEdgeRecord, StorageError, SynthesisStorage};

pub(super) async fn run_edge_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "edges",
            "self_loop_rejected",
            self_loop_rejected(factory).await,
        ),
        TestResult::from_result(
            "edges",
            "duplicate_pair_rejected",
            duplicate_pair_rejected(factory).await,
        ),
        TestResult::from_result(
            "edges",
            "reverse_edge_allowed",
            reverse_edge_allowed(factory).await,
        ),
        TestResult::from_result(
            "edges",
            "max_order_index_per_source",
            max_order_index_per_source(factory).await,
        ),
        TestResult::from_result(
            "edges",
            "missing_endpoint_not_found",
            missing_endpoint_not_found(factory).await,
        ),
        TestResult::from_result(
            "edges",
            "update_changes_label",
            update_changes_label(factory).await,
        ),
        TestResult::from_result(
            "edges",
            "delete_removes_edge",
            delete_removes_edge(factory).await,
        ),
        TestResult::from_result(
            "edges",
            "delete_missing_not_found",
            delete_missing_not_found(factory).await,
        ),
    ]
}

async fn insert<S: SynthesisStorage>(
    s: &S,
    edge: FutureStateEdgeRecord,
) -> Result<(), StorageError> {
    let mut snap = s.begin_snapshot().await?;
    match s.insert_future_state_edge(&mut snap, edge).await {
        Ok(()) => s.commit_snapshot(snap).await,
        Err(e) => {
            let _ = s.abort_snapshot(snap).await;
            Err(e)
        }
    }
}

async fn self_loop_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_graph(&s, "s-1", "fs-1", &["a"], 0).await?;
    match insert(&s, make_edge("e-1", "fs-1", "a", "a", 0)).await {
        Err(StorageError::SelfLoop { node_id }) if node_id == "a" => Ok(()),
        other => Err(format!("expected SelfLoop(a), got {other:?}")),
    }
}

async fn duplicate_pair_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_graph(&s, "s-1", "fs-1", &["a", "b"], 0).await?;
    insert(&s, make_edge("e-1", "fs-1", "a", "b", 0))
        .await
        .map_err(|e| format!("first edge: {e}"))?;
    match insert(&s, make_edge("e-2", "fs-1", "a", "b", 1)).await {
        Err(StorageError::DuplicateEdge { .. }) => Ok(()),
        other => Err(format!("expected DuplicateEdge, got {other:?}")),
    }
}

/// Feedback loops are legal; only the exact ordered pair is unique.
async fn reverse_edge_allowed<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_graph(&s, "s-1", "fs-1", &["a", "b"], 0).await?;
    insert(&s, make_edge("e-1", "fs-1", "a", "b", 0))
        .await
        .map_err(|e| format!("forward edge: {e}"))?;
    insert(&s, make_edge("e-2", "fs-1", "b", "a", 0))
        .await
        .map_err(|e| format!("reverse edge: {e}"))?;
    let edges = s
        .list_future_state_edges("fs-1")
        .await
        .map_err(|e| format!("list: {e}"))?;
    if edges.len() != 2 {
        return Err(format!("expected 2 edges, got {}", edges.len()));
    }
    Ok(())
}

async fn max_order_index_per_source<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_graph(&s, "s-1", "fs-1", &["a", "b", "c"], 0).await?;
    insert(&s, make_edge("e-1", "fs-1", "a", "b", 0))
        .await
        .map_err(|e| format!("e-1: {e}"))?;
    insert(&s, make_edge("e-2", "fs-1", "a", "c", 1))
        .await
        .map_err(|e| format!("e-2: {e}"))?;

    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let from_a = s.max_edge_order_index(&mut snap, "fs-1", "a").await;
    let from_b = s.max_edge_order_index(&mut snap, "fs-1", "b").await;
    let _ = s.abort_snapshot(snap).await;

    match (from_a, from_b) {
        (Ok(Some(1)), Ok(None)) => Ok(()),
        other => Err(format!("expected (Some(1), None), got {other:?}")),
    }
}

async fn missing_endpoint_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_graph(&s, "s-1", "fs-1", &["a"], 0).await?;
    match insert(&s, make_edge("e-1", "fs-1", "a", "ghost", 0)).await {
        Err(StorageError::NodeNotFound { node_id }) if node_id == "ghost" => Ok(()),
        other => Err(format!("expected NodeNotFound(ghost), got {other:?}")),
    }
}

async fn update_changes_label<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_graph(&s, "s-1", "fs-1", &["a", "b"], 0).await?;
    insert(&s, make_edge("e-1", "fs-1", "a", "b", 0))
        .await
        .map_err(|e| format!("insert: {e}"))?;

    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let changes = EdgeChanges {
        label: Some(Some("approved".to_string())),
        order_index: Some(7),
    };
    s.update_future_state_edge(&mut snap, "e-1", &changes)
        .await
        .map_err(|e| format!("update: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let edge = s
        .get_future_state_edge("e-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if edge.label.as_deref() != Some("approved") || edge.order_index != 7 {
        return Err(format!("update not applied: {edge:?}"));
    }
    Ok(())
}

async fn delete_removes_edge<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_graph(&s, "s-1", "fs-1", &["a", "b"], 0).await?;
    insert(&s, make_edge("e-1", "fs-1", "a", "b", 0))
        .await
        .map_err(|e| format!("insert: {e}"))?;

    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.delete_future_state_edge(&mut snap, "e-1")
        .await
        .map_err(|e| format!("delete: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    match s.get_future_state_edge("e-1").await {
        Err(StorageError::EdgeNotFound { .. }) => Ok(()),
        other => Err(format!("expected EdgeNotFound after delete, got {other:?}")),
    }
}

async fn delete_missing_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_graph(&s, "s-1", "fs-1", &[], 0).await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let result = s.delete_future_state_edge(&mut snap, "missing").await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::EdgeNotFound { .. }) => Ok(()),
        other => Err(format!("expected EdgeNotFound, got {other:?}")),
    }
}
