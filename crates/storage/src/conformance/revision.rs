use std::future::Future;

use super::{seed_graph, TestResult};
use crate::{NodeAction, NodeChanges, StorageError, SynthesisStorage};

pub(super) async fn run_revision_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "revision",
            "matching_revision_increments",
            matching_revision_increments(factory).await,
        ),
        TestResult::from_result(
            "revision",
            "stale_revision_conflicts",
            stale_revision_conflicts(factory).await,
        ),
        TestResult::from_result(
            "revision",
            "conflict_does_not_mutate_node",
            conflict_does_not_mutate_node(factory).await,
        ),
        TestResult::from_result(
            "revision",
            "missing_node_is_not_found",
            missing_node_is_not_found(factory).await,
        ),
        TestResult::from_result(
            "revision",
            "changes_are_applied",
            changes_are_applied(factory).await,
        ),
        TestResult::from_result(
            "revision",
            "null_solution_link_clears_it",
            null_solution_link_clears_it(factory).await,
        ),
    ]
}

fn rename(name: &str) -> NodeChanges {
    NodeChanges {
        name: Some(name.to_string()),
        ..NodeChanges::default()
    }
}

async fn update<S: SynthesisStorage>(
    s: &S,
    node_id: &str,
    expected_revision: i64,
    changes: &NodeChanges,
) -> Result<crate::FutureStateNodeRecord, StorageError> {
    let mut snap = s.begin_snapshot().await?;
    match s
        .update_future_state_node(&mut snap, node_id, expected_revision, changes)
        .await
    {
        Ok(node) => {
            s.commit_snapshot(snap).await?;
            Ok(node)
        }
        Err(e) => {
            let _ = s.abort_snapshot(snap).await;
            Err(e)
        }
    }
}

async fn matching_revision_increments<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_graph(&s, "s-1", "fs-1", &["n-1"], 3).await?;
    let updated = update(&s, "n-1", 3, &rename("Approve invoice"))
        .await
        .map_err(|e| format!("update: {e}"))?;
    if updated.revision != 4 {
        return Err(format!("expected returned revision 4, got {}", updated.revision));
    }
    let stored = s
        .get_future_state_node("n-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if stored.revision != 4 {
        return Err(format!("expected stored revision 4, got {}", stored.revision));
    }
    Ok(())
}

/// Two writers both read revision 3; the second one must be told it lost.
async fn stale_revision_conflicts<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_graph(&s, "s-1", "fs-1", &["n-1"], 3).await?;
    update(&s, "n-1", 3, &rename("first"))
        .await
        .map_err(|e| format!("first update: {e}"))?;
    match update(&s, "n-1", 3, &rename("second")).await {
        Err(StorageError::RevisionConflict {
            node_id,
            expected_revision: 3,
        }) if node_id == "n-1" => Ok(()),
        other => Err(format!("expected RevisionConflict(n-1, 3), got {other:?}")),
    }
}

async fn conflict_does_not_mutate_node<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_graph(&s, "s-1", "fs-1", &["n-1"], 3).await?;
    update(&s, "n-1", 3, &rename("first"))
        .await
        .map_err(|e| format!("first update: {e}"))?;
    let _ = update(&s, "n-1", 3, &rename("second")).await;

    let stored = s
        .get_future_state_node("n-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if stored.revision != 4 {
        return Err(format!("expected revision 4, got {}", stored.revision));
    }
    if stored.name != "first" {
        return Err(format!("expected name 'first', got '{}'", stored.name));
    }
    Ok(())
}

async fn missing_node_is_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_graph(&s, "s-1", "fs-1", &[], 0).await?;
    match update(&s, "missing", 0, &rename("x")).await {
        Err(StorageError::NodeNotFound { .. }) => Ok(()),
        other => Err(format!("expected NodeNotFound, got {other:?}")),
    }
}

async fn changes_are_applied<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_graph(&s, "s-1", "fs-1", &["n-1"], 0).await?;
    let changes = NodeChanges {
        action: Some(NodeAction::Eliminate),
        lane: Some("Procurement".to_string()),
        position_x: Some(120.0),
        position_y: Some(-40.0),
        solution_id: Some(Some("sol-1".to_string())),
        ..NodeChanges::default()
    };
    update(&s, "n-1", 0, &changes)
        .await
        .map_err(|e| format!("update: {e}"))?;

    let stored = s
        .get_future_state_node("n-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if stored.action != NodeAction::Eliminate
        || stored.lane != "Procurement"
        || stored.position_x != 120.0
        || stored.position_y != -40.0
        || stored.solution_id.as_deref() != Some("sol-1")
    {
        return Err(format!("changes not applied: {stored:?}"));
    }
    if stored.name != "Step n-1" {
        return Err(format!("untouched name changed to '{}'", stored.name));
    }
    Ok(())
}

async fn null_solution_link_clears_it<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_graph(&s, "s-1", "fs-1", &["n-1"], 0).await?;
    let link = NodeChanges {
        solution_id: Some(Some("sol-1".to_string())),
        ..NodeChanges::default()
    };
    update(&s, "n-1", 0, &link)
        .await
        .map_err(|e| format!("link: {e}"))?;
    let unlink = NodeChanges {
        solution_id: Some(None),
        ..NodeChanges::default()
    };
    let node = update(&s, "n-1", 1, &unlink)
        .await
        .map_err(|e| format!("unlink: {e}"))?;
    if node.solution_id.is_some() {
        return Err(format!("expected cleared solution link, got {:?}", node.solution_id));
    }
    Ok(())
}
