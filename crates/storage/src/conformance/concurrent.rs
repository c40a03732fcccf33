use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use super::{make_future_state, seed_graph, seed_session, TestResult};
use crate::{NodeChanges, StorageError, SynthesisStorage};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_node_updates_exactly_one_wins",
        concurrent_node_updates_exactly_one_wins(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_versions_are_distinct",
        concurrent_versions_are_distinct(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_updates_different_nodes_all_succeed",
        concurrent_updates_different_nodes_all_succeed(factory).await,
    ));

    results
}

// ── Concurrent node update: exactly one wins ────────────────────────────────

/// N tasks each open a snapshot and update the same node from revision 0.
/// Exactly one commit succeeds; the rest must get RevisionConflict.
async fn concurrent_node_updates_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    seed_graph(storage.as_ref(), "s-1", "fs-1", &["n-1"], 0).await?;

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let changes = NodeChanges {
                name: Some(format!("writer-{i}")),
                ..NodeChanges::default()
            };
            match s.update_future_state_node(&mut snap, "n-1", 0, &changes).await {
                Ok(_) => {
                    s.commit_snapshot(snap).await?;
                    Ok(true)
                }
                Err(StorageError::RevisionConflict { .. }) => {
                    s.abort_snapshot(snap).await?;
                    Ok(false)
                }
                Err(e) => {
                    let _ = s.abort_snapshot(snap).await;
                    Err(e)
                }
            }
        }));
    }

    let mut winners = 0usize;
    let mut losers = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e: StorageError| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        } else {
            losers += 1;
        }
    }

    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    if losers != N - 1 {
        return Err(format!("expected {} losers, got {losers}", N - 1));
    }

    let node = storage
        .get_future_state_node("n-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if node.revision != 1 {
        return Err(format!("expected final revision 1, got {}", node.revision));
    }
    Ok(())
}

// ── Concurrent version assignment ───────────────────────────────────────────

/// N tasks each read the next version and insert a future state in one
/// snapshot. Every task must succeed with a distinct version 1..=N.
async fn concurrent_versions_are_distinct<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    seed_session(storage.as_ref(), "s-1").await?;

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let version = s.next_future_state_version(&mut snap, "s-1").await?;
            s.insert_future_state(&mut snap, make_future_state(&format!("fs-{i}"), "s-1", version))
                .await?;
            s.commit_snapshot(snap).await?;
            Ok::<i64, StorageError>(version)
        }));
    }

    let mut versions = BTreeSet::new();
    for handle in handles {
        let v = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("storage error: {e}"))?;
        versions.insert(v);
    }

    let expected: BTreeSet<i64> = (1..=N as i64).collect();
    if versions != expected {
        return Err(format!("expected versions 1..={N}, got {versions:?}"));
    }
    Ok(())
}

// ── Concurrent updates on different nodes: all succeed ──────────────────────

async fn concurrent_updates_different_nodes_all_succeed<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    let ids: Vec<String> = (0..N).map(|i| format!("n-{i}")).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    seed_graph(storage.as_ref(), "s-1", "fs-1", &id_refs, 0).await?;

    let mut handles = Vec::new();
    for id in ids.clone() {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let changes = NodeChanges {
                position_x: Some(50.0),
                ..NodeChanges::default()
            };
            s.update_future_state_node(&mut snap, &id, 0, &changes)
                .await?;
            s.commit_snapshot(snap).await
        }));
    }
    for handle in handles {
        handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("storage error: {e}"))?;
    }

    for id in &ids {
        let node = storage
            .get_future_state_node(id)
            .await
            .map_err(|e| format!("get {id}: {e}"))?;
        if node.revision != 1 {
            return Err(format!("node {id} at revision {}, expected 1", node.revision));
        }
    }
    Ok(())
}
