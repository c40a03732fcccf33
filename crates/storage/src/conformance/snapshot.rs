use std::future::Future;

use super::{make_future_state, make_node, make_session, seed_session, TestResult};
use crate::{StorageError, SynthesisStorage};

pub(super) async fn run_snapshot_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "snapshot",
            "committed_session_is_visible",
            committed_session_is_visible(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "aborted_snapshot_discards_writes",
            aborted_snapshot_discards_writes(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "dropped_snapshot_discards_writes",
            dropped_snapshot_discards_writes(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "abort_discards_whole_graph",
            abort_discards_whole_graph(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "duplicate_session_rejected",
            duplicate_session_rejected(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "unknown_session_not_found",
            unknown_session_not_found(factory).await,
        ),
    ]
}

async fn committed_session_is_visible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_session(&s, "s-1").await?;
    let session = s
        .get_session("s-1")
        .await
        .map_err(|e| format!("get_session: {e}"))?;
    if session.name != "Waste walk s-1" {
        return Err(format!("unexpected session name '{}'", session.name));
    }
    Ok(())
}

async fn aborted_snapshot_discards_writes<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.insert_session(&mut snap, make_session("s-1"))
        .await
        .map_err(|e| format!("insert: {e}"))?;
    s.abort_snapshot(snap)
        .await
        .map_err(|e| format!("abort: {e}"))?;

    match s.get_session("s-1").await {
        Err(StorageError::SessionNotFound { .. }) => Ok(()),
        other => Err(format!("expected SessionNotFound after abort, got {other:?}")),
    }
}

async fn dropped_snapshot_discards_writes<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    {
        let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
        s.insert_session(&mut snap, make_session("s-1"))
            .await
            .map_err(|e| format!("insert: {e}"))?;
    }

    match s.get_session("s-1").await {
        Err(StorageError::SessionNotFound { .. }) => Ok(()),
        other => Err(format!("expected SessionNotFound after drop, got {other:?}")),
    }
}

/// A future state and its nodes written in one snapshot vanish together.
async fn abort_discards_whole_graph<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_session(&s, "s-1").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.insert_future_state(&mut snap, make_future_state("fs-1", "s-1", 1))
        .await
        .map_err(|e| format!("insert fs: {e}"))?;
    for id in ["n-1", "n-2"] {
        s.insert_future_state_node(&mut snap, make_node(id, "fs-1", 0))
            .await
            .map_err(|e| format!("insert node: {e}"))?;
    }
    s.abort_snapshot(snap)
        .await
        .map_err(|e| format!("abort: {e}"))?;

    let states = s
        .list_future_states("s-1")
        .await
        .map_err(|e| format!("list: {e}"))?;
    if !states.is_empty() {
        return Err(format!("expected no future states, got {}", states.len()));
    }
    let nodes = s
        .list_future_state_nodes("fs-1")
        .await
        .map_err(|e| format!("list nodes: {e}"))?;
    if !nodes.is_empty() {
        return Err(format!("expected no nodes, got {}", nodes.len()));
    }
    Ok(())
}

async fn duplicate_session_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_session(&s, "s-1").await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let result = s.insert_session(&mut snap, make_session("s-1")).await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::AlreadyExists { .. }) => Ok(()),
        other => Err(format!("expected AlreadyExists, got {other:?}")),
    }
}

async fn unknown_session_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s.get_session("missing").await {
        Err(StorageError::SessionNotFound { session_id }) if session_id == "missing" => Ok(()),
        other => Err(format!("expected SessionNotFound(missing), got {other:?}")),
    }
}
