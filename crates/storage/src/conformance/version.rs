use std::future::Future;

use super::{make_future_state, seed_session, TestResult};
use crate::{StorageError, SynthesisStorage};

pub(super) async fn run_version_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "version",
            "first_version_is_one",
            first_version_is_one(factory).await,
        ),
        TestResult::from_result(
            "version",
            "next_version_is_max_plus_one",
            next_version_is_max_plus_one(factory).await,
        ),
        TestResult::from_result(
            "version",
            "versions_are_per_session",
            versions_are_per_session(factory).await,
        ),
        TestResult::from_result(
            "version",
            "duplicate_version_rejected",
            duplicate_version_rejected(factory).await,
        ),
        TestResult::from_result(
            "version",
            "next_version_unknown_session",
            next_version_unknown_session(factory).await,
        ),
        TestResult::from_result(
            "version",
            "list_ordered_by_version",
            list_ordered_by_version(factory).await,
        ),
    ]
}

async fn next_version<S: SynthesisStorage>(s: &S, session_id: &str) -> Result<i64, String> {
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let version = s
        .next_future_state_version(&mut snap, session_id)
        .await
        .map_err(|e| format!("next version: {e}"));
    let _ = s.abort_snapshot(snap).await;
    version
}

async fn insert_versions<S: SynthesisStorage>(
    s: &S,
    session_id: &str,
    versions: &[i64],
) -> Result<(), String> {
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    for v in versions {
        s.insert_future_state(
            &mut snap,
            make_future_state(&format!("{session_id}-fs-{v}"), session_id, *v),
        )
        .await
        .map_err(|e| format!("insert v{v}: {e}"))?;
    }
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))
}

async fn first_version_is_one<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_session(&s, "s-1").await?;
    match next_version(&s, "s-1").await? {
        1 => Ok(()),
        v => Err(format!("expected first version 1, got {v}")),
    }
}

/// Gaps are tolerated: after versions 1 and 3 the next one is 4, not 2.
async fn next_version_is_max_plus_one<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_session(&s, "s-1").await?;
    insert_versions(&s, "s-1", &[1, 3]).await?;
    match next_version(&s, "s-1").await? {
        4 => Ok(()),
        v => Err(format!("expected next version 4, got {v}")),
    }
}

async fn versions_are_per_session<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_session(&s, "s-1").await?;
    seed_session(&s, "s-2").await?;
    insert_versions(&s, "s-1", &[1, 2, 3]).await?;
    insert_versions(&s, "s-2", &[1]).await?;
    match next_version(&s, "s-2").await? {
        2 => Ok(()),
        v => Err(format!("expected s-2 next version 2, got {v}")),
    }
}

async fn duplicate_version_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_session(&s, "s-1").await?;
    insert_versions(&s, "s-1", &[1]).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let result = s
        .insert_future_state(&mut snap, make_future_state("other-fs", "s-1", 1))
        .await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::DuplicateVersion { version: 1, .. }) => Ok(()),
        other => Err(format!("expected DuplicateVersion(1), got {other:?}")),
    }
}

async fn next_version_unknown_session<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let result = s.next_future_state_version(&mut snap, "missing").await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::SessionNotFound { .. }) => Ok(()),
        other => Err(format!("expected SessionNotFound, got {other:?}")),
    }
}

async fn list_ordered_by_version<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_session(&s, "s-1").await?;
    insert_versions(&s, "s-1", &[2, 5, 1]).await?;
    let versions: Vec<i64> = s
        .list_future_states("s-1")
        .await
        .map_err(|e| format!("list: {e}"))?
        .iter()
        .map(|f| f.version)
        .collect();
    if versions != vec![1, 2, 5] {
        return Err(format!("expected [1, 2, 5], got {versions:?}"));
    }
    Ok(())
}
