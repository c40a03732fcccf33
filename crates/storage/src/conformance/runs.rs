use std::future::Future;

use super::{make_agent_run, seed_session, TestResult};
use crate::{AgentRunRecord, AgentRunStatus, SynthesisStorage};

pub(super) async fn run_agent_run_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "runs",
            "failed_runs_are_not_cache_hits",
            failed_runs_are_not_cache_hits(factory).await,
        ),
        TestResult::from_result(
            "runs",
            "most_recent_succeeded_run_wins",
            most_recent_succeeded_run_wins(factory).await,
        ),
        TestResult::from_result(
            "runs",
            "lookup_is_keyed_by_fingerprint_and_type",
            lookup_is_keyed_by_fingerprint_and_type(factory).await,
        ),
        TestResult::from_result(
            "runs",
            "runs_listed_in_insertion_order",
            runs_listed_in_insertion_order(factory).await,
        ),
    ]
}

async fn insert_runs<S: SynthesisStorage>(s: &S, runs: Vec<AgentRunRecord>) -> Result<(), String> {
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    for run in runs {
        let id = run.id.clone();
        s.insert_agent_run(&mut snap, run)
            .await
            .map_err(|e| format!("insert run {id}: {e}"))?;
    }
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))
}

async fn failed_runs_are_not_cache_hits<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_session(&s, "s-1").await?;
    insert_runs(
        &s,
        vec![make_agent_run(
            "run-1",
            "s-1",
            "fp-a",
            AgentRunStatus::Failed,
            "2026-01-01T00:00:00Z",
        )],
    )
    .await?;
    match s.find_succeeded_run("s-1", "design", "fp-a").await {
        Ok(None) => Ok(()),
        other => Err(format!("expected no cache hit, got {other:?}")),
    }
}

async fn most_recent_succeeded_run_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_session(&s, "s-1").await?;
    insert_runs(
        &s,
        vec![
            make_agent_run(
                "run-1",
                "s-1",
                "fp-a",
                AgentRunStatus::Succeeded,
                "2026-01-01T00:00:00Z",
            ),
            make_agent_run(
                "run-2",
                "s-1",
                "fp-a",
                AgentRunStatus::Succeeded,
                "2026-01-02T00:00:00Z",
            ),
            make_agent_run(
                "run-3",
                "s-1",
                "fp-a",
                AgentRunStatus::Failed,
                "2026-01-03T00:00:00Z",
            ),
        ],
    )
    .await?;
    match s.find_succeeded_run("s-1", "design", "fp-a").await {
        Ok(Some(run)) if run.id == "run-2" => Ok(()),
        other => Err(format!("expected run-2, got {other:?}")),
    }
}

async fn lookup_is_keyed_by_fingerprint_and_type<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_session(&s, "s-1").await?;
    insert_runs(
        &s,
        vec![make_agent_run(
            "run-1",
            "s-1",
            "fp-a",
            AgentRunStatus::Succeeded,
            "2026-01-01T00:00:00Z",
        )],
    )
    .await?;

    let other_fp = s
        .find_succeeded_run("s-1", "design", "fp-b")
        .await
        .map_err(|e| format!("lookup fp-b: {e}"))?;
    let other_type = s
        .find_succeeded_run("s-1", "sequencing", "fp-a")
        .await
        .map_err(|e| format!("lookup sequencing: {e}"))?;
    let other_session = s
        .find_succeeded_run("s-2", "design", "fp-a")
        .await
        .map_err(|e| format!("lookup s-2: {e}"))?;
    if other_fp.is_some() || other_type.is_some() || other_session.is_some() {
        return Err("lookup matched a different cache key".to_string());
    }
    Ok(())
}

async fn runs_listed_in_insertion_order<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_session(&s, "s-1").await?;
    insert_runs(
        &s,
        vec![
            make_agent_run(
                "run-b",
                "s-1",
                "fp-a",
                AgentRunStatus::Failed,
                "2026-01-01T00:00:00Z",
            ),
            make_agent_run(
                "run-a",
                "s-1",
                "fp-a",
                AgentRunStatus::Succeeded,
                "2026-01-02T00:00:00Z",
            ),
        ],
    )
    .await?;
    let ids: Vec<String> = s
        .list_agent_runs("s-1")
        .await
        .map_err(|e| format!("list: {e}"))?
        .into_iter()
        .map(|r| r.id)
        .collect();
    if ids != ["run-b", "run-a"] {
        return Err(format!("expected [run-b, run-a], got {ids:?}"));
    }
    Ok(())
}
