use std::future::Future;

use super::{seed_session, TestResult};
use crate::{
    ImplementationDependencyRecord, ImplementationItemRecord, ImplementationWaveRecord,
    SolutionDependencyRecord, StorageError, SynthesisStorage,
};

pub(super) async fn run_sequencing_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "sequencing",
            "clear_removes_only_session_rows",
            clear_removes_only_session_rows(factory).await,
        ),
        TestResult::from_result(
            "sequencing",
            "waves_listed_by_order_index",
            waves_listed_by_order_index(factory).await,
        ),
        TestResult::from_result(
            "sequencing",
            "move_item_between_waves",
            move_item_between_waves(factory).await,
        ),
        TestResult::from_result(
            "sequencing",
            "move_into_foreign_wave_rejected",
            move_into_foreign_wave_rejected(factory).await,
        ),
        TestResult::from_result(
            "sequencing",
            "move_missing_item_rejected",
            move_missing_item_rejected(factory).await,
        ),
    ]
}

fn wave(id: &str, session_id: &str, order_index: i64) -> ImplementationWaveRecord {
    ImplementationWaveRecord {
        id: id.to_string(),
        session_id: session_id.to_string(),
        name: format!("Wave {}", order_index + 1),
        order_index,
        start_estimate: None,
        end_estimate: None,
    }
}

fn item(id: &str, session_id: &str, wave_id: &str, order_index: i64) -> ImplementationItemRecord {
    ImplementationItemRecord {
        id: id.to_string(),
        session_id: session_id.to_string(),
        wave_id: wave_id.to_string(),
        solution_id: format!("sol-{id}"),
        title: format!("Item {id}"),
        order_index,
    }
}

/// Commit two waves, two items and one dependency of each kind.
async fn seed_plan<S: SynthesisStorage>(s: &S, session_id: &str) -> Result<(), String> {
    seed_session(s, session_id).await?;
    let w1 = format!("{session_id}-w1");
    let w2 = format!("{session_id}-w2");
    let i1 = format!("{session_id}-i1");
    let i2 = format!("{session_id}-i2");

    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.insert_wave(&mut snap, wave(&w1, session_id, 0))
        .await
        .map_err(|e| format!("wave 1: {e}"))?;
    s.insert_wave(&mut snap, wave(&w2, session_id, 1))
        .await
        .map_err(|e| format!("wave 2: {e}"))?;
    s.insert_implementation_item(&mut snap, item(&i1, session_id, &w1, 0))
        .await
        .map_err(|e| format!("item 1: {e}"))?;
    s.insert_implementation_item(&mut snap, item(&i2, session_id, &w2, 0))
        .await
        .map_err(|e| format!("item 2: {e}"))?;
    s.insert_solution_dependency(
        &mut snap,
        SolutionDependencyRecord {
            id: format!("{session_id}-sd1"),
            session_id: session_id.to_string(),
            solution_id: format!("sol-{i2}"),
            depends_on_solution_id: format!("sol-{i1}"),
            reason: Some("needs the new form first".to_string()),
        },
    )
    .await
    .map_err(|e| format!("solution dependency: {e}"))?;
    s.insert_implementation_dependency(
        &mut snap,
        ImplementationDependencyRecord {
            id: format!("{session_id}-id1"),
            session_id: session_id.to_string(),
            item_id: i2.clone(),
            depends_on_item_id: i1.clone(),
        },
    )
    .await
    .map_err(|e| format!("implementation dependency: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))
}

async fn clear_removes_only_session_rows<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_plan(&s, "s-1").await?;
    seed_plan(&s, "s-2").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let cleared = s
        .clear_sequencing(&mut snap, "s-1")
        .await
        .map_err(|e| format!("clear: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    if (cleared.waves, cleared.items) != (2, 2)
        || (cleared.solution_dependencies, cleared.implementation_dependencies) != (1, 1)
    {
        return Err(format!("unexpected cleared counts: {cleared:?}"));
    }
    let s1_waves = s.list_waves("s-1").await.map_err(|e| format!("list: {e}"))?;
    if !s1_waves.is_empty() {
        return Err(format!("s-1 still has {} waves", s1_waves.len()));
    }
    let s2_items = s
        .list_implementation_items("s-2")
        .await
        .map_err(|e| format!("list items: {e}"))?;
    let s2_deps = s
        .list_implementation_dependencies("s-2")
        .await
        .map_err(|e| format!("list deps: {e}"))?;
    if s2_items.len() != 2 || s2_deps.len() != 1 {
        return Err(format!(
            "s-2 plan was touched: {} items, {} dependencies",
            s2_items.len(),
            s2_deps.len()
        ));
    }
    Ok(())
}

async fn waves_listed_by_order_index<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_session(&s, "s-1").await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    for (id, order) in [("w-c", 2), ("w-a", 0), ("w-b", 1)] {
        s.insert_wave(&mut snap, wave(id, "s-1", order))
            .await
            .map_err(|e| format!("wave {id}: {e}"))?;
    }
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let ids: Vec<String> = s
        .list_waves("s-1")
        .await
        .map_err(|e| format!("list: {e}"))?
        .into_iter()
        .map(|w| w.id)
        .collect();
    if ids != ["w-a", "w-b", "w-c"] {
        return Err(format!("expected [w-a, w-b, w-c], got {ids:?}"));
    }
    Ok(())
}

async fn move_item_between_waves<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_plan(&s, "s-1").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let moved = s
        .move_implementation_item(&mut snap, "s-1-i1", "s-1-w2", 3)
        .await
        .map_err(|e| format!("move: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    if moved.wave_id != "s-1-w2" || moved.order_index != 3 {
        return Err(format!("unexpected moved item: {moved:?}"));
    }
    let items = s
        .list_implementation_items("s-1")
        .await
        .map_err(|e| format!("list: {e}"))?;
    let stored = items
        .iter()
        .find(|i| i.id == "s-1-i1")
        .ok_or("moved item missing")?;
    if stored.wave_id != "s-1-w2" {
        return Err(format!("move not persisted: {stored:?}"));
    }
    Ok(())
}

async fn move_into_foreign_wave_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_plan(&s, "s-1").await?;
    seed_plan(&s, "s-2").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let result = s
        .move_implementation_item(&mut snap, "s-1-i1", "s-2-w1", 0)
        .await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::ItemNotFound { kind: "wave", .. }) => Ok(()),
        other => Err(format!("expected ItemNotFound(wave), got {other:?}")),
    }
}

async fn move_missing_item_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_plan(&s, "s-1").await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let result = s
        .move_implementation_item(&mut snap, "ghost", "s-1-w1", 0)
        .await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::ItemNotFound { .. }) => Ok(()),
        other => Err(format!("expected ItemNotFound, got {other:?}")),
    }
}
