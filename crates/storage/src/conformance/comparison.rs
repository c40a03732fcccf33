use std::future::Future;

use serde_json::json;

use super::{seed_graph, TestResult};
use crate::{
    FlowComparisonRecord, FlowStateType, FlowType, InformationFlowRecord, StorageError,
    SynthesisStorage,
};

pub(super) async fn run_comparison_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "comparison",
            "replace_does_not_merge",
            replace_does_not_merge(factory).await,
        ),
        TestResult::from_result(
            "comparison",
            "missing_comparison_is_none",
            missing_comparison_is_none(factory).await,
        ),
        TestResult::from_result(
            "comparison",
            "flows_filtered_by_side",
            flows_filtered_by_side(factory).await,
        ),
        TestResult::from_result(
            "comparison",
            "future_flow_requires_future_state",
            future_flow_requires_future_state(factory).await,
        ),
    ]
}

fn comparison(id: &str, eliminated: i64) -> FlowComparisonRecord {
    FlowComparisonRecord {
        id: id.to_string(),
        session_id: "s-1".to_string(),
        future_state_id: "fs-1".to_string(),
        eliminated_count: eliminated,
        added_count: 0,
        modified_count: 0,
        unchanged_count: 0,
        avg_quality_improvement: 0.0,
        waste_reduction_count: 0,
        items: json!({"eliminated": [], "added": [], "modified": [], "unchanged": []}),
        generated_at: "2026-01-01T00:00:00Z".to_string(),
    }
}

fn flow(id: &str, state_type: FlowStateType, future_state_id: Option<&str>) -> InformationFlowRecord {
    InformationFlowRecord {
        id: id.to_string(),
        session_id: "s-1".to_string(),
        state_type,
        future_state_id: future_state_id.map(str::to_string),
        source_ref: "a".to_string(),
        target_ref: "b".to_string(),
        name: format!("Flow {id}"),
        flow_type: FlowType::Document,
        is_automated: false,
        is_real_time: false,
        completeness_score: 3,
        accuracy_score: 3,
        timeliness_score: 3,
        waste_types: vec![],
    }
}

async fn replace_does_not_merge<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_graph(&s, "s-1", "fs-1", &[], 0).await?;
    for (id, eliminated) in [("cmp-1", 4), ("cmp-2", 1)] {
        let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
        s.replace_flow_comparison(&mut snap, comparison(id, eliminated))
            .await
            .map_err(|e| format!("replace {id}: {e}"))?;
        s.commit_snapshot(snap)
            .await
            .map_err(|e| format!("commit: {e}"))?;
    }
    match s.get_flow_comparison("s-1", "fs-1").await {
        Ok(Some(c)) if c.id == "cmp-2" && c.eliminated_count == 1 => Ok(()),
        other => Err(format!("expected only cmp-2, got {other:?}")),
    }
}

async fn missing_comparison_is_none<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_graph(&s, "s-1", "fs-1", &[], 0).await?;
    match s.get_flow_comparison("s-1", "fs-1").await {
        Ok(None) => Ok(()),
        other => Err(format!("expected None, got {other:?}")),
    }
}

async fn flows_filtered_by_side<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_graph(&s, "s-1", "fs-1", &[], 0).await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.insert_future_state(&mut snap, super::make_future_state("fs-2", "s-1", 2))
        .await
        .map_err(|e| format!("fs-2: {e}"))?;
    for record in [
        flow("cur-1", FlowStateType::Current, None),
        flow("fut-1", FlowStateType::Future, Some("fs-1")),
        flow("fut-2", FlowStateType::Future, Some("fs-2")),
    ] {
        s.insert_information_flow(&mut snap, record)
            .await
            .map_err(|e| format!("insert flow: {e}"))?;
    }
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let ids = |flows: Vec<InformationFlowRecord>| -> Vec<String> {
        flows.into_iter().map(|f| f.id).collect()
    };
    let current = s
        .list_information_flows("s-1", FlowStateType::Current, None)
        .await
        .map_err(|e| format!("list current: {e}"))?;
    let future = s
        .list_information_flows("s-1", FlowStateType::Future, Some("fs-1"))
        .await
        .map_err(|e| format!("list future: {e}"))?;
    let (current, future) = (ids(current), ids(future));
    if current != ["cur-1"] || future != ["fut-1"] {
        return Err(format!("unexpected filtering: current={current:?} future={future:?}"));
    }
    Ok(())
}

async fn future_flow_requires_future_state<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_graph(&s, "s-1", "fs-1", &[], 0).await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let result = s
        .insert_information_flow(&mut snap, flow("fut-x", FlowStateType::Future, Some("ghost")))
        .await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::FutureStateNotFound { .. }) => Ok(()),
        other => Err(format!("expected FutureStateNotFound, got {other:?}")),
    }
}
