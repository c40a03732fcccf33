//! Implementation plan: accepted solutions grouped into ordered waves.
//!
//! The plan is rebuilt wholesale from each successful sequencing run. Any
//! manual reassignment made in between is discarded on the next rebuild.

use std::collections::{HashMap, HashSet};

use leanflow_storage::{
    ImplementationDependencyRecord, ImplementationItemRecord, ImplementationWaveRecord,
    SequencingCleared, SolutionCardRecord, SolutionDependencyRecord, SolutionStatus,
    SynthesisStorage,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::SynthesisError;
use crate::new_id;

#[derive(Debug, Deserialize)]
pub(crate) struct SequencingOutput {
    #[serde(default)]
    waves: Vec<PlannedWave>,
    #[serde(default)]
    dependencies: Vec<PlannedDependency>,
}

#[derive(Debug, Deserialize)]
struct PlannedWave {
    name: String,
    #[serde(default)]
    order_index: Option<i64>,
    #[serde(default)]
    start_estimate: Option<String>,
    #[serde(default)]
    end_estimate: Option<String>,
    #[serde(default)]
    solution_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PlannedDependency {
    solution_id: String,
    depends_on_solution_id: String,
    #[serde(default)]
    reason: Option<String>,
}

/// Read a sequencing reply into its typed shape.
pub(crate) fn parse_output(output: &Value) -> Result<SequencingOutput, String> {
    serde_json::from_value(output.clone()).map_err(|e| format!("malformed sequencing output: {}", e))
}

/// Row counts written (and cleared) by one rebuild.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RebuildSummary {
    pub cleared: SequencingCleared,
    pub waves: usize,
    pub items: usize,
    pub solution_dependencies: usize,
    pub implementation_dependencies: usize,
    pub skipped_solutions: usize,
    pub skipped_dependencies: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedWaveView {
    pub wave: ImplementationWaveRecord,
    /// Ordered by `order_index`.
    pub items: Vec<ImplementationItemRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImplementationPlan {
    pub session_id: String,
    pub waves: Vec<PlannedWaveView>,
    pub solution_dependencies: Vec<SolutionDependencyRecord>,
    pub implementation_dependencies: Vec<ImplementationDependencyRecord>,
}

/// Accepted solutions of the session and the agent input built from them.
///
/// Sequencing needs at least one accepted solution; an empty set is a
/// `Validation` error.
pub async fn sequencing_inputs<S: SynthesisStorage>(
    storage: &S,
    session_id: &str,
) -> Result<(Value, Vec<SolutionCardRecord>), SynthesisError> {
    storage.get_session(session_id).await?;
    let accepted = storage
        .list_solutions(session_id, Some(SolutionStatus::Accepted))
        .await?;
    if accepted.is_empty() {
        return Err(SynthesisError::Validation(format!(
            "session {} has no accepted solutions to sequence",
            session_id
        )));
    }

    let inputs = json!({
        "accepted_solution_ids": accepted.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
        "dependencies": accepted
            .iter()
            .map(|s| json!({"solution_id": s.id, "depends_on": s.dependencies}))
            .collect::<Vec<_>>(),
        "solutions": accepted
            .iter()
            .map(|s| json!({
                "id": s.id,
                "title": s.title,
                "bucket": s.bucket,
                "effort_level": s.effort_level,
                "recommended_wave": s.recommended_wave,
                "dependencies": s.dependencies,
                "affected_step_ids": s.affected_step_ids,
            }))
            .collect::<Vec<_>>(),
    });
    Ok((inputs, accepted))
}

/// Delete the session's plan and insert the one described by `output`.
///
/// Wave solution IDs outside `accepted` are skipped, as is a second
/// placement of the same solution. Dependencies with unknown endpoints or
/// pointing at themselves are skipped; the rest also link the two
/// solutions' items when both were placed.
pub async fn rebuild_plan<S: SynthesisStorage>(
    storage: &S,
    session_id: &str,
    output: &Value,
    accepted: &[SolutionCardRecord],
) -> Result<RebuildSummary, SynthesisError> {
    let plan = parse_output(output).map_err(SynthesisError::Validation)?;
    let titles: HashMap<&str, &str> = accepted
        .iter()
        .map(|s| (s.id.as_str(), s.title.as_str()))
        .collect();

    let mut summary = RebuildSummary::default();
    let mut snapshot = storage.begin_snapshot().await?;
    summary.cleared = storage.clear_sequencing(&mut snapshot, session_id).await?;

    let mut item_for_solution: HashMap<String, String> = HashMap::new();
    for (position, planned) in plan.waves.into_iter().enumerate() {
        let wave = ImplementationWaveRecord {
            id: new_id(),
            session_id: session_id.to_string(),
            name: planned.name,
            order_index: planned.order_index.unwrap_or(position as i64),
            start_estimate: planned.start_estimate,
            end_estimate: planned.end_estimate,
        };
        let wave_id = wave.id.clone();
        storage.insert_wave(&mut snapshot, wave).await?;
        summary.waves += 1;

        let mut order_index = 0;
        for solution_id in planned.solution_ids {
            let Some(title) = titles.get(solution_id.as_str()) else {
                tracing::warn!(session_id, %solution_id, "skipping unknown solution in wave");
                summary.skipped_solutions += 1;
                continue;
            };
            if item_for_solution.contains_key(&solution_id) {
                tracing::warn!(session_id, %solution_id, "solution already placed in an earlier wave");
                summary.skipped_solutions += 1;
                continue;
            }
            let item = ImplementationItemRecord {
                id: new_id(),
                session_id: session_id.to_string(),
                wave_id: wave_id.clone(),
                solution_id: solution_id.clone(),
                title: title.to_string(),
                order_index,
            };
            item_for_solution.insert(solution_id, item.id.clone());
            storage.insert_implementation_item(&mut snapshot, item).await?;
            order_index += 1;
            summary.items += 1;
        }
    }

    let mut seen: HashSet<(String, String)> = HashSet::new();
    for dep in plan.dependencies {
        let known = titles.contains_key(dep.solution_id.as_str())
            && titles.contains_key(dep.depends_on_solution_id.as_str());
        if !known || dep.solution_id == dep.depends_on_solution_id {
            tracing::warn!(
                session_id,
                solution_id = %dep.solution_id,
                depends_on = %dep.depends_on_solution_id,
                "skipping invalid solution dependency"
            );
            summary.skipped_dependencies += 1;
            continue;
        }
        if !seen.insert((dep.solution_id.clone(), dep.depends_on_solution_id.clone())) {
            summary.skipped_dependencies += 1;
            continue;
        }

        let items = (
            item_for_solution.get(&dep.solution_id).cloned(),
            item_for_solution.get(&dep.depends_on_solution_id).cloned(),
        );
        storage
            .insert_solution_dependency(
                &mut snapshot,
                SolutionDependencyRecord {
                    id: new_id(),
                    session_id: session_id.to_string(),
                    solution_id: dep.solution_id,
                    depends_on_solution_id: dep.depends_on_solution_id,
                    reason: dep.reason,
                },
            )
            .await?;
        summary.solution_dependencies += 1;

        if let (Some(item_id), Some(depends_on_item_id)) = items {
            storage
                .insert_implementation_dependency(
                    &mut snapshot,
                    ImplementationDependencyRecord {
                        id: new_id(),
                        session_id: session_id.to_string(),
                        item_id,
                        depends_on_item_id,
                    },
                )
                .await?;
            summary.implementation_dependencies += 1;
        }
    }

    storage.commit_snapshot(snapshot).await?;
    tracing::info!(
        session_id,
        cleared_waves = summary.cleared.waves,
        cleared_items = summary.cleared.items,
        waves = summary.waves,
        items = summary.items,
        dependencies = summary.solution_dependencies,
        "rebuilt implementation plan"
    );
    Ok(summary)
}

/// Manually reassign an item. The next rebuild discards this change.
pub async fn move_item<S: SynthesisStorage>(
    storage: &S,
    item_id: &str,
    wave_id: &str,
    order_index: i64,
) -> Result<ImplementationItemRecord, SynthesisError> {
    if order_index < 0 {
        return Err(SynthesisError::Validation(
            "order_index must not be negative".to_string(),
        ));
    }
    let mut snapshot = storage.begin_snapshot().await?;
    let moved = storage
        .move_implementation_item(&mut snapshot, item_id, wave_id, order_index)
        .await?;
    storage.commit_snapshot(snapshot).await?;
    tracing::info!(item_id, wave_id, order_index, "moved implementation item");
    Ok(moved)
}

pub async fn list_plan<S: SynthesisStorage>(
    storage: &S,
    session_id: &str,
) -> Result<ImplementationPlan, SynthesisError> {
    storage.get_session(session_id).await?;
    let waves = storage.list_waves(session_id).await?;
    let mut items = storage.list_implementation_items(session_id).await?;
    items.sort_by_key(|i| i.order_index);

    let waves = waves
        .into_iter()
        .map(|wave| {
            let items = items
                .iter()
                .filter(|i| i.wave_id == wave.id)
                .cloned()
                .collect();
            PlannedWaveView { wave, items }
        })
        .collect();

    Ok(ImplementationPlan {
        session_id: session_id.to_string(),
        waves,
        solution_dependencies: storage.list_solution_dependencies(session_id).await?,
        implementation_dependencies: storage.list_implementation_dependencies(session_id).await?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{seeded_storage, solution, SESSION};
    use leanflow_storage::InMemoryStorage;

    fn two_wave_plan() -> Value {
        json!({
            "waves": [
                {"name": "0-3 months", "order_index": 0, "solution_ids": ["sol-1"]},
                {"name": "3-6 months", "order_index": 1, "start_estimate": "Q2", "solution_ids": ["sol-2"]}
            ],
            "dependencies": [
                {"solution_id": "sol-2", "depends_on_solution_id": "sol-1", "reason": "needs matching"}
            ]
        })
    }

    async fn rebuild(storage: &InMemoryStorage, output: &Value) -> RebuildSummary {
        let (_, accepted) = sequencing_inputs(storage, SESSION).await.unwrap();
        rebuild_plan(storage, SESSION, output, &accepted).await.unwrap()
    }

    #[tokio::test]
    async fn inputs_cover_accepted_solutions_only() {
        let storage = seeded_storage().await;
        let (inputs, accepted) = sequencing_inputs(&storage, SESSION).await.unwrap();
        assert_eq!(accepted.len(), 2);
        assert_eq!(inputs["accepted_solution_ids"], json!(["sol-1", "sol-2"]));
        assert_eq!(inputs["dependencies"][1]["depends_on"], json!(["sol-1"]));
    }

    #[tokio::test]
    async fn no_accepted_solutions_is_validation_error() {
        let storage = seeded_storage().await;
        let mut snap = storage.begin_snapshot().await.unwrap();
        for id in ["sol-1", "sol-2"] {
            storage
                .upsert_solution(&mut snap, solution(id, SolutionStatus::Rejected, &[]))
                .await
                .unwrap();
        }
        storage.commit_snapshot(snap).await.unwrap();

        let err = sequencing_inputs(&storage, SESSION).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn rebuild_writes_waves_items_and_dependencies() {
        let storage = seeded_storage().await;
        let summary = rebuild(&storage, &two_wave_plan()).await;
        assert_eq!(summary.waves, 2);
        assert_eq!(summary.items, 2);
        assert_eq!(summary.solution_dependencies, 1);
        assert_eq!(summary.implementation_dependencies, 1);

        let plan = list_plan(&storage, SESSION).await.unwrap();
        assert_eq!(plan.waves[0].wave.name, "0-3 months");
        assert_eq!(plan.waves[1].wave.start_estimate.as_deref(), Some("Q2"));
        assert_eq!(plan.waves[1].items[0].title, "Solution sol-2");

        let dep = &plan.implementation_dependencies[0];
        assert_eq!(dep.item_id, plan.waves[1].items[0].id);
        assert_eq!(dep.depends_on_item_id, plan.waves[0].items[0].id);
    }

    #[tokio::test]
    async fn rebuild_discards_manual_moves() {
        let storage = seeded_storage().await;
        rebuild(&storage, &two_wave_plan()).await;

        let plan = list_plan(&storage, SESSION).await.unwrap();
        let item = plan.waves[1].items[0].id.clone();
        let first_wave = plan.waves[0].wave.id.clone();
        move_item(&storage, &item, &first_wave, 0).await.unwrap();
        let moved = list_plan(&storage, SESSION).await.unwrap();
        assert_eq!(moved.waves[0].items.len(), 2);
        assert!(moved.waves[1].items.is_empty());

        let summary = rebuild(&storage, &two_wave_plan()).await;
        assert_eq!(summary.cleared.waves, 2);
        assert_eq!(summary.cleared.items, 2);

        let rebuilt = list_plan(&storage, SESSION).await.unwrap();
        assert_eq!(rebuilt.waves.len(), 2);
        assert_eq!(rebuilt.waves[0].items.len(), 1);
        assert_eq!(rebuilt.waves[1].items[0].solution_id, "sol-2");
        assert_eq!(rebuilt.solution_dependencies.len(), 1);
    }

    #[tokio::test]
    async fn unknown_and_repeated_placements_skipped() {
        let storage = seeded_storage().await;
        let output = json!({
            "waves": [
                {"name": "Now", "solution_ids": ["sol-1", "sol-3", "ghost"]},
                {"name": "Later", "solution_ids": ["sol-1", "sol-2"]}
            ],
            "dependencies": [
                {"solution_id": "sol-1", "depends_on_solution_id": "sol-1"},
                {"solution_id": "sol-2", "depends_on_solution_id": "ghost"},
                {"solution_id": "sol-2", "depends_on_solution_id": "sol-1"},
                {"solution_id": "sol-2", "depends_on_solution_id": "sol-1"}
            ]
        });
        let summary = rebuild(&storage, &output).await;
        assert_eq!(summary.items, 2);
        assert_eq!(summary.skipped_solutions, 3);
        assert_eq!(summary.solution_dependencies, 1);
        assert_eq!(summary.skipped_dependencies, 3);

        let plan = list_plan(&storage, SESSION).await.unwrap();
        assert_eq!(plan.waves[0].wave.order_index, 0);
        assert_eq!(plan.waves[1].wave.order_index, 1);
        assert_eq!(plan.waves[1].items[0].order_index, 0);
    }

    #[tokio::test]
    async fn move_rejects_negative_position_and_unknown_wave() {
        let storage = seeded_storage().await;
        rebuild(&storage, &two_wave_plan()).await;
        let plan = list_plan(&storage, SESSION).await.unwrap();
        let item = plan.waves[0].items[0].id.clone();

        let err = move_item(&storage, &item, &plan.waves[1].wave.id, -1)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");

        let err = move_item(&storage, &item, "ghost-wave", 0).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }
}
