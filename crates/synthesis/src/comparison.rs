//! Current-state vs future-state information-flow diff.
//!
//! Flows are matched by case-insensitive name only. A renamed flow therefore
//! shows up as one eliminated and one added entry, not as modified.

use std::collections::{HashMap, HashSet};

use leanflow_storage::{
    FlowComparisonRecord, FlowStateType, FlowType, InformationFlowRecord, SynthesisStorage,
};
use serde::{Deserialize, Serialize};

use crate::error::SynthesisError;
use crate::{new_id, now_rfc3339};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowChange {
    Eliminated,
    Added,
    Modified,
    Unchanged,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WasteChanges {
    /// Waste types on the current flow that the future flow no longer has.
    pub removed: Vec<String>,
    /// Waste types the future flow introduces.
    pub added: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparedFlow {
    pub name: String,
    pub change: FlowChange,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<InformationFlowRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub future: Option<InformationFlowRecord>,
    /// `future.quality_score - current.quality_score` for matched flows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_change: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waste_changes: Option<WasteChanges>,
    #[serde(default)]
    pub flow_type_changed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub eliminated_count: usize,
    pub added_count: usize,
    pub modified_count: usize,
    pub unchanged_count: usize,
    /// Mean quality change over modified flows, 0 when none were modified.
    pub avg_quality_improvement: f64,
    /// Total waste types removed across modified flows.
    pub waste_reduction_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowComparison {
    pub summary: ComparisonSummary,
    pub eliminated: Vec<ComparedFlow>,
    pub added: Vec<ComparedFlow>,
    pub modified: Vec<ComparedFlow>,
    pub unchanged: Vec<ComparedFlow>,
}

/// Name index that keeps first-seen order but lets the last flow with a
/// given key own it.
fn index_by_name(flows: &[InformationFlowRecord]) -> (Vec<String>, HashMap<String, &InformationFlowRecord>) {
    let mut order = Vec::new();
    let mut index = HashMap::new();
    for flow in flows {
        let key = flow.name.to_lowercase();
        if index.insert(key.clone(), flow).is_none() {
            order.push(key);
        }
    }
    (order, index)
}

/// Members of `left` missing from `right`, in `left`'s order, without repeats.
fn difference(left: &[String], right: &[String]) -> Vec<String> {
    let right: HashSet<&str> = right.iter().map(String::as_str).collect();
    let mut seen = HashSet::new();
    left.iter()
        .filter(|w| !right.contains(w.as_str()) && seen.insert(w.as_str()))
        .cloned()
        .collect()
}

/// Classify every flow of both sides as eliminated, added, modified or
/// unchanged.
pub fn compare_flows(
    current: &[InformationFlowRecord],
    future: &[InformationFlowRecord],
) -> FlowComparison {
    let (current_order, current_index) = index_by_name(current);
    let (future_order, future_index) = index_by_name(future);
    let mut result = FlowComparison::default();

    for key in &current_order {
        let cur = current_index[key];
        let Some(fut) = future_index.get(key).copied() else {
            result.eliminated.push(ComparedFlow {
                name: cur.name.clone(),
                change: FlowChange::Eliminated,
                current: Some(cur.clone()),
                future: None,
                quality_change: None,
                waste_changes: None,
                flow_type_changed: false,
            });
            continue;
        };

        let quality_change = fut.quality_score() - cur.quality_score();
        let waste_changes = WasteChanges {
            removed: difference(&cur.waste_types, &fut.waste_types),
            added: difference(&fut.waste_types, &cur.waste_types),
        };
        let flow_type_changed = cur.flow_type != fut.flow_type;
        let modified = quality_change != 0
            || !waste_changes.removed.is_empty()
            || !waste_changes.added.is_empty()
            || flow_type_changed;

        let compared = ComparedFlow {
            name: cur.name.clone(),
            change: if modified {
                FlowChange::Modified
            } else {
                FlowChange::Unchanged
            },
            current: Some(cur.clone()),
            future: Some(fut.clone()),
            quality_change: Some(quality_change),
            waste_changes: Some(waste_changes),
            flow_type_changed,
        };
        if modified {
            result.modified.push(compared);
        } else {
            result.unchanged.push(compared);
        }
    }

    for key in &future_order {
        if current_index.contains_key(key) {
            continue;
        }
        let fut = future_index[key];
        result.added.push(ComparedFlow {
            name: fut.name.clone(),
            change: FlowChange::Added,
            current: None,
            future: Some(fut.clone()),
            quality_change: None,
            waste_changes: None,
            flow_type_changed: false,
        });
    }

    let quality_total: i64 = result
        .modified
        .iter()
        .filter_map(|f| f.quality_change)
        .sum();
    result.summary = ComparisonSummary {
        eliminated_count: result.eliminated.len(),
        added_count: result.added.len(),
        modified_count: result.modified.len(),
        unchanged_count: result.unchanged.len(),
        avg_quality_improvement: if result.modified.is_empty() {
            0.0
        } else {
            quality_total as f64 / result.modified.len() as f64
        },
        waste_reduction_count: result
            .modified
            .iter()
            .filter_map(|f| f.waste_changes.as_ref())
            .map(|w| w.removed.len())
            .sum(),
    };
    result
}

/// An information flow as submitted by a caller, before it gets an ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowInput {
    /// Inferred from `future_state_id` when omitted.
    #[serde(default)]
    pub state_type: Option<FlowStateType>,
    #[serde(default)]
    pub future_state_id: Option<String>,
    pub source_ref: String,
    pub target_ref: String,
    pub name: String,
    pub flow_type: FlowType,
    #[serde(default)]
    pub is_automated: bool,
    #[serde(default)]
    pub is_real_time: bool,
    pub completeness_score: i64,
    pub accuracy_score: i64,
    pub timeliness_score: i64,
    #[serde(default)]
    pub waste_types: Vec<String>,
}

impl FlowInput {
    pub fn resolved_state_type(&self) -> FlowStateType {
        self.state_type.unwrap_or(if self.future_state_id.is_some() {
            FlowStateType::Future
        } else {
            FlowStateType::Current
        })
    }

    /// Field checks that need no storage access.
    pub fn validate(&self) -> Result<(), SynthesisError> {
        if self.name.trim().is_empty() {
            return Err(SynthesisError::Validation("flow name must not be blank".to_string()));
        }
        for (field, score) in [
            ("completeness_score", self.completeness_score),
            ("accuracy_score", self.accuracy_score),
            ("timeliness_score", self.timeliness_score),
        ] {
            if !(1..=5).contains(&score) {
                return Err(SynthesisError::Validation(format!(
                    "{} must be between 1 and 5, got {}",
                    field, score
                )));
            }
        }
        match (self.resolved_state_type(), &self.future_state_id) {
            (FlowStateType::Future, None) => Err(SynthesisError::Validation(
                "future flows require future_state_id".to_string(),
            )),
            (FlowStateType::Current, Some(_)) => Err(SynthesisError::Validation(
                "current flows must not reference a future state".to_string(),
            )),
            _ => Ok(()),
        }
    }

    pub fn into_record(self, session_id: &str) -> InformationFlowRecord {
        InformationFlowRecord {
            id: new_id(),
            session_id: session_id.to_string(),
            state_type: self.resolved_state_type(),
            future_state_id: self.future_state_id,
            source_ref: self.source_ref,
            target_ref: self.target_ref,
            name: self.name,
            flow_type: self.flow_type,
            is_automated: self.is_automated,
            is_real_time: self.is_real_time,
            completeness_score: self.completeness_score,
            accuracy_score: self.accuracy_score,
            timeliness_score: self.timeliness_score,
            waste_types: self.waste_types,
        }
    }
}

/// Validate and store one information flow of the session.
pub async fn record_information_flow<S: SynthesisStorage>(
    storage: &S,
    session_id: &str,
    input: FlowInput,
) -> Result<InformationFlowRecord, SynthesisError> {
    input.validate()?;
    storage.get_session(session_id).await?;
    if let Some(future_state_id) = &input.future_state_id {
        let future_state = storage.get_future_state(future_state_id).await?;
        if future_state.session_id != session_id {
            return Err(SynthesisError::Validation(format!(
                "future state {} does not belong to session {}",
                future_state_id, session_id
            )));
        }
    }

    let record = input.into_record(session_id);
    let mut snapshot = storage.begin_snapshot().await?;
    storage
        .insert_information_flow(&mut snapshot, record.clone())
        .await?;
    storage.commit_snapshot(snapshot).await?;
    Ok(record)
}

/// Diff the session's current flows against one future state's flows and
/// replace the stored comparison for that pair.
pub async fn generate_flow_comparison<S: SynthesisStorage>(
    storage: &S,
    session_id: &str,
    future_state_id: &str,
) -> Result<FlowComparisonRecord, SynthesisError> {
    storage.get_session(session_id).await?;
    let future_state = storage.get_future_state(future_state_id).await?;
    if future_state.session_id != session_id {
        return Err(SynthesisError::Validation(format!(
            "future state {} does not belong to session {}",
            future_state_id, session_id
        )));
    }

    let current = storage
        .list_information_flows(session_id, FlowStateType::Current, None)
        .await?;
    let future = storage
        .list_information_flows(session_id, FlowStateType::Future, Some(future_state_id))
        .await?;
    let comparison = compare_flows(&current, &future);

    let items = serde_json::json!({
        "eliminated": comparison.eliminated,
        "added": comparison.added,
        "modified": comparison.modified,
        "unchanged": comparison.unchanged,
    });
    let summary = &comparison.summary;
    let record = FlowComparisonRecord {
        id: new_id(),
        session_id: session_id.to_string(),
        future_state_id: future_state_id.to_string(),
        eliminated_count: summary.eliminated_count as i64,
        added_count: summary.added_count as i64,
        modified_count: summary.modified_count as i64,
        unchanged_count: summary.unchanged_count as i64,
        avg_quality_improvement: summary.avg_quality_improvement,
        waste_reduction_count: summary.waste_reduction_count as i64,
        items,
        generated_at: now_rfc3339(),
    };

    let mut snapshot = storage.begin_snapshot().await?;
    storage
        .replace_flow_comparison(&mut snapshot, record.clone())
        .await?;
    storage.commit_snapshot(snapshot).await?;

    tracing::info!(
        session_id,
        future_state_id,
        eliminated = summary.eliminated_count,
        added = summary.added_count,
        modified = summary.modified_count,
        unchanged = summary.unchanged_count,
        "generated flow comparison"
    );
    Ok(record)
}

/// The stored comparison for the pair, or `NotFound` if none was generated.
pub async fn get_flow_comparison<S: SynthesisStorage>(
    storage: &S,
    session_id: &str,
    future_state_id: &str,
) -> Result<FlowComparisonRecord, SynthesisError> {
    storage
        .get_flow_comparison(session_id, future_state_id)
        .await?
        .ok_or_else(|| {
            SynthesisError::NotFound(format!(
                "no flow comparison for session {} and future state {}",
                session_id, future_state_id
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::persist_design_output;
    use crate::testing::{seeded_storage, SESSION};
    use serde_json::json;

    fn flow(name: &str, scores: (i64, i64, i64), waste: &[&str]) -> InformationFlowRecord {
        FlowInput {
            state_type: None,
            future_state_id: None,
            source_ref: "a".into(),
            target_ref: "b".into(),
            name: name.into(),
            flow_type: FlowType::Approval,
            is_automated: false,
            is_real_time: false,
            completeness_score: scores.0,
            accuracy_score: scores.1,
            timeliness_score: scores.2,
            waste_types: waste.iter().map(|w| w.to_string()).collect(),
        }
        .into_record(SESSION)
    }

    #[test]
    fn matched_flow_with_better_quality_is_modified() {
        let current = vec![flow("Invoice Approval", (3, 3, 3), &["Waiting"])];
        let future = vec![flow("invoice approval", (4, 4, 4), &[])];
        let cmp = compare_flows(&current, &future);

        assert_eq!(cmp.summary.modified_count, 1);
        let m = &cmp.modified[0];
        assert_eq!(m.quality_change, Some(3));
        assert_eq!(m.waste_changes.as_ref().unwrap().removed, vec!["Waiting"]);
        assert_eq!(cmp.summary.avg_quality_improvement, 3.0);
        assert_eq!(cmp.summary.waste_reduction_count, 1);
    }

    #[test]
    fn unmatched_flows_are_eliminated_or_added() {
        let current = vec![flow("Paper PO", (2, 2, 2), &["Motion"])];
        let future = vec![flow("EDI order", (5, 5, 5), &[])];
        let cmp = compare_flows(&current, &future);
        assert_eq!(cmp.eliminated[0].name, "Paper PO");
        assert_eq!(cmp.added[0].name, "EDI order");
        assert_eq!(cmp.summary.modified_count, 0);
        assert_eq!(cmp.summary.avg_quality_improvement, 0.0);
    }

    #[test]
    fn identical_flow_is_unchanged() {
        let current = vec![flow("Status email", (3, 4, 2), &["Waiting", "Defects"])];
        let future = vec![flow("STATUS EMAIL", (3, 4, 2), &["Defects", "Waiting"])];
        let cmp = compare_flows(&current, &future);
        assert_eq!(cmp.summary.unchanged_count, 1);
        assert_eq!(cmp.unchanged[0].quality_change, Some(0));
    }

    #[test]
    fn flow_type_change_alone_is_modification() {
        let current = vec![flow("Receipt", (3, 3, 3), &[])];
        let mut future = vec![flow("Receipt", (3, 3, 3), &[])];
        future[0].flow_type = FlowType::System;
        let cmp = compare_flows(&current, &future);
        assert_eq!(cmp.summary.modified_count, 1);
        assert!(cmp.modified[0].flow_type_changed);
    }

    #[test]
    fn last_duplicate_owns_the_name() {
        let current = vec![
            flow("Approval", (1, 1, 1), &[]),
            flow("approval", (3, 3, 3), &[]),
        ];
        let future = vec![flow("Approval", (3, 3, 3), &[])];
        let cmp = compare_flows(&current, &future);
        assert_eq!(cmp.summary.unchanged_count, 1);
        assert_eq!(cmp.summary.eliminated_count, 0);
    }

    #[test]
    fn waste_lists_keep_source_order() {
        let current = vec![flow("Hand-off", (2, 2, 2), &["Waiting", "Motion", "Defects"])];
        let future = vec![flow("Hand-off", (2, 2, 2), &["Inventory", "Motion", "Overproduction"])];
        let cmp = compare_flows(&current, &future);
        let changes = cmp.modified[0].waste_changes.as_ref().unwrap();
        assert_eq!(changes.removed, vec!["Waiting", "Defects"]);
        assert_eq!(changes.added, vec!["Inventory", "Overproduction"]);
        assert_eq!(cmp.summary.waste_reduction_count, 2);
    }

    #[test]
    fn average_is_over_modified_flows_only() {
        let current = vec![
            flow("A", (2, 2, 2), &[]),
            flow("B", (3, 3, 3), &[]),
            flow("C", (3, 3, 3), &[]),
        ];
        let future = vec![
            flow("A", (3, 3, 3), &[]),
            flow("B", (3, 3, 5), &[]),
            flow("C", (3, 3, 3), &[]),
        ];
        let cmp = compare_flows(&current, &future);
        assert_eq!(cmp.summary.modified_count, 2);
        assert_eq!(cmp.summary.avg_quality_improvement, 2.5);
    }

    #[test]
    fn scores_outside_range_rejected() {
        let input = FlowInput {
            state_type: Some(FlowStateType::Current),
            future_state_id: None,
            source_ref: "a".into(),
            target_ref: "b".into(),
            name: "x".into(),
            flow_type: FlowType::Data,
            is_automated: true,
            is_real_time: false,
            completeness_score: 6,
            accuracy_score: 3,
            timeliness_score: 3,
            waste_types: vec![],
        };
        assert_eq!(input.validate().unwrap_err().kind(), "validation");

        let future_without_state = FlowInput {
            state_type: Some(FlowStateType::Future),
            completeness_score: 3,
            ..input
        };
        assert_eq!(
            future_without_state.validate().unwrap_err().kind(),
            "validation"
        );
    }

    fn flow_input(name: &str, future_state_id: Option<&str>, quality: i64) -> FlowInput {
        FlowInput {
            state_type: None,
            future_state_id: future_state_id.map(str::to_string),
            source_ref: "a".into(),
            target_ref: "b".into(),
            name: name.into(),
            flow_type: FlowType::Document,
            is_automated: false,
            is_real_time: false,
            completeness_score: quality,
            accuracy_score: quality,
            timeliness_score: quality,
            waste_types: vec![],
        }
    }

    #[tokio::test]
    async fn regeneration_replaces_stored_comparison() {
        let storage = seeded_storage().await;
        let design = json!({"future_state": {"name": "FS", "nodes": [], "edges": []}});
        let fs = persist_design_output(&storage, SESSION, None, &design)
            .await
            .unwrap()
            .future_state_id;

        record_information_flow(&storage, SESSION, flow_input("Invoice", None, 2))
            .await
            .unwrap();
        record_information_flow(&storage, SESSION, flow_input("invoice", Some(&fs), 4))
            .await
            .unwrap();

        let first = generate_flow_comparison(&storage, SESSION, &fs).await.unwrap();
        assert_eq!(first.modified_count, 1);
        assert_eq!(first.avg_quality_improvement, 6.0);

        record_information_flow(&storage, SESSION, flow_input("Portal upload", Some(&fs), 5))
            .await
            .unwrap();
        let second = generate_flow_comparison(&storage, SESSION, &fs).await.unwrap();
        assert_eq!(second.added_count, 1);

        let stored = get_flow_comparison(&storage, SESSION, &fs).await.unwrap();
        assert_eq!(stored.id, second.id);
        assert_eq!(stored.added_count, 1);
        assert_eq!(stored.items["added"][0]["name"], "Portal upload");
    }

    #[tokio::test]
    async fn comparison_rejects_foreign_future_state() {
        let storage = seeded_storage().await;
        let err = generate_flow_comparison(&storage, SESSION, "fs-ghost")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");

        let err = get_flow_comparison(&storage, SESSION, "fs-ghost")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }
}
