use serde::{Deserialize, Serialize};

// ── Enumerated attributes ─────────────────────────────────────────────────────

/// Which kind of change a solution card proposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolutionBucket {
    Eliminate,
    Modify,
    Create,
}

/// Review status of a solution card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolutionStatus {
    Draft,
    Accepted,
    Rejected,
}

/// Terminal status of an agent run. Runs are written once, on completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRunStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FutureStateStatus {
    Draft,
    Locked,
}

/// What the redesigned process does with a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeAction {
    Eliminate,
    Modify,
    Create,
    Unchanged,
}

/// Whether an information flow belongs to the current process or to a
/// future state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStateType {
    Current,
    Future,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
    Data,
    Document,
    Approval,
    System,
    Notification,
}

macro_rules! str_enum {
    ($ty:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $ty {
            /// The snake_case name used in storage and on the wire.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $s),+
                }
            }

            /// Parse the snake_case name back into the enum.
            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($s => Some($ty::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(SolutionBucket { Eliminate => "eliminate", Modify => "modify", Create => "create" });
str_enum!(SolutionStatus { Draft => "draft", Accepted => "accepted", Rejected => "rejected" });
str_enum!(AgentRunStatus { Succeeded => "succeeded", Failed => "failed" });
str_enum!(FutureStateStatus { Draft => "draft", Locked => "locked" });
str_enum!(NodeAction {
    Eliminate => "eliminate",
    Modify => "modify",
    Create => "create",
    Unchanged => "unchanged",
});
str_enum!(FlowStateType { Current => "current", Future => "future" });
str_enum!(FlowType {
    Data => "data",
    Document => "document",
    Approval => "approval",
    System => "system",
    Notification => "notification",
});

// ── Inputs owned by external collaborators ────────────────────────────────────

/// A waste-walk session. Identity never changes once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub name: String,
    /// Process the session observes.
    #[serde(default)]
    pub process_id: Option<String>,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub created_at: String,
}

/// A step of the current-state process graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStepRecord {
    pub id: String,
    pub session_id: String,
    pub name: String,
    pub lane: String,
    #[serde(default)]
    pub cycle_time_minutes: Option<f64>,
    #[serde(default)]
    pub wait_time_minutes: Option<f64>,
}

/// A directed connection between two current-state steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessConnectionRecord {
    pub id: String,
    pub session_id: String,
    pub source_step_id: String,
    pub target_step_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionCardRecord {
    pub id: String,
    pub session_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub bucket: SolutionBucket,
    pub status: SolutionStatus,
    #[serde(default)]
    pub effort_level: Option<String>,
    /// Wave the author suggested; the planner may ignore it.
    #[serde(default)]
    pub recommended_wave: Option<i64>,
    /// Solution IDs this one depends on.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub affected_step_ids: Vec<String>,
}

// ── Agent runs ────────────────────────────────────────────────────────────────

/// One completed invocation of an external generation capability.
///
/// Written once and never mutated. Succeeded runs double as cache entries
/// keyed by `(session_id, agent_type, input_fingerprint)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRunRecord {
    pub id: String,
    pub session_id: String,
    pub agent_type: String,
    pub input_fingerprint: String,
    pub status: AgentRunStatus,
    pub provider: String,
    pub model: String,
    /// Validated structured output. None for failed runs.
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub started_at: String,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub completed_at: String,
}

// ── Future states ─────────────────────────────────────────────────────────────

/// A versioned snapshot of a redesigned process. Append-only: a rerun
/// creates a new version instead of updating this row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FutureStateRecord {
    pub id: String,
    pub session_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub version: i64,
    pub status: FutureStateStatus,
    /// Designer run that produced this version, if any.
    #[serde(default)]
    pub agent_run_id: Option<String>,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FutureStateNodeRecord {
    pub id: String,
    pub future_state_id: String,
    /// Provenance link to the current-state step, not ownership.
    #[serde(default)]
    pub source_step_id: Option<String>,
    pub name: String,
    pub action: NodeAction,
    pub lane: String,
    #[serde(default)]
    pub cycle_time_minutes: Option<f64>,
    #[serde(default)]
    pub wait_time_minutes: Option<f64>,
    #[serde(default)]
    pub position_x: f64,
    #[serde(default)]
    pub position_y: f64,
    #[serde(default)]
    pub solution_id: Option<String>,
    /// Optimistic-concurrency counter, incremented on every update.
    #[serde(default)]
    pub revision: i64,
}

/// Partial update of a future-state node. `None` leaves the field as is.
///
/// The nullable fields use a nested option: `Some(None)` clears them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeChanges {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub action: Option<NodeAction>,
    #[serde(default)]
    pub lane: Option<String>,
    #[serde(
        default,
        deserialize_with = "present_or_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub cycle_time_minutes: Option<Option<f64>>,
    #[serde(
        default,
        deserialize_with = "present_or_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub wait_time_minutes: Option<Option<f64>>,
    #[serde(default)]
    pub position_x: Option<f64>,
    #[serde(default)]
    pub position_y: Option<f64>,
    #[serde(
        default,
        deserialize_with = "present_or_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub solution_id: Option<Option<String>>,
}

/// Distinguishes an explicit `null` (clear) from an absent field (keep).
fn present_or_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl NodeChanges {
    /// True if applying these changes would not alter any field.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.action.is_none()
            && self.lane.is_none()
            && self.cycle_time_minutes.is_none()
            && self.wait_time_minutes.is_none()
            && self.position_x.is_none()
            && self.position_y.is_none()
            && self.solution_id.is_none()
    }

    /// Apply the changes to a node record in place. Does not touch `revision`.
    pub fn apply_to(&self, node: &mut FutureStateNodeRecord) {
        if let Some(name) = &self.name {
            node.name = name.clone();
        }
        if let Some(action) = self.action {
            node.action = action;
        }
        if let Some(lane) = &self.lane {
            node.lane = lane.clone();
        }
        if let Some(v) = self.cycle_time_minutes {
            node.cycle_time_minutes = v;
        }
        if let Some(v) = self.wait_time_minutes {
            node.wait_time_minutes = v;
        }
        if let Some(x) = self.position_x {
            node.position_x = x;
        }
        if let Some(y) = self.position_y {
            node.position_y = y;
        }
        if let Some(solution_id) = &self.solution_id {
            node.solution_id = solution_id.clone();
        }
    }
}

/// A directed edge between two nodes of the same future state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FutureStateEdgeRecord {
    pub id: String,
    pub future_state_id: String,
    pub source_node_id: String,
    pub target_node_id: String,
    #[serde(default)]
    pub label: Option<String>,
    /// Position among the edges leaving `source_node_id`.
    pub order_index: i64,
}

/// Partial update of an edge. `label: Some(None)` clears the label.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeChanges {
    #[serde(
        default,
        deserialize_with = "present_or_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub label: Option<Option<String>>,
    #[serde(default)]
    pub order_index: Option<i64>,
}

impl EdgeChanges {
    pub fn apply_to(&self, edge: &mut FutureStateEdgeRecord) {
        if let Some(label) = &self.label {
            edge.label = label.clone();
        }
        if let Some(order_index) = self.order_index {
            edge.order_index = order_index;
        }
    }
}

// ── Implementation plan ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImplementationWaveRecord {
    pub id: String,
    pub session_id: String,
    pub name: String,
    pub order_index: i64,
    #[serde(default)]
    pub start_estimate: Option<String>,
    #[serde(default)]
    pub end_estimate: Option<String>,
}

/// Ordered placement of one solution inside one wave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImplementationItemRecord {
    pub id: String,
    pub session_id: String,
    pub wave_id: String,
    pub solution_id: String,
    pub title: String,
    pub order_index: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionDependencyRecord {
    pub id: String,
    pub session_id: String,
    pub solution_id: String,
    pub depends_on_solution_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImplementationDependencyRecord {
    pub id: String,
    pub session_id: String,
    pub item_id: String,
    pub depends_on_item_id: String,
}

/// Row counts removed by a sequencing rebuild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencingCleared {
    pub waves: usize,
    pub items: usize,
    pub solution_dependencies: usize,
    pub implementation_dependencies: usize,
}

// ── Information flows and comparisons ─────────────────────────────────────────

/// An exchange between two steps (current) or two future-state nodes (future).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InformationFlowRecord {
    pub id: String,
    pub session_id: String,
    pub state_type: FlowStateType,
    /// Set only for `state_type = future`.
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
    /// 1..=5
    pub completeness_score: i64,
    /// 1..=5
    pub accuracy_score: i64,
    /// 1..=5
    pub timeliness_score: i64,
    #[serde(default)]
    pub waste_types: Vec<String>,
}

impl InformationFlowRecord {
    /// Composite quality: sum of the three sub-scores (3..=15 for valid flows).
    pub fn quality_score(&self) -> i64 {
        self.completeness_score + self.accuracy_score + self.timeliness_score
    }
}

/// Stored diff result for a (session, future state) pair. Regeneration
/// replaces the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowComparisonRecord {
    pub id: String,
    pub session_id: String,
    pub future_state_id: String,
    pub eliminated_count: i64,
    pub added_count: i64,
    pub modified_count: i64,
    pub unchanged_count: i64,
    pub avg_quality_improvement: f64,
    pub waste_reduction_count: i64,
    /// Categorized item lists as produced by the comparison engine.
    pub items: serde_json::Value,
    /// ISO 8601 / RFC 3339 timestamp string.
    pub generated_at: String,
}
