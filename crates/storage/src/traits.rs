use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{
    AgentRunRecord, EdgeChanges, FlowComparisonRecord, FlowStateType, FutureStateEdgeRecord,
    FutureStateNodeRecord, FutureStateRecord, FutureStateStatus, ImplementationDependencyRecord,
    ImplementationItemRecord, ImplementationWaveRecord, InformationFlowRecord, NodeChanges,
    ProcessConnectionRecord, ProcessStepRecord, SequencingCleared, SessionRecord,
    SolutionCardRecord, SolutionDependencyRecord, SolutionStatus,
};

/// The storage trait for the future-state synthesis pipeline.
///
/// A `SynthesisStorage` implementation provides durable, transactional storage
/// for sessions and their inputs, agent runs, versioned future-state graphs,
/// implementation plans, information flows and comparison snapshots.
///
/// ## Snapshot Semantics
///
/// All mutating operations take `&mut Self::Snapshot`, a type representing an
/// in-progress transaction. The lifecycle is:
///
/// 1. `begin_snapshot()`: start a transaction, returns a `Snapshot`
/// 2. Call mutating methods with `&mut snapshot`
/// 3. `commit_snapshot(snapshot)`: commit and consume the transaction
///    OR `abort_snapshot(snapshot)`: roll back and consume the transaction
///
/// If a `Snapshot` is dropped without committing, the underlying transaction
/// MUST be rolled back.
///
/// Snapshots are serializable with respect to each other: a value read through
/// a snapshot (for example the highest future-state version of a session)
/// cannot be changed by another snapshot before this one commits. That is what
/// makes version assignment and revision checks read-then-write atomic.
///
/// Query methods run outside any snapshot. A task that holds an open snapshot
/// must read through the `*_for_update` / snapshot-taking methods only; calling
/// a query method on the same storage from that task may block until the
/// snapshot ends.
///
/// ## OCC Conflict Detection
///
/// `update_future_state_node` performs an optimistic concurrency check:
/// `UPDATE WHERE revision = expected_revision`. If zero rows are affected and
/// the node exists, the method returns `Err(StorageError::RevisionConflict)`.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` to be used in axum
/// application state and across async task boundaries.
#[async_trait]
pub trait SynthesisStorage: Send + Sync + 'static {
    /// The snapshot (transaction) type used by this storage backend.
    type Snapshot: Send;

    // ── Snapshot lifecycle ────────────────────────────────────────────────────

    /// Begin a new snapshot (transaction).
    async fn begin_snapshot(&self) -> Result<Self::Snapshot, StorageError>;

    /// Commit a snapshot, making all mutations durable.
    async fn commit_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    /// Abort (roll back) a snapshot, discarding all mutations.
    async fn abort_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    // ── Session inputs (within snapshot) ──────────────────────────────────────

    /// Returns `Err(StorageError::AlreadyExists)` if the session ID is taken.
    async fn insert_session(
        &self,
        snapshot: &mut Self::Snapshot,
        record: SessionRecord,
    ) -> Result<(), StorageError>;

    async fn insert_process_step(
        &self,
        snapshot: &mut Self::Snapshot,
        record: ProcessStepRecord,
    ) -> Result<(), StorageError>;

    async fn insert_process_connection(
        &self,
        snapshot: &mut Self::Snapshot,
        record: ProcessConnectionRecord,
    ) -> Result<(), StorageError>;

    /// Insert a solution card, or replace the card with the same ID.
    async fn upsert_solution(
        &self,
        snapshot: &mut Self::Snapshot,
        record: SolutionCardRecord,
    ) -> Result<(), StorageError>;

    async fn insert_information_flow(
        &self,
        snapshot: &mut Self::Snapshot,
        record: InformationFlowRecord,
    ) -> Result<(), StorageError>;

    // ── Agent runs ────────────────────────────────────────────────────────────

    /// Insert a completed agent run. Runs are never updated afterwards.
    async fn insert_agent_run(
        &self,
        snapshot: &mut Self::Snapshot,
        record: AgentRunRecord,
    ) -> Result<(), StorageError>;

    // ── Future states (within snapshot) ───────────────────────────────────────

    /// `max(version) + 1` over the session's future states, or 1 if it has none.
    ///
    /// Returns `Err(StorageError::SessionNotFound)` for an unknown session.
    async fn next_future_state_version(
        &self,
        snapshot: &mut Self::Snapshot,
        session_id: &str,
    ) -> Result<i64, StorageError>;

    /// Returns `Err(StorageError::DuplicateVersion)` if the session already
    /// has a future state with this version.
    async fn insert_future_state(
        &self,
        snapshot: &mut Self::Snapshot,
        record: FutureStateRecord,
    ) -> Result<(), StorageError>;

    async fn get_future_state_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        future_state_id: &str,
    ) -> Result<FutureStateRecord, StorageError>;

    async fn set_future_state_status(
        &self,
        snapshot: &mut Self::Snapshot,
        future_state_id: &str,
        status: FutureStateStatus,
    ) -> Result<FutureStateRecord, StorageError>;

    /// FK: `future_state_id` must reference an existing future state.
    async fn insert_future_state_node(
        &self,
        snapshot: &mut Self::Snapshot,
        record: FutureStateNodeRecord,
    ) -> Result<(), StorageError>;

    async fn get_future_state_node_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        node_id: &str,
    ) -> Result<FutureStateNodeRecord, StorageError>;

    /// Apply a revision-validated UPDATE to a node (OCC).
    ///
    /// The UPDATE is conditional on `revision = expected_revision`.
    /// Returns `Err(StorageError::NodeNotFound)` if the node does not exist and
    /// `Err(StorageError::RevisionConflict)` if it exists at another revision.
    ///
    /// Returns the updated node (revision incremented by one) on success.
    async fn update_future_state_node(
        &self,
        snapshot: &mut Self::Snapshot,
        node_id: &str,
        expected_revision: i64,
        changes: &NodeChanges,
    ) -> Result<FutureStateNodeRecord, StorageError>;

    /// Insert an edge.
    ///
    /// Returns `Err(StorageError::SelfLoop)` when source equals target and
    /// `Err(StorageError::DuplicateEdge)` when an edge already exists for
    /// `(future_state_id, source_node_id, target_node_id)`.
    async fn insert_future_state_edge(
        &self,
        snapshot: &mut Self::Snapshot,
        record: FutureStateEdgeRecord,
    ) -> Result<(), StorageError>;

    async fn find_future_state_edge(
        &self,
        snapshot: &mut Self::Snapshot,
        future_state_id: &str,
        source_node_id: &str,
        target_node_id: &str,
    ) -> Result<Option<FutureStateEdgeRecord>, StorageError>;

    /// Highest `order_index` among edges leaving `source_node_id`, or None.
    async fn max_edge_order_index(
        &self,
        snapshot: &mut Self::Snapshot,
        future_state_id: &str,
        source_node_id: &str,
    ) -> Result<Option<i64>, StorageError>;

    async fn get_future_state_edge_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        edge_id: &str,
    ) -> Result<FutureStateEdgeRecord, StorageError>;

    async fn update_future_state_edge(
        &self,
        snapshot: &mut Self::Snapshot,
        edge_id: &str,
        changes: &EdgeChanges,
    ) -> Result<FutureStateEdgeRecord, StorageError>;

    async fn delete_future_state_edge(
        &self,
        snapshot: &mut Self::Snapshot,
        edge_id: &str,
    ) -> Result<(), StorageError>;

    // ── Implementation plan (within snapshot) ─────────────────────────────────

    /// Delete every wave, implementation item, solution dependency and
    /// implementation dependency of the session.
    async fn clear_sequencing(
        &self,
        snapshot: &mut Self::Snapshot,
        session_id: &str,
    ) -> Result<SequencingCleared, StorageError>;

    async fn insert_wave(
        &self,
        snapshot: &mut Self::Snapshot,
        record: ImplementationWaveRecord,
    ) -> Result<(), StorageError>;

    /// FK: `wave_id` must reference an existing wave.
    async fn insert_implementation_item(
        &self,
        snapshot: &mut Self::Snapshot,
        record: ImplementationItemRecord,
    ) -> Result<(), StorageError>;

    async fn insert_solution_dependency(
        &self,
        snapshot: &mut Self::Snapshot,
        record: SolutionDependencyRecord,
    ) -> Result<(), StorageError>;

    async fn insert_implementation_dependency(
        &self,
        snapshot: &mut Self::Snapshot,
        record: ImplementationDependencyRecord,
    ) -> Result<(), StorageError>;

    /// Move an item into a wave of the same session at the given position.
    ///
    /// Returns `Err(StorageError::ItemNotFound)` when the item or the wave does
    /// not exist (a wave of another session counts as missing).
    async fn move_implementation_item(
        &self,
        snapshot: &mut Self::Snapshot,
        item_id: &str,
        wave_id: &str,
        order_index: i64,
    ) -> Result<ImplementationItemRecord, StorageError>;

    // ── Comparison snapshots (within snapshot) ────────────────────────────────

    /// Replace any stored comparison for `(session_id, future_state_id)`.
    async fn replace_flow_comparison(
        &self,
        snapshot: &mut Self::Snapshot,
        record: FlowComparisonRecord,
    ) -> Result<(), StorageError>;

    // ── Query operations (outside snapshot) ───────────────────────────────────

    /// Returns `Err(StorageError::SessionNotFound)` if not found.
    async fn get_session(&self, session_id: &str) -> Result<SessionRecord, StorageError>;

    async fn list_process_steps(
        &self,
        session_id: &str,
    ) -> Result<Vec<ProcessStepRecord>, StorageError>;

    async fn list_process_connections(
        &self,
        session_id: &str,
    ) -> Result<Vec<ProcessConnectionRecord>, StorageError>;

    /// Solutions of the session in insertion order, optionally filtered by status.
    async fn list_solutions(
        &self,
        session_id: &str,
        status: Option<SolutionStatus>,
    ) -> Result<Vec<SolutionCardRecord>, StorageError>;

    /// Most recent succeeded run for the cache key, ignoring failed runs.
    async fn find_succeeded_run(
        &self,
        session_id: &str,
        agent_type: &str,
        input_fingerprint: &str,
    ) -> Result<Option<AgentRunRecord>, StorageError>;

    /// All runs of the session in insertion order.
    async fn list_agent_runs(&self, session_id: &str) -> Result<Vec<AgentRunRecord>, StorageError>;

    async fn get_future_state(
        &self,
        future_state_id: &str,
    ) -> Result<FutureStateRecord, StorageError>;

    /// Future states of the session ordered by version ascending.
    async fn list_future_states(
        &self,
        session_id: &str,
    ) -> Result<Vec<FutureStateRecord>, StorageError>;

    async fn get_future_state_node(
        &self,
        node_id: &str,
    ) -> Result<FutureStateNodeRecord, StorageError>;

    /// Nodes of the future state in insertion order.
    async fn list_future_state_nodes(
        &self,
        future_state_id: &str,
    ) -> Result<Vec<FutureStateNodeRecord>, StorageError>;

    async fn get_future_state_edge(
        &self,
        edge_id: &str,
    ) -> Result<FutureStateEdgeRecord, StorageError>;

    /// Edges of the future state in insertion order.
    async fn list_future_state_edges(
        &self,
        future_state_id: &str,
    ) -> Result<Vec<FutureStateEdgeRecord>, StorageError>;

    /// Waves of the session ordered by `order_index`.
    async fn list_waves(&self, session_id: &str)
        -> Result<Vec<ImplementationWaveRecord>, StorageError>;

    async fn list_implementation_items(
        &self,
        session_id: &str,
    ) -> Result<Vec<ImplementationItemRecord>, StorageError>;

    async fn list_solution_dependencies(
        &self,
        session_id: &str,
    ) -> Result<Vec<SolutionDependencyRecord>, StorageError>;

    async fn list_implementation_dependencies(
        &self,
        session_id: &str,
    ) -> Result<Vec<ImplementationDependencyRecord>, StorageError>;

    /// Flows of one side. For `Future`, `future_state_id` selects the graph;
    /// for `Current` it is ignored.
    async fn list_information_flows(
        &self,
        session_id: &str,
        state_type: FlowStateType,
        future_state_id: Option<&str>,
    ) -> Result<Vec<InformationFlowRecord>, StorageError>;

    async fn get_flow_comparison(
        &self,
        session_id: &str,
        future_state_id: &str,
    ) -> Result<Option<FlowComparisonRecord>, StorageError>;
}
