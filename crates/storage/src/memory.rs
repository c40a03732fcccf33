//! In-process reference backend.
//!
//! All tables live behind one `tokio::sync::Mutex`. A snapshot owns the lock
//! for its whole lifetime and mutates a working copy of the tables; commit
//! swaps the copy in, abort or drop discards it. Snapshots are therefore fully
//! serialized, which satisfies the trait's read-then-write atomicity contract
//! at the cost of concurrency.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::StorageError;
use crate::record::{
    AgentRunRecord, AgentRunStatus, EdgeChanges, FlowComparisonRecord, FlowStateType,
    FutureStateEdgeRecord, FutureStateNodeRecord, FutureStateRecord, FutureStateStatus,
    ImplementationDependencyRecord, ImplementationItemRecord, ImplementationWaveRecord,
    InformationFlowRecord, NodeChanges, ProcessConnectionRecord, ProcessStepRecord,
    SequencingCleared, SessionRecord, SolutionCardRecord, SolutionDependencyRecord,
    SolutionStatus,
};
use crate::traits::SynthesisStorage;

#[derive(Debug, Clone, Default)]
struct Tables {
    sessions: Vec<SessionRecord>,
    steps: Vec<ProcessStepRecord>,
    connections: Vec<ProcessConnectionRecord>,
    solutions: Vec<SolutionCardRecord>,
    agent_runs: Vec<AgentRunRecord>,
    future_states: Vec<FutureStateRecord>,
    nodes: Vec<FutureStateNodeRecord>,
    edges: Vec<FutureStateEdgeRecord>,
    waves: Vec<ImplementationWaveRecord>,
    items: Vec<ImplementationItemRecord>,
    solution_dependencies: Vec<SolutionDependencyRecord>,
    implementation_dependencies: Vec<ImplementationDependencyRecord>,
    flows: Vec<InformationFlowRecord>,
    comparisons: Vec<FlowComparisonRecord>,
}

impl Tables {
    fn require_session(&self, session_id: &str) -> Result<&SessionRecord, StorageError> {
        self.sessions
            .iter()
            .find(|s| s.id == session_id)
            .ok_or_else(|| StorageError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    fn future_state(&self, future_state_id: &str) -> Result<&FutureStateRecord, StorageError> {
        self.future_states
            .iter()
            .find(|f| f.id == future_state_id)
            .ok_or_else(|| StorageError::FutureStateNotFound {
                future_state_id: future_state_id.to_string(),
            })
    }

    fn node(&self, node_id: &str) -> Result<&FutureStateNodeRecord, StorageError> {
        self.nodes
            .iter()
            .find(|n| n.id == node_id)
            .ok_or_else(|| StorageError::NodeNotFound {
                node_id: node_id.to_string(),
            })
    }

    fn edge(&self, edge_id: &str) -> Result<&FutureStateEdgeRecord, StorageError> {
        self.edges
            .iter()
            .find(|e| e.id == edge_id)
            .ok_or_else(|| StorageError::EdgeNotFound {
                edge_id: edge_id.to_string(),
            })
    }

    fn wave(&self, wave_id: &str) -> Result<&ImplementationWaveRecord, StorageError> {
        self.waves
            .iter()
            .find(|w| w.id == wave_id)
            .ok_or_else(|| StorageError::ItemNotFound {
                kind: "wave",
                id: wave_id.to_string(),
            })
    }
}

fn already_exists(kind: &'static str, id: &str) -> StorageError {
    StorageError::AlreadyExists {
        kind,
        id: id.to_string(),
    }
}

/// Snapshot type of [`InMemoryStorage`]: the table lock plus a working copy.
pub struct MemorySnapshot {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

/// A `SynthesisStorage` kept entirely in memory.
///
/// Cloning yields another handle to the same tables.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SynthesisStorage for InMemoryStorage {
    type Snapshot = MemorySnapshot;

    async fn begin_snapshot(&self) -> Result<MemorySnapshot, StorageError> {
        let guard = self.tables.clone().lock_owned().await;
        let working = guard.clone();
        Ok(MemorySnapshot { guard, working })
    }

    async fn commit_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        let MemorySnapshot { mut guard, working } = snapshot;
        *guard = working;
        Ok(())
    }

    async fn abort_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        drop(snapshot);
        Ok(())
    }

    // ── Session inputs ────────────────────────────────────────────────────────

    async fn insert_session(
        &self,
        snapshot: &mut MemorySnapshot,
        record: SessionRecord,
    ) -> Result<(), StorageError> {
        let t = &mut snapshot.working;
        if t.sessions.iter().any(|s| s.id == record.id) {
            return Err(already_exists("session", &record.id));
        }
        t.sessions.push(record);
        Ok(())
    }

    async fn insert_process_step(
        &self,
        snapshot: &mut MemorySnapshot,
        record: ProcessStepRecord,
    ) -> Result<(), StorageError> {
        let t = &mut snapshot.working;
        t.require_session(&record.session_id)?;
        if t.steps.iter().any(|s| s.id == record.id) {
            return Err(already_exists("process step", &record.id));
        }
        t.steps.push(record);
        Ok(())
    }

    async fn insert_process_connection(
        &self,
        snapshot: &mut MemorySnapshot,
        record: ProcessConnectionRecord,
    ) -> Result<(), StorageError> {
        let t = &mut snapshot.working;
        t.require_session(&record.session_id)?;
        if t.connections.iter().any(|c| c.id == record.id) {
            return Err(already_exists("process connection", &record.id));
        }
        t.connections.push(record);
        Ok(())
    }

    async fn upsert_solution(
        &self,
        snapshot: &mut MemorySnapshot,
        record: SolutionCardRecord,
    ) -> Result<(), StorageError> {
        let t = &mut snapshot.working;
        t.require_session(&record.session_id)?;
        match t.solutions.iter_mut().find(|s| s.id == record.id) {
            Some(existing) => *existing = record,
            None => t.solutions.push(record),
        }
        Ok(())
    }

    async fn insert_information_flow(
        &self,
        snapshot: &mut MemorySnapshot,
        record: InformationFlowRecord,
    ) -> Result<(), StorageError> {
        let t = &mut snapshot.working;
        t.require_session(&record.session_id)?;
        if let Some(fs_id) = &record.future_state_id {
            t.future_state(fs_id)?;
        }
        if t.flows.iter().any(|f| f.id == record.id) {
            return Err(already_exists("information flow", &record.id));
        }
        t.flows.push(record);
        Ok(())
    }

    // ── Agent runs ────────────────────────────────────────────────────────────

    async fn insert_agent_run(
        &self,
        snapshot: &mut MemorySnapshot,
        record: AgentRunRecord,
    ) -> Result<(), StorageError> {
        let t = &mut snapshot.working;
        t.require_session(&record.session_id)?;
        if t.agent_runs.iter().any(|r| r.id == record.id) {
            return Err(already_exists("agent run", &record.id));
        }
        t.agent_runs.push(record);
        Ok(())
    }

    // ── Future states ─────────────────────────────────────────────────────────

    async fn next_future_state_version(
        &self,
        snapshot: &mut MemorySnapshot,
        session_id: &str,
    ) -> Result<i64, StorageError> {
        let t = &snapshot.working;
        t.require_session(session_id)?;
        let max = t
            .future_states
            .iter()
            .filter(|f| f.session_id == session_id)
            .map(|f| f.version)
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }

    async fn insert_future_state(
        &self,
        snapshot: &mut MemorySnapshot,
        record: FutureStateRecord,
    ) -> Result<(), StorageError> {
        let t = &mut snapshot.working;
        t.require_session(&record.session_id)?;
        if t.future_states.iter().any(|f| f.id == record.id) {
            return Err(already_exists("future state", &record.id));
        }
        if t
            .future_states
            .iter()
            .any(|f| f.session_id == record.session_id && f.version == record.version)
        {
            return Err(StorageError::DuplicateVersion {
                session_id: record.session_id,
                version: record.version,
            });
        }
        t.future_states.push(record);
        Ok(())
    }

    async fn get_future_state_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        future_state_id: &str,
    ) -> Result<FutureStateRecord, StorageError> {
        snapshot.working.future_state(future_state_id).cloned()
    }

    async fn set_future_state_status(
        &self,
        snapshot: &mut MemorySnapshot,
        future_state_id: &str,
        status: FutureStateStatus,
    ) -> Result<FutureStateRecord, StorageError> {
        let fs = snapshot
            .working
            .future_states
            .iter_mut()
            .find(|f| f.id == future_state_id)
            .ok_or_else(|| StorageError::FutureStateNotFound {
                future_state_id: future_state_id.to_string(),
            })?;
        fs.status = status;
        Ok(fs.clone())
    }

    async fn insert_future_state_node(
        &self,
        snapshot: &mut MemorySnapshot,
        record: FutureStateNodeRecord,
    ) -> Result<(), StorageError> {
        let t = &mut snapshot.working;
        t.future_state(&record.future_state_id)?;
        if t.nodes.iter().any(|n| n.id == record.id) {
            return Err(already_exists("future state node", &record.id));
        }
        t.nodes.push(record);
        Ok(())
    }

    async fn get_future_state_node_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        node_id: &str,
    ) -> Result<FutureStateNodeRecord, StorageError> {
        snapshot.working.node(node_id).cloned()
    }

    async fn update_future_state_node(
        &self,
        snapshot: &mut MemorySnapshot,
        node_id: &str,
        expected_revision: i64,
        changes: &NodeChanges,
    ) -> Result<FutureStateNodeRecord, StorageError> {
        let node = snapshot
            .working
            .nodes
            .iter_mut()
            .find(|n| n.id == node_id)
            .ok_or_else(|| StorageError::NodeNotFound {
                node_id: node_id.to_string(),
            })?;
        if node.revision != expected_revision {
            return Err(StorageError::RevisionConflict {
                node_id: node_id.to_string(),
                expected_revision,
            });
        }
        changes.apply_to(node);
        node.revision += 1;
        Ok(node.clone())
    }

    async fn insert_future_state_edge(
        &self,
        snapshot: &mut MemorySnapshot,
        record: FutureStateEdgeRecord,
    ) -> Result<(), StorageError> {
        let t = &mut snapshot.working;
        if record.source_node_id == record.target_node_id {
            return Err(StorageError::SelfLoop {
                node_id: record.source_node_id,
            });
        }
        t.future_state(&record.future_state_id)?;
        t.node(&record.source_node_id)?;
        t.node(&record.target_node_id)?;
        if t.edges.iter().any(|e| e.id == record.id) {
            return Err(already_exists("future state edge", &record.id));
        }
        if t.edges.iter().any(|e| {
            e.future_state_id == record.future_state_id
                && e.source_node_id == record.source_node_id
                && e.target_node_id == record.target_node_id
        }) {
            return Err(StorageError::DuplicateEdge {
                future_state_id: record.future_state_id,
                source_node_id: record.source_node_id,
                target_node_id: record.target_node_id,
            });
        }
        t.edges.push(record);
        Ok(())
    }

    async fn find_future_state_edge(
        &self,
        snapshot: &mut MemorySnapshot,
        future_state_id: &str,
        source_node_id: &str,
        target_node_id: &str,
    ) -> Result<Option<FutureStateEdgeRecord>, StorageError> {
        Ok(snapshot
            .working
            .edges
            .iter()
            .find(|e| {
                e.future_state_id == future_state_id
                    && e.source_node_id == source_node_id
                    && e.target_node_id == target_node_id
            })
            .cloned())
    }

    async fn max_edge_order_index(
        &self,
        snapshot: &mut MemorySnapshot,
        future_state_id: &str,
        source_node_id: &str,
    ) -> Result<Option<i64>, StorageError> {
        Ok(snapshot
            .working
            .edges
            .iter()
            .filter(|e| e.future_state_id == future_state_id && e.source_node_id == source_node_id)
            .map(|e| e.order_index)
            .max())
    }

    async fn get_future_state_edge_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        edge_id: &str,
    ) -> Result<FutureStateEdgeRecord, StorageError> {
        snapshot.working.edge(edge_id).cloned()
    }

    async fn update_future_state_edge(
        &self,
        snapshot: &mut MemorySnapshot,
        edge_id: &str,
        changes: &EdgeChanges,
    ) -> Result<FutureStateEdgeRecord, StorageError> {
        let edge = snapshot
            .working
            .edges
            .iter_mut()
            .find(|e| e.id == edge_id)
            .ok_or_else(|| StorageError::EdgeNotFound {
                edge_id: edge_id.to_string(),
            })?;
        changes.apply_to(edge);
        Ok(edge.clone())
    }

    async fn delete_future_state_edge(
        &self,
        snapshot: &mut MemorySnapshot,
        edge_id: &str,
    ) -> Result<(), StorageError> {
        let edges = &mut snapshot.working.edges;
        let before = edges.len();
        edges.retain(|e| e.id != edge_id);
        if edges.len() == before {
            return Err(StorageError::EdgeNotFound {
                edge_id: edge_id.to_string(),
            });
        }
        Ok(())
    }

    // ── Implementation plan ───────────────────────────────────────────────────

    async fn clear_sequencing(
        &self,
        snapshot: &mut MemorySnapshot,
        session_id: &str,
    ) -> Result<SequencingCleared, StorageError> {
        let t = &mut snapshot.working;
        t.require_session(session_id)?;

        fn remove<T>(rows: &mut Vec<T>, belongs: impl Fn(&T) -> bool) -> usize {
            let before = rows.len();
            rows.retain(|r| !belongs(r));
            before - rows.len()
        }

        Ok(SequencingCleared {
            implementation_dependencies: remove(&mut t.implementation_dependencies, |d| {
                d.session_id == session_id
            }),
            solution_dependencies: remove(&mut t.solution_dependencies, |d| {
                d.session_id == session_id
            }),
            items: remove(&mut t.items, |i| i.session_id == session_id),
            waves: remove(&mut t.waves, |w| w.session_id == session_id),
        })
    }

    async fn insert_wave(
        &self,
        snapshot: &mut MemorySnapshot,
        record: ImplementationWaveRecord,
    ) -> Result<(), StorageError> {
        let t = &mut snapshot.working;
        t.require_session(&record.session_id)?;
        if t.waves.iter().any(|w| w.id == record.id) {
            return Err(already_exists("wave", &record.id));
        }
        t.waves.push(record);
        Ok(())
    }

    async fn insert_implementation_item(
        &self,
        snapshot: &mut MemorySnapshot,
        record: ImplementationItemRecord,
    ) -> Result<(), StorageError> {
        let t = &mut snapshot.working;
        t.wave(&record.wave_id)?;
        if t.items.iter().any(|i| i.id == record.id) {
            return Err(already_exists("implementation item", &record.id));
        }
        t.items.push(record);
        Ok(())
    }

    async fn insert_solution_dependency(
        &self,
        snapshot: &mut MemorySnapshot,
        record: SolutionDependencyRecord,
    ) -> Result<(), StorageError> {
        let t = &mut snapshot.working;
        t.require_session(&record.session_id)?;
        t.solution_dependencies.push(record);
        Ok(())
    }

    async fn insert_implementation_dependency(
        &self,
        snapshot: &mut MemorySnapshot,
        record: ImplementationDependencyRecord,
    ) -> Result<(), StorageError> {
        let t = &mut snapshot.working;
        t.require_session(&record.session_id)?;
        t.implementation_dependencies.push(record);
        Ok(())
    }

    async fn move_implementation_item(
        &self,
        snapshot: &mut MemorySnapshot,
        item_id: &str,
        wave_id: &str,
        order_index: i64,
    ) -> Result<ImplementationItemRecord, StorageError> {
        let t = &mut snapshot.working;
        let wave_session = t.wave(wave_id)?.session_id.clone();
        let item = t
            .items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or_else(|| StorageError::ItemNotFound {
                kind: "implementation item",
                id: item_id.to_string(),
            })?;
        if item.session_id != wave_session {
            return Err(StorageError::ItemNotFound {
                kind: "wave",
                id: wave_id.to_string(),
            });
        }
        item.wave_id = wave_id.to_string();
        item.order_index = order_index;
        Ok(item.clone())
    }

    // ── Comparison snapshots ──────────────────────────────────────────────────

    async fn replace_flow_comparison(
        &self,
        snapshot: &mut MemorySnapshot,
        record: FlowComparisonRecord,
    ) -> Result<(), StorageError> {
        let t = &mut snapshot.working;
        t.require_session(&record.session_id)?;
        t.future_state(&record.future_state_id)?;
        t.comparisons.retain(|c| {
            !(c.session_id == record.session_id && c.future_state_id == record.future_state_id)
        });
        t.comparisons.push(record);
        Ok(())
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    async fn get_session(&self, session_id: &str) -> Result<SessionRecord, StorageError> {
        self.tables.lock().await.require_session(session_id).cloned()
    }

    async fn list_process_steps(
        &self,
        session_id: &str,
    ) -> Result<Vec<ProcessStepRecord>, StorageError> {
        let t = self.tables.lock().await;
        Ok(t.steps
            .iter()
            .filter(|s| s.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn list_process_connections(
        &self,
        session_id: &str,
    ) -> Result<Vec<ProcessConnectionRecord>, StorageError> {
        let t = self.tables.lock().await;
        Ok(t.connections
            .iter()
            .filter(|c| c.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn list_solutions(
        &self,
        session_id: &str,
        status: Option<SolutionStatus>,
    ) -> Result<Vec<SolutionCardRecord>, StorageError> {
        let t = self.tables.lock().await;
        Ok(t.solutions
            .iter()
            .filter(|s| s.session_id == session_id)
            .filter(|s| status.map_or(true, |st| s.status == st))
            .cloned()
            .collect())
    }

    async fn find_succeeded_run(
        &self,
        session_id: &str,
        agent_type: &str,
        input_fingerprint: &str,
    ) -> Result<Option<AgentRunRecord>, StorageError> {
        let t = self.tables.lock().await;
        Ok(t.agent_runs
            .iter()
            .rev()
            .find(|r| {
                r.session_id == session_id
                    && r.agent_type == agent_type
                    && r.input_fingerprint == input_fingerprint
                    && r.status == AgentRunStatus::Succeeded
            })
            .cloned())
    }

    async fn list_agent_runs(&self, session_id: &str) -> Result<Vec<AgentRunRecord>, StorageError> {
        let t = self.tables.lock().await;
        Ok(t.agent_runs
            .iter()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn get_future_state(
        &self,
        future_state_id: &str,
    ) -> Result<FutureStateRecord, StorageError> {
        self.tables.lock().await.future_state(future_state_id).cloned()
    }

    async fn list_future_states(
        &self,
        session_id: &str,
    ) -> Result<Vec<FutureStateRecord>, StorageError> {
        let t = self.tables.lock().await;
        let mut states: Vec<FutureStateRecord> = t
            .future_states
            .iter()
            .filter(|f| f.session_id == session_id)
            .cloned()
            .collect();
        states.sort_by_key(|f| f.version);
        Ok(states)
    }

    async fn get_future_state_node(
        &self,
        node_id: &str,
    ) -> Result<FutureStateNodeRecord, StorageError> {
        self.tables.lock().await.node(node_id).cloned()
    }

    async fn list_future_state_nodes(
        &self,
        future_state_id: &str,
    ) -> Result<Vec<FutureStateNodeRecord>, StorageError> {
        let t = self.tables.lock().await;
        Ok(t.nodes
            .iter()
            .filter(|n| n.future_state_id == future_state_id)
            .cloned()
            .collect())
    }

    async fn get_future_state_edge(
        &self,
        edge_id: &str,
    ) -> Result<FutureStateEdgeRecord, StorageError> {
        self.tables.lock().await.edge(edge_id).cloned()
    }

    async fn list_future_state_edges(
        &self,
        future_state_id: &str,
    ) -> Result<Vec<FutureStateEdgeRecord>, StorageError> {
        let t = self.tables.lock().await;
        Ok(t.edges
            .iter()
            .filter(|e| e.future_state_id == future_state_id)
            .cloned()
            .collect())
    }

    async fn list_waves(
        &self,
        session_id: &str,
    ) -> Result<Vec<ImplementationWaveRecord>, StorageError> {
        let t = self.tables.lock().await;
        let mut waves: Vec<ImplementationWaveRecord> = t
            .waves
            .iter()
            .filter(|w| w.session_id == session_id)
            .cloned()
            .collect();
        waves.sort_by_key(|w| w.order_index);
        Ok(waves)
    }

    async fn list_implementation_items(
        &self,
        session_id: &str,
    ) -> Result<Vec<ImplementationItemRecord>, StorageError> {
        let t = self.tables.lock().await;
        Ok(t.items
            .iter()
            .filter(|i| i.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn list_solution_dependencies(
        &self,
        session_id: &str,
    ) -> Result<Vec<SolutionDependencyRecord>, StorageError> {
        let t = self.tables.lock().await;
        Ok(t.solution_dependencies
            .iter()
            .filter(|d| d.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn list_implementation_dependencies(
        &self,
        session_id: &str,
    ) -> Result<Vec<ImplementationDependencyRecord>, StorageError> {
        let t = self.tables.lock().await;
        Ok(t.implementation_dependencies
            .iter()
            .filter(|d| d.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn list_information_flows(
        &self,
        session_id: &str,
        state_type: FlowStateType,
        future_state_id: Option<&str>,
    ) -> Result<Vec<InformationFlowRecord>, StorageError> {
        let t = self.tables.lock().await;
        Ok(t.flows
            .iter()
            .filter(|f| f.session_id == session_id && f.state_type == state_type)
            .filter(|f| match state_type {
                FlowStateType::Current => true,
                FlowStateType::Future => f.future_state_id.as_deref() == future_state_id,
            })
            .cloned()
            .collect())
    }

    async fn get_flow_comparison(
        &self,
        session_id: &str,
        future_state_id: &str,
    ) -> Result<Option<FlowComparisonRecord>, StorageError> {
        let t = self.tables.lock().await;
        Ok(t.comparisons
            .iter()
            .find(|c| c.session_id == session_id && c.future_state_id == future_state_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str) -> SessionRecord {
        SessionRecord {
            id: id.to_string(),
            name: format!("Session {id}"),
            process_id: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[tokio::test]
    async fn dropped_snapshot_discards_writes() {
        let storage = InMemoryStorage::new();
        {
            let mut snap = storage.begin_snapshot().await.unwrap();
            storage
                .insert_session(&mut snap, session("s-1"))
                .await
                .unwrap();
            // dropped without commit
        }
        assert!(matches!(
            storage.get_session("s-1").await,
            Err(StorageError::SessionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn clones_share_tables() {
        let storage = InMemoryStorage::new();
        let other = storage.clone();
        let mut snap = storage.begin_snapshot().await.unwrap();
        storage
            .insert_session(&mut snap, session("s-1"))
            .await
            .unwrap();
        storage.commit_snapshot(snap).await.unwrap();
        assert_eq!(other.get_session("s-1").await.unwrap().id, "s-1");
    }
}
