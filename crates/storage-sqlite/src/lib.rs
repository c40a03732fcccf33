//! SQLite backend for [`SynthesisStorage`].
//!
//! One connection is shared behind an async mutex. A snapshot holds the lock
//! for its whole lifetime and runs inside `BEGIN IMMEDIATE`, so snapshots are
//! serialized and a read inside a snapshot (next version, current revision)
//! stays valid until commit. Dropping an unfinished snapshot rolls back.

mod schema;
mod sql;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::Connection;
use tokio::sync::{Mutex, OwnedMutexGuard};

use leanflow_storage::{
    AgentRunRecord, EdgeChanges, FlowComparisonRecord, FlowStateType, FutureStateEdgeRecord,
    FutureStateNodeRecord, FutureStateRecord, FutureStateStatus, ImplementationDependencyRecord,
    ImplementationItemRecord, ImplementationWaveRecord, InformationFlowRecord, NodeChanges,
    ProcessConnectionRecord, ProcessStepRecord, SequencingCleared, SessionRecord,
    SolutionCardRecord, SolutionDependencyRecord, SolutionStatus, StorageError, SynthesisStorage,
};

use sql::SqlResultExt;

/// A `SynthesisStorage` backed by a single SQLite connection.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open (or create) a database file and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let conn = Connection::open(path).backend()?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .backend()?;
        schema::migrate(&conn).backend()?;
        tracing::debug!(path = %path.display(), "opened sqlite storage");
        Ok(Self::from_connection(conn))
    }

    /// A private in-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().backend()?;
        schema::migrate(&conn).backend()?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }
}

/// An open `BEGIN IMMEDIATE` transaction holding the connection lock.
pub struct SqliteSnapshot {
    conn: OwnedMutexGuard<Connection>,
    finished: bool,
}

impl Drop for SqliteSnapshot {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                tracing::warn!(error = %e, "rollback of dropped snapshot failed");
            }
        }
    }
}

#[async_trait]
impl SynthesisStorage for SqliteStorage {
    type Snapshot = SqliteSnapshot;

    async fn begin_snapshot(&self) -> Result<SqliteSnapshot, StorageError> {
        let conn = self.conn.clone().lock_owned().await;
        conn.execute_batch("BEGIN IMMEDIATE").backend()?;
        Ok(SqliteSnapshot {
            conn,
            finished: false,
        })
    }

    async fn commit_snapshot(&self, mut snapshot: SqliteSnapshot) -> Result<(), StorageError> {
        snapshot.conn.execute_batch("COMMIT").backend()?;
        snapshot.finished = true;
        Ok(())
    }

    async fn abort_snapshot(&self, mut snapshot: SqliteSnapshot) -> Result<(), StorageError> {
        snapshot.finished = true;
        snapshot.conn.execute_batch("ROLLBACK").backend()
    }

    async fn insert_session(
        &self,
        snapshot: &mut SqliteSnapshot,
        record: SessionRecord,
    ) -> Result<(), StorageError> {
        sql::insert_session(&snapshot.conn, &record)
    }

    async fn insert_process_step(
        &self,
        snapshot: &mut SqliteSnapshot,
        record: ProcessStepRecord,
    ) -> Result<(), StorageError> {
        sql::insert_process_step(&snapshot.conn, &record)
    }

    async fn insert_process_connection(
        &self,
        snapshot: &mut SqliteSnapshot,
        record: ProcessConnectionRecord,
    ) -> Result<(), StorageError> {
        sql::insert_process_connection(&snapshot.conn, &record)
    }

    async fn upsert_solution(
        &self,
        snapshot: &mut SqliteSnapshot,
        record: SolutionCardRecord,
    ) -> Result<(), StorageError> {
        sql::upsert_solution(&snapshot.conn, &record)
    }

    async fn insert_information_flow(
        &self,
        snapshot: &mut SqliteSnapshot,
        record: InformationFlowRecord,
    ) -> Result<(), StorageError> {
        sql::insert_information_flow(&snapshot.conn, &record)
    }

    async fn insert_agent_run(
        &self,
        snapshot: &mut SqliteSnapshot,
        record: AgentRunRecord,
    ) -> Result<(), StorageError> {
        sql::insert_agent_run(&snapshot.conn, &record)
    }

    async fn next_future_state_version(
        &self,
        snapshot: &mut SqliteSnapshot,
        session_id: &str,
    ) -> Result<i64, StorageError> {
        sql::next_future_state_version(&snapshot.conn, session_id)
    }

    async fn insert_future_state(
        &self,
        snapshot: &mut SqliteSnapshot,
        record: FutureStateRecord,
    ) -> Result<(), StorageError> {
        sql::insert_future_state(&snapshot.conn, &record)
    }

    async fn get_future_state_for_update(
        &self,
        snapshot: &mut SqliteSnapshot,
        future_state_id: &str,
    ) -> Result<FutureStateRecord, StorageError> {
        sql::get_future_state(&snapshot.conn, future_state_id)
    }

    async fn set_future_state_status(
        &self,
        snapshot: &mut SqliteSnapshot,
        future_state_id: &str,
        status: FutureStateStatus,
    ) -> Result<FutureStateRecord, StorageError> {
        sql::set_future_state_status(&snapshot.conn, future_state_id, status)
    }

    async fn insert_future_state_node(
        &self,
        snapshot: &mut SqliteSnapshot,
        record: FutureStateNodeRecord,
    ) -> Result<(), StorageError> {
        sql::insert_node(&snapshot.conn, &record)
    }

    async fn get_future_state_node_for_update(
        &self,
        snapshot: &mut SqliteSnapshot,
        node_id: &str,
    ) -> Result<FutureStateNodeRecord, StorageError> {
        sql::get_node(&snapshot.conn, node_id)
    }

    async fn update_future_state_node(
        &self,
        snapshot: &mut SqliteSnapshot,
        node_id: &str,
        expected_revision: i64,
        changes: &NodeChanges,
    ) -> Result<FutureStateNodeRecord, StorageError> {
        sql::update_node(&snapshot.conn, node_id, expected_revision, changes)
    }

    async fn insert_future_state_edge(
        &self,
        snapshot: &mut SqliteSnapshot,
        record: FutureStateEdgeRecord,
    ) -> Result<(), StorageError> {
        sql::insert_edge(&snapshot.conn, &record)
    }

    async fn find_future_state_edge(
        &self,
        snapshot: &mut SqliteSnapshot,
        future_state_id: &str,
        source_node_id: &str,
        target_node_id: &str,
    ) -> Result<Option<FutureStateEdgeRecord>, StorageError> {
        sql::find_edge(&snapshot.conn, future_state_id, source_node_id, target_node_id)
    }

    async fn max_edge_order_index(
        &self,
        snapshot: &mut SqliteSnapshot,
        future_state_id: &str,
        source_node_id: &str,
    ) -> Result<Option<i64>, StorageError> {
        sql::max_edge_order_index(&snapshot.conn, future_state_id, source_node_id)
    }

    async fn get_future_state_edge_for_update(
        &self,
        snapshot: &mut SqliteSnapshot,
        edge_id: &str,
    ) -> Result<FutureStateEdgeRecord, StorageError> {
        sql::get_edge(&snapshot.conn, edge_id)
    }

    async fn update_future_state_edge(
        &self,
        snapshot: &mut SqliteSnapshot,
        edge_id: &str,
        changes: &EdgeChanges,
    ) -> Result<FutureStateEdgeRecord, StorageError> {
        sql::update_edge(&snapshot.conn, edge_id, changes)
    }

    async fn delete_future_state_edge(
        &self,
        snapshot: &mut SqliteSnapshot,
        edge_id: &str,
    ) -> Result<(), StorageError> {
        sql::delete_edge(&snapshot.conn, edge_id)
    }

    async fn clear_sequencing(
        &self,
        snapshot: &mut SqliteSnapshot,
        session_id: &str,
    ) -> Result<SequencingCleared, StorageError> {
        sql::clear_sequencing(&snapshot.conn, session_id)
    }

    async fn insert_wave(
        &self,
        snapshot: &mut SqliteSnapshot,
        record: ImplementationWaveRecord,
    ) -> Result<(), StorageError> {
        sql::insert_wave(&snapshot.conn, &record)
    }

    async fn insert_implementation_item(
        &self,
        snapshot: &mut SqliteSnapshot,
        record: ImplementationItemRecord,
    ) -> Result<(), StorageError> {
        sql::insert_item(&snapshot.conn, &record)
    }

    async fn insert_solution_dependency(
        &self,
        snapshot: &mut SqliteSnapshot,
        record: SolutionDependencyRecord,
    ) -> Result<(), StorageError> {
        sql::insert_solution_dependency(&snapshot.conn, &record)
    }

    async fn insert_implementation_dependency(
        &self,
        snapshot: &mut SqliteSnapshot,
        record: ImplementationDependencyRecord,
    ) -> Result<(), StorageError> {
        sql::insert_implementation_dependency(&snapshot.conn, &record)
    }

    async fn move_implementation_item(
        &self,
        snapshot: &mut SqliteSnapshot,
        item_id: &str,
        wave_id: &str,
        order_index: i64,
    ) -> Result<ImplementationItemRecord, StorageError> {
        sql::move_item(&snapshot.conn, item_id, wave_id, order_index)
    }

    async fn replace_flow_comparison(
        &self,
        snapshot: &mut SqliteSnapshot,
        record: FlowComparisonRecord,
    ) -> Result<(), StorageError> {
        sql::replace_comparison(&snapshot.conn, &record)
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    async fn get_session(&self, session_id: &str) -> Result<SessionRecord, StorageError> {
        let conn = self.conn.lock().await;
        sql::get_session(&conn, session_id)
    }

    async fn list_process_steps(
        &self,
        session_id: &str,
    ) -> Result<Vec<ProcessStepRecord>, StorageError> {
        let conn = self.conn.lock().await;
        sql::list_process_steps(&conn, session_id)
    }

    async fn list_process_connections(
        &self,
        session_id: &str,
    ) -> Result<Vec<ProcessConnectionRecord>, StorageError> {
        let conn = self.conn.lock().await;
        sql::list_process_connections(&conn, session_id)
    }

    async fn list_solutions(
        &self,
        session_id: &str,
        status: Option<SolutionStatus>,
    ) -> Result<Vec<SolutionCardRecord>, StorageError> {
        let conn = self.conn.lock().await;
        sql::list_solutions(&conn, session_id, status)
    }

    async fn find_succeeded_run(
        &self,
        session_id: &str,
        agent_type: &str,
        input_fingerprint: &str,
    ) -> Result<Option<AgentRunRecord>, StorageError> {
        let conn = self.conn.lock().await;
        sql::find_succeeded_run(&conn, session_id, agent_type, input_fingerprint)
    }

    async fn list_agent_runs(&self, session_id: &str) -> Result<Vec<AgentRunRecord>, StorageError> {
        let conn = self.conn.lock().await;
        sql::list_agent_runs(&conn, session_id)
    }

    async fn get_future_state(
        &self,
        future_state_id: &str,
    ) -> Result<FutureStateRecord, StorageError> {
        let conn = self.conn.lock().await;
        sql::get_future_state(&conn, future_state_id)
    }

    async fn list_future_states(
        &self,
        session_id: &str,
    ) -> Result<Vec<FutureStateRecord>, StorageError> {
        let conn = self.conn.lock().await;
        sql::list_future_states(&conn, session_id)
    }

    async fn get_future_state_node(
        &self,
        node_id: &str,
    ) -> Result<FutureStateNodeRecord, StorageError> {
        let conn = self.conn.lock().await;
        sql::get_node(&conn, node_id)
    }

    async fn list_future_state_nodes(
        &self,
        future_state_id: &str,
    ) -> Result<Vec<FutureStateNodeRecord>, StorageError> {
        let conn = self.conn.lock().await;
        sql::list_nodes(&conn, future_state_id)
    }

    async fn get_future_state_edge(
        &self,
        edge_id: &str,
    ) -> Result<FutureStateEdgeRecord, StorageError> {
        let conn = self.conn.lock().await;
        sql::get_edge(&conn, edge_id)
    }

    async fn list_future_state_edges(
        &self,
        future_state_id: &str,
    ) -> Result<Vec<FutureStateEdgeRecord>, StorageError> {
        let conn = self.conn.lock().await;
        sql::list_edges(&conn, future_state_id)
    }

    async fn list_waves(
        &self,
        session_id: &str,
    ) -> Result<Vec<ImplementationWaveRecord>, StorageError> {
        let conn = self.conn.lock().await;
        sql::list_waves(&conn, session_id)
    }

    async fn list_implementation_items(
        &self,
        session_id: &str,
    ) -> Result<Vec<ImplementationItemRecord>, StorageError> {
        let conn = self.conn.lock().await;
        sql::list_items(&conn, session_id)
    }

    async fn list_solution_dependencies(
        &self,
        session_id: &str,
    ) -> Result<Vec<SolutionDependencyRecord>, StorageError> {
        let conn = self.conn.lock().await;
        sql::list_solution_dependencies(&conn, session_id)
    }

    async fn list_implementation_dependencies(
        &self,
        session_id: &str,
    ) -> Result<Vec<ImplementationDependencyRecord>, StorageError> {
        let conn = self.conn.lock().await;
        sql::list_implementation_dependencies(&conn, session_id)
    }

    async fn list_information_flows(
        &self,
        session_id: &str,
        state_type: FlowStateType,
        future_state_id: Option<&str>,
    ) -> Result<Vec<InformationFlowRecord>, StorageError> {
        let conn = self.conn.lock().await;
        sql::list_flows(&conn, session_id, state_type, future_state_id)
    }

    async fn get_flow_comparison(
        &self,
        session_id: &str,
        future_state_id: &str,
    ) -> Result<Option<FlowComparisonRecord>, StorageError> {
        let conn = self.conn.lock().await;
        sql::get_comparison(&conn, session_id, future_state_id)
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
    async fn file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leanflow.db");
        {
            let storage = SqliteStorage::open(&path).unwrap();
            let mut snap = storage.begin_snapshot().await.unwrap();
            storage
                .insert_session(&mut snap, session("s-1"))
                .await
                .unwrap();
            storage.commit_snapshot(snap).await.unwrap();
        }
        let reopened = SqliteStorage::open(&path).unwrap();
        assert_eq!(reopened.get_session("s-1").await.unwrap().name, "Session s-1");
    }

    #[tokio::test]
    async fn connection_usable_after_dropped_snapshot() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        {
            let mut snap = storage.begin_snapshot().await.unwrap();
            storage
                .insert_session(&mut snap, session("s-1"))
                .await
                .unwrap();
        }
        let mut snap = storage.begin_snapshot().await.unwrap();
        storage
            .insert_session(&mut snap, session("s-2"))
            .await
            .unwrap();
        storage.commit_snapshot(snap).await.unwrap();

        assert!(storage.get_session("s-1").await.is_err());
        assert!(storage.get_session("s-2").await.is_ok());
    }
}
