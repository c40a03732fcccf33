//! Conformance test suite for `SynthesisStorage` implementations.
//!
//! This module provides a backend-agnostic test suite that any
//! `SynthesisStorage` implementation can run to verify correctness. The suite
//! covers:
//!
//! - **Snapshot isolation**: commit makes writes visible, abort and drop discard them
//! - **Version assignment**: `max + 1` per session, duplicate-version backstop
//! - **Revision / OCC**: conditional node updates, conflict vs not-found
//! - **Edge invariants**: self-loop and duplicate rejection, per-source order index
//! - **Sequencing**: session-scoped clear, manual item moves
//! - **Agent runs**: most recent succeeded run is the cache entry
//! - **Comparisons and flows**: replace-not-merge, side filtering
//! - **Concurrency**: racing writers on one revision or one session
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty storage instance for each test:
//!
//! ```ignore
//! use leanflow_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn sqlite_conformance() {
//!     let report = run_conformance_suite(|| async {
//!         SqliteStorage::open_in_memory().expect("open")
//!     }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod comparison;
mod concurrent;
mod edges;
mod revision;
mod runs;
mod sequencing;
mod snapshot;
mod version;

use std::fmt;
use std::future::Future;

use crate::record::{
    AgentRunRecord, AgentRunStatus, FutureStateEdgeRecord, FutureStateNodeRecord,
    FutureStateRecord, FutureStateStatus, NodeAction, SessionRecord,
};
use crate::SynthesisStorage;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "snapshot", "revision", "edges").
    pub category: String,
    /// Test name (e.g. "stale_revision_conflicts").
    pub name: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        let (passed, message) = match result {
            Ok(()) => (true, None),
            Err(msg) => (false, Some(msg)),
        };
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed,
            message,
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a storage backend.
///
/// The `factory` function is called once per test to create a fresh, empty
/// storage instance, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: SynthesisStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(snapshot::run_snapshot_tests(&factory).await);
    results.extend(version::run_version_tests(&factory).await);
    results.extend(revision::run_revision_tests(&factory).await);
    results.extend(edges::run_edge_tests(&factory).await);
    results.extend(sequencing::run_sequencing_tests(&factory).await);
    results.extend(runs::run_agent_run_tests(&factory).await);
    results.extend(comparison::run_comparison_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers: record constructors and seeding ─────────────────────────────────

fn make_session(id: &str) -> SessionRecord {
    SessionRecord {
        id: id.to_string(),
        name: format!("Waste walk {id}"),
        process_id: Some("process-1".to_string()),
        created_at: "2026-01-01T00:00:00Z".to_string(),
    }
}

fn make_future_state(id: &str, session_id: &str, version: i64) -> FutureStateRecord {
    FutureStateRecord {
        id: id.to_string(),
        session_id: session_id.to_string(),
        name: format!("Redesign v{version}"),
        description: None,
        version,
        status: FutureStateStatus::Draft,
        agent_run_id: None,
        created_at: "2026-01-01T00:00:00Z".to_string(),
    }
}

fn make_node(id: &str, future_state_id: &str, revision: i64) -> FutureStateNodeRecord {
    FutureStateNodeRecord {
        id: id.to_string(),
        future_state_id: future_state_id.to_string(),
        source_step_id: None,
        name: format!("Step {id}"),
        action: NodeAction::Unchanged,
        lane: "Finance".to_string(),
        cycle_time_minutes: Some(10.0),
        wait_time_minutes: None,
        position_x: 0.0,
        position_y: 0.0,
        solution_id: None,
        revision,
    }
}

fn make_edge(
    id: &str,
    future_state_id: &str,
    source: &str,
    target: &str,
    order_index: i64,
) -> FutureStateEdgeRecord {
    FutureStateEdgeRecord {
        id: id.to_string(),
        future_state_id: future_state_id.to_string(),
        source_node_id: source.to_string(),
        target_node_id: target.to_string(),
        label: None,
        order_index,
    }
}

fn make_agent_run(
    id: &str,
    session_id: &str,
    fingerprint: &str,
    status: AgentRunStatus,
    completed_at: &str,
) -> AgentRunRecord {
    let succeeded = status == AgentRunStatus::Succeeded;
    AgentRunRecord {
        id: id.to_string(),
        session_id: session_id.to_string(),
        agent_type: "design".to_string(),
        input_fingerprint: fingerprint.to_string(),
        status,
        provider: "test".to_string(),
        model: "test-model".to_string(),
        output: succeeded.then(|| serde_json::json!({"run": id})),
        error: (!succeeded).then(|| "upstream failed".to_string()),
        started_at: completed_at.to_string(),
        completed_at: completed_at.to_string(),
    }
}

/// Commit a session in its own snapshot.
async fn seed_session<S: SynthesisStorage>(s: &S, session_id: &str) -> Result<(), String> {
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.insert_session(&mut snap, make_session(session_id))
        .await
        .map_err(|e| format!("insert session: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit session: {e}"))
}

/// Commit a session, one future state at version 1 and the given nodes at
/// revision `revision`.
async fn seed_graph<S: SynthesisStorage>(
    s: &S,
    session_id: &str,
    future_state_id: &str,
    node_ids: &[&str],
    revision: i64,
) -> Result<(), String> {
    seed_session(s, session_id).await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.insert_future_state(&mut snap, make_future_state(future_state_id, session_id, 1))
        .await
        .map_err(|e| format!("insert future state: {e}"))?;
    for id in node_ids {
        s.insert_future_state_node(&mut snap, make_node(id, future_state_id, revision))
            .await
            .map_err(|e| format!("insert node {id}: {e}"))?;
    }
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit graph: {e}"))
}
