//! Synchronous statement helpers. Each takes a `&Connection` and finishes
//! before returning so no statement or borrow crosses an await point.

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;

use leanflow_storage::{
    AgentRunRecord, AgentRunStatus, EdgeChanges, FlowComparisonRecord, FlowStateType, FlowType,
    FutureStateEdgeRecord, FutureStateNodeRecord, FutureStateRecord, FutureStateStatus,
    ImplementationDependencyRecord, ImplementationItemRecord, ImplementationWaveRecord,
    InformationFlowRecord, NodeAction, NodeChanges, ProcessConnectionRecord, ProcessStepRecord,
    SequencingCleared, SessionRecord, SolutionBucket, SolutionCardRecord,
    SolutionDependencyRecord, SolutionStatus, StorageError,
};

pub(crate) trait SqlResultExt<T> {
    fn backend(self) -> Result<T, StorageError>;
}

impl<T> SqlResultExt<T> for rusqlite::Result<T> {
    fn backend(self) -> Result<T, StorageError> {
        self.map_err(|e| StorageError::Backend(e.to_string()))
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|e| StorageError::Backend(format!("encode: {e}")))
}

fn json_col<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn enum_col<T>(row: &Row, idx: usize, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown value '{raw}'").into(),
        )
    })
}

fn exists(conn: &Connection, sql: &str, id: &str) -> Result<bool, StorageError> {
    conn.query_row(sql, [id], |_| Ok(()))
        .optional()
        .map(|r| r.is_some())
        .backend()
}

fn already_exists(kind: &'static str, id: &str) -> StorageError {
    StorageError::AlreadyExists {
        kind,
        id: id.to_string(),
    }
}

fn query_all<T>(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
    map: fn(&Row) -> rusqlite::Result<T>,
) -> Result<Vec<T>, StorageError> {
    let mut stmt = conn.prepare(sql).backend()?;
    let rows = stmt.query_map(params, map).backend()?;
    rows.collect::<rusqlite::Result<Vec<T>>>().backend()
}

// ── Row mappers ───────────────────────────────────────────────────────────────

const SESSION_COLUMNS: &str = "id, name, process_id, created_at";

fn session_row(row: &Row) -> rusqlite::Result<SessionRecord> {
    Ok(SessionRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        process_id: row.get(2)?,
        created_at: row.get(3)?,
    })
}

const STEP_COLUMNS: &str =
    "id, session_id, name, lane, cycle_time_minutes, wait_time_minutes";

fn step_row(row: &Row) -> rusqlite::Result<ProcessStepRecord> {
    Ok(ProcessStepRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        name: row.get(2)?,
        lane: row.get(3)?,
        cycle_time_minutes: row.get(4)?,
        wait_time_minutes: row.get(5)?,
    })
}

const CONNECTION_COLUMNS: &str = "id, session_id, source_step_id, target_step_id";

fn connection_row(row: &Row) -> rusqlite::Result<ProcessConnectionRecord> {
    Ok(ProcessConnectionRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        source_step_id: row.get(2)?,
        target_step_id: row.get(3)?,
    })
}

const SOLUTION_COLUMNS: &str = "id, session_id, title, description, bucket, status, \
     effort_level, recommended_wave, dependencies, affected_step_ids";

fn solution_row(row: &Row) -> rusqlite::Result<SolutionCardRecord> {
    Ok(SolutionCardRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        bucket: enum_col(row, 4, SolutionBucket::parse)?,
        status: enum_col(row, 5, SolutionStatus::parse)?,
        effort_level: row.get(6)?,
        recommended_wave: row.get(7)?,
        dependencies: json_col(row, 8)?,
        affected_step_ids: json_col(row, 9)?,
    })
}

const RUN_COLUMNS: &str = "id, session_id, agent_type, input_fingerprint, status, provider, \
     model, output, error, started_at, completed_at";

fn run_row(row: &Row) -> rusqlite::Result<AgentRunRecord> {
    let output: Option<String> = row.get(7)?;
    let output = output
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;
    Ok(AgentRunRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        agent_type: row.get(2)?,
        input_fingerprint: row.get(3)?,
        status: enum_col(row, 4, AgentRunStatus::parse)?,
        provider: row.get(5)?,
        model: row.get(6)?,
        output,
        error: row.get(8)?,
        started_at: row.get(9)?,
        completed_at: row.get(10)?,
    })
}

const FUTURE_STATE_COLUMNS: &str =
    "id, session_id, name, description, version, status, agent_run_id, created_at";

fn future_state_row(row: &Row) -> rusqlite::Result<FutureStateRecord> {
    Ok(FutureStateRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        version: row.get(4)?,
        status: enum_col(row, 5, FutureStateStatus::parse)?,
        agent_run_id: row.get(6)?,
        created_at: row.get(7)?,
    })
}

const NODE_COLUMNS: &str = "id, future_state_id, source_step_id, name, action, lane, \
     cycle_time_minutes, wait_time_minutes, position_x, position_y, solution_id, revision";

fn node_row(row: &Row) -> rusqlite::Result<FutureStateNodeRecord> {
    Ok(FutureStateNodeRecord {
        id: row.get(0)?,
        future_state_id: row.get(1)?,
        source_step_id: row.get(2)?,
        name: row.get(3)?,
        action: enum_col(row, 4, NodeAction::parse)?,
        lane: row.get(5)?,
        cycle_time_minutes: row.get(6)?,
        wait_time_minutes: row.get(7)?,
        position_x: row.get(8)?,
        position_y: row.get(9)?,
        solution_id: row.get(10)?,
        revision: row.get(11)?,
    })
}

const EDGE_COLUMNS: &str =
    "id, future_state_id, source_node_id, target_node_id, label, order_index";

fn edge_row(row: &Row) -> rusqlite::Result<FutureStateEdgeRecord> {
    Ok(FutureStateEdgeRecord {
        id: row.get(0)?,
        future_state_id: row.get(1)?,
        source_node_id: row.get(2)?,
        target_node_id: row.get(3)?,
        label: row.get(4)?,
        order_index: row.get(5)?,
    })
}

const WAVE_COLUMNS: &str = "id, session_id, name, order_index, start_estimate, end_estimate";

fn wave_row(row: &Row) -> rusqlite::Result<ImplementationWaveRecord> {
    Ok(ImplementationWaveRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        name: row.get(2)?,
        order_index: row.get(3)?,
        start_estimate: row.get(4)?,
        end_estimate: row.get(5)?,
    })
}

const ITEM_COLUMNS: &str = "id, session_id, wave_id, solution_id, title, order_index";

fn item_row(row: &Row) -> rusqlite::Result<ImplementationItemRecord> {
    Ok(ImplementationItemRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        wave_id: row.get(2)?,
        solution_id: row.get(3)?,
        title: row.get(4)?,
        order_index: row.get(5)?,
    })
}

fn solution_dependency_row(row: &Row) -> rusqlite::Result<SolutionDependencyRecord> {
    Ok(SolutionDependencyRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        solution_id: row.get(2)?,
        depends_on_solution_id: row.get(3)?,
        reason: row.get(4)?,
    })
}

fn implementation_dependency_row(row: &Row) -> rusqlite::Result<ImplementationDependencyRecord> {
    Ok(ImplementationDependencyRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        item_id: row.get(2)?,
        depends_on_item_id: row.get(3)?,
    })
}

const FLOW_COLUMNS: &str = "id, session_id, state_type, future_state_id, source_ref, \
     target_ref, name, flow_type, is_automated, is_real_time, completeness_score, \
     accuracy_score, timeliness_score, waste_types";

fn flow_row(row: &Row) -> rusqlite::Result<InformationFlowRecord> {
    Ok(InformationFlowRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        state_type: enum_col(row, 2, FlowStateType::parse)?,
        future_state_id: row.get(3)?,
        source_ref: row.get(4)?,
        target_ref: row.get(5)?,
        name: row.get(6)?,
        flow_type: enum_col(row, 7, FlowType::parse)?,
        is_automated: row.get(8)?,
        is_real_time: row.get(9)?,
        completeness_score: row.get(10)?,
        accuracy_score: row.get(11)?,
        timeliness_score: row.get(12)?,
        waste_types: json_col(row, 13)?,
    })
}

const COMPARISON_COLUMNS: &str = "id, session_id, future_state_id, eliminated_count, \
     added_count, modified_count, unchanged_count, avg_quality_improvement, \
     waste_reduction_count, items, generated_at";

fn comparison_row(row: &Row) -> rusqlite::Result<FlowComparisonRecord> {
    Ok(FlowComparisonRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        future_state_id: row.get(2)?,
        eliminated_count: row.get(3)?,
        added_count: row.get(4)?,
        modified_count: row.get(5)?,
        unchanged_count: row.get(6)?,
        avg_quality_improvement: row.get(7)?,
        waste_reduction_count: row.get(8)?,
        items: json_col(row, 9)?,
        generated_at: row.get(10)?,
    })
}

// ── Lookups shared by snapshot and query paths ───────────────────────────────

pub(crate) fn get_session(conn: &Connection, session_id: &str) -> Result<SessionRecord, StorageError> {
    conn.query_row(
        &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
        [session_id],
        session_row,
    )
    .optional()
    .backend()?
    .ok_or_else(|| StorageError::SessionNotFound {
        session_id: session_id.to_string(),
    })
}

pub(crate) fn get_future_state(
    conn: &Connection,
    future_state_id: &str,
) -> Result<FutureStateRecord, StorageError> {
    conn.query_row(
        &format!("SELECT {FUTURE_STATE_COLUMNS} FROM future_states WHERE id = ?1"),
        [future_state_id],
        future_state_row,
    )
    .optional()
    .backend()?
    .ok_or_else(|| StorageError::FutureStateNotFound {
        future_state_id: future_state_id.to_string(),
    })
}

pub(crate) fn get_node(conn: &Connection, node_id: &str) -> Result<FutureStateNodeRecord, StorageError> {
    conn.query_row(
        &format!("SELECT {NODE_COLUMNS} FROM future_state_nodes WHERE id = ?1"),
        [node_id],
        node_row,
    )
    .optional()
    .backend()?
    .ok_or_else(|| StorageError::NodeNotFound {
        node_id: node_id.to_string(),
    })
}

pub(crate) fn get_edge(conn: &Connection, edge_id: &str) -> Result<FutureStateEdgeRecord, StorageError> {
    conn.query_row(
        &format!("SELECT {EDGE_COLUMNS} FROM future_state_edges WHERE id = ?1"),
        [edge_id],
        edge_row,
    )
    .optional()
    .backend()?
    .ok_or_else(|| StorageError::EdgeNotFound {
        edge_id: edge_id.to_string(),
    })
}

fn get_wave(conn: &Connection, wave_id: &str) -> Result<ImplementationWaveRecord, StorageError> {
    conn.query_row(
        &format!("SELECT {WAVE_COLUMNS} FROM implementation_waves WHERE id = ?1"),
        [wave_id],
        wave_row,
    )
    .optional()
    .backend()?
    .ok_or_else(|| StorageError::ItemNotFound {
        kind: "wave",
        id: wave_id.to_string(),
    })
}

fn get_item(conn: &Connection, item_id: &str) -> Result<ImplementationItemRecord, StorageError> {
    conn.query_row(
        &format!("SELECT {ITEM_COLUMNS} FROM implementation_items WHERE id = ?1"),
        [item_id],
        item_row,
    )
    .optional()
    .backend()?
    .ok_or_else(|| StorageError::ItemNotFound {
        kind: "implementation item",
        id: item_id.to_string(),
    })
}

// ── Session inputs ────────────────────────────────────────────────────────────

pub(crate) fn insert_session(conn: &Connection, r: &SessionRecord) -> Result<(), StorageError> {
    if exists(conn, "SELECT 1 FROM sessions WHERE id = ?1", &r.id)? {
        return Err(already_exists("session", &r.id));
    }
    conn.execute(
        "INSERT INTO sessions (id, name, process_id, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![r.id, r.name, r.process_id, r.created_at],
    )
    .backend()?;
    Ok(())
}

pub(crate) fn insert_process_step(conn: &Connection, r: &ProcessStepRecord) -> Result<(), StorageError> {
    get_session(conn, &r.session_id)?;
    if exists(conn, "SELECT 1 FROM process_steps WHERE id = ?1", &r.id)? {
        return Err(already_exists("process step", &r.id));
    }
    conn.execute(
        &format!("INSERT INTO process_steps ({STEP_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
        params![
            r.id,
            r.session_id,
            r.name,
            r.lane,
            r.cycle_time_minutes,
            r.wait_time_minutes
        ],
    )
    .backend()?;
    Ok(())
}

pub(crate) fn insert_process_connection(
    conn: &Connection,
    r: &ProcessConnectionRecord,
) -> Result<(), StorageError> {
    get_session(conn, &r.session_id)?;
    if exists(conn, "SELECT 1 FROM process_connections WHERE id = ?1", &r.id)? {
        return Err(already_exists("process connection", &r.id));
    }
    conn.execute(
        &format!("INSERT INTO process_connections ({CONNECTION_COLUMNS}) VALUES (?1, ?2, ?3, ?4)"),
        params![r.id, r.session_id, r.source_step_id, r.target_step_id],
    )
    .backend()?;
    Ok(())
}

/// `ON CONFLICT DO UPDATE` keeps the rowid, so list order stays insertion order.
pub(crate) fn upsert_solution(conn: &Connection, r: &SolutionCardRecord) -> Result<(), StorageError> {
    get_session(conn, &r.session_id)?;
    conn.execute(
        &format!(
            "INSERT INTO solutions ({SOLUTION_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
             ON CONFLICT(id) DO UPDATE SET \
               session_id = excluded.session_id, title = excluded.title, \
               description = excluded.description, bucket = excluded.bucket, \
               status = excluded.status, effort_level = excluded.effort_level, \
               recommended_wave = excluded.recommended_wave, \
               dependencies = excluded.dependencies, \
               affected_step_ids = excluded.affected_step_ids"
        ),
        params![
            r.id,
            r.session_id,
            r.title,
            r.description,
            r.bucket.as_str(),
            r.status.as_str(),
            r.effort_level,
            r.recommended_wave,
            to_json(&r.dependencies)?,
            to_json(&r.affected_step_ids)?
        ],
    )
    .backend()?;
    Ok(())
}

pub(crate) fn insert_information_flow(
    conn: &Connection,
    r: &InformationFlowRecord,
) -> Result<(), StorageError> {
    get_session(conn, &r.session_id)?;
    if let Some(fs_id) = &r.future_state_id {
        get_future_state(conn, fs_id)?;
    }
    if exists(conn, "SELECT 1 FROM information_flows WHERE id = ?1", &r.id)? {
        return Err(already_exists("information flow", &r.id));
    }
    conn.execute(
        &format!(
            "INSERT INTO information_flows ({FLOW_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
        ),
        params![
            r.id,
            r.session_id,
            r.state_type.as_str(),
            r.future_state_id,
            r.source_ref,
            r.target_ref,
            r.name,
            r.flow_type.as_str(),
            r.is_automated,
            r.is_real_time,
            r.completeness_score,
            r.accuracy_score,
            r.timeliness_score,
            to_json(&r.waste_types)?
        ],
    )
    .backend()?;
    Ok(())
}

pub(crate) fn insert_agent_run(conn: &Connection, r: &AgentRunRecord) -> Result<(), StorageError> {
    get_session(conn, &r.session_id)?;
    if exists(conn, "SELECT 1 FROM agent_runs WHERE id = ?1", &r.id)? {
        return Err(already_exists("agent run", &r.id));
    }
    let output = r.output.as_ref().map(to_json).transpose()?;
    conn.execute(
        &format!(
            "INSERT INTO agent_runs ({RUN_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
        ),
        params![
            r.id,
            r.session_id,
            r.agent_type,
            r.input_fingerprint,
            r.status.as_str(),
            r.provider,
            r.model,
            output,
            r.error,
            r.started_at,
            r.completed_at
        ],
    )
    .backend()?;
    Ok(())
}

// ── Future states ─────────────────────────────────────────────────────────────

pub(crate) fn next_future_state_version(
    conn: &Connection,
    session_id: &str,
) -> Result<i64, StorageError> {
    get_session(conn, session_id)?;
    let max: Option<i64> = conn
        .query_row(
            "SELECT MAX(version) FROM future_states WHERE session_id = ?1",
            [session_id],
            |row| row.get(0),
        )
        .backend()?;
    Ok(max.unwrap_or(0) + 1)
}

pub(crate) fn insert_future_state(conn: &Connection, r: &FutureStateRecord) -> Result<(), StorageError> {
    get_session(conn, &r.session_id)?;
    if exists(conn, "SELECT 1 FROM future_states WHERE id = ?1", &r.id)? {
        return Err(already_exists("future state", &r.id));
    }
    let taken = conn
        .query_row(
            "SELECT 1 FROM future_states WHERE session_id = ?1 AND version = ?2",
            params![r.session_id, r.version],
            |_| Ok(()),
        )
        .optional()
        .backend()?
        .is_some();
    if taken {
        return Err(StorageError::DuplicateVersion {
            session_id: r.session_id.clone(),
            version: r.version,
        });
    }
    conn.execute(
        &format!(
            "INSERT INTO future_states ({FUTURE_STATE_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
        ),
        params![
            r.id,
            r.session_id,
            r.name,
            r.description,
            r.version,
            r.status.as_str(),
            r.agent_run_id,
            r.created_at
        ],
    )
    .backend()?;
    Ok(())
}

pub(crate) fn set_future_state_status(
    conn: &Connection,
    future_state_id: &str,
    status: FutureStateStatus,
) -> Result<FutureStateRecord, StorageError> {
    get_future_state(conn, future_state_id)?;
    conn.execute(
        "UPDATE future_states SET status = ?1 WHERE id = ?2",
        params![status.as_str(), future_state_id],
    )
    .backend()?;
    get_future_state(conn, future_state_id)
}

pub(crate) fn insert_node(conn: &Connection, r: &FutureStateNodeRecord) -> Result<(), StorageError> {
    get_future_state(conn, &r.future_state_id)?;
    if exists(conn, "SELECT 1 FROM future_state_nodes WHERE id = ?1", &r.id)? {
        return Err(already_exists("future state node", &r.id));
    }
    conn.execute(
        &format!(
            "INSERT INTO future_state_nodes ({NODE_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
        ),
        params![
            r.id,
            r.future_state_id,
            r.source_step_id,
            r.name,
            r.action.as_str(),
            r.lane,
            r.cycle_time_minutes,
            r.wait_time_minutes,
            r.position_x,
            r.position_y,
            r.solution_id,
            r.revision
        ],
    )
    .backend()?;
    Ok(())
}

/// Conditional UPDATE on `revision = expected_revision`.
pub(crate) fn update_node(
    conn: &Connection,
    node_id: &str,
    expected_revision: i64,
    changes: &NodeChanges,
) -> Result<FutureStateNodeRecord, StorageError> {
    let mut node = get_node(conn, node_id)?;
    changes.apply_to(&mut node);
    let affected = conn
        .execute(
            "UPDATE future_state_nodes SET \
               name = ?1, action = ?2, lane = ?3, cycle_time_minutes = ?4, \
               wait_time_minutes = ?5, position_x = ?6, position_y = ?7, solution_id = ?8, \
               revision = revision + 1 \
             WHERE id = ?9 AND revision = ?10",
            params![
                node.name,
                node.action.as_str(),
                node.lane,
                node.cycle_time_minutes,
                node.wait_time_minutes,
                node.position_x,
                node.position_y,
                node.solution_id,
                node_id,
                expected_revision
            ],
        )
        .backend()?;
    if affected == 0 {
        return Err(StorageError::RevisionConflict {
            node_id: node_id.to_string(),
            expected_revision,
        });
    }
    node.revision = expected_revision + 1;
    Ok(node)
}

pub(crate) fn insert_edge(conn: &Connection, r: &FutureStateEdgeRecord) -> Result<(), StorageError> {
    if r.source_node_id == r.target_node_id {
        return Err(StorageError::SelfLoop {
            node_id: r.source_node_id.clone(),
        });
    }
    get_future_state(conn, &r.future_state_id)?;
    get_node(conn, &r.source_node_id)?;
    get_node(conn, &r.target_node_id)?;
    if exists(conn, "SELECT 1 FROM future_state_edges WHERE id = ?1", &r.id)? {
        return Err(already_exists("future state edge", &r.id));
    }
    if find_edge(conn, &r.future_state_id, &r.source_node_id, &r.target_node_id)?.is_some() {
        return Err(StorageError::DuplicateEdge {
            future_state_id: r.future_state_id.clone(),
            source_node_id: r.source_node_id.clone(),
            target_node_id: r.target_node_id.clone(),
        });
    }
    conn.execute(
        &format!("INSERT INTO future_state_edges ({EDGE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
        params![
            r.id,
            r.future_state_id,
            r.source_node_id,
            r.target_node_id,
            r.label,
            r.order_index
        ],
    )
    .backend()?;
    Ok(())
}

pub(crate) fn find_edge(
    conn: &Connection,
    future_state_id: &str,
    source_node_id: &str,
    target_node_id: &str,
) -> Result<Option<FutureStateEdgeRecord>, StorageError> {
    conn.query_row(
        &format!(
            "SELECT {EDGE_COLUMNS} FROM future_state_edges \
             WHERE future_state_id = ?1 AND source_node_id = ?2 AND target_node_id = ?3"
        ),
        params![future_state_id, source_node_id, target_node_id],
        edge_row,
    )
    .optional()
    .backend()
}

pub(crate) fn max_edge_order_index(
    conn: &Connection,
    future_state_id: &str,
    source_node_id: &str,
) -> Result<Option<i64>, StorageError> {
    conn.query_row(
        "SELECT MAX(order_index) FROM future_state_edges \
         WHERE future_state_id = ?1 AND source_node_id = ?2",
        params![future_state_id, source_node_id],
        |row| row.get(0),
    )
    .backend()
}

pub(crate) fn update_edge(
    conn: &Connection,
    edge_id: &str,
    changes: &EdgeChanges,
) -> Result<FutureStateEdgeRecord, StorageError> {
    let mut edge = get_edge(conn, edge_id)?;
    changes.apply_to(&mut edge);
    conn.execute(
        "UPDATE future_state_edges SET label = ?1, order_index = ?2 WHERE id = ?3",
        params![edge.label, edge.order_index, edge_id],
    )
    .backend()?;
    Ok(edge)
}

pub(crate) fn delete_edge(conn: &Connection, edge_id: &str) -> Result<(), StorageError> {
    let deleted = conn
        .execute("DELETE FROM future_state_edges WHERE id = ?1", [edge_id])
        .backend()?;
    if deleted == 0 {
        return Err(StorageError::EdgeNotFound {
            edge_id: edge_id.to_string(),
        });
    }
    Ok(())
}

// ── Implementation plan ───────────────────────────────────────────────────────

/// Children first so foreign keys hold at every step.
pub(crate) fn clear_sequencing(
    conn: &Connection,
    session_id: &str,
) -> Result<SequencingCleared, StorageError> {
    get_session(conn, session_id)?;
    let delete = |table: &str| -> Result<usize, StorageError> {
        conn.execute(
            &format!("DELETE FROM {table} WHERE session_id = ?1"),
            [session_id],
        )
        .backend()
    };
    let implementation_dependencies = delete("implementation_dependencies")?;
    let solution_dependencies = delete("solution_dependencies")?;
    let items = delete("implementation_items")?;
    let waves = delete("implementation_waves")?;
    Ok(SequencingCleared {
        waves,
        items,
        solution_dependencies,
        implementation_dependencies,
    })
}

pub(crate) fn insert_wave(conn: &Connection, r: &ImplementationWaveRecord) -> Result<(), StorageError> {
    get_session(conn, &r.session_id)?;
    if exists(conn, "SELECT 1 FROM implementation_waves WHERE id = ?1", &r.id)? {
        return Err(already_exists("wave", &r.id));
    }
    conn.execute(
        &format!("INSERT INTO implementation_waves ({WAVE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
        params![
            r.id,
            r.session_id,
            r.name,
            r.order_index,
            r.start_estimate,
            r.end_estimate
        ],
    )
    .backend()?;
    Ok(())
}

pub(crate) fn insert_item(conn: &Connection, r: &ImplementationItemRecord) -> Result<(), StorageError> {
    get_wave(conn, &r.wave_id)?;
    if exists(conn, "SELECT 1 FROM implementation_items WHERE id = ?1", &r.id)? {
        return Err(already_exists("implementation item", &r.id));
    }
    conn.execute(
        &format!("INSERT INTO implementation_items ({ITEM_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"),
        params![
            r.id,
            r.session_id,
            r.wave_id,
            r.solution_id,
            r.title,
            r.order_index
        ],
    )
    .backend()?;
    Ok(())
}

pub(crate) fn insert_solution_dependency(
    conn: &Connection,
    r: &SolutionDependencyRecord,
) -> Result<(), StorageError> {
    get_session(conn, &r.session_id)?;
    conn.execute(
        "INSERT INTO solution_dependencies \
           (id, session_id, solution_id, depends_on_solution_id, reason) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            r.id,
            r.session_id,
            r.solution_id,
            r.depends_on_solution_id,
            r.reason
        ],
    )
    .backend()?;
    Ok(())
}

pub(crate) fn insert_implementation_dependency(
    conn: &Connection,
    r: &ImplementationDependencyRecord,
) -> Result<(), StorageError> {
    get_session(conn, &r.session_id)?;
    conn.execute(
        "INSERT INTO implementation_dependencies (id, session_id, item_id, depends_on_item_id) \
         VALUES (?1, ?2, ?3, ?4)",
        params![r.id, r.session_id, r.item_id, r.depends_on_item_id],
    )
    .backend()?;
    Ok(())
}

pub(crate) fn move_item(
    conn: &Connection,
    item_id: &str,
    wave_id: &str,
    order_index: i64,
) -> Result<ImplementationItemRecord, StorageError> {
    let wave = get_wave(conn, wave_id)?;
    let mut item = get_item(conn, item_id)?;
    if item.session_id != wave.session_id {
        return Err(StorageError::ItemNotFound {
            kind: "wave",
            id: wave_id.to_string(),
        });
    }
    conn.execute(
        "UPDATE implementation_items SET wave_id = ?1, order_index = ?2 WHERE id = ?3",
        params![wave_id, order_index, item_id],
    )
    .backend()?;
    item.wave_id = wave_id.to_string();
    item.order_index = order_index;
    Ok(item)
}

// ── Comparison snapshots ──────────────────────────────────────────────────────

pub(crate) fn replace_comparison(
    conn: &Connection,
    r: &FlowComparisonRecord,
) -> Result<(), StorageError> {
    get_session(conn, &r.session_id)?;
    get_future_state(conn, &r.future_state_id)?;
    conn.execute(
        "DELETE FROM flow_comparisons WHERE session_id = ?1 AND future_state_id = ?2",
        params![r.session_id, r.future_state_id],
    )
    .backend()?;
    conn.execute(
        &format!(
            "INSERT INTO flow_comparisons ({COMPARISON_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
        ),
        params![
            r.id,
            r.session_id,
            r.future_state_id,
            r.eliminated_count,
            r.added_count,
            r.modified_count,
            r.unchanged_count,
            r.avg_quality_improvement,
            r.waste_reduction_count,
            to_json(&r.items)?,
            r.generated_at
        ],
    )
    .backend()?;
    Ok(())
}

// ── Queries ───────────────────────────────────────────────────────────────────

pub(crate) fn list_process_steps(
    conn: &Connection,
    session_id: &str,
) -> Result<Vec<ProcessStepRecord>, StorageError> {
    query_all(
        conn,
        &format!("SELECT {STEP_COLUMNS} FROM process_steps WHERE session_id = ?1 ORDER BY rowid"),
        [session_id],
        step_row,
    )
}

pub(crate) fn list_process_connections(
    conn: &Connection,
    session_id: &str,
) -> Result<Vec<ProcessConnectionRecord>, StorageError> {
    query_all(
        conn,
        &format!(
            "SELECT {CONNECTION_COLUMNS} FROM process_connections \
             WHERE session_id = ?1 ORDER BY rowid"
        ),
        [session_id],
        connection_row,
    )
}

pub(crate) fn list_solutions(
    conn: &Connection,
    session_id: &str,
    status: Option<SolutionStatus>,
) -> Result<Vec<SolutionCardRecord>, StorageError> {
    query_all(
        conn,
        &format!(
            "SELECT {SOLUTION_COLUMNS} FROM solutions \
             WHERE session_id = ?1 AND (?2 IS NULL OR status = ?2) ORDER BY rowid"
        ),
        params![session_id, status.map(|s| s.as_str())],
        solution_row,
    )
}

pub(crate) fn find_succeeded_run(
    conn: &Connection,
    session_id: &str,
    agent_type: &str,
    input_fingerprint: &str,
) -> Result<Option<AgentRunRecord>, StorageError> {
    conn.query_row(
        &format!(
            "SELECT {RUN_COLUMNS} FROM agent_runs \
             WHERE session_id = ?1 AND agent_type = ?2 AND input_fingerprint = ?3 \
               AND status = 'succeeded' \
             ORDER BY rowid DESC LIMIT 1"
        ),
        params![session_id, agent_type, input_fingerprint],
        run_row,
    )
    .optional()
    .backend()
}

pub(crate) fn list_agent_runs(
    conn: &Connection,
    session_id: &str,
) -> Result<Vec<AgentRunRecord>, StorageError> {
    query_all(
        conn,
        &format!("SELECT {RUN_COLUMNS} FROM agent_runs WHERE session_id = ?1 ORDER BY rowid"),
        [session_id],
        run_row,
    )
}

pub(crate) fn list_future_states(
    conn: &Connection,
    session_id: &str,
) -> Result<Vec<FutureStateRecord>, StorageError> {
    query_all(
        conn,
        &format!(
            "SELECT {FUTURE_STATE_COLUMNS} FROM future_states \
             WHERE session_id = ?1 ORDER BY version"
        ),
        [session_id],
        future_state_row,
    )
}

pub(crate) fn list_nodes(
    conn: &Connection,
    future_state_id: &str,
) -> Result<Vec<FutureStateNodeRecord>, StorageError> {
    query_all(
        conn,
        &format!(
            "SELECT {NODE_COLUMNS} FROM future_state_nodes \
             WHERE future_state_id = ?1 ORDER BY rowid"
        ),
        [future_state_id],
        node_row,
    )
}

pub(crate) fn list_edges(
    conn: &Connection,
    future_state_id: &str,
) -> Result<Vec<FutureStateEdgeRecord>, StorageError> {
    query_all(
        conn,
        &format!(
            "SELECT {EDGE_COLUMNS} FROM future_state_edges \
             WHERE future_state_id = ?1 ORDER BY rowid"
        ),
        [future_state_id],
        edge_row,
    )
}

pub(crate) fn list_waves(
    conn: &Connection,
    session_id: &str,
) -> Result<Vec<ImplementationWaveRecord>, StorageError> {
    query_all(
        conn,
        &format!(
            "SELECT {WAVE_COLUMNS} FROM implementation_waves \
             WHERE session_id = ?1 ORDER BY order_index, rowid"
        ),
        [session_id],
        wave_row,
    )
}

pub(crate) fn list_items(
    conn: &Connection,
    session_id: &str,
) -> Result<Vec<ImplementationItemRecord>, StorageError> {
    query_all(
        conn,
        &format!(
            "SELECT {ITEM_COLUMNS} FROM implementation_items WHERE session_id = ?1 ORDER BY rowid"
        ),
        [session_id],
        item_row,
    )
}

pub(crate) fn list_solution_dependencies(
    conn: &Connection,
    session_id: &str,
) -> Result<Vec<SolutionDependencyRecord>, StorageError> {
    query_all(
        conn,
        "SELECT id, session_id, solution_id, depends_on_solution_id, reason \
         FROM solution_dependencies WHERE session_id = ?1 ORDER BY rowid",
        [session_id],
        solution_dependency_row,
    )
}

pub(crate) fn list_implementation_dependencies(
    conn: &Connection,
    session_id: &str,
) -> Result<Vec<ImplementationDependencyRecord>, StorageError> {
    query_all(
        conn,
        "SELECT id, session_id, item_id, depends_on_item_id \
         FROM implementation_dependencies WHERE session_id = ?1 ORDER BY rowid",
        [session_id],
        implementation_dependency_row,
    )
}

pub(crate) fn list_flows(
    conn: &Connection,
    session_id: &str,
    state_type: FlowStateType,
    future_state_id: Option<&str>,
) -> Result<Vec<InformationFlowRecord>, StorageError> {
    match state_type {
        FlowStateType::Current => query_all(
            conn,
            &format!(
                "SELECT {FLOW_COLUMNS} FROM information_flows \
                 WHERE session_id = ?1 AND state_type = 'current' ORDER BY rowid"
            ),
            [session_id],
            flow_row,
        ),
        FlowStateType::Future => query_all(
            conn,
            &format!(
                "SELECT {FLOW_COLUMNS} FROM information_flows \
                 WHERE session_id = ?1 AND state_type = 'future' AND future_state_id IS ?2 \
                 ORDER BY rowid"
            ),
            params![session_id, future_state_id],
            flow_row,
        ),
    }
}

pub(crate) fn get_comparison(
    conn: &Connection,
    session_id: &str,
    future_state_id: &str,
) -> Result<Option<FlowComparisonRecord>, StorageError> {
    conn.query_row(
        &format!(
            "SELECT {COMPARISON_COLUMNS} FROM flow_comparisons \
             WHERE session_id = ?1 AND future_state_id = ?2"
        ),
        params![session_id, future_state_id],
        comparison_row,
    )
    .optional()
    .backend()
}
