//! DDL for the SQLite backend. Every statement is idempotent so `migrate`
//! can run on each open.

use rusqlite::Connection;

pub(crate) const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS sessions (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  process_id TEXT,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS process_steps (
  id TEXT PRIMARY KEY,
  session_id TEXT NOT NULL REFERENCES sessions(id),
  name TEXT NOT NULL,
  lane TEXT NOT NULL,
  cycle_time_minutes REAL,
  wait_time_minutes REAL
);

CREATE TABLE IF NOT EXISTS process_connections (
  id TEXT PRIMARY KEY,
  session_id TEXT NOT NULL REFERENCES sessions(id),
  source_step_id TEXT NOT NULL,
  target_step_id TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS solutions (
  id TEXT PRIMARY KEY,
  session_id TEXT NOT NULL REFERENCES sessions(id),
  title TEXT NOT NULL,
  description TEXT,
  bucket TEXT NOT NULL CHECK (bucket IN ('eliminate', 'modify', 'create')),
  status TEXT NOT NULL CHECK (status IN ('draft', 'accepted', 'rejected')),
  effort_level TEXT,
  recommended_wave INTEGER,
  dependencies TEXT NOT NULL,
  affected_step_ids TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS agent_runs (
  id TEXT PRIMARY KEY,
  session_id TEXT NOT NULL REFERENCES sessions(id),
  agent_type TEXT NOT NULL,
  input_fingerprint TEXT NOT NULL,
  status TEXT NOT NULL CHECK (status IN ('succeeded', 'failed')),
  provider TEXT NOT NULL,
  model TEXT NOT NULL,
  output TEXT,
  error TEXT,
  started_at TEXT NOT NULL,
  completed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_agent_runs_cache
  ON agent_runs(session_id, agent_type, input_fingerprint, status);

CREATE TABLE IF NOT EXISTS future_states (
  id TEXT PRIMARY KEY,
  session_id TEXT NOT NULL REFERENCES sessions(id),
  name TEXT NOT NULL,
  description TEXT,
  version INTEGER NOT NULL CHECK (version >= 1),
  status TEXT NOT NULL CHECK (status IN ('draft', 'locked')),
  agent_run_id TEXT,
  created_at TEXT NOT NULL,
  UNIQUE (session_id, version)
);

CREATE TABLE IF NOT EXISTS future_state_nodes (
  id TEXT PRIMARY KEY,
  future_state_id TEXT NOT NULL REFERENCES future_states(id),
  source_step_id TEXT,
  name TEXT NOT NULL,
  action TEXT NOT NULL CHECK (action IN ('eliminate', 'modify', 'create', 'unchanged')),
  lane TEXT NOT NULL,
  cycle_time_minutes REAL,
  wait_time_minutes REAL,
  position_x REAL NOT NULL DEFAULT 0,
  position_y REAL NOT NULL DEFAULT 0,
  solution_id TEXT,
  revision INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS future_state_edges (
  id TEXT PRIMARY KEY,
  future_state_id TEXT NOT NULL REFERENCES future_states(id),
  source_node_id TEXT NOT NULL REFERENCES future_state_nodes(id),
  target_node_id TEXT NOT NULL REFERENCES future_state_nodes(id),
  label TEXT,
  order_index INTEGER NOT NULL,
  CHECK (source_node_id <> target_node_id),
  UNIQUE (future_state_id, source_node_id, target_node_id)
);

CREATE TABLE IF NOT EXISTS implementation_waves (
  id TEXT PRIMARY KEY,
  session_id TEXT NOT NULL REFERENCES sessions(id),
  name TEXT NOT NULL,
  order_index INTEGER NOT NULL,
  start_estimate TEXT,
  end_estimate TEXT
);

CREATE TABLE IF NOT EXISTS implementation_items (
  id TEXT PRIMARY KEY,
  session_id TEXT NOT NULL REFERENCES sessions(id),
  wave_id TEXT NOT NULL REFERENCES implementation_waves(id),
  solution_id TEXT NOT NULL,
  title TEXT NOT NULL,
  order_index INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS solution_dependencies (
  id TEXT PRIMARY KEY,
  session_id TEXT NOT NULL REFERENCES sessions(id),
  solution_id TEXT NOT NULL,
  depends_on_solution_id TEXT NOT NULL,
  reason TEXT
);

CREATE TABLE IF NOT EXISTS implementation_dependencies (
  id TEXT PRIMARY KEY,
  session_id TEXT NOT NULL REFERENCES sessions(id),
  item_id TEXT NOT NULL,
  depends_on_item_id TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS information_flows (
  id TEXT PRIMARY KEY,
  session_id TEXT NOT NULL REFERENCES sessions(id),
  state_type TEXT NOT NULL CHECK (state_type IN ('current', 'future')),
  future_state_id TEXT REFERENCES future_states(id),
  source_ref TEXT NOT NULL,
  target_ref TEXT NOT NULL,
  name TEXT NOT NULL,
  flow_type TEXT NOT NULL
    CHECK (flow_type IN ('data', 'document', 'approval', 'system', 'notification')),
  is_automated INTEGER NOT NULL,
  is_real_time INTEGER NOT NULL,
  completeness_score INTEGER NOT NULL CHECK (completeness_score BETWEEN 1 AND 5),
  accuracy_score INTEGER NOT NULL CHECK (accuracy_score BETWEEN 1 AND 5),
  timeliness_score INTEGER NOT NULL CHECK (timeliness_score BETWEEN 1 AND 5),
  waste_types TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS flow_comparisons (
  id TEXT PRIMARY KEY,
  session_id TEXT NOT NULL REFERENCES sessions(id),
  future_state_id TEXT NOT NULL REFERENCES future_states(id),
  eliminated_count INTEGER NOT NULL,
  added_count INTEGER NOT NULL,
  modified_count INTEGER NOT NULL,
  unchanged_count INTEGER NOT NULL,
  avg_quality_improvement REAL NOT NULL,
  waste_reduction_count INTEGER NOT NULL,
  items TEXT NOT NULL,
  generated_at TEXT NOT NULL,
  UNIQUE (session_id, future_state_id)
);
"#;

pub(crate) fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)
}
