/// All errors that can be returned by a SynthesisStorage implementation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: String },

    #[error("future state not found: {future_state_id}")]
    FutureStateNotFound { future_state_id: String },

    #[error("future state node not found: {node_id}")]
    NodeNotFound { node_id: String },

    #[error("future state edge not found: {edge_id}")]
    EdgeNotFound { edge_id: String },

    /// Implementation item or wave referenced by a manual reassignment.
    #[error("{kind} not found: {id}")]
    ItemNotFound { kind: &'static str, id: String },

    /// A record with this primary key already exists.
    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: String },

    /// Optimistic concurrency control conflict: another writer updated the
    /// node first. The expected revision was not found.
    #[error("revision conflict on node {node_id}: expected revision {expected_revision}")]
    RevisionConflict {
        node_id: String,
        expected_revision: i64,
    },

    /// Unique (session_id, version) backstop for concurrent version assignment.
    #[error("future state version {version} already exists for session {session_id}")]
    DuplicateVersion { session_id: String, version: i64 },

    #[error("edge {source_node_id} -> {target_node_id} already exists in future state {future_state_id}")]
    DuplicateEdge {
        future_state_id: String,
        source_node_id: String,
        target_node_id: String,
    },

    #[error("edge source and target are the same node: {node_id}")]
    SelfLoop { node_id: String },

    /// A backend-specific storage error (DB connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}
