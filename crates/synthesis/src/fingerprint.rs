//! Stable cache keys for agent invocations.
//!
//! Only the fields that influence an agent's output take part in its
//! fingerprint, so unrelated metadata can change without invalidating a
//! cached run.

use leanflow_storage::{AgentRunRecord, StorageError, SynthesisStorage};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::agent::AgentType;

/// Input fields that contribute to the fingerprint of each agent type.
pub fn fingerprint_fields(agent_type: AgentType) -> &'static [&'static str] {
    match agent_type {
        AgentType::Synthesis => &["observation_ids", "step_ids"],
        AgentType::Solutions => &["theme_ids", "step_ids"],
        AgentType::Sequencing => &["accepted_solution_ids", "dependencies"],
        AgentType::Design => &["lanes", "accepted_solution_ids", "step_ids"],
    }
}

/// Project `inputs` onto the fingerprint fields. Missing fields become null.
pub fn fingerprint_payload(agent_type: AgentType, inputs: &Value) -> Value {
    let mut fields: Vec<&str> = fingerprint_fields(agent_type).to_vec();
    fields.sort_unstable();
    let mut payload = Map::new();
    for field in fields {
        let value = inputs.get(field).cloned().unwrap_or(Value::Null);
        payload.insert(field.to_string(), canonicalize(&value));
    }
    Value::Object(payload)
}

/// Order-independent normal form of a JSON value.
///
/// Object keys are emitted in sorted order. Arrays are treated as sets:
/// elements are normalized and sorted by their canonical text, and arrays
/// of primitives are de-duplicated.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for key in keys {
                out.insert(key.clone(), canonicalize(&map[key.as_str()]));
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            let all_primitive = items.iter().all(|v| !v.is_array() && !v.is_object());
            let mut keyed: Vec<(String, Value)> = items
                .iter()
                .map(|item| {
                    let normalized = canonicalize(item);
                    (canonical_text(&normalized), normalized)
                })
                .collect();
            keyed.sort_by(|a, b| a.0.cmp(&b.0));
            if all_primitive {
                keyed.dedup_by(|a, b| a.0 == b.0);
            }
            Value::Array(keyed.into_iter().map(|(_, v)| v).collect())
        }
        other => other.clone(),
    }
}

fn canonical_text(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

/// Lowercase hex SHA-256 of `"<agent_type>:" + canonical JSON`.
pub fn compute_fingerprint(agent_type: AgentType, inputs: &Value) -> String {
    let payload = fingerprint_payload(agent_type, inputs);
    let material = format!("{}:{}", agent_type.as_str(), canonical_text(&payload));
    let hash = Sha256::digest(material.as_bytes());
    format!("{:x}", hash)
}

/// Read side of the agent-run cache.
pub struct FingerprintCache;

impl FingerprintCache {
    /// Most recent succeeded run for the key, or `None` on a miss.
    /// Failed runs never count as hits.
    pub async fn lookup<S: SynthesisStorage>(
        storage: &S,
        session_id: &str,
        agent_type: AgentType,
        fingerprint: &str,
    ) -> Result<Option<AgentRunRecord>, StorageError> {
        storage
            .find_succeeded_run(session_id, agent_type.as_str(), fingerprint)
            .await
    }
}
