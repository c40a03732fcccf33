//! JSON Schemas for structured agent output.

use serde_json::{json, Value};

use super::AgentType;

/// The JSON Schema an agent type's output must satisfy.
pub fn output_schema(agent_type: AgentType) -> Value {
    match agent_type {
        AgentType::Synthesis => json!({
            "type": "array",
            "items": {
                "type": "object",
                "required": ["title"],
                "properties": {
                    "title": { "type": "string", "minLength": 1 },
                    "description": { "type": "string" },
                    "waste_types": { "type": "array", "items": { "type": "string" } },
                    "observation_ids": { "type": "array", "items": { "type": "string" } }
                }
            }
        }),
        AgentType::Solutions => json!({
            "type": "array",
            "items": {
                "type": "object",
                "required": ["title", "bucket"],
                "properties": {
                    "title": { "type": "string", "minLength": 1 },
                    "bucket": { "enum": ["eliminate", "modify", "create"] },
                    "description": { "type": "string" },
                    "effort_level": { "type": "string" },
                    "recommended_wave": { "type": "integer" },
                    "affected_step_ids": { "type": "array", "items": { "type": "string" } },
                    "depends_on": { "type": "array", "items": { "type": "string" } }
                }
            }
        }),
        AgentType::Sequencing => json!({
            "type": "object",
            "required": ["waves", "dependencies"],
            "properties": {
                "waves": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["name", "solution_ids"],
                        "properties": {
                            "name": { "type": "string", "minLength": 1 },
                            "order_index": { "type": "integer" },
                            "start_estimate": { "type": ["string", "null"] },
                            "end_estimate": { "type": ["string", "null"] },
                            "solution_ids": { "type": "array", "items": { "type": "string" } }
                        }
                    }
                },
                "dependencies": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["solution_id", "depends_on_solution_id"],
                        "properties": {
                            "solution_id": { "type": "string" },
                            "depends_on_solution_id": { "type": "string" },
                            "reason": { "type": ["string", "null"] }
                        }
                    }
                }
            }
        }),
        AgentType::Design => json!({
            "type": "object",
            "required": ["future_state"],
            "properties": {
                "future_state": {
                    "type": "object",
                    "required": ["name", "nodes", "edges"],
                    "properties": {
                        "name": { "type": "string", "minLength": 1 },
                        "description": { "type": ["string", "null"] },
                        "nodes": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "required": ["name", "lane", "action"],
                                "properties": {
                                    "name": { "type": "string" },
                                    "lane": { "type": "string" },
                                    "action": { "enum": ["eliminate", "modify", "create", "unchanged"] },
                                    "step_id": { "type": ["string", "null"] },
                                    "solution_id": { "type": ["string", "null"] },
                                    "cycle_time_minutes": { "type": ["number", "null"] },
                                    "wait_time_minutes": { "type": ["number", "null"] },
                                    "position_x": { "type": ["number", "null"] },
                                    "position_y": { "type": ["number", "null"] }
                                }
                            }
                        },
                        "edges": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "required": ["source_node_index", "target_node_index"],
                                "properties": {
                                    "source_node_index": { "type": "integer", "minimum": 0 },
                                    "target_node_index": { "type": "integer", "minimum": 0 },
                                    "label": { "type": ["string", "null"] }
                                }
                            }
                        }
                    }
                }
            }
        }),
    }
}

/// Validate `output` against the agent type's schema. On failure returns
/// every violation found, formatted for the run's error column.
pub fn validate_output(agent_type: AgentType, output: &Value) -> Result<(), Vec<String>> {
    let schema = output_schema(agent_type);
    let validator = jsonschema::validator_for(&schema)
        .map_err(|e| vec![format!("invalid {} output schema: {}", agent_type, e)])?;
    let errors: Vec<String> = validator
        .iter_errors(output)
        .map(|e| format!("{}", e))
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_schema_compiles() {
        for t in AgentType::ALL {
            assert!(jsonschema::validator_for(&output_schema(t)).is_ok(), "{t}");
        }
    }

    #[test]
    fn design_output_accepted() {
        let output = json!({
            "future_state": {
                "name": "Lean AP",
                "nodes": [
                    {"name": "Receive invoice", "lane": "AP", "action": "unchanged"},
                    {"name": "Auto-match", "lane": "AP", "action": "create", "solution_id": "s1"}
                ],
                "edges": [{"source_node_index": 0, "target_node_index": 1}]
            }
        });
        assert!(validate_output(AgentType::Design, &output).is_ok());
    }

    #[test]
    fn design_output_with_unknown_action_rejected() {
        let output = json!({
            "future_state": {
                "name": "Lean AP",
                "nodes": [{"name": "x", "lane": "AP", "action": "teleport"}],
                "edges": []
            }
        });
        let errors = validate_output(AgentType::Design, &output).unwrap_err();
        assert!(!errors.is_empty());
    }

    #[test]
    fn negative_edge_index_rejected() {
        let output = json!({
            "future_state": {
                "name": "Lean AP",
                "nodes": [],
                "edges": [{"source_node_index": -1, "target_node_index": 0}]
            }
        });
        assert!(validate_output(AgentType::Design, &output).is_err());
    }

    #[test]
    fn sequencing_requires_dependencies() {
        let output = json!({"waves": [{"name": "0-3 months", "solution_ids": ["s1"]}]});
        assert!(validate_output(AgentType::Sequencing, &output).is_err());
    }

    #[test]
    fn solutions_bucket_is_enumerated() {
        let ok = json!([{"title": "Automate matching", "bucket": "create"}]);
        let bad = json!([{"title": "Automate matching", "bucket": "maybe"}]);
        assert!(validate_output(AgentType::Solutions, &ok).is_ok());
        assert!(validate_output(AgentType::Solutions, &bad).is_err());
    }

    #[test]
    fn synthesis_must_be_array() {
        assert!(validate_output(AgentType::Synthesis, &json!({"title": "x"})).is_err());
    }
}
