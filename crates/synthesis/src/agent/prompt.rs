//! Prompt construction per agent type.

use serde_json::Value;

use super::AgentType;

/// System and user text of a prompt, before a token budget is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

const JSON_ONLY: &str = "Respond only with valid JSON. Do not include markdown fences or other text.";

fn system_prompt(agent_type: AgentType) -> String {
    let body = match agent_type {
        AgentType::Synthesis => {
            r#"You are a Lean facilitator grouping waste observations into themes.

Respond with a JSON array of themes:
[
  {"title": "<short theme name>", "description": "<one or two sentences>",
   "waste_types": ["<DOWNTIME category>"], "observation_ids": ["<observation id>"]}
]

Rules:
- Only reference observation IDs that appear in the input.
- Use the eight DOWNTIME waste categories for waste_types."#
        }
        AgentType::Solutions => {
            r#"You are a Lean facilitator proposing solutions for waste themes.

Respond with a JSON array of solutions:
[
  {"title": "<solution>", "bucket": "eliminate" | "modify" | "create",
   "description": "<what changes>", "effort_level": "low" | "medium" | "high",
   "recommended_wave": <1-based wave hint>, "affected_step_ids": ["<step id>"],
   "depends_on": ["<title of another proposed solution>"]}
]"#
        }
        AgentType::Sequencing => {
            r#"You are planning the rollout of accepted process-improvement solutions.

Group the solutions into ordered implementation waves and list dependencies.
Respond with a JSON object in exactly this format:

{
  "waves": [
    {"name": "<e.g. 0-3 months>", "order_index": <0-based>, "start_estimate": "<text or null>",
     "end_estimate": "<text or null>", "solution_ids": ["<accepted solution id>"]}
  ],
  "dependencies": [
    {"solution_id": "<id>", "depends_on_solution_id": "<id>", "reason": "<why>"}
  ]
}

Rules:
- Every solution_id MUST be one of the accepted solution IDs in the input.
- Place each solution in exactly one wave.
- A solution must not depend on itself."#
        }
        AgentType::Design => {
            r#"You are redesigning a business process as a future-state swimlane map.

Respond with a JSON object in exactly this format:

{
  "future_state": {
    "name": "<short name>",
    "description": "<summary of the redesign>",
    "nodes": [
      {"name": "<step>", "lane": "<lane>", "action": "eliminate" | "modify" | "create" | "unchanged",
       "step_id": "<current step id or null>", "solution_id": "<solution id or null>",
       "cycle_time_minutes": <number or null>, "wait_time_minutes": <number or null>,
       "position_x": <number>, "position_y": <number>}
    ],
    "edges": [
      {"source_node_index": <index into nodes>, "target_node_index": <index into nodes>, "label": "<text or null>"}
    ]
  }
}

Rules:
- Edges refer to nodes by their 0-based position in the "nodes" array.
- Use only lanes that appear in the input.
- An edge must not connect a node to itself."#
        }
    };
    format!("{}\n\n{}", body, JSON_ONLY)
}

/// Build the prompt for an agent type from its input payload.
pub fn build_prompt(agent_type: AgentType, inputs: &Value) -> Prompt {
    let payload = serde_json::to_string_pretty(inputs).unwrap_or_else(|_| "{}".to_string());
    Prompt {
        system: system_prompt(agent_type),
        user: format!("Input:\n{}", payload),
    }
}
