//! Oracle prompt construction and the schemas its replies must match.
//!
//! Two prompts exist: the per-iteration decision prompt (question, history,
//! prior iteration tuples, candidate catalog) and the tool-spec prompt used
//! when a `create_tool` action arrives without code.

use std::fmt::Write as _;

use serde_json::Value;

use toolforge_oracle::ResponseSchema;

use crate::scratchpad::Scratchpad;
use crate::state::AgentState;

/// Schema for a per-iteration decision:
/// `{state: enum, reasoning: string, action?: object}`.
pub fn decision_schema() -> ResponseSchema {
    ResponseSchema::with_required(["state", "reasoning"]).allow("state", AgentState::wire_names())
}

/// Schema for a synthesized tool spec.
pub fn tool_spec_schema() -> ResponseSchema {
    ResponseSchema::with_required(["name", "description", "parameters", "code"])
}

/// The fixed portion of every decision prompt: the state contract, the
/// policies the agent enforces, and the Lua authoring rules.
pub fn system_prompt() -> &'static str {
    r#"You are the decision engine of a tool-using assistant. You answer the user's question by stepping a state machine. Each reply must be ONE JSON object:

{"state": "<state>", "reasoning": "<why>", "action": { ... }}

States and their actions:
- "respond" — answer directly from your own knowledge. action: {"answer": "...", "confidence": "low|medium|high"}. Only for questions needing no computation or external data.
- "fetch_tool" — search the tool catalog. action: {"query": "<capability needed>", "limit": 5}
- "use_tool" — execute a cataloged tool. action: {"tool": "<exact name>", "args": {<param>: <value>}}
- "analyze_tools_for_composite" — inspect candidate tools in detail to decide whether chaining them can solve the problem. action: {"candidates": ["name1", "name2"]}
- "create_tool" — register a new tool. action: {"spec": {"name": "...", "description": "...", "category": "...", "tags": [...], "parameters": [{"name": "...", "type": "string|number|boolean|object|array", "required": true, "description": "..."}], "return_schema": {<shape of the return value>}, "code": "<lua>"}}
- "exit_response" — finish. action: {"final_answer": "...", "confidence": "low|medium|high"}

Allowed transitions:
respond -> exit_response | fetch_tool | create_tool
fetch_tool -> use_tool | analyze_tools_for_composite | create_tool | exit_response
use_tool -> respond | fetch_tool | exit_response
analyze_tools_for_composite -> use_tool | create_tool | fetch_tool
create_tool -> use_tool | exit_response

Rules:
1. Search before you create: "create_tool" is only legal after a search returned nothing usable, or after composite analysis concluded no combination works.
2. Reuse before you generate: when a search finds matching tools, try them ("use_tool") or analyze them before considering creation.
3. After creating a tool, use it in the next step.
4. If a tool fails, read the error: refine your search query or create a corrected tool under a NEW name. Never retry a bugged tool.

Tool code is Lua 5.4. It must define a global function `run(args)` taking one table of named arguments and returning a JSON-representable value. Available besides the standard math/string/table libraries:
- json.encode(value), json.decode(text)
- http.get(url) and http.post(url, body), each returning {status, body}
- time.now() (RFC 3339) and time.unix() (seconds)
- execute_tool(name, args) — call another cataloged tool and get its return value

Respond with the JSON object only."#
}

/// Build the full decision prompt for one iteration.
pub fn decision_prompt(pad: &Scratchpad) -> String {
    let mut p = String::with_capacity(2048);
    p.push_str(system_prompt());

    if !pad.history.is_empty() {
        p.push_str("\n\n## Conversation history\n");
        for turn in &pad.history {
            let _ = writeln!(p, "{}: {}", turn.role, turn.content);
        }
    }

    if !pad.candidates.is_empty() {
        p.push_str("\n\n## Candidate tools discovered so far\n");
        for c in &pad.candidates {
            let _ = write!(p, "- {} (relevance {:.2}): {}", c.name, c.score, c.description);
            if let Some(schema) = &c.return_schema {
                let _ = write!(p, " Returns: {schema}");
            }
            p.push('\n');
        }
    }

    if !pad.iterations.is_empty() {
        p.push_str("\n\n## Steps taken so far\n");
        for (i, record) in pad.iterations.iter().enumerate() {
            let _ = writeln!(p, "{}. state={} — {}", i + 1, record.state, record.reasoning);
            if let Some(action) = &record.action {
                let _ = writeln!(p, "   action: {}", compact(action));
            }
            if let Some(result) = &record.result {
                let _ = writeln!(p, "   result: {}", compact(result));
            }
        }
    }

    let _ = write!(
        p,
        "\n\n## User question\n{}\n\nChoose the next state and respond with the JSON object only.",
        pad.question
    );
    p
}

/// Build the prompt asking the oracle to synthesize a complete tool spec.
pub fn tool_spec_prompt(pad: &Scratchpad, partial_spec: &Value) -> String {
    format!(
        r#"Write a complete tool specification as ONE JSON object:

{{"name": "<snake_case identifier>", "description": "<one sentence>", "category": "<short tag>", "tags": ["..."], "parameters": [{{"name": "...", "type": "string|number|boolean|object|array", "required": true, "description": "..."}}], "return_schema": {{<shape of the return value>}}, "code": "<lua source>"}}

The code is Lua 5.4 and must define a global function `run(args)` receiving one table of named arguments matching the declared parameters, and returning a JSON-representable value. Available helpers: json.encode/json.decode, http.get/http.post, time.now/time.unix, execute_tool(name, args).

The tool is needed to help answer: {}

Requested spec so far (fill in whatever is missing, especially the code):
{}

Respond with the JSON object only."#,
        pad.question,
        compact(partial_spec)
    )
}

/// Corrective suffix appended when a decision violated the transition table
/// or a policy.
pub fn violation_hint(reason: &str) -> String {
    format!(
        "\n\nYour previous decision was rejected: {reason}. \
         Choose a legal state and respond with the JSON object only."
    )
}

fn compact(v: &Value) -> String {
    let rendered = v.to_string();
    // Keep prompts bounded even when a result embeds large payloads.
    if rendered.len() > 2000 {
        let mut end = 2000;
        while !rendered.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}… (truncated)", &rendered[..end])
    } else {
        rendered
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scratchpad::{CandidateTool, HistoryTurn};
    use serde_json::json;

    #[test]
    fn decision_schema_accepts_valid_decision() {
        let schema = decision_schema();
        let v = json!({"state": "fetch_tool", "reasoning": "need a tool", "action": {"query": "x"}});
        assert!(schema.validate(&v).is_ok());
        assert!(schema.validate(&json!({"state": "nope", "reasoning": "r"})).is_err());
    }

    #[test]
    fn prompt_includes_question_history_and_candidates() {
        let mut pad = Scratchpad::new(
            "What is 6 factorial?",
            vec![HistoryTurn {
                role: "user".into(),
                content: "earlier message".into(),
            }],
        );
        pad.add_candidates([CandidateTool {
            name: "calculate_factorial".into(),
            description: "computes n!".into(),
            score: 0.91,
            return_schema: Some(json!({"type": "number"})),
        }]);
        pad.record(
            crate::state::AgentState::FetchTool,
            "searching".into(),
            Some(json!({"query": "factorial"})),
            Some(json!({"count": 1})),
        );

        let prompt = decision_prompt(&pad);
        assert!(prompt.contains("What is 6 factorial?"));
        assert!(prompt.contains("earlier message"));
        assert!(prompt.contains("calculate_factorial"));
        assert!(prompt.contains(r#"Returns: {"type":"number"}"#));
        assert!(prompt.contains("state=fetch_tool"));
    }

    #[test]
    fn large_results_are_truncated_in_prompts() {
        let mut pad = Scratchpad::new("q", vec![]);
        pad.record(
            crate::state::AgentState::UseTool,
            "ran".into(),
            None,
            Some(json!({"blob": "x".repeat(10_000)})),
        );
        let prompt = decision_prompt(&pad);
        assert!(prompt.contains("truncated"));
        assert!(prompt.len() < 10_000);
    }
}
