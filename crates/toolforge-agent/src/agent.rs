//! The reasoning loop.
//!
//! [`Agent::run`] answers one question: each iteration asks the oracle for
//! the next state, validates the transition and the creation policies,
//! executes at most one side effect, and emits events over a bounded
//! channel. The loop ends at a terminal state, the iteration cap, the
//! wall-clock deadline, or consumer disconnect.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use toolforge_oracle::{Oracle, OracleError};
use toolforge_sandbox::Executor;
use toolforge_store::{NewTool, StoreError, ToolStore};

use crate::event::{AgentEvent, AgentOutcome};
use crate::prompt::{
    decision_prompt, decision_schema, tool_spec_prompt, tool_spec_schema, violation_hint,
};
use crate::scratchpad::{CandidateTool, HistoryTurn, Scratchpad};
use crate::state::{AgentState, Confidence};

/// Reasoning loop configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Maximum iterations per question.
    pub iter_max: u32,
    /// Wall-clock budget per question.
    pub t_max: Duration,
    /// Default result count for catalog searches.
    pub search_limit: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            iter_max: 8,
            t_max: Duration::from_secs(120),
            search_limit: 5,
        }
    }
}

/// Per-question overrides supplied by the client.
#[derive(Debug, Clone, Default)]
pub struct AskOptions {
    pub iter_max: Option<u32>,
    pub t_max: Option<Duration>,
    pub history: Vec<HistoryTurn>,
}

/// One oracle decision, parsed.
#[derive(Debug, Clone)]
struct Decision {
    state: AgentState,
    reasoning: String,
    action: Value,
}

/// The reasoning agent. Cheap to clone; one clone handles one question at a
/// time, many clones run concurrently.
#[derive(Clone)]
pub struct Agent {
    store: ToolStore,
    executor: Executor,
    oracle: Arc<dyn Oracle>,
    config: AgentConfig,
}

impl Agent {
    pub fn new(
        store: ToolStore,
        executor: Executor,
        oracle: Arc<dyn Oracle>,
        config: AgentConfig,
    ) -> Self {
        Self {
            store,
            executor,
            oracle,
            config,
        }
    }

    /// Answer one question, streaming events into `tx`.
    ///
    /// Event ordering matches the loop's internal order exactly. A closed
    /// receiver cancels the run: the current side effect completes, no
    /// further events are produced, and [`AgentOutcome::Cancelled`] is
    /// returned.
    pub async fn run(
        &self,
        question: &str,
        options: AskOptions,
        tx: mpsc::Sender<AgentEvent>,
    ) -> AgentOutcome {
        let iter_max = options.iter_max.unwrap_or(self.config.iter_max).max(1);
        let t_max = options.t_max.unwrap_or(self.config.t_max);
        let deadline = Instant::now() + t_max;
        let mut pad = Scratchpad::new(question, options.history);

        info!(question, iter_max, "question accepted");

        if tx
            .send(AgentEvent::Start {
                question: question.to_string(),
            })
            .await
            .is_err()
        {
            return AgentOutcome::Cancelled;
        }

        let mut iteration = 0u32;
        while iteration < iter_max {
            iteration += 1;

            if tx
                .send(AgentEvent::Iteration { number: iteration })
                .await
                .is_err()
            {
                return AgentOutcome::Cancelled;
            }

            if Instant::now() >= deadline {
                return self.finish_timeout(&tx, iteration).await;
            }

            // Ask the oracle for the next state; one corrective re-prompt on
            // an illegal decision, then give up.
            let decision = match self.next_decision(&pad).await {
                Ok(d) => d,
                Err(DecideFailure::Oracle(e)) => {
                    return self.finish_error(&tx, iteration, e.to_string(), "oracle").await;
                }
                Err(DecideFailure::Invalid(reason)) => {
                    return self.finish_error(&tx, iteration, reason, "agent").await;
                }
            };

            debug!(iteration, state = %decision.state, "decision");

            if tx
                .send(AgentEvent::State {
                    iteration,
                    state: decision.state,
                    reasoning: decision.reasoning.clone(),
                })
                .await
                .is_err()
            {
                return AgentOutcome::Cancelled;
            }

            match decision.state {
                AgentState::Respond => {
                    // A respond decision carrying an answer short-circuits to
                    // the terminal within the same iteration.
                    if let Some(answer) = decision.action.get("answer").and_then(Value::as_str) {
                        let confidence = self.final_confidence(&pad, &decision.action, None);
                        return self
                            .finish_final(
                                &tx,
                                iteration,
                                answer.to_string(),
                                confidence,
                                "direct answer suffices",
                            )
                            .await;
                    }
                    pad.record(AgentState::Respond, decision.reasoning, None, None);
                }

                AgentState::FetchTool => {
                    if self.step_fetch(&mut pad, &decision, iteration, &tx).await.is_err() {
                        return AgentOutcome::Cancelled;
                    }
                }

                AgentState::UseTool => {
                    if self.step_use(&mut pad, &decision, iteration, &tx).await.is_err() {
                        return AgentOutcome::Cancelled;
                    }
                }

                AgentState::AnalyzeToolsForComposite => {
                    if self.step_analyze(&mut pad, &decision, iteration, &tx).await.is_err() {
                        return AgentOutcome::Cancelled;
                    }
                }

                AgentState::CreateTool => {
                    match self.step_create(&mut pad, &decision, iteration, &tx).await {
                        Ok(()) => {}
                        Err(StepAbort::Cancelled) => return AgentOutcome::Cancelled,
                        Err(StepAbort::Fatal { message, location }) => {
                            return self.finish_error(&tx, iteration, message, &location).await;
                        }
                    }
                }

                AgentState::ExitResponse => {
                    let answer = decision
                        .action
                        .get("final_answer")
                        .or_else(|| decision.action.get("answer"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| self.partial_answer(&pad));
                    let confidence = self.final_confidence(&pad, &decision.action, None);
                    if tx
                        .send(AgentEvent::Final {
                            iteration,
                            answer: answer.clone(),
                            confidence,
                            iterations: iteration,
                        })
                        .await
                        .is_err()
                    {
                        return AgentOutcome::Cancelled;
                    }
                    return AgentOutcome::Final {
                        answer,
                        confidence,
                        iterations: iteration,
                    };
                }
            }

            if Instant::now() >= deadline {
                return self.finish_timeout(&tx, iteration).await;
            }
        }

        // Iteration cap reached: forced transition to the terminal with
        // whatever partial evidence exists, confidence capped at medium.
        warn!(iter_max, "iteration cap reached, forcing exit");
        let reasoning = format!("iteration cap ({iter_max}) reached");
        let answer = self.partial_answer(&pad);
        let confidence = self.final_confidence(&pad, &Value::Null, Some(Confidence::Medium));

        if tx
            .send(AgentEvent::State {
                iteration: iter_max,
                state: AgentState::ExitResponse,
                reasoning,
            })
            .await
            .is_err()
        {
            return AgentOutcome::Cancelled;
        }
        if tx
            .send(AgentEvent::Final {
                iteration: iter_max,
                answer: answer.clone(),
                confidence,
                iterations: iter_max,
            })
            .await
            .is_err()
        {
            return AgentOutcome::Cancelled;
        }
        AgentOutcome::Final {
            answer,
            confidence,
            iterations: iter_max,
        }
    }

    // ── decision ─────────────────────────────────────────────────────

    async fn next_decision(&self, pad: &Scratchpad) -> Result<Decision, DecideFailure> {
        let base = decision_prompt(pad);
        let schema = decision_schema();
        let mut prompt = base.clone();
        let mut last_reason = String::new();

        for _round in 0..2 {
            let value = self
                .oracle
                .decide(&prompt, &schema)
                .await
                .map_err(DecideFailure::Oracle)?;

            match self.check_decision(pad, &value) {
                Ok(decision) => return Ok(decision),
                Err(reason) => {
                    debug!(%reason, "decision rejected, re-prompting");
                    last_reason = reason;
                    prompt = format!("{base}{}", violation_hint(&last_reason));
                }
            }
        }

        Err(DecideFailure::Invalid(last_reason))
    }

    /// Parse and validate one decision against the transition table and the
    /// creation policies. AG is authoritative here, never the oracle.
    fn check_decision(&self, pad: &Scratchpad, value: &Value) -> Result<Decision, String> {
        let state_str = value
            .get("state")
            .and_then(Value::as_str)
            .ok_or_else(|| "decision is missing `state`".to_string())?;
        let state: AgentState = state_str.parse()?;

        let reasoning = value
            .get("reasoning")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let action = value.get("action").cloned().unwrap_or(Value::Null);

        if !AgentState::may_transition(pad.current_state, state) {
            let from = pad
                .current_state
                .map(|s| s.as_str())
                .unwrap_or("the initial state");
            return Err(format!("illegal transition from {from} to {state}"));
        }

        if state == AgentState::CreateTool && !pad.may_create() {
            return Err(if pad.pending_candidates {
                "reuse-before-generate: matching tools were found; try them with use_tool \
                 or inspect them with analyze_tools_for_composite before creating"
                    .to_string()
            } else {
                "search-before-create: run fetch_tool first; creation is only allowed after \
                 a search finds nothing usable or composite analysis rules out chaining"
                    .to_string()
            });
        }

        Ok(Decision {
            state,
            reasoning,
            action,
        })
    }

    // ── side effects ─────────────────────────────────────────────────

    async fn step_fetch(
        &self,
        pad: &mut Scratchpad,
        decision: &Decision,
        iteration: u32,
        tx: &mpsc::Sender<AgentEvent>,
    ) -> Result<(), Cancelled> {
        let query = decision
            .action
            .get("query")
            .and_then(Value::as_str)
            .unwrap_or(&pad.question)
            .to_string();
        let limit = decision
            .action
            .get("limit")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(self.config.search_limit);

        let action = json!({"query": query, "limit": limit});
        send(tx, AgentEvent::Action {
            iteration,
            action: action.clone(),
        })
        .await?;

        let result = match self.store.search(&query, limit, None, true).await {
            Ok(hits) => {
                if hits.is_empty() {
                    pad.empty_search_seen = true;
                    pad.pending_candidates = false;
                } else {
                    pad.pending_candidates = true;
                    pad.add_candidates(hits.iter().map(|h| CandidateTool {
                        name: h.tool.name.clone(),
                        description: h.tool.description.clone(),
                        score: h.score,
                        return_schema: h.tool.return_schema.clone(),
                    }));
                }
                let matches: Vec<Value> = hits
                    .iter()
                    .map(|h| {
                        let mut entry = json!({
                            "name": h.tool.name,
                            "description": h.tool.description,
                            "score": h.score,
                        });
                        if let Some(schema) = &h.tool.return_schema {
                            entry["return_schema"] = schema.clone();
                        }
                        entry
                    })
                    .collect();
                json!({"count": matches.len(), "matches": matches})
            }
            Err(e) => {
                pad.had_failure = true;
                json!({"error": e.to_string()})
            }
        };

        send(tx, AgentEvent::Result {
            iteration,
            state: AgentState::FetchTool,
            result: result.clone(),
        })
        .await?;
        pad.record(
            AgentState::FetchTool,
            decision.reasoning.clone(),
            Some(action),
            Some(result),
        );
        Ok(())
    }

    async fn step_use(
        &self,
        pad: &mut Scratchpad,
        decision: &Decision,
        iteration: u32,
        tx: &mpsc::Sender<AgentEvent>,
    ) -> Result<(), Cancelled> {
        let target = decision
            .action
            .get("tool")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let args = decision
            .action
            .get("args")
            .or_else(|| decision.action.get("params"))
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_else(Map::new);

        if target.is_empty() {
            pad.had_failure = true;
            let result = json!({"error": {"kind": "BadArguments", "message": "use_tool action named no tool"}});
            send(tx, AgentEvent::Result {
                iteration,
                state: AgentState::UseTool,
                result: result.clone(),
            })
            .await?;
            pad.record(AgentState::UseTool, decision.reasoning.clone(), None, Some(result));
            return Ok(());
        }

        // Bugged and inactive tools are refused before the action event is
        // ever emitted, so a trace never shows an attempt against them.
        if let Some(refusal) = self.refusal_for(&target).await {
            pad.had_failure = true;
            pad.pending_candidates = false;
            send(tx, AgentEvent::Result {
                iteration,
                state: AgentState::UseTool,
                result: refusal.clone(),
            })
            .await?;
            pad.record(AgentState::UseTool, decision.reasoning.clone(), None, Some(refusal));
            return Ok(());
        }

        let action = json!({"tool": target, "args": Value::Object(args.clone())});
        send(tx, AgentEvent::Action {
            iteration,
            action: action.clone(),
        })
        .await?;

        let result = match self.executor.execute_accounted(&target, args).await {
            Ok(success) => {
                let mut out = json!({"ok": success.value});
                if !success.stdout.is_empty() {
                    out["stdout"] = Value::String(success.stdout);
                }
                out
            }
            Err(e) => {
                pad.had_failure = true;
                json!({"error": {"kind": e.kind.as_str(), "message": e.message}})
            }
        };

        pad.pending_candidates = false;
        send(tx, AgentEvent::Result {
            iteration,
            state: AgentState::UseTool,
            result: result.clone(),
        })
        .await?;
        pad.record(
            AgentState::UseTool,
            decision.reasoning.clone(),
            Some(action),
            Some(result),
        );
        Ok(())
    }

    /// A refusal result for bugged or inactive targets, or `None` when the
    /// tool is executable (or unknown, which the executor reports itself).
    async fn refusal_for(&self, target: &str) -> Option<Value> {
        let tool = match self.store.get_by_name(target).await {
            Ok(tool) => tool,
            Err(StoreError::NotFound(_)) => match self.store.get_by_id(target).await {
                Ok(tool) => tool,
                Err(_) => return None,
            },
            Err(_) => return None,
        };
        if tool.is_bugged {
            Some(json!({"error": {
                "kind": "ToolBugged",
                "message": format!("tool `{}` is flagged as bugged; choose another path", tool.name),
            }}))
        } else if !tool.is_active {
            Some(json!({"error": {
                "kind": "Inactive",
                "message": format!("tool `{}` is deactivated", tool.name),
            }}))
        } else {
            None
        }
    }

    async fn step_analyze(
        &self,
        pad: &mut Scratchpad,
        decision: &Decision,
        iteration: u32,
        tx: &mpsc::Sender<AgentEvent>,
    ) -> Result<(), Cancelled> {
        let names: Vec<String> = decision
            .action
            .get("candidates")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_else(|| pad.candidates.iter().map(|c| c.name.clone()).collect());

        let action = json!({"candidates": names});
        send(tx, AgentEvent::Action {
            iteration,
            action: action.clone(),
        })
        .await?;

        // Detailed inspection means the oracle sees the tool internals —
        // code included — not just the summary a search already gave it.
        let mut details = Vec::new();
        for name in &names {
            match self.store.get_by_name(name).await {
                Ok(tool) => details.push(json!({
                    "name": tool.name,
                    "description": tool.description,
                    "category": tool.category,
                    "tags": tool.tags,
                    "parameters": tool.parameters,
                    "return_schema": tool.return_schema,
                    "code": tool.code,
                })),
                Err(e) => details.push(json!({"name": name, "error": e.to_string()})),
            }
        }
        let result = json!({"tools": details});

        pad.pending_candidates = false;
        send(tx, AgentEvent::Result {
            iteration,
            state: AgentState::AnalyzeToolsForComposite,
            result: result.clone(),
        })
        .await?;
        pad.record(
            AgentState::AnalyzeToolsForComposite,
            decision.reasoning.clone(),
            Some(action),
            Some(result),
        );
        Ok(())
    }

    async fn step_create(
        &self,
        pad: &mut Scratchpad,
        decision: &Decision,
        iteration: u32,
        tx: &mpsc::Sender<AgentEvent>,
    ) -> Result<(), StepAbort> {
        let mut spec_value = decision
            .action
            .get("spec")
            .cloned()
            .unwrap_or_else(|| decision.action.clone());

        // A spec without code needs a second oracle pass with the
        // tool-spec schema before registration.
        if spec_value.get("code").and_then(Value::as_str).is_none() {
            let prompt = tool_spec_prompt(pad, &spec_value);
            spec_value = self
                .oracle
                .decide(&prompt, &tool_spec_schema())
                .await
                .map_err(|e| StepAbort::Fatal {
                    message: e.to_string(),
                    location: "oracle".into(),
                })?;
        }

        let spec: NewTool = match serde_json::from_value(spec_value.clone()) {
            Ok(spec) => spec,
            Err(e) => {
                // Malformed spec: feed the problem back as an observation.
                pad.had_failure = true;
                let result = json!({"error": {"kind": "ValidationError", "message": e.to_string()}});
                send(tx, AgentEvent::Result {
                    iteration,
                    state: AgentState::CreateTool,
                    result: result.clone(),
                })
                .await
                .map_err(|_| StepAbort::Cancelled)?;
                pad.record(AgentState::CreateTool, decision.reasoning.clone(), None, Some(result));
                return Ok(());
            }
        };

        send(tx, AgentEvent::Thinking {
            iteration,
            message: format!("Synthesizing new tool `{}`", spec.name),
        })
        .await
        .map_err(|_| StepAbort::Cancelled)?;

        let action = json!({"spec": spec_value});
        send(tx, AgentEvent::Action {
            iteration,
            action: action.clone(),
        })
        .await
        .map_err(|_| StepAbort::Cancelled)?;

        let result = match self.register(spec).await {
            Ok(tool) => {
                pad.add_candidates([CandidateTool {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    score: 1.0,
                    return_schema: tool.return_schema.clone(),
                }]);
                json!({"created": tool.name, "id": tool.id})
            }
            Err(StoreError::NameConflict(name)) => {
                return Err(StepAbort::Fatal {
                    message: format!("tool name `{name}` conflicts even after a rename retry"),
                    location: "store".into(),
                });
            }
            Err(StoreError::Validation(reason)) => {
                pad.had_failure = true;
                json!({"error": {"kind": "ValidationError", "message": reason}})
            }
            Err(e) => {
                return Err(StepAbort::Fatal {
                    message: e.to_string(),
                    location: "store".into(),
                });
            }
        };

        send(tx, AgentEvent::Result {
            iteration,
            state: AgentState::CreateTool,
            result: result.clone(),
        })
        .await
        .map_err(|_| StepAbort::Cancelled)?;
        pad.record(
            AgentState::CreateTool,
            decision.reasoning.clone(),
            Some(action),
            Some(result),
        );
        Ok(())
    }

    /// Register a tool, retrying once under a numeric suffix on a name
    /// conflict.
    async fn register(&self, spec: NewTool) -> Result<toolforge_store::Tool, StoreError> {
        match self.store.create(spec.clone()).await {
            Err(StoreError::NameConflict(_)) => {
                let mut renamed = spec;
                renamed.name = format!("{}_2", renamed.name);
                debug!(name = %renamed.name, "name conflict, retrying with suffix");
                self.store.create(renamed).await
            }
            other => other,
        }
    }

    // ── terminals ────────────────────────────────────────────────────

    /// Confidence for the final answer: the oracle's label, forced down to
    /// `low` whenever any iteration failed, and optionally capped.
    fn final_confidence(&self, pad: &Scratchpad, action: &Value, cap: Option<Confidence>) -> Confidence {
        let mut confidence = action
            .get("confidence")
            .and_then(Value::as_str)
            .map(Confidence::parse_lenient)
            .unwrap_or(Confidence::Medium);
        if let Some(cap) = cap {
            confidence = confidence.min(cap);
        }
        if pad.had_failure {
            confidence = Confidence::Low;
        }
        confidence
    }

    /// Best-effort answer from partial evidence, for forced exits.
    fn partial_answer(&self, pad: &Scratchpad) -> String {
        let last_ok = pad
            .iterations
            .iter()
            .rev()
            .filter_map(|r| r.result.as_ref())
            .find_map(|r| r.get("ok"));
        match last_ok {
            Some(value) => format!("Partial result before stopping: {value}"),
            None => "I could not produce a complete answer within the allowed steps.".to_string(),
        }
    }

    async fn finish_final(
        &self,
        tx: &mpsc::Sender<AgentEvent>,
        iteration: u32,
        answer: String,
        confidence: Confidence,
        reasoning: &str,
    ) -> AgentOutcome {
        if tx
            .send(AgentEvent::State {
                iteration,
                state: AgentState::ExitResponse,
                reasoning: reasoning.to_string(),
            })
            .await
            .is_err()
        {
            return AgentOutcome::Cancelled;
        }
        if tx
            .send(AgentEvent::Final {
                iteration,
                answer: answer.clone(),
                confidence,
                iterations: iteration,
            })
            .await
            .is_err()
        {
            return AgentOutcome::Cancelled;
        }
        AgentOutcome::Final {
            answer,
            confidence,
            iterations: iteration,
        }
    }

    async fn finish_timeout(&self, tx: &mpsc::Sender<AgentEvent>, iteration: u32) -> AgentOutcome {
        warn!(iteration, "wall-clock budget exceeded");
        let message = "wall-clock budget exceeded".to_string();
        let _ = tx
            .send(AgentEvent::Timeout {
                iteration,
                message: message.clone(),
                iterations: iteration,
            })
            .await;
        AgentOutcome::Timeout {
            message,
            iterations: iteration,
        }
    }

    async fn finish_error(
        &self,
        tx: &mpsc::Sender<AgentEvent>,
        iteration: u32,
        message: String,
        location: &str,
    ) -> AgentOutcome {
        warn!(iteration, %message, location, "terminating with error");
        let _ = tx
            .send(AgentEvent::Error {
                iteration,
                message: message.clone(),
                location: location.to_string(),
            })
            .await;
        AgentOutcome::Error {
            message,
            location: location.to_string(),
        }
    }
}

// ── small plumbing types ─────────────────────────────────────────────

/// Marker for "the consumer went away".
struct Cancelled;

async fn send(tx: &mpsc::Sender<AgentEvent>, event: AgentEvent) -> Result<(), Cancelled> {
    tx.send(event).await.map_err(|_| Cancelled)
}

/// Decision-phase failures.
enum DecideFailure {
    Oracle(OracleError),
    Invalid(String),
}

/// Creation-step aborts.
enum StepAbort {
    Cancelled,
    Fatal { message: String, location: String },
}
