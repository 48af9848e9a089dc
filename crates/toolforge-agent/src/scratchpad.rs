//! Per-question working memory.
//!
//! The scratchpad accumulates everything the oracle needs to see on the
//! next iteration: prior `{state, reasoning, action, result}` tuples, the
//! catalog of candidate tools discovered so far, and the policy flags that
//! gate tool creation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::AgentState;

/// One prior conversation turn supplied by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: String,
    pub content: String,
}

/// A candidate tool surfaced by a search, kept for prompt context.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateTool {
    pub name: String,
    pub description: String,
    pub score: f64,
    /// Declared return shape, shown to the oracle alongside the description.
    pub return_schema: Option<Value>,
}

/// The record of one completed iteration.
#[derive(Debug, Clone, Serialize)]
pub struct IterationRecord {
    pub state: AgentState,
    pub reasoning: String,
    pub action: Option<Value>,
    pub result: Option<Value>,
}

/// Working memory for a single question.
#[derive(Debug)]
pub struct Scratchpad {
    pub question: String,
    pub history: Vec<HistoryTurn>,
    pub iterations: Vec<IterationRecord>,
    pub candidates: Vec<CandidateTool>,
    /// The state the machine is currently in (None until the first decision).
    pub current_state: Option<AgentState>,
    /// Some search came back empty at threshold — unlocks tool creation.
    pub empty_search_seen: bool,
    /// The latest search surfaced usable candidates that have not yet been
    /// tried or analyzed — blocks tool creation.
    pub pending_candidates: bool,
    /// Any iteration ended in a non-Ok result — downgrades confidence.
    pub had_failure: bool,
}

impl Scratchpad {
    pub fn new(question: impl Into<String>, history: Vec<HistoryTurn>) -> Self {
        Self {
            question: question.into(),
            history,
            iterations: Vec::new(),
            candidates: Vec::new(),
            current_state: None,
            empty_search_seen: false,
            pending_candidates: false,
            had_failure: false,
        }
    }

    /// Record a finished iteration and advance the machine state.
    pub fn record(
        &mut self,
        state: AgentState,
        reasoning: String,
        action: Option<Value>,
        result: Option<Value>,
    ) {
        self.iterations.push(IterationRecord {
            state,
            reasoning,
            action,
            result,
        });
        self.current_state = Some(state);
    }

    /// Merge freshly discovered candidates, deduplicating by name.
    pub fn add_candidates(&mut self, found: impl IntoIterator<Item = CandidateTool>) {
        for candidate in found {
            if let Some(existing) = self.candidates.iter_mut().find(|c| c.name == candidate.name) {
                existing.score = existing.score.max(candidate.score);
            } else {
                self.candidates.push(candidate);
            }
        }
    }

    /// Whether the search-before-create policy currently permits entering
    /// `create_tool`: a prior search must have come back empty, or the
    /// machine must be coming straight out of composite analysis — and no
    /// freshly found candidates may be awaiting a try.
    pub fn may_create(&self) -> bool {
        let analyzed = self.current_state == Some(AgentState::AnalyzeToolsForComposite);
        (self.empty_search_seen || analyzed) && (!self.pending_candidates || analyzed)
    }
}

// ── tests ────────────────────────────────────────────────────────────
