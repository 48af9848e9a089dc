//! The per-question event stream.
//!
//! Events are emitted in the agent's internal order and serialized as
//! tagged JSON objects (`{"kind": "state", "iteration": 1, ...}`). Every
//! kind except `start` carries the iteration number it belongs to.

use serde::Serialize;
use serde_json::Value;

use crate::state::{AgentState, Confidence};

/// One event in a question's trace.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentEvent {
    /// The question was accepted.
    Start { question: String },

    /// A new iteration began.
    Iteration { number: u32 },

    /// Purely informational human-readable hint.
    Thinking { iteration: u32, message: String },

    /// The oracle chose a state.
    State {
        iteration: u32,
        state: AgentState,
        reasoning: String,
    },

    /// The side effect about to be executed for the current state.
    Action { iteration: u32, action: Value },

    /// The outcome of the current state's side effect.
    Result {
        iteration: u32,
        state: AgentState,
        result: Value,
    },

    /// Terminal: the final answer.
    Final {
        iteration: u32,
        answer: String,
        confidence: Confidence,
        iterations: u32,
    },

    /// Terminal: the wall-clock budget was exceeded.
    Timeout {
        iteration: u32,
        message: String,
        iterations: u32,
    },

    /// Terminal: an unrecoverable failure.
    Error {
        iteration: u32,
        message: String,
        #[serde(rename = "where")]
        location: String,
    },
}

impl AgentEvent {
    /// True for the three kinds that end a question.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Final { .. } | Self::Timeout { .. } | Self::Error { .. }
        )
    }

    /// The iteration this event belongs to, if any.
    pub fn iteration(&self) -> Option<u32> {
        match self {
            Self::Start { .. } => None,
            Self::Iteration { number } => Some(*number),
            Self::Thinking { iteration, .. }
            | Self::State { iteration, .. }
            | Self::Action { iteration, .. }
            | Self::Result { iteration, .. }
            | Self::Final { iteration, .. }
            | Self::Timeout { iteration, .. }
            | Self::Error { iteration, .. } => Some(*iteration),
        }
    }
}

/// The terminal outcome of one question, as returned by the non-streaming
/// entry point.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentOutcome {
    Final {
        answer: String,
        confidence: Confidence,
        iterations: u32,
    },
    Timeout {
        message: String,
        iterations: u32,
    },
    Error {
        message: String,
        #[serde(rename = "where")]
        location: String,
    },
    /// The consumer disconnected before a terminal event.
    Cancelled,
}

// ── tests ────────────────────────────────────────────────────────────
