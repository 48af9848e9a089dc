//! Agent error types.

use thiserror::Error;

/// Alias for `Result<T, AgentError>`.
pub type AgentResult<T> = Result<T, AgentError>;

/// Failures internal to the reasoning loop. Most are converted into trace
/// events rather than propagated; this type exists for the helpers that can
/// fail before an event is chosen.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The oracle failed after exhausting its internal retries.
    #[error("oracle failure: {0}")]
    Oracle(#[from] toolforge_oracle::OracleError),

    /// The catalog failed.
    #[error("store failure: {0}")]
    Store(#[from] toolforge_store::StoreError),

    /// The oracle produced a decision the state machine rejects, twice.
    #[error("invalid decision: {0}")]
    InvalidDecision(String),
}
