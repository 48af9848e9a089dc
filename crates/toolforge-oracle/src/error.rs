//! Oracle error types.

use thiserror::Error;

/// Alias for `Result<T, OracleError>`.
pub type OracleResult<T> = Result<T, OracleError>;

/// Errors surfaced by the oracle adapter.
#[derive(Debug, Error)]
pub enum OracleError {
    /// No credentials were configured.
    #[error("no oracle credentials configured")]
    MissingCredentials,

    /// An HTTP request to the provider failed.
    #[error("oracle request failed: {reason}")]
    RequestFailed { reason: String },

    /// The provider response body could not be parsed.
    #[error("oracle response parse error: {reason}")]
    ParseFailed { reason: String },

    /// The model's reply did not match the requested schema, even after one
    /// corrective re-prompt.
    #[error("oracle returned non-conforming output: {reason}")]
    BadOracleResponse { reason: String },

    /// Every credential exhausted its retry budget.
    #[error("all oracle credentials exhausted after {attempts} attempts")]
    Exhausted { attempts: u32 },
}

impl From<reqwest::Error> for OracleError {
    fn from(err: reqwest::Error) -> Self {
        Self::RequestFailed {
            reason: err.to_string(),
        }
    }
}
