//! # toolforge-oracle
//!
//! LLM oracle adapter: the one component allowed to talk to the model
//! provider.
//!
//! Wraps one or more API credentials with rotation on rate-limit and auth
//! rejections, a per-credential token bucket, exponential backoff with
//! jitter on transient faults, and schema-validated JSON decisions with a
//! single corrective re-prompt. Everything upstream consumes the [`Oracle`]
//! trait, so tests drive the agent with a scripted implementation instead.

pub mod client;
pub mod error;
pub mod ratelimit;
pub mod retry;
pub mod schema;

// ── re-exports ───────────────────────────────────────────────────────

pub use client::{LlmOracle, Oracle, OracleConfig};
pub use error::{OracleError, OracleResult};
pub use ratelimit::TokenBucket;
pub use schema::{ResponseSchema, extract_json};
