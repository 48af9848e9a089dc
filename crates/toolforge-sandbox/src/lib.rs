//! # toolforge-sandbox
//!
//! Sandboxed Lua executor for stored tools.
//!
//! Runs a tool's `run(args)` entry function inside a fresh restricted VM per
//! invocation: a fixed standard-library allowlist, host-provided `json`,
//! `http`, and `time` helpers, an instruction-hook wall-clock deadline, a
//! memory ceiling, and a chained `execute_tool` helper with a depth cap and
//! cycle detection. Accounted execution records telemetry and bug reports
//! through the catalog with exactly-once semantics.

pub mod env;
pub mod error;
pub mod executor;

// ── re-exports ───────────────────────────────────────────────────────

pub use error::{ExecError, ExecErrorKind, ExecResult};
pub use executor::{ExecConfig, ExecSuccess, Executor, validate_args};
