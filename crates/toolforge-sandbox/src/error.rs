//! Executor error taxonomy.
//!
//! Every failure an execution can produce is an [`ExecError`] carrying one of
//! the [`ExecErrorKind`] values, a human-readable message, and a captured
//! stack where one exists. The kind string is what gets recorded in a tool's
//! bug log and fed back to the reasoning agent.

use thiserror::Error;

/// Classification of an execution failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecErrorKind {
    /// Refused before execution: the tool is flagged bugged.
    ToolBugged,
    /// Refused before execution: the tool is deactivated.
    Inactive,
    /// A declared required parameter is missing, an argument fails its
    /// declared type, or an undeclared argument was supplied.
    BadArguments,
    /// The tool code failed to load or defines no `run` entry function.
    CompileError,
    /// The tool code raised during execution.
    RuntimeError,
    /// The wall-clock budget was exceeded.
    Timeout,
    /// The code attempted a capability outside the allowlist.
    ResourceDenied,
    /// The requested tool does not exist.
    NotFound,
}

impl ExecErrorKind {
    /// Stable string form, used in bug logs and wire payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToolBugged => "ToolBugged",
            Self::Inactive => "Inactive",
            Self::BadArguments => "BadArguments",
            Self::CompileError => "CompileError",
            Self::RuntimeError => "RuntimeError",
            Self::Timeout => "Timeout",
            Self::ResourceDenied => "ResourceDenied",
            Self::NotFound => "NotFound",
        }
    }

    /// Refusals happen before any code is loaded and record no telemetry.
    pub fn is_refusal(&self) -> bool {
        matches!(
            self,
            Self::ToolBugged | Self::Inactive | Self::BadArguments | Self::NotFound
        )
    }
}

impl std::fmt::Display for ExecErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An execution failure.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct ExecError {
    pub kind: ExecErrorKind,
    pub message: String,
    pub stack: String,
}

impl ExecError {
    pub fn new(kind: ExecErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stack: String::new(),
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = stack.into();
        self
    }

    pub fn bad_arguments(message: impl Into<String>) -> Self {
        Self::new(ExecErrorKind::BadArguments, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ExecErrorKind::RuntimeError, message)
    }

    pub fn compile(message: impl Into<String>) -> Self {
        Self::new(ExecErrorKind::CompileError, message)
    }

    pub fn not_found(name_or_id: &str) -> Self {
        Self::new(ExecErrorKind::NotFound, format!("tool not found: {name_or_id}"))
    }
}

/// Alias for `Result<T, ExecError>`.
pub type ExecResult<T> = Result<T, ExecError>;
