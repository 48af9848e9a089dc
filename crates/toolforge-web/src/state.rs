//! Shared application state for the web server.
//!
//! [`AppState`] is wrapped in an `Arc` and shared across all request
//! handlers and WebSocket connections.

use toolforge_agent::Agent;
use toolforge_sandbox::Executor;
use toolforge_store::ToolStore;

use crate::WebConfig;

/// Shared state accessible from every Axum handler.
#[derive(Clone)]
pub struct AppState {
    /// The tool catalog.
    pub store: ToolStore,

    /// The sandboxed executor, for direct REST executions.
    pub executor: Executor,

    /// The reasoning agent; cloned per question.
    pub agent: Agent,

    /// Web server configuration.
    pub config: WebConfig,

    /// Whether oracle credentials are configured, reported by `/health`.
    pub has_credentials: bool,
}
