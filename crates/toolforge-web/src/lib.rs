//! # toolforge-web
//!
//! Web surface for toolforge.
//!
//! Exposes the reasoning agent and the tool catalog over HTTP:
//!
//! - A WebSocket endpoint (`/ws`) streaming the per-question event trace.
//! - A non-streaming `POST /ask` that returns only the terminal payload.
//! - The full REST catalog surface (CRUD, search, execution, bug state).
//! - `/health` and `/config` introspection endpoints.

pub mod api;
pub mod server;
pub mod state;
pub mod ws;

pub use server::WebServer;
pub use state::AppState;

/// Web server configuration.
#[derive(Debug, Clone)]
pub struct WebConfig {
    /// The address to bind the HTTP server to.
    pub bind_addr: String,
    /// The port to listen on.
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".into(),
            port: 3000,
        }
    }
}
