//! Web server setup and startup.
//!
//! [`WebServer`] composes the Axum router, registers all routes, and starts
//! the HTTP listener.

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderValue, Method};
use axum::routing::{delete, get, post, put};
use tower_http::cors::CorsLayer;

use toolforge_agent::Agent;
use toolforge_sandbox::Executor;
use toolforge_store::ToolStore;

use crate::WebConfig;
use crate::api;
use crate::state::AppState;
use crate::ws;

/// The toolforge web server.
pub struct WebServer {
    config: WebConfig,
    state: Arc<AppState>,
}

impl WebServer {
    /// Create a new web server over an already-composed agent stack.
    pub fn new(
        config: WebConfig,
        store: ToolStore,
        executor: Executor,
        agent: Agent,
        has_credentials: bool,
    ) -> Self {
        let state = Arc::new(AppState {
            store,
            executor,
            agent,
            config: config.clone(),
            has_credentials,
        });
        Self { config, state }
    }

    /// Return the `host:port` string this server will bind to.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.config.bind_addr, self.config.port)
    }

    /// Build the Axum router with all routes registered.
    pub fn router(&self) -> Router {
        Self::router_with_state(Arc::clone(&self.state))
    }

    /// Router construction, separated so tests can build one around an
    /// arbitrary state.
    pub fn router_with_state(state: Arc<AppState>) -> Router {
        let cors = CorsLayer::new()
            .allow_origin("*".parse::<HeaderValue>().expect("static header value"))
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers(tower_http::cors::Any);

        Router::new()
            // Question entry points.
            .route("/ask", post(api::ask))
            .route("/ws", get(ws::ws_handler))
            // Catalog.
            .route("/tools", get(api::list_tools))
            .route("/tools", post(api::create_tool))
            .route("/tools/{id}", get(api::get_tool))
            .route("/tools/{id}", put(api::update_tool))
            .route("/tools/{id}", delete(api::delete_tool))
            .route("/tools/name/{name}", get(api::get_tool_by_name))
            .route("/tools/{id}/execute", post(api::execute_tool))
            .route("/tools/{id}/deactivate", post(api::deactivate_tool))
            .route("/tools/{id}/clear-bugs", post(api::clear_bugs))
            .route("/tools/bugged/list", get(api::list_bugged))
            .route("/tools/search/{query}", get(api::search_tools))
            .route("/tools/search-debug/{query}", get(api::search_tools_debug))
            // Introspection.
            .route("/health", get(api::health))
            .route("/config", get(api::config))
            .layer(cors)
            .with_state(state)
    }

    /// Start the server and block until it is shut down.
    ///
    /// # Errors
    ///
    /// Returns an error if the TCP listener cannot be bound.
    pub async fn start(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = self.addr();
        let router = self.router();

        tracing::info!(addr = %addr, "starting web server");

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
