//! CLI entry point for toolforge.
//!
//! Provides the `toolforge` command with subcommands for serving the HTTP
//! surface, asking a one-shot question with a streamed trace, seeding the
//! catalog with starter tools, and checking catalog status.
//!
//! Configuration comes from environment variables (`TOOLFORGE_DB`,
//! `TOOLFORGE_LLM_KEYS`, `TOOLFORGE_LLM_MODEL`, budget overrides) with
//! clap flags on top.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use toolforge_agent::{Agent, AgentConfig, AgentEvent, AskOptions};
use toolforge_oracle::{
    LlmOracle, Oracle, OracleConfig, OracleError, OracleResult, ResponseSchema,
};
use toolforge_sandbox::{ExecConfig, Executor};
use toolforge_store::{Database, ListOptions, StoreError, ToolStore};
use toolforge_web::{WebConfig, WebServer};

mod seeds;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// toolforge — a self-extending tool-using agent.
#[derive(Parser)]
#[command(
    name = "toolforge",
    version,
    about = "A reasoning agent that searches, composes, and creates its own tools",
    long_about = "An autonomous agent that answers questions by reusing tools from a \
                  durable catalog, chaining them, or writing new ones in a sandboxed \
                  Lua runtime."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP/WebSocket server.
    Serve {
        /// Address to bind the HTTP server to.
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,

        /// Port to listen on.
        #[arg(long, short, default_value_t = 3000)]
        port: u16,
    },

    /// Ask one question and stream the trace to stdout.
    Ask {
        /// The question to answer.
        question: String,
    },

    /// Install the starter tools into the catalog.
    Seed,

    /// Show catalog status.
    Status,
}

// ---------------------------------------------------------------------------
// Configuration from the environment
// ---------------------------------------------------------------------------

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_var(name).and_then(|v| v.parse().ok())
}

fn db_path() -> String {
    env_var("TOOLFORGE_DB").unwrap_or_else(|| "data/toolforge.db".into())
}

fn oracle_from_env() -> Option<OracleConfig> {
    let keys: Vec<String> = env_var("TOOLFORGE_LLM_KEYS")?
        .split(',')
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect();
    if keys.is_empty() {
        return None;
    }

    let mut config = OracleConfig {
        api_keys: keys,
        ..OracleConfig::default()
    };
    if let Some(model) = env_var("TOOLFORGE_LLM_MODEL") {
        config.model = model;
    }
    if let Some(base_url) = env_var("TOOLFORGE_LLM_BASE_URL") {
        config.base_url = base_url;
    }
    if let Some(rate) = env_parse("TOOLFORGE_RATE_PER_MINUTE") {
        config.rate_per_minute = rate;
    }
    Some(config)
}

fn agent_config_from_env() -> AgentConfig {
    let mut config = AgentConfig::default();
    if let Some(iter_max) = env_parse("TOOLFORGE_ITER_MAX") {
        config.iter_max = iter_max;
    }
    if let Some(secs) = env_parse::<u64>("TOOLFORGE_T_MAX_SECS") {
        config.t_max = Duration::from_secs(secs);
    }
    config
}

fn exec_config_from_env() -> ExecConfig {
    let mut config = ExecConfig::default();
    if let Some(secs) = env_parse::<u64>("TOOLFORGE_T_EXEC_SECS") {
        config.timeout = Duration::from_secs(secs);
    }
    if let Some(allow) = env_parse::<bool>("TOOLFORGE_SANDBOX_HTTP") {
        config.allow_http = allow;
    }
    config
}

/// Stands in when no credentials are configured: the catalog surface works,
/// questions fail cleanly.
struct UnconfiguredOracle;

#[async_trait]
impl Oracle for UnconfiguredOracle {
    async fn decide(&self, _prompt: &str, _schema: &ResponseSchema) -> OracleResult<Value> {
        Err(OracleError::MissingCredentials)
    }
}

/// Compose the full stack: store, executor, oracle, agent.
async fn build_stack() -> Result<(ToolStore, Executor, Agent, bool)> {
    let path = db_path();
    if let Some(parent) = std::path::Path::new(&path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating database directory {}", parent.display()))?;
    }

    let db = Database::open_and_migrate(path.clone())
        .await
        .with_context(|| format!("opening catalog at {path}"))?;

    let mut store = ToolStore::new(db);
    if let Some(threshold) = env_parse::<i64>("TOOLFORGE_BUG_THRESHOLD") {
        store = store.with_bug_threshold(threshold);
    }
    if let Some(threshold) = env_parse::<f64>("TOOLFORGE_SEARCH_THRESHOLD") {
        store = store.with_search_config(toolforge_store::SearchConfig {
            threshold,
            ..Default::default()
        });
    }

    let executor = Executor::new(&store, exec_config_from_env());

    let (oracle, has_credentials): (Arc<dyn Oracle>, bool) = match oracle_from_env() {
        Some(config) => {
            let oracle = LlmOracle::new(config).context("constructing oracle")?;
            (Arc::new(oracle), true)
        }
        None => {
            warn!("TOOLFORGE_LLM_KEYS not set; questions will fail until configured");
            (Arc::new(UnconfiguredOracle), false)
        }
    };

    let agent = Agent::new(
        store.clone(),
        executor.clone(),
        oracle,
        agent_config_from_env(),
    );
    Ok((store, executor, agent, has_credentials))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_serve(bind: String, port: u16) -> Result<()> {
    let (store, executor, agent, has_credentials) = build_stack().await?;
    let config = WebConfig {
        bind_addr: bind,
        port,
    };
    let server = WebServer::new(config, store, executor, agent, has_credentials);
    info!(addr = %server.addr(), "serving");
    server
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("server failed: {e}"))
}

async fn cmd_ask(question: String) -> Result<()> {
    let (_store, _executor, agent, has_credentials) = build_stack().await?;
    if !has_credentials {
        anyhow::bail!("set TOOLFORGE_LLM_KEYS to ask questions");
    }

    let (tx, mut rx) = tokio::sync::mpsc::channel(64);
    let handle = tokio::spawn(async move { agent.run(&question, AskOptions::default(), tx).await });

    while let Some(event) = rx.recv().await {
        print_event(&event);
    }
    handle.await.context("agent task failed")?;
    Ok(())
}

fn print_event(event: &AgentEvent) {
    match event {
        AgentEvent::Start { question } => println!("▶ {question}"),
        AgentEvent::Iteration { number } => println!("— iteration {number}"),
        AgentEvent::Thinking { message, .. } => println!("  … {message}"),
        AgentEvent::State { state, reasoning, .. } => println!("  [{state}] {reasoning}"),
        AgentEvent::Action { action, .. } => println!("  action: {action}"),
        AgentEvent::Result { result, .. } => println!("  result: {result}"),
        AgentEvent::Final {
            answer,
            confidence,
            iterations,
            ..
        } => println!("\n{answer}\n(confidence: {confidence}, iterations: {iterations})"),
        AgentEvent::Timeout { message, .. } => println!("\ntimed out: {message}"),
        AgentEvent::Error { message, location, .. } => println!("\nerror in {location}: {message}"),
    }
}

async fn cmd_seed() -> Result<()> {
    let (store, _executor, _agent, _) = build_stack().await?;

    let mut installed = 0;
    for spec in seeds::starter_tools() {
        let name = spec.name.clone();
        match store.create(spec).await {
            Ok(_) => {
                info!(tool = %name, "seeded");
                installed += 1;
            }
            Err(StoreError::NameConflict(_)) => {
                info!(tool = %name, "already present, skipping");
            }
            Err(e) => return Err(e).with_context(|| format!("seeding `{name}`")),
        }
    }
    println!("installed {installed} starter tool(s)");
    Ok(())
}

async fn cmd_status() -> Result<()> {
    let (store, _executor, _agent, has_credentials) = build_stack().await?;

    let all = store
        .list(ListOptions {
            active_only: false,
            exclude_bugged: false,
            category: None,
        })
        .await?;
    let bugged = store.list_bugged().await?;
    let active = all.iter().filter(|t| t.is_active).count();
    let executions: i64 = all.iter().map(|t| t.execution_count).sum();

    println!("catalog: {}", db_path());
    println!("  tools: {} ({} active, {} bugged)", all.len(), active, bugged.len());
    println!("  total executions: {executions}");
    println!(
        "  oracle: {}",
        if has_credentials { "configured" } else { "not configured" }
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { bind, port } => cmd_serve(bind, port).await,
        Commands::Ask { question } => cmd_ask(question).await,
        Commands::Seed => cmd_seed().await,
        Commands::Status => cmd_status().await,
    }
}
