//! Router-level tests for the REST surface.
//!
//! Each test builds the full router over a live in-memory stack (store,
//! executor, scripted oracle) and drives it with `tower::ServiceExt::oneshot`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use toolforge_agent::{Agent, AgentConfig};
use toolforge_oracle::{Oracle, OracleError, OracleResult, ResponseSchema};
use toolforge_sandbox::{ExecConfig, Executor};
use toolforge_store::{Database, ToolStore};
use toolforge_web::{AppState, WebConfig, WebServer};

struct ScriptedOracle {
    script: Mutex<VecDeque<Value>>,
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn decide(&self, _prompt: &str, _schema: &ResponseSchema) -> OracleResult<Value> {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(OracleError::BadOracleResponse {
                reason: "script exhausted".into(),
            })
    }
}

async fn router_with_script(decisions: Vec<Value>) -> (ToolStore, Router) {
    let db = Database::open_in_memory_and_migrate().await.unwrap();
    let store = ToolStore::new(db);
    let executor = Executor::new(&store, ExecConfig::default());
    let oracle = Arc::new(ScriptedOracle {
        script: Mutex::new(decisions.into()),
    });
    let agent = Agent::new(
        store.clone(),
        executor.clone(),
        oracle,
        AgentConfig::default(),
    );
    let state = Arc::new(AppState {
        store: store.clone(),
        executor,
        agent,
        config: WebConfig::default(),
        has_credentials: true,
    });
    (store, WebServer::router_with_state(state))
}

async fn send_json(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = match body {
        Some(body) => Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn add_tool_body() -> Value {
    json!({
        "name": "add",
        "description": "add two numbers",
        "category": "math",
        "tags": ["math", "sum"],
        "parameters": [
            {"name": "a", "type": "number", "required": true, "description": "left"},
            {"name": "b", "type": "number", "required": true, "description": "right"},
        ],
        "return_schema": {"type": "number"},
        "code": "function run(args) return args.a + args.b end",
    })
}

// ═══════════════════════════════════════════════════════════════════════
//  Introspection
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn health_reports_ok() {
    let (_store, router) = router_with_script(vec![]).await;
    let (status, body) = send_json(&router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["components"]["database"], "connected");
}

#[tokio::test]
async fn config_exposes_non_secrets() {
    let (_store, router) = router_with_script(vec![]).await;
    let (status, body) = send_json(&router, "GET", "/config", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["oracle_configured"], true);
    assert!(body["search_threshold"].as_f64().is_some());
}

// ═══════════════════════════════════════════════════════════════════════
//  Catalog surface
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn tool_crud_over_rest() {
    let (_store, router) = router_with_script(vec![]).await;

    // Create.
    let (status, created) = send_json(&router, "POST", "/tools", Some(add_tool_body())).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap().to_string();

    // Duplicate name conflicts.
    let (status, _) = send_json(&router, "POST", "/tools", Some(add_tool_body())).await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Fetch by id and by name.
    let (status, by_id) = send_json(&router, "GET", &format!("/tools/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_id["name"], "add");
    assert_eq!(by_id["return_schema"], json!({"type": "number"}));
    let (status, _) = send_json(&router, "GET", "/tools/name/add", None).await;
    assert_eq!(status, StatusCode::OK);

    // List.
    let (status, listed) = send_json(&router, "GET", "/tools", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 1);

    // Update.
    let (status, updated) = send_json(
        &router,
        "PUT",
        &format!("/tools/{id}"),
        Some(json!({"description": "sums two numbers"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["description"], "sums two numbers");

    // Invalid create is a validation error.
    let (status, _) = send_json(
        &router,
        "POST",
        "/tools",
        Some(json!({"name": "not a name", "description": "x", "code": "function run(args) end"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    // Delete is idempotent.
    let (status, _) = send_json(&router, "DELETE", &format!("/tools/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send_json(&router, "DELETE", &format!("/tools/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send_json(&router, "GET", &format!("/tools/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn execute_endpoint_runs_and_reports() {
    let (_store, router) = router_with_script(vec![]).await;

    let (_, created) = send_json(&router, "POST", "/tools", Some(add_tool_body())).await;
    let id = created["id"].as_str().unwrap().to_string();

    // Success.
    let (status, body) = send_json(
        &router,
        "POST",
        &format!("/tools/{id}/execute"),
        Some(json!({"args": {"a": 2, "b": 3}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["result"], 5);

    // Bad arguments refuse with 400.
    let (status, body) = send_json(
        &router,
        "POST",
        &format!("/tools/{id}/execute"),
        Some(json!({"args": {"a": 2}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "BadArguments");

    // Missing tool is 404.
    let (status, _) = send_json(
        &router,
        "POST",
        "/tools/no-such-tool/execute",
        Some(json!({"args": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn search_and_bug_endpoints() {
    let (store, router) = router_with_script(vec![]).await;

    let (_, created) = send_json(&router, "POST", "/tools", Some(add_tool_body())).await;
    let id = created["id"].as_str().unwrap().to_string();

    // Search finds the tool, returned as ranked {tool, score} pairs.
    let (status, body) = send_json(&router, "GET", "/tools/search/add%20two%20numbers", None).await;
    assert_eq!(status, StatusCode::OK);
    let results = body.as_array().unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0]["tool"]["name"], "add");
    assert!(results[0]["score"].as_f64().unwrap() > 0.0);

    // Debug variant exposes the signal breakdown.
    let (status, body) =
        send_json(&router, "GET", "/tools/search-debug/add%20two%20numbers", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["results"][0]["breakdown"]["token_jaccard"].as_f64().is_some());

    // Bug it past the threshold, then it appears in the bugged list and
    // vanishes from default search.
    for _ in 0..3 {
        store
            .report_bug(&id, "RuntimeError", "boom", "")
            .await
            .unwrap();
    }
    let (status, bugged) = send_json(&router, "GET", "/tools/bugged/list", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bugged.as_array().unwrap().len(), 1);

    let (_, body) = send_json(&router, "GET", "/tools/search/add", None).await;
    assert!(body.as_array().unwrap().is_empty());

    // Executing it is refused.
    let (status, body) = send_json(
        &router,
        "POST",
        &format!("/tools/{id}/execute"),
        Some(json!({"args": {"a": 1, "b": 2}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "ToolBugged");

    // Clearing restores it.
    let (status, cleared) =
        send_json(&router, "POST", &format!("/tools/{id}/clear-bugs"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cleared["is_bugged"], false);
    assert_eq!(cleared["bug_count"], 0);

    // Deactivation hides it from the default list.
    let (status, _) = send_json(&router, "POST", &format!("/tools/{id}/deactivate"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, listed) = send_json(&router, "GET", "/tools", None).await;
    assert!(listed.as_array().unwrap().is_empty());
    let (_, listed) = send_json(&router, "GET", "/tools?active_only=false", None).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
}

// ═══════════════════════════════════════════════════════════════════════
//  Non-streaming ask
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn ask_returns_terminal_payload_only() {
    let decisions = vec![json!({
        "state": "respond",
        "reasoning": "no tools needed",
        "action": {"answer": "Hello from the agent.", "confidence": "high"},
    })];
    let (_store, router) = router_with_script(decisions).await;

    let (status, body) = send_json(
        &router,
        "POST",
        "/ask",
        Some(json!({"question": "Say hello."})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "final");
    assert_eq!(body["answer"], "Hello from the agent.");
    assert_eq!(body["confidence"], "high");
    assert_eq!(body["iterations"], 1);
}

#[tokio::test]
async fn ask_surfaces_agent_error_as_500() {
    // An exhausted script makes the oracle fail immediately.
    let (_store, router) = router_with_script(vec![]).await;

    let (status, body) = send_json(
        &router,
        "POST",
        "/ask",
        Some(json!({"question": "Anything."})),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["kind"], "error");
}
