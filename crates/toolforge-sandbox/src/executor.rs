//! Tool execution: argument validation, the per-call Lua run, chained
//! `execute_tool` calls, and accounted execution.
//!
//! Every invocation gets a fresh restricted VM (see [`crate::env`]); chained
//! calls recurse through the same path with a shared depth counter and a
//! path-based visited set for cycle detection. Accounting is exactly-once:
//! refusals record nothing, every real execution records telemetry, and
//! every real failure files one bug report.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mlua::{LuaSerdeExt, Value as LuaValue};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use toolforge_store::{ParamKind, StoreError, SyncCatalog, Tool, ToolParam, ToolStore};

use crate::env::{self, DEADLINE_MARKER, DENIED_MARKER};
use crate::error::{ExecError, ExecErrorKind, ExecResult};

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecConfig {
    /// Wall-clock budget per execution (chained calls included).
    pub timeout: Duration,
    /// Lua VM memory ceiling in bytes.
    pub memory_limit: usize,
    /// Maximum `execute_tool` recursion depth.
    pub max_chain_depth: usize,
    /// Whether the sandbox's `http` helper may perform requests.
    pub allow_http: bool,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            memory_limit: 64 * 1024 * 1024,
            max_chain_depth: 4,
            allow_http: true,
        }
    }
}

/// A successful execution.
#[derive(Debug, Clone)]
pub struct ExecSuccess {
    /// The value returned by the tool's `run` function.
    pub value: Value,
    /// Captured `print` output.
    pub stdout: String,
    /// Wall-clock duration.
    pub duration_ms: u64,
}

/// The sandboxed tool executor.
///
/// Cheap to clone; holds a synchronous catalog view for chained resolution
/// and accounting.
#[derive(Clone)]
pub struct Executor {
    catalog: SyncCatalog,
    config: ExecConfig,
}

impl Executor {
    /// Create an executor over `store` with the given configuration.
    pub fn new(store: &ToolStore, config: ExecConfig) -> Self {
        Self {
            catalog: store.sync_catalog(),
            config,
        }
    }

    /// Execute `tool` with `args` without touching analytics or bug state.
    ///
    /// Guards (`ToolBugged`, `Inactive`) and argument validation still apply.
    pub async fn execute(&self, tool: &Tool, args: Map<String, Value>) -> ExecResult<ExecSuccess> {
        let tool = tool.clone();
        let catalog = self.catalog.clone();
        let config = self.config.clone();

        tokio::task::spawn_blocking(move || {
            guard_tool(&tool)?;
            let validated = validate_args(&tool.parameters, args)?;
            let ctx = ChainCtx::new(catalog, config, &tool);
            run_tool(&tool, validated, &ctx, 0)
        })
        .await
        .map_err(|e| ExecError::runtime(format!("execution task failed: {e}")))?
    }

    /// Resolve a tool by name or id, execute it, and record telemetry with
    /// exactly-once semantics.
    ///
    /// Refusals (`NotFound`, `ToolBugged`, `Inactive`, `BadArguments`)
    /// happen before any code loads and record nothing. Every actual run
    /// increments the execution counter; every actual failure additionally
    /// files one bug report.
    pub async fn execute_accounted(
        &self,
        name_or_id: &str,
        args: Map<String, Value>,
    ) -> ExecResult<ExecSuccess> {
        let target = name_or_id.to_string();
        let catalog = self.catalog.clone();
        let config = self.config.clone();

        tokio::task::spawn_blocking(move || {
            execute_accounted_blocking(&catalog, &config, &target, args)
        })
        .await
        .map_err(|e| ExecError::runtime(format!("execution task failed: {e}")))?
    }
}

/// Blocking-pool body shared by the public entry point and chained calls.
fn execute_accounted_blocking(
    catalog: &SyncCatalog,
    config: &ExecConfig,
    target: &str,
    args: Map<String, Value>,
) -> ExecResult<ExecSuccess> {
    let tool = resolve(catalog, target)?;
    guard_tool(&tool)?;
    let validated = validate_args(&tool.parameters, args)?;

    let ctx = ChainCtx::new(catalog.clone(), config.clone(), &tool);
    let outcome = run_tool(&tool, validated, &ctx, 0);
    record(catalog, &tool.id, &outcome);
    outcome
}

fn resolve(catalog: &SyncCatalog, target: &str) -> ExecResult<Tool> {
    catalog.get(target).map_err(|e| match e {
        StoreError::NotFound(key) => ExecError::not_found(&key),
        other => ExecError::runtime(format!("catalog lookup failed: {other}")),
    })
}

fn guard_tool(tool: &Tool) -> ExecResult<()> {
    if tool.is_bugged {
        return Err(ExecError::new(
            ExecErrorKind::ToolBugged,
            format!("tool `{}` is flagged as bugged", tool.name),
        ));
    }
    if !tool.is_active {
        return Err(ExecError::new(
            ExecErrorKind::Inactive,
            format!("tool `{}` is deactivated", tool.name),
        ));
    }
    Ok(())
}

fn record(catalog: &SyncCatalog, tool_id: &str, outcome: &ExecResult<ExecSuccess>) {
    let recorded = match outcome {
        Ok(_) => catalog.record_success(tool_id),
        Err(e) => catalog.record_failure(tool_id, e.kind.as_str(), &e.message, &e.stack),
    };
    if let Err(e) = recorded {
        warn!(tool_id, error = %e, "failed to record execution telemetry");
    }
}

// ── argument validation ──────────────────────────────────────────────

/// Validate `args` against the declared parameters, coercing numeric
/// strings where the declaration says `number`.
pub fn validate_args(
    params: &[ToolParam],
    mut args: Map<String, Value>,
) -> ExecResult<Map<String, Value>> {
    for key in args.keys() {
        if !params.iter().any(|p| &p.name == key) {
            return Err(ExecError::bad_arguments(format!(
                "unknown argument `{key}`"
            )));
        }
    }

    for param in params {
        match args.get(&param.name) {
            None | Some(Value::Null) => {
                if param.required {
                    return Err(ExecError::bad_arguments(format!(
                        "missing required argument `{}`",
                        param.name
                    )));
                }
            }
            Some(value) => {
                let coerced = coerce(value, param.kind).ok_or_else(|| {
                    ExecError::bad_arguments(format!(
                        "argument `{}` must be a {}",
                        param.name, param.kind
                    ))
                })?;
                if let Some(coerced) = coerced {
                    args.insert(param.name.clone(), coerced);
                }
            }
        }
    }

    Ok(args)
}

/// `None` = type mismatch, `Some(None)` = already the right type,
/// `Some(Some(v))` = replace with the coerced value.
fn coerce(value: &Value, kind: ParamKind) -> Option<Option<Value>> {
    match (kind, value) {
        (ParamKind::String, Value::String(_)) => Some(None),
        (ParamKind::Number, Value::Number(_)) => Some(None),
        (ParamKind::Number, Value::String(s)) => {
            let n: f64 = s.trim().parse().ok()?;
            Some(Some(serde_json::Number::from_f64(n).map(Value::Number)?))
        }
        (ParamKind::Boolean, Value::Bool(_)) => Some(None),
        (ParamKind::Object, Value::Object(_)) => Some(None),
        (ParamKind::Array, Value::Array(_)) => Some(None),
        _ => None,
    }
}

// ── the chained-call context ─────────────────────────────────────────

/// State threaded through one execution and all its chained calls: the
/// shared deadline, the recursion depth limit, and the path-based visited
/// set used for cycle detection.
#[derive(Clone)]
struct ChainCtx {
    catalog: SyncCatalog,
    config: ExecConfig,
    deadline: Instant,
    visited: Arc<Mutex<HashSet<String>>>,
}

impl ChainCtx {
    fn new(catalog: SyncCatalog, config: ExecConfig, root: &Tool) -> Self {
        let deadline = Instant::now() + config.timeout;
        let mut visited = HashSet::new();
        visited.insert(root.id.clone());
        Self {
            catalog,
            config,
            deadline,
            visited: Arc::new(Mutex::new(visited)),
        }
    }
}

// ── the per-call Lua run ─────────────────────────────────────────────

/// Load `tool.code` into a fresh restricted VM and invoke `run(args)`.
fn run_tool(
    tool: &Tool,
    args: Map<String, Value>,
    ctx: &ChainCtx,
    depth: usize,
) -> ExecResult<ExecSuccess> {
    let started = Instant::now();
    debug!(tool = %tool.name, depth, "executing tool");

    let (lua, stdout) = env::build_vm(ctx.config.memory_limit, ctx.deadline, ctx.config.allow_http)
        .map_err(|e| ExecError::runtime(format!("sandbox setup failed: {e}")))?;

    install_execute_tool(&lua, ctx, depth)
        .map_err(|e| ExecError::runtime(format!("sandbox setup failed: {e}")))?;

    // Load the chunk. Any failure here — syntax error, top-level raise — is
    // a load failure, not a runtime one.
    lua.load(tool.code.as_str())
        .set_name(tool.name.clone())
        .exec()
        .map_err(|e| ExecError::compile(format!("tool code failed to load: {e}")))?;

    let run: mlua::Function = lua
        .globals()
        .get("run")
        .map_err(|_| ExecError::compile("tool code does not define a `run` function"))?;

    let lua_args = lua
        .to_value(&Value::Object(args))
        .map_err(|e| ExecError::runtime(format!("argument conversion failed: {e}")))?;

    let returned: LuaValue = run.call(lua_args).map_err(|e| classify(&e))?;

    let value: Value = lua
        .from_value(returned)
        .map_err(|e| ExecError::runtime(format!("return value is not representable as JSON: {e}")))?;

    let stdout = stdout.lock().map(|b| b.clone()).unwrap_or_default();
    Ok(ExecSuccess {
        value,
        stdout,
        duration_ms: started.elapsed().as_millis() as u64,
    })
}

/// Register the `execute_tool(name_or_id, args)` chaining helper.
fn install_execute_tool(lua: &mlua::Lua, ctx: &ChainCtx, depth: usize) -> mlua::Result<()> {
    let ctx = ctx.clone();
    let helper = lua.create_function(
        move |lua, (target, args): (String, Option<LuaValue>)| {
            let args: Map<String, Value> = match args {
                None => Map::new(),
                Some(value) => match lua.from_value::<Value>(value) {
                    Ok(Value::Object(map)) => map,
                    Ok(Value::Null) => Map::new(),
                    _ => {
                        return Err(mlua::Error::external(
                            "execute_tool: args must be a table of named values".to_string(),
                        ));
                    }
                },
            };

            let result = chained_call(&ctx, &target, args, depth + 1)
                .map_err(|e| mlua::Error::external(format!("execute_tool: {e}")))?;
            lua.to_value(&result.value)
        },
    )?;
    lua.globals().set("execute_tool", helper)
}

/// One chained call: depth and cycle checks, resolution, guards, recursive
/// run in a fresh VM, telemetry.
fn chained_call(
    ctx: &ChainCtx,
    target: &str,
    args: Map<String, Value>,
    depth: usize,
) -> ExecResult<ExecSuccess> {
    if depth > ctx.config.max_chain_depth {
        return Err(ExecError::runtime(format!(
            "tool chain depth limit ({}) exceeded",
            ctx.config.max_chain_depth
        )));
    }

    let tool = resolve(&ctx.catalog, target)?;
    guard_tool(&tool)?;
    let validated = validate_args(&tool.parameters, args)?;

    {
        let mut visited = ctx
            .visited
            .lock()
            .map_err(|_| ExecError::runtime("chain state poisoned"))?;
        if !visited.insert(tool.id.clone()) {
            return Err(ExecError::runtime(format!(
                "tool chain cycle detected at `{}`",
                tool.name
            )));
        }
    }

    let outcome = run_tool(&tool, validated, ctx, depth);
    record(&ctx.catalog, &tool.id, &outcome);

    if let Ok(mut visited) = ctx.visited.lock() {
        visited.remove(&tool.id);
    }

    outcome
}

/// Map a Lua call error onto the executor taxonomy.
///
/// Callback errors wrap their cause, so the whole source chain is inspected
/// for the deadline and capability markers before defaulting to a plain
/// runtime error.
fn classify(err: &mlua::Error) -> ExecError {
    let mut chain = vec![err.to_string()];
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        chain.push(cause.to_string());
        source = cause.source();
    }
    let full = chain.join("\n");

    let kind = if full.contains(DEADLINE_MARKER) {
        ExecErrorKind::Timeout
    } else if full.contains(DENIED_MARKER) {
        ExecErrorKind::ResourceDenied
    } else {
        ExecErrorKind::RuntimeError
    };

    let stack = match err {
        mlua::Error::CallbackError { traceback, .. } => traceback.clone(),
        _ => String::new(),
    };

    // The deepest cause is the message a human wants to read.
    let root = chain.last().map(String::as_str).unwrap_or_default();
    let message = root.lines().next().unwrap_or(root).to_string();
    ExecError::new(kind, message).with_stack(stack)
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn params(list: &[(&str, ParamKind, bool)]) -> Vec<ToolParam> {
        list.iter()
            .map(|(name, kind, required)| ToolParam {
                name: name.to_string(),
                kind: *kind,
                required: *required,
                description: String::new(),
            })
            .collect()
    }

    fn args(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn missing_required_argument_is_rejected() {
        let params = params(&[("a", ParamKind::Number, true)]);
        let err = validate_args(&params, Map::new()).unwrap_err();
        assert_eq!(err.kind, ExecErrorKind::BadArguments);
    }

    #[test]
    fn unknown_argument_is_rejected() {
        let params = params(&[("a", ParamKind::Number, true)]);
        let err = validate_args(&params, args(&[("a", 1.into()), ("b", 2.into())])).unwrap_err();
        assert_eq!(err.kind, ExecErrorKind::BadArguments);
    }

    #[test]
    fn numeric_string_is_coerced_when_declared_number() {
        let params = params(&[("a", ParamKind::Number, true)]);
        let out = validate_args(&params, args(&[("a", Value::String("42.5".into()))])).unwrap();
        assert_eq!(out["a"], serde_json::json!(42.5));
    }

    #[test]
    fn non_numeric_string_fails_number_declaration() {
        let params = params(&[("a", ParamKind::Number, true)]);
        let err =
            validate_args(&params, args(&[("a", Value::String("not a number".into()))]))
                .unwrap_err();
        assert_eq!(err.kind, ExecErrorKind::BadArguments);
    }

    #[test]
    fn optional_argument_may_be_absent() {
        let params = params(&[("verbose", ParamKind::Boolean, false)]);
        let out = validate_args(&params, Map::new()).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn type_mismatches_are_rejected() {
        let params = params(&[
            ("s", ParamKind::String, true),
            ("o", ParamKind::Object, true),
            ("l", ParamKind::Array, true),
        ]);
        let err = validate_args(
            &params,
            args(&[
                ("s", 1.into()),
                ("o", serde_json::json!({})),
                ("l", serde_json::json!([])),
            ]),
        )
        .unwrap_err();
        assert_eq!(err.kind, ExecErrorKind::BadArguments);
    }
}
