//! Restricted Lua environment construction.
//!
//! Each execution gets a fresh VM carrying only the `math`, `string`, and
//! `table` standard libraries plus the host-provided `json`, `http`, and
//! `time` globals. The base library's code-loading entry points are removed
//! after construction, `print` is captured into a per-execution buffer, and
//! an instruction hook aborts the VM once the wall-clock deadline passes.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mlua::{Lua, LuaOptions, LuaSerdeExt, StdLib, Value as LuaValue, Variadic, VmState};

/// Marker embedded in deadline-abort errors; execution failures containing
/// it are classified as `Timeout`.
pub const DEADLINE_MARKER: &str = "execution deadline exceeded";

/// Marker embedded in capability violations; classified as `ResourceDenied`.
pub const DENIED_MARKER: &str = "resource denied";

/// Instruction count between deadline checks.
const HOOK_INTERVAL: u32 = 4096;

/// Shared buffer collecting everything the tool `print`s.
pub type PrintBuffer = Arc<Mutex<String>>;

/// Build a restricted VM with the deadline hook installed.
///
/// `allow_http` controls whether the `http` global performs requests or
/// refuses every call as a capability violation.
///
/// Returns the VM and the print-capture buffer.
pub fn build_vm(
    memory_limit: usize,
    deadline: Instant,
    allow_http: bool,
) -> mlua::Result<(Lua, PrintBuffer)> {
    let lua = Lua::new_with(
        StdLib::MATH | StdLib::STRING | StdLib::TABLE,
        LuaOptions::default(),
    )?;
    lua.set_memory_limit(memory_limit)?;

    // The base library is always present; strip its code-loading and
    // filesystem entry points.
    let globals = lua.globals();
    for name in ["load", "loadstring", "dofile", "loadfile", "require"] {
        globals.set(name, LuaValue::Nil)?;
    }

    // Deadline hook: pure-Lua loops cannot outrun it, and every blocking
    // host function separately respects the same deadline.
    lua.set_hook(
        mlua::HookTriggers::new().every_nth_instruction(HOOK_INTERVAL),
        move |_lua, _debug| {
            if Instant::now() >= deadline {
                Err(mlua::Error::external(DEADLINE_MARKER.to_string()))
            } else {
                Ok(VmState::Continue)
            }
        },
    );

    let buffer = install_print(&lua)?;
    install_json(&lua)?;
    install_time(&lua)?;
    if allow_http {
        install_http(&lua, deadline)?;
    } else {
        install_http_denied(&lua)?;
    }

    Ok((lua, buffer))
}

/// Remaining time before `deadline`, or a deadline error if already passed.
pub fn remaining(deadline: Instant) -> mlua::Result<Duration> {
    let now = Instant::now();
    if now >= deadline {
        return Err(mlua::Error::external(DEADLINE_MARKER.to_string()));
    }
    Ok(deadline - now)
}

// ── host globals ─────────────────────────────────────────────────────

/// Replace `print` with a capture into a shared buffer.
fn install_print(lua: &Lua) -> mlua::Result<PrintBuffer> {
    let buffer: PrintBuffer = Arc::new(Mutex::new(String::new()));
    let sink = Arc::clone(&buffer);
    let print = lua.create_function(move |_, values: Variadic<LuaValue>| {
        let mut line = String::new();
        for (i, v) in values.iter().enumerate() {
            if i > 0 {
                line.push('\t');
            }
            match v {
                LuaValue::String(s) => line.push_str(&s.to_string_lossy()),
                LuaValue::Nil => line.push_str("nil"),
                LuaValue::Boolean(b) => line.push_str(if *b { "true" } else { "false" }),
                LuaValue::Integer(n) => line.push_str(&n.to_string()),
                LuaValue::Number(n) => line.push_str(&n.to_string()),
                other => line.push_str(&format!("<{}>", other.type_name())),
            }
        }
        line.push('\n');
        if let Ok(mut buf) = sink.lock() {
            buf.push_str(&line);
        }
        Ok(())
    })?;
    lua.globals().set("print", print)?;
    Ok(buffer)
}

/// `json.encode(value) -> string` and `json.decode(string) -> value`.
fn install_json(lua: &Lua) -> mlua::Result<()> {
    let json = lua.create_table()?;

    json.set(
        "encode",
        lua.create_function(|lua, value: LuaValue| {
            let v: serde_json::Value = lua.from_value(value)?;
            serde_json::to_string(&v).map_err(mlua::Error::external)
        })?,
    )?;

    json.set(
        "decode",
        lua.create_function(|lua, text: String| {
            let v: serde_json::Value =
                serde_json::from_str(&text).map_err(mlua::Error::external)?;
            lua.to_value(&v)
        })?,
    )?;

    lua.globals().set("json", json)
}

/// `time.now() -> rfc3339 string` and `time.unix() -> seconds`.
fn install_time(lua: &Lua) -> mlua::Result<()> {
    let time = lua.create_table()?;

    time.set(
        "now",
        lua.create_function(|_, ()| Ok(chrono::Utc::now().to_rfc3339()))?,
    )?;
    time.set(
        "unix",
        lua.create_function(|_, ()| Ok(chrono::Utc::now().timestamp()))?,
    )?;

    lua.globals().set("time", time)
}

/// `http.get(url)` and `http.post(url, body)` returning `{status, body}`.
///
/// Only `http://` and `https://` URLs are allowed; each request's timeout is
/// the remaining execution deadline. Runs on the blocking pool by
/// construction (the whole execution does), so blocking reqwest is safe.
fn install_http(lua: &Lua, deadline: Instant) -> mlua::Result<()> {
    let http = lua.create_table()?;

    http.set(
        "get",
        lua.create_function(move |lua, url: String| {
            check_url(&url)?;
            let client = blocking_client(deadline)?;
            let response = client.get(&url).send().map_err(mlua::Error::external)?;
            into_response_table(lua, response)
        })?,
    )?;

    http.set(
        "post",
        lua.create_function(move |lua, (url, body): (String, String)| {
            check_url(&url)?;
            let client = blocking_client(deadline)?;
            let response = client
                .post(&url)
                .body(body)
                .send()
                .map_err(mlua::Error::external)?;
            into_response_table(lua, response)
        })?,
    )?;

    lua.globals().set("http", http)
}

/// Installed in place of `http` when outbound HTTP is disabled: every call
/// is a capability violation.
fn install_http_denied(lua: &Lua) -> mlua::Result<()> {
    let http = lua.create_table()?;
    for method in ["get", "post"] {
        http.set(
            method,
            lua.create_function(|_, _: mlua::MultiValue| -> mlua::Result<()> {
                Err(mlua::Error::external(format!(
                    "{DENIED_MARKER}: outbound HTTP is disabled"
                )))
            })?,
        )?;
    }
    lua.globals().set("http", http)
}

fn check_url(url: &str) -> mlua::Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(mlua::Error::external(format!(
            "{DENIED_MARKER}: scheme not allowed for `{url}`"
        )))
    }
}

fn blocking_client(deadline: Instant) -> mlua::Result<reqwest::blocking::Client> {
    let timeout = remaining(deadline)?;
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(mlua::Error::external)
}

fn into_response_table(lua: &Lua, response: reqwest::blocking::Response) -> mlua::Result<mlua::Table> {
    let status = response.status().as_u16();
    let body = response.text().map_err(mlua::Error::external)?;
    let table = lua.create_table()?;
    table.set("status", status)?;
    table.set("body", body)?;
    Ok(table)
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn vm() -> (Lua, PrintBuffer) {
        build_vm(16 * 1024 * 1024, Instant::now() + Duration::from_secs(2), true).unwrap()
    }

    /// Render an error together with its whole source chain; callback
    /// errors keep their cause there rather than in `Display`.
    fn chain_text(err: &mlua::Error) -> String {
        let mut text = err.to_string();
        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            text.push('\n');
            text.push_str(&cause.to_string());
            source = cause.source();
        }
        text
    }

    #[test]
    fn standard_libs_present_dangerous_globals_absent() {
        let (lua, _) = vm();

        let ok: f64 = lua.load("return math.sqrt(16)").eval().unwrap();
        assert_eq!(ok, 4.0);

        let upper: String = lua.load("return string.upper('abc')").eval().unwrap();
        assert_eq!(upper, "ABC");

        for global in ["io", "os", "package", "load", "dofile", "loadfile", "require"] {
            let v: LuaValue = lua.globals().get(global).unwrap();
            assert!(matches!(v, LuaValue::Nil), "{global} should be nil");
        }
    }

    #[test]
    fn json_round_trip() {
        let (lua, _) = vm();
        let out: String = lua
            .load(r#"return json.encode(json.decode('{"a": [1, 2, 3]}'))"#)
            .eval()
            .unwrap();
        assert_eq!(out, r#"{"a":[1,2,3]}"#);
    }

    #[test]
    fn print_is_captured() {
        let (lua, buffer) = vm();
        lua.load("print('hello', 42, true)").exec().unwrap();
        assert_eq!(buffer.lock().unwrap().as_str(), "hello\t42\ttrue\n");
    }

    #[test]
    fn deadline_hook_aborts_infinite_loop() {
        let (lua, _) = build_vm(
            16 * 1024 * 1024,
            Instant::now() + Duration::from_millis(50),
            true,
        )
        .unwrap();
        let err = lua.load("while true do end").exec().unwrap_err();
        assert!(chain_text(&err).contains(DEADLINE_MARKER));
    }

    #[test]
    fn http_rejects_non_http_schemes() {
        let (lua, _) = vm();
        let err = lua
            .load(r#"return http.get("file:///etc/passwd")"#)
            .exec()
            .unwrap_err();
        assert!(chain_text(&err).contains(DENIED_MARKER));
    }

    #[test]
    fn http_can_be_disabled_entirely() {
        let (lua, _) = build_vm(
            16 * 1024 * 1024,
            Instant::now() + Duration::from_secs(2),
            false,
        )
        .unwrap();
        let err = lua
            .load(r#"return http.get("https://example.com")"#)
            .exec()
            .unwrap_err();
        assert!(chain_text(&err).contains(DENIED_MARKER));
    }

    #[test]
    fn memory_limit_is_enforced() {
        let (lua, _) =
            build_vm(1024 * 1024, Instant::now() + Duration::from_secs(2), true).unwrap();
        let result = lua
            .load("local s = 'x' while true do s = s .. s end")
            .exec();
        assert!(result.is_err());
    }
}
