//! The tool entity and its input/patch forms.
//!
//! A [`Tool`] is a named, parameterized Lua code unit. Tools are created by
//! the reasoning agent (or an admin path), mutated by the executor through
//! telemetry and bug reporting, and retrieved by the search engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{StoreError, StoreResult};

/// Maximum number of entries retained in a tool's bug log ring.
pub const BUG_LOG_CAP: usize = 32;

/// The declared type of a single tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl std::fmt::Display for ParamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        };
        write!(f, "{s}")
    }
}

/// A single declared parameter of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParam {
    /// Argument name, unique within the tool.
    pub name: String,
    /// Declared value type.
    #[serde(rename = "type")]
    pub kind: ParamKind,
    /// Whether callers must supply this argument.
    #[serde(default)]
    pub required: bool,
    /// Free-text description shown to the oracle.
    #[serde(default)]
    pub description: String,
}

/// One captured failure in a tool's bug log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BugReport {
    /// Unix timestamp of the failure.
    pub ts: i64,
    /// Machine-readable error kind (`RuntimeError`, `Timeout`, ...).
    pub error_kind: String,
    /// Human-readable message.
    pub message: String,
    /// Captured stack or traceback, if any.
    #[serde(default)]
    pub stack: String,
}

/// A persisted tool record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Opaque stable identifier (UUID v7).
    pub id: String,
    /// Unique human-readable identifier, `[a-zA-Z_][a-zA-Z0-9_]*`.
    pub name: String,
    /// Free text used for search and oracle prompts.
    pub description: String,
    /// Optional short category tag (`math`, `text`, `io`, ...).
    pub category: Option<String>,
    /// Short free-form tags.
    pub tags: Vec<String>,
    /// Ordered declared parameters.
    pub parameters: Vec<ToolParam>,
    /// Optional JSON description of the value `run` returns; shown to the
    /// oracle alongside the description to aid reuse decisions.
    pub return_schema: Option<Value>,
    /// Lua source defining a global `run(args)` entry function.
    pub code: String,
    /// Inactive tools are excluded from search and execution by default.
    pub is_active: bool,
    /// Derived: true iff `bug_count` crossed the configured threshold.
    pub is_bugged: bool,
    /// Failures recorded since the last clear.
    pub bug_count: i64,
    /// Bounded ring of captured failures, newest last.
    pub bug_log: Vec<BugReport>,
    /// Total number of executions (success and failure).
    pub execution_count: i64,
    /// Unix timestamp of the most recent execution.
    pub last_executed_at: Option<i64>,
    /// Unix timestamp of the most recent failure.
    pub last_error_at: Option<i64>,
    /// Unix timestamp of creation.
    pub created_at: i64,
    /// Unix timestamp of the last mutation.
    pub updated_at: i64,
}

/// Input for creating a new tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTool {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub parameters: Vec<ToolParam>,
    #[serde(default)]
    pub return_schema: Option<Value>,
    pub code: String,
}

impl NewTool {
    /// Validate the spec: name charset, non-empty fields, unique parameter
    /// names.
    pub fn validate(&self) -> StoreResult<()> {
        if !is_valid_name(&self.name) {
            return Err(StoreError::Validation(format!(
                "invalid tool name `{}`: must match [a-zA-Z_][a-zA-Z0-9_]*",
                self.name
            )));
        }
        if self.description.trim().is_empty() {
            return Err(StoreError::Validation("description must not be empty".into()));
        }
        if self.code.trim().is_empty() {
            return Err(StoreError::Validation("code must not be empty".into()));
        }
        ensure_unique_params(&self.parameters)
    }
}

/// Partial update applied to an existing tool. `None` fields are untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, with = "double_option")]
    pub category: Option<Option<String>>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub parameters: Option<Vec<ToolParam>>,
    #[serde(default, with = "double_option")]
    pub return_schema: Option<Option<Value>>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl ToolPatch {
    /// Validate the fields that are present.
    pub fn validate(&self) -> StoreResult<()> {
        if let Some(name) = &self.name
            && !is_valid_name(name)
        {
            return Err(StoreError::Validation(format!(
                "invalid tool name `{name}`: must match [a-zA-Z_][a-zA-Z0-9_]*"
            )));
        }
        if let Some(params) = &self.parameters {
            ensure_unique_params(params)?;
        }
        Ok(())
    }

    /// True if the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.category.is_none()
            && self.tags.is_none()
            && self.parameters.is_none()
            && self.return_schema.is_none()
            && self.code.is_none()
            && self.is_active.is_none()
    }
}

/// Check a tool name against `[a-zA-Z_][a-zA-Z0-9_]*`.
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn ensure_unique_params(params: &[ToolParam]) -> StoreResult<()> {
    let mut seen = std::collections::HashSet::new();
    for p in params {
        if p.name.trim().is_empty() {
            return Err(StoreError::Validation("parameter name must not be empty".into()));
        }
        if !seen.insert(p.name.as_str()) {
            return Err(StoreError::Validation(format!(
                "duplicate parameter name `{}`",
                p.name
            )));
        }
    }
    Ok(())
}

/// Serde helper distinguishing "absent" from "explicitly null" for patch
/// fields that can clear a value.
mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<T, S>(value: &Option<Option<T>>, ser: S) -> Result<S::Ok, S::Error>
    where
        T: Serialize,
        S: Serializer,
    {
        match value {
            Some(inner) => inner.serialize(ser),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(de).map(Some)
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> NewTool {
        NewTool {
            name: name.into(),
            description: "a test tool".into(),
            category: None,
            tags: vec![],
            parameters: vec![],
            return_schema: None,
            code: "function run(args) return 1 end".into(),
        }
    }

    #[test]
    fn name_charset() {
        assert!(is_valid_name("add"));
        assert!(is_valid_name("_private"));
        assert!(is_valid_name("calc_v2"));
        assert!(!is_valid_name("2fast"));
        assert!(!is_valid_name("with-dash"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("has space"));
    }

    #[test]
    fn validate_rejects_bad_name() {
        assert!(spec("ok_name").validate().is_ok());
        assert!(spec("not ok").validate().is_err());
    }

    #[test]
    fn validate_rejects_duplicate_params() {
        let mut s = spec("dup");
        s.parameters = vec![
            ToolParam {
                name: "a".into(),
                kind: ParamKind::Number,
                required: true,
                description: String::new(),
            },
            ToolParam {
                name: "a".into(),
                kind: ParamKind::String,
                required: false,
                description: String::new(),
            },
        ];
        assert!(s.validate().is_err());
    }

    #[test]
    fn param_kind_serde_is_lowercase() {
        let json = serde_json::to_string(&ParamKind::Number).unwrap();
        assert_eq!(json, "\"number\"");
        let back: ParamKind = serde_json::from_str("\"boolean\"").unwrap();
        assert_eq!(back, ParamKind::Boolean);
    }

    #[test]
    fn patch_double_option_distinguishes_null() {
        let p: ToolPatch = serde_json::from_str(r#"{"category": null}"#).unwrap();
        assert_eq!(p.category, Some(None));

        let p: ToolPatch = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(p.category, None);
        assert!(p.is_empty());
    }
}
