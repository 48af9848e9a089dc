//! Response schema validation and JSON extraction.
//!
//! The oracle asks the model for a bare JSON object; models wrap replies in
//! prose or markdown fences often enough that extraction has to tolerate
//! both. Validation is intentionally small: required fields plus per-field
//! allowed string values — exactly what the agent's decision and tool-spec
//! schemas need.

use std::collections::HashMap;

use serde_json::Value;

/// A lightweight JSON object schema: required top-level fields and, for
/// string fields, an optional set of allowed values.
#[derive(Debug, Clone, Default)]
pub struct ResponseSchema {
    /// Field names that must be present and non-null.
    pub required: Vec<String>,
    /// Field name → allowed string values.
    pub allowed_values: HashMap<String, Vec<String>>,
}

impl ResponseSchema {
    /// Build a schema from required field names.
    pub fn with_required<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: fields.into_iter().map(Into::into).collect(),
            allowed_values: HashMap::new(),
        }
    }

    /// Constrain a string field to a set of allowed values.
    pub fn allow<I, S>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_values
            .insert(field.into(), values.into_iter().map(Into::into).collect());
        self
    }

    /// Validate an object against this schema. Returns a human-readable
    /// mismatch description suitable for a corrective re-prompt.
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        let Some(obj) = value.as_object() else {
            return Err("response must be a JSON object".into());
        };

        for field in &self.required {
            match obj.get(field) {
                None | Some(Value::Null) => {
                    return Err(format!("missing required field `{field}`"));
                }
                Some(_) => {}
            }
        }

        for (field, allowed) in &self.allowed_values {
            if let Some(value) = obj.get(field) {
                let Some(s) = value.as_str() else {
                    return Err(format!("field `{field}` must be a string"));
                };
                if !allowed.iter().any(|a| a == s) {
                    return Err(format!(
                        "field `{field}` has invalid value `{s}`; allowed: {}",
                        allowed.join(", ")
                    ));
                }
            }
        }

        Ok(())
    }

    /// Render the schema as a short hint for the corrective re-prompt.
    pub fn describe(&self) -> String {
        let mut parts = vec![format!("required fields: {}", self.required.join(", "))];
        for (field, allowed) in &self.allowed_values {
            parts.push(format!("`{field}` must be one of: {}", allowed.join(" | ")));
        }
        parts.join("; ")
    }
}

/// Extract the first JSON object from model output.
///
/// Handles three shapes: a bare object, an object inside a ```json fence,
/// and an object embedded in surrounding prose (first balanced `{...}`
/// span, brace counting aware of strings and escapes).
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();

    // Fast path: the whole reply is the object.
    if trimmed.starts_with('{')
        && let Ok(v) = serde_json::from_str::<Value>(trimmed)
    {
        return Some(v);
    }

    // Fenced block.
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if let Ok(v) = serde_json::from_str::<Value>(inner) {
                return Some(v);
            }
        }
    }

    // First balanced object span.
    let bytes = trimmed.as_bytes();
    let start = trimmed.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return serde_json::from_str(&trimmed[start..=i]).ok();
                }
            }
            _ => {}
        }
    }
    None
}

// ── tests ────────────────────────────────────────────────────────────
