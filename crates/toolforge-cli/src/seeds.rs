//! Starter tools installed by `toolforge seed`.
//!
//! A small library of everyday tools so a fresh catalog has something to
//! find: basic arithmetic, a factorial, character counting, JSON
//! pretty-printing, and temperature conversion. They also serve as live
//! fixtures for search relevance.

use serde_json::json;
use toolforge_store::{NewTool, ParamKind, ToolParam};

fn param(name: &str, kind: ParamKind, description: &str) -> ToolParam {
    ToolParam {
        name: name.into(),
        kind,
        required: true,
        description: description.into(),
    }
}

/// The full starter set, in installation order.
pub fn starter_tools() -> Vec<NewTool> {
    vec![
        NewTool {
            name: "add".into(),
            description: "Adds two numbers together and returns the sum.".into(),
            category: Some("math".into()),
            tags: vec!["addition".into(), "arithmetic".into(), "calculation".into()],
            parameters: vec![
                param("a", ParamKind::Number, "first addend"),
                param("b", ParamKind::Number, "second addend"),
            ],
            return_schema: Some(json!({"type": "number"})),
            code: "function run(args) return args.a + args.b end".into(),
        },
        NewTool {
            name: "multiply".into(),
            description: "Multiplies two numbers together and returns the product.".into(),
            category: Some("math".into()),
            tags: vec![
                "multiplication".into(),
                "arithmetic".into(),
                "calculation".into(),
            ],
            parameters: vec![
                param("a", ParamKind::Number, "first factor"),
                param("b", ParamKind::Number, "second factor"),
            ],
            return_schema: Some(json!({"type": "number"})),
            code: "function run(args) return args.a * args.b end".into(),
        },
        NewTool {
            name: "calculate_factorial".into(),
            description: "Calculates the factorial of a non-negative integer.".into(),
            category: Some("math".into()),
            tags: vec!["factorial".into(), "number".into(), "calculation".into()],
            parameters: vec![param("number", ParamKind::Number, "the non-negative integer")],
            return_schema: Some(json!({"type": "number"})),
            code: r#"
function run(args)
    local n = math.floor(args.number)
    if n < 0 then
        error("factorial is not defined for negative numbers")
    end
    local result = 1
    for i = 2, n do
        result = result * i
    end
    return result
end
"#
            .into(),
        },
        NewTool {
            name: "count_char_in_string".into(),
            description: "Counts the occurrences of a specified character within a given string."
                .into(),
            category: Some("text".into()),
            tags: vec!["text".into(), "count".into(), "character".into()],
            parameters: vec![
                param("text", ParamKind::String, "the string to scan"),
                param("char_to_count", ParamKind::String, "the character to count"),
            ],
            return_schema: Some(json!({"type": "number"})),
            code: r#"
function run(args)
    local count = 0
    local needle = string.sub(args.char_to_count, 1, 1)
    for i = 1, #args.text do
        if string.sub(args.text, i, i) == needle then
            count = count + 1
        end
    end
    return count
end
"#
            .into(),
        },
        NewTool {
            name: "json_pretty".into(),
            description: "Parses a JSON string and returns the decoded value.".into(),
            category: Some("text".into()),
            tags: vec!["json".into(), "parse".into(), "format".into()],
            parameters: vec![param("text", ParamKind::String, "the JSON document")],
            return_schema: Some(json!({"type": "object"})),
            code: "function run(args) return json.decode(args.text) end".into(),
        },
        NewTool {
            name: "temperature_convert".into(),
            description: "Converts a temperature between celsius and fahrenheit.".into(),
            category: Some("math".into()),
            tags: vec![
                "temperature".into(),
                "celsius".into(),
                "fahrenheit".into(),
                "conversion".into(),
            ],
            parameters: vec![
                param("value", ParamKind::Number, "the temperature to convert"),
                param("to", ParamKind::String, "target unit: celsius or fahrenheit"),
            ],
            return_schema: Some(json!({"type": "number"})),
            code: r#"
function run(args)
    if args.to == "fahrenheit" then
        return args.value * 9 / 5 + 32
    elseif args.to == "celsius" then
        return (args.value - 32) * 5 / 9
    end
    error("unknown target unit: " .. args.to)
end
"#
            .into(),
        },
    ]
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_starter_specs_validate() {
        for spec in starter_tools() {
            spec.validate().unwrap_or_else(|e| panic!("{}: {e}", spec.name));
        }
    }

    #[test]
    fn starter_names_are_unique() {
        let tools = starter_tools();
        let mut names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), tools.len());
    }
}
