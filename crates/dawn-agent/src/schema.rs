//! Provider tool-schema generation.
//!
//! Walks the registry's enabled tools (in registration order) and emits the
//! schema shape each protocol expects, plus the prompt block used for
//! tag-style invocation on models without native function calling.

use serde_json::{Map, Value, json};

use dawn_command::ToolRegistry;
use dawn_command::tool::{ParamType, ToolSpec};

/// OpenAI-style `tools` array: `{type: "function", function: {...}}`.
pub fn openai_tool_schemas(registry: &ToolRegistry) -> Vec<Value> {
    let mut schemas = Vec::new();
    registry.for_each_enabled(|tool| {
        schemas.push(json!({
            "type": "function",
            "function": {
                "name": tool.spec.name,
                "description": tool.spec.description,
                "parameters": parameters_schema(&tool.spec),
            }
        }));
    });
    schemas
}

/// Claude-style `tools` array: `{name, description, input_schema}`.
pub fn claude_tool_schemas(registry: &ToolRegistry) -> Vec<Value> {
    let mut schemas = Vec::new();
    registry.for_each_enabled(|tool| {
        schemas.push(json!({
            "name": tool.spec.name,
            "description": tool.spec.description,
            "input_schema": parameters_schema(&tool.spec),
        }));
    });
    schemas
}

/// Prompt block describing the inline `<command>` syntax for models without
/// native function calling.
pub fn tag_tool_prompt(registry: &ToolRegistry) -> String {
    let mut lines = vec![
        "You can control devices by emitting a tag of the form".to_string(),
        r#"<command>{"device":"<name>","action":"<action>","value":"<value>"}</command>"#.to_string(),
        "Available devices:".to_string(),
    ];

    registry.for_each_enabled(|tool| {
        let params: Vec<String> = tool
            .spec
            .params
            .iter()
            .map(|p| {
                if p.enum_values.is_empty() {
                    p.name.clone()
                } else {
                    format!("{} ({})", p.name, p.enum_values.join("|"))
                }
            })
            .collect();

        let line = if params.is_empty() {
            format!("- {}: {}", tool.spec.name, tool.spec.description)
        } else {
            format!(
                "- {}: {} [{}]",
                tool.spec.name,
                tool.spec.description,
                params.join(", ")
            )
        };
        lines.push(line);
    });

    lines.join("\n")
}

/// JSON Schema object for a tool's parameters.
fn parameters_schema(spec: &ToolSpec) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for param in &spec.params {
        let mut schema = Map::new();
        schema.insert("type".into(), json!(json_type(param.param_type)));
        if !param.description.is_empty() {
            schema.insert("description".into(), json!(param.description));
        }
        if !param.enum_values.is_empty() {
            schema.insert("enum".into(), json!(param.enum_values));
        }
        properties.insert(param.name.clone(), Value::Object(schema));

        if param.required {
            required.push(param.name.clone());
        }
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn json_type(param_type: ParamType) -> &'static str {
    match param_type {
        ParamType::String | ParamType::Enum => "string",
        ParamType::Integer => "integer",
        ParamType::Number => "number",
        ParamType::Boolean => "boolean",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
