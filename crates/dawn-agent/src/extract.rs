//! Tool-call extraction.
//!
//! Normalizes the three tool-invocation shapes a model response can carry
//! into one canonical [`ToolCall`] list:
//!
//! - **Tagged** -- inline `<command>…</command>` JSON regions in free text
//!   (local models without native function calling).
//! - **OpenAI** -- `choices[0].message.tool_calls[*]` objects.
//! - **Claude** -- `content[*]` blocks with `type == "tool_use"`.
//!
//! At most [`MAX_TOOL_CALLS`] calls are returned per response; overflow is
//! truncated with a log.  Call order is preserved exactly as it appeared in
//! the response.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use dawn_command::tool::{MAX_TOOL_CALLS, ToolCall};

use crate::types::{BackendResponse, ProviderFormat};

/// Matches one inline command region, non-greedy, across newlines.
static COMMAND_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<command>(.*?)</command>").expect("static regex compiles"));

/// A normalized extraction: the tool calls plus the remaining assistant
/// text (for tagged input, the text outside the tags, which the caller may
/// feed to TTS).
#[derive(Debug, Default)]
pub struct Extraction {
    /// Tool calls in response order, at most [`MAX_TOOL_CALLS`].
    pub calls: Vec<ToolCall>,
    /// Assistant text with tool syntax removed.
    pub text: String,
}

/// Extract tool calls from a backend response according to its protocol.
pub fn extract(format: ProviderFormat, response: &BackendResponse) -> Extraction {
    match format {
        ProviderFormat::Tag => extract_tagged(&response.text),
        ProviderFormat::OpenAi => match &response.raw {
            Some(raw) => extract_openai(raw),
            None => Extraction {
                calls: Vec::new(),
                text: response.text.clone(),
            },
        },
        ProviderFormat::Claude => match &response.raw {
            Some(raw) => extract_claude(raw),
            None => Extraction {
                calls: Vec::new(),
                text: response.text.clone(),
            },
        },
    }
}

// ---------------------------------------------------------------------------
// Shape A: inline tagged JSON
// ---------------------------------------------------------------------------

/// Scan free text for `<command>{…}</command>` regions.
///
/// Each region must parse as a JSON object with at least a `device` field;
/// malformed regions are logged and skipped.  The returned text is the
/// input with all tag regions removed.
pub fn extract_tagged(text: &str) -> Extraction {
    let mut calls = Vec::new();
    let mut spoken = String::new();
    let mut cursor = 0usize;

    for captures in COMMAND_TAG.captures_iter(text) {
        let whole = captures.get(0).expect("group 0 always present");
        let body = captures.get(1).expect("group 1 in pattern").as_str();

        spoken.push_str(&text[cursor..whole.start()]);
        cursor = whole.end();

        let parsed: Value = match serde_json::from_str(body.trim()) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, region = body, "malformed command tag skipped");
                continue;
            }
        };

        let Some(device) = parsed.get("device").and_then(Value::as_str) else {
            warn!(region = body, "command tag without device field skipped");
            continue;
        };

        if calls.len() == MAX_TOOL_CALLS {
            warn!(cap = MAX_TOOL_CALLS, "tool call list full, truncating");
            continue;
        }

        calls.push(ToolCall {
            id: String::new(),
            name: device.to_string(),
            arguments: parsed.to_string(),
        });
    }

    spoken.push_str(&text[cursor..]);
    let text = spoken.trim().to_string();

    debug!(calls = calls.len(), "tagged extraction complete");
    Extraction { calls, text }
}

// ---------------------------------------------------------------------------
// Shape B: OpenAI tool_calls array
// ---------------------------------------------------------------------------

/// Extract from `choices[0].message.tool_calls[*]`, emitting each element's
/// id, function name, and argument string verbatim.
pub fn extract_openai(response: &Value) -> Extraction {
    let message = &response["choices"][0]["message"];
    let text = message["content"].as_str().unwrap_or_default().to_string();

    let mut calls = Vec::new();
    if let Some(array) = message["tool_calls"].as_array() {
        for element in array {
            if calls.len() == MAX_TOOL_CALLS {
                warn!(cap = MAX_TOOL_CALLS, "tool call list full, truncating");
                break;
            }
            let function = &element["function"];
            calls.push(ToolCall {
                id: element["id"].as_str().unwrap_or_default().to_string(),
                name: function["name"].as_str().unwrap_or_default().to_string(),
                arguments: function["arguments"].as_str().unwrap_or("{}").to_string(),
            });
        }
    }

    Extraction { calls, text }
}

// ---------------------------------------------------------------------------
// Shape C: Claude content blocks
// ---------------------------------------------------------------------------

/// Extract from `content[*]` blocks with `type == "tool_use"`, serializing
/// each block's `input` object for transport into the executor.
pub fn extract_claude(response: &Value) -> Extraction {
    let mut calls = Vec::new();
    let mut text_parts: Vec<&str> = Vec::new();

    if let Some(blocks) = response["content"].as_array() {
        for block in blocks {
            match block["type"].as_str() {
                Some("text") => {
                    if let Some(t) = block["text"].as_str() {
                        text_parts.push(t);
                    }
                }
                Some("tool_use") => {
                    if calls.len() == MAX_TOOL_CALLS {
                        warn!(cap = MAX_TOOL_CALLS, "tool call list full, truncating");
                        continue;
                    }
                    calls.push(ToolCall {
                        id: block["id"].as_str().unwrap_or_default().to_string(),
                        name: block["name"].as_str().unwrap_or_default().to_string(),
                        arguments: block["input"].to_string(),
                    });
                }
                _ => {}
            }
        }
    }

    Extraction {
        calls,
        text: text_parts.join(""),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tagged_single_command_with_surrounding_text() {
        let input = "Sure. <command>{\"device\":\"weather\",\"action\":\"today\",\"value\":\"Paris\"}</command>";
        let extraction = extract_tagged(input);

        assert_eq!(extraction.calls.len(), 1);
        let call = &extraction.calls[0];
        assert!(call.id.is_empty());
        assert_eq!(call.name, "weather");

        let args: Value = serde_json::from_str(&call.arguments).unwrap();
        assert_eq!(args["device"], "weather");
        assert_eq!(args["action"], "today");
        assert_eq!(args["value"], "Paris");

        // The plain text survives for TTS.
        assert_eq!(extraction.text, "Sure.");
    }

    #[test]
    fn tagged_malformed_region_skipped() {
        let input = "a <command>{not json}</command> b <command>{\"device\":\"lights\"}</command> c";
        let extraction = extract_tagged(input);
        assert_eq!(extraction.calls.len(), 1);
        assert_eq!(extraction.calls[0].name, "lights");
        assert_eq!(extraction.text, "a  b  c");
    }

    #[test]
    fn tagged_missing_device_skipped() {
        let extraction = extract_tagged("<command>{\"action\":\"get\"}</command>");
        assert!(extraction.calls.is_empty());
    }

    #[test]
    fn tagged_multiple_commands_in_order() {
        let input = "<command>{\"device\":\"a\"}</command><command>{\"device\":\"b\"}</command>";
        let extraction = extract_tagged(input);
        let names: Vec<&str> = extraction.calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn tagged_respects_call_cap() {
        let mut input = String::new();
        for i in 0..MAX_TOOL_CALLS + 4 {
            input.push_str(&format!("<command>{{\"device\":\"d{i}\"}}</command>"));
        }
        let extraction = extract_tagged(&input);
        assert_eq!(extraction.calls.len(), MAX_TOOL_CALLS);
        assert_eq!(extraction.calls[0].name, "d0");
    }

    #[test]
    fn openai_shape() {
        let response = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "switch_llm",
                            "arguments": "{\"target\":\"claude\"}"
                        }
                    }]
                }
            }]
        });

        let extraction = extract_openai(&response);
        assert_eq!(extraction.calls.len(), 1);
        assert_eq!(extraction.calls[0].id, "call_1");
        assert_eq!(extraction.calls[0].name, "switch_llm");
        assert_eq!(extraction.calls[0].arguments, "{\"target\":\"claude\"}");
        assert!(extraction.text.is_empty());
    }

    #[test]
    fn openai_parallel_calls_preserve_order() {
        let response = json!({
            "choices": [{
                "message": {
                    "content": "working on it",
                    "tool_calls": [
                        {"id": "c1", "function": {"name": "first", "arguments": "{}"}},
                        {"id": "c2", "function": {"name": "second", "arguments": "{}"}}
                    ]
                }
            }]
        });

        let extraction = extract_openai(&response);
        let names: Vec<&str> = extraction.calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(extraction.text, "working on it");
    }

    #[test]
    fn claude_shape() {
        let response = json!({
            "content": [
                {"type": "text", "text": "Let me look."},
                {"type": "tool_use", "id": "toolu_X", "name": "viewing",
                 "input": {"query": "what do you see?"}}
            ]
        });

        let extraction = extract_claude(&response);
        assert_eq!(extraction.calls.len(), 1);
        assert_eq!(extraction.calls[0].id, "toolu_X");
        assert_eq!(extraction.calls[0].name, "viewing");

        let args: Value = serde_json::from_str(&extraction.calls[0].arguments).unwrap();
        assert_eq!(args["query"], "what do you see?");
        assert_eq!(extraction.text, "Let me look.");
    }

    #[test]
    fn shapes_agree_on_name_and_argument_semantics() {
        // The same logical call expressed in all three shapes.
        let tagged = extract_tagged(
            "<command>{\"device\":\"weather\",\"action\":\"today\",\"value\":\"Paris\"}</command>",
        );
        let openai = extract_openai(&json!({
            "choices": [{"message": {"tool_calls": [{
                "id": "call_1",
                "function": {"name": "weather",
                             "arguments": "{\"action\":\"today\",\"value\":\"Paris\",\"device\":\"weather\"}"}
            }]}}]
        }));
        let claude = extract_claude(&json!({
            "content": [{"type": "tool_use", "id": "toolu_1", "name": "weather",
                         "input": {"device": "weather", "action": "today", "value": "Paris"}}]
        }));

        for extraction in [&tagged, &openai, &claude] {
            assert_eq!(extraction.calls.len(), 1);
            assert_eq!(extraction.calls[0].name, "weather");
            // Argument semantics match after JSON normalization.
            let args: Value = serde_json::from_str(&extraction.calls[0].arguments).unwrap();
            assert_eq!(args["action"], "today");
            assert_eq!(args["value"], "Paris");
        }

        // Only the id differs by origin.
        assert!(tagged.calls[0].id.is_empty());
        assert_eq!(openai.calls[0].id, "call_1");
        assert_eq!(claude.calls[0].id, "toolu_1");
    }
}
