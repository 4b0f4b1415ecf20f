//! Streaming HTTP chat backend.
//!
//! One generic client speaking the OpenAI-compatible Chat Completions
//! protocol with SSE streaming.  Local inference servers (llama.cpp,
//! vLLM, Ollama) and OpenAI-compatible cloud endpoints all accept this
//! shape, so the single implementation covers both [`LlmKind::Local`] and
//! cloud configurations that expose a compatible endpoint.
//!
//! The stream is parsed incrementally by [`SseParser`]; text deltas are
//! forwarded to the caller as they arrive and the full response is
//! reassembled into the canonical non-streaming JSON shape so that
//! [`crate::extract`] normalizes tool calls the same way for streamed and
//! non-streamed input.
//!
//! [`LlmKind::Local`]: crate::types::LlmKind::Local
//! [`SseParser`]: crate::sse::SseParser

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{AgentError, Result};
use crate::sse::SseParser;
use crate::types::{BackendResponse, ChatBackend, ChatMessage, ChatRequest, ProviderFormat, Role};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Connection settings for one Chat Completions endpoint.
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    /// Endpoint base URL (e.g. `http://localhost:8080` or
    /// `https://api.openai.com`).
    pub base_url: String,
    /// Bearer token; local servers usually need none.
    pub api_key: Option<String>,
    /// Default model identifier.
    pub default_model: String,
    /// Default maximum tokens per response.
    pub max_tokens: u32,
}

impl HttpBackendConfig {
    /// Configuration for a local inference server.
    pub fn local(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            default_model: model.into(),
            max_tokens: 2048,
        }
    }

    /// Configuration for an OpenAI-compatible cloud endpoint.
    pub fn cloud(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: Some(api_key.into()),
            default_model: model.into(),
            max_tokens: 2048,
        }
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Chat Completions streaming client.
#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    config: Arc<HttpBackendConfig>,
    http: reqwest::Client,
}

impl OpenAiBackend {
    /// Create a client with the given configuration.
    pub fn new(config: HttpBackendConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| AgentError::BackendRequestFailed {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            config: Arc::new(config),
            http,
        })
    }

    /// Build the JSON body for the Chat Completions endpoint.
    fn build_request_body(&self, request: &ChatRequest) -> Value {
        let mut messages: Vec<Value> = request.messages.iter().map(message_to_wire).collect();

        // A vision payload rides along as one extra user message with an
        // image content part; it is never part of the stored history.
        if let Some(image) = &request.image {
            messages.push(json!({
                "role": "user",
                "content": [{
                    "type": "image_url",
                    "image_url": {
                        "url": format!("data:image/jpeg;base64,{}", image.base64),
                    }
                }]
            }));
        }

        let mut body = json!({
            "model": if request.model.is_empty() {
                &self.config.default_model
            } else {
                &request.model
            },
            "max_tokens": request.max_tokens.unwrap_or(self.config.max_tokens),
            "messages": messages,
            "stream": true,
        });

        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }
        if !request.tools.is_empty() {
            body["tools"] = json!(request.tools);
        }

        body
    }

    async fn send_request(&self, body: &Value) -> Result<reqwest::Response> {
        let url = format!("{}/v1/chat/completions", self.config.base_url);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = &self.config.api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {key}")).map_err(|e| {
                    AgentError::BackendRequestFailed {
                        reason: format!("invalid api key header: {e}"),
                    }
                })?,
            );
        }

        debug!(url = %url, model = %body["model"], "sending chat request");

        self.http
            .post(&url)
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(AgentError::from)
    }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    fn format(&self) -> ProviderFormat {
        ProviderFormat::OpenAi
    }

    async fn stream_chat(
        &self,
        request: &ChatRequest,
        on_text: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<BackendResponse> {
        let body = self.build_request_body(request);
        let resp = self.send_request(&body).await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AgentError::BackendRequestFailed {
                reason: format!("endpoint returned {status}: {text}"),
            });
        }

        let mut parser = SseParser::new();
        let mut accumulator = StreamAccumulator::default();
        let mut byte_stream = resp.bytes_stream();

        'outer: while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk.map_err(|e| AgentError::StreamError {
                reason: format!("stream read error: {e}"),
            })?;

            let mut events = Vec::new();
            parser.feed(&chunk, |event| events.push(event))?;

            for event in events {
                if event.data.trim() == "[DONE]" {
                    break 'outer;
                }
                if let Some(delta) = accumulator.feed_data(&event.data)? {
                    on_text(&delta);
                }
            }
        }

        Ok(accumulator.into_response())
    }
}

// ---------------------------------------------------------------------------
// Wire translation
// ---------------------------------------------------------------------------

/// Convert one history message into the Chat Completions wire shape.
fn message_to_wire(message: &ChatMessage) -> Value {
    match message.role {
        Role::System => json!({"role": "system", "content": message.content}),
        Role::User => json!({"role": "user", "content": message.content}),
        Role::Assistant => {
            if message.tool_calls.is_empty() {
                json!({"role": "assistant", "content": message.content})
            } else {
                let calls: Vec<Value> = message
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {"name": tc.name, "arguments": tc.arguments},
                        })
                    })
                    .collect();
                json!({
                    "role": "assistant",
                    "content": message.content,
                    "tool_calls": calls,
                })
            }
        }
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": message.tool_call_id,
            "content": message.content,
        }),
    }
}

// ---------------------------------------------------------------------------
// Stream accumulator
// ---------------------------------------------------------------------------

/// Reassembles `choices[].delta` fragments into a complete response.
///
/// Text deltas concatenate; tool-call deltas are correlated by their `index`
/// field (the name typically arrives in the first chunk, with argument
/// fragments following).
#[derive(Debug, Default)]
struct StreamAccumulator {
    text: String,
    tool_call_builders: Vec<ToolCallBuilder>,
    finish_reason: Option<String>,
}

#[derive(Debug, Default)]
struct ToolCallBuilder {
    id: String,
    name: String,
    arguments: String,
}

impl StreamAccumulator {
    /// Feed one SSE data payload.  Returns the text delta, if any.
    fn feed_data(&mut self, data: &str) -> Result<Option<String>> {
        let v: Value = serde_json::from_str(data).map_err(|e| AgentError::BackendParseFailed {
            reason: format!("invalid JSON in stream data: {e}"),
        })?;

        let choice = &v["choices"][0];
        if let Some(reason) = choice["finish_reason"].as_str() {
            self.finish_reason = Some(reason.to_string());
        }

        let delta = &choice["delta"];
        if delta.is_null() {
            return Ok(None);
        }

        let mut text_delta = None;
        if let Some(content) = delta["content"].as_str() {
            self.text.push_str(content);
            text_delta = Some(content.to_string());
        }

        if let Some(tool_calls) = delta["tool_calls"].as_array() {
            for tc in tool_calls {
                let index = tc["index"].as_u64().unwrap_or(0) as usize;
                while self.tool_call_builders.len() <= index {
                    self.tool_call_builders.push(ToolCallBuilder::default());
                }
                let builder = &mut self.tool_call_builders[index];

                if let Some(id) = tc["id"].as_str() {
                    builder.id = id.to_string();
                }
                let function = &tc["function"];
                if let Some(name) = function["name"].as_str() {
                    builder.name.push_str(name);
                }
                if let Some(args) = function["arguments"].as_str() {
                    builder.arguments.push_str(args);
                }
            }
        }

        Ok(text_delta)
    }

    /// Produce the canonical non-streaming response shape.
    fn into_response(self) -> BackendResponse {
        let mut message = json!({
            "role": "assistant",
            "content": self.text,
        });

        if !self.tool_call_builders.is_empty() {
            let calls: Vec<Value> = self
                .tool_call_builders
                .into_iter()
                .map(|b| {
                    json!({
                        "id": b.id,
                        "type": "function",
                        "function": {
                            "name": b.name,
                            "arguments": if b.arguments.is_empty() { "{}".to_string() } else { b.arguments },
                        }
                    })
                })
                .collect();
            message["tool_calls"] = json!(calls);
        }

        let raw = json!({
            "choices": [{
                "message": message,
                "finish_reason": self.finish_reason,
            }]
        });

        BackendResponse {
            text: raw["choices"][0]["message"]["content"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            raw: Some(raw),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use dawn_command::tool::{ToolCall, VisionPayload};

    #[test]
    fn build_request_body_basic() {
        let backend =
            OpenAiBackend::new(HttpBackendConfig::local("http://localhost:8080", "llama-3")).unwrap();
        let request = ChatRequest::new(vec![
            ChatMessage::system("You are DAWN."),
            ChatMessage::user("Hello"),
        ]);

        let body = backend.build_request_body(&request);
        assert_eq!(body["model"], "llama-3");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Hello");
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn build_request_body_with_tool_history() {
        let backend =
            OpenAiBackend::new(HttpBackendConfig::local("http://localhost:8080", "llama-3")).unwrap();

        let request = ChatRequest::new(vec![
            ChatMessage::user("weather?"),
            ChatMessage::assistant_tool_calls(
                String::new(),
                vec![ToolCall {
                    id: "call_1".into(),
                    name: "weather".into(),
                    arguments: r#"{"location":"Paris"}"#.into(),
                }],
            ),
            ChatMessage::tool_result("call_1", "sunny, 21C"),
        ]);

        let body = backend.build_request_body(&request);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[1]["tool_calls"][0]["id"], "call_1");
        assert_eq!(messages[1]["tool_calls"][0]["function"]["name"], "weather");
        assert_eq!(messages[2]["role"], "tool");
        assert_eq!(messages[2]["tool_call_id"], "call_1");
    }

    #[test]
    fn build_request_body_attaches_image() {
        let backend =
            OpenAiBackend::new(HttpBackendConfig::local("http://localhost:8080", "llava")).unwrap();
        let request = ChatRequest::new(vec![ChatMessage::user("what is this?")]).with_image(
            VisionPayload {
                base64: "aGVsbG8=".into(),
                size: 5,
            },
        );

        let body = backend.build_request_body(&request);
        let messages = body["messages"].as_array().unwrap();
        let image_part = &messages.last().unwrap()["content"][0];
        assert_eq!(image_part["type"], "image_url");
        assert!(
            image_part["image_url"]["url"]
                .as_str()
                .unwrap()
                .starts_with("data:image/jpeg;base64,")
        );
    }

    #[test]
    fn accumulator_concatenates_text() {
        let mut acc = StreamAccumulator::default();
        let d1 = acc
            .feed_data(r#"{"choices":[{"delta":{"content":"Hello"}}]}"#)
            .unwrap();
        assert_eq!(d1.as_deref(), Some("Hello"));
        acc.feed_data(r#"{"choices":[{"delta":{"content":" world"}}]}"#)
            .unwrap();

        let response = acc.into_response();
        assert_eq!(response.text, "Hello world");
    }

    #[test]
    fn accumulator_builds_tool_calls_across_chunks() {
        let mut acc = StreamAccumulator::default();
        acc.feed_data(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"switch_llm","arguments":""}}]}}]}"#,
        )
        .unwrap();
        acc.feed_data(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"target\":"}}]}}]}"#,
        )
        .unwrap();
        acc.feed_data(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"claude\"}"}}]}}]}"#,
        )
        .unwrap();

        let response = acc.into_response();
        let raw = response.raw.unwrap();
        let call = &raw["choices"][0]["message"]["tool_calls"][0];
        assert_eq!(call["id"], "call_a");
        assert_eq!(call["function"]["name"], "switch_llm");
        assert_eq!(call["function"]["arguments"], r#"{"target":"claude"}"#);
    }

    #[test]
    fn accumulator_rejects_invalid_json() {
        let mut acc = StreamAccumulator::default();
        assert!(acc.feed_data("{broken").is_err());
    }

    #[test]
    fn reconstructed_response_feeds_the_extractor() {
        let mut acc = StreamAccumulator::default();
        acc.feed_data(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"weather","arguments":"{\"location\":\"Paris\"}"}}]}}]}"#,
        )
        .unwrap();
        let response = acc.into_response();

        let extraction = crate::extract::extract(ProviderFormat::OpenAi, &response);
        assert_eq!(extraction.calls.len(), 1);
        assert_eq!(extraction.calls[0].name, "weather");
    }
}
