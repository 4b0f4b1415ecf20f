//! Built-in tools registered at startup.
//!
//! In-process tools (LLM switching, web search, shutdown) implement
//! [`ToolHandler`]; satellite-backed tools (viewing, audio, SmartThings)
//! are metadata-only and dispatch over the message bus.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use dawn_command::error::{CommandError, Result};
use dawn_command::tool::{
    DeviceType, InvocationStyle, InvokeContext, ParamRouting, ParamSpec, ParamType, ToolHandler,
    ToolOutput, ToolSpec,
};
use dawn_command::{CancelToken, Tool, ToolRegistry};
use dawn_config::DawnConfig;

use crate::session::SessionManager;
use crate::types::{LlmConfig, LlmKind};

/// Register the built-in tool set.
///
/// `shutdown_signal` is cancelled when the shutdown tool fires with the
/// correct passphrase; the process entry point listens on it.
pub fn register_builtin_tools(
    registry: &ToolRegistry,
    sessions: &Arc<SessionManager>,
    config: &Arc<DawnConfig>,
    shutdown_signal: &CancelToken,
) -> Result<()> {
    registry.register(Tool::direct(
        ToolSpec::new("switch_llm", InvocationStyle::Direct, DeviceType::Trigger)
            .describe("Switch which language model answers this conversation")
            .alias("switch_model")
            .skip_followup()
            .param(ParamSpec::enumeration(
                "target",
                "Which model family to use",
                &["local", "openai", "claude", "gemini"],
                ParamRouting::Value,
            )),
        Arc::new(SwitchLlmTool {
            sessions: Arc::clone(sessions),
        }),
    ))?;

    registry.register(
        Tool::direct(
            ToolSpec::new("search", InvocationStyle::Direct, DeviceType::Getter)
                .describe("Search the web for current information")
                .network()
                .param(ParamSpec::string("query", "Search terms", ParamRouting::Value)),
            Arc::new(SearchTool {
                http: reqwest::Client::new(),
                config: Arc::clone(config),
            }),
        )
        .with_availability(Arc::new(|config| config.search.endpoint.is_some())),
    )?;

    registry.register(
        Tool::direct(
            ToolSpec::new("shutdown", InvocationStyle::Direct, DeviceType::Trigger)
                .describe("Shut the assistant down (passphrase required)")
                .skip_followup()
                .param(ParamSpec::string(
                    "passphrase",
                    "The configured shutdown passphrase",
                    ParamRouting::Value,
                )),
            Arc::new(ShutdownTool {
                config: Arc::clone(config),
                signal: shutdown_signal.clone(),
            }),
        )
        .with_availability(Arc::new(|config| config.shutdown.enabled)),
    )?;

    registry.register(Tool::bus(
        ToolSpec::new("viewing", InvocationStyle::MessageWithReply, DeviceType::Getter)
            .describe("Capture an image from the camera and describe the scene")
            .vision()
            .requires_hardware()
            .param(
                ParamSpec::string("query", "What to look for", ParamRouting::Value).optional(),
            ),
    ))?;

    registry.register(Tool::bus(
        ToolSpec::new("audio", InvocationStyle::Message, DeviceType::Meta)
            .describe("Control the audio capture and playback devices")
            .map_device("capture", "audio_capture")
            .map_device("playback", "audio_playback")
            .param(ParamSpec::enumeration(
                "target",
                "Which audio device",
                &["capture", "playback"],
                ParamRouting::Device,
            ))
            .param(
                ParamSpec::string("level", "Volume level 0-100", ParamRouting::Value)
                    .typed(ParamType::Integer)
                    .optional(),
            ),
    ))?;

    registry.register(
        Tool::bus(
            ToolSpec::new("smartthings", InvocationStyle::Message, DeviceType::Boolean)
                .describe("Control SmartThings devices")
                .remote()
                .network()
                .param(ParamSpec::string("device", "Device name", ParamRouting::Value))
                .param(
                    ParamSpec::enumeration(
                        "command",
                        "What to do with the device",
                        &["on", "off", "toggle", "set"],
                        ParamRouting::Action,
                    )
                    .optional(),
                )
                .param(
                    ParamSpec::string("level", "Level for `set`", ParamRouting::Custom)
                        .typed(ParamType::Integer)
                        .optional(),
                ),
        )
        .with_availability(Arc::new(|config| config.secrets.has_smartthings())),
    )?;

    info!(tools = registry.len(), "built-in tools registered");
    Ok(())
}

// ---------------------------------------------------------------------------
// switch_llm
// ---------------------------------------------------------------------------

/// Switches the invoking session's LLM configuration.
///
/// Marked skip-follow-up: its confirmation text is the user-visible answer,
/// so no synthesis call runs afterwards.
struct SwitchLlmTool {
    sessions: Arc<SessionManager>,
}

#[async_trait]
impl ToolHandler for SwitchLlmTool {
    async fn invoke(&self, _action: &str, value: &str, ctx: &InvokeContext) -> Result<ToolOutput> {
        let session = self.sessions.get_or_local(ctx.session_id);
        let target = value.trim().to_lowercase();

        let (config, confirmation) = match target.as_str() {
            "local" => (
                LlmConfig {
                    kind: LlmKind::Local,
                    ..LlmConfig::default()
                },
                "Okay, switching to the local model.",
            ),
            "openai" | "claude" | "gemini" => (
                LlmConfig {
                    kind: LlmKind::Cloud,
                    provider: Some(target.clone()),
                    ..LlmConfig::default()
                },
                "Okay, switching models.",
            ),
            other => {
                return Err(CommandError::ToolFailed {
                    reason: format!("unknown model target `{other}`"),
                });
            }
        };

        session.set_llm_config(config);
        info!(session_id = ctx.session_id, target = %target, "llm switched");
        Ok(ToolOutput::text(confirmation))
    }
}

// ---------------------------------------------------------------------------
// search
// ---------------------------------------------------------------------------

/// Queries the configured SearxNG-compatible endpoint.
struct SearchTool {
    http: reqwest::Client,
    config: Arc<DawnConfig>,
}

#[async_trait]
impl ToolHandler for SearchTool {
    async fn invoke(&self, _action: &str, value: &str, _ctx: &InvokeContext) -> Result<ToolOutput> {
        let endpoint =
            self.config
                .search
                .endpoint
                .as_deref()
                .ok_or_else(|| CommandError::ToolFailed {
                    reason: "no search endpoint configured".into(),
                })?;

        if value.trim().is_empty() {
            return Err(CommandError::ToolFailed {
                reason: "empty search query".into(),
            });
        }

        let response = self
            .http
            .get(endpoint)
            .query(&[("q", value), ("format", "json")])
            .send()
            .await
            .map_err(|e| CommandError::ToolFailed {
                reason: format!("search request failed: {e}"),
            })?;

        let body: Value = response.json().await.map_err(|e| CommandError::ToolFailed {
            reason: format!("search response was not json: {e}"),
        })?;

        let mut lines = Vec::new();
        if let Some(results) = body["results"].as_array() {
            for result in results.iter().take(3) {
                let title = result["title"].as_str().unwrap_or_default();
                let content = result["content"].as_str().unwrap_or_default();
                lines.push(format!("{title}: {content}"));
            }
        }

        if lines.is_empty() {
            Ok(ToolOutput::text("No results found."))
        } else {
            Ok(ToolOutput::text(lines.join("\n")))
        }
    }
}

// ---------------------------------------------------------------------------
// shutdown
// ---------------------------------------------------------------------------

/// Passphrase-gated process shutdown.
struct ShutdownTool {
    config: Arc<DawnConfig>,
    signal: CancelToken,
}

#[async_trait]
impl ToolHandler for ShutdownTool {
    async fn invoke(&self, _action: &str, value: &str, ctx: &InvokeContext) -> Result<ToolOutput> {
        if self.config.shutdown.passphrase.is_empty()
            || value.trim() != self.config.shutdown.passphrase
        {
            return Err(CommandError::ToolFailed {
                reason: "incorrect shutdown passphrase".into(),
            });
        }

        info!(session_id = ctx.session_id, "shutdown requested");
        self.signal.cancel();
        Ok(ToolOutput::text("Shutting down. Goodbye."))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
