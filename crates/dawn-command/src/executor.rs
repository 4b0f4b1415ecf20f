//! Unified command executor.
//!
//! Every tool invocation funnels through [`CommandExecutor::execute`] with a
//! `(device, action, value)` triple, regardless of whether it originated as
//! an inline tag, a provider tool call, or an external bridge message.  The
//! executor looks the tool up, then dispatches by invocation style: direct
//! handler call, fire-and-forget bus publish, or bus publish plus a parked
//! wait on the [`CommandRouter`] for the correlated reply.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Value;
use tracing::{debug, info, warn};

use dawn_config::DawnConfig;

use crate::context::{CancelToken, CommandContext};
use crate::envelope::{CommandEnvelope, ReplyEnvelope, ReplyStatus, verify_checksum};
use crate::error::{CommandError, Result};
use crate::registry::{Tool, ToolRegistry};
use crate::router::CommandRouter;
use crate::tool::{
    InvocationStyle, InvokeContext, ParamRouting, ParamType, ToolCall, ToolResult, VisionPayload,
};

/// Default deadline for sync-wait commands when the caller passes zero.
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(10);

/// Error text surfaced for sync-wait commands that received no reply.
const TIMEOUT_RESULT_TEXT: &str = "command timed out waiting for a reply";

// ---------------------------------------------------------------------------
// Bus abstraction
// ---------------------------------------------------------------------------

/// Publisher side of the message bus.
///
/// Implemented by the MQTT bridge; tests substitute an in-memory fake.
#[async_trait]
pub trait BusPublisher: Send + Sync {
    /// Publish a UTF-8 JSON payload on `topic`.
    async fn publish(&self, topic: &str, payload: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Command result
// ---------------------------------------------------------------------------

/// Outcome of a single command execution.
#[derive(Debug)]
pub struct CommandResult {
    /// Whether the command executed successfully.
    pub success: bool,
    /// Result text; `None` means "executed, no data".
    pub text: Option<String>,
    /// Whether the result is worth surfacing to the user.
    pub should_respond: bool,
    /// Copied from tool metadata; the orchestrator bypasses the follow-up
    /// model call when set.
    pub skip_followup: bool,
    /// Image captured by a vision tool.
    pub vision: Option<VisionPayload>,
}

impl CommandResult {
    fn failure(text: impl Into<String>) -> Self {
        Self {
            success: false,
            text: Some(text.into()),
            should_respond: true,
            skip_followup: false,
            vision: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Executes tools by style and owns the sync-wait correlation flow.
pub struct CommandExecutor {
    registry: Arc<ToolRegistry>,
    router: Arc<CommandRouter>,
    bus: Arc<dyn BusPublisher>,
    config: Arc<DawnConfig>,
}

impl CommandExecutor {
    /// Create an executor over the given registry, router, and bus.
    pub fn new(
        registry: Arc<ToolRegistry>,
        router: Arc<CommandRouter>,
        bus: Arc<dyn BusPublisher>,
        config: Arc<DawnConfig>,
    ) -> Self {
        Self {
            registry,
            router,
            bus,
            config,
        }
    }

    /// The registry backing this executor.
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// The correlation router owned by this executor.
    pub fn router(&self) -> &Arc<CommandRouter> {
        &self.router
    }

    /// Execute a command given the routed `(device, action, value)` triple.
    ///
    /// `timeout` bounds sync-wait commands only; zero selects
    /// [`DEFAULT_SYNC_TIMEOUT`].  Execution failures (bus errors, timeouts,
    /// handler errors) come back as non-success results; only lookup and
    /// validation problems are `Err`.
    pub async fn execute(
        &self,
        device: &str,
        action: &str,
        value: &str,
        cancel: &CancelToken,
        timeout: Duration,
    ) -> Result<CommandResult> {
        let tool = self.registry.find(device)?;
        let device = tool.spec.name.clone();
        self.execute_resolved(&tool, &device, action, value, cancel, timeout)
            .await
    }

    /// Execute a parsed model tool call: route its arguments into the
    /// `(device, action, value)` triple per the tool's parameter metadata,
    /// then execute.
    ///
    /// The routed device may be an underlying device name produced by a
    /// meta-tool's device map; dispatch still follows the resolved tool's
    /// style and topic, with the routed name carried on the envelope.
    pub async fn dispatch_call(&self, call: &ToolCall, cancel: &CancelToken) -> Result<ToolResult> {
        let tool = self.registry.find(&call.name)?;
        let (device, action, value) = route_params(&tool, &call.arguments)?;
        let result = self
            .execute_resolved(&tool, &device, &action, &value, cancel, Duration::ZERO)
            .await?;

        Ok(ToolResult {
            call_id: call.id.clone(),
            text: result.text.unwrap_or_default(),
            success: result.success,
            skip_followup: result.skip_followup,
            vision: result.vision,
        })
    }

    /// Dispatch on an already-resolved tool, by invocation style.
    async fn execute_resolved(
        &self,
        tool: &Tool,
        device: &str,
        action: &str,
        value: &str,
        cancel: &CancelToken,
        timeout: Duration,
    ) -> Result<CommandResult> {
        if !tool.is_enabled() {
            return Err(CommandError::UnknownTool {
                name: tool.spec.name.clone(),
            });
        }

        let action = if action.is_empty() {
            tool.spec.device_type.default_action()
        } else {
            action
        };

        debug!(
            device,
            action,
            value,
            style = ?tool.spec.style,
            "executing command"
        );

        match tool.spec.style {
            InvocationStyle::Direct => self.execute_direct(tool, action, value).await,
            InvocationStyle::Message => self.execute_message(tool, device, action, value).await,
            InvocationStyle::MessageWithReply => {
                self.execute_sync_wait(tool, device, action, value, cancel, timeout)
                    .await
            }
        }
    }

    // -- direct ------------------------------------------------------------

    async fn execute_direct(&self, tool: &Tool, action: &str, value: &str) -> Result<CommandResult> {
        let handler = tool.handler().ok_or_else(|| CommandError::InvalidSchema {
            tool: tool.spec.name.clone(),
            reason: "direct tool has no handler".into(),
        })?;

        let ctx = InvokeContext {
            session_id: CommandContext::current_or_local(),
        };

        match handler.invoke(action, value, &ctx).await {
            Ok(output) => Ok(CommandResult {
                success: true,
                text: output.text,
                should_respond: output.should_respond,
                skip_followup: tool.spec.skip_followup,
                vision: output.vision,
            }),
            Err(e) => {
                warn!(tool = %tool.spec.name, error = %e, "direct tool failed");
                Ok(CommandResult::failure(e.to_string()))
            }
        }
    }

    // -- message (fire and forget) ------------------------------------------

    async fn execute_message(
        &self,
        tool: &Tool,
        device: &str,
        action: &str,
        value: &str,
    ) -> Result<CommandResult> {
        let envelope = build_envelope(device, action, value);
        let payload = envelope.to_json()?;

        match self.bus.publish(self.topic_for(tool), &payload).await {
            Ok(()) => Ok(CommandResult {
                success: true,
                text: None,
                should_respond: false,
                skip_followup: tool.spec.skip_followup,
                vision: None,
            }),
            Err(e) => {
                warn!(tool = %tool.spec.name, error = %e, "bus publish failed");
                Ok(CommandResult::failure(format!("bus publish failed: {e}")))
            }
        }
    }

    // -- message with reply (sync-wait) --------------------------------------

    async fn execute_sync_wait(
        &self,
        tool: &Tool,
        device: &str,
        action: &str,
        value: &str,
        cancel: &CancelToken,
        timeout: Duration,
    ) -> Result<CommandResult> {
        let timeout = if timeout.is_zero() {
            DEFAULT_SYNC_TIMEOUT
        } else {
            timeout
        };

        let waiter = self.router.register();
        let request_id = waiter.request_id.clone();

        let envelope = build_envelope(device, action, value).with_request_id(request_id.clone());
        let payload = envelope.to_json()?;

        if let Err(e) = self.bus.publish(self.topic_for(tool), &payload).await {
            self.router.cancel(&request_id);
            warn!(tool = %tool.spec.name, error = %e, "bus publish failed");
            return Ok(CommandResult::failure(format!("bus publish failed: {e}")));
        }

        let reply = tokio::select! {
            reply = self.router.wait(waiter, timeout) => reply,
            _ = cancel.cancelled() => {
                self.router.cancel(&request_id);
                info!(tool = %tool.spec.name, "sync-wait command cancelled");
                return Err(CommandError::Cancelled);
            }
        };

        match reply {
            Some(raw) => self.interpret_reply(tool, &raw).await,
            None => {
                info!(
                    tool = %tool.spec.name,
                    timeout_ms = timeout.as_millis() as u64,
                    "sync-wait command timed out"
                );
                Ok(CommandResult::failure(TIMEOUT_RESULT_TEXT))
            }
        }
    }

    /// Interpret a delivered reply payload into a command result.
    ///
    /// An empty delivery is a legitimate "executed, no data" reply.  For
    /// vision tools the inline `data.content` (already checksum-validated by
    /// the bridge) becomes the vision payload; absent inline data, a file
    /// path in `value` is read from disk, subject to the allowlist/checksum
    /// policy.
    async fn interpret_reply(&self, tool: &Tool, raw: &str) -> Result<CommandResult> {
        if raw.is_empty() {
            return Ok(CommandResult {
                success: true,
                text: Some(String::new()),
                should_respond: true,
                skip_followup: tool.spec.skip_followup,
                vision: None,
            });
        }

        let reply = match ReplyEnvelope::parse(raw) {
            Ok(reply) => reply,
            Err(e) => return Ok(CommandResult::failure(e.to_string())),
        };

        if reply.status == ReplyStatus::Error {
            let text = reply
                .error
                .map(|e| format!("{} ({})", e.message, e.code))
                .unwrap_or_else(|| "device reported an error".into());
            return Ok(CommandResult::failure(text));
        }

        let mut vision = None;
        if tool.spec.captures_vision {
            vision = match self.extract_vision(&reply).await {
                Ok(v) => v,
                Err(e) => return Ok(CommandResult::failure(e.to_string())),
            };
        }

        Ok(CommandResult {
            success: true,
            text: Some(reply.value.unwrap_or_default()),
            should_respond: true,
            skip_followup: tool.spec.skip_followup,
            vision,
        })
    }

    /// Extract the vision payload from a reply: inline `data.content` first,
    /// then the `value` file-path fallback.
    async fn extract_vision(&self, reply: &ReplyEnvelope) -> Result<Option<VisionPayload>> {
        if let Some(content) = reply.data.as_ref().and_then(|d| d.content.as_deref()) {
            let bytes = BASE64.decode(content).map_err(|e| CommandError::InvalidReply {
                reason: format!("invalid base64 content: {e}"),
            })?;
            return Ok(Some(VisionPayload {
                base64: content.to_string(),
                size: bytes.len(),
            }));
        }

        let Some(path) = reply.value.as_deref() else {
            return Ok(None);
        };

        let inside_allowlist = self.path_in_allowed_roots(Path::new(path));
        if reply.checksum.is_none() && !inside_allowlist {
            return Err(CommandError::InvalidReply {
                reason: format!("file path `{path}` outside allowed roots requires a checksum"),
            });
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| CommandError::InvalidReply {
                reason: format!("failed to read `{path}`: {e}"),
            })?;

        if let Some(checksum) = reply.checksum.as_deref() {
            if !verify_checksum(&bytes, checksum) {
                return Err(CommandError::InvalidReply {
                    reason: format!("checksum mismatch for `{path}`"),
                });
            }
        }

        let size = bytes.len();
        Ok(Some(VisionPayload {
            base64: BASE64.encode(&bytes),
            size,
        }))
    }

    fn path_in_allowed_roots(&self, path: &Path) -> bool {
        self.config
            .viewing
            .allowed_roots
            .iter()
            .any(|root| path.starts_with(root))
    }

    fn topic_for<'a>(&'a self, tool: &'a Tool) -> &'a str {
        tool.spec
            .topic
            .as_deref()
            .unwrap_or(&self.config.mqtt.command_topic)
    }
}

/// Build a command envelope, tagging it with the invoking session when a
/// command context is active.
fn build_envelope(device: &str, action: &str, value: &str) -> CommandEnvelope {
    let value = if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    };
    let mut envelope = CommandEnvelope::new(device, action, value);
    if let Some(session_id) = CommandContext::current() {
        envelope = envelope.with_session(session_id);
    }
    envelope
}

// ---------------------------------------------------------------------------
// Parameter routing
// ---------------------------------------------------------------------------

/// Route a parsed argument object into the `(device, action, value)` triple.
///
/// Pure over the tool's parameter metadata and the argument object: the
/// tool's declaration order decides slot application, not the key order of
/// the incoming JSON.
fn route_params(tool: &Tool, arguments: &str) -> Result<(String, String, String)> {
    let args: Value = if arguments.trim().is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_str(arguments).map_err(|e| CommandError::InvalidArgument {
            tool: tool.spec.name.clone(),
            reason: format!("arguments are not a json object: {e}"),
        })?
    };

    let Some(object) = args.as_object() else {
        return Err(CommandError::InvalidArgument {
            tool: tool.spec.name.clone(),
            reason: "arguments must be a json object".into(),
        });
    };

    let mut device = tool.spec.name.clone();
    let mut action = String::from("get");
    let mut value = String::new();

    for param in &tool.spec.params {
        let Some(raw) = object.get(&param.name) else {
            if param.required {
                return Err(CommandError::InvalidArgument {
                    tool: tool.spec.name.clone(),
                    reason: format!("missing required parameter `{}`", param.name),
                });
            }
            continue;
        };

        let text = scalar_to_string(raw).ok_or_else(|| CommandError::InvalidArgument {
            tool: tool.spec.name.clone(),
            reason: format!("parameter `{}` must be a scalar", param.name),
        })?;

        if param.param_type == ParamType::Enum && !param.enum_values.contains(&text) {
            return Err(CommandError::InvalidArgument {
                tool: tool.spec.name.clone(),
                reason: format!(
                    "parameter `{}` value `{text}` not in {:?}",
                    param.name, param.enum_values
                ),
            });
        }

        match param.routing {
            ParamRouting::Action => action = text,
            ParamRouting::Device => {
                device = if tool.spec.device_map.is_empty() {
                    text
                } else {
                    tool.spec
                        .device_map
                        .get(&text)
                        .cloned()
                        .ok_or_else(|| CommandError::InvalidArgument {
                            tool: tool.spec.name.clone(),
                            reason: format!("unknown device key `{text}`"),
                        })?
                };
            }
            ParamRouting::Value | ParamRouting::Custom => {
                if value.is_empty() {
                    value = text;
                } else {
                    value.push(' ');
                    value.push_str(&text);
                }
            }
        }
    }

    // No explicit action anywhere: a supplied value means "set", otherwise
    // the device-type default applies.
    if action == "get" && !tool.spec.has_action_param() {
        if !value.is_empty() {
            action = "set".into();
        } else {
            action = tool.spec.device_type.default_action().into();
        }
    }

    Ok((device, action, value))
}

/// Convert a scalar JSON value to its string form for the value slots.
fn scalar_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{DeviceType, ParamSpec, ToolHandler, ToolOutput, ToolSpec};
    use std::sync::Mutex;

    struct NoopHandler;

    #[async_trait]
    impl ToolHandler for NoopHandler {
        async fn invoke(&self, _action: &str, _value: &str, _ctx: &InvokeContext) -> Result<ToolOutput> {
            Ok(ToolOutput::silent())
        }
    }

    /// Bus fake that records every published payload.
    #[derive(Default)]
    struct RecordingBus {
        published: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl BusPublisher for RecordingBus {
        async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), payload.to_string()));
            Ok(())
        }
    }

    fn tool_with_params(device_type: DeviceType, params: Vec<ParamSpec>) -> Tool {
        let mut spec = ToolSpec::new("fixture", InvocationStyle::Direct, device_type);
        spec.params = params;
        Tool::direct(spec, Arc::new(NoopHandler))
    }

    #[test]
    fn routing_action_and_value() {
        use crate::tool::ParamRouting::*;

        let tool = tool_with_params(
            DeviceType::Getter,
            vec![
                ParamSpec::string("action", "what to do", Action),
                ParamSpec::string("query", "the query", Value),
            ],
        );

        let (device, action, value) =
            route_params(&tool, r#"{"action":"today","query":"Paris"}"#).unwrap();
        assert_eq!(device, "fixture");
        assert_eq!(action, "today");
        assert_eq!(value, "Paris");
    }

    #[test]
    fn routing_is_order_independent_for_non_value_slots() {
        use crate::tool::ParamRouting::*;

        let tool = tool_with_params(
            DeviceType::Getter,
            vec![
                ParamSpec::string("action", "", Action),
                ParamSpec::string("query", "", Value),
            ],
        );

        let a = route_params(&tool, r#"{"action":"today","query":"Paris"}"#).unwrap();
        let b = route_params(&tool, r#"{"query":"Paris","action":"today"}"#).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn routing_concatenates_value_params_in_declaration_order() {
        use crate::tool::ParamRouting::*;

        let tool = tool_with_params(
            DeviceType::Analog,
            vec![
                ParamSpec::string("device", "", Value),
                ParamSpec::string("level", "", Custom).typed(ParamType::Integer),
            ],
        );

        let (_, action, value) =
            route_params(&tool, r#"{"level":40,"device":"lamp"}"#).unwrap();
        assert_eq!(value, "lamp 40");
        // Non-empty value with no action param promotes to "set".
        assert_eq!(action, "set");
    }

    #[test]
    fn routing_device_map_translation() {
        use crate::tool::ParamRouting::*;

        let mut spec = ToolSpec::new("audio", InvocationStyle::Direct, DeviceType::Meta)
            .map_device("capture", "audio_capture")
            .map_device("playback", "audio_playback");
        spec.params = vec![ParamSpec::enumeration(
            "target",
            "",
            &["capture", "playback"],
            Device,
        )];
        let tool = Tool::direct(spec, Arc::new(NoopHandler));

        let (device, _, _) = route_params(&tool, r#"{"target":"capture"}"#).unwrap();
        assert_eq!(device, "audio_capture");

        // Enum validation rejects unknown keys before the device map is hit.
        assert!(route_params(&tool, r#"{"target":"hdmi"}"#).is_err());
    }

    #[test]
    fn routing_enum_rejects_out_of_list_value() {
        use crate::tool::ParamRouting::*;

        let tool = tool_with_params(
            DeviceType::Getter,
            vec![ParamSpec::enumeration("mode", "", &["fast", "slow"], Value)],
        );

        let err = route_params(&tool, r#"{"mode":"medium"}"#).unwrap_err();
        assert!(matches!(err, CommandError::InvalidArgument { .. }));
    }

    #[test]
    fn routing_missing_required_parameter() {
        use crate::tool::ParamRouting::*;

        let tool = tool_with_params(
            DeviceType::Getter,
            vec![ParamSpec::string("query", "", Value)],
        );

        assert!(route_params(&tool, "{}").is_err());
    }

    #[test]
    fn default_action_from_device_type_when_nothing_supplied() {
        let tool = tool_with_params(
            DeviceType::Boolean,
            vec![ParamSpec::string("note", "", ParamRouting::Value).optional()],
        );

        let (_, action, value) = route_params(&tool, "{}").unwrap();
        assert!(value.is_empty());
        assert_eq!(action, "toggle");
    }

    #[tokio::test]
    async fn message_tool_publishes_envelope() {
        let registry = Arc::new(ToolRegistry::new());
        registry
            .register(Tool::bus(ToolSpec::new(
                "blinds",
                InvocationStyle::Message,
                DeviceType::Boolean,
            )))
            .unwrap();

        let bus = Arc::new(RecordingBus::default());
        let executor = CommandExecutor::new(
            registry,
            Arc::new(CommandRouter::new()),
            bus.clone(),
            Arc::new(DawnConfig::default()),
        );

        let result = executor
            .execute("blinds", "toggle", "", &CancelToken::new(), Duration::ZERO)
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.text.is_none());
        assert!(!result.should_respond);

        let published = bus.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "dawn/commands");
        let envelope: serde_json::Value = serde_json::from_str(&published[0].1).unwrap();
        assert_eq!(envelope["device"], "blinds");
        assert_eq!(envelope["action"], "toggle");
        assert!(envelope.get("request_id").is_none());
    }

    #[tokio::test]
    async fn meta_tool_dispatch_publishes_translated_device() {
        let registry = Arc::new(ToolRegistry::new());
        let mut spec = ToolSpec::new("audio", InvocationStyle::Message, DeviceType::Meta)
            .map_device("capture", "audio_capture")
            .map_device("playback", "audio_playback");
        spec.params = vec![
            ParamSpec::enumeration("target", "", &["capture", "playback"], ParamRouting::Device),
            ParamSpec::string("level", "", ParamRouting::Value)
                .typed(ParamType::Integer)
                .optional(),
        ];
        registry.register(Tool::bus(spec)).unwrap();

        let bus = Arc::new(RecordingBus::default());
        let executor = CommandExecutor::new(
            registry,
            Arc::new(CommandRouter::new()),
            bus.clone(),
            Arc::new(DawnConfig::default()),
        );

        let call = ToolCall::new("audio", r#"{"target":"playback","level":40}"#);
        let result = executor.dispatch_call(&call, &CancelToken::new()).await.unwrap();
        assert!(result.success);

        // The envelope carries the underlying device name, not the meta
        // tool's.
        let published = bus.published.lock().unwrap();
        let envelope: serde_json::Value = serde_json::from_str(&published[0].1).unwrap();
        assert_eq!(envelope["device"], "audio_playback");
        assert_eq!(envelope["action"], "set");
        assert_eq!(envelope["value"], "40");
    }

    #[tokio::test]
    async fn enum_rejection_causes_no_publish() {
        let registry = Arc::new(ToolRegistry::new());
        let mut spec = ToolSpec::new("blinds", InvocationStyle::Message, DeviceType::Boolean);
        spec.params = vec![ParamSpec::enumeration(
            "state",
            "",
            &["open", "closed"],
            ParamRouting::Value,
        )];
        registry.register(Tool::bus(spec)).unwrap();

        let bus = Arc::new(RecordingBus::default());
        let executor = CommandExecutor::new(
            registry,
            Arc::new(CommandRouter::new()),
            bus.clone(),
            Arc::new(DawnConfig::default()),
        );

        let call = ToolCall::new("blinds", r#"{"state":"ajar"}"#);
        let err = executor.dispatch_call(&call, &CancelToken::new()).await;
        assert!(matches!(err, Err(CommandError::InvalidArgument { .. })));
        assert!(bus.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sync_wait_times_out_with_fixed_text() {
        let registry = Arc::new(ToolRegistry::new());
        registry
            .register(Tool::bus(ToolSpec::new(
                "sensor",
                InvocationStyle::MessageWithReply,
                DeviceType::Getter,
            )))
            .unwrap();

        let executor = CommandExecutor::new(
            registry,
            Arc::new(CommandRouter::new()),
            Arc::new(RecordingBus::default()),
            Arc::new(DawnConfig::default()),
        );

        let result = executor
            .execute(
                "sensor",
                "get",
                "",
                &CancelToken::new(),
                Duration::from_millis(200),
            )
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.text.as_deref(), Some(TIMEOUT_RESULT_TEXT));
        assert_eq!(executor.router().outstanding(), 0);
    }

    #[tokio::test]
    async fn sync_wait_receives_delivered_reply() {
        let registry = Arc::new(ToolRegistry::new());
        registry
            .register(Tool::bus(ToolSpec::new(
                "sensor",
                InvocationStyle::MessageWithReply,
                DeviceType::Getter,
            )))
            .unwrap();

        let router = Arc::new(CommandRouter::new());
        let bus = Arc::new(RecordingBus::default());
        let executor = Arc::new(CommandExecutor::new(
            registry,
            router.clone(),
            bus.clone(),
            Arc::new(DawnConfig::default()),
        ));

        let exec2 = Arc::clone(&executor);
        let handle = tokio::spawn(async move {
            exec2
                .execute("sensor", "get", "", &CancelToken::new(), Duration::from_secs(5))
                .await
        });

        // Wait for the publish, then answer it through the router like the
        // bridge would.
        let request_id = loop {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let published = bus.published.lock().unwrap();
            if let Some((_, payload)) = published.first() {
                let v: serde_json::Value = serde_json::from_str(payload).unwrap();
                break v["request_id"].as_str().unwrap().to_string();
            }
        };
        router.deliver(
            &request_id,
            format!(r#"{{"request_id":"{request_id}","status":"ok","value":"21C"}}"#),
        );

        let result = handle.await.unwrap().unwrap();
        assert!(result.success);
        assert_eq!(result.text.as_deref(), Some("21C"));
    }

    #[tokio::test]
    async fn cancellation_aborts_sync_wait() {
        let registry = Arc::new(ToolRegistry::new());
        registry
            .register(Tool::bus(ToolSpec::new(
                "sensor",
                InvocationStyle::MessageWithReply,
                DeviceType::Getter,
            )))
            .unwrap();

        let executor = Arc::new(CommandExecutor::new(
            registry,
            Arc::new(CommandRouter::new()),
            Arc::new(RecordingBus::default()),
            Arc::new(DawnConfig::default()),
        ));

        let cancel = CancelToken::new();
        let cancel2 = cancel.clone();
        let exec2 = Arc::clone(&executor);
        let handle = tokio::spawn(async move {
            exec2
                .execute("sensor", "get", "", &cancel2, Duration::from_secs(30))
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(CommandError::Cancelled)));
        assert_eq!(executor.router().outstanding(), 0);
    }

    #[tokio::test]
    async fn error_reply_surfaces_as_failure() {
        let registry = Arc::new(ToolRegistry::new());
        registry
            .register(Tool::bus(
                ToolSpec::new("viewing", InvocationStyle::MessageWithReply, DeviceType::Getter)
                    .vision(),
            ))
            .unwrap();
        let executor = CommandExecutor::new(
            registry,
            Arc::new(CommandRouter::new()),
            Arc::new(RecordingBus::default()),
            Arc::new(DawnConfig::default()),
        );

        let tool = executor.registry().find("viewing").unwrap();
        let result = executor
            .interpret_reply(
                &tool,
                r#"{"request_id":"r","status":"error","error":{"code":"E_CAM","message":"camera offline"}}"#,
            )
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.text.unwrap().contains("camera offline"));
    }

    #[tokio::test]
    async fn vision_reply_populates_payload_from_inline_data() {
        let registry = Arc::new(ToolRegistry::new());
        registry
            .register(Tool::bus(
                ToolSpec::new("viewing", InvocationStyle::MessageWithReply, DeviceType::Getter)
                    .vision(),
            ))
            .unwrap();
        let executor = CommandExecutor::new(
            registry,
            Arc::new(CommandRouter::new()),
            Arc::new(RecordingBus::default()),
            Arc::new(DawnConfig::default()),
        );

        let tool = executor.registry().find("viewing").unwrap();
        let result = executor
            .interpret_reply(
                &tool,
                r#"{"request_id":"r","status":"ok","data":{"content":"aGVsbG8=","encoding":"base64"}}"#,
            )
            .await
            .unwrap();

        assert!(result.success);
        let vision = result.vision.unwrap();
        assert_eq!(vision.base64, "aGVsbG8=");
        assert_eq!(vision.size, 5);
    }
}
