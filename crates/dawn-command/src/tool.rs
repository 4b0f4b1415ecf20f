//! Tool metadata and the tool abstraction.
//!
//! A tool is a named, schema-bearing operation the language model (or an
//! external bridge) can invoke.  The metadata in [`ToolSpec`] drives prompt
//! generation, provider tool schemas, parameter routing in the executor, and
//! availability gating.  Direct tools additionally carry a [`ToolHandler`]
//! implementation; message-style tools are executed by publishing an envelope
//! on the message bus.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use dawn_config::DawnConfig;

use crate::error::Result;

/// Maximum number of tool calls accepted from a single model response.
pub const MAX_TOOL_CALLS: usize = 16;

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// How a tool is executed by the command executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStyle {
    /// Invoke an in-process [`ToolHandler`] and return its output.
    Direct,
    /// Publish a command envelope on the bus, fire-and-forget.
    Message,
    /// Publish a command envelope with a correlation id and wait for the
    /// matching reply.
    MessageWithReply,
}

/// Device-type classification, controlling the default action when a caller
/// omits one entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// On/off devices.
    Boolean,
    /// Devices with a continuous level.
    Analog,
    /// Read-only information sources.
    Getter,
    /// One-shot actions.
    Trigger,
    /// Media playback.
    Music,
    /// Dispatches to multiple underlying devices via a device map.
    Meta,
}

impl DeviceType {
    /// The action used when a caller supplies neither an action nor a value.
    pub fn default_action(self) -> &'static str {
        match self {
            Self::Boolean => "toggle",
            Self::Analog => "set",
            Self::Getter => "get",
            Self::Trigger => "trigger",
            Self::Music => "play",
            Self::Meta => "set",
        }
    }
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Value type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Enum,
}

/// How a parameter value is mapped into the executor's
/// `(device, action, value)` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamRouting {
    /// Overwrites the action slot.
    Action,
    /// Overwrites the device slot (through the device map for meta tools).
    Device,
    /// Fills or space-appends the value slot.
    Value,
    /// Space-appended into the value slot like `Value`.
    Custom,
}

/// A single parameter in a tool's schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    /// Parameter name as it appears in the argument object.
    pub name: String,
    /// Description used in provider tool schemas.
    pub description: String,
    /// Value type.
    pub param_type: ParamType,
    /// Whether the model must supply this parameter.
    pub required: bool,
    /// Allowed values; non-empty iff `param_type == Enum`.
    pub enum_values: Vec<String>,
    /// Routing into the dispatch triple.
    pub routing: ParamRouting,
}

impl ParamSpec {
    /// Create a required string parameter.
    pub fn string(name: impl Into<String>, description: impl Into<String>, routing: ParamRouting) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            param_type: ParamType::String,
            required: true,
            enum_values: Vec::new(),
            routing,
        }
    }

    /// Create a required enum parameter with the given allowed values.
    pub fn enumeration(
        name: impl Into<String>,
        description: impl Into<String>,
        values: &[&str],
        routing: ParamRouting,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            param_type: ParamType::Enum,
            required: true,
            enum_values: values.iter().map(|s| (*s).to_string()).collect(),
            routing,
        }
    }

    /// Builder: mark the parameter optional.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Builder: change the value type.
    pub fn typed(mut self, param_type: ParamType) -> Self {
        self.param_type = param_type;
        self
    }
}

// ---------------------------------------------------------------------------
// Tool spec
// ---------------------------------------------------------------------------

/// Static metadata describing one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Canonical name; lookup is case-insensitive.
    pub name: String,
    /// Alternate names, also case-insensitive.
    pub aliases: Vec<String>,
    /// Human-readable description used in model prompts.
    pub description: String,
    /// How the executor runs this tool.
    pub style: InvocationStyle,
    /// Device-type classification.
    pub device_type: DeviceType,
    /// The tool reaches out over the network.
    pub uses_network: bool,
    /// The tool requires a hardware feature present only on some hosts.
    pub requires_hardware: bool,
    /// The tool's textual result is the user-visible answer; skip the
    /// follow-up model call.
    pub skip_followup: bool,
    /// The tool may be invoked by an external bridge.
    pub default_remote: bool,
    /// The tool captures an image to attach to the next model call.
    pub captures_vision: bool,
    /// Parameter schema, in declaration order.
    pub params: Vec<ParamSpec>,
    /// For meta tools: key-to-device translation applied to device-routed
    /// parameter values.
    pub device_map: HashMap<String, String>,
    /// Bus topic override; `None` uses the configured default topic.
    pub topic: Option<String>,
}

impl ToolSpec {
    /// Create a minimal spec with the given name, style, and device type.
    pub fn new(name: impl Into<String>, style: InvocationStyle, device_type: DeviceType) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            description: String::new(),
            style,
            device_type,
            uses_network: false,
            requires_hardware: false,
            skip_followup: false,
            default_remote: false,
            captures_vision: false,
            params: Vec::new(),
            device_map: HashMap::new(),
            topic: None,
        }
    }

    /// Builder: set the description.
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Builder: add an alias.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Builder: add a parameter.
    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    /// Builder: set the skip-follow-up flag.
    pub fn skip_followup(mut self) -> Self {
        self.skip_followup = true;
        self
    }

    /// Builder: mark as invokable by external bridges.
    pub fn remote(mut self) -> Self {
        self.default_remote = true;
        self
    }

    /// Builder: mark as network-using.
    pub fn network(mut self) -> Self {
        self.uses_network = true;
        self
    }

    /// Builder: mark as vision-capturing.
    pub fn vision(mut self) -> Self {
        self.captures_vision = true;
        self
    }

    /// Builder: mark as requiring a hardware feature.
    pub fn requires_hardware(mut self) -> Self {
        self.requires_hardware = true;
        self
    }

    /// Builder: add a device-map entry.
    pub fn map_device(mut self, key: impl Into<String>, device: impl Into<String>) -> Self {
        self.device_map.insert(key.into(), device.into());
        self
    }

    /// Builder: override the bus topic.
    pub fn on_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Whether any parameter routes into the action slot.
    pub fn has_action_param(&self) -> bool {
        self.params.iter().any(|p| p.routing == ParamRouting::Action)
    }
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Context available to a tool while it executes.
#[derive(Debug, Clone, Copy)]
pub struct InvokeContext {
    /// The session that issued this invocation; the local sentinel session
    /// when the work is not attached to a user connection.
    pub session_id: u32,
}

/// Output of a direct tool invocation.
#[derive(Debug, Default)]
pub struct ToolOutput {
    /// Textual result; `None` means "executed, no data".
    pub text: Option<String>,
    /// Whether the result should be surfaced to the user at all.
    pub should_respond: bool,
    /// Image captured by a vision-capable tool, for the next model call.
    pub vision: Option<VisionPayload>,
}

impl ToolOutput {
    /// A result with text that should be spoken or displayed.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            should_respond: true,
            vision: None,
        }
    }

    /// Executed successfully with nothing to say.
    pub fn silent() -> Self {
        Self::default()
    }
}

/// A directly invokable tool implementation.
///
/// Implementations must be reentrant: the same handler may be invoked
/// concurrently from multiple sessions.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute the tool with the routed action and value.
    async fn invoke(&self, action: &str, value: &str, ctx: &InvokeContext) -> Result<ToolOutput>;
}

/// Predicate deciding whether a tool is available under the current
/// configuration.
pub type AvailabilityFn = Arc<dyn Fn(&DawnConfig) -> bool + Send + Sync>;

// ---------------------------------------------------------------------------
// Tool calls and results
// ---------------------------------------------------------------------------

/// A transport-independent tool invocation extracted from a model response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation id assigned by the provider; empty for tag-style calls.
    #[serde(default)]
    pub id: String,
    /// Canonical tool name.
    pub name: String,
    /// Raw argument object, serialized as JSON text.
    pub arguments: String,
}

impl ToolCall {
    /// Create a call with no provider-assigned id.
    pub fn new(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// The outcome of executing one tool call.
#[derive(Debug)]
pub struct ToolResult {
    /// The [`ToolCall::id`] this result corresponds to.
    pub call_id: String,
    /// Textual result fed back to the model (or shown to the user directly).
    pub text: String,
    /// Whether execution succeeded.
    pub success: bool,
    /// Copied from tool metadata, or overridden by the invocation path.
    pub skip_followup: bool,
    /// Image captured by the tool; ownership is exclusively this result's,
    /// consumed by the follow-up model call.
    pub vision: Option<VisionPayload>,
}

impl ToolResult {
    /// A failed result with an error message.
    pub fn failure(call_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            text: text.into(),
            success: false,
            skip_followup: false,
            vision: None,
        }
    }
}

/// A base64-encoded image captured by a vision-capable tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionPayload {
    /// Base64-encoded image bytes (JPEG unless stated otherwise).
    pub base64: String,
    /// Decoded size in bytes.
    pub size: usize,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_actions_per_device_type() {
        assert_eq!(DeviceType::Boolean.default_action(), "toggle");
        assert_eq!(DeviceType::Analog.default_action(), "set");
        assert_eq!(DeviceType::Getter.default_action(), "get");
        assert_eq!(DeviceType::Trigger.default_action(), "trigger");
        assert_eq!(DeviceType::Music.default_action(), "play");
    }

    #[test]
    fn spec_builder() {
        let spec = ToolSpec::new("audio", InvocationStyle::Message, DeviceType::Meta)
            .describe("Audio device control")
            .alias("sound")
            .map_device("capture", "audio_capture")
            .map_device("playback", "audio_playback")
            .param(ParamSpec::enumeration(
                "target",
                "Which audio device",
                &["capture", "playback"],
                ParamRouting::Device,
            ));

        assert_eq!(spec.name, "audio");
        assert_eq!(spec.aliases, vec!["sound"]);
        assert_eq!(spec.device_map.get("capture").map(String::as_str), Some("audio_capture"));
        assert_eq!(spec.params.len(), 1);
        assert!(!spec.has_action_param());
    }

    #[test]
    fn spec_equality_for_idempotent_registration() {
        let a = ToolSpec::new("weather", InvocationStyle::Direct, DeviceType::Getter)
            .param(ParamSpec::string("location", "City name", ParamRouting::Value));
        let b = a.clone();
        assert_eq!(a, b);

        let c = a.clone().alias("forecast");
        assert_ne!(a, c);
    }
}
