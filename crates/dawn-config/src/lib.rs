//! Configuration tree for the DAWN server.
//!
//! Configuration is a hierarchical set of named TOML sections with enumerated
//! keys.  Unknown sections and keys produce warnings but never fail startup;
//! out-of-range numeric values are clamped into their valid range.  The parsed
//! [`DawnConfig`] is shared read-only across subsystems: tool availability
//! predicates, the LLM backends, and the message-bus bridge all read from it.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{info, warn};

mod error;

pub use error::{ConfigError, Result};

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Root of the configuration tree.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DawnConfig {
    /// Language-model settings, including tool gating.
    pub llm: LlmSection,
    /// Web-search tool settings.  The search tool is enabled only when an
    /// endpoint is configured.
    pub search: SearchSection,
    /// Long-term memory extraction settings.
    pub memory: MemorySection,
    /// Voice-triggered shutdown settings.
    pub shutdown: ShutdownSection,
    /// Conversation-store settings.
    pub store: StoreSection,
    /// Message-bus broker settings.
    pub mqtt: MqttSection,
    /// API keys and credentials.
    pub secrets: SecretsSection,
    /// Vision-tool file access settings.
    pub viewing: ViewingSection,
}

/// `[llm]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// Base URL of the local inference endpoint (Chat Completions shape).
    pub endpoint: String,
    /// Default model identifier; empty lets the endpoint pick.
    pub model: String,
    /// `[llm.tools]` subsection.
    pub tools: ToolsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080".into(),
            model: String::new(),
            tools: ToolsSection::default(),
        }
    }
}

/// `[llm.tools]`: gating for model tool use.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// Overall tool mode: "auto", "native", "inline", or "off".
    pub mode: String,
    /// Whether provider-native function calling is enabled.  Accepts either
    /// a mode string or a legacy boolean (older config files used `true`
    /// where `"native"` is now expected).
    pub native_enabled: NativeToolsMode,
    /// Tool names enabled for the local backend.  Empty means all.
    pub local_enabled: Vec<String>,
    /// Tool names an external bridge may invoke.  Empty means all tools
    /// flagged remote-capable.
    pub remote_enabled: Vec<String>,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            mode: "auto".into(),
            native_enabled: NativeToolsMode::default(),
            local_enabled: Vec::new(),
            remote_enabled: Vec::new(),
        }
    }
}

/// Value of `llm.tools.native_enabled`.
///
/// Historically a boolean, now a mode string.  Both forms are accepted;
/// [`NativeToolsMode::as_mode`] normalizes to the string form.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NativeToolsMode {
    /// Legacy boolean form: `true` means native function calling.
    Legacy(bool),
    /// Mode string: "native" or "inline".
    Mode(String),
}

impl Default for NativeToolsMode {
    fn default() -> Self {
        Self::Mode("native".into())
    }
}

impl NativeToolsMode {
    /// Normalize to the mode-string form.
    pub fn as_mode(&self) -> &str {
        match self {
            Self::Legacy(true) => "native",
            Self::Legacy(false) => "inline",
            Self::Mode(m) => m.as_str(),
        }
    }
}

/// `[search]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    /// Search API endpoint.  Absence disables the search tool.
    pub endpoint: Option<String>,
}

/// `[memory]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    /// Whether memory extraction runs on non-private conversations.
    pub enabled: bool,
    /// Token budget for extracted memories.  Clamped to at least
    /// [`MIN_MEMORY_BUDGET`].
    pub budget_tokens: u32,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            enabled: false,
            budget_tokens: 2048,
        }
    }
}

/// `[shutdown]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ShutdownSection {
    /// Whether the shutdown tool is available at all.
    pub enabled: bool,
    /// Passphrase the caller must supply in the value slot.
    pub passphrase: String,
}

/// `[store]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// Database file path.  Defaults to `<data-dir>/dawn.db`.
    pub path: Option<PathBuf>,
    /// Maximum conversations a single user may own.
    pub max_conversations_per_user: u32,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: None,
            max_conversations_per_user: 100,
        }
    }
}

/// `[mqtt]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttSection {
    /// Broker hostname.
    pub broker_host: String,
    /// Broker port.
    pub broker_port: u16,
    /// Default topic for outgoing command envelopes.
    pub command_topic: String,
    /// Topic the bridge subscribes to for replies.
    pub reply_topic: String,
    /// Client identifier; generated when absent.
    pub client_id: Option<String>,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            broker_host: "localhost".into(),
            broker_port: 1883,
            command_topic: "dawn/commands".into(),
            reply_topic: "dawn/replies".into(),
            client_id: None,
        }
    }
}

/// `[secrets]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SecretsSection {
    pub openai_api_key: Option<String>,
    pub claude_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub smartthings_token: Option<String>,
    pub smartthings_endpoint: Option<String>,
}

impl SecretsSection {
    /// Whether SmartThings credentials are fully configured.
    pub fn has_smartthings(&self) -> bool {
        self.smartthings_token.is_some() && self.smartthings_endpoint.is_some()
    }
}

/// `[viewing]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ViewingSection {
    /// Directories from which the viewing tool may read image files without
    /// a checksum.  Paths outside these roots require a validating checksum.
    pub allowed_roots: Vec<PathBuf>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Known `section.key` paths.  Anything else in the file produces a warning.
const KNOWN_KEYS: &[&str] = &[
    "llm.endpoint",
    "llm.model",
    "llm.tools.mode",
    "llm.tools.native_enabled",
    "llm.tools.local_enabled",
    "llm.tools.remote_enabled",
    "search.endpoint",
    "memory.enabled",
    "memory.budget_tokens",
    "shutdown.enabled",
    "shutdown.passphrase",
    "store.path",
    "store.max_conversations_per_user",
    "mqtt.broker_host",
    "mqtt.broker_port",
    "mqtt.command_topic",
    "mqtt.reply_topic",
    "mqtt.client_id",
    "secrets.openai_api_key",
    "secrets.claude_api_key",
    "secrets.gemini_api_key",
    "secrets.mqtt_username",
    "secrets.mqtt_password",
    "secrets.smartthings_token",
    "secrets.smartthings_endpoint",
    "viewing.allowed_roots",
];

/// Minimum memory token budget; smaller configured values are clamped up.
pub const MIN_MEMORY_BUDGET: u32 = 100;

impl DawnConfig {
    /// Load configuration from a TOML file.
    ///
    /// A missing file yields the defaults.  Unknown keys are logged as
    /// warnings; out-of-range numeric values are clamped.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "config file absent, using defaults");
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::parse(&text)
    }

    /// Parse configuration from TOML text.
    pub fn parse(text: &str) -> Result<Self> {
        let value: toml::Value = toml::from_str(text)?;
        warn_unknown_keys(&value);

        let mut config: DawnConfig = value.try_into()?;
        config.clamp();
        Ok(config)
    }

    /// Clamp out-of-range numeric values into their valid ranges.
    fn clamp(&mut self) {
        if self.memory.budget_tokens < MIN_MEMORY_BUDGET {
            warn!(
                configured = self.memory.budget_tokens,
                minimum = MIN_MEMORY_BUDGET,
                "memory.budget_tokens below minimum, clamping"
            );
            self.memory.budget_tokens = MIN_MEMORY_BUDGET;
        }
        if self.store.max_conversations_per_user == 0 {
            warn!("store.max_conversations_per_user of 0 is invalid, using 1");
            self.store.max_conversations_per_user = 1;
        }
    }
}

/// Walk the parsed TOML tree and warn about every key not in [`KNOWN_KEYS`].
fn warn_unknown_keys(value: &toml::Value) {
    let Some(table) = value.as_table() else {
        return;
    };
    for (section, sub) in table {
        walk_section(section, sub);
    }
}

fn walk_section(prefix: &str, value: &toml::Value) {
    match value.as_table() {
        Some(table) => {
            for (key, sub) in table {
                let path = format!("{prefix}.{key}");
                if sub.is_table() {
                    walk_section(&path, sub);
                } else if !KNOWN_KEYS.contains(&path.as_str()) {
                    warn!(key = %path, "unknown configuration key ignored");
                }
            }
        }
        // A bare value at section level (e.g. `llm = 3`) is also unknown
        // unless the full path is a known key.
        None => {
            if !KNOWN_KEYS.contains(&prefix) {
                warn!(key = %prefix, "unknown configuration key ignored");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_empty() {
        let config = DawnConfig::parse("").unwrap();
        assert_eq!(config.llm.tools.mode, "auto");
        assert!(config.search.endpoint.is_none());
        assert_eq!(config.store.max_conversations_per_user, 100);
        assert_eq!(config.mqtt.broker_port, 1883);
    }

    #[test]
    fn parse_full_sections() {
        let config = DawnConfig::parse(
            r#"
            [llm.tools]
            mode = "native"
            local_enabled = ["search", "switch_llm"]

            [search]
            endpoint = "https://searx.local/search"

            [shutdown]
            enabled = true
            passphrase = "mellon"

            [mqtt]
            broker_host = "broker.lan"
            broker_port = 8883
            "#,
        )
        .unwrap();

        assert_eq!(config.llm.tools.mode, "native");
        assert_eq!(config.llm.tools.local_enabled.len(), 2);
        assert_eq!(
            config.search.endpoint.as_deref(),
            Some("https://searx.local/search")
        );
        assert!(config.shutdown.enabled);
        assert_eq!(config.shutdown.passphrase, "mellon");
        assert_eq!(config.mqtt.broker_host, "broker.lan");
        assert_eq!(config.mqtt.broker_port, 8883);
    }

    #[test]
    fn native_enabled_accepts_legacy_bool() {
        let config = DawnConfig::parse("[llm.tools]\nnative_enabled = true\n").unwrap();
        assert_eq!(config.llm.tools.native_enabled.as_mode(), "native");

        let config = DawnConfig::parse("[llm.tools]\nnative_enabled = false\n").unwrap();
        assert_eq!(config.llm.tools.native_enabled.as_mode(), "inline");
    }

    #[test]
    fn native_enabled_accepts_mode_string() {
        let config = DawnConfig::parse("[llm.tools]\nnative_enabled = \"inline\"\n").unwrap();
        assert_eq!(config.llm.tools.native_enabled.as_mode(), "inline");
    }

    #[test]
    fn memory_budget_clamped() {
        let config = DawnConfig::parse("[memory]\nbudget_tokens = 10\n").unwrap();
        assert_eq!(config.memory.budget_tokens, MIN_MEMORY_BUDGET);
    }

    #[test]
    fn unknown_keys_do_not_fail() {
        let config = DawnConfig::parse(
            r#"
            [llm.tools]
            mode = "auto"
            frobnicate = 3

            [unknown_section]
            key = "value"
            "#,
        )
        .unwrap();
        assert_eq!(config.llm.tools.mode, "auto");
    }

    #[test]
    fn smartthings_requires_both_credentials() {
        let config = DawnConfig::parse("[secrets]\nsmartthings_token = \"t\"\n").unwrap();
        assert!(!config.secrets.has_smartthings());

        let config = DawnConfig::parse(
            "[secrets]\nsmartthings_token = \"t\"\nsmartthings_endpoint = \"https://st\"\n",
        )
        .unwrap();
        assert!(config.secrets.has_smartthings());
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(DawnConfig::parse("[llm\nbroken").is_err());
    }
}
