//! Process-wide tool registry.
//!
//! Maps canonical tool names and aliases to [`Tool`] entries.  Registration
//! happens once at startup; afterwards the registry is read-mostly, so the
//! table sits behind an `RwLock` and the per-tool enabled bit is an atomic
//! that [`ToolRegistry::refresh`] recomputes without invalidating readers.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use dawn_config::DawnConfig;

use crate::error::{CommandError, Result};
use crate::tool::{AvailabilityFn, InvocationStyle, ParamType, ToolHandler, ToolSpec};

// ---------------------------------------------------------------------------
// Registry entry
// ---------------------------------------------------------------------------

/// A registered tool: metadata plus an optional in-process implementation.
pub struct Tool {
    /// Static metadata.
    pub spec: ToolSpec,
    /// Implementation for [`InvocationStyle::Direct`] tools.
    handler: Option<Arc<dyn ToolHandler>>,
    /// Availability predicate over the configuration tree.
    availability: Option<AvailabilityFn>,
    /// Current availability, recomputed by [`ToolRegistry::refresh`].
    enabled: AtomicBool,
}

impl Tool {
    /// Create a direct tool backed by an in-process handler.
    pub fn direct(spec: ToolSpec, handler: Arc<dyn ToolHandler>) -> Self {
        Self {
            spec,
            handler: Some(handler),
            availability: None,
            enabled: AtomicBool::new(true),
        }
    }

    /// Create a bus-dispatched tool (message or message-with-reply).
    pub fn bus(spec: ToolSpec) -> Self {
        Self {
            spec,
            handler: None,
            availability: None,
            enabled: AtomicBool::new(true),
        }
    }

    /// Builder: gate availability on a configuration predicate.  The tool
    /// starts disabled until the first [`ToolRegistry::refresh`].
    pub fn with_availability(mut self, predicate: AvailabilityFn) -> Self {
        self.availability = Some(predicate);
        self.enabled = AtomicBool::new(false);
        self
    }

    /// Whether the tool is currently available.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// The in-process handler, present iff the style is `Direct`.
    pub fn handler(&self) -> Option<&Arc<dyn ToolHandler>> {
        self.handler.as_ref()
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.spec.name)
            .field("style", &self.spec.style)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Inner {
    /// Tools in registration order.
    tools: Vec<Arc<Tool>>,
    /// Lowercased canonical name → index into `tools`.
    by_name: HashMap<String, usize>,
    /// Lowercased alias → index into `tools`.
    by_alias: HashMap<String, usize>,
}

/// Process-wide mapping from tool names and aliases to tool entries.
#[derive(Default)]
pub struct ToolRegistry {
    inner: RwLock<Inner>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool.
    ///
    /// Rejects duplicate canonical names and aliases (case-insensitive, in
    /// either direction) with `AlreadyRegistered`, and invalid metadata with
    /// `InvalidSchema`.  Re-registering exact-identical metadata is a no-op.
    pub fn register(&self, tool: Tool) -> Result<()> {
        validate_spec(&tool)?;

        let mut inner = self.inner.write().expect("registry lock poisoned");

        let canonical = tool.spec.name.to_lowercase();

        // Idempotent re-registration of identical metadata.
        if let Some(&idx) = inner.by_name.get(&canonical) {
            if inner.tools[idx].spec == tool.spec {
                debug!(tool = %tool.spec.name, "identical re-registration ignored");
                return Ok(());
            }
            return Err(CommandError::AlreadyRegistered {
                name: tool.spec.name.clone(),
            });
        }

        // Any collision between the new tool's names and existing names or
        // aliases is rejected.
        let mut candidate_names = vec![canonical.clone()];
        candidate_names.extend(tool.spec.aliases.iter().map(|a| a.to_lowercase()));

        for name in &candidate_names {
            if inner.by_name.contains_key(name) || inner.by_alias.contains_key(name) {
                return Err(CommandError::AlreadyRegistered { name: name.clone() });
            }
        }

        let idx = inner.tools.len();
        inner.by_name.insert(canonical, idx);
        for alias in &tool.spec.aliases {
            inner.by_alias.insert(alias.to_lowercase(), idx);
        }

        debug!(tool = %tool.spec.name, style = ?tool.spec.style, "tool registered");
        inner.tools.push(Arc::new(tool));
        Ok(())
    }

    /// Look up a tool by canonical name or alias, case-insensitively.
    ///
    /// Canonical names take precedence over aliases.
    pub fn find(&self, name: &str) -> Result<Arc<Tool>> {
        let inner = self.inner.read().expect("registry lock poisoned");
        let key = name.to_lowercase();

        let idx = inner
            .by_name
            .get(&key)
            .or_else(|| inner.by_alias.get(&key))
            .copied()
            .ok_or_else(|| CommandError::UnknownTool {
                name: name.to_string(),
            })?;

        Ok(Arc::clone(&inner.tools[idx]))
    }

    /// Visit every currently enabled tool, in registration order.
    pub fn for_each_enabled(&self, mut visitor: impl FnMut(&Arc<Tool>)) {
        let inner = self.inner.read().expect("registry lock poisoned");
        for tool in &inner.tools {
            if tool.is_enabled() {
                visitor(tool);
            }
        }
    }

    /// Re-evaluate each tool's availability predicate against the current
    /// configuration and log a summary.
    pub fn refresh(&self, config: &DawnConfig) {
        let inner = self.inner.read().expect("registry lock poisoned");
        let mut enabled = 0usize;
        let mut disabled = 0usize;

        for tool in &inner.tools {
            let available = tool
                .availability
                .as_ref()
                .map(|predicate| predicate(config))
                .unwrap_or(true);
            tool.enabled.store(available, Ordering::Relaxed);
            if available {
                enabled += 1;
            } else {
                disabled += 1;
                debug!(tool = %tool.spec.name, "tool unavailable under current config");
            }
        }

        info!(enabled, disabled, "tool availability refreshed");
    }

    /// Total number of registered tools.
    pub fn len(&self) -> usize {
        self.inner.read().expect("registry lock poisoned").tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Validate metadata before insertion.
fn validate_spec(tool: &Tool) -> Result<()> {
    let spec = &tool.spec;

    if spec.name.is_empty() {
        return Err(CommandError::InvalidSchema {
            tool: spec.name.clone(),
            reason: "tool name must not be empty".into(),
        });
    }

    for param in &spec.params {
        if param.param_type == ParamType::Enum && param.enum_values.is_empty() {
            return Err(CommandError::InvalidSchema {
                tool: spec.name.clone(),
                reason: format!("enum parameter `{}` has no values", param.name),
            });
        }
    }

    match (spec.style, tool.handler.is_some()) {
        (InvocationStyle::Direct, false) => Err(CommandError::InvalidSchema {
            tool: spec.name.clone(),
            reason: "direct tool has no handler".into(),
        }),
        (InvocationStyle::Message | InvocationStyle::MessageWithReply, true) => {
            warn!(tool = %spec.name, "bus tool carries an unused handler");
            Ok(())
        }
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{DeviceType, InvokeContext, ParamRouting, ParamSpec, ToolOutput};
    use async_trait::async_trait;

    struct NoopHandler;

    #[async_trait]
    impl ToolHandler for NoopHandler {
        async fn invoke(&self, _action: &str, _value: &str, _ctx: &InvokeContext) -> Result<ToolOutput> {
            Ok(ToolOutput::silent())
        }
    }

    fn getter(name: &str) -> ToolSpec {
        ToolSpec::new(name, InvocationStyle::Direct, DeviceType::Getter)
    }

    #[test]
    fn register_and_find_case_insensitive() {
        let registry = ToolRegistry::new();
        registry
            .register(Tool::direct(getter("Weather").alias("Forecast"), Arc::new(NoopHandler)))
            .unwrap();

        assert_eq!(registry.find("weather").unwrap().spec.name, "Weather");
        assert_eq!(registry.find("WEATHER").unwrap().spec.name, "Weather");
        assert_eq!(registry.find("forecast").unwrap().spec.name, "Weather");
        assert!(registry.find("unknown").is_err());
    }

    #[test]
    fn duplicate_canonical_name_rejected() {
        let registry = ToolRegistry::new();
        registry
            .register(Tool::direct(getter("time"), Arc::new(NoopHandler)))
            .unwrap();

        let dup = Tool::direct(getter("TIME").describe("different"), Arc::new(NoopHandler));
        assert!(matches!(
            registry.register(dup),
            Err(CommandError::AlreadyRegistered { .. })
        ));
    }

    #[test]
    fn alias_colliding_with_name_rejected() {
        let registry = ToolRegistry::new();
        registry
            .register(Tool::direct(getter("time"), Arc::new(NoopHandler)))
            .unwrap();

        let colliding = Tool::direct(getter("clock").alias("Time"), Arc::new(NoopHandler));
        assert!(matches!(
            registry.register(colliding),
            Err(CommandError::AlreadyRegistered { .. })
        ));
    }

    #[test]
    fn name_colliding_with_alias_rejected() {
        let registry = ToolRegistry::new();
        registry
            .register(Tool::direct(getter("time").alias("clock"), Arc::new(NoopHandler)))
            .unwrap();

        let colliding = Tool::direct(getter("clock"), Arc::new(NoopHandler));
        assert!(matches!(
            registry.register(colliding),
            Err(CommandError::AlreadyRegistered { .. })
        ));
    }

    #[test]
    fn identical_reregistration_is_noop() {
        let registry = ToolRegistry::new();
        let spec = getter("time").describe("Current time");

        registry
            .register(Tool::direct(spec.clone(), Arc::new(NoopHandler)))
            .unwrap();
        registry
            .register(Tool::direct(spec, Arc::new(NoopHandler)))
            .unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn empty_enum_rejected() {
        let registry = ToolRegistry::new();
        let spec = getter("mode").param(ParamSpec {
            name: "target".into(),
            description: String::new(),
            param_type: ParamType::Enum,
            required: true,
            enum_values: Vec::new(),
            routing: ParamRouting::Value,
        });

        assert!(matches!(
            registry.register(Tool::direct(spec, Arc::new(NoopHandler))),
            Err(CommandError::InvalidSchema { .. })
        ));
    }

    #[test]
    fn direct_tool_without_handler_rejected() {
        let registry = ToolRegistry::new();
        let result = registry.register(Tool::bus(getter("broken")));
        assert!(matches!(result, Err(CommandError::InvalidSchema { .. })));
    }

    #[test]
    fn refresh_gates_on_config() {
        let registry = ToolRegistry::new();
        let spec = ToolSpec::new("search", InvocationStyle::Direct, DeviceType::Getter).network();
        let tool = Tool::direct(spec, Arc::new(NoopHandler))
            .with_availability(Arc::new(|config| config.search.endpoint.is_some()));
        registry.register(tool).unwrap();

        // Gated tools start disabled.
        assert!(!registry.find("search").unwrap().is_enabled());

        let mut enabled_names = Vec::new();
        registry.for_each_enabled(|t| enabled_names.push(t.spec.name.clone()));
        assert!(enabled_names.is_empty());

        let config = DawnConfig::parse("[search]\nendpoint = \"https://searx.local\"\n").unwrap();
        registry.refresh(&config);
        assert!(registry.find("search").unwrap().is_enabled());

        let config = DawnConfig::parse("").unwrap();
        registry.refresh(&config);
        assert!(!registry.find("search").unwrap().is_enabled());
    }

    #[test]
    fn enumeration_preserves_registration_order() {
        let registry = ToolRegistry::new();
        for name in ["alpha", "beta", "gamma"] {
            registry
                .register(Tool::direct(getter(name), Arc::new(NoopHandler)))
                .unwrap();
        }

        let mut seen = Vec::new();
        registry.for_each_enabled(|t| seen.push(t.spec.name.clone()));
        assert_eq!(seen, vec!["alpha", "beta", "gamma"]);
    }
}
