//! Integration tests for the command-dispatch core: registry uniqueness,
//! router correlation, and full dispatch through the executor with a bus
//! fake that answers sync-wait commands.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use dawn_command::executor::BusPublisher;
use dawn_command::tool::{
    DeviceType, InvocationStyle, InvokeContext, ParamRouting, ParamSpec, ToolCall, ToolHandler,
    ToolOutput, ToolSpec,
};
use dawn_command::{
    CancelToken, CommandError, CommandExecutor, CommandRouter, Result, Tool, ToolRegistry,
};
use dawn_config::DawnConfig;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

struct EchoHandler;

#[async_trait]
impl ToolHandler for EchoHandler {
    async fn invoke(&self, action: &str, value: &str, _ctx: &InvokeContext) -> Result<ToolOutput> {
        Ok(ToolOutput::text(format!("{action}:{value}")))
    }
}

/// Bus fake that immediately answers every sync-wait publish through the
/// router, simulating a satellite device.
struct AnsweringBus {
    router: Arc<CommandRouter>,
    reply_value: String,
    published: Mutex<Vec<String>>,
}

#[async_trait]
impl BusPublisher for AnsweringBus {
    async fn publish(&self, _topic: &str, payload: &str) -> Result<()> {
        self.published.lock().unwrap().push(payload.to_string());

        let v: serde_json::Value = serde_json::from_str(payload).expect("valid envelope");
        if let Some(request_id) = v["request_id"].as_str() {
            let reply = format!(
                r#"{{"request_id":"{request_id}","status":"ok","value":"{}"}}"#,
                self.reply_value
            );
            let router = Arc::clone(&self.router);
            let request_id = request_id.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                router.deliver(&request_id, reply);
            });
        }
        Ok(())
    }
}

fn executor_with(registry: Arc<ToolRegistry>, reply_value: &str) -> CommandExecutor {
    let router = Arc::new(CommandRouter::new());
    let bus = Arc::new(AnsweringBus {
        router: Arc::clone(&router),
        reply_value: reply_value.to_string(),
        published: Mutex::new(Vec::new()),
    });
    CommandExecutor::new(registry, router, bus, Arc::new(DawnConfig::default()))
}

// ---------------------------------------------------------------------------
// Registry laws
// ---------------------------------------------------------------------------

#[test]
fn registry_names_and_aliases_stay_unique() {
    let registry = ToolRegistry::new();

    let tools = [
        ("weather", vec!["forecast"]),
        ("music", vec!["player", "tunes"]),
        ("lights", vec![]),
    ];
    for (name, aliases) in &tools {
        let mut spec = ToolSpec::new(*name, InvocationStyle::Direct, DeviceType::Getter);
        for alias in aliases {
            spec = spec.alias(*alias);
        }
        registry.register(Tool::direct(spec, Arc::new(EchoHandler))).unwrap();
    }

    // Every registered name, in either case, resolves to exactly one tool,
    // and no second tool may claim any of them.
    for (name, aliases) in &tools {
        assert_eq!(registry.find(name).unwrap().spec.name, *name);
        for alias in aliases {
            assert_eq!(registry.find(&alias.to_uppercase()).unwrap().spec.name, *name);
            let dup = ToolSpec::new(*alias, InvocationStyle::Direct, DeviceType::Getter);
            assert!(registry.register(Tool::direct(dup, Arc::new(EchoHandler))).is_err());
        }
    }
}

// ---------------------------------------------------------------------------
// Router: S4 and the resolution law
// ---------------------------------------------------------------------------

#[tokio::test]
async fn router_timeout_then_late_delivery_is_harmless() {
    let router = Arc::new(CommandRouter::new());
    let waiter = router.register();
    let id = waiter.request_id.clone();

    let started = std::time::Instant::now();
    let result = router.wait(waiter, Duration::from_millis(200)).await;
    assert!(result.is_none());
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(router.outstanding(), 0);

    // The reply arrives after the waiter gave up: ignored, nothing leaks.
    assert!(!router.deliver(&id, "x"));
    assert_eq!(router.outstanding(), 0);
}

#[tokio::test]
async fn router_resolves_each_waiter_exactly_once() {
    let router = Arc::new(CommandRouter::new());

    let mut handles = Vec::new();
    let mut ids = Vec::new();
    for _ in 0..8 {
        let waiter = router.register();
        ids.push(waiter.request_id.clone());
        let router = Arc::clone(&router);
        handles.push(tokio::spawn(async move {
            router.wait(waiter, Duration::from_secs(2)).await
        }));
    }

    for (i, id) in ids.iter().enumerate() {
        router.deliver(id, format!("reply {i}"));
    }

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap().as_deref(), Some(format!("reply {i}").as_str()));
    }
    assert_eq!(router.outstanding(), 0);
}

// ---------------------------------------------------------------------------
// Executor: full dispatch paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dispatch_direct_tool_call_routes_parameters() {
    let registry = Arc::new(ToolRegistry::new());
    let spec = ToolSpec::new("weather", InvocationStyle::Direct, DeviceType::Getter)
        .param(ParamSpec::string("action", "period to report", ParamRouting::Action).optional())
        .param(ParamSpec::string("location", "city name", ParamRouting::Value));
    registry.register(Tool::direct(spec, Arc::new(EchoHandler))).unwrap();

    let executor = executor_with(registry, "");
    let call = ToolCall::new("weather", r#"{"action":"today","location":"Paris"}"#);
    let result = executor.dispatch_call(&call, &CancelToken::new()).await.unwrap();

    assert!(result.success);
    assert_eq!(result.text, "today:Paris");
}

#[tokio::test]
async fn dispatch_sync_wait_round_trip() {
    let registry = Arc::new(ToolRegistry::new());
    let spec = ToolSpec::new("thermostat", InvocationStyle::MessageWithReply, DeviceType::Getter)
        .param(ParamSpec::string("zone", "which zone", ParamRouting::Value).optional());
    registry.register(Tool::bus(spec)).unwrap();

    let executor = executor_with(registry, "21C");
    let call = ToolCall::new("thermostat", r#"{"zone":"upstairs"}"#);
    let result = executor.dispatch_call(&call, &CancelToken::new()).await.unwrap();

    assert!(result.success);
    assert_eq!(result.text, "21C");
}

#[tokio::test]
async fn dispatch_unknown_tool_is_an_error() {
    let executor = executor_with(Arc::new(ToolRegistry::new()), "");
    let call = ToolCall::new("nonexistent", "{}");
    let result = executor.dispatch_call(&call, &CancelToken::new()).await;
    assert!(matches!(result, Err(CommandError::UnknownTool { .. })));
}

#[tokio::test]
async fn disabled_tool_is_not_executable() {
    let registry = Arc::new(ToolRegistry::new());
    let spec = ToolSpec::new("search", InvocationStyle::Direct, DeviceType::Getter).network();
    let tool = Tool::direct(spec, Arc::new(EchoHandler))
        .with_availability(Arc::new(|config| config.search.endpoint.is_some()));
    registry.register(tool).unwrap();

    // No endpoint configured: the predicate leaves the tool disabled.
    registry.refresh(&DawnConfig::default());

    let executor = executor_with(registry, "");
    let result = executor
        .execute("search", "get", "rust", &CancelToken::new(), Duration::ZERO)
        .await;
    assert!(matches!(result, Err(CommandError::UnknownTool { .. })));
}
