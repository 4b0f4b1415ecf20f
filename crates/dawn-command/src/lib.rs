//! DAWN command-dispatch core.
//!
//! This crate is the hub every tool invocation passes through, whatever its
//! origin (inline tag in model text, provider tool call, or external bridge
//! message):
//!
//! - **[`tool`]** -- Tool metadata: parameter schemas, routing tags, device
//!   types, capability flags, and the [`tool::ToolHandler`] abstraction for
//!   in-process tools.
//! - **[`registry`]** -- Process-wide name/alias lookup with
//!   configuration-gated availability.
//! - **[`executor`]** -- Unified `(device, action, value)` dispatch across
//!   the three invocation styles, including parameter routing from parsed
//!   model arguments.
//! - **[`router`]** -- Request/response correlation that grafts synchronous
//!   calls onto the asynchronous message bus.
//! - **[`envelope`]** -- Bus wire format with fail-closed checksum policy.
//! - **[`context`]** -- Task-scoped command context and cancellation.
//!
//! All public types are `Send + Sync` and designed for use within a
//! multi-threaded tokio runtime.

pub mod context;
pub mod envelope;
pub mod error;
pub mod executor;
pub mod registry;
pub mod router;
pub mod tool;

// Re-export the most commonly used types at the crate root for convenience.
pub use context::{CancelToken, CommandContext, LOCAL_SESSION_ID};
pub use envelope::{CommandEnvelope, ReplyEnvelope, ReplyStatus, verify_checksum};
pub use error::{CommandError, Result};
pub use executor::{BusPublisher, CommandExecutor, CommandResult, DEFAULT_SYNC_TIMEOUT};
pub use registry::{Tool, ToolRegistry};
pub use router::{CommandRouter, Waiter};
pub use tool::{
    DeviceType, InvocationStyle, InvokeContext, MAX_TOOL_CALLS, ParamRouting, ParamSpec, ParamType,
    ToolCall, ToolHandler, ToolOutput, ToolResult, ToolSpec, VisionPayload,
};
