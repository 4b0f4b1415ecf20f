//! Turn orchestration: the tool-execution loop for one conversation turn.
//!
//! A turn sends the session history to the chat backend, extracts any tool
//! calls from the response, executes them in order through the command
//! executor, appends the results in the provider-native shape, and issues a
//! follow-up model call to produce the user-facing text, unless a tool's
//! skip-follow-up flag says its own output is the answer.
//!
//! Tool execution within a turn is sequential (a later tool may depend on
//! an earlier one's side effects); turns from different sessions run in
//! parallel.  History is only appended at commit points, so an aborted turn
//! leaves the history intact up to the last committed step.

use std::sync::Arc;

use tracing::{debug, info, warn};

use dawn_command::tool::{ToolResult, VisionPayload};
use dawn_command::{CancelToken, CommandContext, CommandError, CommandExecutor};

use crate::error::{AgentError, Result};
use crate::extract::{Extraction, extract};
use crate::schema::{claude_tool_schemas, openai_tool_schemas};
use crate::session::Session;
use crate::types::{ChatBackend, ChatMessage, ChatRequest, ProviderFormat, ToolResultBlock};

/// Instruction prefixed to tag-shape tool results so the next model turn
/// speaks the data instead of echoing it.
pub const TAG_RESULT_PREFIX: &str = "Speak this information naturally to the user: ";

// ---------------------------------------------------------------------------
// Turn state
// ---------------------------------------------------------------------------

/// Phases of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// Waiting for a user message.
    Idle,
    /// A model call is in flight.
    Calling,
    /// Tool calls are being executed.
    Executing,
    /// The user-visible response is being emitted.
    Emitting,
    /// The turn was cancelled; history holds everything committed so far.
    Aborted,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives conversation turns against a pluggable chat backend.
pub struct Orchestrator {
    executor: Arc<CommandExecutor>,
}

impl Orchestrator {
    /// Create an orchestrator over the given executor.
    pub fn new(executor: Arc<CommandExecutor>) -> Self {
        Self { executor }
    }

    /// The executor driving tool calls for this orchestrator.
    pub fn executor(&self) -> &Arc<CommandExecutor> {
        &self.executor
    }

    /// Run one conversation turn and return the user-visible response text.
    ///
    /// Appends the user message, the assistant message (tool-call structures
    /// intact), provider-native tool results, and the final assistant text
    /// to the session history.  Streams text deltas through `on_text`.
    pub async fn run_turn(
        &self,
        backend: &dyn ChatBackend,
        session: &Arc<Session>,
        user_text: &str,
        cancel: &CancelToken,
        on_text: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String> {
        let format = backend.format();
        let mut state = TurnState::Idle;

        session.add_message(ChatMessage::user(user_text));
        self.transition(session, &mut state, TurnState::Calling);

        let request =
            ChatRequest::new(session.history()).with_tools(self.tool_schemas(session, format));
        let response = self.call_backend(backend, &request, cancel, on_text).await;
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                self.transition(session, &mut state, TurnState::Aborted);
                return Err(e);
            }
        };

        let Extraction { calls, text } = extract(format, &response);

        if calls.is_empty() {
            self.transition(session, &mut state, TurnState::Emitting);
            session.add_message(ChatMessage::assistant(text.clone()));
            return Ok(text);
        }

        // -- execute tools, in response order --------------------------------
        self.transition(session, &mut state, TurnState::Executing);

        let mut results: Vec<ToolResult> = Vec::with_capacity(calls.len());
        for call in &calls {
            if cancel.is_cancelled() {
                self.transition(session, &mut state, TurnState::Aborted);
                return Err(AgentError::Aborted);
            }

            let outcome = CommandContext::scope(
                session.id,
                self.executor.dispatch_call(call, cancel),
            )
            .await;

            let result = match outcome {
                Ok(result) => result,
                Err(CommandError::Cancelled) => {
                    self.transition(session, &mut state, TurnState::Aborted);
                    return Err(AgentError::Aborted);
                }
                // Lookup and validation failures become non-success results
                // so the model can react; the turn continues.
                Err(e) => {
                    info!(tool = %call.name, error = %e, "tool call failed");
                    ToolResult::failure(call.id.clone(), e.to_string())
                }
            };
            results.push(result);
        }

        // -- commit the assistant message and results ------------------------
        session.add_message(ChatMessage::assistant_tool_calls(text, calls));
        self.append_results(session, format, &results);

        if results.iter().any(|r| r.skip_followup) {
            // The tool already produced the user-visible answer.
            let final_text = join_result_texts(&results);
            self.transition(session, &mut state, TurnState::Emitting);
            session.add_message(ChatMessage::assistant(final_text.clone()));
            on_text(&final_text);
            return Ok(final_text);
        }

        // -- follow-up call to synthesize the user-facing text ---------------
        self.transition(session, &mut state, TurnState::Calling);

        let mut followup = ChatRequest::new(session.history());
        if let Some(vision) = take_vision_payload(results) {
            debug!(size = vision.size, "attaching vision payload to follow-up call");
            followup = followup.with_image(vision);
        }

        let response = self.call_backend(backend, &followup, cancel, on_text).await;
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                self.transition(session, &mut state, TurnState::Aborted);
                return Err(e);
            }
        };

        // The follow-up is issued without tools; any stray tool syntax is
        // dropped and only the text is kept.
        let followup_extraction = extract(format, &response);
        if !followup_extraction.calls.is_empty() {
            warn!(
                calls = followup_extraction.calls.len(),
                "follow-up response emitted tool calls, ignoring"
            );
        }
        let final_text = followup_extraction.text;

        self.transition(session, &mut state, TurnState::Emitting);
        session.add_message(ChatMessage::assistant(final_text.clone()));
        Ok(final_text)
    }

    /// Race the backend call against cancellation.
    async fn call_backend(
        &self,
        backend: &dyn ChatBackend,
        request: &ChatRequest,
        cancel: &CancelToken,
        on_text: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<crate::types::BackendResponse> {
        if cancel.is_cancelled() {
            return Err(AgentError::Aborted);
        }
        tokio::select! {
            response = backend.stream_chat(request, on_text) => response,
            _ = cancel.cancelled() => Err(AgentError::Aborted),
        }
    }

    /// Provider tool schemas for this turn, honoring the session's tool mode.
    fn tool_schemas(&self, session: &Session, format: ProviderFormat) -> Vec<serde_json::Value> {
        if session.llm_config().tools_mode == "off" {
            return Vec::new();
        }
        match format {
            ProviderFormat::OpenAi => openai_tool_schemas(self.executor.registry()),
            ProviderFormat::Claude => claude_tool_schemas(self.executor.registry()),
            // Tag-shape models get their tool list via the system prompt.
            ProviderFormat::Tag => Vec::new(),
        }
    }

    /// Append tool results to the history in the provider-native shape.
    fn append_results(&self, session: &Session, format: ProviderFormat, results: &[ToolResult]) {
        match format {
            // One message per result, role `tool`, correlated by call id.
            ProviderFormat::OpenAi => {
                for result in results {
                    session.add_message(ChatMessage::tool_result(
                        result.call_id.clone(),
                        result.text.clone(),
                    ));
                }
            }
            // A single user message with one tool_result block per result.
            ProviderFormat::Claude => {
                let blocks = results
                    .iter()
                    .map(|result| ToolResultBlock {
                        tool_use_id: result.call_id.clone(),
                        content: result.text.clone(),
                    })
                    .collect();
                session.add_message(ChatMessage::user_tool_results(blocks));
            }
            // A system message carrying the data with a speaking instruction.
            ProviderFormat::Tag => {
                let mut content = String::from(TAG_RESULT_PREFIX);
                content.push_str(&join_result_texts(results));
                session.add_message(ChatMessage::system(content));
            }
        }
    }

    fn transition(&self, session: &Session, state: &mut TurnState, next: TurnState) {
        debug!(session_id = session.id, from = ?state, to = ?next, "turn state");
        *state = next;
    }
}

/// Concatenate the textual results, newline-separated, skipping empties.
fn join_result_texts(results: &[ToolResult]) -> String {
    results
        .iter()
        .filter(|r| !r.text.is_empty())
        .map(|r| r.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Take the single vision payload carried by this turn's results.
///
/// Exactly one image is carried per turn; extras are dropped with a log.
fn take_vision_payload(results: Vec<ToolResult>) -> Option<VisionPayload> {
    let mut payloads: Vec<VisionPayload> =
        results.into_iter().filter_map(|r| r.vision).collect();
    if payloads.len() > 1 {
        warn!(count = payloads.len(), "multiple vision payloads in one turn, keeping first");
    }
    if payloads.is_empty() {
        None
    } else {
        Some(payloads.remove(0))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with_text(text: &str) -> ToolResult {
        ToolResult {
            call_id: "c".into(),
            text: text.into(),
            success: true,
            skip_followup: false,
            vision: None,
        }
    }

    #[test]
    fn join_skips_empty_results() {
        let results = vec![
            result_with_text("one"),
            result_with_text(""),
            result_with_text("two"),
        ];
        assert_eq!(join_result_texts(&results), "one\ntwo");
    }

    #[test]
    fn single_vision_payload_is_taken() {
        let mut with_vision = result_with_text("saw it");
        with_vision.vision = Some(VisionPayload {
            base64: "aGk=".into(),
            size: 2,
        });
        let payload = take_vision_payload(vec![result_with_text("x"), with_vision]);
        assert_eq!(payload.unwrap().base64, "aGk=");
    }

    #[test]
    fn no_vision_payload_yields_none() {
        assert!(take_vision_payload(vec![result_with_text("x")]).is_none());
    }
}
