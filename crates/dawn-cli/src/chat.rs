//! `dawn chat`: interactive chat against the local backend.
//!
//! Reads lines from stdin, drives one orchestrator turn per line, streams
//! the response to stdout, and persists the exchange to the conversation
//! store: the conversation is created (and its model settings sealed) on
//! the first message, and every committed turn appends both sides.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use dawn_agent::{
    HttpBackendConfig, OpenAiBackend, Orchestrator, Session, SessionManager,
};
use dawn_command::CancelToken;
use dawn_config::DawnConfig;
use dawn_store::{ConversationStore, LlmSettings, UserStore};

/// Username owning CLI conversations.
const CLI_USERNAME: &str = "cli";

pub struct ChatContext {
    pub config: Arc<DawnConfig>,
    pub orchestrator: Orchestrator,
    pub sessions: Arc<SessionManager>,
    pub conversations: ConversationStore,
    pub users: UserStore,
}

/// Run the interactive loop until EOF or `/quit`.
pub async fn run(ctx: ChatContext) -> Result<()> {
    let backend = OpenAiBackend::new(HttpBackendConfig::local(
        ctx.config.llm.endpoint.clone(),
        ctx.config.llm.model.clone(),
    ))
    .map_err(|e| anyhow::anyhow!("{e}"))?;

    let user_id = resolve_cli_user(&ctx.users).await?;
    let session = ctx.sessions.create();

    let conversation = ctx
        .conversations
        .create(user_id, None, "cli")
        .await
        .context("failed to create conversation")?;
    seal_settings(&ctx, user_id, conversation.id, &session).await?;

    info!(conversation_id = conversation.id, "chat started");
    println!("DAWN ready. Type a message, or /quit to exit.");

    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let mut line = String::new();
        if stdin.read_line(&mut line).context("stdin read failed")? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }

        let cancel = CancelToken::new();
        let mut on_text = |delta: &str| {
            print!("{delta}");
            std::io::stdout().flush().ok();
        };

        match ctx
            .orchestrator
            .run_turn(&backend, &session, line, &cancel, &mut on_text)
            .await
        {
            Ok(response) => {
                println!();
                persist_turn(&ctx, user_id, conversation.id, line, &response).await;
            }
            Err(e) => {
                // The user message is committed; no spurious assistant
                // message is appended on failure.
                warn!(error = %e, "turn failed");
                println!("Sorry, something went wrong with that one.");
            }
        }
    }

    ctx.sessions.release(session.id);
    println!("Goodbye.");
    Ok(())
}

/// Find or create the CLI user.
async fn resolve_cli_user(users: &UserStore) -> Result<i64> {
    if let Some(user) = users
        .find_by_username(CLI_USERNAME)
        .await
        .context("failed to look up the cli user")?
    {
        return Ok(user.id);
    }
    let user = users
        .create(CLI_USERNAME, "user")
        .await
        .context("failed to create the cli user")?;
    Ok(user.id)
}

/// Seal the conversation's model settings from the session's configuration.
async fn seal_settings(
    ctx: &ChatContext,
    user_id: i64,
    conversation_id: i64,
    session: &Arc<Session>,
) -> Result<()> {
    let llm = session.llm_config();
    let settings = LlmSettings {
        llm_type: match llm.kind {
            dawn_agent::LlmKind::Local => "local".into(),
            dawn_agent::LlmKind::Cloud => "cloud".into(),
        },
        provider: llm.provider,
        model: llm.model.unwrap_or_else(|| ctx.config.llm.model.clone()),
        tools_mode: llm.tools_mode,
        thinking_mode: if llm.thinking { "on".into() } else { "off".into() },
    };

    ctx.conversations
        .lock_llm_settings(user_id, conversation_id, settings)
        .await
        .context("failed to lock conversation settings")?;
    Ok(())
}

/// Append both sides of a completed turn to the store.
async fn persist_turn(
    ctx: &ChatContext,
    user_id: i64,
    conversation_id: i64,
    user_text: &str,
    response: &str,
) {
    for (role, content) in [("user", user_text), ("assistant", response)] {
        if let Err(e) = ctx
            .conversations
            .add_message(user_id, conversation_id, role, content)
            .await
        {
            warn!(error = %e, role, "failed to persist message");
        }
    }
}
