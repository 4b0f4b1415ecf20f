//! MQTT bridge between the command core and satellite devices.
//!
//! The bridge is the [`BusPublisher`] implementation behind the command
//! executor: outgoing command envelopes are published to the configured
//! command topic (or a tool's topic override).  Its event loop subscribes
//! to two topics:
//!
//! - the **reply topic**, where sync-wait replies arrive; each payload is
//!   validated ([`reply::resolve_reply`], checksum fail-closed) and handed
//!   to the [`CommandRouter`] for correlation, and
//! - the **remote topic**, where external bridges (voice satellites) may
//!   invoke remote-capable tools with command envelopes of their own;
//!   these dispatch through the executor under the local session.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tracing::{debug, info, warn};
use uuid::Uuid;

use dawn_command::executor::BusPublisher;
use dawn_command::{
    CancelToken, CommandContext, CommandEnvelope, CommandError, CommandExecutor, CommandRouter,
    LOCAL_SESSION_ID,
};
use dawn_config::DawnConfig;

mod error;
pub mod reply;

pub use error::{BusError, Result};
pub use reply::{ReplyResolution, resolve_reply};

/// Topic external bridges publish command envelopes on.
pub const REMOTE_TOPIC: &str = "dawn/remote";

/// MQTT bridge handle.
///
/// Cheap to clone; the event loop runs on its own tokio task for the life
/// of the process.
#[derive(Clone)]
pub struct MqttBridge {
    client: AsyncClient,
    shared: Arc<BridgeShared>,
}

struct BridgeShared {
    router: Arc<CommandRouter>,
    reply_topic: String,
    /// Installed after construction: the executor depends on the bridge as
    /// its publisher, so remote dispatch is wired second.
    executor: OnceLock<Arc<CommandExecutor>>,
}

impl MqttBridge {
    /// Connect to the broker, subscribe to the reply and remote topics, and
    /// spawn the event loop.
    pub async fn connect(config: &DawnConfig, router: Arc<CommandRouter>) -> Result<Self> {
        let client_id = config
            .mqtt
            .client_id
            .clone()
            .unwrap_or_else(|| format!("dawn-{}", Uuid::new_v4()));

        let mut options = MqttOptions::new(
            client_id,
            &config.mqtt.broker_host,
            config.mqtt.broker_port,
        );
        options.set_keep_alive(std::time::Duration::from_secs(60));
        if let (Some(username), Some(password)) =
            (&config.secrets.mqtt_username, &config.secrets.mqtt_password)
        {
            options.set_credentials(username, password);
        }

        let (client, mut event_loop) = AsyncClient::new(options, 64);

        client
            .subscribe(&config.mqtt.reply_topic, QoS::AtLeastOnce)
            .await?;
        client.subscribe(REMOTE_TOPIC, QoS::AtLeastOnce).await?;

        let shared = Arc::new(BridgeShared {
            router,
            reply_topic: config.mqtt.reply_topic.clone(),
            executor: OnceLock::new(),
        });

        let loop_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let payload = String::from_utf8_lossy(&publish.payload).into_owned();
                        handle_incoming(&loop_shared, &publish.topic, payload).await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt event loop error, reconnecting");
                        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                    }
                }
            }
        });

        info!(
            host = %config.mqtt.broker_host,
            port = config.mqtt.broker_port,
            reply_topic = %config.mqtt.reply_topic,
            "mqtt bridge connected"
        );

        Ok(Self { client, shared })
    }

    /// Wire the executor in for remote-command dispatch.
    ///
    /// Called once at startup after the executor is constructed over this
    /// bridge.
    pub fn enable_remote_dispatch(&self, executor: Arc<CommandExecutor>) {
        if self.shared.executor.set(executor).is_err() {
            warn!("remote dispatch already enabled");
        }
    }
}

#[async_trait]
impl BusPublisher for MqttBridge {
    async fn publish(&self, topic: &str, payload: &str) -> dawn_command::Result<()> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload.as_bytes().to_vec())
            .await
            .map_err(|e| CommandError::BusPublish {
                reason: e.to_string(),
            })
    }
}

/// Route one incoming publish to the reply or remote handler.
async fn handle_incoming(shared: &Arc<BridgeShared>, topic: &str, payload: String) {
    if topic == shared.reply_topic {
        match resolve_reply(&payload) {
            ReplyResolution::Deliver { request_id, text } => {
                shared.router.deliver(&request_id, text);
            }
            ReplyResolution::Ignore => {}
        }
        return;
    }

    if topic == REMOTE_TOPIC {
        let Some(executor) = shared.executor.get() else {
            debug!("remote command received before dispatch was enabled");
            return;
        };
        dispatch_remote_command(executor, &payload).await;
    }
}

/// Execute a command envelope published by an external bridge.
///
/// Only tools flagged remote-capable may be invoked this way; everything
/// else is dropped with a log.  The envelope's `session_id` routes the
/// invocation; absent one, the local session is used.
pub async fn dispatch_remote_command(executor: &Arc<CommandExecutor>, payload: &str) {
    let envelope: CommandEnvelope = match serde_json::from_str(payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "malformed remote command envelope");
            return;
        }
    };

    let tool = match executor.registry().find(&envelope.device) {
        Ok(tool) => tool,
        Err(e) => {
            warn!(device = %envelope.device, error = %e, "remote command for unknown tool");
            return;
        }
    };
    if !tool.spec.default_remote {
        warn!(device = %envelope.device, "tool is not remote-capable, dropping");
        return;
    }

    let session_id = envelope.session_id.unwrap_or(LOCAL_SESSION_ID);
    let value = envelope.value.clone().unwrap_or_default();

    let outcome = CommandContext::scope(
        session_id,
        executor.execute(
            &envelope.device,
            &envelope.action,
            &value,
            &CancelToken::new(),
            std::time::Duration::ZERO,
        ),
    )
    .await;

    match outcome {
        Ok(result) => {
            debug!(
                device = %envelope.device,
                success = result.success,
                "remote command executed"
            );
        }
        Err(e) => {
            warn!(device = %envelope.device, error = %e, "remote command failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
