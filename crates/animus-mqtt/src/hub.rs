use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use animus_registry::{IntentCatalog, TerminalRegistry};

use crate::error::{MqttError, Result};
use crate::payloads::{
    parse_online, parse_skill_report, EmotionUpdate, IntentAction, InvokeRequest, InvokeResult,
    StatusEvent,
};
use crate::topics::{self, Inbound};

/// Minimum delay between reconnect attempts (seconds).
const BACKOFF_BASE_SECS: u64 = 5;
/// Maximum delay between reconnect attempts (seconds).
const BACKOFF_MAX_SECS: u64 = 60;

/// Resolves which soul a reporting terminal is bound to.
///
/// Implemented orchestrator-side; the hub only knows this narrow seam so
/// the inbound `skills` handler can auto-bind without a dependency cycle.
#[async_trait]
pub trait SoulBinder: Send + Sync {
    async fn resolve_soul(
        &self,
        terminal_id: &str,
        user_id: Option<&str>,
        soul_id: Option<&str>,
    ) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct HubOptions {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub topic_prefix: String,
    pub invoke_timeout: Duration,
}

/// MQTT hub: inbound terminal traffic plus the invoke RPC.
///
/// Pending invokes live in a `rid → cap-1 channel` map. Results are
/// delivered with `try_send` so a slow or vanished waiter can never
/// stall the event loop; the invoke side always removes its entry on
/// the way out, so late results find nobody and are dropped.
pub struct MqttHub {
    client: AsyncClient,
    prefix: String,
    registry: Arc<TerminalRegistry>,
    binder: Arc<dyn SoulBinder>,
    pending: Mutex<HashMap<String, mpsc::Sender<InvokeResult>>>,
    invoke_timeout: Duration,
    connected: AtomicBool,
}

impl MqttHub {
    /// Build the hub and its unpolled event loop. Call [`MqttHub::run`]
    /// on a task to drive the connection.
    pub fn new(
        options: HubOptions,
        registry: Arc<TerminalRegistry>,
        binder: Arc<dyn SoulBinder>,
    ) -> (Arc<Self>, EventLoop) {
        let mut mqtt_options = MqttOptions::new(options.client_id, options.host, options.port);
        mqtt_options.set_keep_alive(Duration::from_secs(15));
        let (client, event_loop) = AsyncClient::new(mqtt_options, 64);

        let hub = Arc::new(Self {
            client,
            prefix: options.topic_prefix,
            registry,
            binder,
            pending: Mutex::new(HashMap::new()),
            invoke_timeout: options.invoke_timeout,
            connected: AtomicBool::new(false),
        });
        (hub, event_loop)
    }

    /// Drive the connection until `shutdown` flips. Reconnects with
    /// exponential backoff; subscriptions are reinstalled on every
    /// ConnAck so a broker restart is transparent.
    pub async fn run(self: Arc<Self>, mut event_loop: EventLoop, mut shutdown: watch::Receiver<bool>) {
        let mut backoff_secs = BACKOFF_BASE_SECS;
        info!("mqtt hub started");
        loop {
            tokio::select! {
                event = event_loop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt connected");
                        backoff_secs = BACKOFF_BASE_SECS;
                        self.connected.store(true, Ordering::SeqCst);
                        self.subscribe_all().await;
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        self.handle_publish(&publish.topic, &publish.payload).await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        self.connected.store(false, Ordering::SeqCst);
                        warn!(error = %e, retry_after_secs = backoff_secs, "mqtt connection error");
                        tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                        backoff_secs = (backoff_secs * 2).min(BACKOFF_MAX_SECS);
                    }
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("mqtt hub shutting down");
                        let _ = self.client.disconnect().await;
                        break;
                    }
                }
            }
        }
    }

    async fn subscribe_all(&self) {
        for (filter, qos) in topics::subscription_filters(&self.prefix) {
            if let Err(e) = self.client.subscribe(filter.clone(), qos).await {
                error!(filter = %filter, error = %e, "subscribe failed");
            }
        }
    }

    async fn handle_publish(&self, topic: &str, payload: &[u8]) {
        let Some(inbound) = topics::parse_inbound(&self.prefix, topic) else {
            debug!(topic, "ignoring message outside the topic plan");
            return;
        };

        match inbound {
            Inbound::Skills { terminal_id } => {
                let report = match parse_skill_report(&terminal_id, payload) {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(terminal_id, error = %e, "bad skills payload");
                        return;
                    }
                };
                let soul_id = self
                    .binder
                    .resolve_soul(
                        &terminal_id,
                        report.user_id.as_deref(),
                        report.soul_id.as_deref(),
                    )
                    .await
                    .or(report.soul_id.clone());
                self.registry.set_skills(
                    &terminal_id,
                    soul_id,
                    report.skill_version,
                    report.skills,
                );
            }
            Inbound::Online { terminal_id } => {
                let online = parse_online(payload);
                debug!(terminal_id, online, "terminal liveness");
                self.registry.set_online(&terminal_id, online);
            }
            Inbound::Heartbeat { terminal_id } => {
                self.registry.touch(&terminal_id);
            }
            Inbound::Result {
                terminal_id,
                request_id,
            } => {
                let mut result: InvokeResult = match serde_json::from_slice(payload) {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(terminal_id, request_id, error = %e, "bad result payload");
                        return;
                    }
                };
                // The topic segment is authoritative for correlation.
                result.request_id = request_id.clone();
                self.deliver_result(&request_id, result);
            }
            Inbound::IntentCatalog { terminal_id } => {
                match serde_json::from_slice::<IntentCatalog>(payload) {
                    Ok(catalog) => {
                        debug!(terminal_id, intents = catalog.intents.len(), "intent catalog");
                        self.registry.set_intent_catalog(&terminal_id, catalog);
                    }
                    Err(e) => warn!(terminal_id, error = %e, "bad intent catalog payload"),
                }
            }
        }
    }

    /// Hand a result to its waiter, if any. Non-blocking: a second
    /// result for the same rid, or a result after timeout, is dropped.
    fn deliver_result(&self, request_id: &str, result: InvokeResult) {
        let pending = self.pending.lock().unwrap();
        match pending.get(request_id) {
            Some(tx) => {
                if tx.try_send(result).is_err() {
                    debug!(request_id, "duplicate result dropped");
                }
            }
            None => debug!(request_id, "result with no waiter dropped"),
        }
    }

    /// Request/reply over `invoke/{rid}` and `result/{rid}`.
    ///
    /// Waits for the terminal's result, the caller's cancellation, or
    /// the hard invoke timeout — whichever comes first. The pending
    /// entry is removed on every path.
    pub async fn invoke_skill(
        &self,
        terminal_id: &str,
        skill: &str,
        arguments: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<InvokeResult> {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel::<InvokeResult>(1);
        self.pending
            .lock()
            .unwrap()
            .insert(request_id.clone(), tx);

        let outcome = self
            .invoke_inner(terminal_id, skill, arguments, &request_id, rx, cancel)
            .await;

        self.pending.lock().unwrap().remove(&request_id);
        outcome
    }

    async fn invoke_inner(
        &self,
        terminal_id: &str,
        skill: &str,
        arguments: serde_json::Value,
        request_id: &str,
        mut rx: mpsc::Receiver<InvokeResult>,
        cancel: &CancellationToken,
    ) -> Result<InvokeResult> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(MqttError::NotConnected);
        }

        let request = InvokeRequest {
            request_id: request_id.to_string(),
            skill: skill.to_string(),
            arguments,
        };
        let topic = topics::invoke_topic(&self.prefix, terminal_id, request_id);
        let payload = serde_json::to_vec(&request)?;
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await?;

        debug!(terminal_id, skill, request_id, "invoke published");

        tokio::select! {
            _ = cancel.cancelled() => Err(MqttError::Cancelled),
            _ = tokio::time::sleep(self.invoke_timeout) => Err(MqttError::ToolTimeout),
            result = rx.recv() => {
                result.ok_or_else(|| MqttError::Client("result channel closed".into()))
            }
        }
    }

    // ── outbound publishers ──────────────────────────────────────────────

    pub async fn publish_status(&self, terminal_id: &str, event: StatusEvent) -> Result<()> {
        let topic = topics::status_topic(&self.prefix, terminal_id);
        let payload = serde_json::to_vec(&event)?;
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await?;
        Ok(())
    }

    pub async fn publish_emotion(&self, terminal_id: &str, update: EmotionUpdate) -> Result<()> {
        let topic = topics::emotion_topic(&self.prefix, terminal_id);
        let payload = serde_json::to_vec(&update)?;
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await?;
        Ok(())
    }

    pub async fn publish_intent_action(&self, terminal_id: &str, action: IntentAction) -> Result<()> {
        let topic = topics::intent_action_topic(&self.prefix, terminal_id);
        let payload = serde_json::to_vec(&action)?;
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await?;
        Ok(())
    }

    /// Number of in-flight invoke RPCs (diagnostics).
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}
