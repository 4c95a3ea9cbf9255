//! Capability-trait implementations over the MQTT hub.
//!
//! The orchestrator depends on the traits in [`crate::traits`]; the hub
//! satisfies them here, keeping `animus-mqtt` free of any orchestrator
//! knowledge.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use animus_mqtt::{EmotionUpdate, IntentAction, MqttHub, StatusEvent};

use crate::traits::{EmotionPublisher, IntentActionPublisher, SkillInvoker, StatusPublisher};

pub struct HubAdapter {
    hub: Arc<MqttHub>,
}

impl HubAdapter {
    pub fn new(hub: Arc<MqttHub>) -> Arc<Self> {
        Arc::new(Self { hub })
    }
}

#[async_trait]
impl SkillInvoker for HubAdapter {
    async fn invoke_skill(
        &self,
        terminal_id: &str,
        skill: &str,
        arguments: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<String, String> {
        match self.hub.invoke_skill(terminal_id, skill, arguments, cancel).await {
            Ok(result) => Ok(result.text()),
            Err(e) => Err(e.to_string()),
        }
    }
}

#[async_trait]
impl StatusPublisher for HubAdapter {
    async fn publish_status(&self, terminal_id: &str, event: &str, data: serde_json::Value) {
        let status = StatusEvent {
            event: event.to_string(),
            data,
        };
        if let Err(e) = self.hub.publish_status(terminal_id, status).await {
            debug!(terminal_id, event, error = %e, "status publish failed");
        }
    }
}

#[async_trait]
impl EmotionPublisher for HubAdapter {
    async fn publish_emotion(&self, update: EmotionUpdate) -> Result<(), String> {
        let terminal_id = update.terminal_id.clone();
        self.hub
            .publish_emotion(&terminal_id, update)
            .await
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl IntentActionPublisher for HubAdapter {
    async fn publish_intent_action(&self, action: IntentAction) -> Result<(), String> {
        let terminal_id = action.terminal_id.clone();
        self.hub
            .publish_intent_action(&terminal_id, action)
            .await
            .map_err(|e| e.to_string())
    }
}
