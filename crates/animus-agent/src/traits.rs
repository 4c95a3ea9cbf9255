//! Capability seams between the orchestrator and the MQTT hub.
//!
//! The orchestrator never holds the hub directly; it holds these narrow
//! traits, wired at construction. That breaks the orchestrator ↔ hub
//! reference cycle and lets tests substitute recording fakes.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use animus_mqtt::{EmotionUpdate, IntentAction};

/// Fire one terminal skill and wait for its output.
#[async_trait]
pub trait SkillInvoker: Send + Sync {
    /// Ok(output text) on success; Err(human-readable error) otherwise.
    async fn invoke_skill(
        &self,
        terminal_id: &str,
        skill: &str,
        arguments: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<String, String>;
}

/// Progress events for the web debug UI (recall searching, etc).
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    async fn publish_status(&self, terminal_id: &str, event: &str, data: serde_json::Value);
}

/// Affect snapshots after every persona step.
#[async_trait]
pub trait EmotionPublisher: Send + Sync {
    async fn publish_emotion(&self, update: EmotionUpdate) -> Result<(), String>;
}

/// Intent short-circuit dispatches.
#[async_trait]
pub trait IntentActionPublisher: Send + Sync {
    async fn publish_intent_action(&self, action: IntentAction) -> Result<(), String>;
}
