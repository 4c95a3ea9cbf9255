//! Wire payloads. All JSON, UTF-8.

use animus_registry::SkillDefinition;
use serde::{Deserialize, Serialize};

use crate::error::MqttError;

/// Full skill report published by a terminal on `.../skills`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillReport {
    pub terminal_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub soul_id: Option<String>,
    #[serde(default)]
    pub skill_version: i64,
    #[serde(default)]
    pub skills: Vec<SkillDefinition>,
}

/// Parse a skills payload: either a full [`SkillReport`] or the legacy
/// bare skill array older firmware publishes. Legacy reports adopt the
/// topic's terminal id and version 0.
pub fn parse_skill_report(topic_terminal_id: &str, payload: &[u8]) -> Result<SkillReport, MqttError> {
    if let Ok(report) = serde_json::from_slice::<SkillReport>(payload) {
        if report.terminal_id != topic_terminal_id {
            return Err(MqttError::Payload(format!(
                "terminal id mismatch: topic {} vs payload {}",
                topic_terminal_id, report.terminal_id
            )));
        }
        return Ok(report);
    }
    let skills: Vec<SkillDefinition> = serde_json::from_slice(payload)
        .map_err(|e| MqttError::Payload(format!("not a skill report or skill array: {e}")))?;
    Ok(SkillReport {
        terminal_id: topic_terminal_id.to_string(),
        user_id: None,
        soul_id: None,
        skill_version: 0,
        skills,
    })
}

/// `online` carries a short text payload, not JSON.
pub fn parse_online(payload: &[u8]) -> bool {
    matches!(
        String::from_utf8_lossy(payload).trim(),
        "online" | "1" | "true"
    )
}

/// Server → terminal invoke request on `.../invoke/{rid}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeRequest {
    pub request_id: String,
    pub skill: String,
    pub arguments: serde_json::Value,
}

/// Terminal → server result on `.../result/{rid}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeResult {
    #[serde(default)]
    pub request_id: String,
    #[serde(default = "default_true")]
    pub ok: bool,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: Option<String>,
}

fn default_true() -> bool {
    true
}

impl InvokeResult {
    /// Human-readable outcome recorded into the conversation history.
    pub fn text(&self) -> String {
        if self.ok {
            self.output.clone()
        } else {
            match &self.error {
                Some(e) if !e.is_empty() => format!("error: {e}"),
                _ => "error: skill failed".to_string(),
            }
        }
    }
}

/// Lightweight progress event on `.../status` (recall searching, etc).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub event: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

impl StatusEvent {
    pub fn named(event: &str) -> Self {
        Self {
            event: event.to_string(),
            data: serde_json::Value::Null,
        }
    }
}

/// Affect snapshot pushed on `.../emotion_update` after every persona
/// step, including decay ticks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmotionUpdate {
    pub terminal_id: String,
    pub soul_id: String,
    pub session_id: String,
    pub snapshot_at: String,
    pub user_emotion: String,
    pub user_emotion_intensity: f64,
    pub p: f64,
    pub a: f64,
    pub d: f64,
    pub exec_mode: String,
    pub exec_probability: f64,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Intent short-circuit dispatch on `.../intent_action`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentAction {
    pub terminal_id: String,
    pub session_id: String,
    pub intent: String,
    pub skill: String,
    #[serde(default)]
    pub slots: serde_json::Value,
}
