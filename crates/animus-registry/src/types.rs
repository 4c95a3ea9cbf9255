use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One action a terminal advertises, with a JSON-schema input contract.
/// Exposed to the LLM verbatim as a tool definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_schema")]
    pub input_schema: serde_json::Value,
}

fn default_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// A terminal's current skill advertisement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillSnapshot {
    pub terminal_id: String,
    pub soul_id: Option<String>,
    pub skill_version: i64,
    pub skills: Vec<SkillDefinition>,
    pub received_at: DateTime<Utc>,
}

/// One declarative intent rule. Keyword/regex matching and slot
/// extraction happen in the intent-filter service; the catalog must name
/// the terminal skill an accepted intent maps to — entries without one
/// never short-circuit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentSpec {
    pub intent: String,
    /// Terminal skill invoked when this intent fires.
    pub skill: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Slot name → extraction hint (regex or keyword list).
    #[serde(default)]
    pub slots: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IntentCatalog {
    #[serde(default)]
    pub intents: Vec<IntentSpec>,
}

impl IntentCatalog {
    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }

    pub fn skill_for(&self, intent: &str) -> Option<&str> {
        self.intents
            .iter()
            .find(|spec| spec.intent == intent)
            .map(|spec| spec.skill.as_str())
            .filter(|s| !s.is_empty())
    }
}

/// Everything the server knows about one terminal, kept in memory only
/// and rebuilt from MQTT traffic after a restart.
#[derive(Debug, Clone, Default)]
pub struct TerminalState {
    pub online: bool,
    pub soul_id: Option<String>,
    pub skill_version: i64,
    pub skills: Vec<SkillDefinition>,
    pub skills_received_at: Option<DateTime<Utc>>,
    pub intent_catalog: Option<IntentCatalog>,
    pub last_seen_at: Option<DateTime<Utc>>,
}
