use animus_registry::IntentCatalog;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Verdict of the intent-filter service for one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    ExecuteIntents,
    FallbackReasoning,
    NoAction,
}

impl DecisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionKind::ExecuteIntents => "execute_intents",
            DecisionKind::FallbackReasoning => "fallback_reasoning",
            DecisionKind::NoAction => "no_action",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Ready,
    NeedClarification,
    Rejected,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentMatch {
    pub intent: String,
    /// Target skill, echoed from the catalog. Filled from the catalog
    /// when the filter omits it; intents that still have none never fire.
    #[serde(default)]
    pub skill: Option<String>,
    #[serde(default)]
    pub slots: serde_json::Value,
    pub status: IntentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentDecision {
    pub decision: DecisionKind,
    #[serde(default)]
    pub intents: Vec<IntentMatch>,
}

impl IntentDecision {
    /// Ready intents with a resolved skill — the only ones that may
    /// short-circuit a turn.
    pub fn actionable(&self, catalog: &IntentCatalog) -> Vec<IntentMatch> {
        if self.decision != DecisionKind::ExecuteIntents {
            return Vec::new();
        }
        self.intents
            .iter()
            .filter(|m| m.status == IntentStatus::Ready)
            .filter_map(|m| {
                let skill = m
                    .skill
                    .clone()
                    .filter(|s| !s.is_empty())
                    .or_else(|| catalog.skill_for(&m.intent).map(String::from))?;
                Some(IntentMatch {
                    intent: m.intent.clone(),
                    skill: Some(skill),
                    slots: m.slots.clone(),
                    status: m.status,
                })
            })
            .collect()
    }
}

/// Client for the external intent-filter service. Best-effort: a failed
/// or unconfigured filter means no short-circuit, never a failed turn.
pub struct IntentFilterClient {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl IntentFilterClient {
    pub fn new(client: reqwest::Client, base_url: Option<String>) -> Self {
        Self { client, base_url }
    }

    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }

    pub async fn evaluate(&self, command: &str, catalog: &IntentCatalog) -> Option<IntentDecision> {
        let base = self.base_url.as_ref()?;
        let body = serde_json::json!({
            "command": command,
            "catalog": catalog,
        });
        let resp = match self
            .client
            .post(format!("{base}/v1/intent/filter"))
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "intent filter unreachable, falling through");
                return None;
            }
        };
        if !resp.status().is_success() {
            warn!(status = resp.status().as_u16(), "intent filter error, falling through");
            return None;
        }
        match resp.json::<IntentDecision>().await {
            Ok(decision) => Some(decision),
            Err(e) => {
                warn!(error = %e, "intent filter returned malformed body, falling through");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use animus_registry::IntentSpec;

    fn catalog() -> IntentCatalog {
        IntentCatalog {
            intents: vec![IntentSpec {
                intent: "intent_light".into(),
                skill: "control_light".into(),
                keywords: vec!["灯".into()],
                patterns: vec![],
                slots: serde_json::Value::Null,
            }],
        }
    }

    #[test]
    fn decision_wire_format_round_trips() {
        let json = r#"{
            "decision": "execute_intents",
            "intents": [
                {"intent": "intent_light", "slots": {"state": "on"}, "status": "ready"},
                {"intent": "intent_light", "slots": {}, "status": "need_clarification"}
            ]
        }"#;
        let decision: IntentDecision = serde_json::from_str(json).unwrap();
        assert_eq!(decision.decision, DecisionKind::ExecuteIntents);
        assert_eq!(decision.intents.len(), 2);
        assert_eq!(decision.intents[0].status, IntentStatus::Ready);
    }

    #[test]
    fn actionable_fills_skill_from_catalog_and_drops_unready() {
        let decision: IntentDecision = serde_json::from_str(
            r#"{
                "decision": "execute_intents",
                "intents": [
                    {"intent": "intent_light", "slots": {}, "status": "ready"},
                    {"intent": "intent_light", "slots": {}, "status": "rejected"},
                    {"intent": "intent_unknown", "slots": {}, "status": "ready"}
                ]
            }"#,
        )
        .unwrap();

        let actionable = decision.actionable(&catalog());
        assert_eq!(actionable.len(), 1);
        assert_eq!(actionable[0].skill.as_deref(), Some("control_light"));
    }

    #[test]
    fn non_execute_decisions_are_never_actionable() {
        let decision: IntentDecision = serde_json::from_str(
            r#"{
                "decision": "fallback_reasoning",
                "intents": [{"intent": "intent_light", "slots": {}, "status": "ready"}]
            }"#,
        )
        .unwrap();
        assert!(decision.actionable(&catalog()).is_empty());
    }
}
