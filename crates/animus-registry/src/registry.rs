use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::types::{IntentCatalog, SkillDefinition, TerminalState};

/// In-memory registry of online terminals and their advertised skills.
///
/// Skill snapshots expire `ttl` after the last report: past that point
/// `skills_for` returns nothing and the LLM stops seeing the terminal's
/// tools, but the soul binding and online flag persist until the broker
/// says otherwise.
pub struct TerminalRegistry {
    terminals: RwLock<HashMap<String, TerminalState>>,
    ttl: Duration,
}

impl TerminalRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            terminals: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Install a skill snapshot. Reports older than the current version
    /// are dropped; an equal version replaces, refreshing the TTL clock.
    pub fn set_skills(
        &self,
        terminal_id: &str,
        soul_id: Option<String>,
        version: i64,
        skills: Vec<SkillDefinition>,
    ) {
        let mut map = self.terminals.write().unwrap();
        let state = map.entry(terminal_id.to_string()).or_default();
        if version < state.skill_version {
            warn!(
                terminal_id,
                version,
                current = state.skill_version,
                "stale skill report dropped"
            );
            return;
        }
        debug!(terminal_id, version, count = skills.len(), "skills updated");
        state.skill_version = version;
        state.skills = skills;
        state.skills_received_at = Some(Utc::now());
        if soul_id.is_some() {
            state.soul_id = soul_id;
        }
    }

    pub fn set_soul(&self, terminal_id: &str, soul_id: &str) {
        let mut map = self.terminals.write().unwrap();
        let state = map.entry(terminal_id.to_string()).or_default();
        state.soul_id = Some(soul_id.to_string());
    }

    pub fn set_online(&self, terminal_id: &str, online: bool) {
        let mut map = self.terminals.write().unwrap();
        let state = map.entry(terminal_id.to_string()).or_default();
        state.online = online;
        state.last_seen_at = Some(Utc::now());
    }

    /// Heartbeats refresh liveness without touching anything else.
    pub fn touch(&self, terminal_id: &str) {
        self.set_online(terminal_id, true);
    }

    pub fn set_intent_catalog(&self, terminal_id: &str, catalog: IntentCatalog) {
        let mut map = self.terminals.write().unwrap();
        let state = map.entry(terminal_id.to_string()).or_default();
        state.intent_catalog = Some(catalog);
    }

    /// Current skills, or empty when the snapshot is past its TTL.
    pub fn skills_for(&self, terminal_id: &str) -> Vec<SkillDefinition> {
        self.skills_for_at(terminal_id, Utc::now())
    }

    /// TTL evaluation at an explicit instant — the boundary is
    /// inclusive: exactly `ttl` old still counts.
    pub fn skills_for_at(&self, terminal_id: &str, now: DateTime<Utc>) -> Vec<SkillDefinition> {
        let map = self.terminals.read().unwrap();
        let Some(state) = map.get(terminal_id) else {
            return Vec::new();
        };
        match state.skills_received_at {
            Some(received) if age_within(received, now, self.ttl) => state.skills.clone(),
            _ => Vec::new(),
        }
    }

    pub fn soul_for(&self, terminal_id: &str) -> Option<String> {
        let map = self.terminals.read().unwrap();
        map.get(terminal_id).and_then(|s| s.soul_id.clone())
    }

    pub fn intent_catalog_for(&self, terminal_id: &str) -> Option<IntentCatalog> {
        let map = self.terminals.read().unwrap();
        map.get(terminal_id).and_then(|s| s.intent_catalog.clone())
    }

    /// `(terminal_id, soul_id)` pairs the decay publisher walks: online
    /// terminals with a bound soul.
    pub fn list_online_states(&self) -> Vec<(String, String)> {
        let map = self.terminals.read().unwrap();
        let mut out: Vec<(String, String)> = map
            .iter()
            .filter(|(_, s)| s.online)
            .filter_map(|(tid, s)| s.soul_id.clone().map(|soul| (tid.clone(), soul)))
            .collect();
        out.sort();
        out
    }

    /// Full snapshot for the debug surface. Skills are TTL-filtered the
    /// same way the orchestrator sees them.
    pub fn snapshot(&self) -> Vec<(String, TerminalState)> {
        let now = Utc::now();
        let map = self.terminals.read().unwrap();
        let mut out: Vec<(String, TerminalState)> = map
            .iter()
            .map(|(tid, s)| {
                let mut s = s.clone();
                let expired = !matches!(
                    s.skills_received_at,
                    Some(received) if age_within(received, now, self.ttl)
                );
                if expired {
                    s.skills.clear();
                }
                (tid.clone(), s)
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

fn age_within(received: DateTime<Utc>, now: DateTime<Utc>, ttl: Duration) -> bool {
    let age_ms = (now - received).num_milliseconds();
    age_ms >= 0 && age_ms as u128 <= ttl.as_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IntentSpec;
    use chrono::Duration as ChronoDuration;

    fn skill(name: &str) -> SkillDefinition {
        SkillDefinition {
            name: name.to_string(),
            description: String::new(),
            input_schema: serde_json::json!({"type": "object"}),
        }
    }

    #[test]
    fn stale_versions_are_dropped_equal_versions_replace() {
        let reg = TerminalRegistry::new(Duration::from_secs(60));
        reg.set_skills("t1", None, 2, vec![skill("wave")]);
        reg.set_skills("t1", None, 1, vec![skill("old")]);
        assert_eq!(reg.skills_for("t1")[0].name, "wave");

        reg.set_skills("t1", None, 2, vec![skill("nod")]);
        assert_eq!(reg.skills_for("t1")[0].name, "nod");
    }

    #[test]
    fn skills_expire_exactly_past_the_ttl() {
        let reg = TerminalRegistry::new(Duration::from_secs(60));
        reg.set_skills("t1", None, 1, vec![skill("wave")]);
        let received = {
            let map = reg.terminals.read().unwrap();
            map.get("t1").unwrap().skills_received_at.unwrap()
        };

        let at_ttl = received + ChronoDuration::seconds(60);
        assert_eq!(reg.skills_for_at("t1", at_ttl).len(), 1);

        let past_ttl = received + ChronoDuration::milliseconds(60_001);
        assert!(reg.skills_for_at("t1", past_ttl).is_empty());
    }

    #[test]
    fn binding_survives_skill_expiry() {
        let reg = TerminalRegistry::new(Duration::from_secs(0));
        reg.set_skills("t1", Some("soul-1".into()), 1, vec![skill("wave")]);
        let later = Utc::now() + ChronoDuration::seconds(5);
        assert!(reg.skills_for_at("t1", later).is_empty());
        assert_eq!(reg.soul_for("t1").as_deref(), Some("soul-1"));
    }

    #[test]
    fn online_states_require_online_and_soul() {
        let reg = TerminalRegistry::new(Duration::from_secs(60));
        reg.set_online("t1", true);
        reg.set_soul("t1", "soul-1");
        reg.set_online("t2", true); // no soul
        reg.set_soul("t3", "soul-3"); // not online
        reg.set_online("t4", true);
        reg.set_soul("t4", "soul-4");
        reg.set_online("t4", false); // went offline

        assert_eq!(
            reg.list_online_states(),
            vec![("t1".to_string(), "soul-1".to_string())]
        );
    }

    #[test]
    fn heartbeat_touch_marks_online() {
        let reg = TerminalRegistry::new(Duration::from_secs(60));
        reg.touch("t1");
        reg.set_soul("t1", "soul-1");
        assert_eq!(reg.list_online_states().len(), 1);
    }

    #[test]
    fn catalog_skill_lookup_ignores_empty_mappings() {
        let catalog = IntentCatalog {
            intents: vec![
                IntentSpec {
                    intent: "intent_light".into(),
                    skill: "control_light".into(),
                    keywords: vec![],
                    patterns: vec![],
                    slots: serde_json::Value::Null,
                },
                IntentSpec {
                    intent: "intent_unmapped".into(),
                    skill: String::new(),
                    keywords: vec![],
                    patterns: vec![],
                    slots: serde_json::Value::Null,
                },
            ],
        };
        assert_eq!(catalog.skill_for("intent_light"), Some("control_light"));
        assert_eq!(catalog.skill_for("intent_unmapped"), None);
        assert_eq!(catalog.skill_for("missing"), None);
    }
}
