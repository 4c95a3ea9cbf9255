//! Topic plan.
//!
//! Terminal → server (prefix default `soul`):
//!   {p}/terminal/{tid}/skills          retained, QoS 1
//!   {p}/terminal/{tid}/online          retained, QoS 1, LWT = "offline"
//!   {p}/terminal/{tid}/heartbeat       QoS 0
//!   {p}/terminal/{tid}/result/{rid}    QoS 1
//!   {p}/terminal/{tid}/intent_catalog  retained, QoS 1
//!
//! Server → terminal:
//!   {p}/terminal/{tid}/invoke/{rid}    QoS 1
//!   {p}/terminal/{tid}/status          QoS 0
//!   {p}/terminal/{tid}/emotion_update  QoS 0
//!   {p}/terminal/{tid}/intent_action   QoS 1

/// Message kinds arriving from terminals, parsed out of the topic path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Skills { terminal_id: String },
    Online { terminal_id: String },
    Heartbeat { terminal_id: String },
    Result { terminal_id: String, request_id: String },
    IntentCatalog { terminal_id: String },
}

/// Subscription filters the hub installs on every (re)connect.
pub fn subscription_filters(prefix: &str) -> Vec<(String, rumqttc::QoS)> {
    use rumqttc::QoS;
    vec![
        (format!("{prefix}/terminal/+/skills"), QoS::AtLeastOnce),
        (format!("{prefix}/terminal/+/online"), QoS::AtLeastOnce),
        (format!("{prefix}/terminal/+/heartbeat"), QoS::AtMostOnce),
        (format!("{prefix}/terminal/+/result/+"), QoS::AtLeastOnce),
        (format!("{prefix}/terminal/+/intent_catalog"), QoS::AtLeastOnce),
    ]
}

/// Parse an inbound topic. Returns `None` for anything outside the plan.
pub fn parse_inbound(prefix: &str, topic: &str) -> Option<Inbound> {
    let rest = topic.strip_prefix(prefix)?.strip_prefix('/')?;
    let mut parts = rest.split('/');
    if parts.next()? != "terminal" {
        return None;
    }
    let terminal_id = parts.next()?.to_string();
    if terminal_id.is_empty() {
        return None;
    }
    let kind = parts.next()?;
    match (kind, parts.next(), parts.next()) {
        ("skills", None, _) => Some(Inbound::Skills { terminal_id }),
        ("online", None, _) => Some(Inbound::Online { terminal_id }),
        ("heartbeat", None, _) => Some(Inbound::Heartbeat { terminal_id }),
        ("result", Some(rid), None) if !rid.is_empty() => Some(Inbound::Result {
            terminal_id,
            request_id: rid.to_string(),
        }),
        ("intent_catalog", None, _) => Some(Inbound::IntentCatalog { terminal_id }),
        _ => None,
    }
}

pub fn invoke_topic(prefix: &str, terminal_id: &str, request_id: &str) -> String {
    format!("{prefix}/terminal/{terminal_id}/invoke/{request_id}")
}

pub fn status_topic(prefix: &str, terminal_id: &str) -> String {
    format!("{prefix}/terminal/{terminal_id}/status")
}

pub fn emotion_topic(prefix: &str, terminal_id: &str) -> String {
    format!("{prefix}/terminal/{terminal_id}/emotion_update")
}

pub fn intent_action_topic(prefix: &str, terminal_id: &str) -> String {
    format!("{prefix}/terminal/{terminal_id}/intent_action")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_inbound_kind() {
        assert_eq!(
            parse_inbound("soul", "soul/terminal/t1/skills"),
            Some(Inbound::Skills { terminal_id: "t1".into() })
        );
        assert_eq!(
            parse_inbound("soul", "soul/terminal/t1/online"),
            Some(Inbound::Online { terminal_id: "t1".into() })
        );
        assert_eq!(
            parse_inbound("soul", "soul/terminal/t1/heartbeat"),
            Some(Inbound::Heartbeat { terminal_id: "t1".into() })
        );
        assert_eq!(
            parse_inbound("soul", "soul/terminal/t1/result/rid-9"),
            Some(Inbound::Result {
                terminal_id: "t1".into(),
                request_id: "rid-9".into()
            })
        );
        assert_eq!(
            parse_inbound("soul", "soul/terminal/t1/intent_catalog"),
            Some(Inbound::IntentCatalog { terminal_id: "t1".into() })
        );
    }

    #[test]
    fn rejects_foreign_topics() {
        assert_eq!(parse_inbound("soul", "other/terminal/t1/skills"), None);
        assert_eq!(parse_inbound("soul", "soul/server/t1/skills"), None);
        assert_eq!(parse_inbound("soul", "soul/terminal/t1/unknown"), None);
        assert_eq!(parse_inbound("soul", "soul/terminal/t1/result"), None);
        assert_eq!(parse_inbound("soul", "soul/terminal/t1/result/a/b"), None);
        assert_eq!(parse_inbound("soul", "soul/terminal//skills"), None);
    }

    #[test]
    fn outbound_topics_follow_the_plan() {
        assert_eq!(invoke_topic("soul", "t1", "r1"), "soul/terminal/t1/invoke/r1");
        assert_eq!(status_topic("soul", "t1"), "soul/terminal/t1/status");
        assert_eq!(emotion_topic("soul", "t1"), "soul/terminal/t1/emotion_update");
        assert_eq!(intent_action_topic("soul", "t1"), "soul/terminal/t1/intent_action");
    }

    #[test]
    fn custom_prefixes_round_trip() {
        let topic = invoke_topic("acme/prod", "t1", "r1");
        assert_eq!(topic, "acme/prod/terminal/t1/invoke/r1");
        // Inbound parsing with the same multi-segment prefix.
        assert_eq!(
            parse_inbound("acme/prod", "acme/prod/terminal/t1/heartbeat"),
            Some(Inbound::Heartbeat { terminal_id: "t1".into() })
        );
    }
}
