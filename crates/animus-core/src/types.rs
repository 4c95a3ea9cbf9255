use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Role of a persisted conversation message.
///
/// `Observation` rows hold non-text terminal inputs (camera captions,
/// sensor digests) that accompany a chat turn; they are summarized into
/// the prompt but never replayed as dialogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
    Observation,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
            MessageRole::Observation => "observation",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "tool" => Ok(MessageRole::Tool),
            "observation" => Ok(MessageRole::Observation),
            other => Err(format!("unknown message role: {}", other)),
        }
    }
}

/// One input item carried by a chat request. Terminals may send several
/// per turn (a spoken sentence plus a camera caption, for example).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatInput {
    /// Input kind, e.g. "keyboard_text", "speech_text", "vision_caption".
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: String,
}

impl ChatInput {
    /// Only these kinds become the user's dialogue text. Everything else
    /// is folded into the observation digest.
    pub fn is_dialogue(&self) -> bool {
        matches!(self.kind.as_str(), "keyboard_text" | "speech_text")
    }
}

/// Generate a fresh UUIDv4 string — request ids, soul ids, user UUIDs.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Session id used by the decay publisher for synthetic affect updates.
pub const DECAY_SESSION_ID: &str = "system_decay_tick";

/// Reply used when the LLM produced neither text nor a silence marker.
pub const GENERIC_ACK: &str = "好的，我在。";
