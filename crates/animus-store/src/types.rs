use animus_core::types::MessageRole;
use animus_persona::{AffectState, PersonalityVector};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub user_uuid: String,
    pub display_name: String,
    pub description: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Soul {
    pub soul_id: String,
    pub user_id: String,
    pub name: String,
    pub mbti_type: String,
    pub personality: PersonalityVector,
    pub emotion_state: AffectState,
    pub model_version: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Soul {
    /// Base vector plus accumulated drift, clamped per component.
    pub fn effective_personality(&self) -> PersonalityVector {
        self.personality.add(&self.emotion_state.drift).clamp01()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalSoulBinding {
    pub user_id: String,
    pub terminal_id: String,
    pub soul_id: String,
    pub first_bound_at: String,
    pub last_seen_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub terminal_id: String,
    pub soul_id: String,
    pub created_at: String,
    pub summary: String,
    pub summary_updated_at: Option<String>,
    pub last_compacted_message_id: i64,
    pub last_user_active_at: Option<String>,
    pub idle_processed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub session_id: String,
    pub user_id: String,
    pub terminal_id: String,
    pub soul_id: String,
    pub role: MessageRole,
    pub name: Option<String>,
    pub tool_call_id: Option<String>,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEpisode {
    pub id: i64,
    pub session_id: String,
    pub user_id: String,
    pub terminal_id: String,
    pub soul_id: String,
    pub summary: String,
    pub created_at: String,
}

/// Queue row for the external semantic-memory exporter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryJob {
    pub id: i64,
    pub session_id: String,
    pub user_id: String,
    pub terminal_id: String,
    pub soul_id: String,
    pub summary: String,
    pub trigger_source: String,
    pub status: JobStatus,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// How a soul relates to a named counterpart persona; feeds the
/// persona-relation block of the system prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoulRelation {
    pub id: i64,
    pub soul_id: String,
    pub target_name: String,
    pub target_mbti: Option<String>,
    pub guidance: String,
    pub created_at: String,
    pub updated_at: String,
}
