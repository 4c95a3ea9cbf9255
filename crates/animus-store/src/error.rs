use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("user not found: {0}")]
    UserNotFound(String),

    #[error("soul not found: {0}")]
    SoulNotFound(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("soul {soul_id} does not belong to user {user_id}")]
    SoulOwnershipMismatch { soul_id: String, user_id: String },

    #[error("invalid mbti type: {0}")]
    InvalidMbti(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for animus_core::AnimusError {
    fn from(e: StoreError) -> Self {
        match e {
            e @ (StoreError::Validation(_) | StoreError::InvalidMbti(_)) => {
                animus_core::AnimusError::Validation(e.to_string())
            }
            other => animus_core::AnimusError::Database(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
