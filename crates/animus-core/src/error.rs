use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnimusError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("soul not found for user {user_id} (hint: {hint})")]
    SoulNotFound { user_id: String, hint: String },

    #[error("soul selection required: user {user_id} owns {count} souls and no binding exists")]
    SoulSelectionRequired { user_id: String, count: usize },

    #[error("Database error: {0}")]
    Database(String),

    #[error("LLM provider error: {0}")]
    Provider(String),

    #[error("MQTT error: {0}")]
    Mqtt(String),

    #[error("Request timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AnimusError {
    /// Short error code string surfaced in HTTP error bodies and logs.
    pub fn code(&self) -> &'static str {
        match self {
            AnimusError::Config(_) => "CONFIG_ERROR",
            AnimusError::Validation(_) => "VALIDATION_ERROR",
            AnimusError::SoulNotFound { .. } => "SOUL_NOT_FOUND",
            AnimusError::SoulSelectionRequired { .. } => "SOUL_SELECTION_REQUIRED",
            AnimusError::Database(_) => "DATABASE_ERROR",
            AnimusError::Provider(_) => "LLM_PROVIDER_ERROR",
            AnimusError::Mqtt(_) => "MQTT_ERROR",
            AnimusError::Timeout { .. } => "TIMEOUT",
            AnimusError::Serialization(_) => "SERIALIZATION_ERROR",
            AnimusError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Errors the caller can fix by changing the request — mapped to 400.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AnimusError::Validation(_)
                | AnimusError::SoulNotFound { .. }
                | AnimusError::SoulSelectionRequired { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, AnimusError>;
