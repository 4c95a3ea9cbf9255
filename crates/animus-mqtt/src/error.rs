use thiserror::Error;

#[derive(Debug, Error)]
pub enum MqttError {
    #[error("mqtt client error: {0}")]
    Client(String),

    #[error("not connected")]
    NotConnected,

    #[error("tool timeout")]
    ToolTimeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error("malformed payload: {0}")]
    Payload(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rumqttc::ClientError> for MqttError {
    fn from(e: rumqttc::ClientError) -> Self {
        MqttError::Client(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MqttError>;
