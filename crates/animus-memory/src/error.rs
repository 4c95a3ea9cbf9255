use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("store error: {0}")]
    Store(#[from] animus_store::StoreError),

    #[error("summarizer error: {0}")]
    Summarizer(#[from] animus_llm::ProviderError),

    #[error("semantic memory error: {0}")]
    Semantic(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<reqwest::Error> for MemoryError {
    fn from(e: reqwest::Error) -> Self {
        MemoryError::Semantic(e.to_string())
    }
}

impl From<MemoryError> for animus_core::AnimusError {
    fn from(e: MemoryError) -> Self {
        match e {
            MemoryError::Store(inner) => inner.into(),
            MemoryError::Summarizer(inner) => {
                animus_core::AnimusError::Provider(inner.to_string())
            }
            other => animus_core::AnimusError::Internal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;
