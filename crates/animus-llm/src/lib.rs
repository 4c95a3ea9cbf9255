pub mod openai;
pub mod provider;
pub mod stream;

pub use openai::OpenAiProvider;
pub use provider::{
    ChatTurn, LlmProvider, LlmRequest, LlmResponse, ProviderError, ToolCall, ToolDefinition,
};
pub use stream::StreamEvent;
