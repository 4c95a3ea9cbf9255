pub mod decay;
pub mod emotion;
pub mod intent;
pub mod orchestrator;
pub mod prompt;
pub mod recall;
pub mod resolver;
pub mod traits;
pub mod wiring;

pub use orchestrator::{ChatOrchestrator, ChatTurnRequest, ChatTurnResponse, OrchestratorConfig};
pub use resolver::SoulResolver;
pub use traits::{EmotionPublisher, IntentActionPublisher, SkillInvoker, StatusPublisher};
