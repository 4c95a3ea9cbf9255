pub mod registry;
pub mod types;

pub use registry::TerminalRegistry;
pub use types::{IntentCatalog, IntentSpec, SkillDefinition, SkillSnapshot, TerminalState};
