pub mod error;
pub mod hub;
pub mod payloads;
pub mod topics;

pub use error::MqttError;
pub use hub::{MqttHub, SoulBinder};
pub use payloads::{EmotionUpdate, IntentAction, InvokeRequest, InvokeResult, SkillReport, StatusEvent};
