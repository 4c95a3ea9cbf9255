//! PAD affect engine.
//!
//! A soul's inner life is a small dynamical system: a Pleasure–Arousal–
//! Dominance point, a boredom accumulator, a shock load, an extreme-memory
//! trace, slow personality drift, and a lock timer. `engine::update`
//! advances it by one step; `engine::execution_probability` turns the
//! state into a binary execution gate for terminal skills.
//!
//! Everything here is pure computation — no I/O, no clocks of its own.
//! Callers pass `now` in and persist the returned state themselves.

pub mod engine;
pub mod state;
pub mod vector;

pub use engine::{EngineParams, ExecMode, UpdateInput, Updated};
pub use state::{AffectState, EmotionSignal};
pub use vector::PersonalityVector;
