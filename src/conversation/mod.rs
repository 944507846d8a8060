//! Guided order entry: one multi-step dialogue per user.

mod engine;
mod input;
mod state;

pub use engine::{ConversationEngine, EngineConfig, RestartPolicy};
