//! Context Store: per-workflow semantic context that flows through the
//! orchestration without losing meaning between workers.

pub mod semantic;
pub mod store;

pub use semantic::{EvolutionEntry, SemanticContext};
pub use store::ContextStore;
