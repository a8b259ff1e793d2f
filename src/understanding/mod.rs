//! Understanding Service: one reasoning call turns free text into a
//! structured, validated execution plan.

pub mod service;
pub mod types;

pub use service::UnderstandingService;
pub use types::{AgentMapping, ExecutionPlan, Understanding};
