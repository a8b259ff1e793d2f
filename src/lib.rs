//! # Semflow
//!
//! A semantic capability-orchestration engine. Free-text business requests
//! are analyzed by a reasoning collaborator into a structured understanding,
//! mapped onto registered worker capabilities, and executed as workflows
//! with shared semantic context, decision-driven stepping, and a
//! configurable autopilot.
//!
//! The main entry point is [`Orchestrator`]: wire it a [`ReasoningService`],
//! a [`CapabilityRegistry`], a persistence backend, and a [`WorkerInvoker`],
//! then `submit` requests and `advance` workflows.

pub mod capabilities;
pub mod context;
pub mod error;
pub mod intelligence;
pub mod persistence;
pub mod reasoning;
pub mod types;
pub mod understanding;
pub mod workflow;

pub use capabilities::{CapabilityDescriptor, CapabilityRegistry};
pub use context::{ContextStore, SemanticContext};
pub use intelligence::{
    AutopilotManager, AutopilotMode, AutopilotSettings, DecisionEngine, HumanDecision,
    NextStepOption, RiskLevel,
};
pub use persistence::{InMemoryKeyValueStore, KeyValueStore, SqliteKeyValueStore};
pub use reasoning::ReasoningService;
pub use types::{CapabilityCategory, ExecutionStrategy, Urgency};
pub use understanding::{Understanding, UnderstandingService};
pub use workflow::{
    MockWorkerInvoker, Orchestrator, WorkerInvoker, WorkflowState, WorkflowStatus,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
