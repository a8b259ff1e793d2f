//! Workflow Orchestrator: the state machine that takes a request from
//! analysis through worker execution to a consolidated result.

pub mod orchestrator;
pub mod state;
pub mod worker;

pub use orchestrator::Orchestrator;
pub use state::{StepRecord, WorkerExecutionState, WorkerStatus, WorkflowState, WorkflowStatus};
pub use worker::{MockWorkerInvoker, WorkerInvoker};
