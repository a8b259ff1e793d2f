//! Error types for each subsystem of the engine.
//!
//! Each failure family gets its own enum so callers can match on the cases
//! they care about. The persistence boundary alone uses `anyhow::Error`,
//! since backends differ in what can go wrong.

use thiserror::Error;

/// Errors from the reasoning-service boundary.
#[derive(Error, Debug)]
pub enum ReasoningError {
    #[error("Reasoning call failed: {message}")]
    CallFailed { message: String },

    #[error("Reasoning call timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Reasoning reply could not be parsed: {message}")]
    MalformedReply { message: String },
}

/// Errors from the capability registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Unknown worker: {worker_id}")]
    UnknownWorker { worker_id: String },

    #[error("Invalid capability definition: {message}")]
    InvalidDefinition { message: String },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the context store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("No context for workflow: {workflow_id}")]
    NotFound { workflow_id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Errors from a single worker invocation.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker {worker_id} timed out after {seconds}s")]
    Timeout { worker_id: String, seconds: u64 },

    #[error("Worker invocation failed: {message}")]
    Invocation { message: String },

    #[error("Worker invocation cancelled")]
    Cancelled,
}

/// Errors from the workflow orchestrator.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Plan validation failed: {issues:?}")]
    PlanValidation { issues: Vec<String> },

    #[error("Unknown workflow: {workflow_id}")]
    WorkflowNotFound { workflow_id: String },

    #[error("Workflow {workflow_id} is in state {status}, expected {expected}")]
    InvalidState {
        workflow_id: String,
        status: String,
        expected: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Decision(#[from] DecisionError),
}

/// Errors from the decision engine and autopilot.
#[derive(Error, Debug)]
pub enum DecisionError {
    #[error("No pending options for workflow: {workflow_id}")]
    NoPendingOptions { workflow_id: String },

    #[error("Decision could not be processed: {message}")]
    Invalid { message: String },
}
